use std::str::FromStr;

use bitcoin::hashes::Hash as _;
use bitcoin::{Address, PubkeyHash, Script, ScriptBuf, ScriptHash};

use crate::error::{Error, Result};
use crate::network::Network;

/// Largest redeem script a P2SH spend can push.
pub const MAX_REDEEM_SCRIPT_SIZE: usize = 520;

/// P2SH address committing to `HASH160(script)`.
pub fn derive_address(script: &Script, network: Network) -> Result<Address> {
    Address::p2sh(script, network.into_bitcoin())
        .map_err(|e| Error::InvalidScript(format!("cannot derive P2SH address: {e}")))
}

/// `OP_HASH160 <HASH160(script)> OP_EQUAL`.
pub fn expected_script_pubkey(script: &Script) -> ScriptBuf {
    ScriptBuf::new_p2sh(&ScriptHash::hash(script.as_bytes()))
}

/// True when an on-chain output script pays to `script` via P2SH.
pub fn verify_on_chain_output(output_script: &Script, script: &Script) -> bool {
    output_script == expected_script_pubkey(script).as_script()
}

/// Parse an address string and require it to belong to `network`.
pub fn parse_address(s: &str, network: Network) -> Result<Address> {
    Address::from_str(s)
        .map_err(|e| Error::InvalidAddress(format!("{s}: {e}")))?
        .require_network(network.into_bitcoin())
        .map_err(|e| Error::InvalidAddress(format!("{s}: {e}")))
}

/// The 20-byte key hash a P2PKH or P2WPKH address pays to.
pub fn pubkey_hash_of(address: &Address) -> Result<PubkeyHash> {
    let spk = address.script_pubkey();
    let bytes = spk.as_bytes();
    let hash = if spk.is_p2pkh() {
        &bytes[3..23]
    } else if spk.is_p2wpkh() {
        &bytes[2..22]
    } else {
        return Err(Error::InvalidAddress(format!(
            "{address} is not a single-key address"
        )));
    };
    PubkeyHash::from_slice(hash).map_err(|e| Error::InvalidAddress(e.to_string()))
}
