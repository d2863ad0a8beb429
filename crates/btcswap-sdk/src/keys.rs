use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{
    Address, CompressedPublicKey, NetworkKind, PrivateKey, PubkeyHash, PublicKey, ScriptBuf,
};

use crate::error::{Error, Result};
use crate::network::Network;

/// A single compressed signing key with its P2WPKH address.
///
/// Pays and receives through P2WPKH; signs HTLC spends with the same key.
#[derive(Clone)]
pub struct WalletKey {
    private_key: PrivateKey,
    public_key: CompressedPublicKey,
    network: Network,
}

impl WalletKey {
    pub fn from_secret_key(secret_key: SecretKey, network: Network) -> Result<Self> {
        let private_key = PrivateKey::new(secret_key, network.into_bitcoin());
        Self::from_private_key(private_key, network)
    }

    pub fn from_secret_bytes(bytes: &[u8], network: Network) -> Result<Self> {
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Self::from_secret_key(secret_key, network)
    }

    /// Parse a WIF string, falling back to 32-byte hex.
    pub fn parse(s: &str, network: Network) -> Result<Self> {
        let s = s.trim();
        if let Ok(private_key) = PrivateKey::from_wif(s) {
            if private_key.network != NetworkKind::from(network.into_bitcoin()) {
                return Err(Error::InvalidKey(format!(
                    "WIF key is not for {network}"
                )));
            }
            return Self::from_private_key(private_key, network);
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| Error::InvalidKey("neither WIF nor hex".into()))?;
        Self::from_secret_bytes(&bytes, network)
    }

    fn from_private_key(private_key: PrivateKey, network: Network) -> Result<Self> {
        let secp = Secp256k1::signing_only();
        let public_key = CompressedPublicKey::from_private_key(&secp, &private_key)
            .map_err(|e| Error::InvalidKey(format!("uncompressed keys are not supported: {e}")))?;
        Ok(Self {
            private_key,
            public_key,
            network,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.public_key)
    }

    pub fn compressed_public_key(&self) -> CompressedPublicKey {
        self.public_key
    }

    pub fn pubkey_hash(&self) -> PubkeyHash {
        self.public_key().pubkey_hash()
    }

    /// P2WPKH address for this key.
    pub fn address(&self) -> Address {
        Address::p2wpkh(&self.public_key, self.network.into_bitcoin())
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&self.public_key.wpubkey_hash())
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.private_key.inner
    }

    pub fn to_wif(&self) -> String {
        self.private_key.to_wif()
    }
}

impl std::fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletKey")
            .field("public_key", &self.public_key)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}
