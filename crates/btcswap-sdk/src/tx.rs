//! Funding, claim and refund transactions.
//!
//! Funding spends the payer's P2WPKH outputs into the HTLC's P2SH output.
//! Claim and refund spend that output back out with a legacy `scriptSig`.
//! Every transaction is fully assembled (inputs, outputs, sequence, lock
//! time) before any signature is computed, so the signatures commit to the
//! final shape.

use bitcoin::hashes::Hash as _;
use bitcoin::opcodes::{OP_FALSE, OP_TRUE};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
    absolute, ecdsa,
};

use crate::chain::{ChainTip, Utxo};
use crate::error::{Error, Result};
use crate::htlc::{HtlcKind, HtlcScript, SpendTiming};
use crate::interpreter::{self, SpendPath};
use crate::keys::WalletKey;
use crate::order::Secret;

/// Outputs below this many sats are not relayed.
pub const DUST_LIMIT_SATS: u64 = 546;

#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub tx: Transaction,
    pub txid: Txid,
    /// Fee actually paid, including any change folded into it.
    pub fee: u64,
    /// Change returned to the payer, 0 when there is none.
    pub change: u64,
}

impl BuiltTransaction {
    fn new(tx: Transaction, fee: u64, change: u64) -> Self {
        Self {
            txid: tx.compute_txid(),
            tx,
            fee,
            change,
        }
    }

    pub fn to_hex(&self) -> String {
        bitcoin::consensus::encode::serialize_hex(&self.tx)
    }
}

/// Greedy selection in the given order until `target` is covered.
pub fn select_coins(utxos: &[Utxo], target: u64) -> Result<(Vec<Utxo>, u64)> {
    let mut selected = Vec::new();
    let mut total: u64 = 0;
    for utxo in utxos {
        if total >= target {
            break;
        }
        total = total.saturating_add(utxo.value);
        selected.push(utxo.clone());
    }
    if total < target {
        return Err(Error::InsufficientFunds {
            needed: target,
            available: total,
        });
    }
    Ok((selected, total))
}

// ── Funding ─────────────────────────────────────────────────────────

pub struct FundingParams<'a> {
    pub payer: &'a WalletKey,
    /// Candidate P2WPKH outputs owned by `payer`.
    pub utxos: &'a [Utxo],
    pub htlc: &'a HtlcScript,
    pub amount: u64,
    pub fee: u64,
}

pub fn build_funding_tx(params: &FundingParams<'_>) -> Result<BuiltTransaction> {
    if params.amount < DUST_LIMIT_SATS {
        return Err(Error::Dust(format!(
            "HTLC amount {} sats",
            params.amount
        )));
    }
    let needed = params
        .amount
        .checked_add(params.fee)
        .ok_or_else(|| Error::Transaction("amount plus fee overflows".into()))?;
    let (selected, total) = select_coins(params.utxos, needed)?;

    let mut fee = params.fee;
    let mut change = total - needed;
    let mut output = vec![TxOut {
        value: Amount::from_sat(params.amount),
        script_pubkey: params.htlc.script_pubkey(),
    }];
    if change >= DUST_LIMIT_SATS {
        output.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: params.payer.script_pubkey(),
        });
    } else {
        fee += change;
        change = 0;
    }

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: selected
            .iter()
            .map(|u| TxIn {
                previous_output: u.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            })
            .collect(),
        output,
    };

    let secp = Secp256k1::signing_only();
    let payer_spk = params.payer.script_pubkey();
    let public_key = params.payer.compressed_public_key();
    let mut witnesses = Vec::with_capacity(selected.len());
    {
        let mut cache = SighashCache::new(&tx);
        for (i, utxo) in selected.iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(
                    i,
                    &payer_spk,
                    Amount::from_sat(utxo.value),
                    EcdsaSighashType::All,
                )
                .map_err(|e| Error::Signer(e.to_string()))?;
            let msg = Message::from_digest(sighash.to_byte_array());
            let signature = ecdsa::Signature {
                signature: secp.sign_ecdsa(&msg, params.payer.secret_key()),
                sighash_type: EcdsaSighashType::All,
            };
            witnesses.push(Witness::p2wpkh(&signature, &public_key.0));
        }
    }
    for (input, witness) in tx.input.iter_mut().zip(witnesses) {
        input.witness = witness;
    }

    log::debug!(
        "tx: funding {} sats to {} from {} input(s), fee {fee}, change {change}",
        params.amount,
        params.htlc.script_pubkey(),
        selected.len()
    );
    Ok(BuiltTransaction::new(tx, fee, change))
}

// ── HTLC spends ─────────────────────────────────────────────────────

pub struct ClaimParams<'a> {
    pub htlc: &'a HtlcScript,
    /// The HTLC output being spent.
    pub utxo: &'a Utxo,
    pub secret: &'a Secret,
    pub claimer: &'a WalletKey,
    pub destination: &'a Address,
    pub fee: u64,
}

/// Spend the hashlock branch, revealing `secret` in the `scriptSig`.
pub fn build_claim_tx(params: &ClaimParams<'_>) -> Result<BuiltTransaction> {
    let htlc = params.htlc;
    if params.secret.hash_lock().sha256 != htlc.params().hash_lock {
        return Err(Error::SecretMismatch);
    }

    let claimer = params.claimer;
    let pinned = match htlc.kind() {
        HtlcKind::Generic { claim_pubkey } | HtlcKind::Destination { claim_pubkey } => {
            if claimer.public_key() != *claim_pubkey {
                return Err(Error::KeyMismatch("claimer is not the claim key".into()));
            }
            false
        }
        HtlcKind::RecipientPinned { recipient } => {
            if claimer.pubkey_hash() != *recipient {
                return Err(Error::KeyMismatch(
                    "claimer does not hash to the pinned recipient".into(),
                ));
            }
            true
        }
    };

    let (mut tx, fee) = spend_skeleton(
        params.utxo,
        htlc.claim_timing()?,
        params.destination,
        params.fee,
    )?;
    let signature = sign_legacy(&tx, htlc, claimer)?;

    let mut builder = Builder::new().push_slice(signature);
    if pinned {
        builder = builder.push_key(&claimer.public_key());
    }
    tx.input[0].script_sig = builder
        .push_slice(*params.secret.as_bytes())
        .push_opcode(OP_TRUE)
        .push_slice(redeem_push(htlc)?)
        .into_script();

    expect_path(&tx, htlc, SpendPath::Claim)?;
    log::debug!("tx: claim {} spends {}", tx.compute_txid(), params.utxo.outpoint());
    Ok(BuiltTransaction::new(tx, fee, 0))
}

pub struct RefundParams<'a> {
    pub htlc: &'a HtlcScript,
    pub utxo: &'a Utxo,
    pub refunder: &'a WalletKey,
    pub destination: &'a Address,
    pub fee: u64,
    pub tip: ChainTip,
    /// Block time of the block that confirmed the HTLC output.
    pub funding_confirmed_at: Option<u32>,
}

/// Spend the timelocked refund branch. Fails early when the lock has not
/// matured at `tip`.
pub fn build_refund_tx(params: &RefundParams<'_>) -> Result<BuiltTransaction> {
    let htlc = params.htlc;
    htlc.ensure_refund_mature(&params.tip, params.funding_confirmed_at)?;
    if params.refunder.public_key() != htlc.params().refund_pubkey {
        return Err(Error::KeyMismatch("refunder is not the refund key".into()));
    }

    let (mut tx, fee) = spend_skeleton(
        params.utxo,
        htlc.refund_timing()?,
        params.destination,
        params.fee,
    )?;
    let signature = sign_legacy(&tx, htlc, params.refunder)?;
    tx.input[0].script_sig = Builder::new()
        .push_slice(signature)
        .push_opcode(OP_FALSE)
        .push_slice(redeem_push(htlc)?)
        .into_script();

    expect_path(&tx, htlc, SpendPath::Refund)?;
    log::debug!("tx: refund {} spends {}", tx.compute_txid(), params.utxo.outpoint());
    Ok(BuiltTransaction::new(tx, fee, 0))
}

/// Single-input, single-output spend of the HTLC output with an empty scriptSig.
fn spend_skeleton(
    utxo: &Utxo,
    timing: SpendTiming,
    destination: &Address,
    fee: u64,
) -> Result<(Transaction, u64)> {
    let value = utxo
        .value
        .checked_sub(fee)
        .filter(|v| *v >= DUST_LIMIT_SATS)
        .ok_or_else(|| {
            Error::Dust(format!("{} sats minus {fee} sats fee", utxo.value))
        })?;
    let tx = Transaction {
        version: Version::TWO,
        lock_time: timing.lock_time,
        input: vec![TxIn {
            previous_output: OutPoint::new(utxo.txid, utxo.vout),
            script_sig: ScriptBuf::new(),
            sequence: timing.sequence,
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: destination.script_pubkey(),
        }],
    };
    Ok((tx, fee))
}

fn sign_legacy(tx: &Transaction, htlc: &HtlcScript, key: &WalletKey) -> Result<PushBytesBuf> {
    let sighash = SighashCache::new(tx)
        .legacy_signature_hash(0, htlc.script(), EcdsaSighashType::All.to_u32())
        .map_err(|e| Error::Signer(e.to_string()))?;
    let msg = Message::from_digest(sighash.to_byte_array());
    let secp = Secp256k1::signing_only();
    let signature = ecdsa::Signature {
        signature: secp.sign_ecdsa(&msg, key.secret_key()),
        sighash_type: EcdsaSighashType::All,
    };
    PushBytesBuf::try_from(signature.to_vec()).map_err(|e| Error::Signer(e.to_string()))
}

fn redeem_push(htlc: &HtlcScript) -> Result<PushBytesBuf> {
    PushBytesBuf::try_from(htlc.script().to_bytes())
        .map_err(|e| Error::InvalidScript(e.to_string()))
}

fn expect_path(tx: &Transaction, htlc: &HtlcScript, expected: SpendPath) -> Result<()> {
    let path = interpreter::verify_htlc_input(tx, 0, htlc.script())?;
    if path != expected {
        return Err(Error::Evaluation(format!(
            "spend took the {path:?} branch, expected {expected:?}"
        )));
    }
    Ok(())
}

// ── Secret extraction ───────────────────────────────────────────────

/// Pull the secret out of a transaction that claims `htlc`.
///
/// Returns `None` when no input spends the hashlock branch of this script.
pub fn extract_secret(tx: &Transaction, htlc: &HtlcScript) -> Result<Option<Secret>> {
    let redeem = htlc.script().as_bytes();
    for input in &tx.input {
        let Ok(elements) = interpreter::push_only(&input.script_sig) else {
            continue;
        };
        let n = elements.len();
        if n < 4 || elements[n - 1] != redeem || elements[n - 2] != [1] {
            continue;
        }
        let candidate = &elements[n - 3];
        if candidate.len() != 32 {
            continue;
        }
        let secret = Secret::from_slice(candidate)?;
        if secret.hash_lock().sha256 != htlc.params().hash_lock {
            return Err(Error::SecretMismatch);
        }
        return Ok(Some(secret));
    }
    Ok(None)
}
