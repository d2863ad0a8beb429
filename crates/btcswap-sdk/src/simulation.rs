//! In-process stand-in for a Bitcoin indexer.
//!
//! Used when a swap runs in [`NetworkMode::Simulated`](crate::config::NetworkMode)
//! or when the failover provider has exhausted its endpoints and simulation
//! fallback is enabled. Responses have the same shape as a real backend's:
//! broadcast transactions are remembered and their outputs become UTXOs, and
//! an address nobody has paid yet gets a synthetic confirmed funding
//! transaction so downstream script checks still hold.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::hashes::Hash as _;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
    absolute,
};
use sha2::{Digest, Sha256};

use crate::chain::{ChainBackend, ChainTip, TxStatus, Utxo, decode_transaction};
use crate::error::{Error, Result};

/// Height every simulated transaction confirms at.
pub const SIMULATED_BLOCK_HEIGHT: u32 = 123_456;

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

#[derive(Default)]
struct SimState {
    transactions: HashMap<Txid, Transaction>,
    /// Broadcast order, so UTXO listings are stable.
    order: Vec<Txid>,
}

impl SimState {
    fn insert(&mut self, tx: Transaction) -> Txid {
        let txid = tx.compute_txid();
        if self.transactions.insert(txid, tx).is_none() {
            self.order.push(txid);
        }
        txid
    }

    fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.transactions
            .values()
            .any(|tx| tx.input.iter().any(|i| i.previous_output == *outpoint))
    }

    fn unspent_for(&self, script_pubkey: &ScriptBuf) -> Vec<Utxo> {
        let mut utxos = Vec::new();
        for txid in &self.order {
            let Some(tx) = self.transactions.get(txid) else {
                continue;
            };
            for (vout, output) in tx.output.iter().enumerate() {
                let outpoint = OutPoint::new(*txid, vout as u32);
                if output.script_pubkey == *script_pubkey && !self.is_spent(&outpoint) {
                    utxos.push(Utxo {
                        txid: *txid,
                        vout: vout as u32,
                        value: output.value.to_sat(),
                        block_height: Some(SIMULATED_BLOCK_HEIGHT),
                    });
                }
            }
        }
        utxos
    }
}

pub struct SimulatedBackend {
    utxo_value: u64,
    state: Mutex<SimState>,
}

impl SimulatedBackend {
    /// `utxo_value` is the value of each synthetic funding output.
    pub fn new(utxo_value: u64) -> Self {
        Self {
            utxo_value,
            state: Mutex::new(SimState::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| Error::Query("simulation state poisoned".into()))
    }

    /// Deterministic funding transaction paying `utxo_value` to `script_pubkey`.
    fn synthetic_funding(&self, script_pubkey: &ScriptBuf) -> Transaction {
        let seed: [u8; 32] = Sha256::digest(script_pubkey.as_bytes()).into();
        Transaction {
            version: Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array(seed), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(self.utxo_value),
                script_pubkey: script_pubkey.clone(),
            }],
        }
    }
}

impl ChainBackend for SimulatedBackend {
    fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>> {
        let script_pubkey = address.script_pubkey();
        let mut state = self.lock()?;
        let existing = state.unspent_for(&script_pubkey);
        if !existing.is_empty() {
            return Ok(existing);
        }
        let tx = self.synthetic_funding(&script_pubkey);
        let outpoint = OutPoint::new(tx.compute_txid(), 0);
        if state.is_spent(&outpoint) {
            return Ok(Vec::new());
        }
        state.insert(tx);
        Ok(state.unspent_for(&script_pubkey))
    }

    fn broadcast(&self, raw_hex: &str) -> Result<Txid> {
        let tx = decode_transaction(raw_hex).map_err(|e| Error::Broadcast(e.to_string()))?;
        let txid = self.lock()?.insert(tx);
        log::info!("simulation: accepted broadcast {txid}");
        Ok(txid)
    }

    fn get_raw_transaction_hex(&self, txid: &Txid) -> Result<String> {
        let state = self.lock()?;
        state
            .transactions
            .get(txid)
            .map(bitcoin::consensus::encode::serialize_hex)
            .ok_or_else(|| Error::Query(format!("transaction {txid} not found")))
    }

    fn tx_status(&self, txid: &Txid) -> Result<TxStatus> {
        let known = self.lock()?.transactions.contains_key(txid);
        Ok(TxStatus {
            confirmed: known,
            block_height: known.then_some(SIMULATED_BLOCK_HEIGHT),
            block_time: known.then(now_secs),
        })
    }

    fn tip(&self) -> Result<ChainTip> {
        Ok(ChainTip {
            height: SIMULATED_BLOCK_HEIGHT,
            median_time: now_secs(),
        })
    }
}
