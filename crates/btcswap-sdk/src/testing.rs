//! Scripted chain backend, fixed keys and fast configs for tests.
//!
//! `MockBackend` keeps a ledger of transactions like the simulation backend
//! does, but lets a test queue exact `get_utxos` answers (including
//! failures) per address and inspect how often each address was polled.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bitcoin::hashes::Hash as _;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
    absolute,
};

use crate::chain::{ChainBackend, ChainTip, TxStatus, Utxo, decode_transaction};
use crate::config::SwapConfig;
use crate::error::{Error, Result};
use crate::failover::BackendFactory;
use crate::keys::WalletKey;
use crate::network::Network;

/// Height mock transactions confirm at.
pub const MOCK_BLOCK_HEIGHT: u32 = 800_000;
/// Block time mock transactions confirm at.
pub const MOCK_BLOCK_TIME: u32 = 1_700_000_000;

/// One queued answer to `get_utxos`.
#[derive(Debug, Clone)]
pub enum Scripted {
    Utxos(Vec<Utxo>),
    /// Connection-level failure (drives the detector into manual mode).
    Transport,
    /// Application-level failure (the detector keeps polling).
    Query,
}

struct MockState {
    scripted: HashMap<ScriptBuf, VecDeque<Scripted>>,
    utxo_calls: HashMap<ScriptBuf, usize>,
    transactions: HashMap<Txid, Transaction>,
    order: Vec<Txid>,
    broadcasts: Vec<Transaction>,
    always_fail: bool,
    confirmed: bool,
    tip: ChainTip,
    nonce: u32,
}

pub struct MockBackend {
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                scripted: HashMap::new(),
                utxo_calls: HashMap::new(),
                transactions: HashMap::new(),
                order: Vec::new(),
                broadcasts: Vec::new(),
                always_fail: false,
                confirmed: true,
                tip: ChainTip {
                    height: MOCK_BLOCK_HEIGHT,
                    median_time: MOCK_BLOCK_TIME,
                },
                nonce: 0,
            }),
        }
    }

    /// A backend whose every call fails at the transport level.
    pub fn failing() -> Self {
        let backend = Self::new();
        backend.lock().always_fail = true;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue answers for `address`, consumed one per `get_utxos` call. Once
    /// the queue is empty, answers come from the ledger.
    pub fn script_utxos(&self, address: &Address, answers: Vec<Scripted>) {
        self.lock()
            .scripted
            .entry(address.script_pubkey())
            .or_default()
            .extend(answers);
    }

    /// Add a transaction to the ledger as if it had been mined.
    pub fn add_transaction(&self, tx: Transaction) -> Txid {
        let txid = tx.compute_txid();
        let mut state = self.lock();
        if state.transactions.insert(txid, tx).is_none() {
            state.order.push(txid);
        }
        txid
    }

    /// Mine a transaction paying `value` to `address` and return its output.
    pub fn fund(&self, address: &Address, value: u64) -> Utxo {
        let nonce = {
            let mut state = self.lock();
            state.nonce += 1;
            state.nonce
        };
        let mut seed = [0u8; 32];
        seed[..4].copy_from_slice(&nonce.to_be_bytes());
        let tx = Transaction {
            version: Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array(seed), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: address.script_pubkey(),
            }],
        };
        let txid = self.add_transaction(tx);
        Utxo {
            txid,
            vout: 0,
            value,
            block_height: Some(MOCK_BLOCK_HEIGHT),
        }
    }

    pub fn set_confirmed(&self, confirmed: bool) {
        self.lock().confirmed = confirmed;
    }

    pub fn set_tip(&self, tip: ChainTip) {
        self.lock().tip = tip;
    }

    /// Number of `get_utxos` calls made for `address`.
    pub fn utxo_calls(&self, address: &Address) -> usize {
        self.lock()
            .utxo_calls
            .get(&address.script_pubkey())
            .copied()
            .unwrap_or_default()
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.lock().broadcasts.clone()
    }
}

impl MockState {
    fn unspent_for(&self, script_pubkey: &ScriptBuf) -> Vec<Utxo> {
        let spent = |outpoint: &OutPoint| {
            self.transactions
                .values()
                .any(|tx| tx.input.iter().any(|i| i.previous_output == *outpoint))
        };
        let mut utxos = Vec::new();
        for txid in &self.order {
            let Some(tx) = self.transactions.get(txid) else {
                continue;
            };
            for (vout, output) in tx.output.iter().enumerate() {
                let outpoint = OutPoint::new(*txid, vout as u32);
                if output.script_pubkey == *script_pubkey && !spent(&outpoint) {
                    utxos.push(Utxo {
                        txid: *txid,
                        vout: vout as u32,
                        value: output.value.to_sat(),
                        block_height: Some(MOCK_BLOCK_HEIGHT),
                    });
                }
            }
        }
        utxos
    }
}

impl ChainBackend for MockBackend {
    fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>> {
        let script_pubkey = address.script_pubkey();
        let mut state = self.lock();
        *state.utxo_calls.entry(script_pubkey.clone()).or_default() += 1;
        if state.always_fail {
            return Err(Error::Transport("mock: connection refused".into()));
        }
        let next = state
            .scripted
            .get_mut(&script_pubkey)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Utxos(utxos)) => Ok(utxos),
            Some(Scripted::Transport) => Err(Error::Transport("mock: timed out".into())),
            Some(Scripted::Query) => Err(Error::Query("mock: bad response".into())),
            None => Ok(state.unspent_for(&script_pubkey)),
        }
    }

    fn broadcast(&self, raw_hex: &str) -> Result<Txid> {
        if self.lock().always_fail {
            return Err(Error::Transport("mock: connection refused".into()));
        }
        let tx = decode_transaction(raw_hex)?;
        self.lock().broadcasts.push(tx.clone());
        Ok(self.add_transaction(tx))
    }

    fn get_raw_transaction_hex(&self, txid: &Txid) -> Result<String> {
        let state = self.lock();
        if state.always_fail {
            return Err(Error::Transport("mock: connection refused".into()));
        }
        state
            .transactions
            .get(txid)
            .map(bitcoin::consensus::encode::serialize_hex)
            .ok_or_else(|| Error::Query(format!("mock: unknown transaction {txid}")))
    }

    fn tx_status(&self, txid: &Txid) -> Result<TxStatus> {
        let state = self.lock();
        if state.always_fail {
            return Err(Error::Transport("mock: connection refused".into()));
        }
        if state.confirmed && state.transactions.contains_key(txid) {
            Ok(TxStatus {
                confirmed: true,
                block_height: Some(MOCK_BLOCK_HEIGHT),
                block_time: Some(MOCK_BLOCK_TIME),
            })
        } else {
            Ok(TxStatus::default())
        }
    }

    fn tip(&self) -> Result<ChainTip> {
        let state = self.lock();
        if state.always_fail {
            return Err(Error::Transport("mock: connection refused".into()));
        }
        Ok(state.tip)
    }
}

/// Deterministic regtest key from a repeated byte (must be non-zero).
pub fn test_key(byte: u8) -> WalletKey {
    WalletKey::from_secret_bytes(&[byte; 32], Network::Regtest)
        .unwrap_or_else(|e| panic!("test key {byte}: {e}"))
}

/// Live regtest config with millisecond timings and the given endpoints.
pub fn fast_config(endpoints: &[&str]) -> SwapConfig {
    let mut config = SwapConfig::new(Network::Regtest);
    config.rpc_endpoints = endpoints.iter().map(|e| e.to_string()).collect();
    config.poll_interval = Duration::from_millis(5);
    config.max_attempts = 3;
    config.manual_wait_timeout = Duration::from_millis(20);
    config.confirmation_timeout = Duration::from_millis(200);
    config.confirmation_poll_interval = Duration::from_millis(5);
    config.probe_backoff = Duration::ZERO;
    config
}

/// Factory mapping endpoint URLs to backends. Unknown URLs fail like a
/// refused connection.
pub fn mock_factory(backends: Vec<(&str, Arc<dyn ChainBackend>)>) -> BackendFactory {
    let backends: HashMap<String, Arc<dyn ChainBackend>> = backends
        .into_iter()
        .map(|(url, backend)| (url.to_string(), backend))
        .collect();
    Arc::new(move |endpoint: &str| -> Result<Arc<dyn ChainBackend>> {
        backends
            .get(endpoint)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("mock: {endpoint} unreachable")))
    })
}
