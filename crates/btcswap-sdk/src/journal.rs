use std::collections::HashMap;

use crate::order::SwapOrder;
use crate::state::{SwapPhase, SwapStatus};

/// Snapshot of one swap written after every phase transition.
///
/// `revealed_secret` stays `None` until the claim transaction has put the
/// secret on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRecord {
    pub swap_id: String,
    pub order_hash: [u8; 32],
    pub hash_lock_sha256: [u8; 32],
    pub hash_lock_keccak256: [u8; 32],
    pub making_amount: u64,
    pub taking_amount: u128,
    pub src_chain_id: Option<u64>,
    pub dst_chain_id: Option<u64>,
    pub htlc_address: Option<String>,
    pub htlc_script_hex: Option<String>,
    pub revealed_secret: Option<String>,
    pub status: SwapStatus,
}

impl SwapRecord {
    pub fn new(swap_id: &str, order: &SwapOrder, status: SwapStatus) -> Self {
        Self {
            swap_id: swap_id.to_string(),
            order_hash: order.order_hash,
            hash_lock_sha256: order.hash_lock.sha256,
            hash_lock_keccak256: order.hash_lock.keccak256,
            making_amount: order.making_amount,
            taking_amount: order.taking_amount,
            src_chain_id: order.src_chain_id,
            dst_chain_id: order.dst_chain_id,
            htlc_address: None,
            htlc_script_hex: None,
            revealed_secret: status
                .phase
                .secret_revealed()
                .then(|| order.secret.reveal_hex()),
            status,
        }
    }

    pub fn phase(&self) -> SwapPhase {
        self.status.phase
    }
}

/// Persistence hook for swap progress.
///
/// Implemented by `btcswap-store` for SQLite; the sdk does not depend on it.
pub trait SwapJournal: Send + 'static {
    /// Persist the latest snapshot of a swap, replacing any earlier one.
    fn record(&mut self, record: &SwapRecord) -> Result<(), String>;

    /// EVM transaction hash of a settlement already recorded for `swap_id`.
    fn settlement_tx(&mut self, swap_id: &str) -> Result<Option<String>, String>;
}

/// A journal that forgets everything.
pub struct NoopJournal;

impl SwapJournal for NoopJournal {
    fn record(&mut self, _record: &SwapRecord) -> Result<(), String> {
        Ok(())
    }

    fn settlement_tx(&mut self, _swap_id: &str) -> Result<Option<String>, String> {
        Ok(None)
    }
}

/// Keeps the latest record per swap and every phase it was written with.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: HashMap<String, SwapRecord>,
    transitions: Vec<(String, SwapPhase)>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, swap_id: &str) -> Option<&SwapRecord> {
        self.records.get(swap_id)
    }

    pub fn transitions(&self, swap_id: &str) -> Vec<SwapPhase> {
        self.transitions
            .iter()
            .filter(|(id, _)| id == swap_id)
            .map(|(_, phase)| *phase)
            .collect()
    }
}

impl SwapJournal for MemoryJournal {
    fn record(&mut self, record: &SwapRecord) -> Result<(), String> {
        let changed = self
            .records
            .get(&record.swap_id)
            .is_none_or(|prev| prev.phase() != record.phase());
        if changed {
            self.transitions
                .push((record.swap_id.clone(), record.phase()));
        }
        self.records.insert(record.swap_id.clone(), record.clone());
        Ok(())
    }

    fn settlement_tx(&mut self, swap_id: &str) -> Result<Option<String>, String> {
        Ok(self
            .records
            .get(swap_id)
            .filter(|r| r.phase() == SwapPhase::SettlementComplete)
            .and_then(|r| r.status.tx_hashes.evm.clone()))
    }
}
