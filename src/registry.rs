use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use btcswap_sdk::{SwapOrder, SwapPhase, SwapRecord, SwapStatus, TxHashes};

use crate::error::{Result, ServiceError};

pub const STATE_FILE: &str = "btcswap_state.json";

// ============================================================================
// Status payload (sent to callers)
// ============================================================================

/// Public view of one swap. `secretHex` only appears once the claim
/// transaction has revealed the secret on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapStatusPayload {
    pub swap_id: String,
    pub phase: SwapPhase,
    pub message: String,
    pub tx_hashes: TxHashes,
    pub history: Vec<SwapPhase>,
    pub degraded: bool,
    pub order_hash: String,
    /// SHA-256 hashlock locked into the HTLC script.
    pub secret_hash_hex: String,
    /// Keccak-256 hashlock used by the EVM escrow.
    pub hash_lock_keccak256: String,
    pub making_amount: u64,
    /// Decimal string; u128 does not survive JSON number parsing.
    pub taking_amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub htlc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub htlc_script_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_hex: Option<String>,
    /// Failure message, set only in the `failed` phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================================================
// Registry
// ============================================================================

struct SwapEntry {
    order: SwapOrder,
    record: SwapRecord,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SwapEntry {
    fn payload(&self) -> SwapStatusPayload {
        let r = &self.record;
        SwapStatusPayload {
            swap_id: r.swap_id.clone(),
            phase: r.status.phase,
            message: r.status.message.clone(),
            tx_hashes: r.status.tx_hashes.clone(),
            history: r.status.history.clone(),
            degraded: r.status.degraded,
            order_hash: hex::encode(r.order_hash),
            secret_hash_hex: hex::encode(r.hash_lock_sha256),
            hash_lock_keccak256: hex::encode(r.hash_lock_keccak256),
            making_amount: r.making_amount,
            taking_amount: r.taking_amount.to_string(),
            src_chain_id: r.src_chain_id,
            dst_chain_id: r.dst_chain_id,
            htlc_address: r.htlc_address.clone(),
            htlc_script_hex: r.htlc_script_hex.clone(),
            secret_hex: r.revealed_secret.clone(),
            error: (r.status.phase == SwapPhase::Failed).then(|| r.status.message.clone()),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

/// Swap id → order and latest status. Each entry is written only by the
/// task driving that swap; readers get payload copies.
#[derive(Clone, Default)]
pub struct SwapRegistry {
    entries: Arc<Mutex<HashMap<String, SwapEntry>>>,
    state_file: Option<PathBuf>,
}

impl SwapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that rewrites `btcswap_state.json` in `dir` after every change.
    pub fn persistent(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            entries: Arc::default(),
            state_file: Some(dir.join(STATE_FILE)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, SwapEntry>>> {
        self.entries.lock().map_err(|_| ServiceError::Lock)
    }

    pub fn insert(
        &self,
        swap_id: &str,
        order: SwapOrder,
        htlc_address: Option<String>,
    ) -> Result<SwapStatusPayload> {
        let now = Utc::now();
        let mut record = SwapRecord::new(swap_id, &order, SwapStatus::created());
        record.htlc_address = htlc_address;
        let entry = SwapEntry {
            order,
            record,
            created_at: now,
            updated_at: now,
        };
        let payload = entry.payload();
        let mut entries = self.lock()?;
        entries.insert(swap_id.to_string(), entry);
        self.save(&entries);
        Ok(payload)
    }

    /// Replace the stored record with the orchestrator's latest snapshot.
    pub fn update(&self, record: &SwapRecord) -> Result<()> {
        let mut entries = self.lock()?;
        let entry = entries
            .get_mut(&record.swap_id)
            .ok_or_else(|| ServiceError::UnknownSwap(record.swap_id.clone()))?;
        let htlc_address = entry.record.htlc_address.take();
        entry.record = record.clone();
        if entry.record.htlc_address.is_none() {
            entry.record.htlc_address = htlc_address;
        }
        entry.updated_at = Utc::now();
        self.save(&entries);
        Ok(())
    }

    /// Attach a refund txid and return the updated record.
    pub fn set_refund(&self, swap_id: &str, txid: &str) -> Result<SwapRecord> {
        let mut entries = self.lock()?;
        let entry = entries
            .get_mut(swap_id)
            .ok_or_else(|| ServiceError::UnknownSwap(swap_id.to_string()))?;
        entry.record.status.tx_hashes.refund = Some(txid.to_string());
        entry.updated_at = Utc::now();
        let record = entry.record.clone();
        self.save(&entries);
        Ok(record)
    }

    pub fn order(&self, swap_id: &str) -> Result<SwapOrder> {
        self.lock()?
            .get(swap_id)
            .map(|e| e.order.clone())
            .ok_or_else(|| ServiceError::UnknownSwap(swap_id.to_string()))
    }

    pub fn status(&self, swap_id: &str) -> Result<SwapStatusPayload> {
        self.lock()?
            .get(swap_id)
            .map(SwapEntry::payload)
            .ok_or_else(|| ServiceError::UnknownSwap(swap_id.to_string()))
    }

    pub fn swap_status(&self, swap_id: &str) -> Result<SwapStatus> {
        self.lock()?
            .get(swap_id)
            .map(|e| e.record.status.clone())
            .ok_or_else(|| ServiceError::UnknownSwap(swap_id.to_string()))
    }

    /// All swaps, oldest first.
    pub fn list(&self) -> Result<Vec<SwapStatusPayload>> {
        let entries = self.lock()?;
        let mut list: Vec<&SwapEntry> = entries.values().collect();
        list.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.record.swap_id.cmp(&b.record.swap_id))
        });
        Ok(list.into_iter().map(SwapEntry::payload).collect())
    }

    pub fn settlement_tx(&self, swap_id: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .get(swap_id)
            .filter(|e| e.record.phase() == SwapPhase::SettlementComplete)
            .and_then(|e| e.record.status.tx_hashes.evm.clone()))
    }

    // --- Persistence helpers ---

    fn save(&self, entries: &HashMap<String, SwapEntry>) {
        let Some(path) = &self.state_file else {
            return;
        };
        let mut payloads: Vec<SwapStatusPayload> =
            entries.values().map(SwapEntry::payload).collect();
        payloads.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.swap_id.cmp(&b.swap_id))
        });
        match serde_json::to_string_pretty(&payloads) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    log::warn!("registry: failed to write {}: {e}", path.display());
                }
            }
            Err(e) => log::warn!("registry: failed to serialize state: {e}"),
        }
    }
}

/// Read the payloads last written by a persistent registry in `dir`.
pub fn load_state(dir: &Path) -> Result<Vec<SwapStatusPayload>> {
    let path = dir.join(STATE_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
