use btcswap_sdk::{SwapPhase, SwapRecord, SwapStatus, TxHashes};

use crate::error::StoreError;
use crate::models::{NewSwapRow, SwapRow, TransitionRow};
use crate::store::{SwapInfo, TransitionInfo};

pub fn vec_to_array32(v: &[u8], field: &str) -> std::result::Result<[u8; 32], StoreError> {
    v.try_into().map_err(|_| {
        StoreError::InvalidData(format!("{field}: expected 32 bytes, got {}", v.len()))
    })
}

pub fn phase_to_i32(phase: SwapPhase) -> i32 {
    phase.as_u64() as i32
}

pub fn phase_from_i32(v: i32) -> std::result::Result<SwapPhase, StoreError> {
    u64::try_from(v)
        .ok()
        .and_then(SwapPhase::from_u64)
        .ok_or_else(|| StoreError::InvalidData(format!("invalid swap phase: {v}")))
}

pub fn encode_history(history: &[SwapPhase]) -> String {
    history
        .iter()
        .map(|p| p.as_u64().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn decode_history(s: &str) -> std::result::Result<Vec<SwapPhase>, StoreError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|code| {
            code.parse::<u64>()
                .ok()
                .and_then(SwapPhase::from_u64)
                .ok_or_else(|| StoreError::InvalidData(format!("invalid history entry: {code}")))
        })
        .collect()
}

fn u64_to_i64(v: u64, field: &str) -> std::result::Result<i64, StoreError> {
    i64::try_from(v).map_err(|_| StoreError::InvalidData(format!("{field} out of range: {v}")))
}

fn i64_to_u64(v: i64, field: &str) -> std::result::Result<u64, StoreError> {
    u64::try_from(v).map_err(|_| StoreError::InvalidData(format!("{field} is negative: {v}")))
}

// --- SDK types -> rows ---

pub fn new_swap_row(record: &SwapRecord) -> std::result::Result<NewSwapRow, StoreError> {
    let status = &record.status;
    Ok(NewSwapRow {
        swap_id: record.swap_id.clone(),
        order_hash: record.order_hash.to_vec(),
        hash_lock_sha256: record.hash_lock_sha256.to_vec(),
        hash_lock_keccak256: record.hash_lock_keccak256.to_vec(),
        making_amount: u64_to_i64(record.making_amount, "making_amount")?,
        taking_amount: record.taking_amount.to_string(),
        src_chain_id: record
            .src_chain_id
            .map(|id| u64_to_i64(id, "src_chain_id"))
            .transpose()?,
        dst_chain_id: record
            .dst_chain_id
            .map(|id| u64_to_i64(id, "dst_chain_id"))
            .transpose()?,
        htlc_address: record.htlc_address.clone(),
        htlc_script_hex: record.htlc_script_hex.clone(),
        revealed_secret: record.revealed_secret.clone(),
        phase: phase_to_i32(status.phase),
        message: status.message.clone(),
        history: encode_history(&status.history),
        degraded: i32::from(status.degraded),
        funding_txid: status.tx_hashes.funding.clone(),
        claim_txid: status.tx_hashes.btc.clone(),
        settlement_tx: status.tx_hashes.evm.clone(),
        refund_txid: status.tx_hashes.refund.clone(),
    })
}

// --- Rows -> SDK types ---

impl TryFrom<&SwapRow> for SwapRecord {
    type Error = StoreError;

    fn try_from(row: &SwapRow) -> std::result::Result<Self, Self::Error> {
        let taking_amount = row.taking_amount.parse::<u128>().map_err(|_| {
            StoreError::InvalidData(format!("taking_amount: not a u128: {}", row.taking_amount))
        })?;
        Ok(SwapRecord {
            swap_id: row.swap_id.clone(),
            order_hash: vec_to_array32(&row.order_hash, "order_hash")?,
            hash_lock_sha256: vec_to_array32(&row.hash_lock_sha256, "hash_lock_sha256")?,
            hash_lock_keccak256: vec_to_array32(&row.hash_lock_keccak256, "hash_lock_keccak256")?,
            making_amount: i64_to_u64(row.making_amount, "making_amount")?,
            taking_amount,
            src_chain_id: row
                .src_chain_id
                .map(|id| i64_to_u64(id, "src_chain_id"))
                .transpose()?,
            dst_chain_id: row
                .dst_chain_id
                .map(|id| i64_to_u64(id, "dst_chain_id"))
                .transpose()?,
            htlc_address: row.htlc_address.clone(),
            htlc_script_hex: row.htlc_script_hex.clone(),
            revealed_secret: row.revealed_secret.clone(),
            status: SwapStatus {
                phase: phase_from_i32(row.phase)?,
                message: row.message.clone(),
                tx_hashes: TxHashes {
                    funding: row.funding_txid.clone(),
                    btc: row.claim_txid.clone(),
                    evm: row.settlement_tx.clone(),
                    refund: row.refund_txid.clone(),
                },
                history: decode_history(&row.history)?,
                degraded: row.degraded != 0,
            },
        })
    }
}

impl TryFrom<&SwapRow> for SwapInfo {
    type Error = StoreError;

    fn try_from(row: &SwapRow) -> std::result::Result<Self, Self::Error> {
        Ok(SwapInfo {
            record: SwapRecord::try_from(row)?,
            created_at: row.created_at.clone(),
            updated_at: row.updated_at.clone(),
        })
    }
}

impl TryFrom<&TransitionRow> for TransitionInfo {
    type Error = StoreError;

    fn try_from(row: &TransitionRow) -> std::result::Result<Self, Self::Error> {
        Ok(TransitionInfo {
            id: row.id,
            phase: phase_from_i32(row.phase)?,
            message: row.message.clone(),
            created_at: row.created_at.clone(),
        })
    }
}
