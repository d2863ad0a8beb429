use diesel::prelude::*;

use crate::schema::swaps;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = swaps)]
pub struct SwapRow {
    pub swap_id: String,
    pub order_hash: Vec<u8>,
    pub hash_lock_sha256: Vec<u8>,
    pub hash_lock_keccak256: Vec<u8>,
    pub making_amount: i64,
    pub taking_amount: String,
    pub src_chain_id: Option<i64>,
    pub dst_chain_id: Option<i64>,
    pub htlc_address: Option<String>,
    pub htlc_script_hex: Option<String>,
    pub revealed_secret: Option<String>,
    pub phase: i32,
    pub message: String,
    pub history: String,
    pub degraded: i32,
    pub funding_txid: Option<String>,
    pub claim_txid: Option<String>,
    pub settlement_tx: Option<String>,
    pub refund_txid: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Insert row; also used as the changeset when a swap is rewritten, so
/// every column reflects the latest snapshot.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = swaps, primary_key(swap_id), treat_none_as_null = true)]
pub struct NewSwapRow {
    pub swap_id: String,
    pub order_hash: Vec<u8>,
    pub hash_lock_sha256: Vec<u8>,
    pub hash_lock_keccak256: Vec<u8>,
    pub making_amount: i64,
    pub taking_amount: String,
    pub src_chain_id: Option<i64>,
    pub dst_chain_id: Option<i64>,
    pub htlc_address: Option<String>,
    pub htlc_script_hex: Option<String>,
    pub revealed_secret: Option<String>,
    pub phase: i32,
    pub message: String,
    pub history: String,
    pub degraded: i32,
    pub funding_txid: Option<String>,
    pub claim_txid: Option<String>,
    pub settlement_tx: Option<String>,
    pub refund_txid: Option<String>,
}
