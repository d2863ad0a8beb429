use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use btcswap_sdk::bitcoin::ScriptBuf;
use btcswap_sdk::{HtlcScript, SwapJournal, SwapPhase, SwapRecord};

use crate::conversions::{new_swap_row, phase_to_i32};
use crate::error::StoreError;
use crate::models::{NewTransitionRow, SwapRow, TransitionRow};
use crate::schema::{swap_transitions, swaps};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// SQL expression for SQLite's `datetime('now')`.
const DATETIME_NOW: &str = "datetime('now')";

// --- Public types ---

/// A stored swap with its bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct SwapInfo {
    pub record: SwapRecord,
    pub created_at: String,
    pub updated_at: String,
}

/// One row of a swap's transition log.
#[derive(Debug, Clone)]
pub struct TransitionInfo {
    pub id: i32,
    pub phase: SwapPhase,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct SwapFilter {
    pub phase: Option<SwapPhase>,
    /// Only swaps that are not yet `SettlementComplete` or `Failed`.
    pub unfinished: bool,
    pub limit: Option<i64>,
}

// --- SwapStore ---

/// SQLite journal of swap orders and their phase transitions.
///
/// All methods take `&mut self` because Diesel's `SqliteConnection` requires
/// `&mut` for all operations, including reads.
pub struct SwapStore {
    conn: SqliteConnection,
}

impl SwapStore {
    /// Open (or create) a store at the given file path. Runs migrations automatically.
    pub fn open(path: &str) -> crate::Result<Self> {
        let mut conn = SqliteConnection::establish(path)?;
        diesel::sql_query("PRAGMA foreign_keys = ON").execute(&mut conn)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(SwapStore { conn })
    }

    /// Open an in-memory store for tests.
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::open(":memory:")
    }

    // ==================== Writes ====================

    /// Write the latest snapshot of a swap. A phase change also appends a
    /// row to the transition log. Returns true when the phase changed.
    pub fn upsert_swap(&mut self, record: &SwapRecord) -> crate::Result<bool> {
        let row = new_swap_row(record)?;
        let phase = row.phase;

        self.conn.transaction::<_, StoreError, _>(|conn| {
            let previous: Option<i32> = swaps::table
                .filter(swaps::swap_id.eq(&row.swap_id))
                .select(swaps::phase)
                .first(conn)
                .optional()?;

            match previous {
                Some(_) => {
                    diesel::update(swaps::table.filter(swaps::swap_id.eq(&row.swap_id)))
                        .set((
                            &row,
                            swaps::updated_at
                                .eq(diesel::dsl::sql::<diesel::sql_types::Text>(DATETIME_NOW)),
                        ))
                        .execute(conn)?;
                }
                None => {
                    diesel::insert_into(swaps::table)
                        .values(&row)
                        .execute(conn)?;
                }
            }

            let changed = previous != Some(phase);
            if changed {
                diesel::insert_into(swap_transitions::table)
                    .values(&NewTransitionRow {
                        swap_id: row.swap_id.clone(),
                        phase,
                        message: row.message.clone(),
                    })
                    .execute(conn)?;
                log::debug!("store: {} -> phase {phase}", row.swap_id);
            }
            Ok(changed)
        })
    }

    // ==================== Queries ====================

    pub fn get_swap(&mut self, swap_id: &str) -> crate::Result<Option<SwapInfo>> {
        let row: Option<SwapRow> = swaps::table
            .filter(swaps::swap_id.eq(swap_id))
            .first(&mut self.conn)
            .optional()?;

        row.as_ref().map(SwapInfo::try_from).transpose()
    }

    pub fn list_swaps(&mut self, filter: &SwapFilter) -> crate::Result<Vec<SwapInfo>> {
        let mut query = swaps::table.into_boxed();

        if let Some(phase) = filter.phase {
            query = query.filter(swaps::phase.eq(phase_to_i32(phase)));
        }
        if filter.unfinished {
            query = query.filter(swaps::phase.ne_all([
                phase_to_i32(SwapPhase::SettlementComplete),
                phase_to_i32(SwapPhase::Failed),
            ]));
        }
        if let Some(lim) = filter.limit {
            query = query.limit(lim);
        }

        let rows: Vec<SwapRow> = query
            .order((swaps::created_at.asc(), swaps::swap_id.asc()))
            .load(&mut self.conn)?;
        rows.iter().map(SwapInfo::try_from).collect()
    }

    /// Transition log of a swap, oldest first.
    pub fn transitions(&mut self, swap_id: &str) -> crate::Result<Vec<TransitionInfo>> {
        let rows: Vec<TransitionRow> = swap_transitions::table
            .filter(swap_transitions::swap_id.eq(swap_id))
            .order(swap_transitions::id.asc())
            .load(&mut self.conn)?;

        rows.iter().map(TransitionInfo::try_from).collect()
    }

    /// EVM transaction hash of a completed settlement, if any.
    pub fn settlement_for(&mut self, swap_id: &str) -> crate::Result<Option<String>> {
        let tx: Option<Option<String>> = swaps::table
            .filter(
                swaps::swap_id
                    .eq(swap_id)
                    .and(swaps::phase.eq(phase_to_i32(SwapPhase::SettlementComplete))),
            )
            .select(swaps::settlement_tx)
            .first(&mut self.conn)
            .optional()?;

        Ok(tx.flatten())
    }

    /// Rebuild the HTLC of a stored swap from its redeem script, e.g. to
    /// refund after a restart.
    pub fn htlc_script(&mut self, swap_id: &str) -> crate::Result<Option<HtlcScript>> {
        let hex: Option<Option<String>> = swaps::table
            .filter(swaps::swap_id.eq(swap_id))
            .select(swaps::htlc_script_hex)
            .first(&mut self.conn)
            .optional()?;

        let Some(hex) = hex.flatten() else {
            return Ok(None);
        };
        let script = ScriptBuf::from_hex(&hex)
            .map_err(|e| StoreError::InvalidData(format!("htlc_script_hex: {e}")))?;
        Ok(Some(HtlcScript::parse(&script)?))
    }

    /// Record that the HTLC output was refunded.
    pub fn set_refund_txid(&mut self, swap_id: &str, txid: &str) -> crate::Result<()> {
        let updated = diesel::update(swaps::table.filter(swaps::swap_id.eq(swap_id)))
            .set((
                swaps::refund_txid.eq(txid),
                swaps::updated_at.eq(diesel::dsl::sql::<diesel::sql_types::Text>(DATETIME_NOW)),
            ))
            .execute(&mut self.conn)?;
        if updated == 0 {
            return Err(StoreError::InvalidData(format!("unknown swap: {swap_id}")));
        }
        Ok(())
    }
}

// --- SwapJournal ---

impl SwapJournal for SwapStore {
    fn record(&mut self, record: &SwapRecord) -> Result<(), String> {
        self.upsert_swap(record).map(|_| ()).map_err(|e| e.to_string())
    }

    fn settlement_tx(&mut self, swap_id: &str) -> Result<Option<String>, String> {
        self.settlement_for(swap_id).map_err(|e| e.to_string())
    }
}
