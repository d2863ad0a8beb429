//! Boundary to the EVM escrow contract.
//!
//! The orchestrator only needs three calls. `complete_swap` must be
//! idempotent per swap id: a second call with the same id returns the first
//! settlement's transaction hash and moves no funds.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use sha3::{Digest, Keccak256};

use crate::error::{Error, Result};

pub trait EscrowCollaborator: Send + Sync {
    /// Deposit `amount` into the escrow. Returns the EVM transaction hash.
    fn fund_escrow(&self, amount: u128) -> Result<String>;

    /// Release `amount` of the counter-asset for `swap_id`. Returns the EVM
    /// transaction hash.
    fn complete_swap(&self, amount: u128, swap_id: &str) -> Result<String>;

    fn balance(&self) -> Result<u128>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub amount: u128,
    pub tx_hash: String,
}

#[derive(Default)]
struct Ledger {
    balance: u128,
    released: u128,
    nonce: u64,
    settled: HashMap<String, Settlement>,
}

impl Ledger {
    fn next_hash(&mut self, tag: &[u8], amount: u128) -> String {
        self.nonce += 1;
        let mut hasher = Keccak256::new();
        hasher.update(tag);
        hasher.update(amount.to_be_bytes());
        hasher.update(self.nonce.to_be_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }
}

/// Escrow ledger kept in memory, for simulated swaps and tests.
#[derive(Default)]
pub struct InMemoryEscrow {
    ledger: Mutex<Ledger>,
}

impl InMemoryEscrow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(balance: u128) -> Self {
        let escrow = Self::default();
        if let Ok(mut ledger) = escrow.ledger.lock() {
            ledger.balance = balance;
        }
        escrow
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>> {
        self.ledger
            .lock()
            .map_err(|_| Error::Settlement("escrow ledger poisoned".into()))
    }

    pub fn settlement(&self, swap_id: &str) -> Option<Settlement> {
        self.lock().ok()?.settled.get(swap_id).cloned()
    }

    /// Total released across all swaps.
    pub fn released(&self) -> u128 {
        self.lock().map(|l| l.released).unwrap_or_default()
    }
}

impl EscrowCollaborator for InMemoryEscrow {
    fn fund_escrow(&self, amount: u128) -> Result<String> {
        let mut ledger = self.lock()?;
        ledger.balance = ledger
            .balance
            .checked_add(amount)
            .ok_or_else(|| Error::Settlement("escrow balance overflow".into()))?;
        Ok(ledger.next_hash(b"fund", amount))
    }

    fn complete_swap(&self, amount: u128, swap_id: &str) -> Result<String> {
        let mut ledger = self.lock()?;
        if let Some(existing) = ledger.settled.get(swap_id) {
            if existing.amount != amount {
                return Err(Error::Settlement(format!(
                    "{swap_id} already settled for {} units",
                    existing.amount
                )));
            }
            log::info!("escrow: {swap_id} already settled, returning {}", existing.tx_hash);
            return Ok(existing.tx_hash.clone());
        }
        if ledger.balance < amount {
            return Err(Error::Settlement(format!(
                "escrow holds {} units, {amount} requested",
                ledger.balance
            )));
        }
        ledger.balance -= amount;
        ledger.released += amount;
        let tx_hash = ledger.next_hash(swap_id.as_bytes(), amount);
        ledger.settled.insert(
            swap_id.to_string(),
            Settlement {
                amount,
                tx_hash: tx_hash.clone(),
            },
        );
        log::info!("escrow: released {amount} units for {swap_id} ({tx_hash})");
        Ok(tx_hash)
    }

    fn balance(&self) -> Result<u128> {
        Ok(self.lock()?.balance)
    }
}
