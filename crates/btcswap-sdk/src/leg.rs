//! Leg descriptors: what differs between swap directions.
//!
//! A BTC→EVM swap locks BTC in a source-leg script the local party funds; an
//! EVM→BTC swap waits for the counterparty to fund a destination-leg script.
//! Both are driven by the same orchestrator with a different descriptor.

use bitcoin::{Address, PublicKey};

use crate::address;
use crate::chain::Utxo;
use crate::error::{Error, Result};
use crate::htlc::{HtlcKind, HtlcParams};
use crate::keys::WalletKey;
use crate::order::SwapOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegRole {
    Source,
    Destination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptVariant {
    Generic,
    /// Only a key hashing to this address's key hash may claim, and the
    /// claim pays this address.
    RecipientPinned { recipient: Address },
    Destination,
}

/// Withdrawal and cancellation delays in the unit the variant uses: seconds
/// for relative scripts, raw `nLockTime` for destination scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timelocks {
    pub withdrawal: u32,
    pub cancellation: u32,
    pub lock_till_withdrawal: bool,
}

impl Timelocks {
    /// One hour (7 × 512 s) until refund, claim open immediately.
    pub fn relative_default() -> Self {
        Self {
            withdrawal: 0,
            cancellation: 3_584,
            lock_till_withdrawal: false,
        }
    }

    pub fn absolute(cancellation_lock_time: u32) -> Self {
        Self {
            withdrawal: 0,
            cancellation: cancellation_lock_time,
            lock_till_withdrawal: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FundingSource {
    /// We build and broadcast the funding transaction from `payer`'s outputs.
    /// `utxos: None` looks them up through the chain client.
    SelfFunded {
        payer: WalletKey,
        utxos: Option<Vec<Utxo>>,
    },
    /// The counterparty funds the HTLC; we only detect it.
    External,
}

#[derive(Debug, Clone)]
pub struct LegDescriptor {
    pub role: LegRole,
    pub variant: ScriptVariant,
    pub timelocks: Timelocks,
    pub funding: FundingSource,
    /// Call the EVM collaborator once the claim is out.
    pub settle_counter_asset: bool,
}

impl LegDescriptor {
    /// BTC→EVM: generic relative-timelock script funded by `payer`.
    pub fn source(payer: WalletKey) -> Self {
        Self {
            role: LegRole::Source,
            variant: ScriptVariant::Generic,
            timelocks: Timelocks::relative_default(),
            funding: FundingSource::SelfFunded {
                payer,
                utxos: None,
            },
            settle_counter_asset: true,
        }
    }

    /// EVM→BTC: absolute-timelock script funded by the counterparty.
    pub fn destination(cancellation_lock_time: u32) -> Self {
        Self {
            role: LegRole::Destination,
            variant: ScriptVariant::Destination,
            timelocks: Timelocks::absolute(cancellation_lock_time),
            funding: FundingSource::External,
            settle_counter_asset: true,
        }
    }

    pub fn with_variant(mut self, variant: ScriptVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_timelocks(mut self, timelocks: Timelocks) -> Self {
        self.timelocks = timelocks;
        self
    }

    pub fn with_funding(mut self, funding: FundingSource) -> Self {
        self.funding = funding;
        self
    }

    pub fn without_settlement(mut self) -> Self {
        self.settle_counter_asset = false;
        self
    }

    pub(crate) fn htlc_params(&self, order: &SwapOrder, keys: &SwapKeys) -> Result<HtlcParams> {
        let claim_pubkey = keys.claimer.public_key();
        let kind = match &self.variant {
            ScriptVariant::Generic => HtlcKind::Generic { claim_pubkey },
            ScriptVariant::RecipientPinned { recipient } => HtlcKind::RecipientPinned {
                recipient: address::pubkey_hash_of(recipient)?,
            },
            ScriptVariant::Destination => HtlcKind::Destination { claim_pubkey },
        };
        Ok(HtlcParams {
            order_hash: order.order_hash,
            hash_lock: order.hash_lock.sha256,
            withdrawal_delay: self.timelocks.withdrawal,
            cancellation_delay: self.timelocks.cancellation,
            lock_till_withdrawal: self.timelocks.lock_till_withdrawal,
            refund_pubkey: keys.refund_pubkey,
            kind,
        })
    }

    /// Where the claim pays.
    pub(crate) fn claim_destination(&self, keys: &SwapKeys) -> Address {
        match &self.variant {
            ScriptVariant::RecipientPinned { recipient } => recipient.clone(),
            _ => keys.claimer.address(),
        }
    }
}

/// Keys a swap signs with.
#[derive(Debug, Clone)]
pub struct SwapKeys {
    pub claimer: WalletKey,
    pub refund_pubkey: PublicKey,
    /// Private half of `refund_pubkey`, when we hold it.
    pub refunder: Option<WalletKey>,
}

impl SwapKeys {
    pub fn new(claimer: WalletKey, refund_pubkey: PublicKey) -> Self {
        Self {
            claimer,
            refund_pubkey,
            refunder: None,
        }
    }

    /// Keys where we hold both halves: claim with `claimer`, refund with `refunder`.
    pub fn with_refunder(claimer: WalletKey, refunder: WalletKey) -> Self {
        Self {
            claimer,
            refund_pubkey: refunder.public_key(),
            refunder: Some(refunder),
        }
    }

    pub(crate) fn refunder(&self) -> Result<&WalletKey> {
        self.refunder
            .as_ref()
            .ok_or_else(|| Error::KeyMismatch("no private key for the refund branch".into()))
    }
}
