use serde::{Deserialize, Serialize};

/// Phases of a single swap, in the order the orchestrator drives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u64)]
pub enum SwapPhase {
    /// Order and HTLC exist; nothing has touched the network.
    Created = 0,
    /// Funding transaction broadcast (or an external funding output seen).
    HtlcFunded = 1,
    /// Funding detected, confirmed and verified against the redeem script.
    FundingConfirmed = 2,
    /// Claim transaction broadcast; the secret is now public.
    CounterpartyClaimed = 3,
    /// The EVM collaborator released the counter-asset.
    SettlementComplete = 4,
    Failed = 5,
}

impl SwapPhase {
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::Created),
            1 => Some(Self::HtlcFunded),
            2 => Some(Self::FundingConfirmed),
            3 => Some(Self::CounterpartyClaimed),
            4 => Some(Self::SettlementComplete),
            5 => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_u64(self) -> u64 {
        self as u64
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SettlementComplete | Self::Failed)
    }

    /// Forward-only transitions; `Failed` is reachable from any non-terminal phase.
    pub fn can_transition_to(self, next: SwapPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        matches!(
            (self, next),
            (Self::Created, Self::HtlcFunded)
                | (Self::HtlcFunded, Self::FundingConfirmed)
                | (Self::FundingConfirmed, Self::CounterpartyClaimed)
                | (Self::CounterpartyClaimed, Self::SettlementComplete)
        )
    }

    /// True once the claim transaction has revealed the secret on-chain.
    pub fn secret_revealed(self) -> bool {
        matches!(self, Self::CounterpartyClaimed | Self::SettlementComplete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::HtlcFunded => "htlc-funded",
            Self::FundingConfirmed => "funding-confirmed",
            Self::CounterpartyClaimed => "counterparty-claimed",
            Self::SettlementComplete => "settlement-complete",
            Self::Failed => "failed",
        }
    }
}

/// Transaction hashes recorded as the swap progresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxHashes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding: Option<String>,
    /// Claim transaction id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btc: Option<String>,
    /// Settlement transaction hash on the EVM chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapStatus {
    pub phase: SwapPhase,
    pub message: String,
    pub tx_hashes: TxHashes,
    /// Every phase entered, in order, starting with `Created`.
    pub history: Vec<SwapPhase>,
    /// Set when the swap ran against the simulation client or relied on a
    /// manually asserted funding record.
    #[serde(default)]
    pub degraded: bool,
}

impl SwapStatus {
    pub fn created() -> Self {
        Self {
            phase: SwapPhase::Created,
            message: "order created".to_string(),
            tx_hashes: TxHashes::default(),
            history: vec![SwapPhase::Created],
            degraded: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == SwapPhase::SettlementComplete
    }

    pub fn is_failed(&self) -> bool {
        self.phase == SwapPhase::Failed
    }
}
