use thiserror::Error;

use crate::state::SwapPhase;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid timelock: {0}")]
    InvalidTimelock(String),

    #[error("invalid HTLC script: {0}")]
    InvalidScript(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("insufficient funds: need {needed} sats, selected {available} sats")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("output value below dust after fee: {0}")]
    Dust(String),

    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    #[error("secret does not match the HTLC hashlock")]
    SecretMismatch,

    #[error("signing key does not match HTLC script: {0}")]
    KeyMismatch(String),

    #[error("transaction construction error: {0}")]
    Transaction(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("HTLC spend evaluation failed: {0}")]
    Evaluation(String),

    #[error("refund timelock has not elapsed: {0}")]
    TimelockNotElapsed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("electrum error: {0}")]
    Electrum(String),

    #[error("esplora error: {0}")]
    Esplora(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("broadcast error: {0}")]
    Broadcast(String),

    #[error("all {0} RPC endpoints failed and simulation fallback is disabled")]
    EndpointsExhausted(usize),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("on-chain output does not match the HTLC script: {0}")]
    ScriptMismatch(String),

    #[error("HTLC output {outpoint} holds {actual} sats, order requires {expected}")]
    Underfunded {
        outpoint: String,
        expected: u64,
        actual: u64,
    },

    #[error("HTLC funding not detected: {0}")]
    NotFunded(String),

    #[error("settlement failed: {0}")]
    Settlement(String),

    #[error("invalid phase transition {from:?} -> {to:?}")]
    InvalidTransition { from: SwapPhase, to: SwapPhase },

    #[error("journal error: {0}")]
    Journal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("task join error: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by the orchestrator and by callers deciding
/// whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed address, key, timelock or insufficient funds. Fails fast.
    Input,
    /// Upstream node or indexer unreachable or returned garbage.
    Network,
    /// A confirmation, detection or manual-wait deadline passed.
    Timeout,
    /// The funded output does not pay the expected redeem script or amount.
    ScriptMismatch,
    /// The EVM escrow collaborator failed.
    Settlement,
    /// Cooperative cancellation was observed.
    Cancelled,
    /// Anything else (task joins, journal writes, invalid transitions).
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAddress(_)
            | Error::InvalidKey(_)
            | Error::InvalidTimelock(_)
            | Error::InvalidScript(_)
            | Error::Config(_)
            | Error::InsufficientFunds { .. }
            | Error::Dust(_)
            | Error::InvalidSecret(_)
            | Error::SecretMismatch
            | Error::KeyMismatch(_)
            | Error::Transaction(_)
            | Error::Signer(_)
            | Error::Evaluation(_)
            | Error::TimelockNotElapsed(_) => ErrorKind::Input,
            Error::Transport(_)
            | Error::Electrum(_)
            | Error::Esplora(_)
            | Error::Query(_)
            | Error::Broadcast(_)
            | Error::EndpointsExhausted(_)
            | Error::NotFunded(_) => ErrorKind::Network,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::ScriptMismatch(_) | Error::Underfunded { .. } => ErrorKind::ScriptMismatch,
            Error::Settlement(_) => ErrorKind::Settlement,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::InvalidTransition { .. } | Error::Journal(_) | Error::Task(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// True for failures where the endpoint itself is unhealthy (timeouts,
    /// refused connections, 5xx). The funding detector stops polling on these.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<electrum_client::Error> for Error {
    fn from(e: electrum_client::Error) -> Self {
        match e {
            electrum_client::Error::IOError(_)
            | electrum_client::Error::SharedIOError(_)
            | electrum_client::Error::AllAttemptsErrored(_) => Error::Transport(e.to_string()),
            other => Error::Electrum(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let server_side = e.status().is_some_and(|s| s.is_server_error());
        if e.is_timeout() || e.is_connect() || e.is_request() || server_side {
            Error::Transport(e.to_string())
        } else {
            Error::Esplora(e.to_string())
        }
    }
}
