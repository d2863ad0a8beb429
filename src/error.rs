use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Sdk(#[from] btcswap_sdk::Error),

    #[error(transparent)]
    Store(#[from] btcswap_store::StoreError),

    #[error("unknown swap: {0}")]
    UnknownSwap(String),

    #[error("swap {0} is not running")]
    NotRunning(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("state lock failed")]
    Lock,

    #[error("swap task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
