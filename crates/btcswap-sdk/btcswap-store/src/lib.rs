mod conversions;
mod error;
mod models;
mod schema;
mod store;

pub use error::StoreError;
pub use store::{SwapFilter, SwapInfo, SwapStore, TransitionInfo};

pub type Result<T> = std::result::Result<T, StoreError>;
