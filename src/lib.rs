pub mod config;
pub mod error;
pub mod journal;
pub mod registry;
pub mod service;

use std::path::Path;
use std::sync::{Arc, Mutex};

use btcswap_sdk::{EscrowCollaborator, Network, SwapConfig};
use btcswap_store::SwapStore;

pub use config::{CONFIG_FILE, ConfigFile, load_config, save_config};
pub use error::{Result, ServiceError};
pub use journal::RegistryJournal;
pub use registry::{STATE_FILE, SwapRegistry, SwapStatusPayload, load_state};
pub use service::{SwapRequest, SwapService};

pub const DB_FILE: &str = "btcswap.db";

// ============================================================================
// Host setup
// ============================================================================

/// Open the host's data directory: load (or write a default) config, open
/// the SQLite journal and a registry that mirrors its state to disk.
///
/// `default_network` is only used on first launch, when no config exists.
pub fn open_service(
    data_dir: &Path,
    default_network: Network,
    escrow: Arc<dyn EscrowCollaborator>,
) -> Result<SwapService<SwapStore>> {
    let config = match load_config(data_dir)? {
        Some(config) => config,
        None => {
            let config = SwapConfig::new(default_network);
            save_config(data_dir, &config)?;
            log::info!(
                "host: first launch, wrote {} for {default_network}",
                CONFIG_FILE
            );
            config
        }
    };

    let db_path = data_dir.join(DB_FILE);
    let db_path = db_path
        .to_str()
        .ok_or_else(|| ServiceError::Config(format!("non-UTF-8 path: {}", db_path.display())))?;
    let store = SwapStore::open(db_path)?;
    let registry = SwapRegistry::persistent(data_dir)?;

    log::info!(
        "host: {} mode on {} with {} endpoint(s)",
        match config.network_mode {
            btcswap_sdk::NetworkMode::Live => "live",
            btcswap_sdk::NetworkMode::Simulated => "simulated",
        },
        config.network,
        config.rpc_endpoints.len()
    );
    SwapService::with_store(config, registry, escrow, Arc::new(Mutex::new(store)))
}
