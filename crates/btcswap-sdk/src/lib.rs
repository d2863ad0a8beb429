pub use bitcoin;

pub mod address;
pub mod cancel;
pub mod chain;
pub mod client;
pub mod config;
pub mod detector;
pub mod error;
pub mod escrow;
pub mod failover;
pub mod htlc;
pub mod interpreter;
pub mod journal;
pub mod keys;
pub mod leg;
pub mod network;
pub mod orchestrator;
pub mod order;
pub mod simulation;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tx;

// Core types
pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use config::{NetworkMode, SwapConfig};
pub use error::{Error, ErrorKind, Result};
pub use network::Network;
pub use order::{HashLock, Secret, SwapOrder, generate_swap_id};
pub use state::{SwapPhase, SwapStatus, TxHashes};

// Scripts and addresses
pub use address::{derive_address, expected_script_pubkey, parse_address, verify_on_chain_output};
pub use htlc::{HtlcKind, HtlcParams, HtlcScript, SpendTiming, TimelockKind, relative_sequence};

// Transactions
pub use interpreter::{SpendPath, verify_htlc_input};
pub use keys::WalletKey;
pub use tx::{
    BuiltTransaction, ClaimParams, DUST_LIMIT_SATS, FundingParams, RefundParams, build_claim_tx,
    build_funding_tx, build_refund_tx, extract_secret, select_coins,
};

// Chain access
pub use chain::{
    ChainBackend, ChainTip, Confirmation, ElectrumBackend, EsploraBackend, TxStatus, Utxo,
    backend_for_endpoint,
};
pub use client::BitcoinClient;
pub use failover::{BackendFactory, RpcFailoverProvider, default_backend_factory};
pub use simulation::SimulatedBackend;

// Detection and orchestration
pub use detector::{
    DetectorConfig, DetectorState, FundingDetection, FundingDetector, FundingMethod,
    ManualConfirmation,
};
pub use escrow::{EscrowCollaborator, InMemoryEscrow, Settlement};
pub use journal::{MemoryJournal, NoopJournal, SwapJournal, SwapRecord};
pub use leg::{FundingSource, LegDescriptor, LegRole, ScriptVariant, SwapKeys, Timelocks};
pub use orchestrator::SwapOrchestrator;
