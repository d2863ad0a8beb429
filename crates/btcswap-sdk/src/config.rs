use std::time::Duration;

use bitcoin::Address;
use serde::{Deserialize, Serialize};

use crate::address::parse_address;
use crate::error::{Error, Result};
use crate::network::Network;

/// Whether swaps talk to real endpoints or to the in-process simulation
/// client. Fixed when the configuration is built; never flipped mid-flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Live,
    Simulated,
}

/// Configuration for one swap engine instance. Injected into every
/// orchestrator; there is no process-wide default account or client.
#[derive(Debug, Clone)]
pub struct SwapConfig {
    pub network: Network,
    /// Ordered endpoint list. `http(s)://` is Esplora, `tcp://`/`ssl://` is Electrum.
    pub rpc_endpoints: Vec<String>,
    pub network_mode: NetworkMode,
    /// In live mode, hand out the simulation client once every endpoint has
    /// failed its probe instead of failing the swap (default: false).
    pub simulation_fallback: bool,
    /// Flat fee paid by the funding transaction (default: 10 000 sats).
    pub funding_fee_sats: u64,
    /// Flat fee paid by claim and refund transactions (default: 1 000 sats).
    pub spend_fee_sats: u64,
    /// Interval between funding detection polls (default: 30s).
    pub poll_interval: Duration,
    /// Automatic detection attempts before manual mode (default: 20).
    pub max_attempts: u32,
    /// Ceiling on the manual confirmation wait (default: 5 min).
    pub manual_wait_timeout: Duration,
    /// Ceiling on waiting for the funding transaction to confirm (default: 5 min).
    pub confirmation_timeout: Duration,
    /// Interval between confirmation status checks (default: 10s).
    pub confirmation_poll_interval: Duration,
    /// Pause between endpoint probes during failover (default: 1s).
    pub probe_backoff: Duration,
    /// Per-request timeout for Esplora and Electrum endpoints (default: 15s).
    pub request_timeout: Duration,
    /// Override for the health-probe address; defaults to the network's.
    pub probe_address: Option<String>,
    /// Value of each UTXO the simulation client invents (default: 100 000 sats).
    pub simulated_utxo_sats: u64,
}

impl SwapConfig {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            rpc_endpoints: network.default_endpoints(),
            network_mode: NetworkMode::Live,
            simulation_fallback: false,
            funding_fee_sats: 10_000,
            spend_fee_sats: 1_000,
            poll_interval: Duration::from_secs(30),
            max_attempts: 20,
            manual_wait_timeout: Duration::from_secs(300),
            confirmation_timeout: Duration::from_secs(300),
            confirmation_poll_interval: Duration::from_secs(10),
            probe_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(15),
            probe_address: None,
            simulated_utxo_sats: 100_000,
        }
    }

    /// Same defaults, but every swap runs against the simulation client.
    pub fn simulated(network: Network) -> Self {
        Self {
            network_mode: NetworkMode::Simulated,
            ..Self::new(network)
        }
    }

    /// Deadline for the automatic detection phase: the nominal poll
    /// schedule plus one request timeout for the poll in flight.
    pub fn detection_ceiling(&self) -> Duration {
        self.poll_interval * self.max_attempts + self.request_timeout
    }

    /// Resolve the probe address for this network.
    pub fn probe_address(&self) -> Result<Address> {
        match self.probe_address {
            Some(ref s) => parse_address(s, self.network),
            None => Ok(self.network.probe_address()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.network_mode == NetworkMode::Live && self.rpc_endpoints.is_empty() {
            return Err(Error::Config(
                "live mode requires at least one RPC endpoint".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if self.confirmation_poll_interval.is_zero() {
            return Err(Error::Config(
                "confirmation_poll_interval must be non-zero".into(),
            ));
        }
        self.probe_address()?;
        Ok(())
    }
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self::new(Network::Testnet)
    }
}
