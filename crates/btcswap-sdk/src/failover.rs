//! `RpcFailoverProvider`: resolves a working chain client from an ordered
//! endpoint list.
//!
//! Endpoints are probed in rotation with a cheap UTXO lookup. The first one
//! that answers is handed out as a [`BitcoinClient`]. What happens when every
//! endpoint fails is fixed at construction: either a hard
//! [`Error::EndpointsExhausted`] or the simulation client.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bitcoin::Address;

use crate::cancel::CancelToken;
use crate::chain::{ChainBackend, backend_for_endpoint};
use crate::client::BitcoinClient;
use crate::config::{NetworkMode, SwapConfig};
use crate::error::{Error, Result};
use crate::simulation::SimulatedBackend;

/// Builds a backend for one endpoint URL.
pub type BackendFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn ChainBackend>> + Send + Sync>;

/// Factory selecting Electrum or Esplora from the URL scheme.
pub fn default_backend_factory(request_timeout: Duration) -> BackendFactory {
    Arc::new(move |endpoint: &str| -> Result<Arc<dyn ChainBackend>> {
        let backend: Arc<dyn ChainBackend> =
            Arc::from(backend_for_endpoint(endpoint, request_timeout)?);
        Ok(backend)
    })
}

pub struct RpcFailoverProvider {
    endpoints: Arc<[String]>,
    cursor: AtomicUsize,
    factory: BackendFactory,
    mode: NetworkMode,
    simulation_fallback: bool,
    probe_address: Address,
    probe_backoff: Duration,
    simulated_utxo_sats: u64,
}

impl RpcFailoverProvider {
    pub fn new(config: &SwapConfig) -> Result<Self> {
        Self::with_factory(config, default_backend_factory(config.request_timeout))
    }

    pub fn with_factory(config: &SwapConfig, factory: BackendFactory) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            endpoints: config.rpc_endpoints.clone().into(),
            cursor: AtomicUsize::new(0),
            factory,
            mode: config.network_mode,
            simulation_fallback: config.simulation_fallback,
            probe_address: config.probe_address()?,
            probe_backoff: config.probe_backoff,
            simulated_utxo_sats: config.simulated_utxo_sats,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// The endpoint the cursor points at, `None` if the list is empty.
    pub fn current_endpoint(&self) -> Option<&str> {
        if self.endpoints.is_empty() {
            return None;
        }
        let idx = self.cursor.load(Ordering::SeqCst) % self.endpoints.len();
        Some(&self.endpoints[idx])
    }

    /// Advance the cursor and return the new current endpoint.
    pub fn rotate_endpoint(&self) -> Option<&str> {
        if self.endpoints.is_empty() {
            return None;
        }
        let len = self.endpoints.len();
        let _ = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some((c + 1) % len));
        self.current_endpoint()
    }

    fn simulation_client(&self) -> BitcoinClient {
        BitcoinClient::simulated(Arc::new(SimulatedBackend::new(self.simulated_utxo_sats)))
    }

    /// Probe endpoints starting at the cursor until one answers.
    ///
    /// Each endpoint is tried at most once per call. On success the cursor
    /// stays on the working endpoint.
    pub async fn get_working_provider(&self, cancel: &CancelToken) -> Result<BitcoinClient> {
        if self.mode == NetworkMode::Simulated {
            return Ok(self.simulation_client());
        }

        for attempt in 0..self.endpoints.len() {
            cancel.check()?;
            let Some(endpoint) = self.current_endpoint().map(str::to_string) else {
                break;
            };

            match self.probe(&endpoint).await {
                Ok(client) => {
                    log::info!("failover: using endpoint {endpoint}");
                    return Ok(client);
                }
                Err(e) => {
                    log::warn!("failover: endpoint {endpoint} failed probe ({e})");
                    self.rotate_endpoint();
                }
            }

            if attempt + 1 < self.endpoints.len() && !self.probe_backoff.is_zero() {
                cancel.sleep(self.probe_backoff).await?;
            }
        }

        if self.simulation_fallback {
            log::warn!(
                "failover: all {} endpoints failed, falling back to simulation",
                self.endpoints.len()
            );
            return Ok(self.simulation_client());
        }
        Err(Error::EndpointsExhausted(self.endpoints.len()))
    }

    async fn probe(&self, endpoint: &str) -> Result<BitcoinClient> {
        let backend = (self.factory)(endpoint)?;
        let client = BitcoinClient::new(backend, endpoint);
        client.get_utxos(&self.probe_address).await?;
        Ok(client)
    }
}
