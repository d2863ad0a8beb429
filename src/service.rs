//! `SwapService`: creates swaps and runs each one on its own tokio task.
//!
//! The service owns the registry, the shared endpoint provider and the
//! per-swap control handles (manual confirmation, cancellation, join).
//! A swap's handles are dropped once it settles; failed swaps keep theirs,
//! since a refund needs the swap's keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;

use btcswap_sdk::bitcoin::Txid;
use btcswap_sdk::{
    CancelHandle, EscrowCollaborator, LegDescriptor, NoopJournal, RpcFailoverProvider, SwapConfig,
    SwapJournal, SwapKeys, SwapOrchestrator, SwapOrder, SwapStatus, Utxo, cancel_pair,
    generate_swap_id, parse_address,
};

use crate::error::{Result, ServiceError};
use crate::journal::RegistryJournal;
use crate::registry::{SwapRegistry, SwapStatusPayload};

/// Everything needed to start one swap.
pub struct SwapRequest {
    pub making_amount: u64,
    pub taking_amount: u128,
    pub src_chain_id: Option<u64>,
    pub dst_chain_id: Option<u64>,
    pub leg: LegDescriptor,
    pub keys: SwapKeys,
}

struct RunningSwap<S: SwapJournal> {
    orchestrator: Arc<SwapOrchestrator<RegistryJournal<S>>>,
    cancel: CancelHandle,
    task: Option<JoinHandle<SwapStatus>>,
}

pub struct SwapService<S: SwapJournal = NoopJournal> {
    config: SwapConfig,
    registry: SwapRegistry,
    escrow: Arc<dyn EscrowCollaborator>,
    provider: Arc<RpcFailoverProvider>,
    store: Option<Arc<Mutex<S>>>,
    swaps: Arc<Mutex<HashMap<String, RunningSwap<S>>>>,
}

impl SwapService<NoopJournal> {
    pub fn new(
        config: SwapConfig,
        registry: SwapRegistry,
        escrow: Arc<dyn EscrowCollaborator>,
    ) -> Result<Self> {
        Self::build(config, registry, escrow, None)
    }
}

impl<S: SwapJournal> SwapService<S> {
    /// Service that also writes every snapshot to `store`.
    pub fn with_store(
        config: SwapConfig,
        registry: SwapRegistry,
        escrow: Arc<dyn EscrowCollaborator>,
        store: Arc<Mutex<S>>,
    ) -> Result<Self> {
        Self::build(config, registry, escrow, Some(store))
    }

    fn build(
        config: SwapConfig,
        registry: SwapRegistry,
        escrow: Arc<dyn EscrowCollaborator>,
        store: Option<Arc<Mutex<S>>>,
    ) -> Result<Self> {
        let provider = Arc::new(RpcFailoverProvider::new(&config)?);
        Ok(Self {
            config,
            registry,
            escrow,
            provider,
            store,
            swaps: Arc::default(),
        })
    }

    /// Share one endpoint provider across every swap this service runs.
    pub fn with_provider(mut self, provider: Arc<RpcFailoverProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn registry(&self) -> &SwapRegistry {
        &self.registry
    }

    fn swaps(&self) -> Result<MutexGuard<'_, HashMap<String, RunningSwap<S>>>> {
        self.swaps.lock().map_err(|_| ServiceError::Lock)
    }

    fn orchestrator(&self, swap_id: &str) -> Result<Arc<SwapOrchestrator<RegistryJournal<S>>>> {
        self.swaps()?
            .get(swap_id)
            .map(|s| s.orchestrator.clone())
            .ok_or_else(|| ServiceError::NotRunning(swap_id.to_string()))
    }

    // ==================== Lifecycle ====================

    /// Create an order, register it and spawn the task driving it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_swap(&self, request: SwapRequest) -> Result<SwapStatusPayload> {
        let swap_id = generate_swap_id();
        let order = SwapOrder::create(request.making_amount, request.taking_amount)
            .with_chain_ids(request.src_chain_id, request.dst_chain_id);

        let journal = RegistryJournal::new(self.registry.clone(), self.store.clone());
        let (cancel, token) = cancel_pair();
        let orchestrator = SwapOrchestrator::with_journal(
            self.config.clone(),
            request.leg,
            request.keys,
            self.escrow.clone(),
            Arc::new(Mutex::new(journal)),
        )?
        .with_provider(self.provider.clone())
        .with_cancel(token);
        let htlc_address = orchestrator.htlc_address(&order)?;
        let orchestrator = Arc::new(orchestrator);

        let payload =
            self.registry
                .insert(&swap_id, order.clone(), Some(htlc_address.to_string()))?;
        log::info!("service: created {swap_id}, fund {htlc_address}");

        // Registered before spawning so a fast task always finds its entry.
        self.swaps()?.insert(
            swap_id.clone(),
            RunningSwap {
                orchestrator: orchestrator.clone(),
                cancel,
                task: None,
            },
        );
        let task = {
            let swaps = self.swaps.clone();
            let swap_id = swap_id.clone();
            tokio::spawn(async move {
                let status = orchestrator.execute_swap(&swap_id, &order).await;
                if status.is_complete() {
                    match swaps.lock() {
                        Ok(mut swaps) => {
                            swaps.remove(&swap_id);
                            log::debug!("service: {swap_id} settled, handles released");
                        }
                        Err(_) => log::warn!("service: swap map poisoned, {swap_id} kept"),
                    }
                }
                status
            })
        };
        // Already gone means the swap settled; its status lives in the registry.
        if let Some(swap) = self.swaps()?.get_mut(&swap_id) {
            swap.task = Some(task);
        }
        Ok(payload)
    }

    /// Assert that the HTLC has been funded out of band.
    pub fn confirm_funding(&self, swap_id: &str) -> Result<()> {
        self.orchestrator(swap_id)?.confirmation().confirm();
        log::info!("service: manual funding confirmation for {swap_id}");
        Ok(())
    }

    pub fn cancel(&self, swap_id: &str) -> Result<()> {
        let swaps = self.swaps()?;
        let swap = swaps
            .get(swap_id)
            .ok_or_else(|| ServiceError::NotRunning(swap_id.to_string()))?;
        swap.cancel.cancel();
        log::info!("service: cancel requested for {swap_id}");
        Ok(())
    }

    /// Wait for the swap's task to finish and return its final status.
    /// A swap that was already awaited, or has settled and been released,
    /// answers from the registry.
    pub async fn wait(&self, swap_id: &str) -> Result<SwapStatus> {
        let task = self
            .swaps()?
            .get_mut(swap_id)
            .and_then(|swap| swap.task.take());
        match task {
            Some(task) => task.await.map_err(|e| ServiceError::Task(e.to_string())),
            None => self.registry.swap_status(swap_id),
        }
    }

    // ==================== Queries ====================

    pub fn status(&self, swap_id: &str) -> Result<SwapStatusPayload> {
        self.registry.status(swap_id)
    }

    pub fn list(&self) -> Result<Vec<SwapStatusPayload>> {
        self.registry.list()
    }

    // ==================== Refund ====================

    /// Reclaim a swap's HTLC output after its cancellation timelock.
    ///
    /// `destination` must be an address on the configured network; without
    /// one the refund key's own address is paid.
    pub async fn refund(
        &self,
        swap_id: &str,
        utxo: &Utxo,
        destination: Option<&str>,
    ) -> Result<Txid> {
        let destination = destination
            .map(|s| parse_address(s, self.config.network))
            .transpose()?;
        let orchestrator = self.orchestrator(swap_id)?;
        let order = self.registry.order(swap_id)?;
        let txid = orchestrator
            .refund(&order, utxo, destination.as_ref())
            .await?;

        let record = self.registry.set_refund(swap_id, &txid.to_string())?;
        if let Some(store) = &self.store {
            let mut store = store.lock().map_err(|_| ServiceError::Lock)?;
            if let Err(e) = store.record(&record) {
                log::warn!("service: failed to store refund of {swap_id} ({e})");
            }
        }
        Ok(txid)
    }
}
