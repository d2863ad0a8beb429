use std::sync::{Arc, Mutex};

use btcswap_sdk::{NoopJournal, SwapJournal, SwapRecord};

use crate::registry::SwapRegistry;

/// Journal handed to each orchestrator: mirrors every snapshot into the
/// registry, then into the durable store when one is configured.
pub struct RegistryJournal<S: SwapJournal = NoopJournal> {
    registry: SwapRegistry,
    store: Option<Arc<Mutex<S>>>,
}

impl<S: SwapJournal> RegistryJournal<S> {
    pub fn new(registry: SwapRegistry, store: Option<Arc<Mutex<S>>>) -> Self {
        Self { registry, store }
    }
}

impl<S: SwapJournal> SwapJournal for RegistryJournal<S> {
    fn record(&mut self, record: &SwapRecord) -> Result<(), String> {
        self.registry.update(record).map_err(|e| e.to_string())?;
        if let Some(store) = &self.store {
            store
                .lock()
                .map_err(|_| "store lock failed".to_string())?
                .record(record)?;
        }
        Ok(())
    }

    fn settlement_tx(&mut self, swap_id: &str) -> Result<Option<String>, String> {
        if let Some(store) = &self.store {
            let recorded = store
                .lock()
                .map_err(|_| "store lock failed".to_string())?
                .settlement_tx(swap_id)?;
            if recorded.is_some() {
                return Ok(recorded);
            }
        }
        self.registry.settlement_tx(swap_id).map_err(|e| e.to_string())
    }
}
