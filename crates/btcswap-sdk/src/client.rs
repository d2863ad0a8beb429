//! Async face of a [`ChainBackend`].
//!
//! Every call is dispatched through `tokio::task::spawn_blocking` so the
//! blocking Electrum and HTTP clients never run on a runtime worker.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::{Address, Transaction, Txid};
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::chain::{ChainBackend, ChainTip, Confirmation, TxStatus, Utxo, decode_transaction};
use crate::error::{Error, Result};

/// A chain client bound to one endpoint (or to the simulation backend).
#[derive(Clone)]
pub struct BitcoinClient {
    backend: Arc<dyn ChainBackend>,
    endpoint: String,
    simulated: bool,
}

impl std::fmt::Debug for BitcoinClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitcoinClient")
            .field("endpoint", &self.endpoint)
            .field("simulated", &self.simulated)
            .finish()
    }
}

impl BitcoinClient {
    pub fn new(backend: Arc<dyn ChainBackend>, endpoint: &str) -> Self {
        Self {
            backend,
            endpoint: endpoint.to_string(),
            simulated: false,
        }
    }

    pub fn simulated(backend: Arc<dyn ChainBackend>) -> Self {
        Self {
            backend,
            endpoint: "simulation".to_string(),
            simulated: true,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ChainBackend) -> Result<T> + Send + 'static,
    {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || f(backend.as_ref()))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    pub async fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>> {
        let address = address.clone();
        self.run(move |b| b.get_utxos(&address)).await
    }

    pub async fn broadcast_hex(&self, raw_hex: String) -> Result<Txid> {
        self.run(move |b| b.broadcast(&raw_hex)).await
    }

    pub async fn broadcast_tx(&self, tx: &Transaction) -> Result<Txid> {
        let raw_hex = bitcoin::consensus::encode::serialize_hex(tx);
        let expected = tx.compute_txid();
        let txid = self.broadcast_hex(raw_hex).await?;
        if txid != expected {
            log::warn!("client: backend returned txid {txid}, expected {expected}");
        }
        Ok(expected)
    }

    pub async fn get_raw_transaction_hex(&self, txid: Txid) -> Result<String> {
        self.run(move |b| b.get_raw_transaction_hex(&txid)).await
    }

    pub async fn get_transaction(&self, txid: Txid) -> Result<Transaction> {
        let raw = self.get_raw_transaction_hex(txid).await?;
        let tx = decode_transaction(&raw)?;
        if tx.compute_txid() != txid {
            return Err(Error::Query(format!(
                "backend returned a different transaction for {txid}"
            )));
        }
        Ok(tx)
    }

    pub async fn tx_status(&self, txid: Txid) -> Result<TxStatus> {
        self.run(move |b| b.tx_status(&txid)).await
    }

    pub async fn tip(&self) -> Result<ChainTip> {
        self.run(|b| b.tip()).await
    }

    /// Poll `tx_status` until the transaction confirms or `timeout` passes.
    ///
    /// Transient lookup errors are logged and retried until the deadline.
    pub async fn wait_for_confirmation(
        &self,
        txid: Txid,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancelToken,
    ) -> Result<Confirmation> {
        let deadline = Instant::now() + timeout;
        loop {
            cancel.check()?;
            match self.tx_status(txid).await {
                Ok(TxStatus {
                    confirmed: true,
                    block_height: Some(block_height),
                    block_time,
                }) => {
                    return Ok(Confirmation {
                        block_height,
                        confirmed_at: block_time.unwrap_or_default(),
                    });
                }
                Ok(_) => log::debug!("client: {txid} not yet confirmed"),
                Err(e) => log::warn!("client: status lookup for {txid} failed ({e})"),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!(
                    "{txid} unconfirmed after {timeout:?}"
                )));
            }
            cancel.sleep(poll_interval.min(deadline - now)).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::simulation::SimulatedBackend;

    #[tokio::test]
    async fn simulated_client_round_trip() {
        let client = BitcoinClient::simulated(Arc::new(SimulatedBackend::new(100_000)));
        assert!(client.is_simulated());
        assert_eq!(client.endpoint(), "simulation");

        let utxos = client
            .get_utxos(&Network::Testnet.probe_address())
            .await
            .unwrap();
        let tx = client.get_transaction(utxos[0].txid).await.unwrap();
        assert_eq!(tx.output[0].value.to_sat(), 100_000);

        let confirmation = client
            .wait_for_confirmation(
                utxos[0].txid,
                Duration::from_secs(1),
                Duration::from_millis(10),
                &CancelToken::never(),
            )
            .await
            .unwrap();
        assert_eq!(
            confirmation.block_height,
            crate::simulation::SIMULATED_BLOCK_HEIGHT
        );
    }

    #[tokio::test]
    async fn unconfirmed_wait_times_out() {
        use bitcoin::hashes::Hash as _;

        let client = BitcoinClient::simulated(Arc::new(SimulatedBackend::new(1)));
        let unknown = Txid::from_byte_array([9; 32]);
        let result = client
            .wait_for_confirmation(
                unknown,
                Duration::from_millis(30),
                Duration::from_millis(10),
                &CancelToken::never(),
            )
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
