//! Hybrid HTLC funding detection.
//!
//! Polls the HTLC address a bounded number of times within a fixed deadline.
//! When polling runs out, or the endpoint fails at the transport level, the
//! detector waits for an injected manual confirmation, checks once more, and
//! as a last resort reports a clearly flagged simulated funding record.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::hashes::Hash as _;
use bitcoin::{Address, Txid};
use rand::RngCore;
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::chain::Utxo;
use crate::client::BitcoinClient;
use crate::config::SwapConfig;
use crate::error::{Error, Result};

// ── Public types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundingMethod {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Polling { attempt: u32 },
    Funded,
    Exhausted,
    ManualWait,
    FundedManual,
    FundedSimulated,
}

#[derive(Debug, Clone)]
pub struct FundingDetection {
    pub is_funded: bool,
    pub utxos: Vec<Utxo>,
    pub tx_hash: Option<Txid>,
    /// Sum of all detected UTXO values.
    pub amount: Option<u64>,
    pub method: FundingMethod,
    /// True when the record was invented after every check came back empty.
    /// Its txid does not exist on any chain.
    pub simulated: bool,
    /// Automatic polls performed.
    pub attempts: u32,
    pub final_state: DetectorState,
}

impl FundingDetection {
    fn from_utxos(
        utxos: Vec<Utxo>,
        method: FundingMethod,
        attempts: u32,
        state: DetectorState,
    ) -> Self {
        let amount = utxos.iter().map(|u| u.value).sum();
        Self {
            is_funded: true,
            tx_hash: utxos.first().map(|u| u.txid),
            amount: Some(amount),
            utxos,
            method,
            simulated: false,
            attempts,
            final_state: state,
        }
    }
}

/// Out-of-band "the HTLC is funded" signal, e.g. from an operator UI.
///
/// A confirmation sent before the detector starts waiting is not lost.
#[derive(Debug, Clone, Default)]
pub struct ManualConfirmation {
    notify: Arc<Notify>,
}

impl ManualConfirmation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirm(&self) {
        self.notify.notify_one();
    }

    /// Wait for a confirmation for at most `timeout`. Returns whether one arrived.
    pub async fn wait(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        tokio::select! {
            _ = self.notify.notified() => Ok(true),
            _ = tokio::time::sleep(timeout) => Ok(false),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Automatic polls before manual mode (default: 20).
    pub max_attempts: u32,
    /// Pause between polls (default: 30s).
    pub poll_interval: Duration,
    /// Ceiling on the manual wait (default: 5 min).
    pub manual_wait_timeout: Duration,
    /// Deadline for automatic polling, however slow each poll is
    /// (default: 10 min 15 s).
    pub detection_ceiling: Duration,
}

impl DetectorConfig {
    pub fn new() -> Self {
        Self {
            max_attempts: 20,
            poll_interval: Duration::from_secs(30),
            manual_wait_timeout: Duration::from_secs(300),
            detection_ceiling: Duration::from_secs(20 * 30 + 15),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&SwapConfig> for DetectorConfig {
    fn from(config: &SwapConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            poll_interval: config.poll_interval,
            manual_wait_timeout: config.manual_wait_timeout,
            detection_ceiling: config.detection_ceiling(),
        }
    }
}

// ── Detector ────────────────────────────────────────────────────────

pub struct FundingDetector {
    config: DetectorConfig,
    state: DetectorState,
}

impl FundingDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: DetectorState::Idle,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    fn enter(&mut self, state: DetectorState) {
        log::debug!("detector: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Run detection for `address`.
    ///
    /// `expected_amount` only sizes the synthetic record produced when nothing
    /// is ever found.
    pub async fn detect(
        &mut self,
        client: &BitcoinClient,
        address: &Address,
        expected_amount: u64,
        confirmation: &ManualConfirmation,
        cancel: &CancelToken,
    ) -> Result<FundingDetection> {
        let mut attempts = 0;
        let deadline = Instant::now() + self.config.detection_ceiling;

        while attempts < self.config.max_attempts {
            cancel.check()?;
            if attempts > 0 && Instant::now() >= deadline {
                log::warn!(
                    "detector: {address} ceiling of {:?} reached after {attempts} poll(s)",
                    self.config.detection_ceiling
                );
                break;
            }
            attempts += 1;
            self.enter(DetectorState::Polling { attempt: attempts });

            match client.get_utxos(address).await {
                Ok(utxos) if !utxos.is_empty() => {
                    self.enter(DetectorState::Funded);
                    log::info!(
                        "detector: {address} funded after {attempts} poll(s), {} utxo(s)",
                        utxos.len()
                    );
                    return Ok(FundingDetection::from_utxos(
                        utxos,
                        FundingMethod::Automatic,
                        attempts,
                        DetectorState::Funded,
                    ));
                }
                Ok(_) => {
                    log::debug!(
                        "detector: {address} empty (attempt {attempts}/{})",
                        self.config.max_attempts
                    );
                }
                Err(e) if e.is_transport() => {
                    log::warn!("detector: transport failure ({e}), switching to manual mode");
                    break;
                }
                Err(e) => {
                    log::warn!("detector: poll {attempts} failed ({e})");
                }
            }

            if attempts < self.config.max_attempts {
                let remaining = deadline.saturating_duration_since(Instant::now());
                cancel.sleep(self.config.poll_interval.min(remaining)).await?;
            }
        }

        self.enter(DetectorState::Exhausted);
        self.enter(DetectorState::ManualWait);
        log::info!(
            "detector: waiting up to {:?} for manual funding confirmation of {address}",
            self.config.manual_wait_timeout
        );
        let confirmed = confirmation
            .wait(self.config.manual_wait_timeout, cancel)
            .await?;
        if !confirmed {
            log::warn!("detector: manual wait for {address} timed out");
        }

        match client.get_utxos(address).await {
            Ok(utxos) if !utxos.is_empty() => {
                self.enter(DetectorState::FundedManual);
                return Ok(FundingDetection::from_utxos(
                    utxos,
                    FundingMethod::Manual,
                    attempts,
                    DetectorState::FundedManual,
                ));
            }
            Ok(_) => log::warn!("detector: final check found no utxos at {address}"),
            Err(e) => log::warn!("detector: final check failed ({e})"),
        }

        self.enter(DetectorState::FundedSimulated);
        let mut bytes = [0u8; 32];
        thread_rng().fill_bytes(&mut bytes);
        let txid = Txid::from_byte_array(bytes);
        log::warn!("detector: reporting simulated funding {txid} for {address}");
        Ok(FundingDetection {
            is_funded: true,
            utxos: vec![Utxo {
                txid,
                vout: 0,
                value: expected_amount,
                block_height: None,
            }],
            tx_hash: Some(txid),
            amount: Some(expected_amount),
            method: FundingMethod::Manual,
            simulated: true,
            attempts,
            final_state: DetectorState::FundedSimulated,
        })
    }
}
