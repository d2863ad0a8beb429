//! `SwapOrchestrator`: drives one swap order through its phases.
//!
//! ```text
//! Created → HtlcFunded → FundingConfirmed → CounterpartyClaimed → SettlementComplete
//!    └──────────────┴───────────────┴────────────────┴──────→ Failed
//! ```
//!
//! One orchestrator serves both swap directions; the [`LegDescriptor`]
//! decides the script variant, who funds the HTLC and whether the
//! counter-asset is settled. Every transition is written to the journal.

use std::sync::{Arc, Mutex};

use bitcoin::{Address, Txid};

use crate::address;
use crate::cancel::CancelToken;
use crate::chain::Utxo;
use crate::client::BitcoinClient;
use crate::config::SwapConfig;
use crate::detector::{DetectorConfig, FundingDetector, FundingMethod, ManualConfirmation};
use crate::error::{Error, Result};
use crate::escrow::EscrowCollaborator;
use crate::failover::RpcFailoverProvider;
use crate::htlc::HtlcScript;
use crate::journal::{NoopJournal, SwapJournal, SwapRecord};
use crate::leg::{FundingSource, LegDescriptor, SwapKeys};
use crate::order::SwapOrder;
use crate::state::{SwapPhase, SwapStatus};
use crate::tx::{
    ClaimParams, FundingParams, RefundParams, build_claim_tx, build_funding_tx, build_refund_tx,
};

// ── Struct ──────────────────────────────────────────────────────────────────

pub struct SwapOrchestrator<J: SwapJournal = NoopJournal> {
    config: SwapConfig,
    leg: LegDescriptor,
    keys: SwapKeys,
    provider: Arc<RpcFailoverProvider>,
    escrow: Arc<dyn EscrowCollaborator>,
    journal: Option<Arc<Mutex<J>>>,
    confirmation: ManualConfirmation,
    cancel: CancelToken,
}

/// Mutable state of one `execute_swap` call.
struct SwapRun {
    record: SwapRecord,
}

impl SwapRun {
    fn status(&mut self) -> &mut SwapStatus {
        &mut self.record.status
    }
}

// ── Construction ────────────────────────────────────────────────────────────

impl SwapOrchestrator<NoopJournal> {
    /// Orchestrator without persistence.
    pub fn new(
        config: SwapConfig,
        leg: LegDescriptor,
        keys: SwapKeys,
        escrow: Arc<dyn EscrowCollaborator>,
    ) -> Result<Self> {
        let provider = Arc::new(RpcFailoverProvider::new(&config)?);
        Ok(Self {
            config,
            leg,
            keys,
            provider,
            escrow,
            journal: None,
            confirmation: ManualConfirmation::new(),
            cancel: CancelToken::never(),
        })
    }
}

impl<J: SwapJournal> SwapOrchestrator<J> {
    /// Orchestrator writing every transition to `journal`.
    pub fn with_journal(
        config: SwapConfig,
        leg: LegDescriptor,
        keys: SwapKeys,
        escrow: Arc<dyn EscrowCollaborator>,
        journal: Arc<Mutex<J>>,
    ) -> Result<Self> {
        let provider = Arc::new(RpcFailoverProvider::new(&config)?);
        Ok(Self {
            config,
            leg,
            keys,
            provider,
            escrow,
            journal: Some(journal),
            confirmation: ManualConfirmation::new(),
            cancel: CancelToken::never(),
        })
    }

    /// Share a provider (and its cursor) with other orchestrators.
    pub fn with_provider(mut self, provider: Arc<RpcFailoverProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_confirmation(mut self, confirmation: ManualConfirmation) -> Self {
        self.confirmation = confirmation;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn leg(&self) -> &LegDescriptor {
        &self.leg
    }

    pub fn provider(&self) -> &Arc<RpcFailoverProvider> {
        &self.provider
    }

    /// Handle the host uses to assert manual funding.
    pub fn confirmation(&self) -> &ManualConfirmation {
        &self.confirmation
    }

    // ── Orders and scripts ──────────────────────────────────────────────

    /// Fresh secret, hashlock and order hash. No I/O.
    pub fn create_order(&self, making_amount: u64, taking_amount: u128) -> SwapOrder {
        SwapOrder::create(making_amount, taking_amount)
    }

    pub fn build_htlc(&self, order: &SwapOrder) -> Result<HtlcScript> {
        HtlcScript::new(self.leg.htlc_params(order, &self.keys)?)
    }

    pub fn htlc_address(&self, order: &SwapOrder) -> Result<Address> {
        self.build_htlc(order)?.address(self.config.network)
    }

    // ── Journal ─────────────────────────────────────────────────────────

    fn persist(&self, run: &SwapRun) {
        let Some(journal) = &self.journal else {
            return;
        };
        match journal.lock() {
            Ok(mut journal) => {
                if let Err(e) = journal.record(&run.record) {
                    log::warn!(
                        "orchestrator: failed to journal {} ({e})",
                        run.record.swap_id
                    );
                }
            }
            Err(_) => log::warn!("orchestrator: journal mutex poisoned"),
        }
    }

    fn recorded_settlement(&self, swap_id: &str) -> Result<Option<String>> {
        let Some(journal) = &self.journal else {
            return Ok(None);
        };
        let mut journal = journal
            .lock()
            .map_err(|_| Error::Journal("journal mutex poisoned".into()))?;
        journal.settlement_tx(swap_id).map_err(Error::Journal)
    }

    fn advance(&self, run: &mut SwapRun, phase: SwapPhase, message: String) -> Result<()> {
        let from = run.record.status.phase;
        if !from.can_transition_to(phase) {
            return Err(Error::InvalidTransition { from, to: phase });
        }
        log::info!(
            "orchestrator: {} {} -> {} ({message})",
            run.record.swap_id,
            from.as_str(),
            phase.as_str()
        );
        let status = run.status();
        status.phase = phase;
        status.message = message;
        status.history.push(phase);
        self.persist(run);
        Ok(())
    }

    fn fail(&self, run: &mut SwapRun, error: &Error) {
        log::warn!(
            "orchestrator: {} failed in {} ({:?}): {error}",
            run.record.swap_id,
            run.record.status.phase.as_str(),
            error.kind()
        );
        let status = run.status();
        if !status.phase.is_terminal() {
            status.phase = SwapPhase::Failed;
            status.history.push(SwapPhase::Failed);
        }
        status.message = error.to_string();
        self.persist(run);
    }

    // ── Execution ───────────────────────────────────────────────────────

    /// Run the swap to a terminal phase.
    ///
    /// Never returns an error: every failure ends in [`SwapPhase::Failed`]
    /// with the error text as the status message. When a settlement is
    /// already on record for `swap_id`, nothing is re-run.
    pub async fn execute_swap(&self, swap_id: &str, order: &SwapOrder) -> SwapStatus {
        match self.recorded_settlement(swap_id) {
            Ok(Some(evm_tx)) => {
                log::info!("orchestrator: {swap_id} already settled ({evm_tx}), not re-running");
                let mut status = SwapStatus::created();
                status.phase = SwapPhase::SettlementComplete;
                status.message = "settlement already recorded for this swap".to_string();
                status.history.push(SwapPhase::SettlementComplete);
                status.tx_hashes.evm = Some(evm_tx);
                return status;
            }
            Ok(None) => {}
            Err(e) => log::warn!("orchestrator: cannot read journal for {swap_id} ({e})"),
        }

        let mut run = SwapRun {
            record: SwapRecord::new(swap_id, order, SwapStatus::created()),
        };
        self.persist(&run);

        if let Err(e) = self.drive(&mut run, order).await {
            self.fail(&mut run, &e);
        }
        run.record.status
    }

    async fn drive(&self, run: &mut SwapRun, order: &SwapOrder) -> Result<()> {
        let htlc = self.build_htlc(order)?;
        let htlc_address = htlc.address(self.config.network)?;
        run.record.htlc_address = Some(htlc_address.to_string());
        run.record.htlc_script_hex = Some(htlc.to_hex());
        self.persist(run);

        let client = self.provider.get_working_provider(&self.cancel).await?;
        if client.is_simulated() {
            run.status().degraded = true;
        }

        let funding_txid = self.fund(run, &client, &htlc, order).await?;
        let utxo = self
            .detect(run, &client, &htlc_address, order, funding_txid)
            .await?;

        // Confirm and verify before anything reveals the secret.
        let confirmation = client
            .wait_for_confirmation(
                utxo.txid,
                self.config.confirmation_timeout,
                self.config.confirmation_poll_interval,
                &self.cancel,
            )
            .await?;
        let funding_tx = client.get_transaction(utxo.txid).await?;
        let output = funding_tx.output.get(utxo.vout as usize).ok_or_else(|| {
            Error::ScriptMismatch(format!("{} has no output {}", utxo.txid, utxo.vout))
        })?;
        if !address::verify_on_chain_output(&output.script_pubkey, htlc.script()) {
            return Err(Error::ScriptMismatch(format!(
                "{}:{} pays {}, expected {}",
                utxo.txid,
                utxo.vout,
                output.script_pubkey,
                htlc.script_pubkey()
            )));
        }
        // The counter-asset is sized by the order, so the output must cover it.
        let value = output.value.to_sat();
        if value < order.making_amount {
            return Err(Error::Underfunded {
                outpoint: format!("{}:{}", utxo.txid, utxo.vout),
                expected: order.making_amount,
                actual: value,
            });
        }
        let utxo = Utxo {
            value,
            block_height: Some(confirmation.block_height),
            ..utxo
        };
        self.advance(
            run,
            SwapPhase::FundingConfirmed,
            format!(
                "funding {}:{} confirmed at height {}",
                utxo.txid, utxo.vout, confirmation.block_height
            ),
        )?;

        self.cancel.check()?;
        let destination = self.leg.claim_destination(&self.keys);
        let claim = build_claim_tx(&ClaimParams {
            htlc: &htlc,
            utxo: &utxo,
            secret: &order.secret,
            claimer: &self.keys.claimer,
            destination: &destination,
            fee: self.config.spend_fee_sats,
        })?;
        let claim_txid = client.broadcast_tx(&claim.tx).await?;
        run.status().tx_hashes.btc = Some(claim_txid.to_string());
        run.record.revealed_secret = Some(order.secret.reveal_hex());
        self.advance(
            run,
            SwapPhase::CounterpartyClaimed,
            format!(
                "claimed {} sats to {destination} in {claim_txid}",
                claim.tx.output[0].value.to_sat()
            ),
        )?;

        let message = if self.leg.settle_counter_asset {
            let evm_tx = self.settle(&run.record.swap_id, order.taking_amount).await?;
            let message = format!("counter-asset released in {evm_tx}");
            run.status().tx_hashes.evm = Some(evm_tx);
            message
        } else {
            "claim complete, no counter-asset to settle".to_string()
        };
        self.advance(run, SwapPhase::SettlementComplete, message)
    }

    /// Broadcast our funding transaction, if this leg funds itself.
    async fn fund(
        &self,
        run: &mut SwapRun,
        client: &BitcoinClient,
        htlc: &HtlcScript,
        order: &SwapOrder,
    ) -> Result<Option<Txid>> {
        let FundingSource::SelfFunded { payer, utxos } = &self.leg.funding else {
            return Ok(None);
        };
        let candidates = match utxos {
            Some(utxos) => utxos.clone(),
            None => client.get_utxos(&payer.address()).await?,
        };
        let built = build_funding_tx(&FundingParams {
            payer,
            utxos: &candidates,
            htlc,
            amount: order.making_amount,
            fee: self.config.funding_fee_sats,
        })?;
        self.cancel.check()?;
        let txid = client.broadcast_tx(&built.tx).await?;
        run.status().tx_hashes.funding = Some(txid.to_string());
        self.advance(
            run,
            SwapPhase::HtlcFunded,
            format!("locked {} sats in {txid}", order.making_amount),
        )?;
        Ok(Some(txid))
    }

    /// Wait for the HTLC output to appear and pick the one to claim: our own
    /// funding output if we broadcast one, else the first output covering
    /// the order amount, else the first output seen.
    async fn detect(
        &self,
        run: &mut SwapRun,
        client: &BitcoinClient,
        htlc_address: &Address,
        order: &SwapOrder,
        funding_txid: Option<Txid>,
    ) -> Result<Utxo> {
        let mut detector = FundingDetector::new(DetectorConfig::from(&self.config));
        let detection = detector
            .detect(
                client,
                htlc_address,
                order.making_amount,
                &self.confirmation,
                &self.cancel,
            )
            .await?;

        if !detection.is_funded {
            return Err(Error::NotFunded(format!("nothing paid {htlc_address}")));
        }
        if detection.simulated && !client.is_simulated() {
            return Err(Error::NotFunded(format!(
                "no output paying {htlc_address} after {} poll(s) and manual wait",
                detection.attempts
            )));
        }
        if detection.method == FundingMethod::Manual {
            run.status().degraded = true;
        }

        let utxos = &detection.utxos;
        let utxo = utxos
            .iter()
            .find(|u| Some(u.txid) == funding_txid)
            .or_else(|| utxos.iter().find(|u| u.value >= order.making_amount))
            .or_else(|| utxos.first())
            .cloned()
            .ok_or_else(|| Error::NotFunded(format!("no spendable output at {htlc_address}")))?;

        if funding_txid.is_none() {
            run.status().tx_hashes.funding = Some(utxo.txid.to_string());
            self.advance(
                run,
                SwapPhase::HtlcFunded,
                format!(
                    "counterparty funding {} detected ({:?})",
                    utxo.txid, detection.method
                ),
            )?;
        }
        Ok(utxo)
    }

    /// Release the counter-asset at most once per swap id.
    async fn settle(&self, swap_id: &str, amount: u128) -> Result<String> {
        if let Some(evm_tx) = self.recorded_settlement(swap_id)? {
            log::info!("orchestrator: {swap_id} settlement already recorded ({evm_tx})");
            return Ok(evm_tx);
        }
        self.cancel.check()?;
        let escrow = self.escrow.clone();
        let id = swap_id.to_string();
        tokio::task::spawn_blocking(move || escrow.complete_swap(amount, &id))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
            .map_err(|e| match e {
                Error::Settlement(_) => e,
                other => Error::Settlement(other.to_string()),
            })
    }

    // ── Refund ──────────────────────────────────────────────────────────

    /// Reclaim the HTLC output once the cancellation timelock has elapsed.
    ///
    /// Pays `destination`, or the refund key's own address.
    pub async fn refund(
        &self,
        order: &SwapOrder,
        utxo: &Utxo,
        destination: Option<&Address>,
    ) -> Result<Txid> {
        let htlc = self.build_htlc(order)?;
        let refunder = self.keys.refunder()?;
        // Refunds typically follow a cancelled run, so the run's token is ignored.
        let client = self
            .provider
            .get_working_provider(&CancelToken::never())
            .await?;

        let tip = client.tip().await?;
        let status = client.tx_status(utxo.txid).await?;
        let funding_confirmed_at = if status.confirmed {
            status.block_time
        } else {
            None
        };

        let own_address = refunder.address();
        let refund = build_refund_tx(&RefundParams {
            htlc: &htlc,
            utxo,
            refunder,
            destination: destination.unwrap_or(&own_address),
            fee: self.config.spend_fee_sats,
            tip,
            funding_confirmed_at,
        })?;
        let txid = client.broadcast_tx(&refund.tx).await?;
        log::info!(
            "orchestrator: refunded {} to {} in {txid}",
            utxo.outpoint(),
            destination.unwrap_or(&own_address)
        );
        Ok(txid)
    }
}
