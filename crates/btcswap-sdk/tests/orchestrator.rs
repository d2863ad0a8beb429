use std::sync::{Arc, Mutex};

use btcswap_sdk::testing::{
    MOCK_BLOCK_TIME, MockBackend, Scripted, fast_config, mock_factory, test_key,
};
use btcswap_sdk::{
    ChainBackend, ChainTip, Error, EscrowCollaborator, InMemoryEscrow, LegDescriptor,
    MemoryJournal, NetworkMode, RpcFailoverProvider, SwapConfig, SwapKeys, SwapOrchestrator,
    SwapPhase, cancel_pair, extract_secret,
};

const ENDPOINT: &str = "https://esplora.example/api";

// ── Helpers ──────────────────────────────────────────────────────────────

struct Fixture {
    backend: Arc<MockBackend>,
    escrow: Arc<InMemoryEscrow>,
    journal: Arc<Mutex<MemoryJournal>>,
    config: SwapConfig,
}

impl Fixture {
    fn new() -> Self {
        Self::with_escrow(InMemoryEscrow::with_balance(10_000_000))
    }

    fn with_escrow(escrow: InMemoryEscrow) -> Self {
        Self {
            backend: Arc::new(MockBackend::new()),
            escrow: Arc::new(escrow),
            journal: Arc::new(Mutex::new(MemoryJournal::new())),
            config: fast_config(&[ENDPOINT]),
        }
    }

    fn orchestrator(&self, leg: LegDescriptor, keys: SwapKeys) -> SwapOrchestrator<MemoryJournal> {
        let backend: Arc<dyn ChainBackend> = self.backend.clone();
        let provider =
            RpcFailoverProvider::with_factory(&self.config, mock_factory(vec![(ENDPOINT, backend)]))
                .unwrap();
        let escrow: Arc<dyn EscrowCollaborator> = self.escrow.clone();
        SwapOrchestrator::with_journal(
            self.config.clone(),
            leg,
            keys,
            escrow,
            self.journal.clone(),
        )
        .unwrap()
        .with_provider(Arc::new(provider))
    }
}

fn claim_keys() -> SwapKeys {
    SwapKeys::with_refunder(test_key(1), test_key(2))
}

const FULL_HISTORY: [SwapPhase; 5] = [
    SwapPhase::Created,
    SwapPhase::HtlcFunded,
    SwapPhase::FundingConfirmed,
    SwapPhase::CounterpartyClaimed,
    SwapPhase::SettlementComplete,
];

// ── Happy paths ──────────────────────────────────────────────────────────

#[tokio::test]
async fn self_funded_swap_runs_to_settlement() {
    let fx = Fixture::new();
    let payer = test_key(2);
    fx.backend.fund(&payer.address(), 250_000);
    let orch = fx.orchestrator(LegDescriptor::source(payer), claim_keys());

    let order = orch.create_order(100_000, 5_000_000);
    let status = orch.execute_swap("swap_e2e", &order).await;

    assert_eq!(status.phase, SwapPhase::SettlementComplete, "{}", status.message);
    assert_eq!(status.history, FULL_HISTORY);
    assert!(!status.degraded);
    assert!(status.tx_hashes.funding.is_some());
    assert!(status.tx_hashes.btc.as_deref().is_some_and(|h| !h.is_empty()));
    assert!(status.tx_hashes.evm.as_deref().is_some_and(|h| !h.is_empty()));

    let broadcasts = fx.backend.broadcasts();
    assert_eq!(broadcasts.len(), 2);
    let (funding, claim) = (&broadcasts[0], &broadcasts[1]);
    let htlc = orch.build_htlc(&order).unwrap();
    assert_eq!(funding.output[0].value.to_sat(), 100_000);
    assert_eq!(funding.output[0].script_pubkey, htlc.script_pubkey());
    assert_eq!(claim.output[0].value.to_sat(), 100_000 - fx.config.spend_fee_sats);
    assert_eq!(claim.output[0].script_pubkey, test_key(1).script_pubkey());
    assert_eq!(claim.compute_txid().to_string(), status.tx_hashes.btc.clone().unwrap());
    assert_eq!(extract_secret(claim, &htlc).unwrap(), Some(order.secret.clone()));

    let settlement = fx.escrow.settlement("swap_e2e").unwrap();
    assert_eq!(settlement.amount, 5_000_000);
    assert_eq!(Some(settlement.tx_hash), status.tx_hashes.evm);

    let journal = fx.journal.lock().unwrap();
    assert_eq!(journal.transitions("swap_e2e"), FULL_HISTORY);
    let record = journal.get("swap_e2e").unwrap();
    assert_eq!(record.revealed_secret, Some(order.secret.reveal_hex()));
    assert_eq!(record.htlc_script_hex, Some(htlc.to_hex()));
}

#[tokio::test]
async fn settled_swap_is_never_rerun() {
    let fx = Fixture::new();
    let payer = test_key(2);
    fx.backend.fund(&payer.address(), 250_000);
    let orch = fx.orchestrator(LegDescriptor::source(payer), claim_keys());
    let order = orch.create_order(100_000, 5_000_000);

    let first = orch.execute_swap("swap_once", &order).await;
    assert_eq!(first.phase, SwapPhase::SettlementComplete, "{}", first.message);

    let second = orch.execute_swap("swap_once", &order).await;
    assert_eq!(second.phase, SwapPhase::SettlementComplete);
    assert_eq!(second.tx_hashes.evm, first.tx_hashes.evm);
    assert_eq!(fx.escrow.released(), 5_000_000);
    assert_eq!(fx.backend.broadcasts().len(), 2);
}

#[tokio::test]
async fn externally_funded_destination_leg() {
    let fx = Fixture::new();
    let orch = fx.orchestrator(
        LegDescriptor::destination(850_000),
        SwapKeys::new(test_key(1), test_key(2).public_key()),
    );
    let order = orch.create_order(100_000, 7);
    let funded = fx
        .backend
        .fund(&orch.htlc_address(&order).unwrap(), 100_000);

    let status = orch.execute_swap("swap_dest", &order).await;

    assert_eq!(status.phase, SwapPhase::SettlementComplete, "{}", status.message);
    assert_eq!(status.history, FULL_HISTORY);
    assert_eq!(status.tx_hashes.funding, Some(funded.txid.to_string()));
    let broadcasts = fx.backend.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].input[0].previous_output, funded.outpoint());
    assert_eq!(broadcasts[0].output[0].value.to_sat(), 99_000);
}

#[tokio::test]
async fn underfunded_htlc_is_never_claimed() {
    let fx = Fixture::new();
    let orch = fx.orchestrator(
        LegDescriptor::destination(850_000),
        SwapKeys::new(test_key(1), test_key(2).public_key()),
    );
    let order = orch.create_order(100_000, 5_000_000);
    fx.backend
        .fund(&orch.htlc_address(&order).unwrap(), 2_000);

    let status = orch.execute_swap("swap_short", &order).await;

    assert_eq!(status.phase, SwapPhase::Failed);
    assert_eq!(
        status.history,
        [SwapPhase::Created, SwapPhase::HtlcFunded, SwapPhase::Failed]
    );
    assert!(status.message.contains("holds 2000 sats"), "{}", status.message);
    assert!(status.tx_hashes.btc.is_none());
    assert!(fx.backend.broadcasts().is_empty());
    assert_eq!(fx.escrow.released(), 0);
    assert!(fx.journal.lock().unwrap().get("swap_short").unwrap().revealed_secret.is_none());
}

#[tokio::test]
async fn covering_output_is_claimed_over_dust() {
    let fx = Fixture::new();
    let orch = fx.orchestrator(
        LegDescriptor::destination(850_000),
        SwapKeys::new(test_key(1), test_key(2).public_key()),
    );
    let order = orch.create_order(100_000, 7);
    let htlc_address = orch.htlc_address(&order).unwrap();
    fx.backend.fund(&htlc_address, 2_000);
    let funded = fx.backend.fund(&htlc_address, 100_000);

    let status = orch.execute_swap("swap_dust", &order).await;

    assert_eq!(status.phase, SwapPhase::SettlementComplete, "{}", status.message);
    assert_eq!(status.tx_hashes.funding, Some(funded.txid.to_string()));
    let broadcasts = fx.backend.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].input[0].previous_output, funded.outpoint());
    assert_eq!(fx.escrow.released(), 7);
}

#[tokio::test]
async fn simulated_mode_completes_and_is_flagged() {
    let mut config = fast_config(&[]);
    config.network_mode = NetworkMode::Simulated;
    let escrow: Arc<dyn EscrowCollaborator> = Arc::new(InMemoryEscrow::with_balance(100));
    let orch = SwapOrchestrator::new(
        config,
        LegDescriptor::destination(850_000),
        SwapKeys::new(test_key(1), test_key(2).public_key()),
        escrow,
    )
    .unwrap();
    let order = orch.create_order(100_000, 100);

    let status = orch.execute_swap("swap_sim", &order).await;

    assert_eq!(status.phase, SwapPhase::SettlementComplete, "{}", status.message);
    assert!(status.degraded);
    assert!(status.tx_hashes.btc.is_some());
}

// ── Failure paths ────────────────────────────────────────────────────────

#[tokio::test]
async fn script_mismatch_aborts_before_claim() {
    let fx = Fixture::new();
    let orch = fx.orchestrator(LegDescriptor::destination(850_000), claim_keys());
    let order = orch.create_order(100_000, 7);
    let htlc_address = orch.htlc_address(&order).unwrap();

    // The indexer reports an output that actually pays somewhere else.
    let decoy = fx.backend.fund(&test_key(9).address(), 100_000);
    fx.backend
        .script_utxos(&htlc_address, vec![Scripted::Utxos(vec![decoy])]);

    let status = orch.execute_swap("swap_mismatch", &order).await;

    assert_eq!(status.phase, SwapPhase::Failed);
    assert!(status.message.contains("does not match"), "{}", status.message);
    assert_eq!(
        status.history,
        [SwapPhase::Created, SwapPhase::HtlcFunded, SwapPhase::Failed]
    );
    assert!(status.tx_hashes.btc.is_none());
    assert!(fx.backend.broadcasts().is_empty());
    assert_eq!(fx.escrow.released(), 0);
    assert!(fx.journal.lock().unwrap().get("swap_mismatch").unwrap().revealed_secret.is_none());
}

#[tokio::test]
async fn settlement_failure_fails_after_claim() {
    let fx = Fixture::with_escrow(InMemoryEscrow::new());
    let orch = fx.orchestrator(LegDescriptor::destination(850_000), claim_keys());
    let order = orch.create_order(100_000, 7);
    fx.backend
        .fund(&orch.htlc_address(&order).unwrap(), 100_000);

    let status = orch.execute_swap("swap_unsettled", &order).await;

    assert_eq!(status.phase, SwapPhase::Failed);
    assert_eq!(
        status.history[status.history.len() - 2..],
        [SwapPhase::CounterpartyClaimed, SwapPhase::Failed]
    );
    assert!(status.tx_hashes.btc.is_some());
    assert!(status.tx_hashes.evm.is_none());
    assert!(status.message.contains("settlement failed"), "{}", status.message);
}

#[tokio::test]
async fn unfunded_live_swap_is_not_treated_as_funded() {
    let fx = Fixture::new();
    let orch = fx.orchestrator(LegDescriptor::destination(850_000), claim_keys());
    let order = orch.create_order(100_000, 7);

    let status = orch.execute_swap("swap_unfunded", &order).await;

    assert_eq!(status.phase, SwapPhase::Failed);
    assert_eq!(status.history, [SwapPhase::Created, SwapPhase::Failed]);
    assert!(status.message.contains("not detected"), "{}", status.message);
    assert!(fx.backend.broadcasts().is_empty());
}

#[tokio::test]
async fn insufficient_payer_funds_fail_fast() {
    let fx = Fixture::new();
    let payer = test_key(2);
    fx.backend.fund(&payer.address(), 50_000);
    let orch = fx.orchestrator(LegDescriptor::source(payer), claim_keys());
    let order = orch.create_order(100_000, 7);

    let status = orch.execute_swap("swap_poor", &order).await;

    assert_eq!(status.phase, SwapPhase::Failed);
    assert!(status.message.contains("insufficient funds"), "{}", status.message);
    assert!(fx.backend.broadcasts().is_empty());
}

#[tokio::test]
async fn cancelled_swap_fails_without_io() {
    let fx = Fixture::new();
    let (handle, token) = cancel_pair();
    let orch = fx
        .orchestrator(LegDescriptor::destination(850_000), claim_keys())
        .with_cancel(token);
    let order = orch.create_order(100_000, 7);
    handle.cancel();

    let status = orch.execute_swap("swap_cancelled", &order).await;

    assert_eq!(status.phase, SwapPhase::Failed);
    assert_eq!(status.message, Error::Cancelled.to_string());
    assert_eq!(fx.backend.utxo_calls(&orch.htlc_address(&order).unwrap()), 0);
}

// ── Refund ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn refund_after_cancellation_delay() {
    let fx = Fixture::new();
    let orch = fx.orchestrator(LegDescriptor::source(test_key(2)), claim_keys());
    let order = orch.create_order(100_000, 7);
    let utxo = fx
        .backend
        .fund(&orch.htlc_address(&order).unwrap(), 100_000);
    let cancellation = orch.leg().timelocks.cancellation;

    fx.backend.set_tip(ChainTip {
        height: 800_001,
        median_time: MOCK_BLOCK_TIME + cancellation - 1,
    });
    assert!(matches!(
        orch.refund(&order, &utxo, None).await,
        Err(Error::TimelockNotElapsed(_))
    ));

    fx.backend.set_tip(ChainTip {
        height: 800_010,
        median_time: MOCK_BLOCK_TIME + cancellation,
    });
    let txid = orch.refund(&order, &utxo, None).await.unwrap();
    let broadcasts = fx.backend.broadcasts();
    let refund = broadcasts.last().unwrap();
    assert_eq!(refund.compute_txid(), txid);
    assert_eq!(refund.output[0].script_pubkey, test_key(2).script_pubkey());
    assert_eq!(refund.output[0].value.to_sat(), 99_000);
}

#[tokio::test]
async fn refund_needs_the_private_refund_key() {
    let fx = Fixture::new();
    let orch = fx.orchestrator(
        LegDescriptor::source(test_key(2)),
        SwapKeys::new(test_key(1), test_key(2).public_key()),
    );
    let order = orch.create_order(100_000, 7);
    let utxo = fx
        .backend
        .fund(&orch.htlc_address(&order).unwrap(), 100_000);
    assert!(matches!(
        orch.refund(&order, &utxo, None).await,
        Err(Error::KeyMismatch(_))
    ));
}
