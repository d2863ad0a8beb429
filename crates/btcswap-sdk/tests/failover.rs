use std::sync::Arc;
use std::time::Duration;

use btcswap_sdk::testing::{MockBackend, fast_config, mock_factory, test_key};
use btcswap_sdk::{CancelToken, ChainBackend, Error, RpcFailoverProvider, cancel_pair};

const A: &str = "https://a.example/api";
const B: &str = "https://b.example/api";
const C: &str = "ssl://c.example:50002";

#[tokio::test]
async fn skips_failing_endpoints_and_binds_to_first_healthy() {
    let healthy = Arc::new(MockBackend::new());
    let funded = healthy.fund(&test_key(1).address(), 42_000);
    let factory = mock_factory(vec![
        (A, Arc::new(MockBackend::failing()) as Arc<dyn ChainBackend>),
        (B, Arc::new(MockBackend::failing()) as Arc<dyn ChainBackend>),
        (C, healthy.clone() as Arc<dyn ChainBackend>),
    ]);
    let provider =
        RpcFailoverProvider::with_factory(&fast_config(&[A, B, C]), factory).unwrap();

    let client = provider
        .get_working_provider(&CancelToken::never())
        .await
        .unwrap();

    assert_eq!(client.endpoint(), C);
    assert!(!client.is_simulated());
    assert_eq!(provider.current_endpoint(), Some(C));

    // The returned client talks to C's backend.
    let utxos = client.get_utxos(&test_key(1).address()).await.unwrap();
    assert_eq!(utxos, vec![funded]);
}

#[tokio::test]
async fn cursor_stays_on_working_endpoint() {
    let factory = mock_factory(vec![(
        B,
        Arc::new(MockBackend::new()) as Arc<dyn ChainBackend>,
    )]);
    let provider = RpcFailoverProvider::with_factory(&fast_config(&[A, B]), factory).unwrap();

    let first = provider
        .get_working_provider(&CancelToken::never())
        .await
        .unwrap();
    assert_eq!(first.endpoint(), B);

    // Second resolution starts at B and does not revisit A.
    let second = provider
        .get_working_provider(&CancelToken::never())
        .await
        .unwrap();
    assert_eq!(second.endpoint(), B);
    assert_eq!(provider.current_endpoint(), Some(B));
}

#[tokio::test]
async fn exhaustion_without_fallback_is_a_network_error() {
    let provider =
        RpcFailoverProvider::with_factory(&fast_config(&[A, B]), mock_factory(vec![])).unwrap();

    let err = provider
        .get_working_provider(&CancelToken::never())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EndpointsExhausted(2)));
    assert_eq!(err.kind(), btcswap_sdk::ErrorKind::Network);
}

#[tokio::test]
async fn exhaustion_with_fallback_returns_simulation_client() {
    let mut config = fast_config(&[A, B]);
    config.simulation_fallback = true;
    let provider = RpcFailoverProvider::with_factory(&config, mock_factory(vec![])).unwrap();

    let client = provider
        .get_working_provider(&CancelToken::never())
        .await
        .unwrap();
    assert!(client.is_simulated());

    let utxos = client.get_utxos(&test_key(1).address()).await.unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].value, config.simulated_utxo_sats);
}

#[tokio::test]
async fn cancelled_token_stops_probing() {
    let provider =
        RpcFailoverProvider::with_factory(&fast_config(&[A, B]), mock_factory(vec![])).unwrap();
    let (handle, token) = cancel_pair();
    handle.cancel();
    assert!(matches!(
        provider.get_working_provider(&token).await,
        Err(Error::Cancelled)
    ));
}

#[test]
fn live_mode_needs_endpoints() {
    assert!(matches!(
        RpcFailoverProvider::with_factory(&fast_config(&[]), mock_factory(vec![])),
        Err(Error::Config(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_electrum_endpoint_is_abandoned_after_request_timeout() {
    // Connections queue in the backlog and are never answered.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("tcp://{}", listener.local_addr().unwrap());
    let mut config = fast_config(&[endpoint.as_str()]);
    config.request_timeout = Duration::from_secs(1);
    let provider = RpcFailoverProvider::new(&config).unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(30),
        provider.get_working_provider(&CancelToken::never()),
    )
    .await
    .expect("probe ignored the configured request timeout");

    assert!(matches!(result, Err(Error::EndpointsExhausted(1))));
    drop(listener);
}
