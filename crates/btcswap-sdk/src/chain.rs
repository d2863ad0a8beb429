use std::time::Duration;

use bitcoin::{Address, OutPoint, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An unspent output as reported by an indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    /// Value in satoshis.
    pub value: u64,
    /// Confirming block height, `None` while in the mempool.
    #[serde(default)]
    pub block_height: Option<u32>,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}

/// Confirmation state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u32>,
    /// Header timestamp of the confirming block.
    #[serde(default)]
    pub block_time: Option<u32>,
}

/// Result of a successful confirmation wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub block_height: u32,
    pub confirmed_at: u32,
}

/// The chain clock refunds are checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    pub height: u32,
    /// BIP-113 median time past: the median header time of the last
    /// [`MEDIAN_TIME_SPAN`] blocks ending at the tip.
    pub median_time: u32,
}

/// Number of blocks whose header times make up the median time past.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Median of a window of header times, as consensus computes it.
pub fn median_time_past(times: &[u32]) -> Option<u32> {
    let mut times = times.to_vec();
    times.sort_unstable();
    times.get(times.len() / 2).copied()
}

/// Backend for reading from and broadcasting to the Bitcoin network.
///
/// Implementations block; async callers go through
/// [`BitcoinClient`](crate::client::BitcoinClient), which runs them on the
/// blocking pool.
pub trait ChainBackend: Send + Sync {
    /// Unspent outputs paying to `address`, confirmed and unconfirmed.
    fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>>;

    /// Broadcast a serialized transaction and return its txid.
    fn broadcast(&self, raw_hex: &str) -> Result<Txid>;

    /// Raw transaction bytes, hex encoded.
    fn get_raw_transaction_hex(&self, txid: &Txid) -> Result<String>;

    fn tx_status(&self, txid: &Txid) -> Result<TxStatus>;

    fn tip(&self) -> Result<ChainTip>;
}

/// Decode a hex transaction as returned by [`ChainBackend::get_raw_transaction_hex`].
pub fn decode_transaction(raw_hex: &str) -> Result<Transaction> {
    let bytes = hex::decode(raw_hex.trim()).map_err(|e| Error::Query(format!("bad tx hex: {e}")))?;
    bitcoin::consensus::deserialize(&bytes).map_err(|e| Error::Query(format!("bad tx: {e}")))
}

// ── Electrum ────────────────────────────────────────────────────────

/// Electrum-protocol backend. Connects per call; `electrum_client::Client`
/// is not `Send`, and per-call connections keep the backend shareable.
///
/// Every socket read and write is bounded by `timeout`, so a server that
/// accepts the connection but never answers fails the call instead of
/// pinning a blocking-pool thread.
pub struct ElectrumBackend {
    electrum_url: String,
    timeout: Duration,
}

impl ElectrumBackend {
    pub fn new(electrum_url: &str, timeout: Duration) -> Self {
        Self {
            electrum_url: electrum_url.to_string(),
            timeout,
        }
    }

    pub fn electrum_url(&self) -> &str {
        &self.electrum_url
    }

    /// Socket timeout handed to `electrum_client`, which counts whole
    /// seconds in a `u8`. Sub-second values round up to one second.
    pub fn timeout_secs(&self) -> u8 {
        let secs = self.timeout.as_secs() + u64::from(self.timeout.subsec_nanos() > 0);
        secs.clamp(1, u64::from(u8::MAX)) as u8
    }

    fn connect(&self) -> Result<electrum_client::Client> {
        let config = electrum_client::ConfigBuilder::new()
            .timeout(Some(self.timeout_secs()))
            .build();
        electrum_client::Client::from_config(&self.electrum_url, config)
            .map_err(|e| Error::Transport(format!("{}: {e}", self.electrum_url)))
    }
}

impl ChainBackend for ElectrumBackend {
    fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>> {
        use electrum_client::ElectrumApi;

        let client = self.connect()?;
        let entries = client.script_list_unspent(&address.script_pubkey())?;
        Ok(entries
            .into_iter()
            .map(|entry| Utxo {
                txid: entry.tx_hash,
                vout: entry.tx_pos as u32,
                value: entry.value,
                block_height: (entry.height > 0).then_some(entry.height as u32),
            })
            .collect())
    }

    fn broadcast(&self, raw_hex: &str) -> Result<Txid> {
        use electrum_client::ElectrumApi;

        let bytes = hex::decode(raw_hex).map_err(|e| Error::Broadcast(format!("bad hex: {e}")))?;
        let client = self.connect()?;
        client
            .transaction_broadcast_raw(&bytes)
            .map_err(|e| match Error::from(e) {
                Error::Electrum(msg) => Error::Broadcast(msg),
                other => other,
            })
    }

    fn get_raw_transaction_hex(&self, txid: &Txid) -> Result<String> {
        use electrum_client::ElectrumApi;

        let client = self.connect()?;
        let raw = client.transaction_get_raw(txid)?;
        Ok(hex::encode(raw))
    }

    fn tx_status(&self, txid: &Txid) -> Result<TxStatus> {
        use electrum_client::ElectrumApi;

        let client = self.connect()?;
        let raw = client.transaction_get_raw(txid)?;
        let tx: Transaction = bitcoin::consensus::deserialize(&raw)
            .map_err(|e| Error::Query(format!("bad tx {txid}: {e}")))?;

        // Electrum has no per-txid status call; look the tx up in the
        // history of its first output script instead.
        let Some(first) = tx.output.first() else {
            return Ok(TxStatus::default());
        };
        let history = client.script_get_history(&first.script_pubkey)?;
        let Some(entry) = history.iter().find(|h| h.tx_hash == *txid && h.height > 0) else {
            return Ok(TxStatus::default());
        };
        let height = entry.height as u32;
        let header = client.block_header(height as usize)?;
        Ok(TxStatus {
            confirmed: true,
            block_height: Some(height),
            block_time: Some(header.time),
        })
    }

    fn tip(&self) -> Result<ChainTip> {
        use electrum_client::ElectrumApi;

        let client = self.connect()?;
        let notification = client.block_headers_subscribe()?;
        let height = notification.height;
        let start = (height + 1).saturating_sub(MEDIAN_TIME_SPAN);
        let window = client.block_headers(start, height + 1 - start)?;
        let times: Vec<u32> = window.headers.iter().map(|h| h.time).collect();
        let median_time = median_time_past(&times).ok_or_else(|| {
            Error::Query(format!("no headers returned below tip {height}"))
        })?;
        Ok(ChainTip {
            height: height as u32,
            median_time,
        })
    }
}

// ── Esplora ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EsploraUtxo {
    txid: Txid,
    vout: u32,
    value: u64,
    status: TxStatus,
}

#[derive(Deserialize)]
struct EsploraBlock {
    height: u32,
    timestamp: u32,
    #[serde(default)]
    mediantime: Option<u32>,
}

/// Esplora REST backend (blockstream.info, mempool.space, self-hosted).
///
/// A fresh blocking HTTP client is built per call so it is always created
/// and dropped on the blocking thread that uses it.
pub struct EsploraBackend {
    base_url: String,
    timeout: Duration,
}

impl EsploraBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client(&self) -> Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client()?.get(&url).send()?.error_for_status()?;
        Ok(resp)
    }
}

impl ChainBackend for EsploraBackend {
    fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>> {
        let entries: Vec<EsploraUtxo> = self.get(&format!("/address/{address}/utxo"))?.json()?;
        Ok(entries
            .into_iter()
            .map(|entry| Utxo {
                txid: entry.txid,
                vout: entry.vout,
                value: entry.value,
                block_height: entry.status.block_height.filter(|_| entry.status.confirmed),
            })
            .collect())
    }

    fn broadcast(&self, raw_hex: &str) -> Result<Txid> {
        let url = format!("{}/tx", self.base_url);
        let resp = self
            .client()?
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(raw_hex.to_string())
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        if status.is_server_error() {
            return Err(Error::Transport(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(Error::Broadcast(format!("{status}: {body}")));
        }
        body.trim()
            .parse()
            .map_err(|e| Error::Broadcast(format!("bad txid in response: {e}")))
    }

    fn get_raw_transaction_hex(&self, txid: &Txid) -> Result<String> {
        Ok(self.get(&format!("/tx/{txid}/hex"))?.text()?.trim().to_string())
    }

    fn tx_status(&self, txid: &Txid) -> Result<TxStatus> {
        Ok(self.get(&format!("/tx/{txid}/status"))?.json()?)
    }

    fn tip(&self) -> Result<ChainTip> {
        let hash = self.get("/blocks/tip/hash")?.text()?;
        let block: EsploraBlock = self.get(&format!("/block/{}", hash.trim()))?.json()?;
        Ok(ChainTip {
            height: block.height,
            median_time: block.mediantime.unwrap_or(block.timestamp),
        })
    }
}

/// Pick a backend from the endpoint's URL scheme. `timeout` bounds every
/// request the backend makes.
pub fn backend_for_endpoint(endpoint: &str, timeout: Duration) -> Result<Box<dyn ChainBackend>> {
    if endpoint.starts_with("tcp://") || endpoint.starts_with("ssl://") {
        Ok(Box::new(ElectrumBackend::new(endpoint, timeout)))
    } else if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(Box::new(EsploraBackend::new(endpoint, timeout)))
    } else {
        Err(Error::Config(format!("unsupported endpoint scheme: {endpoint}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esplora_utxo_json() {
        let json = r#"[{"txid":"4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b","vout":1,"value":100000,"status":{"confirmed":true,"block_height":123456,"block_hash":"00","block_time":1700000000}}]"#;
        let entries: Vec<EsploraUtxo> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].vout, 1);
        assert_eq!(entries[0].value, 100_000);
        assert_eq!(entries[0].status.block_height, Some(123_456));
    }

    #[test]
    fn esplora_unconfirmed_status_json() {
        let status: TxStatus = serde_json::from_str(r#"{"confirmed":false}"#).unwrap();
        assert!(!status.confirmed);
        assert_eq!(status.block_height, None);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let backend =
            EsploraBackend::new("https://blockstream.info/testnet/api/", Duration::from_secs(1));
        assert_eq!(backend.base_url(), "https://blockstream.info/testnet/api");
    }

    #[test]
    fn endpoint_scheme_selects_backend() {
        let t = Duration::from_secs(1);
        assert!(backend_for_endpoint("ssl://electrum.blockstream.info:60002", t).is_ok());
        assert!(backend_for_endpoint("https://mempool.space/testnet/api", t).is_ok());
        assert!(matches!(
            backend_for_endpoint("ftp://example.com", t),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_transaction("zz").is_err());
        assert!(decode_transaction("00").is_err());
    }

    #[test]
    fn electrum_timeout_is_whole_seconds() {
        let url = "tcp://127.0.0.1:50001";
        assert_eq!(ElectrumBackend::new(url, Duration::from_secs(15)).timeout_secs(), 15);
        assert_eq!(ElectrumBackend::new(url, Duration::from_millis(200)).timeout_secs(), 1);
        assert_eq!(ElectrumBackend::new(url, Duration::from_millis(2_500)).timeout_secs(), 3);
        assert_eq!(ElectrumBackend::new(url, Duration::ZERO).timeout_secs(), 1);
        assert_eq!(ElectrumBackend::new(url, Duration::from_secs(3_600)).timeout_secs(), 255);
    }

    #[test]
    fn silent_electrum_server_times_out() {
        // Accepted by the kernel backlog, never read from or answered.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("tcp://{}", listener.local_addr().unwrap());
        let backend = backend_for_endpoint(&endpoint, Duration::from_secs(1)).unwrap();
        let address = crate::network::Network::Regtest.probe_address();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(backend.get_utxos(&address));
        });
        let result = rx
            .recv_timeout(Duration::from_secs(30))
            .expect("electrum call ignored the configured timeout");
        assert!(result.unwrap_err().is_transport());
        drop(listener);
    }

    #[test]
    fn median_time_past_takes_the_middle_header() {
        let times = [10, 2, 8, 4, 6, 1, 9, 3, 7, 5, 11];
        assert_eq!(median_time_past(&times), Some(6));
        // Near genesis the window is shorter than eleven blocks.
        assert_eq!(median_time_past(&[30, 10, 20]), Some(20));
        assert_eq!(median_time_past(&[]), None);
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn backends_are_send_sync() {
        assert_send_sync::<ElectrumBackend>();
        assert_send_sync::<EsploraBackend>();
    }
}
