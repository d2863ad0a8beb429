//! `swap_config.json`: the host's on-disk form of [`SwapConfig`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use btcswap_sdk::{Network, NetworkMode, SwapConfig};

use crate::error::{Result, ServiceError};

pub const CONFIG_FILE: &str = "swap_config.json";

/// Serialized config. Durations are whole seconds; missing fields take the
/// network's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_endpoints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<NetworkMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_fallback: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funding_fee_sats: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_fee_sats: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_wait_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_backoff_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated_utxo_sats: Option<u64>,
}

impl From<&SwapConfig> for ConfigFile {
    fn from(c: &SwapConfig) -> Self {
        Self {
            network: c.network,
            rpc_endpoints: Some(c.rpc_endpoints.clone()),
            network_mode: Some(c.network_mode),
            simulation_fallback: Some(c.simulation_fallback),
            funding_fee_sats: Some(c.funding_fee_sats),
            spend_fee_sats: Some(c.spend_fee_sats),
            poll_interval_secs: Some(c.poll_interval.as_secs()),
            max_attempts: Some(c.max_attempts),
            manual_wait_timeout_secs: Some(c.manual_wait_timeout.as_secs()),
            confirmation_timeout_secs: Some(c.confirmation_timeout.as_secs()),
            confirmation_poll_interval_secs: Some(c.confirmation_poll_interval.as_secs()),
            probe_backoff_secs: Some(c.probe_backoff.as_secs()),
            request_timeout_secs: Some(c.request_timeout.as_secs()),
            probe_address: c.probe_address.clone(),
            simulated_utxo_sats: Some(c.simulated_utxo_sats),
        }
    }
}

impl ConfigFile {
    /// Overlay the file onto the network defaults and validate the result.
    pub fn into_config(self) -> Result<SwapConfig> {
        let mut c = SwapConfig::new(self.network);
        let secs = Duration::from_secs;
        if let Some(v) = self.rpc_endpoints {
            c.rpc_endpoints = v;
        }
        if let Some(v) = self.network_mode {
            c.network_mode = v;
        }
        if let Some(v) = self.simulation_fallback {
            c.simulation_fallback = v;
        }
        if let Some(v) = self.funding_fee_sats {
            c.funding_fee_sats = v;
        }
        if let Some(v) = self.spend_fee_sats {
            c.spend_fee_sats = v;
        }
        if let Some(v) = self.poll_interval_secs {
            c.poll_interval = secs(v);
        }
        if let Some(v) = self.max_attempts {
            c.max_attempts = v;
        }
        if let Some(v) = self.manual_wait_timeout_secs {
            c.manual_wait_timeout = secs(v);
        }
        if let Some(v) = self.confirmation_timeout_secs {
            c.confirmation_timeout = secs(v);
        }
        if let Some(v) = self.confirmation_poll_interval_secs {
            c.confirmation_poll_interval = secs(v);
        }
        if let Some(v) = self.probe_backoff_secs {
            c.probe_backoff = secs(v);
        }
        if let Some(v) = self.request_timeout_secs {
            c.request_timeout = secs(v);
        }
        if self.probe_address.is_some() {
            c.probe_address = self.probe_address;
        }
        if let Some(v) = self.simulated_utxo_sats {
            c.simulated_utxo_sats = v;
        }
        c.validate()?;
        Ok(c)
    }
}

/// Load `swap_config.json` from `dir`. `Ok(None)` when the file does not exist.
pub fn load_config(dir: &Path) -> Result<Option<SwapConfig>> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)?;
    let file: ConfigFile = serde_json::from_str(&contents)
        .map_err(|e| ServiceError::Config(format!("{}: {e}", path.display())))?;
    file.into_config().map(Some)
}

pub fn save_config(dir: &Path, config: &SwapConfig) -> Result<()> {
    fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(&ConfigFile::from(config))?;
    fs::write(dir.join(CONFIG_FILE), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_file_takes_defaults() {
        let file: ConfigFile =
            serde_json::from_str(r#"{"network":"regtest","pollIntervalSecs":2}"#).unwrap();
        let config = file.into_config().unwrap();
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.max_attempts, 20);
        assert_eq!(config.rpc_endpoints, Network::Regtest.default_endpoints());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let file: ConfigFile = serde_json::from_str(
            r#"{"network":"testnet","networkMode":"live","rpcEndpoints":[]}"#,
        )
        .unwrap();
        assert!(matches!(
            file.into_config(),
            Err(ServiceError::Sdk(btcswap_sdk::Error::Config(_)))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(dir.path()).unwrap().is_none());

        let mut config = SwapConfig::simulated(Network::Signet);
        config.max_attempts = 7;
        config.manual_wait_timeout = Duration::from_secs(42);
        save_config(dir.path(), &config).unwrap();

        let loaded = load_config(dir.path()).unwrap().unwrap();
        assert_eq!(ConfigFile::from(&loaded), ConfigFile::from(&config));
    }

    #[test]
    fn garbage_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        assert!(matches!(
            load_config(dir.path()),
            Err(ServiceError::Config(_))
        ));
    }
}
