use bitcoin::secp256k1::PublicKey as SecpPublicKey;
use bitcoin::{Address, CompressedPublicKey};
use serde::{Deserialize, Serialize};

/// Compressed encoding of the secp256k1 generator point. Its P2WPKH address
/// is a valid, well-known address on every network, which makes it a cheap
/// read target for endpoint health probes.
const GENERATOR_PUBKEY: [u8; 33] = [
    0x02, 0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac, 0x55, 0xa0, 0x62, 0x95, 0xce, 0x87,
    0x0b, 0x07, 0x02, 0x9b, 0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9, 0x59, 0xf2, 0x81, 0x5b, 0x16,
    0xf8, 0x17, 0x98,
];

/// Bitcoin networks the swap engine can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl Network {
    pub fn into_bitcoin(self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }

    pub fn is_mainnet(self) -> bool {
        matches!(self, Network::Mainnet)
    }

    pub fn default_electrum_url(self) -> &'static str {
        match self {
            Network::Mainnet => "ssl://electrum.blockstream.info:50002",
            Network::Testnet => "ssl://electrum.blockstream.info:60002",
            Network::Signet => "ssl://mempool.space:60602",
            Network::Regtest => "tcp://localhost:50001",
        }
    }

    pub fn esplora_url(self) -> &'static str {
        match self {
            Network::Mainnet => "https://blockstream.info/api",
            Network::Testnet => "https://blockstream.info/testnet/api",
            Network::Signet => "https://mempool.space/signet/api",
            Network::Regtest => "http://localhost:3000",
        }
    }

    /// Ordered endpoint list used when the configuration does not name any.
    /// Esplora instances first, Electrum last.
    pub fn default_endpoints(self) -> Vec<String> {
        let mut endpoints = vec![self.esplora_url().to_string()];
        match self {
            Network::Mainnet => endpoints.push("https://mempool.space/api".to_string()),
            Network::Testnet => endpoints.push("https://mempool.space/testnet/api".to_string()),
            Network::Signet | Network::Regtest => {}
        }
        endpoints.push(self.default_electrum_url().to_string());
        endpoints
    }

    /// Address used to probe endpoint health.
    pub fn probe_address(self) -> Address {
        // The generator point is a valid curve point; parsing cannot fail.
        let key = SecpPublicKey::from_slice(&GENERATOR_PUBKEY)
            .map(CompressedPublicKey)
            .unwrap_or_else(|_| unreachable!("generator point is a valid public key"));
        Address::p2wpkh(&key, self.into_bitcoin())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "bitcoin" => Ok(Network::Mainnet),
            "testnet" | "testnet3" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(format!("invalid network: {}", s)),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
