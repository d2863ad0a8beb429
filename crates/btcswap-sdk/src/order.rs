use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// The 32-byte swap preimage. Zeroized on drop; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidSecret(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| Error::InvalidSecret(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding of the preimage. Only call this at the reveal point.
    pub fn reveal_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn hash_lock(&self) -> HashLock {
        HashLock::from_preimage(&self.0)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Both digests of the secret: SHA-256 locks the Bitcoin HTLC, Keccak-256
/// locks the EVM escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashLock {
    pub sha256: [u8; 32],
    pub keccak256: [u8; 32],
}

impl HashLock {
    pub fn from_preimage(preimage: &[u8]) -> Self {
        Self {
            sha256: Sha256::digest(preimage).into(),
            keccak256: Keccak256::digest(preimage).into(),
        }
    }

    /// True when `preimage` hashes to the SHA-256 lock.
    pub fn matches(&self, preimage: &[u8]) -> bool {
        let digest: [u8; 32] = Sha256::digest(preimage).into();
        digest == self.sha256
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }

    /// `0x`-prefixed, the way EVM tooling expects a bytes32.
    pub fn keccak256_hex(&self) -> String {
        format!("0x{}", hex::encode(self.keccak256))
    }
}

/// A swap order: secret material plus the amounts on both legs.
#[derive(Debug, Clone)]
pub struct SwapOrder {
    /// Random uniqueness tag embedded in the HTLC script.
    pub order_hash: [u8; 32],
    pub secret: Secret,
    pub hash_lock: HashLock,
    /// Satoshis locked on the Bitcoin leg.
    pub making_amount: u64,
    /// Base units of the EVM asset released on settlement.
    pub taking_amount: u128,
    pub src_chain_id: Option<u64>,
    pub dst_chain_id: Option<u64>,
}

impl SwapOrder {
    /// Generate fresh secret, hashlock and order hash. Pure; no I/O.
    pub fn create(making_amount: u64, taking_amount: u128) -> Self {
        let secret = Secret::generate();
        let hash_lock = secret.hash_lock();
        let mut order_hash = [0u8; 32];
        thread_rng().fill_bytes(&mut order_hash);
        Self {
            order_hash,
            secret,
            hash_lock,
            making_amount,
            taking_amount,
            src_chain_id: None,
            dst_chain_id: None,
        }
    }

    pub fn with_chain_ids(mut self, src: Option<u64>, dst: Option<u64>) -> Self {
        self.src_chain_id = src;
        self.dst_chain_id = dst;
        self
    }

    pub fn order_hash_hex(&self) -> String {
        hex::encode(self.order_hash)
    }
}

/// Swap ids look like `swap_<unix millis>_<8 hex chars>`.
pub fn generate_swap_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let mut tag = [0u8; 4];
    thread_rng().fill_bytes(&mut tag);
    format!("swap_{millis}_{}", hex::encode(tag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_lock_digests() {
        // sha256("") and keccak256("") reference vectors
        let lock = HashLock::from_preimage(b"");
        assert_eq!(
            lock.sha256_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            lock.keccak256_hex(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn secret_matches_its_lock() {
        let secret = Secret::generate();
        let lock = secret.hash_lock();
        assert!(lock.matches(secret.as_bytes()));
        assert!(!lock.matches(&[0u8; 32]));
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::from_bytes([0xab; 32]);
        let printed = format!("{secret:?}");
        assert!(!printed.contains("ab"));
    }

    #[test]
    fn secret_hex_roundtrip() {
        let secret = Secret::from_bytes([0x11; 32]);
        let parsed = Secret::from_hex(&secret.reveal_hex()).unwrap();
        assert_eq!(parsed, secret);
        assert!(Secret::from_hex("abcd").is_err());
    }

    #[test]
    fn orders_are_unique() {
        let a = SwapOrder::create(100_000, 1_000_000);
        let b = SwapOrder::create(100_000, 1_000_000);
        assert_ne!(a.order_hash, b.order_hash);
        assert_ne!(a.hash_lock, b.hash_lock);
        assert_eq!(a.hash_lock, a.secret.hash_lock());
    }

    #[test]
    fn swap_id_shape() {
        let id = generate_swap_id();
        assert!(id.starts_with("swap_"));
        assert_eq!(id.split('_').count(), 3);
    }
}
