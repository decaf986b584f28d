//! Ownership boundary for a wallet's signing keys.
//!
//! A [`KeyRing`] holds `n` Dilithium3 key pairs at fixed indices `0..n`.
//! Secret halves never leave the ring: each one sits in its own mutex-guarded
//! wiping cell, so concurrent signers only contend when they ask for the same
//! index. Public keys are immutable and read without locking.

use std::fmt;
use std::sync::Mutex;

use pqcrypto_dilithium::dilithium3::PublicKey;
use pqcrypto_traits::sign::DetachedSignature as _;
use tracing::debug;

use crate::crypto::{self, Fingerprint, SecretKeyCell};
use crate::error::{CustodyError, Result};

/// Upper bound on keys per ring.
pub const MAX_KEYS: usize = 64;

struct KeyPair {
    public: PublicKey,
    secret: Mutex<SecretKeyCell>,
}

pub struct KeyRing {
    pairs: Vec<KeyPair>,
}

impl KeyRing {
    /// Generate `total` fresh key pairs.
    ///
    /// This is CPU-bound; keep it off latency-sensitive threads
    /// (see [`crate::service::WalletService::create_async`]).
    pub fn generate(total: usize) -> Result<Self> {
        if total == 0 || total > MAX_KEYS {
            return Err(CustodyError::KeyGeneration(format!(
                "key count must be between 1 and {MAX_KEYS}, got {total}"
            )));
        }
        let pairs = (0..total)
            .map(|_| {
                let (public, secret) = crypto::dilithium3_keypair();
                KeyPair { public, secret: Mutex::new(secret) }
            })
            .collect();
        debug!(total, "generated key ring");
        Ok(Self { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn pair(&self, index: u32) -> Result<&KeyPair> {
        self.pairs
            .get(index as usize)
            .ok_or(CustodyError::IndexOutOfRange { index, total: self.pairs.len() })
    }

    pub fn public_key(&self, index: u32) -> Result<PublicKey> {
        Ok(self.pair(index)?.public.clone())
    }

    /// Public keys in index order.
    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.pairs.iter().map(|p| p.public.clone()).collect()
    }

    pub fn fingerprint(&self, index: u32) -> Result<Fingerprint> {
        Ok(crypto::key_fingerprint(&self.pair(index)?.public))
    }

    /// Sign `payload` with the secret key at `index`, returning the detached signature bytes.
    pub fn sign_raw(&self, index: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let pair = self.pair(index)?;
        if payload.is_empty() {
            return Err(CustodyError::Signing("payload is empty".into()));
        }
        let signature = {
            let secret = pair
                .secret
                .lock()
                .map_err(|_| CustodyError::Signing(format!("secret key {index} is unavailable")))?;
            secret.sign(payload)
        };
        Ok(signature.as_bytes().to_vec())
    }

    /// Check `signature` over `payload` against the public key at `index`.
    /// Out-of-range indices and malformed signatures are simply `false`.
    pub fn verify_raw(&self, index: u32, payload: &[u8], signature: &[u8]) -> bool {
        match self.pairs.get(index as usize) {
            Some(pair) => crypto::verify_detached(&pair.public, payload, signature),
            None => false,
        }
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fingerprints: Vec<String> = self
            .pairs
            .iter()
            .map(|p| hex::encode(&crypto::key_fingerprint(&p.public)[..8]))
            .collect();
        f.debug_struct("KeyRing")
            .field("fingerprints", &fingerprints)
            .finish_non_exhaustive()
    }
}
