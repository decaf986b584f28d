//! Wallet custody service: the contract the dashboard/API layer talks to.
//!
//! Each wallet binds a [`ThresholdSigner`] (and its [`KeyRing`]) to a
//! [`WalletCipher`]. Wallets live in a bounded table owned by the service;
//! a full table refuses new wallets rather than dropping keys.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use blake3::Hasher;
use pqcrypto_dilithium::dilithium3::PublicKey;
use pqcrypto_traits::sign::PublicKey as _;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::cipher::{EncryptedBlob, SymmetricKey, WalletCipher};
use crate::config::{self, Config};
use crate::error::{CustodyError, Result};
use crate::keyring::KeyRing;
use crate::rate_guard::{RateDecision, RateGuard};
use crate::threshold::{SignatureSet, ThresholdPolicy, ThresholdSigner};

/// 32-byte wallet identifier, shown as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletId([u8; 32]);

impl WalletId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Digest of the policy and every public key, in index order.
    fn derive(policy: ThresholdPolicy, keyring: &KeyRing) -> Self {
        let mut hasher = Hasher::new_derive_key("dash33-custody wallet-id v1");
        hasher.update(&(policy.required() as u32).to_be_bytes());
        hasher.update(&(policy.total() as u32).to_be_bytes());
        for pk in keyring.public_keys() {
            hasher.update(pk.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletId({self})")
    }
}

impl FromStr for WalletId {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| CustodyError::Encoding(format!("invalid wallet id: {e}")))?;
        Ok(Self(bytes))
    }
}

/// What callers hold to address a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalletHandle {
    pub id: WalletId,
    pub policy: ThresholdPolicy,
}

/// Result of [`WalletService::create`]. `storage_key` is not retained in any
/// readable form by the service; persist it or lose access to stored blobs
/// after a restart.
#[derive(Debug)]
pub struct ProvisionedWallet {
    pub handle: WalletHandle,
    pub storage_key: SymmetricKey,
}

struct ManagedWallet {
    signer: ThresholdSigner,
    cipher: WalletCipher,
}

pub struct WalletService {
    wallets: RwLock<HashMap<WalletId, Arc<ManagedWallet>>>,
    settings: config::Wallets,
    rate_guard: RateGuard,
}

impl WalletService {
    pub fn new(cfg: &Config) -> Self {
        Self::with_rate_guard(&cfg.wallets, RateGuard::new(&cfg.rate_guard))
    }

    pub fn with_rate_guard(settings: &config::Wallets, rate_guard: RateGuard) -> Self {
        Self {
            wallets: RwLock::new(HashMap::new()),
            settings: settings.clone(),
            rate_guard,
        }
    }

    /// Provision a fresh key ring and storage key for `policy`.
    pub fn create(&self, policy: ThresholdPolicy) -> Result<ProvisionedWallet> {
        let (cipher, storage_key) = WalletCipher::new(None);
        let storage_key = storage_key
            .ok_or_else(|| CustodyError::KeyGeneration("storage key was not generated".into()))?;
        let handle = self.provision(policy, cipher)?;
        Ok(ProvisionedWallet { handle, storage_key })
    }

    /// Provision a fresh key ring whose stored state is sealed under `storage_key`.
    pub fn create_with_storage_key(&self, policy: ThresholdPolicy, storage_key: SymmetricKey) -> Result<WalletHandle> {
        self.provision(policy, WalletCipher::with_key(storage_key))
    }

    /// [`create`](Self::create) on tokio's blocking pool; key generation is CPU-bound.
    pub async fn create_async(self: Arc<Self>, policy: ThresholdPolicy) -> Result<ProvisionedWallet> {
        tokio::task::spawn_blocking(move || self.create(policy))
            .await
            .map_err(|e| CustodyError::KeyGeneration(format!("key generation task failed: {e}")))?
    }

    fn provision(&self, policy: ThresholdPolicy, cipher: WalletCipher) -> Result<WalletHandle> {
        if policy.total() > self.settings.max_keys_per_wallet {
            return Err(CustodyError::InvalidPolicy { required: policy.required(), total: policy.total() });
        }
        // Cheap refusal before spending CPU on key generation.
        if self.len() >= self.settings.max_wallets {
            return Err(CustodyError::WalletCapacityExceeded(self.settings.max_wallets));
        }

        let signer = ThresholdSigner::generate(policy)?;
        let id = WalletId::derive(policy, signer.keyring());

        let mut wallets = self.wallets.write().unwrap_or_else(PoisonError::into_inner);
        if wallets.len() >= self.settings.max_wallets {
            return Err(CustodyError::WalletCapacityExceeded(self.settings.max_wallets));
        }
        wallets.insert(id, Arc::new(ManagedWallet { signer, cipher }));
        info!(wallet = %id, required = policy.required(), total = policy.total(), "wallet created");
        Ok(WalletHandle { id, policy })
    }

    fn wallet(&self, handle: &WalletHandle) -> Result<Arc<ManagedWallet>> {
        self.wallets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.id)
            .cloned()
            .ok_or(CustodyError::UnknownWallet(handle.id))
    }

    /// Resolve an id (e.g. parsed from a request path) to a handle.
    pub fn handle(&self, id: &WalletId) -> Result<WalletHandle> {
        let wallets = self.wallets.read().unwrap_or_else(PoisonError::into_inner);
        let wallet = wallets.get(id).ok_or(CustodyError::UnknownWallet(*id))?;
        Ok(WalletHandle { id: *id, policy: wallet.signer.policy() })
    }

    pub fn sign(&self, handle: &WalletHandle, payload: &[u8], key_indices: &[u32]) -> Result<SignatureSet> {
        let wallet = self.wallet(handle)?;
        wallet.signer.sign(payload, key_indices).map_err(|e| {
            warn!(wallet = %handle.id, code = e.code(), "signing request rejected");
            e
        })
    }

    pub fn verify(&self, handle: &WalletHandle, payload: &[u8], signatures: &SignatureSet) -> bool {
        match self.wallet(handle) {
            Ok(wallet) => wallet.signer.verify(payload, signatures),
            Err(_) => false,
        }
    }

    pub fn store(&self, handle: &WalletHandle, plaintext: &[u8]) -> Result<EncryptedBlob> {
        self.wallet(handle)?.cipher.encrypt(plaintext)
    }

    pub fn load(&self, handle: &WalletHandle, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        self.wallet(handle)?.cipher.decrypt(blob)
    }

    pub fn store_state<T: Serialize>(&self, handle: &WalletHandle, state: &T) -> Result<EncryptedBlob> {
        self.wallet(handle)?.cipher.seal(state)
    }

    pub fn load_state<T: DeserializeOwned>(&self, handle: &WalletHandle, blob: &EncryptedBlob) -> Result<T> {
        self.wallet(handle)?.cipher.open(blob)
    }

    /// Admission check the HTTP layer runs before any signing or storage route.
    pub fn guard(&self, identity: &str) -> RateDecision {
        self.rate_guard.check(identity)
    }

    pub fn rate_guard(&self) -> &RateGuard {
        &self.rate_guard
    }

    pub fn public_keys(&self, handle: &WalletHandle) -> Result<Vec<PublicKey>> {
        Ok(self.wallet(handle)?.signer.keyring().public_keys())
    }

    /// Forget a wallet. Its keys are wiped once in-flight calls release it.
    pub fn remove(&self, handle: &WalletHandle) -> bool {
        let removed = self
            .wallets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.id)
            .is_some();
        if removed {
            info!(wallet = %handle.id, "wallet removed");
        } else {
            debug!(wallet = %handle.id, "remove requested for unknown wallet");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.wallets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for WalletService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletService")
            .field("wallets", &self.len())
            .field("settings", &self.settings)
            .field("rate_guard", &self.rate_guard)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_id_hex_round_trip() {
        let id = WalletId::from_bytes([0xab; 32]);
        let text = id.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<WalletId>().unwrap(), id);
        assert!("not-hex".parse::<WalletId>().is_err());
    }
}
