//! k-of-n signing policy over a [`KeyRing`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CustodyError, Result};
use crate::keyring::KeyRing;

/// `required` valid signatures out of `total` keys. Always `1 <= required <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThresholdPolicy {
    required: usize,
    total: usize,
}

impl ThresholdPolicy {
    pub fn new(required: usize, total: usize) -> Result<Self> {
        if required == 0 || required > total {
            return Err(CustodyError::InvalidPolicy { required, total });
        }
        Ok(Self { required, total })
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub key_index: u32,
    pub signature: Vec<u8>,
}

/// Ordered `(key_index, signature)` pairs produced for one payload.
///
/// Canonical encoding, entry after entry with no header:
/// `key_index:u32 BE || len:u32 BE || signature`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSet {
    entries: Vec<SignatureEntry>,
}

const ENTRY_HEADER_LEN: usize = 8;

impl SignatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity) }
    }

    pub fn push(&mut self, key_index: u32, signature: Vec<u8>) {
        self.entries.push(SignatureEntry { key_index, signature });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SignatureEntry> {
        self.entries.iter()
    }

    pub fn key_indices(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.key_index).collect()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let size = self
            .entries
            .iter()
            .map(|e| ENTRY_HEADER_LEN + e.signature.len())
            .sum();
        let mut out = Vec::with_capacity(size);
        for entry in &self.entries {
            out.extend_from_slice(&entry.key_index.to_be_bytes());
            out.extend_from_slice(&(entry.signature.len() as u32).to_be_bytes());
            out.extend_from_slice(&entry.signature);
        }
        out
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        let mut set = Self::new();
        while !bytes.is_empty() {
            if bytes.len() < ENTRY_HEADER_LEN {
                return Err(CustodyError::Encoding("truncated signature entry header".into()));
            }
            let (header, rest) = bytes.split_at(ENTRY_HEADER_LEN);
            let key_index = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            if rest.len() < len {
                return Err(CustodyError::Encoding(format!(
                    "signature for key {key_index} declares {len} bytes, {} remain",
                    rest.len()
                )));
            }
            let (signature, rest) = rest.split_at(len);
            set.push(key_index, signature.to_vec());
            bytes = rest;
        }
        Ok(set)
    }
}

impl FromIterator<SignatureEntry> for SignatureSet {
    fn from_iter<I: IntoIterator<Item = SignatureEntry>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a SignatureSet {
    type Item = &'a SignatureEntry;
    type IntoIter = std::slice::Iter<'a, SignatureEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for SignatureSet {
    type Item = SignatureEntry;
    type IntoIter = std::vec::IntoIter<SignatureEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Enforces a [`ThresholdPolicy`] on top of the [`KeyRing`] it governs.
#[derive(Debug)]
pub struct ThresholdSigner {
    policy: ThresholdPolicy,
    keyring: Arc<KeyRing>,
}

impl ThresholdSigner {
    pub fn new(policy: ThresholdPolicy, keyring: Arc<KeyRing>) -> Result<Self> {
        if keyring.len() != policy.total() {
            return Err(CustodyError::InvalidPolicy {
                required: policy.required(),
                total: keyring.len(),
            });
        }
        Ok(Self { policy, keyring })
    }

    /// Generate a ring sized for `policy` and wrap it.
    pub fn generate(policy: ThresholdPolicy) -> Result<Self> {
        let keyring = KeyRing::generate(policy.total())?;
        Self::new(policy, Arc::new(keyring))
    }

    pub fn policy(&self) -> ThresholdPolicy {
        self.policy
    }

    pub fn keyring(&self) -> &KeyRing {
        &self.keyring
    }

    /// Sign `payload` with every key in `key_indices`, preserving their order.
    ///
    /// The quorum count is checked before anything else, so a short request
    /// fails without touching key material.
    pub fn sign(&self, payload: &[u8], key_indices: &[u32]) -> Result<SignatureSet> {
        if key_indices.len() < self.policy.required() {
            warn!(
                required = self.policy.required(),
                provided = key_indices.len(),
                "signing request below quorum"
            );
            return Err(CustodyError::InsufficientSignatures {
                required: self.policy.required(),
                provided: key_indices.len(),
            });
        }
        self.check_indices(key_indices)?;

        let mut set = SignatureSet::with_capacity(key_indices.len());
        for &index in key_indices {
            set.push(index, self.keyring.sign_raw(index, payload)?);
        }
        debug!(signatures = set.len(), "payload signed");
        Ok(set)
    }

    fn check_indices(&self, key_indices: &[u32]) -> Result<()> {
        let mut seen = HashSet::with_capacity(key_indices.len());
        for &index in key_indices {
            if index as usize >= self.policy.total() {
                return Err(CustodyError::IndexOutOfRange { index, total: self.policy.total() });
            }
            if !seen.insert(index) {
                return Err(CustodyError::DuplicateKeyIndex(index));
            }
        }
        Ok(())
    }

    /// `true` iff `signatures` meets quorum with distinct, valid indices and
    /// every signature checks out. Every failure collapses to `false`.
    pub fn verify(&self, payload: &[u8], signatures: &SignatureSet) -> bool {
        if signatures.len() < self.policy.required() {
            return false;
        }
        let mut seen = HashSet::with_capacity(signatures.len());
        let indices_ok = signatures
            .iter()
            .all(|e| (e.key_index as usize) < self.policy.total() && seen.insert(e.key_index));
        if !indices_ok {
            return false;
        }
        signatures
            .iter()
            .all(|e| self.keyring.verify_raw(e.key_index, payload, &e.signature))
    }
}
