//! At-rest encryption of wallet state.
//!
//! Blob layout: `algorithm_tag (1) || nonce (24) || ciphertext+tag`.
//! The algorithm tag is bound as associated data, so flipping any bit of an
//! encoded blob makes decryption fail.

use std::fmt;

use bincode::Options;
use chacha20poly1305::{aead::{Aead, NewAead, Payload}, XChaCha20Poly1305, Key, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;
use zeroize::Zeroizing;

use crate::crypto::{self, KdfParams, SYMMETRIC_KEY_LEN};
use crate::error::{CustodyError, Result};

pub const NONCE_LEN: usize = 24;
const AEAD_TAG_LEN: usize = 16;
const BLOB_HEADER_LEN: usize = 1 + NONCE_LEN;

// Structured wallet state is capped well above any realistic wallet.
const STATE_LIMIT: u64 = 16 * 1024 * 1024;

const ENVELOPE_MAGIC: &[u8; 4] = b"D33P";
const ENVELOPE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const ENVELOPE_HEADER_LEN: usize = 4 + 1 + SALT_LEN + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CipherAlgorithm {
    XChaCha20Poly1305 = 1,
}

impl CipherAlgorithm {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::XChaCha20Poly1305),
            _ => None,
        }
    }
}

/// 256-bit wallet encryption key, wiped on drop.
///
/// Deliberately not `Clone`: a generated key is handed to the caller once.
pub struct SymmetricKey(Zeroizing<[u8; SYMMETRIC_KEY_LEN]>);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SYMMETRIC_KEY_LEN {
            return Err(CustodyError::Encoding(format!(
                "symmetric key must be {SYMMETRIC_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LEN] {
        &self.0
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self(Zeroizing::new(*self.0))
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Authenticated ciphertext plus what is needed to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    algorithm: CipherAlgorithm,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOB_HEADER_LEN + self.ciphertext.len());
        out.push(self.algorithm.tag());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Malformed input is reported as [`CustodyError::Decryption`]: it is a corrupted blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BLOB_HEADER_LEN + AEAD_TAG_LEN {
            return Err(CustodyError::Decryption);
        }
        let algorithm = CipherAlgorithm::from_tag(bytes[0]).ok_or(CustodyError::Decryption)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[1..BLOB_HEADER_LEN]);
        Ok(Self { algorithm, nonce, ciphertext: bytes[BLOB_HEADER_LEN..].to_vec() })
    }
}

/// Encrypts and decrypts wallet state under one key. Holds no other state,
/// so a shared reference can be used from any number of threads.
pub struct WalletCipher {
    key: SymmetricKey,
}

impl WalletCipher {
    /// Build a cipher around `key`, or around a fresh key when `None`.
    ///
    /// A fresh key is returned alongside the cipher; that is the only time it
    /// is exposed, and storing it durably is the caller's job.
    pub fn new(key: Option<SymmetricKey>) -> (Self, Option<SymmetricKey>) {
        match key {
            Some(key) => (Self { key }, None),
            None => {
                let key = SymmetricKey::generate();
                let exposed = key.duplicate();
                (Self { key }, Some(exposed))
            }
        }
    }

    pub fn with_key(key: SymmetricKey) -> Self {
        Self { key }
    }

    fn aead(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(self.key.as_bytes()))
    }

    /// Encrypt under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let algorithm = CipherAlgorithm::XChaCha20Poly1305;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .aead()
            .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: &[algorithm.tag()] })
            .map_err(|e| CustodyError::Encoding(format!("failed to encrypt wallet state: {e}")))?;
        Ok(EncryptedBlob { algorithm, nonce, ciphertext })
    }

    /// Decrypt and authenticate. Nothing is returned unless the tag verifies.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        match blob.algorithm {
            CipherAlgorithm::XChaCha20Poly1305 => self
                .aead()
                .decrypt(
                    XNonce::from_slice(&blob.nonce),
                    Payload { msg: &blob.ciphertext, aad: &[blob.algorithm.tag()] },
                )
                .map_err(|_| {
                    warn!("wallet blob failed authentication");
                    CustodyError::Decryption
                }),
        }
    }

    /// Encode `value` with a fixed schema and encrypt it.
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<EncryptedBlob> {
        let encoded = Zeroizing::new(
            state_codec()
                .serialize(value)
                .map_err(|e| CustodyError::Encoding(format!("failed to encode wallet state: {e}")))?,
        );
        self.encrypt(&encoded)
    }

    /// Decrypt and decode into `T`. Bytes that do not match `T` exactly are an
    /// [`CustodyError::Encoding`] error; they are never interpreted otherwise.
    pub fn open<T: DeserializeOwned>(&self, blob: &EncryptedBlob) -> Result<T> {
        let plaintext = Zeroizing::new(self.decrypt(blob)?);
        state_codec()
            .deserialize(&plaintext)
            .map_err(|e| CustodyError::Encoding(format!("wallet state does not match schema: {e}")))
    }
}

impl fmt::Debug for WalletCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletCipher").finish_non_exhaustive()
    }
}

fn state_codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(STATE_LIMIT)
        .reject_trailing_bytes()
}

/// Encrypt `plaintext` under a key stretched from `passphrase`.
///
/// Layout: `"D33P" || version || salt (16) || mem_kib:u32 BE || time_cost:u32 BE || blob`.
pub fn seal_with_passphrase(passphrase: &[u8], plaintext: &[u8], params: &KdfParams) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = crypto::derive_wallet_key(passphrase, &salt, params)?;
    let blob = WalletCipher::with_key(SymmetricKey(key)).encrypt(plaintext)?;

    let blob_bytes = blob.to_bytes();
    let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + blob_bytes.len());
    out.extend_from_slice(ENVELOPE_MAGIC);
    out.push(ENVELOPE_VERSION);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&params.mem_kib.to_be_bytes());
    out.extend_from_slice(&params.time_cost.to_be_bytes());
    out.extend_from_slice(&blob_bytes);
    Ok(out)
}

/// Reverse of [`seal_with_passphrase`]. A wrong passphrase, a corrupted
/// envelope and out-of-bounds KDF parameters all fail with `Decryption`.
pub fn open_with_passphrase(passphrase: &[u8], envelope: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() < ENVELOPE_HEADER_LEN || &envelope[..4] != ENVELOPE_MAGIC {
        return Err(CustodyError::Decryption);
    }
    if envelope[4] != ENVELOPE_VERSION {
        return Err(CustodyError::Decryption);
    }
    let salt = &envelope[5..5 + SALT_LEN];
    let read_u32 = |at: usize| u32::from_be_bytes([envelope[at], envelope[at + 1], envelope[at + 2], envelope[at + 3]]);
    let params = KdfParams {
        mem_kib: read_u32(5 + SALT_LEN),
        time_cost: read_u32(9 + SALT_LEN),
    };
    let blob = EncryptedBlob::from_bytes(&envelope[ENVELOPE_HEADER_LEN..])?;
    let key = crypto::derive_wallet_key(passphrase, salt, &params).map_err(|_| CustodyError::Decryption)?;
    WalletCipher::with_key(SymmetricKey(key)).decrypt(&blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provided_key_is_not_echoed_back() {
        let (_cipher, exposed) = WalletCipher::new(Some(SymmetricKey::generate()));
        assert!(exposed.is_none());
    }

    #[test]
    fn generated_key_opens_what_the_cipher_sealed() {
        let (cipher, exposed) = WalletCipher::new(None);
        let key = exposed.expect("fresh key is exposed once");
        let blob = cipher.encrypt(b"utxo set").unwrap();
        let reopened = WalletCipher::with_key(key);
        assert_eq!(reopened.decrypt(&blob).unwrap(), b"utxo set");
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = SymmetricKey::from_bytes(&[0x5a; 32]).unwrap();
        let shown = format!("{key:?}");
        assert!(!shown.contains("5a"));
        assert!(!shown.contains("90"));
    }

    #[test]
    fn unknown_algorithm_tag_is_corruption() {
        let mut bytes = vec![9u8];
        bytes.extend_from_slice(&[0u8; NONCE_LEN + AEAD_TAG_LEN]);
        assert!(matches!(EncryptedBlob::from_bytes(&bytes), Err(CustodyError::Decryption)));
    }
}
