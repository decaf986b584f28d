use blake3::Hasher;
use argon2::{Argon2, Params, Version, Algorithm};
use pqcrypto_dilithium::dilithium3::{
    self, DetachedSignature, PublicKey, SecretKey, keypair,
};
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use serde::Deserialize;
use std::sync::atomic::{compiler_fence, Ordering};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};
use anyhow::bail;

use crate::error::{CustodyError, Result};

// Constants for post-quantum crypto primitives ensure type safety and clarity.
pub const DILITHIUM3_SK_BYTES: usize = pqcrypto_dilithium::ffi::PQCLEAN_DILITHIUM3_CLEAN_CRYPTO_SECRETKEYBYTES;
pub const DILITHIUM3_SIG_BYTES: usize = pqcrypto_dilithium::ffi::PQCLEAN_DILITHIUM3_CLEAN_CRYPTO_BYTES;

/// Length of every symmetric key and KDF output in this crate.
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// A 32-byte fingerprint of a public key, derived with BLAKE3.
pub type Fingerprint = [u8; 32];

/// Exclusively-owned Dilithium3 secret key that is wiped when dropped.
///
/// The cell never hands out the key itself; callers only get signatures.
pub(crate) struct SecretKeyCell(SecretKey);

impl SecretKeyCell {
    pub(crate) fn sign(&self, message: &[u8]) -> DetachedSignature {
        dilithium3::detached_sign(message, &self.0)
    }
}

impl Zeroize for SecretKeyCell {
    fn zeroize(&mut self) {
        let zero = [0u8; DILITHIUM3_SK_BYTES];
        if let Ok(blank) = SecretKey::from_bytes(&zero) {
            // SAFETY: `self.0` is a valid, exclusively borrowed `SecretKey` and
            // `blank` is a valid value of the same type.
            unsafe { std::ptr::write_volatile(&mut self.0, blank) };
            compiler_fence(Ordering::SeqCst);
        }
    }
}

impl Drop for SecretKeyCell {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for SecretKeyCell {}

impl std::fmt::Debug for SecretKeyCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKeyCell(<redacted>)")
    }
}

/// Fresh Dilithium3 key pair; the secret half goes straight into a wiping cell.
pub(crate) fn dilithium3_keypair() -> (PublicKey, SecretKeyCell) {
    let (pk, sk) = keypair();
    (pk, SecretKeyCell(sk))
}

/// Verify a detached Dilithium3 signature. Malformed signatures are `false`.
pub fn verify_detached(pk: &PublicKey, message: &[u8], signature: &[u8]) -> bool {
    if signature.len() != DILITHIUM3_SIG_BYTES {
        return false;
    }
    match DetachedSignature::from_bytes(signature) {
        Ok(sig) => dilithium3::verify_detached_signature(&sig, message, pk).is_ok(),
        Err(_) => false,
    }
}

pub fn key_fingerprint(pk: &PublicKey) -> Fingerprint {
    *Hasher::new_derive_key("dash33-custody key-fingerprint v1")
        .update(pk.as_bytes())
        .finalize()
        .as_bytes()
}

/// Argon2id parameters for passphrase-derived wallet keys. Lanes are fixed to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KdfParams {
    #[serde(default = "default_mem")]
    pub mem_kib: u32,
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,
}

/// Upper bounds applied to parameters read back from stored envelopes.
pub const MAX_KDF_MEM_KIB: u32 = 4 * 1024 * 1024;
pub const MAX_KDF_TIME_COST: u32 = 16;

fn default_mem() -> u32 { 65_536 }          // 64 MiB
fn default_time_cost() -> u32 { 3 }

impl Default for KdfParams {
    fn default() -> Self {
        Self { mem_kib: default_mem(), time_cost: default_time_cost() }
    }
}

impl KdfParams {
    pub fn validate(&self) -> Result<()> {
        if self.mem_kib == 0 || self.mem_kib > MAX_KDF_MEM_KIB {
            return Err(CustodyError::Encoding(format!("kdf memory {} KiB out of bounds", self.mem_kib)));
        }
        if self.time_cost == 0 || self.time_cost > MAX_KDF_TIME_COST {
            return Err(CustodyError::Encoding(format!("kdf time cost {} out of bounds", self.time_cost)));
        }
        Ok(())
    }
}

/// Stretch a passphrase into a wallet key with Argon2id.
pub fn derive_wallet_key(
    passphrase: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; SYMMETRIC_KEY_LEN]>> {
    params.validate()?;
    let argon_params = Params::new(params.mem_kib, params.time_cost, 1, Some(SYMMETRIC_KEY_LEN))
        .map_err(|e| CustodyError::Encoding(format!("invalid Argon2id parameters: {e}")))?;
    let mut key = Zeroizing::new([0u8; SYMMETRIC_KEY_LEN]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
        .hash_password_into(passphrase, salt, &mut key[..])
        .map_err(|e| CustodyError::Encoding(format!("Argon2id key derivation failed: {e}")))?;
    Ok(key)
}

/// Obtain the operator pass-phrase for sealed wallet files.
/// Source order:
///   1) DASH33_PASSPHRASE env var
///   2) Interactive prompt
/// Non-interactive without env returns an error.
pub fn obtain_passphrase(prompt: &str) -> anyhow::Result<Zeroizing<String>> {
    if let Ok(val) = std::env::var("DASH33_PASSPHRASE") {
        return Ok(Zeroizing::new(val));
    }
    if atty::is(atty::Stream::Stdin) {
        let pw = rpassword::prompt_password(prompt)?;
        return Ok(Zeroizing::new(pw));
    }
    bail!("DASH33_PASSPHRASE is required in non-interactive mode")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroize_blanks_the_secret() {
        let (_pk, mut cell) = dilithium3_keypair();
        assert!(cell.0.as_bytes().iter().any(|b| *b != 0));
        cell.zeroize();
        assert!(cell.0.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn fingerprint_is_stable_per_key() {
        let (pk_a, _) = dilithium3_keypair();
        let (pk_b, _) = dilithium3_keypair();
        assert_eq!(key_fingerprint(&pk_a), key_fingerprint(&pk_a));
        assert_ne!(key_fingerprint(&pk_a), key_fingerprint(&pk_b));
    }

    #[test]
    fn kdf_bounds_are_enforced() {
        assert!(KdfParams { mem_kib: 0, time_cost: 1 }.validate().is_err());
        assert!(KdfParams { mem_kib: 1024, time_cost: MAX_KDF_TIME_COST + 1 }.validate().is_err());
        assert!(KdfParams::default().validate().is_ok());
    }

    #[test]
    fn derived_key_depends_on_salt() {
        let params = KdfParams { mem_kib: 1024, time_cost: 1 };
        let a = derive_wallet_key(b"hunter2", b"salt-one-16bytes", &params).unwrap();
        let b = derive_wallet_key(b"hunter2", b"salt-two-16bytes", &params).unwrap();
        let again = derive_wallet_key(b"hunter2", b"salt-one-16bytes", &params).unwrap();
        assert_ne!(*a, *b);
        assert_eq!(*a, *again);
    }
}
