// Wallet custody core for the dash33 dashboard
// k-of-n threshold signing, at-rest encryption of wallet state, and per-identity rate limiting

pub mod config;
pub mod crypto;
pub mod error;
pub mod keyring;
pub mod threshold;
pub mod cipher;
pub mod rate_guard;
pub mod service;

pub use cipher::{EncryptedBlob, SymmetricKey, WalletCipher};
pub use error::{CustodyError, ErrorClass};
pub use keyring::KeyRing;
pub use rate_guard::{RateDecision, RateGuard};
pub use service::{ProvisionedWallet, WalletHandle, WalletId, WalletService};
pub use threshold::{SignatureSet, ThresholdPolicy, ThresholdSigner};

pub use pqcrypto_dilithium::dilithium3::PublicKey;
