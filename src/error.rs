//! Error taxonomy for the custody core.
//!
//! Every fallible operation returns [`CustodyError`]. The HTTP layer maps
//! [`CustodyError::code`] to a status and stable error code; operational
//! logging groups errors by [`CustodyError::class`].

use std::time::Duration;

use thiserror::Error;

use crate::service::WalletId;

pub type Result<T, E = CustodyError> = std::result::Result<T, E>;

/// Who is most likely responsible for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Caller or operator mistake: bad index, bad policy, unknown wallet.
    Configuration,
    /// Activity that looks like probing or abuse.
    Adversarial,
    /// The runtime environment or stored data failed us.
    Environment,
}

#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key index {index} out of range for a ring of {total} keys")]
    IndexOutOfRange { index: u32, total: usize },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("insufficient signatures: {provided} provided, {required} required")]
    InsufficientSignatures { required: usize, provided: usize },

    #[error("key index {0} appears more than once")]
    DuplicateKeyIndex(u32),

    #[error("encoding error: {0}")]
    Encoding(String),

    // No detail on purpose: tag mismatch, wrong key and corruption look alike.
    #[error("decryption failed")]
    Decryption,

    #[error("rate limit exceeded for {identity}; retry in {}s", retry_after.as_secs())]
    RateLimitExceeded { identity: String, retry_after: Duration },

    #[error("invalid threshold policy: {required}-of-{total}")]
    InvalidPolicy { required: usize, total: usize },

    #[error("unknown wallet {0}")]
    UnknownWallet(WalletId),

    #[error("wallet table is full ({0} wallets)")]
    WalletCapacityExceeded(usize),
}

impl CustodyError {
    /// Stable machine-readable code. Never changes once published.
    pub fn code(&self) -> &'static str {
        match self {
            Self::KeyGeneration(_) => "KEY_GENERATION_ERROR",
            Self::IndexOutOfRange { .. } => "INDEX_OUT_OF_RANGE",
            Self::Signing(_) => "SIGNING_ERROR",
            Self::InsufficientSignatures { .. } => "INSUFFICIENT_SIGNATURES",
            Self::DuplicateKeyIndex(_) => "DUPLICATE_KEY_INDEX",
            Self::Encoding(_) => "ENCODING_ERROR",
            Self::Decryption => "DECRYPTION_ERROR",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::InvalidPolicy { .. } => "INVALID_POLICY",
            Self::UnknownWallet(_) => "UNKNOWN_WALLET",
            Self::WalletCapacityExceeded(_) => "WALLET_CAPACITY_EXCEEDED",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::IndexOutOfRange { .. }
            | Self::InvalidPolicy { .. }
            | Self::UnknownWallet(_)
            | Self::WalletCapacityExceeded(_) => ErrorClass::Configuration,
            Self::InsufficientSignatures { .. }
            | Self::DuplicateKeyIndex(_)
            | Self::RateLimitExceeded { .. } => ErrorClass::Adversarial,
            Self::KeyGeneration(_) | Self::Signing(_) | Self::Encoding(_) | Self::Decryption => {
                ErrorClass::Environment
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let errors = [
            CustodyError::KeyGeneration("x".into()),
            CustodyError::IndexOutOfRange { index: 3, total: 3 },
            CustodyError::Signing("x".into()),
            CustodyError::InsufficientSignatures { required: 2, provided: 1 },
            CustodyError::DuplicateKeyIndex(0),
            CustodyError::Encoding("x".into()),
            CustodyError::Decryption,
            CustodyError::RateLimitExceeded { identity: "10.0.0.1".into(), retry_after: Duration::from_secs(5) },
            CustodyError::InvalidPolicy { required: 3, total: 2 },
            CustodyError::UnknownWallet(WalletId::from_bytes([7u8; 32])),
            CustodyError::WalletCapacityExceeded(4),
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn adversarial_errors_are_classified() {
        assert_eq!(
            CustodyError::InsufficientSignatures { required: 2, provided: 1 }.class(),
            ErrorClass::Adversarial
        );
        assert_eq!(CustodyError::IndexOutOfRange { index: 9, total: 3 }.class(), ErrorClass::Configuration);
        assert_eq!(CustodyError::Decryption.class(), ErrorClass::Environment);
    }

    #[test]
    fn rate_limit_message_mentions_retry() {
        let err = CustodyError::RateLimitExceeded { identity: "wallet-a".into(), retry_after: Duration::from_secs(12) };
        assert_eq!(err.to_string(), "rate limit exceeded for wallet-a; retry in 12s");
    }
}
