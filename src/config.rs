use serde::Deserialize;
use std::{fs, path::Path, time::Duration};
use anyhow::{bail, Context, Result};

use crate::crypto::KdfParams;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub rate_guard: RateLimit,
    #[serde(default)]
    pub wallets: Wallets,
    #[serde(default)]
    pub kdf: KdfParams,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimit {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_identities")]
    pub max_identities: usize,
}

impl RateLimit {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_secs: default_window_secs(),
            max_identities: default_max_identities(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Wallets {
    #[serde(default = "default_max_wallets")]
    pub max_wallets: usize,
    #[serde(default = "default_max_keys")]
    pub max_keys_per_wallet: usize,
}

impl Default for Wallets {
    fn default() -> Self {
        Self { max_wallets: default_max_wallets(), max_keys_per_wallet: default_max_keys() }
    }
}

fn default_limit() -> u32 { 60 }
fn default_window_secs() -> u64 { 60 }
fn default_max_identities() -> usize { 10_000 }
fn default_max_wallets() -> usize { 1_024 }
fn default_max_keys() -> usize { 16 }

impl Config {
    /// Reject settings that would disable a guard outright.
    pub fn validate(&self) -> Result<()> {
        if self.rate_guard.limit == 0 {
            bail!("rate_guard.limit must be at least 1");
        }
        if self.rate_guard.window_secs == 0 {
            bail!("rate_guard.window_secs must be at least 1");
        }
        if self.rate_guard.max_identities == 0 {
            bail!("rate_guard.max_identities must be at least 1");
        }
        if self.wallets.max_wallets == 0 {
            bail!("wallets.max_wallets must be at least 1");
        }
        if self.wallets.max_keys_per_wallet == 0 || self.wallets.max_keys_per_wallet > crate::keyring::MAX_KEYS {
            bail!(
                "wallets.max_keys_per_wallet must be between 1 and {}",
                crate::keyring::MAX_KEYS
            );
        }
        self.kdf.validate().context("invalid [kdf] section")?;
        Ok(())
    }
}

/// Read the TOML file at `p` and deserialize into `Config`.
/// *Adds context* so user errors print a friendlier message.
///
/// # Errors
/// * Returns an anyhow::Error if the file cannot be read, parsed or validated.
pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
    let text = fs::read_to_string(&p)
        .with_context(|| format!("couldn't read config file {}", p.as_ref().display()))?;
    load_from_str(&text)
}

pub fn load_from_str(text: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(text)
        .with_context(|| "invalid TOML in config file".to_string())?;
    cfg.validate()?;
    Ok(cfg)
}
