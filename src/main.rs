use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dash33_custody::{
    cipher, config, crypto, SignatureSet, ThresholdPolicy, WalletService,
};

#[derive(Parser)]
#[command(author, version, about = "dash33 wallet custody core")]
struct Cli {
    /// TOML config; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Provision an ephemeral k-of-n wallet, sign a payload and print the signature set (hex)
    Sign {
        #[arg(long)]
        required: usize,
        #[arg(long)]
        total: usize,
        /// Comma-separated key indices, e.g. 0,2
        #[arg(long, value_delimiter = ',', required = true)]
        indices: Vec<u32>,
        #[arg(long)]
        payload: String,
    },
    /// Encrypt a file under a pass-phrase-derived key
    Seal {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Decrypt a file produced by `seal`
    Unseal {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => config::load(path)?,
        None => config::Config::default(),
    };

    match cli.cmd {
        Cmd::Sign { required, total, indices, payload } => {
            let policy = ThresholdPolicy::new(required, total)?;
            let service = Arc::new(WalletService::new(&cfg));
            let provisioned = service.clone().create_async(policy).await?;
            let handle = provisioned.handle;
            info!(wallet = %handle.id, "ephemeral wallet ready");

            let signatures = service.sign(&handle, payload.as_bytes(), &indices)?;
            let encoded = signatures.to_bytes();
            // Re-decode so the printed bytes are exactly what a verifier would parse.
            let decoded = SignatureSet::from_bytes(&encoded)?;
            if !service.verify(&handle, payload.as_bytes(), &decoded) {
                bail!("freshly produced signature set failed verification");
            }
            println!("{}", hex::encode(encoded));
        }
        Cmd::Seal { input, output } => {
            let plaintext = fs::read(&input)
                .with_context(|| format!("couldn't read {}", input.display()))?;
            let passphrase = crypto::obtain_passphrase("Set a pass-phrase for the sealed file: ")?;
            let sealed = cipher::seal_with_passphrase(passphrase.as_bytes(), &plaintext, &cfg.kdf)?;
            fs::write(&output, sealed)
                .with_context(|| format!("couldn't write {}", output.display()))?;
            info!(output = %output.display(), "sealed");
        }
        Cmd::Unseal { input, output } => {
            let sealed = fs::read(&input)
                .with_context(|| format!("couldn't read {}", input.display()))?;
            let passphrase = crypto::obtain_passphrase("Enter pass-phrase: ")?;
            let plaintext = cipher::open_with_passphrase(passphrase.as_bytes(), &sealed)
                .context("invalid pass-phrase or corrupted file")?;
            fs::write(&output, plaintext)
                .with_context(|| format!("couldn't write {}", output.display()))?;
            info!(output = %output.display(), "unsealed");
        }
    }

    Ok(())
}
