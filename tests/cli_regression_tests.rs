// CLI regression tests: run the real binary end to end
use std::process::Command;
use std::fs;

use dash33_custody::SignatureSet;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dash33-custody"))
}

#[test]
fn sign_prints_canonical_signature_set() {
    let out = bin()
        .args(["sign", "--required", "2", "--total", "3", "--indices", "2,0", "--payload", "hello"])
        .output()
        .expect("failed to run dash33-custody binary");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let text = String::from_utf8(out.stdout).unwrap();
    let bytes = hex::decode(text.trim()).expect("stdout is hex");
    let set = SignatureSet::from_bytes(&bytes).expect("canonical signature set");
    assert_eq!(set.key_indices(), vec![2, 0]);
}

#[test]
fn sign_below_quorum_fails() {
    let status = bin()
        .args(["sign", "--required", "2", "--total", "3", "--indices", "1", "--payload", "hello"])
        .status()
        .expect("failed to run dash33-custody binary");
    assert!(!status.success());
}

#[test]
fn seal_then_unseal_with_env_passphrase() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let cfg_path = tmp.path().join("config.toml");
    fs::write(&cfg_path, "[kdf]\nmem_kib = 1024\ntime_cost = 1\n").unwrap();

    let plain = tmp.path().join("wallet.json");
    let sealed = tmp.path().join("wallet.d33p");
    let restored = tmp.path().join("restored.json");
    fs::write(&plain, br#"{"xpub":"xpub6C..."}"#).unwrap();

    let run = |args: &[&str], passphrase: &str| {
        bin()
            .arg("--config")
            .arg(&cfg_path)
            .args(args)
            .env("DASH33_PASSPHRASE", passphrase)
            .status()
            .expect("failed to run dash33-custody binary")
    };

    let status = run(&["seal", "--input", plain.to_str().unwrap(), "--output", sealed.to_str().unwrap()], "pw-1");
    assert!(status.success());
    assert_ne!(fs::read(&sealed).unwrap(), fs::read(&plain).unwrap());

    let status = run(&["unseal", "--input", sealed.to_str().unwrap(), "--output", restored.to_str().unwrap()], "wrong");
    assert!(!status.success(), "wrong pass-phrase must not unseal");
    assert!(!restored.exists());

    let status = run(&["unseal", "--input", sealed.to_str().unwrap(), "--output", restored.to_str().unwrap()], "pw-1");
    assert!(status.success());
    assert_eq!(fs::read(&restored).unwrap(), fs::read(&plain).unwrap());
}
