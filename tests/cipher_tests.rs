// Wallet cipher tests
// Round-trip, ciphertext freshness, tamper detection and schema-checked state decoding

use dash33_custody::{
    cipher::{self, CipherAlgorithm},
    crypto::KdfParams,
    CustodyError, EncryptedBlob, SymmetricKey, WalletCipher,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WalletState {
    label: String,
    xpubs: Vec<String>,
    transactions: Vec<String>,
    birthday_height: u32,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct OtherShape {
    flag: bool,
}

fn fast_kdf() -> KdfParams {
    KdfParams { mem_kib: 1024, time_cost: 1 }
}

fn cipher() -> WalletCipher {
    WalletCipher::with_key(SymmetricKey::generate())
}

#[test]
fn test_round_trip_including_empty() {
    let cipher = cipher();
    let cases: [&[u8]; 3] = [b"", b"x", b"wallet state with some length to it"];
    for plaintext in cases {
        let blob = cipher.encrypt(plaintext).expect("encrypt");
        assert_eq!(cipher.decrypt(&blob).expect("decrypt"), plaintext);
    }
}

#[test]
fn test_same_plaintext_yields_different_blobs() {
    let cipher = cipher();
    let a = cipher.encrypt(b"identical").unwrap();
    let b = cipher.encrypt(b"identical").unwrap();
    assert_ne!(a, b);
    assert_ne!(a.nonce(), b.nonce());
    assert_eq!(a.algorithm(), CipherAlgorithm::XChaCha20Poly1305);
}

#[test]
fn test_wrong_key_fails() {
    let blob = cipher().encrypt(b"secret").unwrap();
    assert!(matches!(cipher().decrypt(&blob), Err(CustodyError::Decryption)));
}

#[test]
fn test_blob_canonical_layout() {
    let cipher = cipher();
    let blob = cipher.encrypt(b"abc").unwrap();
    let bytes = blob.to_bytes();
    assert_eq!(bytes[0], 1, "algorithm tag");
    assert_eq!(&bytes[1..25], blob.nonce());
    assert_eq!(bytes.len(), 1 + 24 + 3 + 16);
    let parsed = EncryptedBlob::from_bytes(&bytes).unwrap();
    assert_eq!(parsed, blob);
    assert_eq!(cipher.decrypt(&parsed).unwrap(), b"abc");
}

#[test]
fn test_truncated_blob_is_decryption_error() {
    assert!(matches!(EncryptedBlob::from_bytes(&[]), Err(CustodyError::Decryption)));
    assert!(matches!(EncryptedBlob::from_bytes(&[1u8; 40]), Err(CustodyError::Decryption)));
}

#[test]
fn test_symmetric_key_length_checked() {
    assert!(matches!(SymmetricKey::from_bytes(&[0u8; 31]), Err(CustodyError::Encoding(_))));
    let key = SymmetricKey::from_bytes(&[3u8; 32]).unwrap();
    assert_eq!(key.as_bytes(), &[3u8; 32]);
}

#[test]
fn test_structured_state_round_trip() {
    let cipher = cipher();
    let state = WalletState {
        label: "cold storage".into(),
        xpubs: vec!["xpub6C...".into(), "xpub6D...".into()],
        transactions: vec!["tx1".into(), "tx2".into()],
        birthday_height: 840_000,
    };
    let blob = cipher.seal(&state).expect("seal");
    let opened: WalletState = cipher.open(&blob).expect("open");
    assert_eq!(opened, state);
}

#[test]
fn test_structured_state_rejects_foreign_shape() {
    let cipher = cipher();
    // Valid ciphertext, but the bytes inside are not a WalletState.
    let blob = cipher.encrypt(b"print('hello')").unwrap();
    assert!(matches!(cipher.open::<WalletState>(&blob), Err(CustodyError::Encoding(_))));

    // Trailing bytes are refused even when a prefix would decode.
    let blob = cipher.seal(&WalletState {
        label: String::new(),
        xpubs: vec![],
        transactions: vec![],
        birthday_height: 1,
    }).unwrap();
    assert!(matches!(cipher.open::<OtherShape>(&blob), Err(CustodyError::Encoding(_))));
}

#[test]
fn test_passphrase_envelope() {
    let sealed = cipher::seal_with_passphrase(b"correct horse", b"descriptor backup", &fast_kdf())
        .expect("seal with passphrase");
    assert_eq!(&sealed[..4], b"D33P");
    let opened = cipher::open_with_passphrase(b"correct horse", &sealed).expect("open");
    assert_eq!(opened, b"descriptor backup");

    assert!(matches!(
        cipher::open_with_passphrase(b"battery staple", &sealed),
        Err(CustodyError::Decryption)
    ));
    assert!(matches!(cipher::open_with_passphrase(b"correct horse", b"D33"), Err(CustodyError::Decryption)));
}

#[test]
fn test_passphrase_envelope_bounds_kdf_params() {
    let mut sealed = cipher::seal_with_passphrase(b"pw", b"data", &fast_kdf()).unwrap();
    // Overwrite the stored time cost with something absurd.
    let time_cost_at = 4 + 1 + 16 + 4;
    sealed[time_cost_at..time_cost_at + 4].copy_from_slice(&u32::MAX.to_be_bytes());
    assert!(matches!(cipher::open_with_passphrase(b"pw", &sealed), Err(CustodyError::Decryption)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_round_trip(plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
        let cipher = cipher();
        let blob = cipher.encrypt(&plaintext).unwrap();
        prop_assert_eq!(cipher.decrypt(&blob).unwrap(), plaintext);
    }

    /// Flipping any single bit of the encoded blob is detected.
    #[test]
    fn prop_bit_flip_detected(
        plaintext in prop::collection::vec(any::<u8>(), 0..128),
        position in any::<usize>(),
        bit in 0u8..8,
    ) {
        let cipher = cipher();
        let mut bytes = cipher.encrypt(&plaintext).unwrap().to_bytes();
        let at = position % bytes.len();
        bytes[at] ^= 1 << bit;
        let outcome = EncryptedBlob::from_bytes(&bytes).and_then(|blob| cipher.decrypt(&blob));
        prop_assert!(matches!(outcome, Err(CustodyError::Decryption)));
    }
}
