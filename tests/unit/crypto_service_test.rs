//! Tests for the CryptoService public API: payload sealing and HAWK signing.

use bookmark_sync::services::crypto_service::{
    CryptoService, CryptoServiceTrait, HawkArtifacts, HawkCredentials,
};
use bookmark_sync::types::errors::CryptoError;

const KB_HEX: &str = "00000000000000000000000000000000ffffffffffffffffffffffffffffffff";

/// A sealed payload opens with the same bundle and yields the cleartext.
#[test]
fn test_seal_then_open() {
    let service = CryptoService::new();
    let bundle = service.derive_key_bundle(KB_HEX).unwrap();

    let sealed = service.seal_payload(&bundle, br#"{"id":"g1"}"#).unwrap();
    assert_eq!(service.open_payload(&bundle, &sealed).unwrap(), br#"{"id":"g1"}"#);
}

/// Sealing the same cleartext twice uses fresh IVs.
#[test]
fn test_seal_uses_fresh_iv() {
    let service = CryptoService::new();
    let bundle = service.derive_key_bundle(KB_HEX).unwrap();

    let a = service.seal_payload(&bundle, b"same").unwrap();
    let b = service.seal_payload(&bundle, b"same").unwrap();
    assert_ne!(a.iv, b.iv);
    assert_ne!(a.ciphertext, b.ciphertext);
}

/// A tampered ciphertext is rejected by the HMAC before decryption.
#[test]
fn test_open_rejects_tampered_ciphertext() {
    let service = CryptoService::new();
    let bundle = service.derive_key_bundle(KB_HEX).unwrap();

    let mut sealed = service.seal_payload(&bundle, b"payload").unwrap();
    let flipped = if sealed.ciphertext.starts_with('A') { 'B' } else { 'A' };
    sealed.ciphertext = format!("{}{}", flipped, &sealed.ciphertext[1..]);
    assert!(matches!(
        service.open_payload(&bundle, &sealed),
        Err(CryptoError::HmacMismatch)
    ));
}

/// A payload sealed under another account's keys does not open.
#[test]
fn test_open_with_other_bundle_fails() {
    let service = CryptoService::new();
    let ours = service.derive_key_bundle(KB_HEX).unwrap();
    let theirs = service.derive_key_bundle(&"11".repeat(32)).unwrap();

    let sealed = service.seal_payload(&theirs, b"payload").unwrap();
    assert!(service.open_payload(&ours, &sealed).is_err());
}

/// Without `ext` the header omits the field and the MAC matches the
/// reference value for the same request.
#[test]
fn test_hawk_without_ext() {
    let service = CryptoService::new();
    let credentials = HawkCredentials {
        id: "dh37fgj492je".to_string(),
        key: "werxhqb98rpaxn39848xrunpaw3489ruxnpa98w4rxn".to_string(),
    };
    let artifacts = HawkArtifacts {
        ts: 1353832234,
        nonce: "j4h3g2".to_string(),
        ext: None,
    };

    let header = service
        .compute_hawk(
            "http://example.com:8000/resource/1?b=1&a=2",
            "get",
            &credentials,
            &artifacts,
        )
        .unwrap();
    assert_eq!(
        header,
        "Hawk id=\"dh37fgj492je\", ts=\"1353832234\", nonce=\"j4h3g2\", \
         mac=\"nfp3t5BVkMvjhU3PrD0ftTp7NcVpETEX2HEi/Fo4S2g=\""
    );
}

#[test]
fn test_hawk_rejects_relative_uri() {
    let service = CryptoService::new();
    let credentials = HawkCredentials {
        id: "id".to_string(),
        key: "key".to_string(),
    };
    let artifacts = HawkArtifacts {
        ts: 1,
        nonce: "n".to_string(),
        ext: None,
    };
    assert!(matches!(
        service.compute_hawk("/storage/bookmarks", "GET", &credentials, &artifacts),
        Err(CryptoError::InvalidUri(_))
    ));
}

#[test]
fn test_generate_nonce_is_random() {
    let service = CryptoService::new();
    let a = service.generate_nonce().unwrap();
    let b = service.generate_nonce().unwrap();
    assert_eq!(a.len(), 12);
    assert_ne!(a, b);
}
