//! Property-based tests for key bundle derivation.
//!
//! Derivation must be a pure function of the master secret: the same kB
//! always yields the same pair of 32-byte keys, and distinct secrets yield
//! distinct bundles.

use bookmark_sync::services::crypto_service::{CryptoService, CryptoServiceTrait};
use bookmark_sync::types::errors::CryptoError;
use bookmark_sync::types::token::KEY_LENGTH;
use proptest::prelude::*;

fn arb_secret() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 32)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_derivation_is_deterministic(secret in arb_secret()) {
        let service = CryptoService::new();
        let kb = hex::encode(&secret);

        let a = service.derive_key_bundle(&kb).unwrap();
        let b = service.derive_key_bundle(&kb).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.encryption_key().len(), KEY_LENGTH);
        prop_assert_eq!(a.hmac_key().len(), KEY_LENGTH);
        prop_assert_ne!(a.encryption_key(), a.hmac_key());
    }

    /// Upper- and lower-case hex name the same secret.
    #[test]
    fn prop_hex_case_insensitive(secret in arb_secret()) {
        let service = CryptoService::new();
        let lower = service.derive_key_bundle(&hex::encode(&secret)).unwrap();
        let upper = service.derive_key_bundle(&hex::encode_upper(&secret)).unwrap();
        prop_assert_eq!(lower, upper);
    }

    #[test]
    fn prop_distinct_secrets_distinct_bundles(a in arb_secret(), b in arb_secret()) {
        prop_assume!(a != b);
        let service = CryptoService::new();
        let bundle_a = service.derive_key_bundle(&hex::encode(&a)).unwrap();
        let bundle_b = service.derive_key_bundle(&hex::encode(&b)).unwrap();
        prop_assert_ne!(bundle_a, bundle_b);
    }

    /// Anything other than exactly 32 bytes of key material is refused.
    #[test]
    fn prop_wrong_length_rejected(secret in prop::collection::vec(any::<u8>(), 1..64)) {
        prop_assume!(secret.len() != 32);
        let service = CryptoService::new();
        let result = service.derive_key_bundle(&hex::encode(&secret));
        prop_assert!(matches!(result, Err(CryptoError::InvalidSecret(_))));
    }

    /// Payloads sealed with a derived bundle open with a re-derived one.
    #[test]
    fn prop_rederived_bundle_opens_payload(
        secret in arb_secret(),
        body in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let service = CryptoService::new();
        let kb = hex::encode(&secret);
        let sealed = service
            .seal_payload(&service.derive_key_bundle(&kb).unwrap(), &body)
            .unwrap();
        let opened = service
            .open_payload(&service.derive_key_bundle(&kb).unwrap(), &sealed)
            .unwrap();
        prop_assert_eq!(opened, body);
    }
}
