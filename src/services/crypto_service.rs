use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Url;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::hkdf;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::types::errors::CryptoError;
use crate::types::record::EncryptedPayload;
use crate::types::token::{KeyBundle, KEY_LENGTH};

/// HKDF info string binding derived keys to the storage protocol.
pub const KEY_BUNDLE_INFO: &str = "identity.mozilla.com/picl/v1/oldsync";

/// Expected length in bytes of the master secret (kB).
pub const MASTER_SECRET_LENGTH: usize = 32;

/// AES-256-GCM nonce/IV length in bytes.
const NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
const TAG_LENGTH: usize = 16;

/// Length in bytes of a HAWK nonce before encoding.
const HAWK_NONCE_LENGTH: usize = 8;

/// Id and key of a HAWK credential pair, as issued in a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HawkCredentials {
    pub id: String,
    pub key: String,
}

/// Per-request values mixed into a HAWK MAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HawkArtifacts {
    /// Seconds since the UNIX epoch.
    pub ts: i64,
    pub nonce: String,
    pub ext: Option<String>,
}

/// Trait defining the cryptographic primitives of the sync client.
pub trait CryptoServiceTrait {
    /// Derives the (encryption, HMAC) key pair from a hex-encoded master secret.
    fn derive_key_bundle(&self, master_secret_hex: &str) -> Result<KeyBundle, CryptoError>;

    /// Encrypts plaintext using AES-256-GCM, returning `(ciphertext, iv, tag)`.
    fn encrypt_aes256gcm(
        &self,
        plaintext: &[u8],
        key: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), CryptoError>;

    /// Decrypts data encrypted with AES-256-GCM.
    fn decrypt_aes256gcm(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        tag: &[u8],
        key: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// HMAC-SHA256 of `data`.
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Vec<u8>;

    /// Encrypts and authenticates a record payload with a key bundle.
    fn seal_payload(&self, bundle: &KeyBundle, plaintext: &[u8]) -> Result<EncryptedPayload, CryptoError>;

    /// Verifies and decrypts a payload sealed by [`CryptoServiceTrait::seal_payload`].
    fn open_payload(&self, bundle: &KeyBundle, payload: &EncryptedPayload) -> Result<Vec<u8>, CryptoError>;

    /// Computes a HAWK `Authorization` header value with explicit artifacts.
    fn compute_hawk(
        &self,
        uri: &str,
        method: &str,
        credentials: &HawkCredentials,
        artifacts: &HawkArtifacts,
    ) -> Result<String, CryptoError>;

    /// Generates a fresh base64 HAWK nonce.
    fn generate_nonce(&self) -> Result<String, CryptoError>;

    /// Generates cryptographically secure random bytes of the specified length.
    fn generate_random_bytes(&self, length: usize) -> Result<Vec<u8>, CryptoError>;
}

/// A nonce sequence that uses a single nonce value.
/// Used for one-shot encryption/decryption operations.
struct SingleNonce {
    nonce: Option<[u8; NONCE_LENGTH]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_LENGTH]) -> Self {
        Self {
            nonce: Some(nonce_bytes),
        }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        self.nonce
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// Output length marker for HKDF expansion.
struct OkmLength(usize);

impl hkdf::KeyType for OkmLength {
    fn len(&self) -> usize {
        self.0
    }
}

/// Implementation of cryptographic services using the `ring` crate.
pub struct CryptoService {
    rng: SystemRandom,
}

impl CryptoService {
    /// Creates a new CryptoService instance.
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn check_key(key: &[u8]) -> Result<(), CryptoError> {
        if key.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKey(format!(
                "Key must be {} bytes, got {}",
                KEY_LENGTH,
                key.len()
            )));
        }
        Ok(())
    }
}

impl Default for CryptoService {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoServiceTrait for CryptoService {
    fn derive_key_bundle(&self, master_secret_hex: &str) -> Result<KeyBundle, CryptoError> {
        if master_secret_hex.is_empty() {
            return Err(CryptoError::InvalidSecret("master secret is empty".to_string()));
        }
        let secret = hex::decode(master_secret_hex)
            .map_err(|e| CryptoError::InvalidSecret(format!("not valid hex: {}", e)))?;
        if secret.len() != MASTER_SECRET_LENGTH {
            return Err(CryptoError::InvalidSecret(format!(
                "expected {} bytes, got {}",
                MASTER_SECRET_LENGTH,
                secret.len()
            )));
        }

        // An absent salt is a hash-length string of zeros.
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &[0u8; 32]);
        let prk = salt.extract(&secret);
        let info = [KEY_BUNDLE_INFO.as_bytes()];
        let okm = prk
            .expand(&info, OkmLength(2 * KEY_LENGTH))
            .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".to_string()))?;
        let mut out = vec![0u8; 2 * KEY_LENGTH];
        okm.fill(&mut out)
            .map_err(|_| CryptoError::KeyDerivation("HKDF fill failed".to_string()))?;

        let hmac_key = out.split_off(KEY_LENGTH);
        Ok(KeyBundle::new(out, hmac_key))
    }

    fn encrypt_aes256gcm(
        &self,
        plaintext: &[u8],
        key: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), CryptoError> {
        Self::check_key(key)?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::RandomGeneration("Failed to generate nonce".to_string()))?;

        let unbound_key = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| CryptoError::Encryption("Failed to create encryption key".to_string()))?;
        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = plaintext.to_vec();
        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Encryption("Encryption operation failed".to_string()))?;

        // ring appends the tag; the last TAG_LENGTH bytes are the tag.
        let tag = in_out.split_off(in_out.len() - TAG_LENGTH);
        Ok((in_out, nonce_bytes.to_vec(), tag))
    }

    fn decrypt_aes256gcm(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        tag: &[u8],
        key: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Self::check_key(key)?;

        if iv.len() != NONCE_LENGTH {
            return Err(CryptoError::Decryption(format!(
                "IV must be {} bytes, got {}",
                NONCE_LENGTH,
                iv.len()
            )));
        }
        if tag.len() != TAG_LENGTH {
            return Err(CryptoError::Decryption(format!(
                "Auth tag must be {} bytes, got {}",
                TAG_LENGTH,
                tag.len()
            )));
        }

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        nonce_bytes.copy_from_slice(iv);

        let unbound_key = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| CryptoError::Decryption("Failed to create decryption key".to_string()))?;
        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut in_out = Vec::with_capacity(ciphertext.len() + tag.len());
        in_out.extend_from_slice(ciphertext);
        in_out.extend_from_slice(tag);

        let plaintext = opening_key
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| {
                CryptoError::Decryption("invalid key or corrupted data".to_string())
            })?;

        Ok(plaintext.to_vec())
    }

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, key);
        hmac::sign(&key, data).as_ref().to_vec()
    }

    fn seal_payload(&self, bundle: &KeyBundle, plaintext: &[u8]) -> Result<EncryptedPayload, CryptoError> {
        let (ciphertext, iv, tag) = self.encrypt_aes256gcm(plaintext, bundle.encryption_key())?;
        let ciphertext = STANDARD.encode(ciphertext);
        let hmac = hex::encode(self.hmac_sha256(bundle.hmac_key(), ciphertext.as_bytes()));
        Ok(EncryptedPayload {
            ciphertext,
            iv: STANDARD.encode(iv),
            tag: STANDARD.encode(tag),
            hmac,
        })
    }

    fn open_payload(&self, bundle: &KeyBundle, payload: &EncryptedPayload) -> Result<Vec<u8>, CryptoError> {
        let expected = hex::decode(&payload.hmac).map_err(|_| CryptoError::HmacMismatch)?;
        let key = hmac::Key::new(hmac::HMAC_SHA256, bundle.hmac_key());
        hmac::verify(&key, payload.ciphertext.as_bytes(), &expected)
            .map_err(|_| CryptoError::HmacMismatch)?;

        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| CryptoError::Decryption(format!("bad base64 in {}: {}", field, e)))
        };
        let ciphertext = decode("ciphertext", &payload.ciphertext)?;
        let iv = decode("IV", &payload.iv)?;
        let tag = decode("tag", &payload.tag)?;
        self.decrypt_aes256gcm(&ciphertext, &iv, &tag, bundle.encryption_key())
    }

    fn compute_hawk(
        &self,
        uri: &str,
        method: &str,
        credentials: &HawkCredentials,
        artifacts: &HawkArtifacts,
    ) -> Result<String, CryptoError> {
        let url = Url::parse(uri).map_err(|e| CryptoError::InvalidUri(format!("{}: {}", uri, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| CryptoError::InvalidUri(format!("{}: no host", uri)))?
            .to_ascii_lowercase();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| CryptoError::InvalidUri(format!("{}: no port", uri)))?;
        let resource = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let ext = artifacts.ext.as_deref().unwrap_or("");

        let normalized = format!(
            "hawk.1.header\n{}\n{}\n{}\n{}\n{}\n{}\n\n{}\n",
            artifacts.ts,
            artifacts.nonce,
            method.to_ascii_uppercase(),
            resource,
            host,
            port,
            ext
        );
        let mac = STANDARD.encode(self.hmac_sha256(credentials.key.as_bytes(), normalized.as_bytes()));

        let mut header = format!(
            "Hawk id=\"{}\", ts=\"{}\", nonce=\"{}\"",
            credentials.id, artifacts.ts, artifacts.nonce
        );
        if !ext.is_empty() {
            header.push_str(&format!(", ext=\"{}\"", ext));
        }
        header.push_str(&format!(", mac=\"{}\"", mac));
        Ok(header)
    }

    fn generate_nonce(&self) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.generate_random_bytes(HAWK_NONCE_LENGTH)?))
    }

    fn generate_random_bytes(&self, length: usize) -> Result<Vec<u8>, CryptoError> {
        let mut bytes = vec![0u8; length];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| CryptoError::RandomGeneration("Failed to generate random bytes".to_string()))?;
        Ok(bytes)
    }
}
