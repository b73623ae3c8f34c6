use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length in bytes of each key in a [`KeyBundle`].
pub const KEY_LENGTH: usize = 32;

/// Encryption and HMAC keys derived from the account's master secret.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyBundle {
    encryption_key: Vec<u8>,
    hmac_key: Vec<u8>,
}

impl KeyBundle {
    pub fn new(encryption_key: Vec<u8>, hmac_key: Vec<u8>) -> Self {
        Self {
            encryption_key,
            hmac_key,
        }
    }

    pub fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }

    pub fn hmac_key(&self) -> &[u8] {
        &self.hmac_key
    }
}

impl std::fmt::Debug for KeyBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBundle").finish_non_exhaustive()
    }
}

/// Token server response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub id: String,
    pub key: String,
    pub uid: u64,
    /// Lifetime in seconds.
    pub duration: u64,
    #[serde(alias = "api_endpoint")]
    pub endpoint: String,
}

/// A storage credential issued by the token server for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub key: String,
    pub uid: u64,
    pub endpoint: String,
    /// Absolute expiry, milliseconds since the UNIX epoch.
    pub expiration: i64,
    /// Email of the account the token was issued for.
    pub account: String,
}

impl Token {
    /// Builds a token from a server response received at `now_ms`.
    pub fn from_response(response: TokenResponse, account: &str, now_ms: i64) -> Self {
        let lifetime_ms = i64::try_from(response.duration)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000);
        Self {
            id: response.id,
            key: response.key,
            uid: response.uid,
            endpoint: response.endpoint,
            expiration: now_ms.saturating_add(lifetime_ms),
            account: account.to_string(),
        }
    }

    /// A token is usable only before it expires and only for the account
    /// it was issued to.
    pub fn is_valid_for(&self, signed_in_email: Option<&str>, now_ms: i64) -> bool {
        if self.expiration <= now_ms {
            return false;
        }
        match signed_in_email {
            Some(email) => email == self.account,
            None => false,
        }
    }
}

/// Signed-in user as reported by the account provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    pub email: String,
    pub uid: String,
    pub verified: bool,
}

/// Key material for the signed-in user. `kb` is hex encoded.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct UserKeys {
    pub email: String,
    pub kb: String,
}

impl std::fmt::Debug for UserKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserKeys")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Login-state notifications delivered by the account provider.
///
/// Delivery is at-least-once; handlers must be idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    Verified,
    Login,
    Logout,
}

/// Lifecycle of the identity manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityState {
    Uninitialized,
    Initializing,
    ReadyToAuthenticate,
    LoggedOut,
}

/// Whether enough credentials are present to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthState {
    Ok,
    /// No account, or the key bundle fetch has not produced a username yet.
    NoUsername,
    /// The key bundle fetch finished but produced no bundle.
    NoKeyBundle,
}
