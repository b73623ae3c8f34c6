use std::fmt;

// === CryptoError ===

/// Errors related to cryptographic operations.
#[derive(Debug)]
pub enum CryptoError {
    /// The master secret was absent or malformed.
    InvalidSecret(String),
    /// Key derivation failed.
    KeyDerivation(String),
    /// Encryption operation failed.
    Encryption(String),
    /// Decryption operation failed.
    Decryption(String),
    /// The HMAC over a sealed payload did not verify.
    HmacMismatch,
    /// Failed to generate random bytes.
    RandomGeneration(String),
    /// The provided key is invalid.
    InvalidKey(String),
    /// The URI could not be parsed for request signing.
    InvalidUri(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidSecret(msg) => write!(f, "Invalid master secret: {}", msg),
            CryptoError::KeyDerivation(msg) => write!(f, "Key derivation failed: {}", msg),
            CryptoError::Encryption(msg) => write!(f, "Encryption failed: {}", msg),
            CryptoError::Decryption(msg) => write!(f, "Decryption failed: {}", msg),
            CryptoError::HmacMismatch => write!(f, "Payload HMAC verification failed"),
            CryptoError::RandomGeneration(msg) => {
                write!(f, "Random generation failed: {}", msg)
            }
            CryptoError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            CryptoError::InvalidUri(uri) => write!(f, "Invalid URI: {}", uri),
        }
    }
}

impl std::error::Error for CryptoError {}

// === TokenError ===

/// Errors returned by the token server client.
#[derive(Debug)]
pub enum TokenError {
    /// The token server refused the identity assertion (HTTP 401/403).
    AssertionRejected(String),
    /// The request could not be completed (connection, timeout, TLS).
    Network(String),
    /// The server answered, but not with a usable token.
    Protocol(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::AssertionRejected(msg) => write!(f, "Assertion rejected: {}", msg),
            TokenError::Network(msg) => write!(f, "Token server network error: {}", msg),
            TokenError::Protocol(msg) => write!(f, "Token server protocol error: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

// === IdentityError ===

/// Errors related to account identity and credential management.
#[derive(Debug)]
pub enum IdentityError {
    /// No account is signed in.
    NotSignedIn,
    /// The signed-in account changed while an operation was in flight.
    AccountChanged,
    /// The account provider failed (assertion, keys, user lookup).
    Account(String),
    /// Fetching a token failed.
    Token(TokenError),
    /// Deriving the key bundle failed.
    Crypto(CryptoError),
    /// A blocking wait on an asynchronous operation expired.
    Timeout,
    /// The background task was dropped before producing a result.
    Cancelled,
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::NotSignedIn => write!(f, "No account is signed in"),
            IdentityError::AccountChanged => {
                write!(f, "The currently logged-in user has changed")
            }
            IdentityError::Account(msg) => write!(f, "Account provider error: {}", msg),
            IdentityError::Token(e) => write!(f, "Token fetch failed: {}", e),
            IdentityError::Crypto(e) => write!(f, "Key bundle derivation failed: {}", e),
            IdentityError::Timeout => write!(f, "Timed out waiting for identity operation"),
            IdentityError::Cancelled => write!(f, "Identity operation was cancelled"),
        }
    }
}

impl std::error::Error for IdentityError {}

impl From<TokenError> for IdentityError {
    fn from(e: TokenError) -> Self {
        IdentityError::Token(e)
    }
}

impl From<CryptoError> for IdentityError {
    fn from(e: CryptoError) -> Self {
        IdentityError::Crypto(e)
    }
}

// === ClusterError ===

/// Errors related to storage cluster resolution.
#[derive(Debug)]
pub enum ClusterError {
    /// Obtaining a token for the current user failed.
    Identity(IdentityError),
    /// The token's endpoint was not a valid URL.
    InvalidEndpoint(String),
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::Identity(e) => write!(f, "Cluster lookup failed: {}", e),
            ClusterError::InvalidEndpoint(url) => write!(f, "Invalid storage endpoint: {}", url),
        }
    }
}

impl std::error::Error for ClusterError {}

impl From<IdentityError> for ClusterError {
    fn from(e: IdentityError) -> Self {
        ClusterError::Identity(e)
    }
}

// === PlacesError ===

/// Errors raised by the local places tree store.
#[derive(Debug)]
pub enum PlacesError {
    /// No item with the given local id exists.
    ItemNotFound(i64),
    /// The parent folder does not exist or is not a folder.
    InvalidParent(i64),
    /// The GUID is already assigned to another item.
    GuidInUse(String),
    /// The provided URI is malformed.
    InvalidUri(String),
    /// Database operation failed.
    DatabaseError(String),
}

impl fmt::Display for PlacesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacesError::ItemNotFound(id) => write!(f, "Places item not found: {}", id),
            PlacesError::InvalidParent(id) => write!(f, "Invalid parent folder: {}", id),
            PlacesError::GuidInUse(guid) => write!(f, "GUID already in use: {}", guid),
            PlacesError::InvalidUri(uri) => write!(f, "Invalid URI: {}", uri),
            PlacesError::DatabaseError(msg) => write!(f, "Places database error: {}", msg),
        }
    }
}

impl std::error::Error for PlacesError {}

impl From<rusqlite::Error> for PlacesError {
    fn from(e: rusqlite::Error) -> Self {
        PlacesError::DatabaseError(e.to_string())
    }
}

// === StoreError ===

/// Errors from translating and applying sync records.
#[derive(Debug)]
pub enum StoreError {
    /// The record's type is not one this store understands.
    UnknownType(String),
    /// The local item targeted by a GUID change does not exist.
    UnknownItem(String),
    /// The new GUID already maps to a different item.
    GuidCollision(String),
    /// A record was missing a field its type requires.
    MissingField(&'static str),
    /// No local microsummary generator is installed for the URI.
    GeneratorNotFound(String),
    /// The underlying places store failed.
    Places(PlacesError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownType(kind) => write!(f, "Unknown item type: {}", kind),
            StoreError::UnknownItem(guid) => write!(f, "Item does not exist: {}", guid),
            StoreError::GuidCollision(guid) => write!(f, "New ID already in use: {}", guid),
            StoreError::MissingField(field) => write!(f, "Record is missing field: {}", field),
            StoreError::GeneratorNotFound(uri) => write!(f, "Microsummary generator not found: {}", uri),
            StoreError::Places(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<PlacesError> for StoreError {
    fn from(e: PlacesError) -> Self {
        StoreError::Places(e)
    }
}

// === StorageError ===

/// Errors talking to the remote storage server.
#[derive(Debug)]
pub enum StorageError {
    /// No authorization header could be produced for the request.
    Unauthorized,
    /// The request could not be completed.
    Network(String),
    /// The server responded with an unexpected status.
    Http(u16),
    /// The response body could not be parsed.
    Parse(String),
    /// The blocking wait on the request expired.
    Timeout,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Unauthorized => write!(f, "No valid credentials for storage request"),
            StorageError::Network(msg) => write!(f, "Storage network error: {}", msg),
            StorageError::Http(status) => write!(f, "Storage server returned HTTP {}", status),
            StorageError::Parse(msg) => write!(f, "Storage response parse error: {}", msg),
            StorageError::Timeout => write!(f, "Storage request timed out"),
        }
    }
}

impl std::error::Error for StorageError {}

// === SyncError ===

/// Errors that abort a sync pass as a whole.
#[derive(Debug)]
pub enum SyncError {
    /// Identity is not ready or has no key bundle.
    NotReady(String),
    /// The storage cluster could not be resolved.
    Cluster(ClusterError),
    /// Talking to the storage server failed.
    Storage(StorageError),
    /// Reading or writing the local store failed.
    Store(StoreError),
    /// A record payload could not be serialized or sealed.
    Payload(String),
    /// Sync metadata could not be read or written.
    DatabaseError(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::NotReady(msg) => write!(f, "Sync not ready: {}", msg),
            SyncError::Cluster(e) => write!(f, "{}", e),
            SyncError::Storage(e) => write!(f, "{}", e),
            SyncError::Store(e) => write!(f, "{}", e),
            SyncError::Payload(msg) => write!(f, "Payload error: {}", msg),
            SyncError::DatabaseError(msg) => write!(f, "Sync metadata error: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        SyncError::Storage(e)
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

impl From<ClusterError> for SyncError {
    fn from(e: ClusterError) -> Self {
        SyncError::Cluster(e)
    }
}

// === SettingsError ===

/// Errors related to settings management.
#[derive(Debug)]
pub enum SettingsError {
    /// An I/O error occurred while reading or writing settings.
    IoError(String),
    /// Failed to serialize or deserialize settings.
    SerializationError(String),
    /// The provided settings key is invalid.
    InvalidKey(String),
    /// The provided settings value is invalid.
    InvalidValue(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::IoError(msg) => write!(f, "Settings I/O error: {}", msg),
            SettingsError::SerializationError(msg) => {
                write!(f, "Settings serialization error: {}", msg)
            }
            SettingsError::InvalidKey(key) => write!(f, "Invalid settings key: {}", key),
            SettingsError::InvalidValue(msg) => {
                write!(f, "Invalid settings value: {}", msg)
            }
        }
    }
}

impl std::error::Error for SettingsError {}
