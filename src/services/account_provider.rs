//! Account provider: the source of the signed-in user, its key material,
//! identity assertions, and login-state notifications.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::errors::IdentityError;
use crate::types::token::{AccountData, AccountEvent, UserKeys};

/// Capacity of the notification channel before slow receivers lag.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Trait defining what the identity manager needs from the account system.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn get_signed_in_user(&self) -> Result<Option<AccountData>, IdentityError>;

    /// Resolves once `user` has verified their account.
    async fn when_verified(&self, user: &AccountData) -> Result<(), IdentityError>;

    /// Returns an identity assertion scoped to `audience`.
    async fn get_assertion(&self, audience: &str) -> Result<String, IdentityError>;

    async fn get_keys(&self) -> Result<Option<UserKeys>, IdentityError>;

    /// Registers for login-state notifications.
    fn subscribe(&self) -> broadcast::Receiver<AccountEvent>;
}

/// On-disk account description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountFile {
    pub email: String,
    pub uid: String,
    #[serde(default = "default_verified")]
    pub verified: bool,
    /// Hex master secret.
    #[serde(rename = "kB")]
    pub kb: String,
    /// Pre-issued identity assertion presented to the token server.
    pub assertion: String,
}

fn default_verified() -> bool {
    true
}

/// Account provider backed by a JSON file holding one signed-in account.
///
/// `reload` re-reads the file and emits the matching notification, so an
/// external login tool can swap accounts under a running client.
pub struct FileAccountProvider {
    path: PathBuf,
    account: Mutex<Option<AccountFile>>,
    events: broadcast::Sender<AccountEvent>,
}

impl FileAccountProvider {
    /// Loads the account file at `path`. A missing file means nobody is signed in.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, IdentityError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let provider = Self {
            path: path.as_ref().to_path_buf(),
            account: Mutex::new(None),
            events,
        };
        let loaded = provider.read_file()?;
        *provider.lock() = loaded;
        Ok(provider)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<AccountFile>> {
        self.account.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_file(&self) -> Result<Option<AccountFile>, IdentityError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no account file");
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| IdentityError::Account(format!("Failed to read account file: {}", e)))?;
        let account = serde_json::from_str(&content)
            .map_err(|e| IdentityError::Account(format!("Failed to parse account file: {}", e)))?;
        Ok(Some(account))
    }

    /// Re-reads the account file and announces login or logout.
    pub fn reload(&self) -> Result<(), IdentityError> {
        let loaded = self.read_file()?;
        let event = if loaded.is_some() {
            AccountEvent::Login
        } else {
            AccountEvent::Logout
        };
        *self.lock() = loaded;
        if self.events.send(event).is_err() {
            debug!("account event dropped: no subscribers");
        }
        Ok(())
    }
}

#[async_trait]
impl AccountProvider for FileAccountProvider {
    async fn get_signed_in_user(&self) -> Result<Option<AccountData>, IdentityError> {
        Ok(self.lock().as_ref().map(|a| AccountData {
            email: a.email.clone(),
            uid: a.uid.clone(),
            verified: a.verified,
        }))
    }

    async fn when_verified(&self, user: &AccountData) -> Result<(), IdentityError> {
        if user.verified {
            Ok(())
        } else {
            warn!(email = %user.email, "account is not verified");
            Err(IdentityError::Account("account is not verified".to_string()))
        }
    }

    async fn get_assertion(&self, _audience: &str) -> Result<String, IdentityError> {
        self.lock()
            .as_ref()
            .map(|a| a.assertion.clone())
            .ok_or(IdentityError::NotSignedIn)
    }

    async fn get_keys(&self) -> Result<Option<UserKeys>, IdentityError> {
        Ok(self.lock().as_ref().map(|a| UserKeys {
            email: a.email.clone(),
            kb: a.kb.clone(),
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<AccountEvent> {
        self.events.subscribe()
    }
}
