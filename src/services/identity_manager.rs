//! Identity manager.
//!
//! Owns the signed-in account, its derived key bundle, and the current
//! storage token. Initialization fetches the key bundle in the background;
//! callers that need a synchronous answer (request signing) go through a
//! bounded blocking wait instead.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::Url;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::services::account_provider::AccountProvider;
use crate::services::crypto_service::{
    CryptoService, CryptoServiceTrait, HawkArtifacts, HawkCredentials,
};
use crate::services::token_client::TokenClient;
use crate::types::errors::IdentityError;
use crate::types::token::{
    AccountData, AccountEvent, AuthState, IdentityState, KeyBundle, Token,
};

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    /// Milliseconds since the UNIX epoch.
    fn now_ms(&self) -> i64;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Progress of the most recent initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Ready,
    Failed(String),
}

/// Blocks the calling thread on `fut`, giving up after `timeout`.
///
/// Returns `None` when the wait expires. Requires a multi-threaded runtime;
/// when called from one of its worker threads the worker is handed off with
/// `block_in_place` first. A current-thread runtime cannot be waited on
/// this way, so the call also returns `None` there.
pub fn block_with_timeout<F: Future>(handle: &Handle, timeout: Duration, fut: F) -> Option<F::Output> {
    if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
        error!("cannot block on a current-thread runtime");
        return None;
    }
    let wait = async { tokio::time::timeout(timeout, fut).await.ok() };
    match Handle::try_current() {
        Ok(current) if current.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            error!("cannot block from inside a current-thread runtime");
            None
        }
        Ok(_) => tokio::task::block_in_place(|| handle.block_on(wait)),
        Err(_) => handle.block_on(wait),
    }
}

type LogoutListener = Box<dyn Fn() + Send + Sync>;

struct IdentityInner {
    state: IdentityState,
    account: Option<String>,
    username: String,
    token: Option<Token>,
    key_bundle: Option<KeyBundle>,
    /// Set once a key bundle fetch has finished, successfully or not.
    should_have_key_bundle: bool,
    /// Bumped on every re-initialization and logout; in-flight fetches that
    /// started under an older generation discard their results.
    generation: u64,
    listening: bool,
}

/// Account identity, key bundle, and token state for the sync client.
pub struct IdentityManager {
    accounts: Arc<dyn AccountProvider>,
    token_client: Arc<dyn TokenClient>,
    clock: Arc<dyn Clock>,
    crypto: CryptoService,
    runtime: Handle,
    token_server_uri: String,
    auth_timeout: Duration,
    inner: Mutex<IdentityInner>,
    ready: watch::Sender<ReadyState>,
    logout_listeners: Mutex<Vec<LogoutListener>>,
}

impl IdentityManager {
    pub fn new(
        accounts: Arc<dyn AccountProvider>,
        token_client: Arc<dyn TokenClient>,
        clock: Arc<dyn Clock>,
        runtime: Handle,
        token_server_uri: &str,
        auth_timeout: Duration,
    ) -> Arc<Self> {
        let (ready, _) = watch::channel(ReadyState::Pending);
        Arc::new(Self {
            accounts,
            token_client,
            clock,
            crypto: CryptoService::new(),
            runtime,
            token_server_uri: token_server_uri.to_string(),
            auth_timeout,
            inner: Mutex::new(IdentityInner {
                state: IdentityState::Uninitialized,
                account: None,
                username: String::new(),
                token: None,
                key_bundle: None,
                should_have_key_bundle: false,
                generation: 0,
                listening: false,
            }),
            ready,
            logout_listeners: Mutex::new(Vec::new()),
        })
    }

    fn inner(&self) -> MutexGuard<'_, IdentityInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn accounts(&self) -> &Arc<dyn AccountProvider> {
        &self.accounts
    }

    pub fn state(&self) -> IdentityState {
        self.inner().state
    }

    pub fn account(&self) -> Option<String> {
        self.inner().account.clone()
    }

    /// Storage user id, taken from the token once the key bundle is fetched.
    pub fn username(&self) -> String {
        self.inner().username.clone()
    }

    pub fn key_bundle(&self) -> Option<KeyBundle> {
        self.inner().key_bundle.clone()
    }

    pub fn token(&self) -> Option<Token> {
        self.inner().token.clone()
    }

    /// True once a key bundle fetch has completed, even if it failed.
    pub fn ready_to_authenticate(&self) -> bool {
        self.inner().should_have_key_bundle
    }

    pub fn current_auth_state(&self) -> AuthState {
        let inner = self.inner();
        if inner.should_have_key_bundle && inner.key_bundle.is_none() {
            AuthState::NoKeyBundle
        } else if inner.username.is_empty() {
            AuthState::NoUsername
        } else {
            AuthState::Ok
        }
    }

    /// Runs `fut` to completion on this manager's runtime, bounded by the
    /// configured auth timeout.
    pub fn block_on<F: Future>(&self, fut: F) -> Result<F::Output, IdentityError> {
        block_with_timeout(&self.runtime, self.auth_timeout, fut).ok_or(IdentityError::Timeout)
    }

    /// Registers a callback invoked after a logout notification clears state.
    pub fn on_logout(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.logout_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(listener));
    }

    /// Subscribes to account notifications and starts the first key bundle fetch.
    pub fn initialize(self: &Arc<Self>) {
        let first = {
            let mut inner = self.inner();
            !std::mem::replace(&mut inner.listening, true)
        };
        if first {
            let mut events = self.accounts.subscribe();
            let weak = Arc::downgrade(self);
            self.runtime.spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => match weak.upgrade() {
                            Some(manager) => manager.handle_event(event),
                            None => break,
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "account notifications lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });
        }
        self.initialize_with_current_identity();
    }

    /// Resets all credentials and starts a background key bundle fetch for
    /// whoever is signed in now.
    pub fn initialize_with_current_identity(self: &Arc<Self>) {
        trace!("initialize_with_current_identity");
        let generation = {
            let mut inner = self.inner();
            inner.generation += 1;
            inner.state = IdentityState::Initializing;
            inner.should_have_key_bundle = false;
            inner.key_bundle = None;
            inner.username.clear();
            inner.generation
        };
        self.ready.send_replace(ReadyState::Pending);

        let manager = Arc::clone(self);
        self.runtime.spawn(async move {
            manager.run_initialization(generation).await;
        });
    }

    async fn run_initialization(&self, generation: u64) {
        let user = match self.accounts.get_signed_in_user().await {
            Ok(user) => user,
            Err(e) => {
                error!("error processing logged in account: {}", e);
                self.finish_initialization(generation, IdentityState::Uninitialized, ReadyState::Failed(e.to_string()));
                return;
            }
        };

        let Some(user) = user else {
            info!("initialize_with_current_identity has no user logged in");
            {
                let mut inner = self.inner();
                if inner.generation == generation {
                    inner.account = None;
                }
            }
            self.finish_initialization(
                generation,
                IdentityState::Uninitialized,
                ReadyState::Failed(IdentityError::NotSignedIn.to_string()),
            );
            return;
        };

        {
            let mut inner = self.inner();
            if inner.generation != generation {
                return;
            }
            inner.account = Some(user.email.clone());
        }

        info!("starting background fetch for key bundle");
        match self.fetch_sync_key_bundle(generation, &user.email).await {
            Ok(()) => {
                info!("background fetch for key bundle done");
                self.finish_fetch(generation, ReadyState::Ready);
            }
            Err(e) => {
                error!("background fetch for key bundle failed: {}", e);
                self.finish_fetch(generation, ReadyState::Failed(e.to_string()));
            }
        }
    }

    fn finish_fetch(&self, generation: u64, outcome: ReadyState) {
        {
            let mut inner = self.inner();
            if inner.generation != generation {
                debug!("discarding key bundle fetch from a previous identity");
                return;
            }
            inner.should_have_key_bundle = true;
        }
        self.finish_initialization(generation, IdentityState::ReadyToAuthenticate, outcome);
    }

    fn finish_initialization(&self, generation: u64, state: IdentityState, outcome: ReadyState) {
        {
            let mut inner = self.inner();
            if inner.generation != generation {
                return;
            }
            inner.state = state;
        }
        self.ready.send_replace(outcome);
    }

    /// Resolves when the current initialization completes. Completion is
    /// not success: a failed fetch resolves with the recorded error.
    pub async fn when_ready_to_authenticate(&self) -> Result<(), IdentityError> {
        let mut rx = self.ready.subscribe();
        let outcome = rx
            .wait_for(|state| *state != ReadyState::Pending)
            .await
            .map(|state| state.clone())
            .map_err(|_| IdentityError::Cancelled)?;
        match outcome {
            ReadyState::Ready => Ok(()),
            ReadyState::Failed(msg) => Err(IdentityError::Account(msg)),
            ReadyState::Pending => Err(IdentityError::Cancelled),
        }
    }

    /// Blocking form of [`IdentityManager::when_ready_to_authenticate`].
    pub fn wait_until_ready(&self) -> Result<(), IdentityError> {
        self.block_on(self.when_ready_to_authenticate())?
    }

    /// Applies a login-state notification. Safe to call repeatedly.
    pub fn handle_event(self: &Arc<Self>, event: AccountEvent) {
        match event {
            AccountEvent::Verified | AccountEvent::Login => {
                debug!(?event, "re-initializing identity");
                self.initialize_with_current_identity();
            }
            AccountEvent::Logout => {
                info!("account logged out; dropping credentials");
                {
                    let mut inner = self.inner();
                    inner.generation += 1;
                    inner.state = IdentityState::LoggedOut;
                    inner.account = None;
                    inner.username.clear();
                    inner.token = None;
                    inner.key_bundle = None;
                    inner.should_have_key_bundle = false;
                }
                self.ready
                    .send_replace(ReadyState::Failed(IdentityError::NotSignedIn.to_string()));
                {
                    let listeners = self.logout_listeners.lock().unwrap_or_else(|e| e.into_inner());
                    for listener in listeners.iter() {
                        listener();
                    }
                }
                let mut inner = self.inner();
                // A login may already have started re-initializing.
                if inner.state == IdentityState::LoggedOut {
                    inner.state = IdentityState::Uninitialized;
                }
            }
        }
    }

    async fn fetch_sync_key_bundle(&self, generation: u64, account: &str) -> Result<(), IdentityError> {
        let token = self.refresh_token_for_logged_in_user().await?;
        {
            let mut inner = self.inner();
            if inner.generation != generation {
                return Err(IdentityError::AccountChanged);
            }
            inner.token = Some(token.clone());
        }

        let keys = self.accounts.get_keys().await?;
        let keys = match keys {
            Some(keys) if keys.email == account => keys,
            _ => return Err(IdentityError::AccountChanged),
        };
        let bundle = self.crypto.derive_key_bundle(&keys.kb)?;

        let mut inner = self.inner();
        // The signed-in account may have moved on while the keys were in flight.
        if inner.generation != generation || inner.account.as_deref() != Some(account) {
            return Err(IdentityError::AccountChanged);
        }
        inner.username = token.uid.to_string();
        inner.key_bundle = Some(bundle);
        Ok(())
    }

    /// Fetches a token for the signed-in user, provided it is the account
    /// this manager was initialized for.
    pub async fn refresh_token_for_logged_in_user(&self) -> Result<Token, IdentityError> {
        let user = self.accounts.get_signed_in_user().await?;
        let account = self.account();
        match user {
            Some(user) if Some(&user.email) == account.as_ref() => self.fetch_token_for_user(&user).await,
            _ => {
                error!("currently logged in user differs from what was locally noted");
                Err(IdentityError::AccountChanged)
            }
        }
    }

    fn refresh_token_for_logged_in_user_sync(&self) -> Option<Token> {
        match self.block_on(self.refresh_token_for_logged_in_user()) {
            Ok(Ok(token)) => Some(token),
            Ok(Err(e)) | Err(e) => {
                info!("refresh_token_for_logged_in_user_sync: {}", e);
                None
            }
        }
    }

    /// Fetches a fresh token for `user` from the token server.
    pub async fn fetch_token_for_user(&self, user: &AccountData) -> Result<Token, IdentityError> {
        let audience = audience_for(&self.token_server_uri)?;
        self.accounts.when_verified(user).await?;
        let assertion = self.accounts.get_assertion(&audience).await?;
        let response = self
            .token_client
            .fetch_token(&self.token_server_uri, &assertion)
            .await
            .map_err(|e| {
                info!("token fetch failed: {}", e);
                IdentityError::Token(e)
            })?;
        Ok(Token::from_response(response, &user.email, self.clock.now_ms()))
    }

    /// Whether the held token is unexpired and belongs to the signed-in account.
    pub fn has_valid_token(&self) -> bool {
        let (token, account) = {
            let inner = self.inner();
            (inner.token.clone(), inner.account.clone())
        };
        let Some(token) = token else {
            return false;
        };
        if token.expiration <= self.clock.now_ms() {
            return false;
        }
        let signed_in = match self.block_on(self.accounts.get_signed_in_user()) {
            Ok(Ok(user)) => user,
            Ok(Err(e)) | Err(e) => {
                error!("get_signed_in_user failed: {}", e);
                return false;
            }
        };
        let email = signed_in.as_ref().map(|u| u.email.as_str());
        email.is_some() && email == account.as_deref() && token.is_valid_for(email, self.clock.now_ms())
    }

    /// Builds a HAWK `Authorization` header for `method uri`, refreshing the
    /// token first if needed. Returns `None` when no valid token can be had.
    pub fn get_auth_header(&self, uri: &str, method: &str) -> Option<String> {
        if !self.has_valid_token() {
            let token = self.refresh_token_for_logged_in_user_sync()?;
            self.inner().token = Some(token);
        }
        let token = self.inner().token.clone()?;

        let credentials = HawkCredentials {
            id: token.id,
            key: token.key,
        };
        let nonce = match self.crypto.generate_nonce() {
            Ok(nonce) => nonce,
            Err(e) => {
                error!("could not generate HAWK nonce: {}", e);
                return None;
            }
        };
        let artifacts = HawkArtifacts {
            ts: self.clock.now_ms() / 1000,
            nonce,
            ext: None,
        };
        match self.crypto.compute_hawk(uri, method, &credentials, &artifacts) {
            Ok(header) => Some(header),
            Err(e) => {
                warn!("could not sign request: {}", e);
                None
            }
        }
    }
}

/// `scheme://host[:port]` of the token server, used as the assertion audience.
fn audience_for(uri: &str) -> Result<String, IdentityError> {
    let url = Url::parse(uri).map_err(|e| IdentityError::Account(format!("bad token server URI: {}", e)))?;
    Ok(url.origin().ascii_serialization())
}
