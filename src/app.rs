//! Sync service for the bookmarks collection.
//!
//! Central struct wiring the places database, change tracker, record store,
//! identity, and cluster resolution into something that can run a sync pass.

use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::database::Database;
use crate::managers::change_tracker::BookmarksTracker;
use crate::managers::places_store::PlacesStore;
use crate::managers::record_store::{AnnotationMicrosummaries, BookmarksStore};
use crate::platform;
use crate::services::account_provider::{AccountProvider, FileAccountProvider};
use crate::services::cluster_manager::ClusterManager;
use crate::services::identity_manager::{Clock, IdentityManager, SystemClock};
use crate::services::storage_client::{HttpStorageClient, StorageClient};
use crate::services::sync_engine::{SyncEngine, SyncSummary};
use crate::services::token_client::{HttpTokenClient, TokenClient};
use crate::types::errors::SyncError;
use crate::types::settings::SyncSettings;
use crate::types::token::AuthState;

/// Everything needed to sync bookmarks for the signed-in account.
///
/// Lives on one thread: the places store is not shareable. Identity work
/// runs on the supplied multi-threaded tokio runtime.
pub struct SyncService {
    settings: SyncSettings,
    places: Rc<PlacesStore>,
    identity: Arc<IdentityManager>,
    cluster: ClusterManager,
    engine: SyncEngine<BookmarksStore, BookmarksTracker>,
    cluster_url: Arc<Mutex<Option<String>>>,
    runtime: Handle,
}

impl SyncService {
    /// Builds the service from explicit collaborators and starts identity
    /// initialization.
    pub fn new(
        settings: SyncSettings,
        db: Arc<Database>,
        accounts: Arc<dyn AccountProvider>,
        token_client: Arc<dyn TokenClient>,
        clock: Arc<dyn Clock>,
        runtime: Handle,
    ) -> Self {
        let places = Rc::new(PlacesStore::new(Arc::clone(&db)));
        let tracker = Arc::new(BookmarksTracker::with_database(Arc::clone(&db), &settings.collection));
        places.add_observer(tracker.clone());

        let store = BookmarksStore::new(Rc::clone(&places))
            .with_microsummaries(Box::new(AnnotationMicrosummaries::new()));
        let engine = SyncEngine::new(&settings.collection, store, tracker, db);

        let identity = IdentityManager::new(
            accounts,
            token_client,
            clock,
            runtime.clone(),
            &settings.token_server_uri,
            Duration::from_secs(settings.auth_timeout_secs),
        );

        let cluster_url = Arc::new(Mutex::new(None));
        {
            let cluster_url = Arc::clone(&cluster_url);
            identity.on_logout(move || {
                info!("logged out; forgetting storage cluster");
                *cluster_url.lock().unwrap_or_else(|e| e.into_inner()) = None;
            });
        }
        identity.initialize();

        Self {
            cluster: ClusterManager::new(Arc::clone(&identity)),
            settings,
            places,
            identity,
            engine,
            cluster_url,
            runtime,
        }
    }

    /// Opens the service against the platform database and account file,
    /// talking HTTP to the configured token server.
    pub fn open(settings: SyncSettings, runtime: Handle) -> Result<Self, Box<dyn std::error::Error>> {
        let db_path = platform::database_path(&settings.database_file);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Arc::new(Database::open(&db_path)?);
        let accounts = Arc::new(FileAccountProvider::new(platform::account_path(&settings.account_file))?);
        let token_client = Arc::new(HttpTokenClient::new(Duration::from_secs(
            settings.request_timeout_secs,
        ))?);
        Ok(Self::new(settings, db, accounts, token_client, Arc::new(SystemClock), runtime))
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn places(&self) -> &Rc<PlacesStore> {
        &self.places
    }

    pub fn identity(&self) -> &Arc<IdentityManager> {
        &self.identity
    }

    pub fn engine(&self) -> &SyncEngine<BookmarksStore, BookmarksTracker> {
        &self.engine
    }

    fn cached_cluster(&self) -> MutexGuard<'_, Option<String>> {
        self.cluster_url.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Storage node for the account, resolved once per login.
    pub fn cluster_url(&self) -> Result<String, SyncError> {
        if let Some(url) = self.cached_cluster().clone() {
            return Ok(url);
        }
        let url = self.cluster.resolve_cluster_url()?;
        *self.cached_cluster() = Some(url.clone());
        Ok(url)
    }

    /// Waits for identity, then runs one sync pass against the account's
    /// storage node.
    pub fn sync(&self) -> Result<SyncSummary, SyncError> {
        self.ensure_ready()?;
        let cluster = self.cluster_url()?;
        let storage = HttpStorageClient::new(
            Arc::clone(&self.identity),
            self.runtime.clone(),
            &cluster,
            Duration::from_secs(self.settings.request_timeout_secs),
        )?;
        self.sync_with(&storage)
    }

    /// Runs one sync pass against an explicit storage client.
    pub fn sync_with(&self, storage: &dyn StorageClient) -> Result<SyncSummary, SyncError> {
        self.ensure_ready()?;
        let keys = self
            .identity
            .key_bundle()
            .ok_or_else(|| SyncError::NotReady("no key bundle".to_string()))?;
        self.engine.sync(storage, &keys)
    }

    fn ensure_ready(&self) -> Result<(), SyncError> {
        if let Err(e) = self.identity.wait_until_ready() {
            warn!("identity not ready: {}", e);
            return Err(SyncError::NotReady(e.to_string()));
        }
        match self.identity.current_auth_state() {
            AuthState::Ok => Ok(()),
            state => Err(SyncError::NotReady(format!("{:?}", state))),
        }
    }
}
