//! Sync engine.
//!
//! Drives one pass over a collection: download and apply what changed on
//! the server, then upload what the tracker saw change locally. The whole
//! pass runs inside the local store's batch scope.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::database::Database;
use crate::managers::change_tracker::SyncTracker;
use crate::managers::record_store::SyncStore;
use crate::services::crypto_service::{CryptoService, CryptoServiceTrait};
use crate::services::storage_client::StorageClient;
use crate::types::errors::{StoreError, SyncError};
use crate::types::record::{EncryptedPayload, PlacesRecord, StoredRecord};
use crate::types::token::KeyBundle;

/// Counts reported by a finished sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub applied: usize,
    /// Incoming records that could not be decrypted or applied.
    pub failed: usize,
    pub reparented: usize,
    pub uploaded: usize,
}

pub struct SyncEngine<S: SyncStore, T: SyncTracker> {
    collection: String,
    store: S,
    tracker: Arc<T>,
    db: Arc<Database>,
    crypto: CryptoService,
}

impl<S: SyncStore, T: SyncTracker> SyncEngine<S, T> {
    pub fn new(collection: &str, store: S, tracker: Arc<T>, db: Arc<Database>) -> Self {
        Self {
            collection: collection.to_string(),
            store,
            tracker,
            db,
            crypto: CryptoService::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<T> {
        &self.tracker
    }

    pub fn last_sync(&self) -> Result<f64, SyncError> {
        self.db
            .last_sync(&self.collection)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))
    }

    /// Runs one full pass against `storage` using `keys` for payloads.
    pub fn sync(&self, storage: &dyn StorageClient, keys: &KeyBundle) -> Result<SyncSummary, SyncError> {
        info!(collection = %self.collection, "starting sync");
        self.store.clear_cache();
        let summary = self.store.run_in_batch(|| self.sync_batched(storage, keys))?;
        info!(
            collection = %self.collection,
            applied = summary.applied,
            failed = summary.failed,
            reparented = summary.reparented,
            uploaded = summary.uploaded,
            "sync finished"
        );
        Ok(summary)
    }

    fn sync_batched(&self, storage: &dyn StorageClient, keys: &KeyBundle) -> Result<SyncSummary, SyncError> {
        let last_sync = self.last_sync()?;
        if last_sync <= 0.0 {
            info!("first sync: marking every local item changed");
            for guid in self.store.get_all_ids()? {
                self.tracker.add_changed_id(&guid);
            }
        }

        self.tracker.set_ignore_all(true);
        let incoming = self.process_incoming(storage, keys, last_sync);
        self.tracker.set_ignore_all(false);
        let (mut summary, newest) = incoming?;

        let uploaded = self.upload_outgoing(storage, keys)?;
        summary.uploaded = uploaded.0;

        let timestamp = newest.max(uploaded.1).max(last_sync);
        self.db
            .set_last_sync(&self.collection, timestamp)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))?;
        self.tracker.reset_score();
        Ok(summary)
    }

    /// Applies server changes. Returns the summary so far and the newest
    /// server timestamp seen.
    fn process_incoming(
        &self,
        storage: &dyn StorageClient,
        keys: &KeyBundle,
        last_sync: f64,
    ) -> Result<(SyncSummary, f64), SyncError> {
        let mut summary = SyncSummary::default();
        let mut newest = last_sync;

        for stored in storage.fetch(&self.collection, last_sync)? {
            newest = newest.max(stored.modified);
            let record = match self.open_record(&stored, keys) {
                Ok(record) => record,
                Err(e) => {
                    warn!(id = %stored.id, "skipping undecryptable record: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };

            // Server wins over a pending local change.
            self.tracker.remove_changed_id(&record.id);

            let guid = record.id.clone();
            match self.store.apply_incoming(record) {
                Ok(()) => summary.applied += 1,
                Err(e @ StoreError::UnknownType(_)) => {
                    error!(guid = %guid, "could not apply record: {}", e);
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(guid = %guid, "could not apply record: {}", e);
                    summary.failed += 1;
                }
            }
        }

        summary.reparented = self.store.reparent_orphans()?;
        Ok((summary, newest))
    }

    /// Uploads every changed item. Returns the count and the server timestamp.
    fn upload_outgoing(&self, storage: &dyn StorageClient, keys: &KeyBundle) -> Result<(usize, f64), SyncError> {
        let mut outgoing = Vec::new();
        for guid in self.tracker.changed_ids() {
            match self.seal_record(&guid, keys) {
                Ok(stored) => outgoing.push(stored),
                Err(e) => warn!(guid = %guid, "could not serialize record: {}", e),
            }
        }
        if outgoing.is_empty() {
            debug!("nothing to upload");
            return Ok((0, 0.0));
        }

        let result = storage.upload(&self.collection, &outgoing)?;
        for guid in &result.success {
            self.tracker.remove_changed_id(guid);
        }
        for (guid, reasons) in &result.failed {
            warn!(guid = %guid, ?reasons, "server rejected record");
        }
        Ok((result.success.len(), result.modified))
    }

    fn open_record(&self, stored: &StoredRecord, keys: &KeyBundle) -> Result<PlacesRecord, String> {
        let envelope: EncryptedPayload =
            serde_json::from_str(&stored.payload).map_err(|e| e.to_string())?;
        let cleartext = self
            .crypto
            .open_payload(keys, &envelope)
            .map_err(|e| e.to_string())?;
        let record: PlacesRecord = serde_json::from_slice(&cleartext).map_err(|e| e.to_string())?;
        if record.id != stored.id {
            return Err(format!("payload id {} does not match record id", record.id));
        }
        Ok(record)
    }

    fn seal_record(&self, guid: &str, keys: &KeyBundle) -> Result<StoredRecord, SyncError> {
        let record = self.store.create_record(guid)?;
        let cleartext = serde_json::to_vec(&record).map_err(|e| SyncError::Payload(e.to_string()))?;
        let envelope = self
            .crypto
            .seal_payload(keys, &cleartext)
            .map_err(|e| SyncError::Payload(e.to_string()))?;
        let payload = serde_json::to_string(&envelope).map_err(|e| SyncError::Payload(e.to_string()))?;
        Ok(StoredRecord {
            id: guid.to_string(),
            modified: 0.0,
            payload,
        })
    }

    /// Drops local content and pending changes.
    pub fn wipe_client(&self) -> Result<(), SyncError> {
        self.tracker.set_ignore_all(true);
        let result = self.store.run_in_batch(|| self.store.wipe());
        self.tracker.set_ignore_all(false);
        result?;
        self.tracker.clear_changed_ids();
        self.tracker.reset_score();
        self.db
            .set_last_sync(&self.collection, 0.0)
            .map_err(|e| SyncError::DatabaseError(e.to_string()))
    }
}
