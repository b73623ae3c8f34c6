//! Storage server client.
//!
//! Reads and writes one collection on the account's storage node. Requests
//! are HAWK-signed with the current token and bridged to synchronous calls.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::services::identity_manager::{block_with_timeout, IdentityManager};
use crate::types::errors::StorageError;
use crate::types::record::{StoredRecord, UploadResult};

/// Storage API version segment.
const STORAGE_VERSION: &str = "1.5";

/// Trait defining the storage operations the sync engine performs.
pub trait StorageClient {
    /// Records in `collection` modified after `newer` (server seconds).
    fn fetch(&self, collection: &str, newer: f64) -> Result<Vec<StoredRecord>, StorageError>;

    /// Writes `records` to `collection`.
    fn upload(&self, collection: &str, records: &[StoredRecord]) -> Result<UploadResult, StorageError>;
}

/// Storage client speaking HTTP to a storage node.
pub struct HttpStorageClient {
    client: reqwest::Client,
    identity: Arc<IdentityManager>,
    runtime: Handle,
    cluster_url: String,
    timeout: Duration,
}

impl HttpStorageClient {
    pub fn new(
        identity: Arc<IdentityManager>,
        runtime: Handle,
        cluster_url: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Network(e.to_string()))?;
        Ok(Self {
            client,
            identity,
            runtime,
            cluster_url: cluster_url.to_string(),
            timeout,
        })
    }

    pub fn cluster_url(&self) -> &str {
        &self.cluster_url
    }

    /// `<cluster>1.5/<uid>/storage/<collection>`
    pub fn collection_url(&self, collection: &str) -> String {
        let base = self.cluster_url.trim_end_matches('/');
        format!(
            "{}/{}/{}/storage/{}",
            base,
            STORAGE_VERSION,
            self.identity.username(),
            collection
        )
    }

    fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
    ) -> Result<String, StorageError> {
        let auth = self
            .identity
            .get_auth_header(url, method.as_str())
            .ok_or(StorageError::Unauthorized)?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .header("Authorization", auth)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.header("Content-Type", "application/json").body(body);
        }

        debug!(%method, url, "storage request");
        let response = block_with_timeout(&self.runtime, self.timeout, async move {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        })
        .ok_or(StorageError::Timeout)?;

        let (status, text) = response.map_err(|e| StorageError::Network(e.to_string()))?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(StorageError::Unauthorized);
        }
        if !status.is_success() {
            return Err(StorageError::Http(status.as_u16()));
        }
        Ok(text)
    }
}

impl StorageClient for HttpStorageClient {
    fn fetch(&self, collection: &str, newer: f64) -> Result<Vec<StoredRecord>, StorageError> {
        let url = format!("{}?full=1&newer={:.2}", self.collection_url(collection), newer);
        let body = self.send(Method::GET, &url, None)?;
        let records: Vec<StoredRecord> =
            serde_json::from_str(&body).map_err(|e| StorageError::Parse(e.to_string()))?;
        info!(collection, count = records.len(), "fetched records");
        Ok(records)
    }

    fn upload(&self, collection: &str, records: &[StoredRecord]) -> Result<UploadResult, StorageError> {
        let url = self.collection_url(collection);
        let body = serde_json::to_string(records).map_err(|e| StorageError::Parse(e.to_string()))?;
        let response = self.send(Method::POST, &url, Some(body))?;
        let result: UploadResult =
            serde_json::from_str(&response).map_err(|e| StorageError::Parse(e.to_string()))?;
        info!(
            collection,
            uploaded = result.success.len(),
            failed = result.failed.len(),
            "uploaded records"
        );
        Ok(result)
    }
}
