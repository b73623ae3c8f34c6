//! Storage cluster resolution.

use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, info};

use crate::services::identity_manager::IdentityManager;
use crate::types::errors::{ClusterError, IdentityError};

/// Resolves the storage node for the signed-in account.
pub struct ClusterManager {
    identity: Arc<IdentityManager>,
}

impl ClusterManager {
    pub fn new(identity: Arc<IdentityManager>) -> Self {
        Self { identity }
    }

    /// Fetches a fresh token and returns its endpoint with the path reset to `/`.
    ///
    /// Never served from cache; blocks up to the identity manager's auth timeout.
    pub fn resolve_cluster_url(&self) -> Result<String, ClusterError> {
        let identity = Arc::clone(&self.identity);
        let token = self.identity.block_on(async move {
            let user = identity
                .accounts()
                .get_signed_in_user()
                .await?
                .ok_or(IdentityError::NotSignedIn)?;
            identity.fetch_token_for_user(&user).await
        })??;

        debug!(endpoint = %token.endpoint, "token endpoint");
        let cluster = normalize_endpoint(&token.endpoint)?;
        info!(cluster = %cluster, "resolved storage cluster");
        Ok(cluster)
    }
}

/// Drops path, query, and fragment from a storage endpoint.
pub fn normalize_endpoint(endpoint: &str) -> Result<String, ClusterError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| ClusterError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
    if url.cannot_be_a_base() {
        return Err(ClusterError::InvalidEndpoint(endpoint.to_string()));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}
