//! Token server client.
//!
//! Exchanges a BrowserID assertion for a short-lived storage token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::types::errors::TokenError;
use crate::types::token::TokenResponse;

/// Trait defining the token exchange.
#[async_trait]
pub trait TokenClient: Send + Sync {
    /// Sends `assertion` to `endpoint` and returns the issued credentials.
    ///
    /// The response carries a relative `duration`; callers compute the
    /// absolute expiration.
    async fn fetch_token(&self, endpoint: &str, assertion: &str) -> Result<TokenResponse, TokenError>;
}

/// Token client speaking HTTP to a real token server.
pub struct HttpTokenClient {
    client: reqwest::Client,
}

impl HttpTokenClient {
    pub fn new(timeout: Duration) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TokenError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TokenClient for HttpTokenClient {
    async fn fetch_token(&self, endpoint: &str, assertion: &str) -> Result<TokenResponse, TokenError> {
        info!(endpoint, "fetching sync token");
        let response = self
            .client
            .get(endpoint)
            .header("Authorization", format!("BrowserID {}", assertion))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::AssertionRejected(format!("HTTP {}: {}", status.as_u16(), body)));
        }
        if !status.is_success() {
            return Err(TokenError::Protocol(format!("unexpected HTTP {}", status.as_u16())));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Protocol(format!("malformed token response: {}", e)))?;
        debug!(uid = token.uid, duration = token.duration, "token issued");
        Ok(token)
    }
}
