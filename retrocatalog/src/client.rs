//! HTTP client for the RetroTV catalog and epoch endpoints
//!
//! Both endpoints are optional: a deployment may ship a static snapshot and
//! no server at all. The client is stateless; fallback and caching decisions
//! are taken by [`crate::CatalogLoader`] and [`crate::EpochProvider`].
//!
//! # Example
//!
//! ```no_run
//! use retrocatalog::RetroApiClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RetroApiClient::new()?;
//!     let doc = client.fetch_catalog("https://tv.example.org/api/channels").await?;
//!     println!("{} channels", doc.channels.len());
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::epoch::epoch_from_value;
use crate::error::{CatalogError, Result};
use crate::models::{CatalogDocument, EpochDocument};

/// Default timeout for HTTP requests (10 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = "RetroTV/0.1 (retrocatalog)";

/// Header carrying the anonymous viewer id, when one is configured
pub const VIEWER_ID_HEADER: &str = "X-Viewer-Id";

#[derive(Debug, Clone)]
pub struct RetroApiClient {
    pub(crate) client: Client,
    timeout: Duration,
    viewer_id: Option<String>,
}

impl RetroApiClient {
    /// Create a new client with default settings
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Create a client around an existing reqwest::Client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            viewer_id: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `url` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut request = self.client.get(url).timeout(self.timeout);
        if let Some(viewer) = &self.viewer_id {
            request = request.header(VIEWER_ID_HEADER, viewer);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::ApiError(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let body = response.text().await?;
        debug!(url = url, bytes = body.len(), "Fetched document");
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch the channel list.
    pub async fn fetch_catalog(&self, url: &str) -> Result<CatalogDocument> {
        self.get_json(url).await
    }

    /// Fetch the global broadcast epoch.
    pub async fn fetch_epoch(&self, url: &str) -> Result<DateTime<Utc>> {
        let doc: EpochDocument = self.get_json(url).await?;
        epoch_from_value(&doc.epoch)
    }
}

/// Builder for configuring a RetroApiClient
#[derive(Debug)]
pub struct ClientBuilder {
    client: Option<Client>,
    timeout: Duration,
    user_agent: String,
    viewer_id: Option<String>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            client: None,
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewer_id: None,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom HTTP client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Send the anonymous viewer id with every request
    pub fn viewer_id(mut self, viewer_id: impl Into<String>) -> Self {
        self.viewer_id = Some(viewer_id.into());
        self
    }

    pub fn build(self) -> Result<RetroApiClient> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout)
                .build()?,
        };

        Ok(RetroApiClient {
            client,
            timeout: self.timeout,
            viewer_id: self.viewer_id,
        })
    }
}
