//! Remote sync endpoint client.

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use healthsync_common::{ApiKey, Error, Result, SyncPayload};

use crate::config::AgentConfig;

/// Header carrying the static credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Server acknowledgement of a pushed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReceipt {
    pub records_synced: u64,
}

/// Response body of `POST /fitbit/sync`.
#[derive(Debug, Deserialize)]
struct SyncResponse {
    #[serde(default)]
    records_synced: Option<u64>,
}

/// One entry of the server-side sync history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLogEntry {
    pub timestamp: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub records_synced: Option<u64>,
    #[serde(default)]
    pub sync_type: Option<String>,
}

/// Response body of `GET /fitbit/sync-logs`.
#[derive(Debug, Deserialize)]
struct SyncLogsResponse {
    #[serde(default)]
    logs: Vec<RemoteLogEntry>,
}

/// Transport to the remote sync service.
///
/// Every call is bounded by a timeout; a timeout surfaces as
/// `Error::Transport`.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Human-readable endpoint description.
    fn endpoint(&self) -> &str;

    /// Connectivity probe. `Ok` means the service answered 2xx.
    async fn probe(&self) -> Result<()>;

    /// Transmit a payload.
    ///
    /// # Errors
    /// - `Error::Transport` when the service is unreachable
    /// - `Error::RemoteRejected` on a non-2xx answer
    async fn push(&self, payload: &SyncPayload) -> Result<PushReceipt>;

    /// Fetch up to `limit` entries of the server-side sync history.
    async fn fetch_logs(&self, limit: usize) -> Result<Vec<RemoteLogEntry>>;
}

/// HTTP implementation of [`SyncTransport`].
pub struct HttpTransport {
    http: Client,
    base: String,
    api_key: ApiKey,
    probe_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport from the agent configuration.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("healthsync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base: config.base_url().to_string(),
            api_key: config.api_key.clone(),
            probe_timeout: config.probe_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Turn a non-2xx response into `RemoteRejected`.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let body = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("").to_string()
        } else {
            body
        };
        Err(Error::rejected(status.as_u16(), body))
    }
}

fn transport_error(action: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Transport(format!("{} timed out", action))
    } else if err.is_connect() {
        Error::Transport(format!("{}: cannot connect: {}", action, err))
    } else {
        Error::Transport(format!("{}: {}", action, err))
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.base
    }

    async fn probe(&self) -> Result<()> {
        let response = self
            .http
            .get(self.url("/health"))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| transport_error("Health check", e))?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn push(&self, payload: &SyncPayload) -> Result<PushReceipt> {
        let response = self
            .http
            .post(self.url("/fitbit/sync"))
            .header(API_KEY_HEADER, self.api_key.expose())
            .header(header::CONTENT_TYPE, "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error("Sync request", e))?;

        let response = Self::check_status(response).await?;

        let records_synced = match response.json::<SyncResponse>().await {
            Ok(SyncResponse {
                records_synced: Some(n),
            }) => n,
            Ok(SyncResponse {
                records_synced: None,
            }) => {
                debug!("Sync response carried no records_synced");
                0
            }
            Err(e) => {
                warn!("Accepted sync with unreadable response body: {}", e);
                0
            }
        };

        Ok(PushReceipt { records_synced })
    }

    async fn fetch_logs(&self, limit: usize) -> Result<Vec<RemoteLogEntry>> {
        let response = self
            .http
            .get(self.url("/fitbit/sync-logs"))
            .header(API_KEY_HEADER, self.api_key.expose())
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(|e| transport_error("Log request", e))?;

        let response = Self::check_status(response).await?;
        let body: SyncLogsResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Invalid sync-logs response: {}", e)))?;

        Ok(body.logs)
    }
}
