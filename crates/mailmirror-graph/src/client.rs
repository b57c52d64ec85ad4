//! Microsoft Graph HTTP client
//!
//! Wraps `reqwest::Client` with bearer authentication, endpoint construction
//! and the mapping from HTTP outcomes onto [`SourceError`] classes. The
//! client never retries; the engine owns backoff.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mailmirror_core::config::GraphConfig;
use mailmirror_core::ports::{ICredentialProvider, SourceError};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::rate_limit::{parse_retry_after, DEFAULT_RETRY_AFTER};

/// Base URL for Microsoft Graph API v1.0
const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

const USER_AGENT: &str = concat!("mailmirror/", env!("CARGO_PKG_VERSION"));

/// Error codes Graph returns with 400 when a delta token is no longer usable
const CURSOR_ERROR_CODES: &[&str] = &["SyncStateNotFound", "SyncStateInvalid", "ResyncRequired"];

// ============================================================================
// Graph API error body
// ============================================================================

/// `{"error": {"code": "...", "message": "..."}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

// ============================================================================
// GraphClient
// ============================================================================

/// Authenticated HTTP client for Microsoft Graph
pub struct GraphClient {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn ICredentialProvider>,
}

impl GraphClient {
    /// Creates a client for the public Graph endpoint
    pub fn new(credentials: Arc<dyn ICredentialProvider>) -> Result<Self> {
        Self::with_base_url(credentials, GRAPH_BASE_URL)
    }

    /// Creates a client with a custom base URL (useful for testing)
    pub fn with_base_url(credentials: Arc<dyn ICredentialProvider>, base_url: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid Graph base URL '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            bail!("Graph base URL '{base_url}' cannot carry a path");
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            credentials,
        })
    }

    /// Creates a client from the `graph` configuration section
    pub fn from_config(config: &GraphConfig, credentials: Arc<dyn ICredentialProvider>) -> Result<Self> {
        let mut graph = Self::with_base_url(credentials, &config.base_url)?;
        graph.client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(graph)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the URL for `segments` below the base URL
    ///
    /// Each segment is percent-encoded on its own, so IDs containing `/`
    /// stay a single path segment.
    pub fn endpoint<I, S>(&self, segments: I) -> Url
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Resolves a server-issued `@odata.nextLink` or `@odata.deltaLink`
    ///
    /// Links must stay on the configured origin; the bearer token is never
    /// sent anywhere else.
    pub fn link(&self, link: &str) -> Result<Url, SourceError> {
        let url = self
            .base_url
            .join(link)
            .map_err(|e| SourceError::Protocol(format!("Invalid link '{link}': {e}")))?;
        if url.origin() != self.base_url.origin() {
            return Err(SourceError::Protocol(format!(
                "Link '{link}' points outside {}",
                self.base_url
            )));
        }
        Ok(url)
    }

    /// Sends an authenticated GET and classifies any failure
    ///
    /// `prefer` values are joined into a single `Prefer` header.
    pub async fn get(&self, url: Url, prefer: &[String]) -> Result<Response, SourceError> {
        let token = self
            .credentials
            .bearer_token()
            .await
            .map_err(|e| SourceError::Unauthorized(format!("{e:#}")))?;

        debug!(url = %url, "GET");
        let mut request = self.client.get(url).bearer_auth(token);
        if !prefer.is_empty() {
            request = request.header("Prefer", prefer.join(", "));
        }

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        check_status(response).await
    }

    /// GET returning a deserialized JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        prefer: &[String],
    ) -> Result<T, SourceError> {
        let body = self
            .get(url, prefer)
            .await?
            .bytes()
            .await
            .map_err(|e| classify_transport(&e))?;
        serde_json::from_slice(&body)
            .map_err(|e| SourceError::Protocol(format!("Malformed response body: {e}")))
    }

    /// GET returning the raw body
    pub async fn get_bytes(&self, url: Url, prefer: &[String]) -> Result<Vec<u8>, SourceError> {
        let bytes = self
            .get(url, prefer)
            .await?
            .bytes()
            .await
            .map_err(|e| classify_transport(&e))?;
        Ok(bytes.to_vec())
    }
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Classification
// ============================================================================

async fn check_status(response: Response) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER));
    let body = response.text().await.unwrap_or_default();

    let error = classify_status(status, retry_after, &body);
    match &error {
        SourceError::RateLimited { retry_after } => warn!(
            status = %status,
            retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
            "Throttled by Graph"
        ),
        other => debug!(status = %status, error = %other, "Graph request failed"),
    }
    Err(error)
}

/// Maps an HTTP error status (and its Graph error body) onto a [`SourceError`]
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> SourceError {
    let (code, message) = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| (e.error.code, e.error.message))
        .unwrap_or_default();
    let detail = if message.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {message}")
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Unauthorized(detail),
        StatusCode::NOT_FOUND => SourceError::NotFound(detail),
        StatusCode::GONE => SourceError::CursorInvalid,
        StatusCode::BAD_REQUEST if CURSOR_ERROR_CODES.contains(&code.as_str()) => {
            SourceError::CursorInvalid
        }
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited { retry_after },
        StatusCode::SERVICE_UNAVAILABLE if retry_after.is_some() => {
            SourceError::RateLimited { retry_after }
        }
        StatusCode::REQUEST_TIMEOUT => SourceError::Transient(detail),
        s if s.is_server_error() => SourceError::Transient(detail),
        _ => SourceError::Protocol(detail),
    }
}

/// Connection-level failures are worth retrying; undecodable bodies are not
fn classify_transport(err: &reqwest::Error) -> SourceError {
    if err.is_decode() || err.is_builder() {
        SourceError::Protocol(err.to_string())
    } else {
        SourceError::Transient(err.to_string())
    }
}
