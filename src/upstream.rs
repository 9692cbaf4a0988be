//! Typed HTTP client for the upstream session manager.
//!
//! One method per upstream capability. Every call is attempted exactly once;
//! any transport failure, non-2xx status, or undecodable body is reported as
//! an [`UpstreamError`] carrying the underlying message. Retry policy, if
//! any, belongs to the caller.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::ShellOutput;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api";

/// Default connect and request timeouts for ordinary upstream calls.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bulk exec waits on many remote commands, so it gets a longer budget.
pub const BULK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection refused, DNS failure, timeout, broken body stream.
    #[error("{0}")]
    Transport(String),

    /// The upstream answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The upstream answered 2xx but the body did not match the schema.
    #[error("invalid response from upstream: {0}")]
    Decode(String),

    /// The client could not be built or the endpoint is unusable.
    #[error("upstream client error: {0}")]
    Client(String),
}

// ── Wire schema ────────────────────────────────────────────────────

/// Body of `POST /sessions/exec-bulk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExecRequest {
    pub cmd: String,
    pub session_ids: Vec<String>,
}

/// Outcome of the command on one session.
///
/// Fields the gateway does not know about (e.g. `stdout`) are carried through
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExecResult {
    pub sid: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkExecResponse {
    pub results: Vec<BulkExecResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellStarted {
    pub session_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShellInputBody<'a> {
    session_id: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShellCloseBody<'a> {
    session_id: &'a str,
}

/// Pull the session IDs out of a `GET /sessions` listing, skipping entries
/// without a string `ID`.
pub fn session_ids(listing: &[serde_json::Value]) -> Vec<String> {
    listing
        .iter()
        .filter_map(|s| s.get("ID").and_then(|id| id.as_str()))
        .map(str::to_string)
        .collect()
}

// ── Client ─────────────────────────────────────────────────────────

/// Timeout budget for upstream calls.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub request: Duration,
    pub bulk: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: CONNECT_TIMEOUT,
            request: REQUEST_TIMEOUT,
            bulk: BULK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    endpoint: Url,
    http: Client,
    bulk_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(endpoint: Url, timeouts: Timeouts) -> Result<Self, UpstreamError> {
        if endpoint.cannot_be_a_base() {
            return Err(UpstreamError::Client(format!(
                "endpoint '{}' cannot be used as a base URL",
                endpoint
            )));
        }
        let http = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;
        Ok(Self {
            endpoint,
            http,
            bulk_timeout: timeouts.bulk,
        })
    }

    /// The base URL every upstream path is resolved against.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `GET /sessions`, reduced to the IDs of the listed sessions.
    pub async fn list_sessions(&self) -> Result<Vec<String>, UpstreamError> {
        tracing::debug!("upstream: list sessions");
        let listing: Vec<serde_json::Value> =
            send(self.http.get(self.url(&["sessions"]))).await?;
        Ok(session_ids(&listing))
    }

    /// `GET /sessions/{sid}/info`, passed through as-is.
    pub async fn session_info(&self, sid: &str) -> Result<serde_json::Value, UpstreamError> {
        tracing::debug!(sid, "upstream: session info");
        send(self.http.get(self.url(&["sessions", sid, "info"]))).await
    }

    /// `POST /sessions/exec-bulk` under the extended bulk timeout.
    pub async fn exec_bulk(
        &self,
        req: &BulkExecRequest,
    ) -> Result<BulkExecResponse, UpstreamError> {
        tracing::debug!(sessions = req.session_ids.len(), "upstream: exec bulk");
        let builder = self
            .http
            .post(self.url(&["sessions", "exec-bulk"]))
            .timeout(self.bulk_timeout)
            .json(req);
        send(builder).await
    }

    /// `POST /sessions/{sid}/shell/start`.
    pub async fn shell_start(&self, sid: &str) -> Result<ShellStarted, UpstreamError> {
        tracing::debug!(sid, "upstream: shell start");
        let builder = self
            .http
            .post(self.url(&["sessions", sid, "shell", "start"]))
            .json(&serde_json::json!({}));
        send(builder).await
    }

    /// `POST /sessions/{sid}/shell/input`.
    pub async fn shell_input(
        &self,
        sid: &str,
        session_id: &str,
        data: &str,
    ) -> Result<serde_json::Value, UpstreamError> {
        tracing::debug!(sid, session_id, bytes = data.len(), "upstream: shell input");
        let builder = self
            .http
            .post(self.url(&["sessions", sid, "shell", "input"]))
            .json(&ShellInputBody { session_id, data });
        send(builder).await
    }

    /// `GET /sessions/{sid}/shell/output?sessionId=&cursor=`.
    pub async fn shell_output(
        &self,
        sid: &str,
        session_id: &str,
        cursor: u64,
    ) -> Result<ShellOutput, UpstreamError> {
        tracing::debug!(sid, session_id, cursor, "upstream: shell output");
        let cursor_param = cursor.to_string();
        let builder = self
            .http
            .get(self.url(&["sessions", sid, "shell", "output"]))
            .query(&[("sessionId", session_id), ("cursor", cursor_param.as_str())]);
        send(builder).await
    }

    /// `POST /sessions/{sid}/shell/close`.
    pub async fn shell_close(
        &self,
        sid: &str,
        session_id: &str,
    ) -> Result<serde_json::Value, UpstreamError> {
        tracing::debug!(sid, session_id, "upstream: shell close");
        let builder = self
            .http
            .post(self.url(&["sessions", sid, "shell", "close"]))
            .json(&ShellCloseBody { session_id });
        send(builder).await
    }

    /// Append percent-encoded path segments to the endpoint.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

/// Send once and decode a 2xx JSON body.
async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, UpstreamError> {
    let resp = builder.send().await.map_err(|e| {
        tracing::warn!(error = %e, "upstream request failed");
        UpstreamError::Transport(e.to_string())
    })?;

    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|e| UpstreamError::Transport(e.to_string()))?;

    if !status.is_success() {
        let message = error_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string()
        });
        tracing::warn!(status = status.as_u16(), %message, "upstream returned error status");
        return Err(UpstreamError::Status {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
}

/// The `error` string of an upstream error body, if it has one.
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("error")?.as_str().map(str::to_string)
}
