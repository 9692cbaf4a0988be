//! Stateless relay for upstream shell sessions.
//!
//! A shell is addressed by its session `sid` plus the `sessionId` the
//! upstream minted when the shell was started. Every call carries both; the
//! gateway keeps no handle, buffer, or cursor between requests.

use reqwest::Url;

use crate::error::{required, GatewayError};
use crate::protocol::ShellOutput;
use crate::upstream::{ShellStarted, UpstreamClient, UpstreamError};

const MISSING_SID: &str = "Missing sid";
const MISSING_HANDLE: &str = "Missing sid/sessionId";

/// Identifies one shell inside one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellHandle {
    pub sid: String,
    pub session_id: String,
}

impl ShellHandle {
    /// Both identifiers are required and trimmed.
    pub fn from_parts(sid: Option<&str>, session_id: Option<&str>) -> Result<Self, GatewayError> {
        let sid = required(sid, MISSING_HANDLE)?;
        let session_id = required(session_id, MISSING_HANDLE)?;
        Ok(Self {
            sid: sid.to_string(),
            session_id: session_id.to_string(),
        })
    }
}

/// Validate a bare session ID.
pub fn require_sid(sid: Option<&str>) -> Result<String, GatewayError> {
    required(sid, MISSING_SID).map(str::to_string)
}

/// Parse an output cursor. Absent, malformed, or negative values restart the
/// poll from the beginning of the buffer.
pub fn parse_cursor(raw: Option<&str>) -> u64 {
    raw.and_then(|c| c.trim().parse().ok()).unwrap_or(0)
}

/// Advisory socket URL for a session's shell, derived from the upstream
/// endpoint: `http` becomes `ws`, `https` becomes `wss`, and the path is
/// replaced by `/ws/shell?sid=`. Nothing is opened.
pub fn ws_url(endpoint: &Url, sid: &str) -> Result<String, GatewayError> {
    let scheme = if endpoint.scheme() == "https" { "wss" } else { "ws" };
    let mut url = endpoint.clone();
    url.set_scheme(scheme).map_err(|()| {
        UpstreamError::Client(format!("cannot derive a socket URL from '{}'", endpoint))
    })?;
    url.set_path("/ws/shell");
    url.set_fragment(None);
    url.query_pairs_mut().clear().append_pair("sid", sid);
    Ok(url.to_string())
}

pub struct ShellProxy<'a> {
    upstream: &'a UpstreamClient,
}

impl<'a> ShellProxy<'a> {
    pub fn new(upstream: &'a UpstreamClient) -> Self {
        Self { upstream }
    }

    pub async fn start(&self, sid: &str) -> Result<ShellStarted, GatewayError> {
        let started = self.upstream.shell_start(sid).await?;
        tracing::info!(sid, session_id = %started.session_id, "shell started");
        Ok(started)
    }

    /// Forward terminal input as-is.
    pub async fn input(
        &self,
        handle: &ShellHandle,
        data: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        Ok(self
            .upstream
            .shell_input(&handle.sid, &handle.session_id, data)
            .await?)
    }

    /// Read output from `cursor`.
    ///
    /// Output that is not base64 is rejected. `nextCursor` and `data` are
    /// relayed as the upstream sent them, even when they do not line up with
    /// `cursor` (an upstream that clamps a cursor past the end answers with
    /// its buffer length).
    pub async fn output(
        &self,
        handle: &ShellHandle,
        cursor: u64,
    ) -> Result<ShellOutput, GatewayError> {
        let output = self
            .upstream
            .shell_output(&handle.sid, &handle.session_id, cursor)
            .await?;
        output.check_encoding().map_err(|e| {
            tracing::warn!(sid = %handle.sid, session_id = %handle.session_id, error = %e, "upstream broke output protocol");
            UpstreamError::Decode(e.to_string())
        })?;
        if let Err(e) = output.check(cursor) {
            tracing::debug!(sid = %handle.sid, session_id = %handle.session_id, error = %e, "relaying output that does not follow the requested cursor");
        }
        Ok(output)
    }

    /// Close the shell. Whatever the upstream says about an already-closed
    /// shell is relayed unchanged.
    pub async fn close(&self, handle: &ShellHandle) -> Result<serde_json::Value, GatewayError> {
        let ack = self
            .upstream
            .shell_close(&handle.sid, &handle.session_id)
            .await?;
        tracing::info!(sid = %handle.sid, session_id = %handle.session_id, "shell closed");
        Ok(ack)
    }
}
