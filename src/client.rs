//! Client for the gateway's own HTTP surface.
//!
//! Used by the CLI subcommands. [`ShellPoller`] is the caller side of the
//! cursor output protocol: it turns repeated `GET /actions/shell/output`
//! calls into an ordered, gap-free byte stream.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::protocol::{OutputCursor, ProtocolViolation, ShellOutput};
use crate::upstream::{BulkExecRequest, BulkExecResponse, ShellStarted};

pub const DEFAULT_GATEWAY: &str = "http://127.0.0.1:5001";

/// Poll interval between output requests while the shell is open.
pub const POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Back-off after a failed output request.
pub const ERROR_BACKOFF: Duration = Duration::from_millis(300);

/// How long a detached shell keeps polling for output written before the
/// close.
pub const CLOSE_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("gateway unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway answered with its `{error}` body.
    #[error("gateway returned {status}: {message}")]
    Gateway { status: u16, message: String },

    #[error("invalid gateway URL: {0}")]
    Url(String),

    #[error("output protocol violated: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Local terminal input or output failed.
    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct GatewayClient {
    base: Url,
    http: Client,
}

impl GatewayClient {
    pub fn new(base: &str) -> Result<Self, ClientError> {
        let base: Url = base
            .parse()
            .map_err(|e| ClientError::Url(format!("{}: {}", base, e)))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Url(base.to_string()));
        }
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { base, http })
    }

    pub async fn sessions(&self) -> Result<serde_json::Value, ClientError> {
        send(self.http.get(self.url(&["sessions"]))).await
    }

    pub async fn exec_bulk(&self, req: &BulkExecRequest) -> Result<BulkExecResponse, ClientError> {
        send(self.http.post(self.url(&["actions", "exec-bulk"])).json(req)).await
    }

    pub async fn shell_start(&self, sid: &str) -> Result<ShellStarted, ClientError> {
        let body = serde_json::json!({ "sid": sid });
        send(self.http.post(self.url(&["actions", "shell", "start"])).json(&body)).await
    }

    pub async fn shell_input(
        &self,
        sid: &str,
        session_id: &str,
        data: &str,
    ) -> Result<serde_json::Value, ClientError> {
        let body = serde_json::json!({ "sid": sid, "sessionId": session_id, "data": data });
        send(self.http.post(self.url(&["actions", "shell", "input"])).json(&body)).await
    }

    pub async fn shell_output(
        &self,
        sid: &str,
        session_id: &str,
        cursor: u64,
    ) -> Result<ShellOutput, ClientError> {
        let cursor = cursor.to_string();
        let builder = self
            .http
            .get(self.url(&["actions", "shell", "output"]))
            .query(&[("sid", sid), ("sessionId", session_id), ("cursor", cursor.as_str())]);
        send(builder).await
    }

    pub async fn shell_close(
        &self,
        sid: &str,
        session_id: &str,
    ) -> Result<serde_json::Value, ClientError> {
        let body = serde_json::json!({ "sid": sid, "sessionId": session_id });
        send(self.http.post(self.url(&["actions", "shell", "close"])).json(&body)).await
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ClientError> {
    let resp = builder.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let message = body["error"]
            .as_str()
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown status"))
            .to_string();
        return Err(ClientError::Gateway {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp.json().await?)
}

/// Drives the output poll loop for one shell.
pub struct ShellPoller<'a> {
    client: &'a GatewayClient,
    sid: String,
    session_id: String,
    cursor: OutputCursor,
}

impl<'a> ShellPoller<'a> {
    pub fn new(client: &'a GatewayClient, sid: &str, session_id: &str) -> Self {
        Self {
            client,
            sid: sid.to_string(),
            session_id: session_id.to_string(),
            cursor: OutputCursor::new(),
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor.position()
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.is_closed()
    }

    /// One poll: the bytes appended since the last successful poll. A failed
    /// poll leaves the cursor where it was, so retrying is always safe.
    pub async fn poll(&mut self) -> Result<Vec<u8>, ClientError> {
        let output = self
            .client
            .shell_output(&self.sid, &self.session_id, self.cursor.position())
            .await?;
        Ok(self.cursor.advance(output)?)
    }

    /// Poll until the shell reports closed, handing each non-empty chunk to
    /// `sink`. Transport and gateway errors back off and retry; a protocol
    /// violation or a failing sink ends the loop.
    pub async fn run<F>(&mut self, interval: Duration, mut sink: F) -> Result<(), ClientError>
    where
        F: FnMut(&[u8]) -> std::io::Result<()>,
    {
        while !self.is_closed() {
            match self.poll().await {
                Ok(bytes) => {
                    if !bytes.is_empty() {
                        sink(&bytes)?;
                    }
                    if !self.is_closed() {
                        tokio::time::sleep(interval).await;
                    }
                }
                Err(ClientError::Protocol(e)) => return Err(ClientError::Protocol(e)),
                Err(e) => {
                    tracing::debug!(error = %e, cursor = self.cursor(), "output poll failed, retrying");
                    tokio::time::sleep(ERROR_BACKOFF.max(interval)).await;
                }
            }
        }
        Ok(())
    }
}

/// Attach the local terminal to a new shell on `sid`.
///
/// Each line read from `input` is sent as shell input; output is polled every
/// `interval` and handed to `sink`. Returns once the shell reports closed,
/// `input` reaches EOF, `interrupt` resolves, or something fails. Unless the
/// shell was seen closed, it is closed before returning and output already
/// produced is drained for up to [`CLOSE_DRAIN`].
pub async fn attach_shell<R, F, I>(
    client: &GatewayClient,
    sid: &str,
    input: R,
    interval: Duration,
    sink: F,
    interrupt: I,
) -> Result<(), ClientError>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&[u8]) -> std::io::Result<()>,
    I: Future<Output = ()>,
{
    let session_id = client.shell_start(sid).await?.session_id;
    tracing::info!(sid, session_id = %session_id, "shell open");

    let mut poller = ShellPoller::new(client, sid, &session_id);
    let polling = poller.run(interval, sink);
    tokio::pin!(polling);
    tokio::pin!(interrupt);
    let mut lines = input.lines();

    let mut polled = None;
    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let data = format!("{}\n", line);
                    if let Err(e) = client.shell_input(sid, &session_id, &data).await {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(ClientError::Io(e)),
            },
            _ = &mut interrupt => break Ok(()),
            result = &mut polling => {
                polled = Some(result);
                break Ok(());
            }
        }
    };

    if !matches!(polled, Some(Ok(()))) {
        if let Err(e) = client.shell_close(sid, &session_id).await {
            tracing::warn!(sid, session_id = %session_id, error = %e, "failed to close shell");
        }
    }
    let polled = match polled {
        Some(result) => result,
        None => match tokio::time::timeout(CLOSE_DRAIN, &mut polling).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(sid, session_id = %session_id, "shell did not report closed in time");
                Ok(())
            }
        },
    };
    outcome.and(polled)
}
