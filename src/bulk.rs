//! Bulk command fan-out across many sessions.
//!
//! A batch succeeds as long as the upstream answers: per-session failures are
//! data in [`BulkExecResponse::results`], not errors. Only a rejected request
//! (before any upstream call) or a failed envelope call surfaces as a
//! [`GatewayError`].

use serde::Deserialize;

use crate::error::GatewayError;
use crate::upstream::{BulkExecRequest, BulkExecResponse, BulkExecResult, UpstreamClient};

const USAGE: &str = "Expected body { cmd: string, sessionIds: string[] }";

/// Loosely-typed request body; shape errors are reported by [`validate`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExecBody {
    #[serde(default)]
    pub cmd: Option<serde_json::Value>,
    #[serde(default)]
    pub session_ids: Option<serde_json::Value>,
}

/// Check a bulk request: `cmd` must be a non-blank string (it is trimmed) and
/// `sessionIds` a non-empty array of strings. Order and duplicates are kept.
pub fn validate(body: BulkExecBody) -> Result<BulkExecRequest, GatewayError> {
    let cmd = match body.cmd {
        Some(serde_json::Value::String(cmd)) if !cmd.trim().is_empty() => {
            cmd.trim().to_string()
        }
        _ => return Err(GatewayError::validation(USAGE)),
    };

    let session_ids = match body.session_ids {
        Some(serde_json::Value::Array(items)) if !items.is_empty() => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(sid) => Ok(sid),
                _ => Err(GatewayError::validation(USAGE)),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(GatewayError::validation(USAGE)),
    };

    Ok(BulkExecRequest { cmd, session_ids })
}

/// Succeeded/failed counts over a batch's results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl BulkSummary {
    pub fn of(results: &[BulkExecResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            succeeded,
            failed: results.len() - succeeded,
        }
    }
}

pub struct BulkExecutor<'a> {
    upstream: &'a UpstreamClient,
}

impl<'a> BulkExecutor<'a> {
    pub fn new(upstream: &'a UpstreamClient) -> Self {
        Self { upstream }
    }

    /// Validate, dispatch once, and return the upstream's results unchanged.
    pub async fn execute(&self, body: BulkExecBody) -> Result<BulkExecResponse, GatewayError> {
        let req = validate(body)?;
        let resp = self.upstream.exec_bulk(&req).await?;

        if resp.results.len() != req.session_ids.len() {
            tracing::warn!(
                requested = req.session_ids.len(),
                returned = resp.results.len(),
                "upstream returned a different number of bulk results"
            );
        }
        let summary = BulkSummary::of(&resp.results);
        tracing::info!(
            sessions = req.session_ids.len(),
            succeeded = summary.succeeded,
            failed = summary.failed,
            "bulk exec finished"
        );
        Ok(resp)
    }
}
