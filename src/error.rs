use thiserror::Error;

use crate::upstream::UpstreamError;

/// Failure outcomes of a gateway operation.
///
/// Per-session command failures are not represented here: they travel as
/// data inside a successful response (see [`crate::bulk`]).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A required field was missing or malformed. Detected locally; the
    /// upstream was never contacted.
    #[error("{0}")]
    Validation(String),

    /// The upstream call itself failed (unreachable, timed out, non-2xx,
    /// or an undecodable body).
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// No route matched the request.
    #[error("Not found")]
    NotFound,

    /// The route exists but not for this HTTP method.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// The request could not be extracted at all (oversized body, undecodable
    /// path or query). Keeps the status the HTTP layer chose.
    #[error("{message}")]
    Rejected { status: u16, message: String },
}

impl GatewayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        GatewayError::Validation(msg.into())
    }
}

/// Trim a request field and reject it when absent or blank.
pub(crate) fn required<'a>(value: Option<&'a str>, msg: &str) -> Result<&'a str, GatewayError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(GatewayError::validation(msg)),
    }
}
