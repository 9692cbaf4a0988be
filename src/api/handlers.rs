use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::bulk::{BulkExecBody, BulkExecutor};
use crate::error::GatewayError;
use crate::protocol::ShellOutput;
use crate::shell::{self, ShellHandle, ShellProxy};
use crate::upstream::{BulkExecResponse, ShellStarted};

use super::AppState;

/// Decode a JSON request body. An empty, malformed, or mistyped body reads as
/// all-fields-absent, so the caller's field validation produces the 400.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    if body.iter().all(u8::is_ascii_whitespace) {
        return T::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "unreadable request body");
        T::default()
    })
}

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(super) async fn not_found() -> GatewayError {
    GatewayError::NotFound
}

pub(super) async fn method_not_allowed() -> GatewayError {
    GatewayError::MethodNotAllowed
}

// ── Sessions ───────────────────────────────────────────────────────

#[derive(Serialize)]
pub(super) struct SessionOverview {
    sid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Every listed session with its info. A failed info lookup only marks its
/// own entry.
pub(super) async fn session_list(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionOverview>>, GatewayError> {
    let sids = state.upstream.list_sessions().await?;
    let lookups = sids.iter().map(|sid| state.upstream.session_info(sid));
    let infos = futures::future::join_all(lookups).await;

    let overview = sids
        .into_iter()
        .zip(infos)
        .map(|(sid, info)| match info {
            Ok(info) => SessionOverview {
                sid,
                info: Some(info),
                error: None,
            },
            Err(e) => SessionOverview {
                sid,
                info: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    Ok(Json(overview))
}

pub(super) async fn session_info(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let Path(sid) = path?;
    let sid = shell::require_sid(Some(&sid))?;
    Ok(Json(state.upstream.session_info(&sid).await?))
}

// ── Bulk exec ──────────────────────────────────────────────────────

pub(super) async fn exec_bulk(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<BulkExecResponse>, GatewayError> {
    let body: BulkExecBody = parse_body(&body?);
    let resp = BulkExecutor::new(&state.upstream).execute(body).await?;
    Ok(Json(resp))
}

// ── Shell ──────────────────────────────────────────────────────────

#[derive(Default, Deserialize)]
pub(super) struct SidQuery {
    sid: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WsUrlResponse {
    ws_url: String,
}

pub(super) async fn shell_ws_url(
    State(state): State<AppState>,
    query: Result<Query<SidQuery>, QueryRejection>,
) -> Result<Json<WsUrlResponse>, GatewayError> {
    let Query(params) = query?;
    let sid = shell::require_sid(params.sid.as_deref())?;
    let ws_url = shell::ws_url(state.upstream.endpoint(), &sid)?;
    Ok(Json(WsUrlResponse { ws_url }))
}

/// `sid` may come from the query string or the body; the query wins.
pub(super) async fn shell_start(
    State(state): State<AppState>,
    query: Result<Query<SidQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ShellStarted>, GatewayError> {
    let Query(params) = query?;
    let from_body: SidQuery = parse_body(&body?);
    let sid = params
        .sid
        .filter(|s| !s.trim().is_empty())
        .or(from_body.sid);
    let sid = shell::require_sid(sid.as_deref())?;
    Ok(Json(ShellProxy::new(&state.upstream).start(&sid).await?))
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ShellInputRequest {
    sid: Option<String>,
    session_id: Option<String>,
    data: Option<String>,
}

pub(super) async fn shell_input(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let req: ShellInputRequest = parse_body(&body?);
    let handle = ShellHandle::from_parts(req.sid.as_deref(), req.session_id.as_deref())?;
    let data = req.data.unwrap_or_default();
    Ok(Json(ShellProxy::new(&state.upstream).input(&handle, &data).await?))
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ShellOutputQuery {
    sid: Option<String>,
    session_id: Option<String>,
    cursor: Option<String>,
}

pub(super) async fn shell_output(
    State(state): State<AppState>,
    query: Result<Query<ShellOutputQuery>, QueryRejection>,
) -> Result<Json<ShellOutput>, GatewayError> {
    let Query(params) = query?;
    let handle = ShellHandle::from_parts(params.sid.as_deref(), params.session_id.as_deref())?;
    let cursor = shell::parse_cursor(params.cursor.as_deref());
    Ok(Json(ShellProxy::new(&state.upstream).output(&handle, cursor).await?))
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ShellCloseRequest {
    sid: Option<String>,
    session_id: Option<String>,
}

pub(super) async fn shell_close(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let req: ShellCloseRequest = parse_body(&body?);
    let handle = ShellHandle::from_parts(req.sid.as_deref(), req.session_id.as_deref())?;
    Ok(Json(ShellProxy::new(&state.upstream).close(&handle).await?))
}
