#![allow(dead_code)]

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use shellgate::api::{router, AppState, RouterConfig};
use shellgate::protocol::OutputBuffer;
use shellgate::upstream::{Timeouts, UpstreamClient};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// Prompt written into every new shell buffer.
pub const PROMPT: &[u8] = b"$ ";

/// In-process stand-in for the upstream session manager.
///
/// Sessions `s1`, `s2`, `s3` are listed (plus one entry without an ID).
/// Bulk exec fails any sid starting with `bad` and stalls on `slow`. Shell
/// input is echoed into the shell's output buffer; `exit\n` closes it and
/// input starting with `fail` is refused with a 500.
#[derive(Clone, Default)]
pub struct MockUpstream {
    hits: Arc<AtomicUsize>,
    next_shell: Arc<AtomicUsize>,
    shells: Arc<Mutex<HashMap<(String, String), OutputBuffer>>>,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests the upstream has received.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Input payloads received, in arrival order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    /// Append output to a shell, as if the remote side produced it.
    pub fn write(&self, sid: &str, session_id: &str, data: &[u8]) {
        let mut shells = self.shells.lock().unwrap();
        let buf = shells
            .get_mut(&(sid.to_string(), session_id.to_string()))
            .expect("unknown shell");
        buf.append(data);
    }

    pub fn close(&self, sid: &str, session_id: &str) {
        let mut shells = self.shells.lock().unwrap();
        if let Some(buf) = shells.get_mut(&(sid.to_string(), session_id.to_string())) {
            buf.close();
        }
    }

    /// Whether a shell exists and has been closed.
    pub fn is_closed(&self, sid: &str, session_id: &str) -> bool {
        self.shells
            .lock()
            .unwrap()
            .get(&(sid.to_string(), session_id.to_string()))
            .is_some_and(OutputBuffer::is_closed)
    }

    pub fn router(&self) -> Router {
        let hits = self.hits.clone();
        let api = Router::new()
            .route("/sessions", get(list_sessions))
            .route("/sessions/exec-bulk", post(exec_bulk))
            .route("/sessions/{sid}/info", get(session_info))
            .route("/sessions/{sid}/shell/start", post(shell_start))
            .route("/sessions/{sid}/shell/input", post(shell_input))
            .route("/sessions/{sid}/shell/output", get(shell_output))
            .route("/sessions/{sid}/shell/close", post(shell_close))
            .with_state(self.clone());
        Router::new()
            .nest("/api", api)
            .layer(axum::middleware::from_fn(move |req: Request, next: Next| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    next.run(req).await
                }
            }))
    }
}

fn not_found(msg: String) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
}

async fn list_sessions() -> Json<serde_json::Value> {
    Json(json!([
        {"ID": "s1", "Name": "alpha", "OS": "linux"},
        {"Name": "orphan"},
        {"ID": "s2", "Name": "bravo", "OS": "windows"},
        {"ID": "s3", "Name": "charlie", "OS": "darwin"},
    ]))
}

async fn session_info(Path(sid): Path<String>) -> Response {
    if sid == "s3" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Session s3 not found" })),
        )
            .into_response();
    }
    Json(json!({ "sid": sid, "name": format!("host-{}", sid), "arch": "amd64" })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkBody {
    cmd: String,
    session_ids: Vec<String>,
}

async fn exec_bulk(Json(body): Json<BulkBody>) -> Json<serde_json::Value> {
    let mut results = Vec::new();
    for sid in body.session_ids {
        if sid == "slow" {
            tokio::time::sleep(Duration::from_millis(600)).await;
        }
        if sid.starts_with("bad") {
            results.push(json!({ "sid": sid, "success": false, "error": format!("Session {} not found", sid) }));
        } else {
            results.push(json!({ "sid": sid, "success": true, "exitCode": 0, "stdout": format!("ran: {}\n", body.cmd) }));
        }
    }
    Json(json!({ "results": results }))
}

async fn shell_start(State(mock): State<MockUpstream>, Path(sid): Path<String>) -> Response {
    if sid == "slow" {
        tokio::time::sleep(Duration::from_millis(600)).await;
    }
    let n = mock.next_shell.fetch_add(1, Ordering::SeqCst) + 1;
    let session_id = format!("sh-{}", n);
    let mut buf = OutputBuffer::new();
    buf.append(PROMPT);
    mock.shells
        .lock()
        .unwrap()
        .insert((sid, session_id.clone()), buf);
    Json(json!({ "sessionId": session_id })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputBody {
    session_id: String,
    data: String,
}

async fn shell_input(
    State(mock): State<MockUpstream>,
    Path(sid): Path<String>,
    Json(body): Json<InputBody>,
) -> Response {
    let mut shells = mock.shells.lock().unwrap();
    let Some(buf) = shells.get_mut(&(sid, body.session_id.clone())) else {
        return not_found(format!("shell {} not found", body.session_id));
    };
    mock.inputs.lock().unwrap().push(body.data.clone());
    if body.data.starts_with("fail") {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "input rejected" })),
        )
            .into_response();
    }
    buf.append(body.data.as_bytes());
    if body.data == "exit\n" {
        buf.close();
    }
    Json(json!({ "ok": true })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputQuery {
    session_id: String,
    cursor: u64,
}

async fn shell_output(
    State(mock): State<MockUpstream>,
    Path(sid): Path<String>,
    Query(q): Query<OutputQuery>,
) -> Response {
    let shells = mock.shells.lock().unwrap();
    match shells.get(&(sid, q.session_id.clone())) {
        Some(buf) => Json(buf.read_from(q.cursor)).into_response(),
        None => not_found(format!("shell {} not found", q.session_id)),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseBody {
    session_id: String,
}

async fn shell_close(
    State(mock): State<MockUpstream>,
    Path(sid): Path<String>,
    Json(body): Json<CloseBody>,
) -> Response {
    let mut shells = mock.shells.lock().unwrap();
    match shells.get_mut(&(sid, body.session_id.clone())) {
        Some(buf) => {
            let was_closed = buf.is_closed();
            buf.close();
            Json(json!({ "ok": true, "alreadyClosed": was_closed })).into_response()
        }
        None => not_found(format!("shell {} not found", body.session_id)),
    }
}

/// Starts a router on a random available port and returns the address.
pub async fn start_test_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    addr
}

/// Timeouts short enough for tests: 300ms per call, 3s for bulk exec.
pub fn test_timeouts() -> Timeouts {
    Timeouts {
        connect: Duration::from_millis(500),
        request: Duration::from_millis(300),
        bulk: Duration::from_secs(3),
    }
}

/// Gateway router pointed at `endpoint`.
pub fn gateway_app(endpoint: &str) -> Router {
    let upstream = UpstreamClient::new(endpoint.parse().unwrap(), test_timeouts()).unwrap();
    router(AppState::new(upstream), RouterConfig::default())
}

/// A mock upstream and a gateway in front of it, both listening.
pub struct TestEnv {
    pub mock: MockUpstream,
    pub gateway: SocketAddr,
    pub http: reqwest::Client,
}

impl TestEnv {
    pub async fn start() -> Self {
        let mock = MockUpstream::new();
        let upstream_addr = start_test_server(mock.router()).await;
        let gateway =
            start_test_server(gateway_app(&format!("http://{}/api", upstream_addr))).await;
        Self {
            mock,
            gateway,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.gateway, path)
    }

    pub async fn get(&self, path: &str) -> (u16, serde_json::Value) {
        let resp = self.http.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> (u16, serde_json::Value) {
        let resp = self
            .http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    /// Start a shell on `sid` and return its sessionId.
    pub async fn start_shell(&self, sid: &str) -> String {
        let (status, body) = self
            .post("/actions/shell/start", json!({ "sid": sid }))
            .await;
        assert_eq!(status, 200, "shell start failed: {}", body);
        body["sessionId"].as_str().unwrap().to_string()
    }
}
