pub mod error;
mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use std::sync::Arc;

use crate::upstream::UpstreamClient;

use handlers::*;

/// Shared handler state. The gateway holds no session state of its own, only
/// the client pointed at the upstream.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    pub fn new(upstream: UpstreamClient) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }
}

/// Configuration for the HTTP router.
///
/// Use `RouterConfig::default()` in tests for a minimal setup.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    pub cors_origins: Vec<String>,
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    let actions = Router::new()
        .route("/exec-bulk", post(exec_bulk))
        .route("/shell/ws-url", get(shell_ws_url))
        .route("/shell/start", post(shell_start))
        .route("/shell/input", post(shell_input))
        .route("/shell/output", get(shell_output))
        .route("/shell/close", post(shell_close))
        .method_not_allowed_fallback(method_not_allowed);

    let router = Router::new()
        .route("/health", get(health))
        .route("/sessions", get(session_list))
        .route("/sessions/{sid}/info", get(session_info))
        .nest("/actions", actions)
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store"),
        ));

    // Conditionally apply CORS if origins are configured.
    if config.cors_origins.is_empty() {
        router
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
    }
}
