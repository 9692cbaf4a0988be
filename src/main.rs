//! shellgate - HTTP gateway for remote sessions
//!
//! ## Modes
//!
//! **`shellgate serve`**: runs the gateway in front of an upstream session
//! manager.
//!
//! **`sessions`, `exec`, `shell`**: talk to a running gateway. `shell` runs the
//! cursor poll loop, printing output as it arrives and sending stdin lines as
//! input.

use clap::{Parser as ClapParser, Subcommand};
use shellgate::{
    api,
    bulk::BulkSummary,
    client::{self, ClientError, GatewayClient},
    config::{ConfigError, GatewayConfig},
    upstream::{BulkExecRequest, UpstreamClient, UpstreamError},
};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// shellgate - HTTP gateway for remote sessions
#[derive(ClapParser, Debug)]
#[command(name = "shellgate", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway
    Serve {
        /// Path to a TOML config file
        #[arg(long, env = "SHELLGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Address to bind the HTTP server (overrides the config file)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Upstream session manager base URL (overrides the config file)
        #[arg(long, env = "SHELLGATE_UPSTREAM")]
        upstream: Option<String>,
    },

    /// Print every session with its info
    Sessions {
        /// Gateway base URL
        #[arg(long, env = "SHELLGATE_URL", default_value = client::DEFAULT_GATEWAY)]
        gateway: String,
    },

    /// Run one command on several sessions
    Exec {
        /// Gateway base URL
        #[arg(long, env = "SHELLGATE_URL", default_value = client::DEFAULT_GATEWAY)]
        gateway: String,

        /// Command to run
        #[arg(long)]
        cmd: String,

        /// Session IDs, in the order results should be reported
        #[arg(required = true)]
        sids: Vec<String>,
    },

    /// Open an interactive shell on a session
    Shell {
        /// Gateway base URL
        #[arg(long, env = "SHELLGATE_URL", default_value = client::DEFAULT_GATEWAY)]
        gateway: String,

        /// Milliseconds between output polls
        #[arg(long, default_value_t = 150)]
        interval_ms: u64,

        /// Session ID
        sid: String,
    },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            upstream,
        } => run_serve(config, bind, upstream).await,
        Commands::Sessions { gateway } => run_sessions(gateway).await,
        Commands::Exec { gateway, cmd, sids } => run_exec(gateway, cmd, sids).await,
        Commands::Shell {
            gateway,
            interval_ms,
            sid,
        } => run_shell(gateway, sid, Duration::from_millis(interval_ms)).await,
    }
}

/// Tracing goes to stderr so `shell` output on stdout stays clean.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "shellgate=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Gateway ────────────────────────────────────────────────────────

async fn run_serve(
    config_path: Option<PathBuf>,
    bind: Option<SocketAddr>,
    upstream: Option<String>,
) -> Result<(), CliError> {
    let mut config = match config_path {
        Some(path) => GatewayConfig::load(&path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = bind {
        config.bind = bind;
    }
    if let Some(upstream) = upstream {
        config.upstream.endpoint = upstream;
    }
    config.validate()?;

    let endpoint = config.upstream.endpoint_url()?;
    let upstream = UpstreamClient::new(endpoint, config.upstream.timeouts())?;
    tracing::info!(upstream = %upstream.endpoint(), "shellgate starting");

    let state = api::AppState::new(upstream);
    let app = api::router(
        state,
        api::RouterConfig {
            cors_origins: config.cors_origins.clone(),
        },
    );

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received Ctrl+C");
            }
        })
        .await?;

    tracing::info!("shellgate stopped");
    Ok(())
}

// ── Client commands ────────────────────────────────────────────────

async fn run_sessions(gateway: String) -> Result<(), CliError> {
    let client = GatewayClient::new(&gateway)?;
    let sessions = client.sessions().await?;
    let pretty = serde_json::to_string_pretty(&sessions).unwrap_or_else(|_| sessions.to_string());
    println!("{}", pretty);
    Ok(())
}

async fn run_exec(gateway: String, cmd: String, sids: Vec<String>) -> Result<(), CliError> {
    let client = GatewayClient::new(&gateway)?;
    let resp = client
        .exec_bulk(&BulkExecRequest {
            cmd,
            session_ids: sids,
        })
        .await?;

    for r in &resp.results {
        let mut line = format!("{:<7}{}", if r.success { "ok" } else { "FAILED" }, r.sid);
        if let Some(code) = r.exit_code {
            line.push_str(&format!(" (exit {})", code));
        }
        if let Some(ref err) = r.error {
            line.push_str(&format!(" - {}", err));
        }
        println!("{}", line);
    }
    let summary = BulkSummary::of(&resp.results);
    eprintln!(
        "shellgate: {} succeeded, {} failed",
        summary.succeeded, summary.failed
    );
    Ok(())
}

async fn run_shell(gateway: String, sid: String, interval: Duration) -> Result<(), CliError> {
    let client = GatewayClient::new(&gateway)?;
    eprintln!("shellgate: opening shell on session {} (Ctrl-D to close)", sid);

    let mut stdout = std::io::stdout();
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    client::attach_shell(
        &client,
        &sid,
        BufReader::new(tokio::io::stdin()),
        interval,
        |bytes| {
            stdout.write_all(bytes)?;
            stdout.flush()
        },
        interrupt,
    )
    .await?;

    eprintln!("\r\nshellgate: shell closed");
    Ok(())
}
