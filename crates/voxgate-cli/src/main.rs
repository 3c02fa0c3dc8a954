//! CLI entry point - the composition root.
//!
//! Dispatches `voxgate serve` (the default command), wiring configuration
//! from flags and environment variables through [`bootstrap`] into the
//! axum transport layer.
//!
//! Exit codes: 0 normal shutdown, 1 fatal initialization error, 2
//! configuration error (including usage errors, via clap's own exit).

mod bootstrap;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser};
use thiserror::Error;
use tracing::error;
use tracing_subscriber::EnvFilter;

use voxgate_axum::GatewayOptions;

#[derive(Parser)]
#[command(name = "voxgate", version, about = "Streaming multi-provider chat gateway")]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Network endpoint to listen on.
    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:8741")]
    pub listen_addr: SocketAddr,

    /// HMAC key for JWT verification.
    #[arg(long, env = "AUTH_SECRET")]
    pub auth_secret: String,

    /// Severity filter (tracing `EnvFilter` syntax).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Root directory for stored blobs; storage routes are disabled
    /// without it.
    #[arg(long, env = "BLOB_BUCKET")]
    pub blob_bucket: Option<PathBuf>,

    /// SQLite database path; persistence is disabled without it.
    #[arg(long, env = "DATABASE_PATH")]
    pub database_path: Option<PathBuf>,

    /// Cap on concurrent WebSocket connections per process.
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 1024)]
    pub max_connections: usize,

    /// Default bus queue size per consumer.
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 128)]
    pub queue_capacity: usize,

    /// Seconds between keepalive pings.
    #[arg(long, env = "KEEPALIVE_SECS", default_value_t = 30)]
    pub keepalive_secs: u64,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Init(#[from] anyhow::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Best-effort .env loading before clap reads the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let args = cli.serve;

    init_tracing(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Config(message)) => {
            error!(%message, "invalid configuration");
            ExitCode::from(2)
        }
        Err(CliError::Init(err)) => {
            error!(error = %err, "fatal initialization error");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn validate(args: &ServeArgs) -> Result<(), CliError> {
    if args.auth_secret.trim().is_empty() {
        return Err(CliError::Config("AUTH_SECRET must not be empty".into()));
    }
    if args.queue_capacity == 0 {
        return Err(CliError::Config("QUEUE_CAPACITY must be at least 1".into()));
    }
    if args.max_connections == 0 {
        return Err(CliError::Config(
            "MAX_CONNECTIONS must be at least 1".into(),
        ));
    }
    Ok(())
}

async fn run(args: ServeArgs) -> Result<(), CliError> {
    validate(&args)?;

    let deps = bootstrap::build_deps(&args).await?;
    let options = GatewayOptions {
        auth_secret: args.auth_secret.clone(),
        queue_capacity: args.queue_capacity,
        max_connections: args.max_connections,
        keepalive: Duration::from_secs(args.keepalive_secs.max(1)),
        blob_root: args.blob_bucket.clone(),
    };

    let router = voxgate_axum::build_router(deps, &options);
    voxgate_axum::serve(args.listen_addr, router).await?;
    Ok(())
}
