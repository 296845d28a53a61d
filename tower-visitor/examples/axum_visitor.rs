use std::net::SocketAddr;

use axum::Extension;
use axum::Json;
use axum::Router;
use axum::routing::get;
use axum::routing::post;
use clap::Parser;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::signal;
use tower::BoxError;
use tower_visitor::VisitorLimitLayer;
use tracing::Level;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use visitor_limit::DenyPolicy;
use visitor_limit::Identity;
use visitor_limit::LimiterConfig;

/// Message endpoint paced per anonymous visitor.
///
/// Defaults come from `VISITOR_LIMIT_*` environment variables; flags override them.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Time for one visitor's request unit to refill, e.g. "2s".
    #[arg(long)]
    refill_interval: Option<humantime::Duration>,

    #[arg(long)]
    cleanup_interval: Option<humantime::Duration>,

    #[arg(long)]
    max_inactivity: Option<humantime::Duration>,

    /// Do not charge denied requests.
    #[arg(long)]
    refund: bool,
}

#[derive(Deserialize)]
struct MessageRequest {
    message: String,
}

#[derive(Serialize)]
struct MessageResponse {
    visitor: String,
    echo: String,
}

async fn post_message(
    Extension(identity): Extension<Identity>,
    Json(body): Json<MessageRequest>,
) -> Json<MessageResponse> {
    Json(MessageResponse {
        visitor: identity.to_string(),
        echo: body.message,
    })
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    let mut config = LimiterConfig::from_env()?;
    if let Some(interval) = args.refill_interval {
        config = config.with_refill_interval(interval.into());
    }
    if let Some(interval) = args.cleanup_interval {
        config = config.with_cleanup_interval(interval.into());
    }
    if let Some(max) = args.max_inactivity {
        config = config.with_max_inactivity(max.into());
    }
    if args.refund {
        config = config.with_deny_policy(DenyPolicy::Refund);
    }

    info!(
        bind_addr = %args.bind,
        refill_interval = ?config.refill_interval,
        cleanup_interval = ?config.cleanup_interval,
        max_inactivity = ?config.max_inactivity,
        deny_policy = ?config.deny_policy,
        "Starting visitor-limited server"
    );

    let limit = VisitorLimitLayer::from_config(config)?;
    let reaper = limit.gate().reaper().start();

    let app = Router::new()
        .route("/api/message", post(post_message))
        .layer(limit)
        // Outside the gate: health checks are never paced.
        .route("/health", get(|| async { "ok" }));

    let listener = TcpListener::bind(args.bind).await?;
    info!("Listening on http://{}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
    }
    info!("Received Ctrl+C, initiating graceful shutdown");
}
