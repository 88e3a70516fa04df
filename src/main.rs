use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::{LogFormat, LoggingConfig, TollgateConfig};
use tollgate::http::{build_router, HttpServer};
use tollgate::ratelimit::{AdmissionPolicy, RateLimiter};
use tollgate::store;

/// Distributed request-admission control for HTTP services.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Redis URL, overriding the configuration
    #[arg(long)]
    redis_url: Option<String>,

    /// Log output format, overriding the configuration
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TollgateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(redis_url) = args.redis_url {
        config.store.redis_url = redis_url;
    }
    if let Some(log_format) = args.log_format {
        config.logging.format = log_format;
    }
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Tollgate admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        limiters = config.limiters.len(),
        "Configuration loaded"
    );
    if config.limiters.is_empty() {
        warn!("No limiters configured; every request will be admitted");
    }

    let counter_store = store::connect(&config.store).await?;
    let rate_limiter = RateLimiter::new(counter_store);

    let policies = config
        .limiters
        .iter()
        .map(|rule| {
            AdmissionPolicy::from_rule(rule, &config.store.key_prefix, rate_limiter.clone())
                .map(Arc::new)
        })
        .collect::<Result<Vec<_>, _>>()?;
    for policy in &policies {
        info!(
            limiter = policy.name(),
            scope = %policy.scope(),
            limit = policy.config().limit(),
            window_secs = policy.config().window().as_secs(),
            "Limiter initialized"
        );
    }

    let router = build_router(&policies, config.server.request_timeout());
    HttpServer::new(config.server.listen_addr, router)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Tollgate admission service stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides the configured filter.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
