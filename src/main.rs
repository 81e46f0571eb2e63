use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quotaguard::config::{LoggingConfig, QuotaguardConfig};
use quotaguard::LimiterRegistry;

/// Adaptive rate limiting for outbound API calls.
#[derive(Debug, Parser)]
#[command(name = "quotaguard", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration, print a stats snapshot and exit
    #[arg(long)]
    check: bool,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => QuotaguardConfig::from_file(path)?,
        None => QuotaguardConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging);

    info!("Starting Quotaguard");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // The registry lives for the whole process and is shared by every caller
    let registry = Arc::new(config.build_registry());
    info!(apis = ?registry.api_names(), "Rate limiters initialized");

    if args.check {
        println!("{}", serde_json::to_string_pretty(&registry.get_all_stats())?);
        return Ok(());
    }

    let mut ticker = tokio::time::interval(config.stats.report_interval());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => report_stats(&registry),
            _ = &mut shutdown => break,
        }
    }

    report_stats(&registry);
    info!("Quotaguard stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

fn report_stats(registry: &LimiterRegistry) {
    for (api, stats) in registry.get_all_stats() {
        info!(
            api = %api,
            current_rate = stats.current_rate,
            base_rate = stats.base_rate,
            tokens_available = stats.tokens_available,
            requests_in_window = stats.requests_in_window,
            success_count = stats.success_count,
            error_count = stats.error_count,
            "Limiter stats"
        );
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
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
