use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maru::config::{Config, LoggingConfig};
use maru::coordinator::Coordinator;

#[derive(Parser)]
#[command(
    name = "maru",
    version,
    about = "Message-routing coordinator for distributed control networks",
    long_about = None
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Namespace this coordinator serves
    #[arg(short, long)]
    namespace: Option<String>,

    /// Host name advertised to peer coordinators
    #[arg(long)]
    host: Option<String>,

    /// Port the inbound socket binds to
    #[arg(short, long)]
    port: Option<u16>,

    /// Liveness sweep interval in seconds
    #[arg(long)]
    cleaning_interval: Option<f64>,

    /// Enable verbose logging regardless of the configured level
    #[arg(short, long)]
    verbose: bool,

    /// Log format (text, json); overrides the configured format
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // file (or environment) first, command line on top
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    if let Some(namespace) = cli.namespace {
        config.coordinator.namespace = namespace;
    }
    if let Some(host) = cli.host {
        config.coordinator.host = host;
    }
    if let Some(port) = cli.port {
        config.coordinator.port = port;
    }
    if let Some(interval) = cli.cleaning_interval {
        config.coordinator.cleaning_interval_secs = interval;
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate()?;

    setup_tracing(&config.logging)?;

    let mut coordinator = Coordinator::with_zmq(&config.coordinator)?;
    let stop = coordinator.stop_flag();

    // the coordinator loop is synchronous; run it off the async runtime and
    // use the runtime only to wait for a shutdown signal
    let mut worker = tokio::task::spawn_blocking(move || coordinator.run());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            stop.store(true, Ordering::SeqCst);
            (&mut worker).await??;
        }
        result = &mut worker => {
            result??;
        }
    }

    Ok(())
}

fn setup_tracing(logging: &LoggingConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(filter_directives(&logging.level));

    match logging.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// The configured level applies to this crate; dependencies stay at warn.
fn filter_directives(level: &str) -> String {
    format!("warn,maru={level}")
}
