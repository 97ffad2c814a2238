//! Greenlight API server.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                      GREENLIGHT                      │
//!   Client         │  ┌──────────┐   ┌────────────┐   ┌──────────────┐    │
//!   ───────────────┼─▶│   net    │──▶│ rate limit │──▶│   handlers   │    │
//!                  │  │ listener │   │    gate    │   │              │    │
//!                  │  └────▲─────┘   └─────┬──────┘   └──────┬───────┘    │
//!                  │       │               │ registry        │ slow work  │
//!                  │       │               ▼                 ▼            │
//!                  │       │        ┌────────────┐   ┌──────────────┐     │
//!                  │       │        │  sweeper   │   │  background  │     │
//!                  │       │        │   task     │   │    tasks     │     │
//!                  │       │        └────────────┘   └──────▲───────┘     │
//!                  │       │  drain (bounded)               │ wait        │
//!                  │  ┌────┴───────────────────────────────┴───────┐      │
//!   SIGINT/SIGTERM─┼─▶│             lifecycle coordinator          │      │
//!                  │  └────────────────────────────────────────────┘      │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use greenlight::config::{self, AppConfig, ConfigError, Environment};
use greenlight::observability::{logging, metrics};
use greenlight::{Application, ServerError};

#[derive(Parser)]
#[command(name = "greenlight")]
#[command(version, about = "Greenlight JSON API server", long_about = None)]
struct Cli {
    /// TOML configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Environment (development|staging|production)
    #[arg(long)]
    env: Option<Environment>,

    /// Rate limiter maximum requests per second
    #[arg(long)]
    limiter_rps: Option<f64>,

    /// Rate limiter maximum burst
    #[arg(long)]
    limiter_burst: Option<u32>,

    /// Enable rate limiter
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    limiter_enabled: Option<bool>,

    /// Seconds allowed for in-flight requests to finish on shutdown
    #[arg(long)]
    shutdown_grace_secs: Option<u64>,
}

impl Cli {
    fn resolve_config(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => config::load_config(path)?,
            None => AppConfig::default(),
        };

        if let Some(port) = self.port {
            let mut addr: SocketAddr = config
                .listener
                .bind_address
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));
            addr.set_port(port);
            config.listener.bind_address = addr.to_string();
        }
        if let Some(env) = self.env {
            config.environment = env;
        }
        if let Some(rps) = self.limiter_rps {
            config.limiter.requests_per_second = rps;
        }
        if let Some(burst) = self.limiter_burst {
            config.limiter.burst = burst;
        }
        if let Some(enabled) = self.limiter_enabled {
            config.limiter.enabled = enabled;
        }
        if let Some(secs) = self.shutdown_grace_secs {
            config.shutdown.grace_period_secs = secs;
        }

        config::validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("greenlight: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("greenlight: failed to initialise logging: {}", e);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        grace_period_secs = config.shutdown.grace_period_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let result = match Application::build(config).await {
        Ok(app) => app.run().await,
        Err(e) => Err(e),
    };
    ExitCode::from(exit_status(&result))
}

/// Process exit status for the server's terminal result: 0 on clean shutdown,
/// 1 for startup failures, listener faults and a blown drain deadline.
fn exit_status(result: &Result<(), ServerError>) -> u8 {
    match result {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Server exited with error");
            1
        }
    }
}
