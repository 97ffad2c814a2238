//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order from a validated config
//! - Start background loops (rate limiter sweep)
//! - Bind the listener and hand it to the coordinator
//! - Tear the background loops down once shutdown has completed
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last, after everything it serves exists

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{validate_config, AppConfig, ConfigError};
use crate::http::{build_router, AppState};
use crate::lifecycle::background::BackgroundTasks;
use crate::lifecycle::shutdown::{Coordinator, LifecycleError, LifecycleState};
use crate::lifecycle::signals::{OsSignals, SignalSource};
use crate::net::{HttpListener, ListenerError};
use crate::notifications::{LogNotifier, Notifier};
use crate::security::RateLimiter;

/// Terminal server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// A fully initialised server, bound and ready to run.
pub struct Application {
    listener: HttpListener,
    limiter: RateLimiter,
    coordinator: Coordinator,
    tasks: BackgroundTasks,
}

impl Application {
    /// Build every subsystem with the default (logging) notifier.
    pub async fn build(config: AppConfig) -> Result<Self, ServerError> {
        Self::build_with_notifier(config, Arc::new(LogNotifier)).await
    }

    pub async fn build_with_notifier(
        config: AppConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ServerError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let limiter = RateLimiter::new(&config.limiter);
        let tasks = BackgroundTasks::new();
        let coordinator = Coordinator::new(config.shutdown.grace_period(), tasks.clone());

        tracing::info!(
            enabled = limiter.is_enabled(),
            requests_per_second = config.limiter.requests_per_second,
            burst = config.limiter.burst,
            "Rate limiter configured"
        );

        let state = AppState {
            environment: config.environment,
            limiter: limiter.clone(),
            tasks: tasks.clone(),
            notifier,
        };
        let router = build_router(&config, state);
        let listener = HttpListener::bind(&config.listener, router).await?;

        Ok(Self {
            listener,
            limiter,
            coordinator,
            tasks,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn tasks(&self) -> BackgroundTasks {
        self.tasks.clone()
    }

    pub fn limiter(&self) -> RateLimiter {
        self.limiter.clone()
    }

    pub fn lifecycle(&self) -> tokio::sync::watch::Receiver<LifecycleState> {
        self.coordinator.subscribe()
    }

    /// Serve until SIGINT or SIGTERM, then shut down in order.
    pub async fn run(self) -> Result<(), ServerError> {
        let signals = OsSignals::new().map_err(ServerError::Signals)?;
        self.run_until(signals).await
    }

    /// Serve until `signals` yields, then shut down in order.
    pub async fn run_until<S: SignalSource>(self, signals: S) -> Result<(), ServerError> {
        let sweeper_stop = CancellationToken::new();
        let sweeper = self
            .limiter
            .is_enabled()
            .then(|| self.limiter.spawn_sweeper(sweeper_stop.clone()));

        let result = self.coordinator.run(self.listener, signals).await;

        sweeper_stop.cancel();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "Rate limiter sweeper did not stop cleanly");
            }
        }

        result.map_err(ServerError::from)
    }
}
