//! Shutdown coordination for the API server.
//!
//! [`Coordinator::run`] is the single place where serving, signal handling,
//! connection draining and background-task completion meet:
//!
//! ```text
//! Starting ─▶ Serving ─(first signal)─▶ Draining ─(listener stopped
//!                                                   + tasks done)─▶ Stopped
//! ```
//!
//! Draining is bounded by the grace period; waiting for background tasks is
//! not. Signals received while draining are logged and ignored.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::lifecycle::background::BackgroundTasks;
use crate::lifecycle::signals::SignalSource;

/// Something that accepts connections until told to stop.
///
/// `serve` must stop accepting as soon as `stop` is cancelled and return once
/// in-flight work has finished. If the future is dropped before then, any
/// remaining connections must be closed.
pub trait Listener: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn serve(self, stop: CancellationToken) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Coordinator lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Serving,
    Draining,
    Stopped,
}

/// Fatal lifecycle outcomes.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The listener failed while serving, outside of a requested shutdown.
    #[error("listener failed: {0}")]
    Listener(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The listener returned without being asked to stop.
    #[error("listener stopped unexpectedly")]
    ListenerExited,

    /// The listener failed while draining.
    #[error("listener failed during shutdown: {0}")]
    Drain(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// In-flight connections outlived the grace period and were cut off.
    #[error("graceful shutdown timed out after {0:?}")]
    DrainTimeout(Duration),

    /// The serving task panicked.
    #[error("listener task panicked: {0}")]
    Panicked(#[source] JoinError),
}

/// Drives one listener from startup to a complete, ordered shutdown.
pub struct Coordinator {
    grace_period: Duration,
    tasks: BackgroundTasks,
    stop: CancellationToken,
    state: watch::Sender<LifecycleState>,
}

impl Coordinator {
    pub fn new(grace_period: Duration, tasks: BackgroundTasks) -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self {
            grace_period,
            tasks,
            stop: CancellationToken::new(),
            state,
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Serve until a termination signal arrives, then drain and wait for
    /// background work. Resolves when the process may exit.
    pub async fn run<L, S>(self, listener: L, mut signals: S) -> Result<(), LifecycleError>
    where
        L: Listener,
        S: SignalSource,
    {
        let mut server = tokio::spawn(listener.serve(self.stop.clone()));
        self.transition(LifecycleState::Serving);
        tracing::info!(grace_period_secs = self.grace_period.as_secs(), "Server started");

        let exited_early = tokio::select! {
            joined = &mut server => Some(joined),
            signal = signals.recv() => {
                match signal {
                    Some(signal) => tracing::info!(signal = %signal, "Shutting down server"),
                    None => tracing::info!("Signal source closed, shutting down server"),
                }
                None
            }
        };

        self.transition(LifecycleState::Draining);
        self.stop.cancel();

        let result = match exited_early {
            Some(joined) => {
                let err = match joined {
                    Ok(Ok(())) => LifecycleError::ListenerExited,
                    Ok(Err(e)) => LifecycleError::Listener(Box::new(e)),
                    Err(e) => LifecycleError::Panicked(e),
                };
                tracing::error!(error = %err, "Listener failed while serving");
                Err(err)
            }
            None => self.drain(server, &mut signals).await,
        };

        tracing::info!(
            active_tasks = self.tasks.active(),
            "Completing background tasks"
        );
        self.tasks.wait().await;

        self.transition(LifecycleState::Stopped);
        match &result {
            Ok(()) => tracing::info!("Stopped server"),
            Err(e) => tracing::error!(error = %e, "Stopped server with error"),
        }
        result
    }

    async fn drain<S: SignalSource, E>(
        &self,
        mut server: JoinHandle<Result<(), E>>,
        signals: &mut S,
    ) -> Result<(), LifecycleError>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let deadline = tokio::time::sleep(self.grace_period);
        tokio::pin!(deadline);
        let mut signals_open = true;

        loop {
            tokio::select! {
                joined = &mut server => {
                    return match joined {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(LifecycleError::Drain(Box::new(e))),
                        Err(e) => Err(LifecycleError::Panicked(e)),
                    };
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        grace_period_secs = self.grace_period.as_secs(),
                        "Grace period elapsed, closing remaining connections"
                    );
                    server.abort();
                    // Wait for the abort to land so no connection outlives us.
                    let _ = server.await;
                    return Err(LifecycleError::DrainTimeout(self.grace_period));
                }
                signal = signals.recv(), if signals_open => match signal {
                    Some(signal) => tracing::warn!(
                        signal = %signal,
                        "Already shutting down, ignoring signal"
                    ),
                    None => signals_open = false,
                },
            }
        }
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(from = ?previous, to = ?next, "Lifecycle transition");
    }
}
