//! TCP listener serving HTTP with backpressure and graceful drain.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Serve each connection (HTTP/1.1 or HTTP/2) on its own task
//! - On shutdown: stop accepting, let in-flight connections finish
//!
//! Connection tasks live in a `JoinSet` owned by [`HttpListener::serve`].
//! Dropping that future (for example by aborting the task running it) aborts
//! every connection still open, which is how the drain deadline is enforced.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{body::Body, extract::ConnectInfo, Router};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::config::ListenerConfig;
use crate::lifecycle::Listener;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[source] std::io::Error),
    /// Accept failed in a way that will not recover.
    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),
}

/// A bounded TCP listener that serves an axum [`Router`].
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait in the kernel backlog until a slot frees up.
pub struct HttpListener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
    app: Router,
}

impl HttpListener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig, app: Router) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            app,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Accept and serve connections until `stop` is cancelled, then wait for
    /// every open connection to finish its in-flight requests.
    pub async fn serve(self, stop: CancellationToken) -> Result<(), ListenerError> {
        let mut connections = JoinSet::new();

        loop {
            // Acquire a slot first (backpressure), but never block shutdown on it.
            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                permit = self.connection_limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                accepted = self.inner.accept() => accepted,
                // Reap finished connections so the set stays small.
                Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    tracing::debug!(
                        peer_addr = %peer_addr,
                        available_permits = self.connection_limit.available_permits(),
                        "Connection accepted"
                    );
                    connections.spawn(serve_connection(
                        stream,
                        peer_addr,
                        self.app.clone(),
                        stop.clone(),
                        permit,
                    ));
                }
                Err(e) if is_transient(&e) => {
                    tracing::debug!(error = %e, "Transient accept error");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Listener accept failed");
                    return Err(ListenerError::Accept(e));
                }
            }
        }

        drop(self.inner);
        tracing::info!(in_flight = connections.len(), "Listener closed, draining connections");

        while connections.join_next().await.is_some() {}

        tracing::info!("All connections drained");
        Ok(())
    }
}

impl Listener for HttpListener {
    type Error = ListenerError;

    async fn serve(self, stop: CancellationToken) -> Result<(), Self::Error> {
        HttpListener::serve(self, stop).await
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    app: Router,
    stop: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
        let mut request = request.map(Body::new);
        request.extensions_mut().insert(ConnectInfo(peer_addr));
        app.clone().oneshot(request)
    });

    let builder = ConnBuilder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = stop.cancelled() => {
            // Finish the request in flight, refuse further keep-alive requests.
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(e) = result {
        tracing::debug!(peer_addr = %peer_addr, error = %e, "Connection closed with error");
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}
