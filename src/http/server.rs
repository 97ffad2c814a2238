//! Router construction.
//!
//! # Responsibilities
//! - Create the axum Router with all handlers
//! - Wire up middleware (tracing, request ID, timeout, rate limit)
//! - Carry shared subsystems to handlers through [`AppState`]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{AppConfig, Environment};
use crate::http::handlers;
use crate::lifecycle::BackgroundTasks;
use crate::notifications::Notifier;
use crate::security::{rate_limit_middleware, RateLimiter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub environment: Environment,
    pub limiter: RateLimiter,
    pub tasks: BackgroundTasks,
    pub notifier: Arc<dyn Notifier>,
}

/// Build the router with all middleware layers.
///
/// Layers run outermost first: trace, request ID, timeout, rate limit.
#[allow(deprecated)]
pub fn build_router(config: &AppConfig, state: AppState) -> Router {
    let limiter = state.limiter.clone();

    Router::new()
        .route("/v1/healthcheck", get(handlers::healthcheck))
        .route("/v1/notifications", post(handlers::create_notification))
        .route("/debug/vars", get(handlers::debug_vars))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
}
