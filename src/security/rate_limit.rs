//! Per-client token bucket rate limiting.
//!
//! One [`RateLimiter`] is built at startup and shared through router state.
//! Every request is keyed on the caller's IP (port stripped), and each key
//! owns a lazily refilled token bucket. A sweep task evicts clients that have
//! gone quiet so address churn cannot grow the registry without bound.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::LimiterConfig;
use crate::observability::metrics;

/// A token bucket. Refill happens on each consume, never on a timer.
#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, cost: f64, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ClientEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

struct Inner {
    enabled: bool,
    capacity: f64,
    refill_rate: f64,
    idle_timeout: Duration,
    sweep_interval: Duration,
    clients: Mutex<HashMap<String, ClientEntry>>,
}

/// Shared per-client rate limiter.
///
/// Cloning is cheap; all clones share one client registry.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                enabled: config.enabled,
                capacity: f64::from(config.burst),
                refill_rate: config.requests_per_second,
                idle_timeout: config.idle_timeout(),
                sweep_interval: config.sweep_interval(),
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Spend one token for `identity`. Returns `false` if the client is over
    /// its limit.
    pub fn try_consume(&self, identity: &str) -> bool {
        self.try_consume_cost(identity, 1.0)
    }

    /// Spend `cost` tokens for `identity`.
    ///
    /// Lookup, creation, refill and consumption all happen under a single
    /// lock acquisition, so concurrent first requests from the same client
    /// share one bucket.
    pub fn try_consume_cost(&self, identity: &str, cost: f64) -> bool {
        if !self.inner.enabled {
            return true;
        }

        let now = Instant::now();
        let mut clients = self.clients();
        let tracked_before = clients.len();

        let entry = clients
            .entry(identity.to_owned())
            .or_insert_with(|| ClientEntry {
                bucket: TokenBucket::full(self.inner.capacity, self.inner.refill_rate, now),
                last_seen: now,
            });
        entry.last_seen = now;
        let allowed = entry.bucket.try_consume(cost, now);

        if clients.len() != tracked_before {
            metrics::record_tracked_clients(clients.len());
        }
        allowed
    }

    /// Evict every client idle for longer than the configured timeout.
    /// Returns the number of clients removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.inner.idle_timeout;

        let mut clients = self.clients();
        let before = clients.len();
        clients.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= idle_timeout);
        let evicted = before - clients.len();

        if evicted > 0 {
            metrics::record_evictions(evicted);
            metrics::record_tracked_clients(clients.len());
        }
        evicted
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients().len()
    }

    /// Tokens currently held by `identity`, without refilling.
    pub fn tokens(&self, identity: &str) -> Option<f64> {
        self.clients().get(identity).map(|entry| entry.bucket.tokens)
    }

    /// Run the idle-client sweep on its own task until `shutdown` fires.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move { limiter.run_sweeper(shutdown).await })
    }

    async fn run_sweeper(self, shutdown: CancellationToken) {
        let period = self.inner.sweep_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            interval_secs = period.as_secs(),
            idle_timeout_secs = self.inner.idle_timeout.as_secs(),
            "Rate limiter sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.sweep();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.tracked_clients(), "Evicted idle clients");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Rate limiter sweeper stopped");
                    break;
                }
            }
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, ClientEntry>> {
        // No code path panics while holding the lock, so the map is never
        // left half-updated.
        self.inner
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Client identity for a peer address: the IP alone, with IPv4-mapped IPv6
/// folded back to IPv4.
pub fn client_identity(addr: &SocketAddr) -> String {
    addr.ip().to_canonical().to_string()
}

/// Middleware enforcing the per-client limit in front of every handler.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let Some(addr) = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
    else {
        tracing::error!(
            uri = %request.uri(),
            "Request carries no remote address; listener is not supplying connection info"
        );
        return server_error_response();
    };

    let client = client_identity(&addr);
    if limiter.try_consume(&client) {
        next.run(request).await
    } else {
        tracing::warn!(client = %client, "Rate limit exceeded");
        metrics::record_rate_limited();
        rate_limit_exceeded_response()
    }
}

fn rate_limit_exceeded_response() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({ "error": "rate limit exceeded" })),
    )
        .into_response()
}

pub(crate) fn server_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": "the server encountered a problem and could not process your request"
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn limiter(enabled: bool, rps: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(&LimiterConfig {
            enabled,
            requests_per_second: rps,
            burst,
            sweep_interval_secs: 60,
            idle_timeout_secs: 180,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = limiter(true, 2.0, 4);

        for _ in 0..4 {
            assert!(limiter.try_consume("10.0.0.1"));
        }
        assert!(!limiter.try_consume("10.0.0.1"), "5th request in the same instant");

        time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_consume("10.0.0.1"), "one token refilled after 0.5s");
        assert!(!limiter.try_consume("10.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exactly_capacity_allowed_in_an_instant() {
        let limiter = limiter(true, 1.0, 10);
        let allowed = (0..11).filter(|_| limiter.try_consume("client")).count();
        assert_eq!(allowed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let limiter = limiter(true, 2.0, 4);
        for _ in 0..4 {
            limiter.try_consume("c");
        }
        assert_eq!(limiter.tokens("c"), Some(0.0));

        // capacity / rate = 2s brings the bucket back to exactly full.
        time::advance(Duration::from_secs(2)).await;
        assert!(limiter.try_consume("c"));
        assert_eq!(limiter.tokens("c"), Some(3.0));

        time::advance(Duration::from_secs(3600)).await;
        assert!(limiter.try_consume_cost("c", 0.0));
        assert_eq!(limiter.tokens("c"), Some(4.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_slower_than_refill_never_throttled() {
        let limiter = limiter(true, 2.0, 1);
        for _ in 0..50 {
            assert!(limiter.try_consume("steady"));
            time::advance(Duration::from_millis(600)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_request_leaves_tokens_unchanged() {
        let limiter = limiter(true, 1.0, 2);
        assert!(!limiter.try_consume_cost("c", 3.0));
        assert_eq!(limiter.tokens("c"), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_independent() {
        let limiter = limiter(true, 1.0, 1);
        assert!(limiter.try_consume("a"));
        assert!(!limiter.try_consume("a"));
        assert!(limiter.try_consume("b"));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[tokio::test]
    async fn test_disabled_never_tracks_clients() {
        let limiter = limiter(false, 2.0, 4);
        for _ in 0..10_000 {
            assert!(limiter.try_consume("203.0.113.9"));
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_share_one_bucket() {
        let limiter = limiter(true, 0.001, 8);
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    limiter.try_consume("198.51.100.7")
                })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(limiter.tracked_clients(), 1);
        assert_eq!(allowed, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_clients() {
        let limiter = limiter(true, 1.0, 3);
        limiter.try_consume("idle");
        limiter.try_consume("idle");

        time::advance(Duration::from_secs(120)).await;
        limiter.try_consume("active");
        assert_eq!(limiter.sweep(), 0);

        time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tokens("idle"), None);
        assert!(limiter.tokens("active").is_some());

        // A returning client starts over with a full bucket.
        assert!(limiter.try_consume("idle"));
        assert_eq!(limiter.tokens("idle"), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_until_cancelled() {
        let limiter = limiter(true, 1.0, 1);
        let shutdown = CancellationToken::new();
        let sweeper = limiter.spawn_sweeper(shutdown.clone());

        limiter.try_consume("gone-quiet");
        assert_eq!(limiter.tracked_clients(), 1);

        // First tick at 60s finds the client fresh; the one at 240s evicts it.
        time::sleep(Duration::from_secs(241)).await;
        assert_eq!(limiter.tracked_clients(), 0);

        shutdown.cancel();
        sweeper.await.unwrap();
    }

    #[test]
    fn test_client_identity_strips_port() {
        let a: SocketAddr = "192.0.2.1:50000".parse().unwrap();
        let b: SocketAddr = "192.0.2.1:50001".parse().unwrap();
        assert_eq!(client_identity(&a), client_identity(&b));
        assert_eq!(client_identity(&a), "192.0.2.1");

        let mapped: SocketAddr = "[::ffff:192.0.2.1]:443".parse().unwrap();
        assert_eq!(client_identity(&mapped), "192.0.2.1");

        let v6: SocketAddr = "[2001:db8::1]:8080".parse().unwrap();
        assert_eq!(client_identity(&v6), "2001:db8::1");
    }

    fn gated_app(limiter: RateLimiter) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
    }

    fn request_from(addr: &str) -> Request<Body> {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let addr: SocketAddr = addr.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[tokio::test(start_paused = true)]
    async fn test_middleware_rejects_over_limit() {
        let app = gated_app(limiter(true, 1.0, 2));

        let first = app.clone().oneshot(request_from("192.0.2.5:1000")).await.unwrap();
        let second = app.clone().oneshot(request_from("192.0.2.5:1001")).await.unwrap();
        let third = app.clone().oneshot(request_from("192.0.2.5:1002")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = axum::body::to_bytes(third.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "rate limit exceeded");
    }

    #[tokio::test]
    async fn test_middleware_without_connect_info_is_server_error() {
        let app = gated_app(limiter(true, 1.0, 2));
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_middleware_disabled_passes_through() {
        let app = gated_app(limiter(false, 1.0, 1));
        for _ in 0..5 {
            let request = Request::builder().uri("/").body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
