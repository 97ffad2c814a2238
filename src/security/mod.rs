//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client token bucket, keyed on remote IP)
//!     → Pass to handlers
//! ```
//!
//! # Design Decisions
//! - One registry per process, built at startup and passed through router state
//! - Buckets refill lazily; a single sweep task evicts idle clients
//! - Disabled limiter short-circuits before touching the registry

pub mod rate_limit;

pub use rate_limit::{client_identity, rate_limit_middleware, RateLimiter};
