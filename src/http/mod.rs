//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! net::HttpListener (one task per connection)
//!     → server.rs (trace, request ID, timeout, rate limit layers)
//!     → handlers.rs (healthcheck, notifications, debug vars)
//!     → slow side effects handed to lifecycle::BackgroundTasks
//! ```

pub mod handlers;
pub mod server;

pub use server::{build_router, AppState};
