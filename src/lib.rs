//! Greenlight API server library.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod notifications;
pub mod observability;
pub mod security;

pub use config::AppConfig;
pub use lifecycle::{Application, BackgroundTasks, Coordinator, ServerError};
pub use security::RateLimiter;
