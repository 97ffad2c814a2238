//! Network layer.
//!
//! # Data Flow
//! ```text
//! listener.rs: bind → accept (bounded by semaphore) → hyper connection task
//!     → axum Router with ConnectInfo<SocketAddr> attached to every request
//! ```
//!
//! # Design Decisions
//! - Backpressure via connection limit (semaphore)
//! - Connection tasks are owned by the serving future so they die with it
//! - Transient accept errors are skipped; anything else stops the listener

pub mod listener;

pub use listener::{HttpListener, ListenerError};
