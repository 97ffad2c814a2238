//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → rate limiter + sweeper → router → bind listener
//!
//! Serving (shutdown.rs):
//!     Coordinator spawns listener, watches signals.rs
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections (bounded)
//!         → Wait for background.rs tasks (unbounded) → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, wait for tasks, close
//! - Only the drain has a timeout; background work is never dropped
//! - A second signal while draining is ignored

pub mod background;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use background::BackgroundTasks;
pub use shutdown::{Coordinator, LifecycleError, LifecycleState, Listener};
pub use signals::{OsSignals, Signal, SignalSource};
pub use startup::{Application, ServerError};
