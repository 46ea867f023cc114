//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     RouterConfig → process defaults → Router::from_config → static routes
//!
//! Shutdown (shutdown.rs):
//!     trigger() → broadcast → server stops accepting → in-flight requests drain
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown trigger
//! ```
//!
//! # Design Decisions
//! - Fail fast: a static route that does not compile aborts startup
//! - Shutdown is a broadcast so any number of tasks can observe it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::build_router;
