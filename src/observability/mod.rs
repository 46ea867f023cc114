//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Router dispatch / server adapter produce:
//!     → logging.rs (tracing subscriber, env filter)
//!     → metrics.rs (dispatch counters, latency histogram)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event (method, path, status)
//! - Metric updates are fire-and-forget; without an installed recorder
//!   they are no-ops, so the routing core never depends on exporter setup

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
