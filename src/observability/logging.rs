//! Structured logging.
//!
//! # Responsibilities
//! - Install the global tracing subscriber
//! - Resolve the log filter from `RUST_LOG`, falling back to config
//!
//! # Design Decisions
//! - Uses the tracing crate with an `EnvFilter`
//! - The environment wins over the configured level so operators can raise
//!   verbosity without editing config

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor config give one.
pub const DEFAULT_FILTER: &str = "web_router=info,tower_http=info";

/// Build the filter directive for a configured level.
pub fn filter_directive(level: &str) -> String {
    let level = level.trim();
    if level.is_empty() {
        DEFAULT_FILTER.to_string()
    } else {
        format!("web_router={level},tower_http={level}")
    }
}

/// Install the global subscriber. Calling it twice is harmless; the second
/// call leaves the first subscriber in place.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive("debug"), "web_router=debug,tower_http=debug");
        assert_eq!(filter_directive(" "), DEFAULT_FILTER);
    }
}
