//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, static route patterns)
//!     → RouterConfig (validated, immutable)
//!     → apply_process_defaults (parameter syntax for new compilers)
//!     → Router::from_config + static routes
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ListenerConfig, ObservabilityConfig, RouterConfig, RoutingConfig, StaticRouteConfig,
};

use crate::routing::pattern::ParamSyntax;

/// Install process-wide defaults derived from the routing section.
pub fn apply_process_defaults(routing: &RoutingConfig) {
    let syntax = if routing.extended_param_names {
        ParamSyntax::Extended
    } else {
        ParamSyntax::Strict
    };
    syntax.set_process_default();
    tracing::debug!(syntax = ?syntax, "Parameter syntax default installed");
}
