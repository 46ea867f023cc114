//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every
//! section has defaults so a minimal (even empty) file is valid.

use serde::{Deserialize, Serialize};

/// Root configuration for the router service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Pattern syntax and path handling for new routers.
    pub routing: RoutingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Declarative routes answering with a fixed response.
    pub routes: Vec<StaticRouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Routing behaviour shared by routers built from this config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Allow `$` and `-` in `:name` parameter tokens.
    pub extended_param_names: bool,

    /// Match routes against the normalized request path.
    pub use_normalized_path: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            extended_param_names: false,
            use_normalized_path: true,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for a handler chain to complete the response, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request body buffered for handlers, in bytes.
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A route that answers with a fixed status, content type and body.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticRouteConfig {
    /// Route name for logs.
    #[serde(default)]
    pub name: Option<String>,

    /// Declarative path (`/users/:id`, `/assets/*`).
    #[serde(default)]
    pub path: Option<String>,

    /// Raw regular expression, used instead of `path`.
    #[serde(default)]
    pub path_regex: Option<String>,

    /// Allowed methods; empty means any.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Explicit order; creation order when absent.
    #[serde(default)]
    pub order: Option<i32>,

    /// Response status code.
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response content type.
    #[serde(default)]
    pub content_type: Option<String>,

    /// Response body.
    #[serde(default)]
    pub body: String,
}

fn default_status() -> u16 {
    200
}
