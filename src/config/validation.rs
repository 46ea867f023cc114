//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Compile static route patterns so bad routes fail at load time
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function:
//!   `&RouterConfig → Result<(), Vec<ValidationError>>`

use std::net::SocketAddr;

use axum::http::{Method, StatusCode};
use thiserror::Error;

use crate::config::schema::RouterConfig;
use crate::routing::error::RouterError;
use crate::routing::pattern::{ParamSyntax, PatternCompiler};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),

    #[error("observability.log_level {0:?} is not one of trace, debug, info, warn, error")]
    LogLevel(String),

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroTimeout,

    #[error("limits.max_body_size must be greater than zero")]
    ZeroBodyLimit,

    #[error("routes[{index}]: set either path or path_regex, not both")]
    AmbiguousPath { index: usize },

    #[error("routes[{index}]: {source}")]
    Pattern { index: usize, source: RouterError },

    #[error("routes[{index}]: invalid method {method:?}")]
    Method { index: usize, method: String },

    #[error("routes[{index}]: invalid status {status}")]
    Status { index: usize, status: u16 },
}

/// Check a parsed configuration.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(observability.metrics_address.clone()));
    }
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::LogLevel(observability.log_level.clone()));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }
    if config.limits.max_body_size == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }

    let syntax = if config.routing.extended_param_names {
        ParamSyntax::Extended
    } else {
        ParamSyntax::Strict
    };
    let compiler = PatternCompiler::new(syntax);

    for (index, route) in config.routes.iter().enumerate() {
        match (&route.path, &route.path_regex) {
            (Some(_), Some(_)) => errors.push(ValidationError::AmbiguousPath { index }),
            (Some(path), None) => {
                if let Err(source) = compiler.compile_path(path) {
                    errors.push(ValidationError::Pattern { index, source });
                }
            }
            (None, Some(regex)) => {
                if let Err(source) = compiler.compile_regex(regex) {
                    errors.push(ValidationError::Pattern { index, source });
                }
            }
            (None, None) => {}
        }

        for method in &route.methods {
            if Method::from_bytes(method.as_bytes()).is_err() {
                errors.push(ValidationError::Method {
                    index,
                    method: method.clone(),
                });
            }
        }

        if StatusCode::from_u16(route.status).is_err() {
            errors.push(ValidationError::Status {
                index,
                status: route.status,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
