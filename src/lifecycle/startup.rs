//! Startup orchestration.
//!
//! # Responsibilities
//! - Install process-wide routing defaults from config
//! - Build the root router and its configured static routes
//!
//! # Design Decisions
//! - Fail fast: any route error is fatal
//! - Routes are installed in declaration order, so creation order matches
//!   the file

use crate::config::{apply_process_defaults, RouterConfig};
use crate::routing::error::RouterError;
use crate::routing::{static_routes, Router};

/// Build the root router described by `config`.
pub fn build_router(config: &RouterConfig) -> Result<Router, RouterError> {
    apply_process_defaults(&config.routing);
    let router = Router::from_config(&config.routing);
    let installed = static_routes::install(&router, &config.routes)?;
    tracing::info!(
        static_routes = installed.len(),
        extended_param_names = config.routing.extended_param_names,
        use_normalized_path = config.routing.use_normalized_path,
        "Router built"
    );
    Ok(router)
}
