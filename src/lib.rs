//! Request routing and dispatch core for HTTP services.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ routing::Router::dispatch
//!                                         │
//!                                         ▼
//!                              RequestContext (per request)
//!                                         │  next() / fail() / reroute()
//!                                         ▼
//!                     route snapshot ─▶ Route::matches ─▶ handler(ctx)
//!                                         │
//!                                         ├─▶ mounted Router (MountContext)
//!                                         ▼
//!     Client Response ◀── http::Response (lifecycle callbacks, completion)
//!
//!     Cross-cutting: config, observability, lifecycle
//! ```

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use config::schema::RouterConfig;
pub use http::{HttpServer, Request, Response};
pub use lifecycle::Shutdown;
pub use routing::{ContextHandle, Route, Router, RouterError, RoutingContext};
