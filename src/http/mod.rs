//! HTTP facade and transport adapter.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum fallback, tower_http trace/timeout/request-id)
//!     → request.rs (axum request + buffered body → core Request)
//!     → routing::Router::dispatch
//!     → handlers write response.rs (status, headers, body, lifecycle)
//!     → completion channel → axum response → client
//! ```
//!
//! # Design Decisions
//! - The routing core only sees `Request` and `Response`; nothing in it
//!   depends on the transport
//! - Bodies are buffered up front, bounded by `limits.max_body_size`

pub mod request;
pub mod response;
pub mod server;

pub use request::{Request, UuidRequestId, X_REQUEST_ID};
pub use response::{Response, ResponseOutcome};
pub use server::HttpServer;
