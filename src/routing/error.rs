//! Error definitions for the routing core.

use std::sync::Arc;

use axum::http::StatusCode;
use thiserror::Error;

/// Usage errors raised synchronously while declaring routes or driving a
/// response. None of these are retried; the caller has to fix the call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// Route paths are absolute.
    #[error("Path must start with '/': {0:?}")]
    PathNotAbsolute(String),

    /// `*` is only meaningful as the final character of a path.
    #[error("Wildcard '*' must be the last character of the path: {0:?}")]
    MisplacedWildcard(String),

    /// A parameter name appears twice in one pattern.
    #[error("Cannot use identifier {0} more than once in pattern string")]
    DuplicateParam(String),

    /// A `:` was not followed by a valid parameter name.
    #[error("Path param does not follow the variable naming rules, expected ({expected}) found ({found})")]
    ParamCountMismatch { expected: usize, found: usize },

    /// The generated or supplied regular expression did not compile.
    #[error("Invalid route pattern: {0}")]
    InvalidPattern(String),

    /// Media type declarations must look like `type/subtype`.
    #[error("Invalid media type: {0:?}")]
    InvalidMediaType(String),

    /// Order is frozen once the route is live.
    #[error("Can't change order after route is active")]
    OrderFrozen,

    /// The route delegates to a mounted sub router and takes no more handlers.
    #[error("This route is exclusive for an already mounted sub router")]
    ExclusiveRoute,

    /// Sub routers need a wildcard (or no) path to mount on.
    #[error("Sub router cannot be mounted on an exact path")]
    MountOnExactPath,

    /// Raw regular expression routes have no stable prefix to mount on.
    #[error("Sub router cannot be mounted on a regular expression path")]
    MountOnRegex,

    /// Mounting is only allowed on a route without handlers.
    #[error("Only one sub router per route object is allowed")]
    MountWithHandlers,

    /// The mount path and a descendant route capture the same name.
    #[error("Cannot use identifier {param} more than once in mounted path {path:?}")]
    MountParamCollision { param: String, path: String },

    /// The route was removed from (or never belonged to) a live router.
    #[error("Route is not attached to a router")]
    Detached,

    /// Lifecycle callback sequence exhausted.
    #[error("Too many header/body/end handlers")]
    TooManyHandlers,

    /// The response was already completed.
    #[error("Response has already been written")]
    ResponseEnded,

    /// The underlying connection is gone.
    #[error("Response is closed")]
    ResponseClosed,

    /// A header name or value was rejected.
    #[error("Invalid header {0:?}")]
    InvalidHeader(String),

    /// Not an HTTP method token.
    #[error("Invalid method {0:?}")]
    InvalidMethod(String),

    /// Not a valid HTTP status code.
    #[error("Invalid status code {0}")]
    InvalidStatus(u16),
}

impl From<regex::Error> for RouterError {
    fn from(err: regex::Error) -> Self {
        RouterError::InvalidPattern(err.to_string())
    }
}

/// A request-level failure carrying the HTTP status it should be rendered
/// with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct HttpStatusError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpStatusError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Raised through the `end` callbacks when the peer disconnects before the
/// response completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Connection closed")]
pub struct ConnectionClosed;

/// The recorded cause of a failed request.
pub type Failure = Arc<dyn std::error::Error + Send + Sync>;

/// Error type handlers may return; it is converted into a failure.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by every handler.
pub type HandlerResult = Result<(), HandlerError>;

/// Status a failure cause should be rendered with when none was given
/// explicitly.
pub fn status_of(failure: &Failure) -> StatusCode {
    failure
        .downcast_ref::<HttpStatusError>()
        .map(|e| e.status)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
