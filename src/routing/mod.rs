//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Declaration:
//!     Router::route() / get() / ...
//!     → route.rs (builder setters, copy-on-write state)
//!     → pattern.rs (path → anchored regex, parameter names)
//!     → first handler: router.rs add (ordered insert, listener veto, publish)
//!
//! Dispatch:
//!     Request + Response
//!     → router.rs dispatch (path validation, context creation)
//!     → context.rs RequestContext::next
//!     → iteration.rs (current route's chain, then next matching route)
//!         → route.rs matches (path, method, consumes, produces, host)
//!         → handler(ctx) → ctx.next() / ctx.fail(..) / response.end()
//!     → mounted route → mount.rs MountContext (mount-relative matching)
//!         → exhausted: rejection status handed back to the parent
//!     → root exhausted → error handler by status, else default response
//! ```
//!
//! # Design Decisions
//! - Route lists are immutable snapshots; a request never sees a change made
//!   after it started iterating
//! - First match wins within one order value; ties keep insertion order
//! - Handlers run synchronously on the dispatching thread and may hand the
//!   context to other tasks before calling `next`

pub mod context;
pub mod error;
pub(crate) mod iteration;
pub mod lifecycle;
pub mod media;
pub mod mount;
pub mod pattern;
pub mod query;
pub mod route;
pub mod router;
pub mod static_routes;

pub use context::{ContextHandle, RequestContext, RoutingContext, Session, User};
pub use error::{Failure, HandlerError, HandlerResult, HttpStatusError, RouterError};
pub use iteration::DEFAULT_404;
pub use pattern::{ParamSyntax, PatternCompiler, WILDCARD_PARAM};
pub use query::{Charset, MultiMap};
pub use route::{Handler, Route};
pub use router::{ModificationListener, Router};
