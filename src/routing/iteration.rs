//! Route iteration shared by root and mounted contexts.
//!
//! # Responsibilities
//! - Track the position inside one router's route snapshot
//! - Pick the next handler: the current route's chain first, then the next
//!   matching route
//! - Remember the most specific rejection status seen while scanning
//! - Render unhandled failures and unmatched requests
//!
//! # Design Decisions
//! - The walk lock is released before any handler runs
//! - Handler errors become failures; errors raised by failure handlers are
//!   rendered directly so they cannot loop

use std::sync::{Arc, Mutex, MutexGuard};

use axum::http::{Method, StatusCode};

use crate::observability::metrics;
use crate::routing::context::{ContextHandle, RequestScope, RoutingContext};
use crate::routing::error::{status_of, Failure};
use crate::routing::route::{Handler, Route, RouteState};
use crate::routing::router::Router;

/// Body sent for unmatched requests when no error handler takes over.
pub const DEFAULT_404: &str = "<html><body><h1>Resource not found</h1></body></html>";

/// Crate-internal plumbing behind [`RoutingContext`]. Not implementable
/// outside this crate.
pub trait Frame: Send + Sync {
    fn scope(&self) -> &RequestScope;

    fn walk(&self) -> &Mutex<Walk>;

    /// Strong handle to this context, used to invoke handlers.
    fn handle(&self) -> Option<ContextHandle>;

    /// Enter failure mode and restart iteration.
    fn record_failure(&self, status: StatusCode, cause: Option<Failure>);

    /// Change method and path, then dispatch again from the first route.
    fn restart_as(&self, method: Method, target: &str);

    fn lock_walk(&self) -> MutexGuard<'_, Walk> {
        self.walk().lock().expect("walk mutex poisoned")
    }

    fn set_match_failure(&self, status: StatusCode) {
        self.lock_walk().match_failure = status;
    }

    fn match_failure(&self) -> StatusCode {
        self.lock_walk().match_failure
    }

    /// Mount segment of the route currently executing.
    fn mount_segment(&self) -> String {
        self.lock_walk()
            .current
            .as_ref()
            .map(|c| c.mount_segment.clone())
            .unwrap_or_else(|| "/".to_string())
    }

    fn active_route(&self) -> Option<Route> {
        self.lock_walk().current.as_ref().map(|c| c.route.clone())
    }

    fn active_router(&self) -> Router {
        self.lock_walk().router.clone()
    }
}

struct Current {
    route: Route,
    state: Arc<RouteState>,
    next_handler: usize,
    next_failure_handler: usize,
    mount_segment: String,
}

/// Iteration state over one router's routes.
pub struct Walk {
    router: Router,
    routes: Arc<Vec<Route>>,
    cursor: usize,
    current: Option<Current>,
    match_failure: StatusCode,
}

impl Walk {
    pub(crate) fn new(router: Router) -> Self {
        let routes = router.snapshot();
        Self {
            router,
            routes,
            cursor: 0,
            current: None,
            match_failure: StatusCode::NOT_FOUND,
        }
    }

    /// Start over from a fresh snapshot. The remembered rejection survives.
    pub(crate) fn restart(&mut self) {
        self.routes = self.router.snapshot();
        self.cursor = 0;
        self.current = None;
    }

    pub(crate) fn reset_match_failure(&mut self) {
        self.match_failure = StatusCode::NOT_FOUND;
    }

    fn advance(
        &mut self,
        scope: &RequestScope,
        mount_point: Option<&str>,
        failed: bool,
    ) -> Option<Handler> {
        if let Some(current) = self.current.as_mut() {
            if failed {
                if let Some(h) = current.state.failure_handlers.get(current.next_failure_handler) {
                    current.next_failure_handler += 1;
                    return Some(h.clone());
                }
            } else if let Some(h) = current.state.context_handlers.get(current.next_handler) {
                current.next_handler += 1;
                self.match_failure = StatusCode::NOT_FOUND;
                return Some(h.clone());
            }
        }

        while let Some(route) = self.routes.get(self.cursor).cloned() {
            self.cursor += 1;
            let state = route.state();
            match state.matches(scope, mount_point, failed) {
                Ok(found) => {
                    scope.bind(found.params, found.acceptable);
                    tracing::trace!(
                        route = ?state.name,
                        order = state.order,
                        failed,
                        "Route matched"
                    );
                    let handler = if failed {
                        state.failure_handlers.first().cloned()
                    } else {
                        self.match_failure = StatusCode::NOT_FOUND;
                        state.context_handlers.first().cloned()
                    };
                    self.current = Some(Current {
                        route,
                        state,
                        next_handler: usize::from(!failed),
                        next_failure_handler: usize::from(failed),
                        mount_segment: found.mount_segment,
                    });
                    return handler;
                }
                Err(status) => {
                    if status != StatusCode::NOT_FOUND {
                        self.match_failure = status;
                    }
                }
            }
        }
        None
    }
}

/// Run the next eligible handler. Returns false when this router has none
/// left.
pub(crate) fn iterate_next(ctx: &dyn RoutingContext) -> bool {
    let Some(handle) = ctx.handle() else {
        return false;
    };
    let failed = ctx.failed();
    let next = ctx
        .lock_walk()
        .advance(ctx.scope(), ctx.mount_point(), failed);

    match next {
        Some(handler) => {
            run_handler(handle, handler, failed);
            true
        }
        None => false,
    }
}

fn run_handler(ctx: ContextHandle, handler: Handler, in_failure: bool) {
    let Err(err) = handler(ctx.clone()) else {
        return;
    };
    let failure: Failure = Arc::from(err);
    if in_failure {
        tracing::error!(error = %failure, path = %ctx.path(), "Failure handler failed");
        render_failure(&*ctx, &ctx.active_router(), Some(status_of(&failure)), Some(failure));
    } else {
        ctx.fail_cause(failure);
    }
}

/// Root router exhausted: render the failure or the remembered rejection.
pub(crate) fn handle_exhausted(ctx: &dyn RoutingContext, router: &Router) {
    if ctx.failed() {
        let status = ctx.status_code();
        let failure = ctx.failure();
        if let Some(failure) = &failure {
            tracing::error!(error = %failure, path = %ctx.path(), "Unhandled failure");
        }
        render_failure(ctx, router, status, failure);
    } else {
        let status = ctx.match_failure();
        ctx.scope().set_status_code(status);
        tracing::debug!(status = status.as_u16(), path = %ctx.path(), "No route matched");
        render_failure(ctx, router, Some(status), None);
    }
}

/// Hand the request to the router's error handler for the status. Without
/// one, or when it returns an error, end the response with the default.
pub(crate) fn render_failure(
    ctx: &dyn RoutingContext,
    router: &Router,
    status: Option<StatusCode>,
    failure: Option<Failure>,
) {
    let status = status
        .or_else(|| failure.as_ref().map(status_of))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    metrics::record_unhandled(status);

    if let (Some(handler), Some(handle)) = (router.error_handler_for(status), ctx.handle()) {
        // The handler owns the response from here and may end it later.
        match handler(handle) {
            Ok(()) => return,
            Err(err) => {
                tracing::error!(error = %err, status = status.as_u16(), "Error handler failed");
            }
        }
    }

    let response = ctx.response();
    if response.ended() || response.closed() {
        return;
    }
    response.set_status(status);
    let result = if status == StatusCode::NOT_FOUND && ctx.method() != Method::HEAD {
        response
            .put_header("content-type", "text/html; charset=utf-8")
            .and_then(|r| r.end_with(DEFAULT_404))
    } else {
        response.end()
    };
    if let Err(err) = result {
        tracing::debug!(error = %err, "Default response not sent");
    }
}
