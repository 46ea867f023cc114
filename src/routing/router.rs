//! Route registry and dispatch entry point.
//!
//! # Responsibilities
//! - Keep routes sorted by order, ties in insertion order
//! - Publish route list changes as immutable snapshots
//! - Notify modification listeners and check parameter collisions through
//!   enclosing mounts before publishing
//! - Create the per-request context and start iteration
//! - Hold error handlers keyed by status code
//!
//! # Design Decisions
//! - Writers serialize on a mutex and swap a fresh `Arc<Vec<Route>>`;
//!   requests keep iterating the snapshot they started with
//! - A listener error vetoes the change and leaves the snapshot untouched
//! - Default order is the creation sequence of the route

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use arc_swap::ArcSwap;
use axum::http::{Method, StatusCode};
use dashmap::DashMap;

use crate::config::schema::RoutingConfig;
use crate::http::{Request, Response};
use crate::observability::metrics;
use crate::routing::context::{ContextHandle, RequestContext, RoutingContext};
use crate::routing::error::{HandlerResult, RouterError};
use crate::routing::mount::MountContext;
use crate::routing::pattern::{ParamSyntax, PatternCompiler};
use crate::routing::route::{check_mounted, Handler, Route, RouteInner};

/// Called with the prospective route list before it is published.
pub type ModificationListener = Arc<dyn Fn(&[Route]) -> Result<(), RouterError> + Send + Sync>;

pub(crate) struct RouterInner {
    routes: ArcSwap<Vec<Route>>,
    write_lock: Mutex<()>,
    order_seq: AtomicI32,
    error_handlers: DashMap<u16, Handler>,
    listeners: Mutex<Vec<ModificationListener>>,
    /// Routes this router is mounted on.
    mounts: Mutex<Vec<Weak<RouteInner>>>,
    compiler: PatternCompiler,
    use_normalized_path: bool,
}

/// Shared handle to a router. Clones refer to the same router.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.inner.routes.load().len())
            .field("syntax", &self.inner.compiler.syntax())
            .finish()
    }
}

impl Router {
    /// Router using the process-wide parameter syntax.
    pub fn new() -> Self {
        Self::with_options(PatternCompiler::default(), true)
    }

    pub fn with_options(compiler: PatternCompiler, use_normalized_path: bool) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                routes: ArcSwap::from_pointee(Vec::new()),
                write_lock: Mutex::new(()),
                order_seq: AtomicI32::new(0),
                error_handlers: DashMap::new(),
                listeners: Mutex::new(Vec::new()),
                mounts: Mutex::new(Vec::new()),
                compiler,
                use_normalized_path,
            }),
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Self {
        let syntax = if config.extended_param_names {
            ParamSyntax::Extended
        } else {
            ParamSyntax::Strict
        };
        Self::with_options(PatternCompiler::new(syntax), config.use_normalized_path)
    }

    pub(crate) fn from_inner(inner: Arc<RouterInner>) -> Self {
        Self { inner }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.write_lock.lock().expect("router mutex poisoned")
    }

    /// New route matching everything. It joins the router once it gets its
    /// first handler.
    pub fn route(&self) -> Route {
        let order = self.inner.order_seq.fetch_add(1, Ordering::Relaxed);
        Route::new(
            Arc::downgrade(&self.inner),
            self.inner.compiler,
            order,
            self.inner.use_normalized_path,
        )
    }

    pub fn route_path(&self, path: &str) -> Result<Route, RouterError> {
        let route = self.route();
        route.path(path)?;
        Ok(route)
    }

    pub fn route_method(&self, method: Method, path: &str) -> Result<Route, RouterError> {
        let route = self.route_path(path)?;
        route.method(method);
        Ok(route)
    }

    pub fn route_regex(&self, regex: &str) -> Result<Route, RouterError> {
        let route = self.route();
        route.path_regex(regex)?;
        Ok(route)
    }

    pub fn route_method_regex(&self, method: Method, regex: &str) -> Result<Route, RouterError> {
        let route = self.route_regex(regex)?;
        route.method(method);
        Ok(route)
    }

    pub fn get(&self, path: &str) -> Result<Route, RouterError> {
        self.route_method(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> Result<Route, RouterError> {
        self.route_method(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> Result<Route, RouterError> {
        self.route_method(Method::PUT, path)
    }

    pub fn delete(&self, path: &str) -> Result<Route, RouterError> {
        self.route_method(Method::DELETE, path)
    }

    pub fn patch(&self, path: &str) -> Result<Route, RouterError> {
        self.route_method(Method::PATCH, path)
    }

    pub fn head(&self, path: &str) -> Result<Route, RouterError> {
        self.route_method(Method::HEAD, path)
    }

    pub fn options(&self, path: &str) -> Result<Route, RouterError> {
        self.route_method(Method::OPTIONS, path)
    }

    /// Current routes in match order.
    pub fn routes(&self) -> Vec<Route> {
        self.inner.routes.load().as_ref().clone()
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Route>> {
        self.inner.routes.load_full()
    }

    pub(crate) fn add(&self, route: &Route) -> Result<(), RouterError> {
        let _guard = self.lock();
        let current = self.inner.routes.load_full();
        if current.contains(route) {
            return Ok(());
        }

        let order = route.get_order();
        let mut next = current.as_ref().clone();
        let index = next.partition_point(|r| r.get_order() <= order);
        next.insert(index, route.clone());

        self.notify(&next)?;
        check_mounted(self, self.inner.compiler, &next)?;
        self.inner.routes.store(Arc::new(next));
        tracing::debug!(order, name = ?route.name(), "Route added");
        Ok(())
    }

    pub(crate) fn remove(&self, route: &Route) -> bool {
        let _guard = self.lock();
        let current = self.inner.routes.load_full();
        let mut next = current.as_ref().clone();
        let before = next.len();
        next.retain(|r| r != route);
        if next.len() == before {
            return false;
        }
        if let Err(e) = self.notify(&next) {
            tracing::warn!(error = %e, "Route removal vetoed");
            return false;
        }
        self.inner.routes.store(Arc::new(next));
        true
    }

    /// Remove every route.
    pub fn clear(&self) -> &Self {
        let _guard = self.lock();
        match self.notify(&[]) {
            Ok(()) => self.inner.routes.store(Arc::new(Vec::new())),
            Err(e) => tracing::warn!(error = %e, "Router clear vetoed"),
        }
        self
    }

    fn notify(&self, routes: &[Route]) -> Result<(), RouterError> {
        let listeners = self
            .inner
            .listeners
            .lock()
            .expect("listeners mutex poisoned")
            .clone();
        for listener in listeners {
            listener(routes)?;
        }
        Ok(())
    }

    /// Register a listener invoked before each route list change.
    pub fn modified_handler<F>(&self, listener: F) -> &Self
    where
        F: Fn(&[Route]) -> Result<(), RouterError> + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .expect("listeners mutex poisoned")
            .push(Arc::new(listener));
        self
    }

    pub(crate) fn add_mount(&self, mount: &Route) {
        self.inner
            .mounts
            .lock()
            .expect("mounts mutex poisoned")
            .push(mount.downgrade());
    }

    /// Live routes this router is mounted on.
    pub(crate) fn mounts(&self) -> Vec<Route> {
        self.inner
            .mounts
            .lock()
            .expect("mounts mutex poisoned")
            .iter()
            .filter_map(Weak::upgrade)
            .map(Route::from_inner)
            .collect()
    }

    /// Handler used to render requests that end with `status` unhandled.
    pub fn error_handler<F>(&self, status: StatusCode, handler: F) -> &Self
    where
        F: Fn(ContextHandle) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.error_handlers.insert(status.as_u16(), Arc::new(handler));
        self
    }

    pub(crate) fn error_handler_for(&self, status: StatusCode) -> Option<Handler> {
        self.inner
            .error_handlers
            .get(&status.as_u16())
            .map(|h| h.value().clone())
    }

    /// Route a request. The returned context stays valid after dispatch
    /// returns, so asynchronous handlers may keep using it.
    pub fn dispatch(&self, request: Request, response: Response) -> ContextHandle {
        metrics::record_dispatch(request.method());
        let rejected = if request.path().is_empty() {
            Some(StatusCode::BAD_REQUEST)
        } else if !request.path().starts_with('/') {
            Some(StatusCode::NOT_FOUND)
        } else {
            None
        };

        let ctx: ContextHandle = RequestContext::new(self.clone(), request, response);
        tracing::trace!(method = %ctx.method(), path = %ctx.path(), "Dispatching request");
        match rejected {
            Some(status) => ctx.fail(status),
            None => ctx.next(),
        }
        ctx
    }

    /// Continue `ctx` inside this router (used when mounted).
    pub fn handle_context(&self, ctx: &ContextHandle) {
        MountContext::enter(self.clone(), ctx.clone()).next();
    }

    /// Continue a failed `ctx` inside this router (used when mounted).
    pub fn handle_failure(&self, ctx: &ContextHandle) {
        MountContext::enter(self.clone(), ctx.clone()).next();
    }
}
