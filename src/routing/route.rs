//! A single registered routing rule.
//!
//! # Responsibilities
//! - Hold match predicates (path/pattern, methods, media types, virtual host)
//! - Hold the ordered context and failure handler chains
//! - Evaluate whether a request matches, and with which bindings
//! - Mount sub routers and keep their parameter names collision-free
//!
//! # Design Decisions
//! - State is an immutable snapshot behind `ArcSwap`; every setter clones,
//!   edits and swaps it under a per-route lock, so readers never lock and
//!   never observe a half-applied change
//! - The first handler registration attaches the route to its router
//! - Routes hold their router weakly; routers own routes

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use arc_swap::ArcSwap;
use axum::http::{Method, StatusCode};
use regex::Regex;

use crate::routing::context::{ContextHandle, RequestScope};
use crate::routing::error::{HandlerResult, RouterError};
use crate::routing::media::{self, MediaType};
use crate::routing::pattern::{compile_host, CompiledPath, PatternCompiler};
use crate::routing::router::{Router, RouterInner};

/// A request handler. Handlers either complete the response, continue with
/// `ctx.next()`, or fail the request.
pub type Handler = Arc<dyn Fn(ContextHandle) -> HandlerResult + Send + Sync>;

/// Immutable view of a route's configuration.
#[derive(Clone)]
pub(crate) struct RouteState {
    pub(crate) order: i32,
    pub(crate) methods: Vec<Method>,
    pub(crate) matcher: Option<CompiledPath>,
    pub(crate) produces: Vec<MediaType>,
    pub(crate) consumes: Vec<MediaType>,
    pub(crate) virtual_host: Option<Regex>,
    pub(crate) context_handlers: Vec<Handler>,
    pub(crate) failure_handlers: Vec<Handler>,
    pub(crate) enabled: bool,
    pub(crate) exclusive: bool,
    pub(crate) added: bool,
    pub(crate) use_normalized_path: bool,
    pub(crate) empty_body_permitted_with_consumes: bool,
    pub(crate) name: Option<String>,
    pub(crate) metadata: HashMap<String, serde_json::Value>,
    pub(crate) mounted: Option<Router>,
}

/// Bindings produced by a successful match.
#[derive(Debug, Clone, Default)]
pub(crate) struct RouteMatch {
    pub(crate) params: Vec<(String, String)>,
    pub(crate) acceptable: Option<String>,
    /// Matched prefix a sub router mounted here would see as its mount point.
    pub(crate) mount_segment: String,
}

impl RouteState {
    fn new(order: i32, use_normalized_path: bool) -> Self {
        Self {
            order,
            methods: Vec::new(),
            matcher: None,
            produces: Vec::new(),
            consumes: Vec::new(),
            virtual_host: None,
            context_handlers: Vec::new(),
            failure_handlers: Vec::new(),
            enabled: true,
            exclusive: false,
            added: false,
            use_normalized_path,
            empty_body_permitted_with_consumes: false,
            name: None,
            metadata: HashMap::new(),
            mounted: None,
        }
    }

    /// Evaluate every predicate against the request. A rejection carries the
    /// status it would justify (404 when the route is simply unrelated).
    pub(crate) fn matches(
        &self,
        scope: &RequestScope,
        mount_point: Option<&str>,
        failed: bool,
    ) -> Result<RouteMatch, StatusCode> {
        let handlers = if failed {
            &self.failure_handlers
        } else {
            &self.context_handlers
        };
        if handlers.is_empty() || !self.enabled {
            return Err(StatusCode::NOT_FOUND);
        }

        let full = if self.use_normalized_path {
            scope.normalized_path()
        } else {
            scope.raw_path()
        };
        let relative = relative_path(&full, mount_point).ok_or(StatusCode::NOT_FOUND)?;

        let mut found = RouteMatch::default();
        match &self.matcher {
            Some(matcher) => {
                let m = matcher.matches(relative).ok_or(StatusCode::NOT_FOUND)?;
                let prefix = match m.rest_start {
                    Some(start) => &relative[..start],
                    None => relative,
                };
                found.mount_segment = mount_segment(prefix);
                found.params = m.params;
            }
            None => found.mount_segment = "/".to_string(),
        }

        if !self.methods.is_empty() && !self.methods.contains(&scope.method()) {
            return Err(StatusCode::METHOD_NOT_ALLOWED);
        }

        if !self.consumes.is_empty() {
            let content_type = scope.header("content-type").unwrap_or_default();
            if content_type.trim().is_empty() {
                if !self.empty_body_permitted_with_consumes {
                    return Err(StatusCode::BAD_REQUEST);
                }
            } else {
                let consumable = MediaType::parse(&content_type)
                    .ok()
                    .and_then(|ct| media::find_consumable(&ct, &self.consumes).cloned());
                if consumable.is_none() {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE);
                }
            }
        }

        if !self.produces.is_empty() {
            let accept = scope.header("accept").filter(|a| !a.trim().is_empty());
            let selected = match accept {
                Some(accept) => media::negotiate(&MediaType::parse_list(&accept), &self.produces),
                None => self.produces.first(),
            };
            match selected {
                Some(selected) => found.acceptable = Some(selected.essence()),
                None => return Err(StatusCode::NOT_ACCEPTABLE),
            }
        }

        if let Some(host_pattern) = &self.virtual_host {
            let host = scope.host().unwrap_or_default();
            if !host_pattern.is_match(strip_port(&host)) {
                return Err(StatusCode::NOT_FOUND);
            }
        }

        Ok(found)
    }
}

/// Path as seen below `mount_point`. The mount point itself maps to `/`.
fn relative_path<'a>(full: &'a str, mount_point: Option<&str>) -> Option<&'a str> {
    match mount_point {
        None | Some("/") => Some(full),
        Some(mount) => {
            let rest = full.strip_prefix(mount)?;
            if rest.is_empty() {
                Some("/")
            } else if rest.starts_with('/') {
                Some(rest)
            } else {
                None
            }
        }
    }
}

fn mount_segment(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(end) = host.strip_prefix('[').and_then(|h| h.find(']')) {
        return &host[..end + 2];
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

#[derive(Clone, Copy)]
enum HandlerKind {
    Context,
    Failure,
}

pub(crate) struct RouteInner {
    router: Weak<RouterInner>,
    compiler: PatternCompiler,
    state: ArcSwap<RouteState>,
    write_lock: Mutex<()>,
}

/// Handle to a route. Clones refer to the same route.
#[derive(Clone)]
pub struct Route {
    inner: Arc<RouteInner>,
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Route {}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Route")
            .field("name", &state.name)
            .field("order", &state.order)
            .field("path", &state.matcher.as_ref().map(|m| m.source().to_string()))
            .field("methods", &state.methods)
            .field("enabled", &state.enabled)
            .field("exclusive", &state.exclusive)
            .finish()
    }
}

impl Route {
    pub(crate) fn new(
        router: Weak<RouterInner>,
        compiler: PatternCompiler,
        order: i32,
        use_normalized_path: bool,
    ) -> Self {
        Self {
            inner: Arc::new(RouteInner {
                router,
                compiler,
                state: ArcSwap::from_pointee(RouteState::new(order, use_normalized_path)),
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RouteInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RouteInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn state(&self) -> Arc<RouteState> {
        self.inner.state.load_full()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.write_lock.lock().expect("route mutex poisoned")
    }

    fn modify(&self, f: impl FnOnce(&mut RouteState)) -> &Self {
        let _guard = self.lock();
        self.modify_locked(f);
        self
    }

    fn modify_locked(&self, f: impl FnOnce(&mut RouteState)) {
        let mut next = RouteState::clone(&self.inner.state.load());
        f(&mut next);
        self.inner.state.store(Arc::new(next));
    }

    fn try_modify(
        &self,
        f: impl FnOnce(&mut RouteState) -> Result<(), RouterError>,
    ) -> Result<&Self, RouterError> {
        let _guard = self.lock();
        let mut next = RouteState::clone(&self.inner.state.load());
        f(&mut next)?;
        self.inner.state.store(Arc::new(next));
        Ok(self)
    }

    fn router(&self) -> Result<Router, RouterError> {
        self.inner
            .router
            .upgrade()
            .map(Router::from_inner)
            .ok_or(RouterError::Detached)
    }

    /// Restrict the route to `method`. Repeated calls accumulate.
    pub fn method(&self, method: Method) -> &Self {
        self.modify(|s| {
            if !s.methods.contains(&method) {
                s.methods.push(method);
            }
        })
    }

    /// Match a declarative path (`/users/:id`, `/assets/*`).
    pub fn path(&self, path: &str) -> Result<&Self, RouterError> {
        let compiled = self.inner.compiler.compile_path(path)?;
        self.modify(|s| s.matcher = Some(compiled));
        Ok(self)
    }

    /// Match a raw regular expression against the whole path.
    pub fn path_regex(&self, regex: &str) -> Result<&Self, RouterError> {
        let compiled = self.inner.compiler.compile_regex(regex)?;
        self.modify(|s| s.matcher = Some(compiled));
        Ok(self)
    }

    /// Name the groups of a raw regex positionally.
    pub fn set_regex_group_names(&self, names: Vec<String>) -> &Self {
        self.modify(|s| {
            if let Some(matcher) = s.matcher.take() {
                s.matcher = Some(matcher.with_group_names(names));
            }
        })
    }

    /// Declare a media type this route can produce.
    pub fn produces(&self, content_type: &str) -> Result<&Self, RouterError> {
        let media = MediaType::parse(content_type)?;
        Ok(self.modify(|s| s.produces.push(media)))
    }

    /// Declare a request media type this route accepts.
    pub fn consumes(&self, content_type: &str) -> Result<&Self, RouterError> {
        let media = MediaType::parse(content_type)?;
        Ok(self.modify(|s| s.consumes.push(media)))
    }

    /// Only match requests whose host matches `hostname` (`*` wildcards).
    pub fn virtual_host(&self, hostname: &str) -> Result<&Self, RouterError> {
        let pattern = compile_host(hostname)?;
        Ok(self.modify(|s| s.virtual_host = Some(pattern)))
    }

    /// Change the match priority. Only allowed before the route is live.
    pub fn order(&self, order: i32) -> Result<&Self, RouterError> {
        self.try_modify(|s| {
            if s.added {
                return Err(RouterError::OrderFrozen);
            }
            s.order = order;
            Ok(())
        })
    }

    /// Match after every other route.
    pub fn last(&self) -> Result<&Self, RouterError> {
        self.order(i32::MAX)
    }

    pub fn handler<F>(&self, handler: F) -> Result<&Self, RouterError>
    where
        F: Fn(ContextHandle) -> HandlerResult + Send + Sync + 'static,
    {
        let _guard = self.lock();
        self.add_handler_locked(HandlerKind::Context, Arc::new(handler))?;
        Ok(self)
    }

    pub fn failure_handler<F>(&self, handler: F) -> Result<&Self, RouterError>
    where
        F: Fn(ContextHandle) -> HandlerResult + Send + Sync + 'static,
    {
        let _guard = self.lock();
        self.add_handler_locked(HandlerKind::Failure, Arc::new(handler))?;
        Ok(self)
    }

    fn add_handler_locked(&self, kind: HandlerKind, handler: Handler) -> Result<(), RouterError> {
        let current = self.inner.state.load_full();
        if current.exclusive {
            return Err(RouterError::ExclusiveRoute);
        }

        let mut next = RouteState::clone(&current);
        match kind {
            HandlerKind::Context => next.context_handlers.push(handler),
            HandlerKind::Failure => next.failure_handlers.push(handler),
        }
        if !next.added {
            self.router()?.add(self)?;
            next.added = true;
        }
        self.inner.state.store(Arc::new(next));
        Ok(())
    }

    /// Delegate everything below this route's path to `child`.
    pub fn sub_router(&self, child: &Router) -> Result<&Self, RouterError> {
        let _guard = self.lock();
        let state = self.state();

        if let Some(matcher) = &state.matcher {
            if matcher.is_regex() {
                return Err(RouterError::MountOnRegex);
            }
            if matcher.is_exact() {
                return Err(RouterError::MountOnExactPath);
            }
        }
        if !state.context_handlers.is_empty() || !state.failure_handlers.is_empty() {
            return Err(RouterError::MountWithHandlers);
        }
        let child_routes = child.routes();
        for prefix in self.full_paths() {
            validate_below(prefix.as_deref(), self.inner.compiler, &child_routes)?;
        }

        let forward = child.clone();
        self.add_handler_locked(
            HandlerKind::Context,
            Arc::new(move |ctx| {
                forward.handle_context(&ctx);
                Ok(())
            }),
        )?;
        let forward = child.clone();
        self.add_handler_locked(
            HandlerKind::Failure,
            Arc::new(move |ctx| {
                forward.handle_failure(&ctx);
                Ok(())
            }),
        )?;

        child.add_mount(self);
        let child = child.clone();
        self.modify_locked(|s| {
            s.exclusive = true;
            s.mounted = Some(child);
        });
        tracing::debug!(
            path = ?state.matcher.as_ref().map(|m| m.source().to_string()),
            "Sub router mounted"
        );
        Ok(self)
    }

    /// Detach from the router. In-flight requests keep their snapshot.
    pub fn remove(&self) -> bool {
        match self.router() {
            Ok(router) => router.remove(self),
            Err(_) => false,
        }
    }

    pub fn disable(&self) -> &Self {
        self.modify(|s| s.enabled = false)
    }

    pub fn enable(&self) -> &Self {
        self.modify(|s| s.enabled = true)
    }

    pub fn use_normalized_path(&self, use_normalized_path: bool) -> &Self {
        self.modify(|s| s.use_normalized_path = use_normalized_path)
    }

    /// Let requests without a `Content-Type` through a `consumes` check.
    pub fn empty_body_permitted_with_consumes(&self, permitted: bool) -> &Self {
        self.modify(|s| s.empty_body_permitted_with_consumes = permitted)
    }

    pub fn set_name(&self, name: impl Into<String>) -> &Self {
        let name = name.into();
        self.modify(|s| s.name = Some(name))
    }

    pub fn put_metadata(&self, key: impl Into<String>, value: serde_json::Value) -> &Self {
        let key = key.into();
        self.modify(|s| {
            s.metadata.insert(key, value);
        })
    }

    pub fn name(&self) -> Option<String> {
        self.state().name.clone()
    }

    pub fn metadata(&self) -> HashMap<String, serde_json::Value> {
        self.state().metadata.clone()
    }

    pub fn get_metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.state().metadata.get(key).cloned()
    }

    /// Declared path without the trailing `*`.
    pub fn get_path(&self) -> Option<String> {
        self.state()
            .matcher
            .as_ref()
            .and_then(|m| m.path())
            .map(str::to_string)
    }

    pub fn is_regex_path(&self) -> bool {
        self.state().matcher.as_ref().is_some_and(|m| m.is_regex())
    }

    /// Routes without a path match any path and count as non-exact.
    pub fn is_exact_path(&self) -> bool {
        self.state().matcher.as_ref().is_some_and(|m| m.is_exact())
    }

    pub fn param_names(&self) -> Vec<String> {
        self.state()
            .matcher
            .as_ref()
            .map(|m| m.param_names().to_vec())
            .unwrap_or_default()
    }

    pub fn methods(&self) -> Vec<Method> {
        self.state().methods.clone()
    }

    pub fn get_order(&self) -> i32 {
        self.state().order
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn is_exclusive(&self) -> bool {
        self.state().exclusive
    }

    pub fn is_added(&self) -> bool {
        self.state().added
    }
}

impl Route {
    /// Full declared paths this route is reachable under, one per chain of
    /// enclosing mounts. `None` stands for a path-less route at the root.
    fn full_paths(&self) -> Vec<Option<String>> {
        let state = self.state();
        let own = state.matcher.as_ref().and_then(|m| m.path());
        let parents = match self.router() {
            Ok(router) => mount_prefixes(&router),
            Err(_) => vec![None],
        };
        parents
            .into_iter()
            .map(|parent| match (parent, own) {
                (Some(parent), Some(own)) => Some(join_paths(&parent, own)),
                (parent, None) => parent,
                (None, Some(own)) => Some(own.to_string()),
            })
            .collect()
    }
}

/// Every full path prefix `router` is mounted under.
fn mount_prefixes(router: &Router) -> Vec<Option<String>> {
    let mounts = router.mounts();
    if mounts.is_empty() {
        return vec![None];
    }
    mounts.iter().flat_map(Route::full_paths).collect()
}

/// Reject routes of a mounted router whose full path, through any chain of
/// enclosing mounts, would capture a name twice.
pub(crate) fn check_mounted(
    router: &Router,
    compiler: PatternCompiler,
    routes: &[Route],
) -> Result<(), RouterError> {
    if router.mounts().is_empty() {
        return Ok(());
    }
    for prefix in mount_prefixes(router) {
        validate_below(prefix.as_deref(), compiler, routes)?;
    }
    Ok(())
}

fn join_paths(prefix: &str, child: &str) -> String {
    match prefix.strip_suffix('/') {
        Some(trimmed) => format!("{trimmed}{child}"),
        None => format!("{prefix}{child}"),
    }
}

fn validate_below(
    prefix: Option<&str>,
    compiler: PatternCompiler,
    routes: &[Route],
) -> Result<(), RouterError> {
    for route in routes {
        let state = route.state();
        // Regex routes carry no declarative names to compare.
        if state.matcher.as_ref().is_some_and(|m| m.is_regex()) {
            continue;
        }
        let child_path = state.matcher.as_ref().and_then(|m| m.path()).unwrap_or("/");

        let combined = match prefix {
            Some(prefix) => join_paths(prefix, child_path),
            None => child_path.to_string(),
        };

        let mut seen: Vec<&str> = Vec::new();
        for param in compiler.scan_params(&combined) {
            if seen.contains(&param) {
                return Err(RouterError::MountParamCollision {
                    param: param.to_string(),
                    path: combined.clone(),
                });
            }
            seen.push(param);
        }

        if let Some(grandchild) = &state.mounted {
            validate_below(Some(&combined), compiler, &grandchild.routes())?;
        }
    }
    Ok(())
}
