//! Per-request routing context.
//!
//! # Responsibilities
//! - Carry request-scoped state across handlers: data bag, path and query
//!   parameters, failure, session, user, negotiated content type
//! - Drive iteration through the router (`next`, `fail`, `reroute`)
//! - Expose response lifecycle hooks to handlers
//!
//! # Design Decisions
//! - Handlers receive `Arc<dyn RoutingContext>`; root and mounted contexts
//!   share one [`RequestScope`] and differ only in iteration state
//! - Scope state sits behind a single mutex that is never held while a
//!   handler or callback runs
//! - Query parameters are decoded lazily and cached for the default charset

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, Weak};

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;

use crate::http::{Request, Response};
use crate::routing::error::{status_of, Failure, HttpStatusError, RouterError};
use crate::routing::iteration::{self, Frame, Walk};
use crate::routing::lifecycle::{Callback, EndCallback};
use crate::routing::query::{decode_query, normalize_path, Charset, MultiMap};
use crate::routing::route::Route;
use crate::routing::router::Router;

/// Handle passed to every handler.
pub type ContextHandle = Arc<dyn RoutingContext>;

/// Session attached by a session handler.
pub trait Session: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
}

/// Authenticated principal attached by an auth handler.
pub trait User: Send + Sync + fmt::Debug {
    fn principal(&self) -> &serde_json::Value;
}

#[derive(Default)]
struct ScopeState {
    data: HashMap<String, Arc<dyn Any + Send + Sync>>,
    path_params: HashMap<String, String>,
    query_params: Option<Arc<MultiMap>>,
    normalized_path: Option<String>,
    status_code: Option<StatusCode>,
    failure: Option<Failure>,
    acceptable_content_type: Option<String>,
    body: Option<Bytes>,
    session: Option<Arc<dyn Session>>,
    session_accessed: bool,
    user: Option<Arc<dyn User>>,
}

/// Request-wide state shared by a root context and every mounted context
/// created for the same request.
pub struct RequestScope {
    request: RwLock<Request>,
    response: Response,
    state: Mutex<ScopeState>,
}

impl RequestScope {
    fn new(request: Request, response: Response) -> Self {
        Self {
            request: RwLock::new(request),
            response,
            state: Mutex::new(ScopeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().expect("scope mutex poisoned")
    }

    pub(crate) fn request(&self) -> RwLockReadGuard<'_, Request> {
        self.request.read().expect("request lock poisoned")
    }

    pub(crate) fn method(&self) -> Method {
        self.request().method().clone()
    }

    pub(crate) fn raw_path(&self) -> String {
        self.request().path().to_string()
    }

    pub(crate) fn header(&self, name: &str) -> Option<String> {
        self.request().header(name).map(str::to_string)
    }

    pub(crate) fn host(&self) -> Option<String> {
        self.request().host().map(str::to_string)
    }

    pub(crate) fn normalized_path(&self) -> String {
        if let Some(path) = self.lock().normalized_path.clone() {
            return path;
        }
        let path = normalize_path(&self.raw_path());
        self.lock().normalized_path = Some(path.clone());
        path
    }

    pub(crate) fn bind(&self, params: Vec<(String, String)>, acceptable: Option<String>) {
        let mut state = self.lock();
        state.path_params.extend(params);
        if acceptable.is_some() {
            state.acceptable_content_type = acceptable;
        }
    }

    pub(crate) fn set_status_code(&self, status: StatusCode) {
        self.lock().status_code = Some(status);
    }

    fn record_failure(&self, status: StatusCode, cause: Option<Failure>) {
        let mut state = self.lock();
        state.status_code = Some(status);
        if cause.is_some() {
            state.failure = cause;
        }
    }

    fn change_request(&self, method: Method, target: &str) {
        self.request
            .write()
            .expect("request lock poisoned")
            .change_to(method, target);

        let mut state = self.lock();
        state.normalized_path = None;
        state.query_params = None;
        state.path_params.clear();
        state.status_code = None;
        state.failure = None;
    }
}

/// Request context seen by handlers.
///
/// Only `next` and `mount_point` differ between the root context and the
/// contexts created below a mounted sub router; everything else reads and
/// writes the shared request scope.
pub trait RoutingContext: Frame {
    /// Continue with the next matching handler.
    fn next(&self);

    /// Path prefix consumed by enclosing mounts; `None` at the root.
    fn mount_point(&self) -> Option<&str>;

    fn request(&self) -> Request {
        self.scope().request().clone()
    }

    fn response(&self) -> Response {
        self.scope().response.clone()
    }

    fn method(&self) -> Method {
        self.scope().method()
    }

    fn path(&self) -> String {
        self.scope().raw_path()
    }

    fn uri(&self) -> String {
        self.scope().request().uri()
    }

    fn query(&self) -> Option<String> {
        self.scope().request().query().map(str::to_string)
    }

    fn header(&self, name: &str) -> Option<String> {
        self.scope().header(name)
    }

    fn headers(&self) -> HeaderMap {
        self.scope().request().headers().clone()
    }

    fn host(&self) -> Option<String> {
        self.scope().host()
    }

    /// Path with unreserved escapes decoded and dot segments removed.
    fn normalized_path(&self) -> String {
        self.scope().normalized_path()
    }

    /// Route whose handler is currently executing.
    fn current_route(&self) -> Option<Route> {
        self.active_route()
    }

    fn failed(&self) -> bool {
        let state = self.scope().lock();
        state.status_code.is_some() || state.failure.is_some()
    }

    fn failure(&self) -> Option<Failure> {
        self.scope().lock().failure.clone()
    }

    fn status_code(&self) -> Option<StatusCode> {
        self.scope().lock().status_code
    }

    /// Fail the request with a status code.
    fn fail(&self, status: StatusCode) {
        self.record_failure(status, None);
    }

    /// Fail with a cause; the status comes from an [`HttpStatusError`]
    /// cause, else 500.
    fn fail_cause(&self, cause: Failure) {
        let status = status_of(&cause);
        self.record_failure(status, Some(cause));
    }

    fn fail_with(&self, status: StatusCode, cause: Failure) {
        self.record_failure(status, Some(cause));
    }

    /// Dispatch again from the first route with a new path.
    fn reroute(&self, target: &str) -> Result<(), RouterError> {
        self.reroute_method(self.method(), target)
    }

    fn reroute_method(&self, method: Method, target: &str) -> Result<(), RouterError> {
        if !target.starts_with('/') {
            return Err(RouterError::PathNotAbsolute(target.to_string()));
        }
        self.restart_as(method, target);
        Ok(())
    }

    fn put(&self, key: &str, value: Arc<dyn Any + Send + Sync>) {
        self.scope().lock().data.insert(key.to_string(), value);
    }

    fn get_any(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.scope().lock().data.get(key).cloned()
    }

    fn remove(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.scope().lock().data.remove(key)
    }

    fn data_keys(&self) -> Vec<String> {
        self.scope().lock().data.keys().cloned().collect()
    }

    fn path_params(&self) -> HashMap<String, String> {
        self.scope().lock().path_params.clone()
    }

    fn path_param(&self, name: &str) -> Option<String> {
        self.scope().lock().path_params.get(name).cloned()
    }

    /// Decoded query parameters. Malformed queries yield a 400 error.
    fn query_params(&self) -> Result<Arc<MultiMap>, HttpStatusError> {
        if let Some(cached) = self.scope().lock().query_params.clone() {
            return Ok(cached);
        }
        let params = Arc::new(match self.query().filter(|q| !q.is_empty()) {
            Some(query) => decode_query(&query, Charset::Utf8)?,
            None => MultiMap::new(),
        });
        self.scope().lock().query_params = Some(params.clone());
        Ok(params)
    }

    /// Decode the query with an explicit charset, bypassing the cache.
    fn query_params_with(&self, charset: Charset) -> Result<MultiMap, HttpStatusError> {
        match self.query().filter(|q| !q.is_empty()) {
            Some(query) => decode_query(&query, charset),
            None => Ok(MultiMap::new()),
        }
    }

    fn query_param(&self, name: &str) -> Result<Vec<String>, HttpStatusError> {
        Ok(self
            .query_params()?
            .get_all(name)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Request body, or the replacement set by a body handler.
    fn body(&self) -> Option<Bytes> {
        if let Some(body) = self.scope().lock().body.clone() {
            return Some(body);
        }
        self.scope().request().body().cloned()
    }

    fn set_body(&self, body: Bytes) {
        self.scope().lock().body = Some(body);
    }

    fn body_as_string(&self) -> Option<String> {
        self.body()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    fn body_as_json(&self) -> Result<Option<serde_json::Value>, serde_json::Error> {
        match self.body().filter(|b| !b.is_empty()) {
            Some(body) => serde_json::from_slice(&body).map(Some),
            None => Ok(None),
        }
    }

    /// Content type picked by `produces` negotiation.
    fn acceptable_content_type(&self) -> Option<String> {
        self.scope().lock().acceptable_content_type.clone()
    }

    fn set_acceptable_content_type(&self, content_type: Option<String>) {
        self.scope().lock().acceptable_content_type = content_type;
    }

    fn session(&self) -> Option<Arc<dyn Session>> {
        let mut state = self.scope().lock();
        state.session_accessed = true;
        state.session.clone()
    }

    fn set_session(&self, session: Arc<dyn Session>) {
        self.scope().lock().session = Some(session);
    }

    fn is_session_accessed(&self) -> bool {
        self.scope().lock().session_accessed
    }

    fn user(&self) -> Option<Arc<dyn User>> {
        self.scope().lock().user.clone()
    }

    fn set_user(&self, user: Arc<dyn User>) {
        self.scope().lock().user = Some(user);
    }

    fn clear_user(&self) {
        self.scope().lock().user = None;
    }

    /// Value of a request cookie.
    fn cookie(&self, name: &str) -> Option<String> {
        self.cookie_map().remove(name)
    }

    fn cookie_map(&self) -> HashMap<String, String> {
        let mut cookies = HashMap::new();
        for header in self.scope().request().headers().get_all("cookie") {
            let Ok(header) = header.to_str() else {
                continue;
            };
            for pair in header.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    cookies
                        .entry(name.trim().to_string())
                        .or_insert_with(|| value.trim().trim_matches('"').to_string());
                }
            }
        }
        cookies
    }

    fn cookie_count(&self) -> usize {
        self.cookie_map().len()
    }

    /// Send a cookie to the client.
    fn add_cookie(&self, name: &str, value: &str) -> Result<(), RouterError> {
        check_cookie(name, value)?;
        self.response()
            .append_header("set-cookie", &format!("{name}={value}; Path=/"))?;
        Ok(())
    }

    /// Expire a cookie on the client.
    fn remove_cookie(&self, name: &str) -> Result<(), RouterError> {
        check_cookie(name, "")?;
        self.response()
            .append_header("set-cookie", &format!("{name}=; Max-Age=0; Path=/"))?;
        Ok(())
    }

    fn add_headers_end_handler(&self, callback: Callback) -> Result<u32, RouterError> {
        self.scope().response.lifecycle().add_headers_end(callback)
    }

    fn remove_headers_end_handler(&self, id: u32) -> bool {
        self.scope().response.lifecycle().remove_headers_end(id)
    }

    fn add_body_end_handler(&self, callback: Callback) -> Result<u32, RouterError> {
        self.scope().response.lifecycle().add_body_end(callback)
    }

    fn remove_body_end_handler(&self, id: u32) -> bool {
        self.scope().response.lifecycle().remove_body_end(id)
    }

    fn add_end_handler(&self, callback: EndCallback) -> Result<u32, RouterError> {
        self.scope().response.lifecycle().add_end(callback)
    }

    fn remove_end_handler(&self, id: u32) -> bool {
        self.scope().response.lifecycle().remove_end(id)
    }
}

impl dyn RoutingContext {
    /// Typed read from the data bag.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get_any(key)?.downcast::<T>().ok()
    }

    /// Typed write to the data bag.
    pub fn insert<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.put(key, Arc::new(value));
    }
}

fn check_cookie(name: &str, value: &str) -> Result<(), RouterError> {
    let bad_name = name.is_empty()
        || name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, ';' | '=' | ','));
    let bad_value = value
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, ';' | ','));
    if bad_name || bad_value {
        return Err(RouterError::InvalidHeader(format!("{name}={value}")));
    }
    Ok(())
}

/// Context created for each dispatched request.
pub struct RequestContext {
    me: Weak<RequestContext>,
    router: Router,
    scope: RequestScope,
    walk: Mutex<Walk>,
}

impl RequestContext {
    pub(crate) fn new(router: Router, request: Request, response: Response) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            walk: Mutex::new(Walk::new(router.clone())),
            router,
            scope: RequestScope::new(request, response),
        })
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method())
            .field("path", &self.path())
            .field("failed", &self.failed())
            .finish()
    }
}

impl Frame for RequestContext {
    fn scope(&self) -> &RequestScope {
        &self.scope
    }

    fn walk(&self) -> &Mutex<Walk> {
        &self.walk
    }

    fn handle(&self) -> Option<ContextHandle> {
        self.me.upgrade().map(|ctx| ctx as ContextHandle)
    }

    fn record_failure(&self, status: StatusCode, cause: Option<Failure>) {
        self.scope.record_failure(status, cause);
        self.lock_walk().restart();
        self.next();
    }

    fn restart_as(&self, method: Method, target: &str) {
        tracing::debug!(method = %method, target, "Rerouting request");
        self.scope.change_request(method, target);
        self.scope.response.clear_headers();
        self.scope.response.lifecycle().clear_response_callbacks();
        {
            let mut walk = self.lock_walk();
            walk.restart();
            walk.reset_match_failure();
        }
        self.next();
    }
}

impl RoutingContext for RequestContext {
    fn next(&self) {
        if !iteration::iterate_next(self) {
            iteration::handle_exhausted(self, &self.router);
        }
    }

    fn mount_point(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(request: Request) -> ContextHandle {
        RequestContext::new(Router::new(), request, Response::new())
    }

    #[derive(Debug)]
    struct TestUser(serde_json::Value);

    impl User for TestUser {
        fn principal(&self) -> &serde_json::Value {
            &self.0
        }
    }

    #[derive(Debug)]
    struct TestSession;

    impl Session for TestSession {
        fn id(&self) -> &str {
            "s-1"
        }
    }

    #[test]
    fn test_typed_data_bag() {
        let ctx = context(Request::get("/"));
        ctx.insert("count", 3_u32);
        assert_eq!(ctx.get::<u32>("count").as_deref(), Some(&3));
        assert!(ctx.get::<String>("count").is_none());
        assert_eq!(ctx.data_keys(), vec!["count".to_string()]);
        assert!(ctx.remove("count").is_some());
        assert!(ctx.get::<u32>("count").is_none());
    }

    #[test]
    fn test_query_params_cached_and_charset() {
        let ctx = context(Request::get("/?name=J%FCrgen&x=1"));
        assert_eq!(ctx.query_params().unwrap_err().status, StatusCode::BAD_REQUEST);

        let latin = ctx.query_params_with(Charset::Latin1).unwrap();
        assert_eq!(latin.get("name"), Some("Jürgen"));

        let ctx = context(Request::get("/?a=1&a=2"));
        let first = ctx.query_params().unwrap();
        let second = ctx.query_params().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ctx.query_param("A").unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_empty_query() {
        let ctx = context(Request::get("/path?"));
        assert!(ctx.query_params().unwrap().is_empty());
        let ctx = context(Request::get("/path"));
        assert!(ctx.query_params().unwrap().is_empty());
    }

    #[test]
    fn test_cookies() {
        let request = Request::get("/")
            .with_header("cookie", "a=1; b=\"two\"")
            .unwrap()
            .with_header("cookie", "c=3")
            .unwrap();
        let ctx = context(request);
        assert_eq!(ctx.cookie("b").as_deref(), Some("two"));
        assert_eq!(ctx.cookie_count(), 3);

        ctx.add_cookie("token", "abc").unwrap();
        ctx.remove_cookie("a").unwrap();
        assert!(ctx.add_cookie("bad name", "x").is_err());

        let headers = ctx.response().headers();
        let set: Vec<_> = headers.get_all("set-cookie").iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0], "token=abc; Path=/");
    }

    #[test]
    fn test_body_access() {
        let ctx = context(Request::get("/").with_body(r#"{"id":7}"#));
        assert_eq!(ctx.body_as_string().as_deref(), Some(r#"{"id":7}"#));
        assert_eq!(ctx.body_as_json().unwrap(), Some(serde_json::json!({"id": 7})));

        ctx.set_body(Bytes::from_static(b"not json"));
        assert!(ctx.body_as_json().is_err());
        assert!(context(Request::get("/")).body_as_json().unwrap().is_none());
    }

    #[test]
    fn test_session_and_user() {
        let ctx = context(Request::get("/"));
        assert!(!ctx.is_session_accessed());
        ctx.set_session(Arc::new(TestSession));
        assert!(!ctx.is_session_accessed());
        assert_eq!(ctx.session().unwrap().id(), "s-1");
        assert!(ctx.is_session_accessed());

        ctx.set_user(Arc::new(TestUser(serde_json::json!({"sub": "u1"}))));
        assert_eq!(ctx.user().unwrap().principal()["sub"], "u1");
        ctx.clear_user();
        assert!(ctx.user().is_none());
    }

    #[test]
    fn test_reroute_requires_absolute_path() {
        let ctx = context(Request::get("/a"));
        assert_eq!(
            ctx.reroute("relative").unwrap_err(),
            RouterError::PathNotAbsolute("relative".to_string())
        );
    }
}
