//! Request facade handed to the routing core.
//!
//! # Responsibilities
//! - Carry already-parsed request metadata (method, path, query, headers)
//! - Resolve the request host for virtual host matching
//! - Allow in-place method/path changes for reroutes
//! - Generate request IDs at the transport edge
//!
//! # Design Decisions
//! - The core never parses bytes; transports build a `Request` from their
//!   own representation
//! - Path and query are stored separately so reroutes can swap them cheaply

use axum::http::header::{HeaderName, HeaderValue, HOST};
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::routing::error::RouterError;

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Inbound request metadata.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    authority: Option<String>,
    body: Option<Bytes>,
}

impl Request {
    /// Build a request for `target` (`/path?query`).
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method,
            path,
            query,
            headers: HeaderMap::new(),
            authority: None,
            body: None,
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, RouterError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RouterError::InvalidHeader(name.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| RouterError::InvalidHeader(value.to_string()))?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Path plus query, as it appeared on the request line.
    pub fn uri(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `Host` header, falling back to the URI authority.
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or(self.authority.as_deref())
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Rewrite method and target in place.
    pub(crate) fn change_to(&mut self, method: Method, target: &str) {
        let (path, query) = split_target(target);
        self.method = method;
        self.path = path;
        self.query = query;
    }
}

impl From<axum::http::Request<Bytes>> for Request {
    fn from(req: axum::http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        let mut request = Request::new(
            parts.method,
            parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or(parts.uri.path()),
        );
        request.headers = parts.headers;
        request.authority = parts.uri.authority().map(|a| a.to_string());
        if !body.is_empty() {
            request.body = Some(body);
        }
        request
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    }
}

/// Generates UUID v4 request IDs for `tower_http`'s request-id layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}
