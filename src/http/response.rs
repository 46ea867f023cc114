//! Response facade written by handlers.
//!
//! # Responsibilities
//! - Collect status, headers and body written by handlers
//! - Fire headers-end, body-end and end lifecycle callbacks in order
//! - Hand the finished response to the transport through a completion channel
//! - Surface transport disconnects as a single failed `end` event
//!
//! # Design Decisions
//! - Headers-end callbacks run before headers are frozen so they can still
//!   add headers
//! - No lock is held while callbacks run
//! - A response completes at most once; later writes are usage errors

use std::sync::{Arc, Mutex, MutexGuard};

use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{HeaderMap, StatusCode};
use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::routing::error::{ConnectionClosed, Failure, RouterError};
use crate::routing::lifecycle::Lifecycle;

/// What the transport receives once the response is settled.
#[derive(Debug)]
pub enum ResponseOutcome {
    /// The response was ended normally.
    Completed(axum::http::Response<Bytes>),
    /// The connection went away first.
    Closed,
}

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    headers_written: bool,
    ended: bool,
    closed: bool,
}

#[derive(Debug)]
struct ResponseInner {
    state: Mutex<ResponseState>,
    lifecycle: Lifecycle,
    sink: Mutex<Option<oneshot::Sender<ResponseOutcome>>>,
}

/// Shared handle to the response of one request.
#[derive(Debug, Clone)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    /// A response without a transport attached.
    pub fn new() -> Self {
        Self::with_sink(None)
    }

    /// A response whose outcome is delivered on the returned receiver.
    pub fn channel() -> (Self, oneshot::Receiver<ResponseOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self::with_sink(Some(tx)), rx)
    }

    fn with_sink(sink: Option<oneshot::Sender<ResponseOutcome>>) -> Self {
        Self {
            inner: Arc::new(ResponseInner {
                state: Mutex::new(ResponseState {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: BytesMut::new(),
                    headers_written: false,
                    ended: false,
                    closed: false,
                }),
                lifecycle: Lifecycle::new(),
                sink: Mutex::new(sink),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ResponseState> {
        self.inner.state.lock().expect("response mutex poisoned")
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }

    pub fn status(&self) -> StatusCode {
        self.state().status
    }

    pub fn set_status(&self, status: StatusCode) -> &Self {
        self.state().status = status;
        self
    }

    pub fn headers(&self) -> HeaderMap {
        self.state().headers.clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.state()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Set a header, replacing previous values.
    pub fn put_header(&self, name: &str, value: &str) -> Result<&Self, RouterError> {
        let (name, value) = header_pair(name, value)?;
        self.state().headers.insert(name, value);
        Ok(self)
    }

    /// Add a header value, keeping previous values.
    pub fn append_header(&self, name: &str, value: &str) -> Result<&Self, RouterError> {
        let (name, value) = header_pair(name, value)?;
        self.state().headers.append(name, value);
        Ok(self)
    }

    pub fn clear_headers(&self) -> &Self {
        self.state().headers.clear();
        self
    }

    pub fn ended(&self) -> bool {
        self.state().ended
    }

    pub fn closed(&self) -> bool {
        self.state().closed
    }

    pub fn headers_written(&self) -> bool {
        self.state().headers_written
    }

    /// Bytes written so far.
    pub fn body(&self) -> Bytes {
        self.state().body.clone().freeze()
    }

    fn check_writable(&self) -> Result<bool, RouterError> {
        let state = self.state();
        if state.closed {
            return Err(RouterError::ResponseClosed);
        }
        if state.ended {
            return Err(RouterError::ResponseEnded);
        }
        Ok(!state.headers_written)
    }

    /// Write a body chunk; the first write freezes the headers.
    pub fn write(&self, chunk: impl AsRef<[u8]>) -> Result<(), RouterError> {
        if self.check_writable()? {
            self.inner.lifecycle.fire_headers_end();
        }
        let mut state = self.state();
        state.headers_written = true;
        state.body.extend_from_slice(chunk.as_ref());
        Ok(())
    }

    pub fn end(&self) -> Result<(), RouterError> {
        self.end_with(Bytes::new())
    }

    /// Write a last chunk and complete the response.
    pub fn end_with(&self, chunk: impl AsRef<[u8]>) -> Result<(), RouterError> {
        if self.check_writable()? {
            self.inner.lifecycle.fire_headers_end();
        }

        let completed = {
            let mut state = self.state();
            if state.ended {
                return Err(RouterError::ResponseEnded);
            }
            state.headers_written = true;
            state.ended = true;
            state.body.extend_from_slice(chunk.as_ref());

            let mut response = axum::http::Response::new(state.body.clone().freeze());
            *response.status_mut() = state.status;
            *response.headers_mut() = state.headers.clone();
            response
        };

        self.inner.lifecycle.fire_body_end();
        self.deliver(ResponseOutcome::Completed(completed));
        self.inner.lifecycle.fire_end(Ok(()));
        Ok(())
    }

    /// The transport lost the connection.
    pub fn close(&self) {
        {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.deliver(ResponseOutcome::Closed);
        if self.inner.lifecycle.fire_end(Err(Arc::new(ConnectionClosed))) {
            tracing::debug!("Connection closed before response completed");
        }
    }

    /// The transport failed while writing. Settles the completion channel
    /// like `close`, reporting `cause` to the end callbacks.
    pub fn exception(&self, cause: Failure) {
        self.state().closed = true;
        self.deliver(ResponseOutcome::Closed);
        if self.inner.lifecycle.fire_end(Err(cause)) {
            tracing::debug!("Transport failed before response completed");
        }
    }

    fn deliver(&self, outcome: ResponseOutcome) {
        let sink = self.inner.sink.lock().expect("response sink poisoned").take();
        if let Some(tx) = sink {
            let _ = tx.send(outcome);
        }
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), RouterError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| RouterError::InvalidHeader(name.to_string()))?;
    let value =
        HeaderValue::from_str(value).map_err(|_| RouterError::InvalidHeader(value.to_string()))?;
    Ok((name, value))
}
