//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the axum app with a single fallback that feeds the router
//! - Wire up middleware (tracing, timeout, request ID)
//! - Bind to a listener and serve until shutdown
//! - Translate dropped requests into `Response::close`
//!
//! # Design Decisions
//! - Dispatch runs on the request task; handlers that go asynchronous keep
//!   the context and end the response later
//! - The request task waits on the completion channel, so the timeout layer
//!   bounds handlers that never finish

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request as AxumRequest, State},
    http::StatusCode,
    response::{IntoResponse, Response as AxumResponse},
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::RouterConfig;
use crate::http::request::{Request, UuidRequestId, X_REQUEST_ID};
use crate::http::response::{Response, ResponseOutcome};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::{Router, RoutingContext};

/// Application state injected into the fallback handler.
#[derive(Clone)]
struct AppState {
    router: Router,
    max_body_size: usize,
}

/// HTTP server exposing a [`Router`].
pub struct HttpServer {
    app: axum::Router,
    config: RouterConfig,
}

impl HttpServer {
    pub fn new(router: Router, config: RouterConfig) -> Self {
        let state = AppState {
            router,
            max_body_size: config.limits.max_body_size,
        };
        let app = Self::build_app(&config, state);
        Self { app, config }
    }

    #[allow(deprecated)]
    fn build_app(config: &RouterConfig, state: AppState) -> axum::Router {
        axum::Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut stop = shutdown.subscribe();
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The axum app, for embedding or in-process testing.
    pub fn into_app(self) -> axum::Router {
        self.app
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

/// Closes the response if the request future is dropped before it ended.
struct CloseOnDrop(Response);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if !self.0.ended() {
            self.0.close();
        }
    }
}

async fn dispatch(State(state): State<AppState>, request: AxumRequest) -> AxumResponse {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let bytes = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };
    let request = Request::from(axum::http::Request::from_parts(parts, bytes));

    let (response, completion) = Response::channel();
    let guard = CloseOnDrop(response.clone());
    let ctx = state.router.dispatch(request, response);
    tracing::debug!(request_id = %request_id, path = %ctx.path(), "Request dispatched");
    drop(ctx);

    let outcome = completion.await;
    drop(guard);
    match outcome {
        Ok(ResponseOutcome::Completed(response)) => {
            metrics::record_duration(response.status(), start);
            response.map(Body::from).into_response()
        }
        Ok(ResponseOutcome::Closed) | Err(_) => {
            tracing::debug!(request_id = %request_id, "Response closed without completing");
            metrics::record_duration(StatusCode::INTERNAL_SERVER_ERROR, start);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
