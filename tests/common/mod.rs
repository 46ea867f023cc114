//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use web_router::routing::{ContextHandle, HandlerResult};
use web_router::{HttpServer, Request, Response, Router, RouterConfig, RoutingContext, Shutdown};

/// Ordered record of handler activity.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Handler that records `name` and continues.
pub fn tag(log: &Log, name: &'static str) -> impl Fn(ContextHandle) -> HandlerResult + Send + Sync {
    let log = log.clone();
    move |ctx| {
        log.push(name);
        ctx.next();
        Ok(())
    }
}

/// Handler that ends the response with `body`.
pub fn reply(body: &'static str) -> impl Fn(ContextHandle) -> HandlerResult + Send + Sync {
    move |ctx| {
        ctx.response().end_with(body)?;
        Ok(())
    }
}

/// Dispatch synchronously and return the response handle.
pub fn dispatch(router: &Router, request: Request) -> Response {
    let response = Response::new();
    router.dispatch(request, response.clone());
    response
}

pub fn body(response: &Response) -> String {
    String::from_utf8_lossy(&response.body()).into_owned()
}

/// Start a server on an ephemeral port. The returned handle stops it.
pub async fn spawn_server(router: Router, config: RouterConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(router, config);
    let stop = shutdown.clone();
    tokio::spawn(async move {
        server.run(listener, stop).await.unwrap();
    });
    (addr, shutdown)
}
