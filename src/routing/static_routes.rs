//! Routes declared in configuration.
//!
//! Each entry becomes a route whose single handler answers with a fixed
//! status, content type and body.

use axum::http::{Method, StatusCode};
use bytes::Bytes;

use crate::config::schema::StaticRouteConfig;
use crate::routing::context::RoutingContext;
use crate::routing::error::RouterError;
use crate::routing::route::Route;
use crate::routing::router::Router;

/// Install every configured route on `router`, in declaration order.
pub fn install(router: &Router, routes: &[StaticRouteConfig]) -> Result<Vec<Route>, RouterError> {
    routes.iter().map(|config| install_one(router, config)).collect()
}

fn install_one(router: &Router, config: &StaticRouteConfig) -> Result<Route, RouterError> {
    let route = router.route();
    if let Some(path) = &config.path {
        route.path(path)?;
    }
    if let Some(regex) = &config.path_regex {
        route.path_regex(regex)?;
    }
    for method in &config.methods {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| RouterError::InvalidMethod(method.clone()))?;
        route.method(method);
    }
    if let Some(order) = config.order {
        route.order(order)?;
    }
    if let Some(name) = &config.name {
        route.set_name(name.clone());
    }

    let status =
        StatusCode::from_u16(config.status).map_err(|_| RouterError::InvalidStatus(config.status))?;
    let content_type = config.content_type.clone();
    let body = Bytes::from(config.body.clone());

    route.handler(move |ctx| {
        let response = ctx.response();
        response.set_status(status);
        if let Some(content_type) = &content_type {
            response.put_header("content-type", content_type)?;
        }
        if ctx.method() == Method::HEAD {
            response.end()?;
        } else {
            response.end_with(body.clone())?;
        }
        Ok(())
    })?;

    tracing::info!(
        name = ?config.name,
        path = ?config.path.as_ref().or(config.path_regex.as_ref()),
        status = status.as_u16(),
        "Static route installed"
    );
    Ok(route)
}
