//! Dispatch behaviour of a single router.

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use web_router::http::ResponseOutcome;
use web_router::routing::{HttpStatusError, DEFAULT_404, WILDCARD_PARAM};
use web_router::{Request, Response, Router, RoutingContext};

mod common;
use common::{body, dispatch, reply, tag, Log};

#[test]
fn test_routes_run_in_order() {
    let router = Router::new();
    let log = Log::new();

    router.route().order(10).unwrap().handler(tag(&log, "ten")).unwrap();
    router.route().handler(tag(&log, "default-order")).unwrap();
    router.route().order(-5).unwrap().handler(tag(&log, "minus-five")).unwrap();
    router.route().last().unwrap().handler(reply("done")).unwrap();
    router.route().order(10).unwrap().handler(tag(&log, "ten-again")).unwrap();

    let response = dispatch(&router, Request::get("/"));
    assert_eq!(
        log.entries(),
        vec!["minus-five", "default-order", "ten", "ten-again"]
    );
    assert_eq!(body(&response), "done");
}

#[test]
fn test_handler_chain_on_one_route() {
    let router = Router::new();
    let log = Log::new();
    router
        .get("/chain")
        .unwrap()
        .handler(tag(&log, "first"))
        .unwrap()
        .handler(tag(&log, "second"))
        .unwrap()
        .handler(reply("end"))
        .unwrap();

    let response = dispatch(&router, Request::get("/chain"));
    assert_eq!(log.entries(), vec!["first", "second"]);
    assert_eq!(body(&response), "end");
}

#[test]
fn test_disable_and_enable() {
    let router = Router::new();
    let route = router.get("/toggle").unwrap();
    route.handler(reply("on")).unwrap();

    route.disable();
    assert_eq!(dispatch(&router, Request::get("/toggle")).status(), StatusCode::NOT_FOUND);

    route.enable();
    assert_eq!(body(&dispatch(&router, Request::get("/toggle"))), "on");
}

#[test]
fn test_wildcard_and_params() {
    let router = Router::new();
    router
        .get("/files/*")
        .unwrap()
        .handler(|ctx| {
            let rest = ctx.path_param(WILDCARD_PARAM).unwrap_or_else(|| "<none>".into());
            ctx.response().end_with(rest)?;
            Ok(())
        })
        .unwrap();
    router
        .get("/users/:id/posts/:post")
        .unwrap()
        .handler(|ctx| {
            let params = ctx.path_params();
            ctx.response()
                .end_with(format!("{}-{}", params["id"], params["post"]))?;
            Ok(())
        })
        .unwrap();

    assert_eq!(body(&dispatch(&router, Request::get("/files/a/b.txt"))), "a/b.txt");
    assert_eq!(body(&dispatch(&router, Request::get("/files/"))), "");
    assert_eq!(body(&dispatch(&router, Request::get("/files"))), "<none>");
    assert_eq!(body(&dispatch(&router, Request::get("/users/7/posts/x%20y"))), "7-x y");
    assert_eq!(
        dispatch(&router, Request::get("/users/7/posts")).status(),
        StatusCode::NOT_FOUND
    );
}

#[test]
fn test_exact_path_tolerates_trailing_slash() {
    let router = Router::new();
    router.get("/about").unwrap().handler(reply("about")).unwrap();
    assert_eq!(body(&dispatch(&router, Request::get("/about/"))), "about");
    assert_eq!(
        dispatch(&router, Request::get("/about/team")).status(),
        StatusCode::NOT_FOUND
    );
}

#[test]
fn test_raw_regex_groups() {
    let router = Router::new();
    router
        .route_regex(r"/item/(?P<id>\d+)")
        .unwrap()
        .handler(|ctx| {
            let id = ctx.path_param("id").unwrap_or_default();
            let positional = ctx.path_param("param0").unwrap_or_default();
            ctx.response().end_with(format!("{id}/{positional}"))?;
            Ok(())
        })
        .unwrap();
    let named = router.route_regex(r"/(\w+)/(\d+)/x").unwrap();
    named.set_regex_group_names(vec!["kind".into(), "num".into()]);
    named
        .handler(|ctx| {
            let kind = ctx.path_param("kind").unwrap_or_default();
            let num = ctx.path_param("num").unwrap_or_default();
            ctx.response().end_with(format!("{kind}:{num}"))?;
            Ok(())
        })
        .unwrap();

    assert_eq!(body(&dispatch(&router, Request::get("/item/42"))), "42/42");
    assert_eq!(body(&dispatch(&router, Request::get("/shoe/9/x"))), "shoe:9");
    assert_eq!(
        dispatch(&router, Request::get("/item/abc")).status(),
        StatusCode::NOT_FOUND
    );
}

#[test]
fn test_not_found_get_and_head() {
    let router = Router::new();
    router
        .route()
        .handler(|ctx| {
            ctx.fail(StatusCode::NOT_FOUND);
            Ok(())
        })
        .unwrap();

    let response = dispatch(&router, Request::get("/missing"));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body(&response), DEFAULT_404);
    assert_eq!(
        response.header("content-type").as_deref(),
        Some("text/html; charset=utf-8")
    );

    let response = dispatch(&router, Request::new(Method::HEAD, "/missing"));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.body().is_empty());
    assert!(response.ended());
}

#[test]
fn test_rejection_statuses() {
    let router = Router::new();
    router
        .post("/upload")
        .unwrap()
        .consumes("application/json")
        .unwrap()
        .handler(reply("stored"))
        .unwrap();
    router
        .get("/report")
        .unwrap()
        .produces("application/json")
        .unwrap()
        .produces("text/html")
        .unwrap()
        .handler(|ctx| {
            let negotiated = ctx.acceptable_content_type().unwrap_or_default();
            ctx.response().end_with(negotiated)?;
            Ok(())
        })
        .unwrap();

    // Method mismatch
    let response = dispatch(&router, Request::get("/upload"));
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(response.body().is_empty());

    // Content type mismatch and absence
    let request = Request::new(Method::POST, "/upload")
        .with_header("content-type", "text/plain")
        .unwrap();
    assert_eq!(dispatch(&router, request).status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let request = Request::new(Method::POST, "/upload");
    assert_eq!(dispatch(&router, request).status(), StatusCode::BAD_REQUEST);

    let request = Request::new(Method::POST, "/upload")
        .with_header("content-type", "application/json; charset=utf-8")
        .unwrap();
    assert_eq!(body(&dispatch(&router, request)), "stored");

    // Negotiation
    let request = Request::get("/report").with_header("accept", "image/png").unwrap();
    assert_eq!(dispatch(&router, request).status(), StatusCode::NOT_ACCEPTABLE);
    let request = Request::get("/report")
        .with_header("accept", "text/html;q=0.9, application/json;q=0.1")
        .unwrap();
    assert_eq!(body(&dispatch(&router, request)), "text/html");
    assert_eq!(body(&dispatch(&router, Request::get("/report"))), "application/json");
}

#[test]
fn test_empty_body_permitted_with_consumes() {
    let router = Router::new();
    router
        .post("/events")
        .unwrap()
        .consumes("application/json")
        .unwrap()
        .empty_body_permitted_with_consumes(true)
        .handler(reply("accepted"))
        .unwrap();
    assert_eq!(
        body(&dispatch(&router, Request::new(Method::POST, "/events"))),
        "accepted"
    );
}

#[test]
fn test_later_match_clears_rejection() {
    let router = Router::new();
    router.post("/thing").unwrap().handler(reply("post")).unwrap();
    router.route_path("/thing").unwrap().handler(|ctx| {
        ctx.next();
        Ok(())
    }).unwrap();

    // The second route matches, then the chain runs dry: plain 404.
    let response = dispatch(&router, Request::get("/thing"));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_error_handler_by_status() {
    let router = Router::new();
    router.error_handler(StatusCode::NOT_FOUND, |ctx| {
        let response = ctx.response();
        response.set_status(StatusCode::NOT_FOUND);
        response.end_with(format!("no route for {}", ctx.path()))?;
        Ok(())
    });
    router.error_handler(StatusCode::METHOD_NOT_ALLOWED, |ctx| {
        let response = ctx.response();
        response.set_status(StatusCode::METHOD_NOT_ALLOWED);
        response.put_header("allow", "POST")?;
        response.end()?;
        Ok(())
    });
    router.post("/only-post").unwrap().handler(reply("ok")).unwrap();

    let response = dispatch(&router, Request::get("/nothing"));
    assert_eq!(body(&response), "no route for /nothing");

    let response = dispatch(&router, Request::get("/only-post"));
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.header("allow").as_deref(), Some("POST"));
    assert!(response.ended());
}

#[test]
fn test_error_handler_may_end_response_later() {
    let router = Router::new();
    let (done_tx, done_rx) = mpsc::channel();
    for (status, page) in [
        (StatusCode::NOT_FOUND, "custom 404 page"),
        (StatusCode::INTERNAL_SERVER_ERROR, "oops page"),
    ] {
        let done = done_tx.clone();
        router.error_handler(status, move |ctx| {
            let done = done.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let response = ctx.response();
                response.set_status(status);
                done.send(response.end_with(page)).unwrap();
            });
            Ok(())
        });
    }
    router
        .get("/broken")
        .unwrap()
        .handler(|ctx| {
            ctx.fail(StatusCode::INTERNAL_SERVER_ERROR);
            Ok(())
        })
        .unwrap();

    let response = dispatch(&router, Request::get("/missing"));
    assert!(!response.ended());
    done_rx.recv().unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body(&response), "custom 404 page");

    let response = dispatch(&router, Request::get("/broken"));
    assert!(!response.ended());
    done_rx.recv().unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&response), "oops page");
}

#[test]
fn test_failing_error_handler_falls_back_to_default() {
    let router = Router::new();
    router.error_handler(StatusCode::NOT_FOUND, |_| Err("error page unavailable".into()));

    let response = dispatch(&router, Request::get("/missing"));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body(&response), DEFAULT_404);
}

#[test]
fn test_handler_error_reaches_failure_handler() {
    let router = Router::new();
    let log = Log::new();
    router
        .get("/secret")
        .unwrap()
        .handler(|_| Err(HttpStatusError::new(StatusCode::FORBIDDEN, "denied").into()))
        .unwrap();

    let seen = log.clone();
    router
        .route()
        .failure_handler(move |ctx| {
            seen.push(format!(
                "{}:{}",
                ctx.status_code().map(|s| s.as_u16()).unwrap_or(0),
                ctx.failure().map(|f| f.to_string()).unwrap_or_default()
            ));
            let response = ctx.response();
            response.set_status(ctx.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
            response.end_with("handled")?;
            Ok(())
        })
        .unwrap();

    let response = dispatch(&router, Request::get("/secret"));
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body(&response), "handled");
    assert_eq!(log.entries(), vec!["403:403 Forbidden: denied"]);
}

#[test]
fn test_unhandled_failures() {
    let router = Router::new();
    router
        .get("/boom")
        .unwrap()
        .handler(|_| Err("plain error".into()))
        .unwrap();
    router
        .get("/teapot")
        .unwrap()
        .handler(|ctx| {
            ctx.fail_with(
                StatusCode::IM_A_TEAPOT,
                Arc::new(HttpStatusError::new(StatusCode::BAD_REQUEST, "ignored status")),
            );
            Ok(())
        })
        .unwrap();

    let response = dispatch(&router, Request::get("/boom"));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.body().is_empty());

    let response = dispatch(&router, Request::get("/teapot"));
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
}

#[test]
fn test_failing_failure_handler_is_rendered() {
    let router = Router::new();
    let log = Log::new();
    router
        .route()
        .handler(|ctx| {
            ctx.fail(StatusCode::BAD_GATEWAY);
            Ok(())
        })
        .unwrap();
    router
        .route()
        .failure_handler(|_| Err("failure handler broke".into()))
        .unwrap();
    router
        .route()
        .failure_handler(tag(&log, "never"))
        .unwrap();

    let response = dispatch(&router, Request::get("/"));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(log.entries().is_empty());
}

#[test]
fn test_virtual_host() {
    let router = Router::new();
    router
        .route()
        .virtual_host("*.example.com")
        .unwrap()
        .handler(reply("tenant"))
        .unwrap();

    let request = Request::get("/").with_header("host", "API.example.com:8080").unwrap();
    assert_eq!(body(&dispatch(&router, request)), "tenant");

    let request = Request::get("/").with_header("host", "example.org").unwrap();
    assert_eq!(dispatch(&router, request).status(), StatusCode::NOT_FOUND);
    assert_eq!(dispatch(&router, Request::get("/")).status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_request_path_validation() {
    let router = Router::new();
    router.route().handler(reply("any")).unwrap();

    let response = dispatch(&router, Request::get(""));
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.body().is_empty());

    let response = dispatch(&router, Request::new(Method::OPTIONS, "*"));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_normalized_path_matching() {
    let router = Router::new();
    router.get("/a/c").unwrap().handler(reply("normalized")).unwrap();
    let raw = router.get("/x/y").unwrap();
    raw.use_normalized_path(false);
    raw.handler(reply("raw")).unwrap();

    assert_eq!(body(&dispatch(&router, Request::get("/a/b/../c"))), "normalized");
    assert_eq!(body(&dispatch(&router, Request::get("/%61/c"))), "normalized");
    assert_eq!(
        dispatch(&router, Request::get("/x/z/../y")).status(),
        StatusCode::NOT_FOUND
    );
}

#[test]
fn test_reroute() {
    let router = Router::new();
    router
        .get("/old")
        .unwrap()
        .handler(|ctx| {
            ctx.response().put_header("x-stale", "1")?;
            ctx.reroute("/new?from=old")?;
            Ok(())
        })
        .unwrap();
    router
        .route_path("/new")
        .unwrap()
        .handler(|ctx| {
            let from = ctx.query_param("from")?.join(",");
            ctx.response()
                .end_with(format!("{} {} from={from}", ctx.method(), ctx.path()))?;
            Ok(())
        })
        .unwrap();
    router
        .route_path("/moved")
        .unwrap()
        .method(Method::POST)
        .handler(reply("posted"))
        .unwrap();
    router
        .get("/redirect-post")
        .unwrap()
        .handler(|ctx| {
            ctx.reroute_method(Method::POST, "/moved")?;
            Ok(())
        })
        .unwrap();

    let response = dispatch(&router, Request::get("/old"));
    assert_eq!(body(&response), "GET /new from=old");
    assert!(response.header("x-stale").is_none());

    assert_eq!(body(&dispatch(&router, Request::get("/redirect-post"))), "posted");
}

#[test]
fn test_context_data_flows_between_handlers() {
    let router = Router::new();
    router
        .route()
        .handler(|ctx| {
            ctx.insert("user-id", 42_u64);
            ctx.next();
            Ok(())
        })
        .unwrap();
    router
        .route()
        .handler(|ctx| {
            let id = ctx.get::<u64>("user-id").map(|v| *v).unwrap_or_default();
            ctx.response().end_with(id.to_string())?;
            Ok(())
        })
        .unwrap();

    assert_eq!(body(&dispatch(&router, Request::get("/"))), "42");
}

#[test]
fn test_lifecycle_hooks_through_context() {
    let router = Router::new();
    let log = Log::new();
    let hooks = log.clone();
    router
        .route()
        .handler(move |ctx| {
            let response = ctx.response();
            let on_headers = hooks.clone();
            ctx.add_headers_end_handler(Box::new(move || {
                let _ = response.put_header("x-timing", "1");
                on_headers.push("headers");
            }))?;
            let on_body = hooks.clone();
            ctx.add_body_end_handler(Box::new(move || on_body.push("body")))?;
            let on_end = hooks.clone();
            ctx.add_end_handler(Box::new(move |result| {
                on_end.push(if result.is_ok() { "end-ok" } else { "end-err" });
            }))?;
            let removed = ctx.add_body_end_handler(Box::new(|| panic!("removed handler ran")))?;
            assert!(ctx.remove_body_end_handler(removed));
            ctx.next();
            Ok(())
        })
        .unwrap();
    router.route().handler(reply("payload")).unwrap();

    let response = dispatch(&router, Request::get("/"));
    assert_eq!(log.entries(), vec!["headers", "body", "end-ok"]);
    assert_eq!(response.header("x-timing").as_deref(), Some("1"));
}

#[test]
fn test_current_route_and_mount_point() {
    let router = Router::new();
    let route = router.get("/where").unwrap();
    route.set_name("where-am-i");
    route
        .handler(|ctx| {
            let name = ctx.current_route().and_then(|r| r.name()).unwrap_or_default();
            let mount = ctx.mount_point().unwrap_or("<root>").to_string();
            ctx.response().end_with(format!("{name}@{mount}"))?;
            Ok(())
        })
        .unwrap();

    assert_eq!(body(&dispatch(&router, Request::get("/where"))), "where-am-i@<root>");
}

#[tokio::test]
async fn test_async_handler_continues_later() {
    let router = Router::new();
    router
        .route()
        .handler(|ctx| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ctx.insert("loaded", "from-task".to_string());
                ctx.next();
            });
            Ok(())
        })
        .unwrap();
    router
        .route()
        .handler(|ctx| {
            let loaded = ctx.get::<String>("loaded").map(|s| s.to_string()).unwrap_or_default();
            ctx.response().end_with(loaded)?;
            Ok(())
        })
        .unwrap();

    let (response, completion) = Response::channel();
    router.dispatch(Request::get("/"), response);
    match completion.await.unwrap() {
        ResponseOutcome::Completed(res) => assert_eq!(res.body().as_ref(), b"from-task"),
        ResponseOutcome::Closed => panic!("expected completion"),
    }
}
