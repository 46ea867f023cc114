//! Context used while a mounted sub router runs.
//!
//! # Responsibilities
//! - Iterate the sub router's routes against the mount-relative path
//! - Hand control back to the enclosing context when the sub router has no
//!   more handlers, carrying its rejection status along
//!
//! # Design Decisions
//! - Request state is shared with the enclosing context; only the walk and
//!   the mount point are local
//! - Failures and reroutes always restart at the root context

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use axum::http::{Method, StatusCode};

use crate::routing::context::{ContextHandle, RequestScope, RoutingContext};
use crate::routing::error::Failure;
use crate::routing::iteration::{self, Frame, Walk};
use crate::routing::router::Router;

pub struct MountContext {
    me: Weak<MountContext>,
    parent: ContextHandle,
    mount_point: String,
    walk: Mutex<Walk>,
}

impl MountContext {
    /// Enter `router` below the route currently executing in `parent`.
    pub(crate) fn enter(router: Router, parent: ContextHandle) -> Arc<Self> {
        let mount_point = combine_mount_point(parent.mount_point(), &parent.mount_segment());
        tracing::trace!(mount_point = %mount_point, "Entering sub router");
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            parent,
            mount_point,
            walk: Mutex::new(Walk::new(router)),
        })
    }
}

/// Join the enclosing mount point with the segment matched by the mount
/// route.
pub(crate) fn combine_mount_point(parent: Option<&str>, segment: &str) -> String {
    match parent {
        None => segment.to_string(),
        Some(parent) if segment == "/" => parent.to_string(),
        Some("/") => segment.to_string(),
        Some(parent) => format!("{parent}{segment}"),
    }
}

impl fmt::Debug for MountContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountContext")
            .field("mount_point", &self.mount_point)
            .field("path", &self.path())
            .finish()
    }
}

impl Frame for MountContext {
    fn scope(&self) -> &RequestScope {
        self.parent.scope()
    }

    fn walk(&self) -> &Mutex<Walk> {
        &self.walk
    }

    fn handle(&self) -> Option<ContextHandle> {
        self.me.upgrade().map(|ctx| ctx as ContextHandle)
    }

    fn record_failure(&self, status: StatusCode, cause: Option<Failure>) {
        self.parent.record_failure(status, cause);
    }

    fn restart_as(&self, method: Method, target: &str) {
        self.parent.restart_as(method, target);
    }
}

impl RoutingContext for MountContext {
    fn next(&self) {
        if !iteration::iterate_next(self) {
            self.parent.set_match_failure(self.match_failure());
            self.parent.next();
        }
    }

    fn mount_point(&self) -> Option<&str> {
        Some(&self.mount_point)
    }
}
