//! Routing as a handler.
//!
//! [`RoutingHandler`] turns a [`Router`] of handlers into a handler: a
//! match dispatches to the routed handler with the extracted parameters
//! installed as a request property and the request narrowed to the
//! remaining scope; a method miss short-circuits with a 405 carrying
//! `Allow`; a path miss goes to the fallback (404 by default, or the next
//! handler in the pipeline when used as [`route_with`] middleware).
//!
//! Path-scoped middleware installs through [`Router::use_at`]: the trie
//! composes the installed wrappers along the matched prefix, so middleware
//! at `/api` wraps every handler below `/api`, middleware at `/` wraps
//! all, and nesting order follows trie depth rather than insertion order
//! across scopes. Scoped middleware only ever runs for requests that
//! match a route.

use std::{collections::HashMap, rc::Rc, sync::OnceLock};

use crate::{
    context::{NewContext, Property},
    handler::{middleware_fn, BoxHandler, Handler, HandlerFuture, Middleware},
    message::Response,
    path::NormalizedPath,
    router::{RouteResult, Router, RouterError},
};

/// Path parameters extracted by the router for the current request.
#[derive(Clone, Debug, Default)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The property the extracted parameters are anchored to.
pub fn path_params() -> &'static Property<PathParams> {
    static PROP: OnceLock<Property<PathParams>> = OnceLock::new();
    PROP.get_or_init(|| Property::new("path-params"))
}

impl Router<BoxHandler> {
    /// Installs middleware scoped to `pattern`. Every populated method
    /// slot matched at or below that node is wrapped; requests that miss
    /// the router never run it. Middleware installed at the same scope
    /// composes in insertion order (first installed is outermost).
    pub fn use_at(&mut self, pattern: &str, middleware: Middleware) -> Result<(), RouterError> {
        self.map_at(pattern, move |handler| middleware(handler))
    }
}

/// A [`Router`] of handlers, usable as a handler itself.
pub struct RoutingHandler {
    router: Router<BoxHandler>,
    fallback: Option<BoxHandler>,
    virtual_hosts: bool,
}

impl RoutingHandler {
    pub fn new(router: Router<BoxHandler>) -> Self {
        Self {
            router,
            fallback: None,
            virtual_hosts: false,
        }
    }

    /// The handler consulted on a path miss. Defaults to a plain 404.
    pub fn with_fallback(mut self, fallback: BoxHandler) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Treats the lowercased, port-stripped `Host` header as a leading
    /// path segment of the lookup key. Host-independent routes are
    /// attached at `*` instead of a specific host.
    pub fn with_virtual_hosts(mut self, enabled: bool) -> Self {
        self.virtual_hosts = enabled;
        self
    }

    fn lookup_key(&self, ctx: &NewContext) -> NormalizedPath {
        let path = ctx.request().url().path().clone();
        if !self.virtual_hosts {
            return path;
        }
        let host = ctx
            .request()
            .headers()
            .host()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "*".to_owned());
        let mut segments = Vec::with_capacity(path.len() + 1);
        segments.push(host);
        segments.extend(path.segments().iter().cloned());
        NormalizedPath::from_segments(segments)
    }
}

impl Handler for RoutingHandler {
    fn call(&self, ctx: NewContext) -> HandlerFuture {
        let key = self.lookup_key(&ctx);
        match self.router.lookup(ctx.request().method(), &key) {
            RouteResult::Match {
                value: handler,
                params,
                remaining,
                matched,
            } => {
                tracing::debug!(
                    "routed {} {} (remaining {})",
                    ctx.request().method(),
                    matched,
                    remaining
                );
                path_params().set(ctx.token(), PathParams(params));
                let ctx = ctx.map_request(|req| {
                    let url = req.url().with_path(remaining);
                    req.with_url(url)
                });
                handler.call(ctx)
            }
            RouteResult::MethodMiss { allowed } => {
                tracing::debug!("method miss for {}: allow {}", key, allowed);
                Box::pin(async move {
                    Ok(ctx.respond(Response::method_not_allowed(allowed)).into())
                })
            }
            RouteResult::PathMiss { path } => match &self.fallback {
                Some(fallback) => fallback.call(ctx),
                None => {
                    tracing::debug!("no route for {}", path);
                    Box::pin(async move { Ok(ctx.respond(Response::not_found()).into()) })
                }
            },
        }
    }
}

/// Routing as middleware: a path miss falls through to the next handler
/// in the pipeline; matches and method misses are decided here.
pub fn route_with(router: Router<BoxHandler>) -> Middleware {
    middleware_fn(move |next: BoxHandler| {
        Rc::new(RoutingHandler::new(router.clone()).with_fallback(next)) as BoxHandler
    })
}
