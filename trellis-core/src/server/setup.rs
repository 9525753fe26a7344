//! Recorded configuration, replayable for hot reconfiguration.
//!
//! Applications do not mutate a live router. They record every
//! configuration step (routes, sub-router attachments, scoped middleware,
//! the fallback, the virtual-hosting switch) in a [`ServerSetup`].
//! Building replays the list into a fresh [`RoutingHandler`]; redeploying
//! is a rebuild plus an atomic [`HandlerSlot`](super::HandlerSlot) swap,
//! so in-flight requests keep the handler they captured.
//!
//! `ServerSetup` implements `service_async`'s [`MakeService`], which is
//! the same seam the worker pool rebuilds services through.

use std::rc::Rc;

use service_async::MakeService;

use crate::{
    handler::{BoxHandler, Middleware},
    message::Method,
    router::Router,
    routing::RoutingHandler,
    AnyError, AnyResult,
};

#[derive(Clone)]
enum SetupStep {
    Route(Method, String, BoxHandler),
    Attach(String, ServerSetup),
    Use(String, Middleware),
    Fallback(BoxHandler),
    VirtualHosts(bool),
}

/// An ordered record of configuration steps.
///
/// Cloning shares the recorded handlers (they are reference-counted), so a
/// setup can be replayed any number of times.
#[derive(Clone, Default)]
pub struct ServerSetup {
    steps: Vec<SetupStep>,
}

impl ServerSetup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a route registration.
    pub fn route(&mut self, method: Method, pattern: &str, handler: BoxHandler) -> &mut Self {
        self.steps
            .push(SetupStep::Route(method, pattern.to_owned(), handler));
        self
    }

    pub fn get(&mut self, pattern: &str, handler: BoxHandler) -> &mut Self {
        self.route(Method::Get, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: BoxHandler) -> &mut Self {
        self.route(Method::Post, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: BoxHandler) -> &mut Self {
        self.route(Method::Put, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: BoxHandler) -> &mut Self {
        self.route(Method::Delete, pattern, handler)
    }

    /// Records the same handler under several methods.
    pub fn any_of(&mut self, methods: &[Method], pattern: &str, handler: BoxHandler) -> &mut Self {
        for method in methods {
            self.route(*method, pattern, handler.clone());
        }
        self
    }

    pub fn any(&mut self, pattern: &str, handler: BoxHandler) -> &mut Self {
        self.any_of(&Method::ALL, pattern, handler)
    }

    /// Records a sub-router attachment. The sub-setup's routes and scoped
    /// middleware are replayed below `pattern`.
    pub fn attach(&mut self, pattern: &str, sub: ServerSetup) -> &mut Self {
        self.steps.push(SetupStep::Attach(pattern.to_owned(), sub));
        self
    }

    /// Records path-scoped middleware.
    pub fn use_at(&mut self, pattern: &str, middleware: Middleware) -> &mut Self {
        self.steps
            .push(SetupStep::Use(pattern.to_owned(), middleware));
        self
    }

    /// Records the path-miss fallback. The last recorded fallback wins.
    pub fn fallback(&mut self, handler: BoxHandler) -> &mut Self {
        self.steps.push(SetupStep::Fallback(handler));
        self
    }

    /// Records the virtual-hosting switch.
    pub fn virtual_hosts(&mut self, enabled: bool) -> &mut Self {
        self.steps.push(SetupStep::VirtualHosts(enabled));
        self
    }

    fn replay(&self, router: &mut Router<BoxHandler>) -> AnyResult<(Option<BoxHandler>, bool)> {
        let mut fallback = None;
        let mut virtual_hosts = false;
        for step in &self.steps {
            match step {
                SetupStep::Route(method, pattern, handler) => {
                    router.add(*method, pattern, handler.clone())?;
                }
                SetupStep::Attach(pattern, sub) => {
                    let mut sub_router = Router::new();
                    let (sub_fallback, _) = sub.replay(&mut sub_router)?;
                    if sub_fallback.is_some() {
                        anyhow::bail!("a fallback cannot be recorded on an attached sub-setup");
                    }
                    router.attach(pattern, &mut sub_router)?;
                }
                SetupStep::Use(pattern, middleware) => {
                    let middleware = middleware.clone();
                    router.use_at(pattern, middleware)?;
                }
                SetupStep::Fallback(handler) => fallback = Some(handler.clone()),
                SetupStep::VirtualHosts(enabled) => virtual_hosts = *enabled,
            }
        }
        Ok((fallback, virtual_hosts))
    }

    /// Replays the recorded steps into a fresh routing handler.
    pub fn build(&self) -> AnyResult<RoutingHandler> {
        let mut router = Router::new();
        let (fallback, virtual_hosts) = self.replay(&mut router)?;
        let mut handler = RoutingHandler::new(router).with_virtual_hosts(virtual_hosts);
        if let Some(fallback) = fallback {
            handler = handler.with_fallback(fallback);
        }
        Ok(handler)
    }
}

impl MakeService for ServerSetup {
    type Service = BoxHandler;
    type Error = AnyError;

    fn make_via_ref(&self, _old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(Rc::new(self.build()?) as BoxHandler)
    }
}
