//! Handlers, middleware and pipelines.
//!
//! A [`Handler`] takes an undecided request context and drives it to a
//! terminal one. Middleware is just a function from handler to handler;
//! a [`Pipeline`] is an immutable list of middleware that produces the
//! final handler when given the innermost one. Handlers run on their
//! worker's local runtime and are deliberately not `Send`.

use std::rc::Rc;

use futures_util::future::LocalBoxFuture;

use crate::{
    context::{HandledContext, NewContext},
    message::{Request, Response},
    AnyResult,
};

/// The boxed future a handler returns.
pub type HandlerFuture = LocalBoxFuture<'static, AnyResult<HandledContext>>;

/// Drives one request from undecided to terminal.
///
/// Errors escaping a handler never reach the wire as-is; the serve loop
/// turns them into a generic 500.
pub trait Handler: 'static {
    fn call(&self, ctx: NewContext) -> HandlerFuture;
}

/// The shared handler type everything composes over.
pub type BoxHandler = Rc<dyn Handler>;

/// A function from handler to handler.
pub type Middleware = Rc<dyn Fn(BoxHandler) -> BoxHandler>;

struct FnHandler<F>(F);

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(NewContext) -> Fut + 'static,
    Fut: std::future::Future<Output = AnyResult<HandledContext>> + 'static,
{
    fn call(&self, ctx: NewContext) -> HandlerFuture {
        Box::pin((self.0)(ctx))
    }
}

/// Wraps an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> BoxHandler
where
    F: Fn(NewContext) -> Fut + 'static,
    Fut: std::future::Future<Output = AnyResult<HandledContext>> + 'static,
{
    Rc::new(FnHandler(f))
}

/// Adapts a responder, a plain `Request -> Response` function, to a
/// handler that always decides with a response.
pub fn responder_fn<F, Fut>(f: F) -> BoxHandler
where
    F: Fn(Request) -> Fut + 'static,
    Fut: std::future::Future<Output = AnyResult<Response>> + 'static,
{
    let f = Rc::new(f);
    handler_fn(move |ctx: NewContext| {
        let f = f.clone();
        async move {
            let (request, token) = ctx.into_parts();
            let response = f(request).await?;
            Ok(crate::context::ResponseContext::synthesize(&token, response).into())
        }
    })
}

/// Wraps a plain closure as middleware.
pub fn middleware_fn(f: impl Fn(BoxHandler) -> BoxHandler + 'static) -> Middleware {
    Rc::new(f)
}

/// An immutable middleware composition.
///
/// The first middleware added is the outermost: on the way in it runs
/// first, on the way out it runs last.
#[derive(Clone, Default)]
pub struct Pipeline {
    layers: Vec<Middleware>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new pipeline with `middleware` appended on the inside.
    pub fn with(&self, middleware: Middleware) -> Self {
        let mut layers = self.layers.clone();
        layers.push(middleware);
        Self { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Produces the final handler around `inner`.
    pub fn handler(&self, inner: BoxHandler) -> BoxHandler {
        self.layers
            .iter()
            .rev()
            .fold(inner, |handler, middleware| middleware(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Body, Request, Response};
    use std::cell::RefCell;

    fn request() -> Request {
        Request::get("http://example.com/x").unwrap()
    }

    fn tagging_middleware(log: Rc<RefCell<Vec<&'static str>>>, tag: &'static str) -> Middleware {
        middleware_fn(move |inner: BoxHandler| {
            let log = log.clone();
            handler_fn(move |ctx| {
                let log = log.clone();
                let inner = inner.clone();
                async move {
                    log.borrow_mut().push(tag);
                    let out = inner.call(ctx).await;
                    log.borrow_mut().push(tag);
                    out
                }
            })
        })
    }

    #[monoio::test]
    async fn pipeline_runs_outer_in_outer_out() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with(tagging_middleware(log.clone(), "outer"))
            .with(tagging_middleware(log.clone(), "inner"));

        let leaf = {
            let log = log.clone();
            handler_fn(move |ctx: NewContext| {
                let log = log.clone();
                async move {
                    log.borrow_mut().push("leaf");
                    Ok(ctx.respond(Response::ok(Body::empty())).into())
                }
            })
        };

        let handler = pipeline.handler(leaf);
        handler.call(NewContext::new(request())).await.unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["outer", "inner", "leaf", "inner", "outer"]
        );
    }

    #[monoio::test]
    async fn responder_adapts_to_handler() {
        let handler = responder_fn(|req: Request| async move {
            Ok(Response::ok(Body::from_text(req.url().to_string())))
        });
        let ctx = NewContext::new(request());
        let token = ctx.token().clone();
        match handler.call(ctx).await.unwrap() {
            HandledContext::Response(rc) => {
                assert_eq!(*rc.token(), token);
                let body = rc.into_response().into_body().read(None).await.unwrap();
                assert_eq!(&body[..], b"/x");
            }
            _ => panic!("expected a response"),
        }
    }

    #[monoio::test]
    async fn middleware_can_transform_the_response() {
        let rewrite = middleware_fn(|inner: BoxHandler| {
            handler_fn(move |ctx| {
                let inner = inner.clone();
                async move {
                    let handled = inner.call(ctx).await?;
                    Ok(handled
                        .map_response(|r| r.with_status(http::StatusCode::ACCEPTED)))
                }
            })
        });
        let handler = Pipeline::new().with(rewrite).handler(handler_fn(|ctx: NewContext| async move {
            Ok(ctx.respond(Response::ok(Body::empty())).into())
        }));
        match handler.call(NewContext::new(request())).await.unwrap() {
            HandledContext::Response(rc) => {
                assert_eq!(rc.response().status(), http::StatusCode::ACCEPTED)
            }
            _ => panic!("expected a response"),
        }
    }
}
