//! Default response headers.
//!
//! Applies a fixed set of headers to every response coming back through
//! the chain, without displacing headers a handler set itself. Typical
//! uses: `Server`, `X-Frame-Options`, or a site-wide `Cache-Control`.

use trellis_core::{
    handler::{handler_fn, middleware_fn, BoxHandler, Handler, Middleware},
    message::Headers,
};

/// Adds `headers` to every response that does not already carry them.
pub fn default_headers(headers: Headers) -> Middleware {
    middleware_fn(move |inner: BoxHandler| {
        let defaults = headers.clone();
        handler_fn(move |ctx| {
            let inner = inner.clone();
            let defaults = defaults.clone();
            async move {
                let handled = inner.call(ctx).await?;
                Ok(handled.map_response(|response| {
                    let mut builder = response.headers().to_builder();
                    for (name, value) in defaults.iter() {
                        if !response.headers().contains(name) {
                            builder = match builder.insert(name, value) {
                                Ok(builder) => builder,
                                Err(_) => return response,
                            };
                        }
                    }
                    let headers = builder.seal();
                    response.with_headers(headers)
                }))
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{
        context::{HandledContext, NewContext},
        handler::Pipeline,
        message::{Body, Request, Response},
    };

    fn ctx() -> NewContext {
        NewContext::new(Request::get("http://example.com/x").unwrap())
    }

    #[monoio::test]
    async fn fills_in_missing_headers_only() {
        let defaults = Headers::builder()
            .insert("X-Server", "trellis")
            .unwrap()
            .insert("X-Frame-Options", "DENY")
            .unwrap()
            .seal();
        let handler = Pipeline::new()
            .with(default_headers(defaults))
            .handler(handler_fn(|ctx: NewContext| async move {
                let response = Response::ok(Body::empty())
                    .with_header("X-Frame-Options", "SAMEORIGIN")
                    .unwrap();
                Ok(ctx.respond(response).into())
            }));

        match handler.call(ctx()).await.unwrap() {
            HandledContext::Response(rc) => {
                let response = rc.into_response();
                assert_eq!(response.headers().get("x-server"), Some("trellis"));
                // The handler's own value wins.
                assert_eq!(
                    response.headers().get("x-frame-options"),
                    Some("SAMEORIGIN")
                );
            }
            _ => panic!("expected a response"),
        }
    }
}
