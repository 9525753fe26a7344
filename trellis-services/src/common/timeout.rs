//! Timeout middleware.
//!
//! The core exposes no built-in deadline; this middleware races the inner
//! handler against a timer and synthesizes a 503 on expiry. The abandoned
//! inner future is dropped, which cancels it at its next suspension point.

use std::time::Duration;

use http::StatusCode;
use trellis_core::{
    context::{NewContext, ResponseContext},
    handler::{handler_fn, middleware_fn, BoxHandler, Handler, Middleware},
    message::{Body, Headers, Response},
};

/// Wraps handlers with a per-request deadline.
pub fn timeout(duration: Duration) -> Middleware {
    middleware_fn(move |inner: BoxHandler| {
        handler_fn(move |ctx: NewContext| {
            let inner = inner.clone();
            async move {
                let token = ctx.token().clone();
                match monoio::time::timeout(duration, inner.call(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("handler timed out after {duration:?}");
                        let response = Response::new(
                            StatusCode::SERVICE_UNAVAILABLE,
                            Headers::new(),
                            Body::from_text("Service Unavailable"),
                        );
                        Ok(ResponseContext::synthesize(&token, response).into())
                    }
                }
            }
        })
    })
}
