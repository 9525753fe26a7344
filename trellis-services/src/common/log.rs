//! Request logging middleware.
//!
//! Emits one `tracing` event per decided request with the method, path,
//! outcome and elapsed time. Hijacks and upgrades are logged at the moment
//! of the decision; their callbacks run long after the middleware has
//! returned.

use std::time::Instant;

use trellis_core::{
    context::HandledContext,
    handler::{handler_fn, middleware_fn, BoxHandler, Handler, Middleware},
};

/// Logs every request passing through the chain.
pub fn log_requests() -> Middleware {
    middleware_fn(|inner: BoxHandler| {
        handler_fn(move |ctx| {
            let inner = inner.clone();
            let method = ctx.request().method();
            let path = ctx.request().url().path().to_string();
            async move {
                let started = Instant::now();
                let result = inner.call(ctx).await;
                let elapsed = started.elapsed();
                match &result {
                    Ok(HandledContext::Response(rc)) => {
                        tracing::info!(
                            "{method} {path} -> {} in {elapsed:?}",
                            rc.response().status()
                        );
                    }
                    Ok(HandledContext::Hijack(_)) => {
                        tracing::info!("{method} {path} -> hijacked in {elapsed:?}");
                    }
                    Ok(HandledContext::Connect(_)) => {
                        tracing::info!("{method} {path} -> upgraded in {elapsed:?}");
                    }
                    Err(e) => {
                        tracing::error!("{method} {path} failed in {elapsed:?}: {e:?}");
                    }
                }
                result
            }
        })
    })
}
