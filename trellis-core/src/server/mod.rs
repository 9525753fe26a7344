//! The adapter contract and the serve loop.
//!
//! The core never parses wire HTTP. An [`Adapter`] collaborator yields
//! ready-made request contexts plus an opaque ticket, and knows how to
//! carry out each terminal outcome: serialize a response, pump a hijacked
//! socket, or complete a websocket handshake. [`serve`] binds one handler
//! to one adapter, forwards every context into it and dispatches on the
//! terminal state; handler failures become a generic 500 that leaks
//! nothing.
//!
//! Requests from one adapter are handled in order, which preserves the
//! keep-alive ordering contract; concurrency across connections comes from
//! spawning one serve loop per accepted adapter.

mod setup;
pub mod testing;
mod worker;

use std::{cell::RefCell, io, rc::Rc};

use futures_channel::oneshot::Sender as OSender;
use tracing::{error, info, warn};

pub use setup::ServerSetup;
pub use worker::{AdapterSource, ResultGroup, RuntimeWrapper, SetupFn, WorkerCommand, WorkerPool};

use crate::{
    context::{ConnectFn, HandledContext, HijackFn, NewContext},
    handler::{BoxHandler, Handler},
    message::Response,
};

/// The I/O collaborator the core runs against.
///
/// `Ticket` is whatever the adapter needs to find the connection state
/// belonging to a request when its outcome comes back.
pub trait Adapter {
    type Ticket;

    /// The next request, converted to a fresh context. `None` when the
    /// connection (or request source) is exhausted.
    #[allow(async_fn_in_trait)]
    async fn next_request(&mut self) -> Option<io::Result<(NewContext, Self::Ticket)>>;

    /// Serializes a response for the request behind `ticket`.
    #[allow(async_fn_in_trait)]
    async fn respond(&mut self, ticket: Self::Ticket, response: Response) -> io::Result<()>;

    /// Hands the raw connection to `callback`.
    #[allow(async_fn_in_trait)]
    async fn hijack(&mut self, ticket: Self::Ticket, callback: HijackFn) -> io::Result<()>;

    /// Completes the websocket handshake and hands the channel to
    /// `callback`.
    #[allow(async_fn_in_trait)]
    async fn connect(&mut self, ticket: Self::Ticket, callback: ConnectFn) -> io::Result<()>;

    /// Graceful close: flush and release the underlying transport.
    #[allow(async_fn_in_trait)]
    async fn close(&mut self);
}

/// The swap point hot reconfiguration goes through.
///
/// In-flight requests keep the handler they captured; only new requests
/// see a swapped-in handler.
#[derive(Clone)]
pub struct HandlerSlot(Rc<RefCell<BoxHandler>>);

impl HandlerSlot {
    pub fn new(handler: BoxHandler) -> Self {
        Self(Rc::new(RefCell::new(handler)))
    }

    pub fn get(&self) -> BoxHandler {
        self.0.borrow().clone()
    }

    pub fn swap(&self, handler: BoxHandler) {
        *self.0.borrow_mut() = handler;
    }
}

/// Serves one adapter with the handler currently in `slot` until the
/// adapter is exhausted or `stop` is cancelled.
pub async fn serve<A: Adapter>(mut adapter: A, slot: HandlerSlot, mut stop: OSender<()>) {
    let mut cancellation = stop.cancellation();
    loop {
        monoio::select! {
            _ = &mut cancellation => {
                info!("server is notified to stop");
                break;
            }
            next = adapter.next_request() => {
                let (ctx, ticket) = match next {
                    Some(Ok(pair)) => pair,
                    Some(Err(e)) => {
                        warn!("accepting request failed: {e:?}");
                        continue;
                    }
                    None => {
                        info!("adapter exhausted, serve stopped");
                        break;
                    }
                };
                let handler = slot.get();
                dispatch(&mut adapter, handler, ctx, ticket).await;
            }
        }
    }
    adapter.close().await;
}

async fn dispatch<A: Adapter>(
    adapter: &mut A,
    handler: BoxHandler,
    ctx: NewContext,
    ticket: A::Ticket,
) {
    match handler.call(ctx).await {
        Ok(HandledContext::Response(rc)) => {
            if let Err(e) = adapter.respond(ticket, rc.into_response()).await {
                warn!("writing response failed: {e:?}");
            }
        }
        Ok(HandledContext::Hijack(hc)) => {
            if let Err(e) = adapter.hijack(ticket, hc.into_callback()).await {
                warn!("socket takeover failed: {e:?}");
            }
        }
        Ok(HandledContext::Connect(cc)) => {
            if let Err(e) = adapter.connect(ticket, cc.into_callback()).await {
                warn!("websocket upgrade failed: {e:?}");
            }
        }
        Err(e) => {
            error!("handler failed: {e:?}");
            if let Err(e) = adapter.respond(ticket, Response::internal_server_error()).await {
                warn!("writing error response failed: {e:?}");
            }
        }
    }
}
