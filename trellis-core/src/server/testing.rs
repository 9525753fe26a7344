//! In-memory fakes for the adapter boundary.
//!
//! Wire parsing lives outside the core, so core tests run against
//! [`MockAdapter`]: prebuilt requests go in, terminal outcomes are
//! recorded for inspection.

use std::{cell::RefCell, collections::VecDeque, io, rc::Rc};

use crate::{
    context::{duplex_pair, websocket_pair, ConnectFn, Duplex, HijackFn, NewContext, WsTransport},
    message::{Request, Response},
};

use super::Adapter;

/// What became of one request.
pub enum Outcome {
    Responded(Response),
    /// The request hijacked its socket; this is the adapter-side pipe end.
    Hijacked(Duplex),
    /// The request upgraded; this is the adapter-side frame transport.
    Connected(WsTransport),
}

/// A queue-backed adapter for tests.
#[derive(Default)]
pub struct MockAdapter {
    queue: VecDeque<Request>,
    outcomes: Rc<RefCell<Vec<Outcome>>>,
    closed: bool,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a request for delivery.
    pub fn push(&mut self, request: Request) {
        self.queue.push_back(request);
    }

    /// The shared outcome log; clone it out before handing the adapter to
    /// a serve loop.
    pub fn outcomes(&self) -> Rc<RefCell<Vec<Outcome>>> {
        self.outcomes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Adapter for MockAdapter {
    type Ticket = ();

    async fn next_request(&mut self) -> Option<io::Result<(NewContext, Self::Ticket)>> {
        let request = self.queue.pop_front()?;
        Some(Ok((NewContext::new(request), ())))
    }

    async fn respond(&mut self, _ticket: (), response: Response) -> io::Result<()> {
        self.outcomes.borrow_mut().push(Outcome::Responded(response));
        Ok(())
    }

    async fn hijack(&mut self, _ticket: (), callback: HijackFn) -> io::Result<()> {
        let (handler_end, adapter_end) = duplex_pair();
        monoio::spawn(callback(handler_end));
        self.outcomes.borrow_mut().push(Outcome::Hijacked(adapter_end));
        Ok(())
    }

    async fn connect(&mut self, _ticket: (), callback: ConnectFn) -> io::Result<()> {
        let (socket, transport) = websocket_pair(None);
        monoio::spawn(callback(socket));
        self.outcomes.borrow_mut().push(Outcome::Connected(transport));
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::WsMessage,
        handler::handler_fn,
        message::Body,
        server::{serve, HandlerSlot},
    };
    use bytes::Bytes;

    #[monoio::test]
    async fn hijack_outcome_exposes_the_peer_pipe() {
        let mut adapter = MockAdapter::new();
        adapter.push(Request::get("http://example.com/raw").unwrap());
        let outcomes = adapter.outcomes();

        let handler = handler_fn(|ctx: NewContext| async move {
            Ok(ctx
                .hijack(|mut duplex: Duplex| async move {
                    while let Some(chunk) = duplex.recv().await {
                        if duplex.send(chunk).is_err() {
                            break;
                        }
                    }
                })
                .into())
        });

        let (stop, _hold) = futures_channel::oneshot::channel();
        serve(adapter, HandlerSlot::new(handler), stop).await;

        let mut outcomes = outcomes.borrow_mut();
        match outcomes.pop().unwrap() {
            Outcome::Hijacked(mut peer) => {
                peer.send(Bytes::from_static(b"echo?")).unwrap();
                assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"echo?"));
            }
            _ => panic!("expected a hijack"),
        }
    }

    #[monoio::test]
    async fn connect_outcome_exposes_the_transport() {
        let mut adapter = MockAdapter::new();
        adapter.push(Request::get("http://example.com/ws").unwrap());
        let outcomes = adapter.outcomes();

        let handler = handler_fn(|ctx: NewContext| async move {
            Ok(ctx
                .connect(|mut socket| async move {
                    while let Some(WsMessage::Text(t)) = socket.next().await {
                        if socket.send_text(t.to_uppercase()).is_err() {
                            break;
                        }
                    }
                })
                .into())
        });

        let (stop, _hold) = futures_channel::oneshot::channel();
        serve(adapter, HandlerSlot::new(handler), stop).await;

        let mut outcomes = outcomes.borrow_mut();
        match outcomes.pop().unwrap() {
            Outcome::Connected(mut transport) => {
                transport.incoming.send(WsMessage::Text("hi".into())).unwrap();
                assert_eq!(
                    transport.outgoing.recv().await,
                    Some(WsMessage::Text("HI".into()))
                );
            }
            _ => panic!("expected an upgrade"),
        }
    }
}
