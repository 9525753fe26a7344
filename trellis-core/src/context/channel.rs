//! Channel payloads for hijacked sockets and websocket upgrades.
//!
//! The core never touches the wire. A hijack callback gets a [`Duplex`]:
//! two byte channels the adapter pumps from and into the socket. A connect
//! callback gets a [`WebSocket`]: typed text/binary messages with a close
//! handshake, while the frame codec stays on the adapter side of the
//! [`WsTransport`].

use bytes::Bytes;
use local_sync::mpsc::unbounded::{channel, Rx, Tx};

use std::time::Duration;

/// WebSocket-side errors surfaced to handlers.
#[derive(thiserror::Error, Debug)]
pub enum WsError {
    #[error("{0} is not a valid close code")]
    InvalidCloseCode(u16),
    #[error("the peer is gone")]
    Closed,
}

/// A validated close code.
///
/// Codes 1000–1011 (minus the reserved 1004–1006) and the registered
/// 3000–4999 range are accepted; everything else is rejected eagerly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseCode(u16);

impl CloseCode {
    pub const NORMAL: CloseCode = CloseCode(1000);
    pub const GOING_AWAY: CloseCode = CloseCode(1001);

    pub fn new(code: u16) -> Result<Self, WsError> {
        match code {
            1000..=1003 | 1007..=1011 | 3000..=4999 => Ok(Self(code)),
            other => Err(WsError::InvalidCloseCode(other)),
        }
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

/// A websocket message as handlers see it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Bytes),
    /// A close frame; `None` means the peer closed without a code.
    Close(Option<(u16, String)>),
}

/// The handler's end of an upgraded connection.
pub struct WebSocket {
    incoming: Rx<WsMessage>,
    outgoing: Tx<WsMessage>,
    ping_interval: Option<Duration>,
}

impl WebSocket {
    /// The next message from the peer; `None` once the transport is gone.
    pub async fn next(&mut self) -> Option<WsMessage> {
        self.incoming.recv().await
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), WsError> {
        self.send(WsMessage::Text(text.into()))
    }

    pub fn send_binary(&self, bytes: Bytes) -> Result<(), WsError> {
        self.send(WsMessage::Binary(bytes))
    }

    fn send(&self, msg: WsMessage) -> Result<(), WsError> {
        self.outgoing.send(msg).map_err(|_| WsError::Closed)
    }

    /// Initiates a graceful close with a validated code and reason.
    pub fn close(self, code: CloseCode, reason: impl Into<String>) -> Result<(), WsError> {
        self.outgoing
            .send(WsMessage::Close(Some((code.value(), reason.into()))))
            .map_err(|_| WsError::Closed)
    }

    /// The keepalive ping cadence the adapter should drive, if any.
    pub fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval
    }
}

/// The adapter's end of an upgraded connection: what the frame codec reads
/// from and writes into.
pub struct WsTransport {
    /// Messages from the handler, to be encoded as frames.
    pub outgoing: Rx<WsMessage>,
    /// Decoded frames destined for the handler.
    pub incoming: Tx<WsMessage>,
}

/// Builds the two ends of a websocket conversation.
pub fn websocket_pair(ping_interval: Option<Duration>) -> (WebSocket, WsTransport) {
    let (in_tx, in_rx) = channel();
    let (out_tx, out_rx) = channel();
    (
        WebSocket {
            incoming: in_rx,
            outgoing: out_tx,
            ping_interval,
        },
        WsTransport {
            outgoing: out_rx,
            incoming: in_tx,
        },
    )
}

/// One end of a hijacked byte pipe.
pub struct Duplex {
    incoming: Rx<Bytes>,
    outgoing: Tx<Bytes>,
}

impl Duplex {
    /// The next chunk from the other side; `None` once it is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.incoming.recv().await
    }

    /// Sends a chunk; fails once the other side is gone.
    pub fn send(&self, bytes: Bytes) -> Result<(), WsError> {
        self.outgoing.send(bytes).map_err(|_| WsError::Closed)
    }
}

/// Builds a symmetric pair of byte pipes: one end for the hijack callback,
/// one for the adapter's socket pump.
pub fn duplex_pair() -> (Duplex, Duplex) {
    let (a_tx, a_rx) = channel();
    let (b_tx, b_rx) = channel();
    (
        Duplex {
            incoming: a_rx,
            outgoing: b_tx,
        },
        Duplex {
            incoming: b_rx,
            outgoing: a_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_are_validated() {
        assert!(CloseCode::new(1000).is_ok());
        assert!(CloseCode::new(3999).is_ok());
        assert!(matches!(
            CloseCode::new(1004),
            Err(WsError::InvalidCloseCode(1004))
        ));
        assert!(matches!(
            CloseCode::new(2999),
            Err(WsError::InvalidCloseCode(2999))
        ));
    }

    #[monoio::test]
    async fn websocket_round_trip() {
        let (mut socket, mut transport) = websocket_pair(None);
        transport
            .incoming
            .send(WsMessage::Text("hi".into()))
            .unwrap();
        assert_eq!(socket.next().await, Some(WsMessage::Text("hi".into())));

        socket.send_text("hello").unwrap();
        assert_eq!(
            transport.outgoing.recv().await,
            Some(WsMessage::Text("hello".into()))
        );

        socket.close(CloseCode::NORMAL, "done").unwrap();
        assert_eq!(
            transport.outgoing.recv().await,
            Some(WsMessage::Close(Some((1000, "done".into()))))
        );
    }

    #[monoio::test]
    async fn duplex_is_symmetric() {
        let (mut a, mut b) = duplex_pair();
        a.send(Bytes::from_static(b"ping")).unwrap();
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"ping"));
        b.send(Bytes::from_static(b"pong")).unwrap();
        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"pong"));
    }

    #[monoio::test]
    async fn send_after_peer_drop_fails() {
        let (a, b) = duplex_pair();
        drop(b);
        assert!(matches!(
            a.send(Bytes::from_static(b"x")),
            Err(WsError::Closed)
        ));
    }
}
