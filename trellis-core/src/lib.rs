//! Core abstractions of the trellis HTTP server library.
//!
//! The crate is organized bottom-up:
//!
//! - [`path`]: canonical, interned URL paths.
//! - [`trie`]: the path trie the router is built on.
//! - [`router`]: method-aware routing over the trie.
//! - [`message`]: immutable request/response records, typed headers and
//!   single-read bodies.
//! - [`context`]: the per-request state machine (new → response | hijack |
//!   websocket upgrade) and per-request properties.
//! - [`handler`]: the handler/middleware/pipeline algebra.
//! - [`routing`]: routers as handlers, path-scoped middleware, virtual
//!   hosting.
//! - [`server`]: the adapter contract, the serve loop, worker orchestration
//!   and hot reconfiguration.
//!
//! Wire-level HTTP parsing, TLS and the WebSocket frame codec are adapter
//! concerns and live outside this crate.

#[macro_use]
mod error;
pub use error::{AnyError, AnyResult};

pub mod config;
pub mod context;
pub mod handler;
pub mod message;
pub mod path;
pub mod router;
pub mod routing;
pub mod server;
pub mod trie;
