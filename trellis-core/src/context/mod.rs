//! The per-request state machine.
//!
//! Every request begins as a [`NewContext`] and transitions exactly once
//! into one of three terminal shapes: a [`ResponseContext`], a
//! [`HijackContext`] (raw socket takeover) or a [`ConnectContext`]
//! (websocket upgrade). The states are distinct types, so an invalid
//! transition does not compile; there is no method that turns a hijack
//! back into anything else.
//!
//! Each request carries a [`Token`]: an opaque identity preserved across
//! every transition. Request-scoped values hang off the token through
//! typed [`Property`] handles and are dropped with it.

mod channel;

use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    marker::PhantomData,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

pub use channel::{
    duplex_pair, websocket_pair, CloseCode, Duplex, WebSocket, WsError, WsMessage, WsTransport,
};
use futures_util::future::LocalBoxFuture;

use crate::message::{Request, Response};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
static NEXT_PROPERTY: AtomicU64 = AtomicU64::new(1);

struct TokenInner {
    id: u64,
    properties: RefCell<HashMap<u64, Box<dyn Any>>>,
}

/// The opaque identity of one request, preserved across context
/// transitions. Equality is identity, not structure.
#[derive(Clone)]
pub struct Token(Rc<TokenInner>);

impl Token {
    fn new() -> Self {
        Self(Rc::new(TokenInner {
            id: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            properties: RefCell::new(HashMap::new()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Token {}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({})", self.0.id)
    }
}

/// A typed key for request-scoped values.
///
/// Two handles of the same value type are still distinct keys; create one
/// per concern and share it. Values live exactly as long as the token.
pub struct Property<T> {
    key: u64,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Property<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            key: NEXT_PROPERTY.fetch_add(1, Ordering::Relaxed),
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Anchors `value` to the request behind `token`, returning the
    /// previous value if any.
    pub fn set(&self, token: &Token, value: T) -> Option<T> {
        token
            .0
            .properties
            .borrow_mut()
            .insert(self.key, Box::new(value))
            .and_then(|old| old.downcast().ok())
            .map(|boxed| *boxed)
    }

    /// Borrows the value for the duration of `f`.
    pub fn with<R>(&self, token: &Token, f: impl FnOnce(Option<&T>) -> R) -> R {
        let props = token.0.properties.borrow();
        f(props.get(&self.key).and_then(|v| v.downcast_ref()))
    }

    /// Clones the value out.
    pub fn get(&self, token: &Token) -> Option<T>
    where
        T: Clone,
    {
        self.with(token, |v| v.cloned())
    }

    /// Removes and returns the value.
    pub fn take(&self, token: &Token) -> Option<T> {
        token
            .0
            .properties
            .borrow_mut()
            .remove(&self.key)
            .and_then(|v| v.downcast().ok())
            .map(|boxed| *boxed)
    }
}

/// The socket-takeover callback: receives the duplex byte channel the
/// adapter pumps and owns it until completion.
pub type HijackFn = Box<dyn FnOnce(Duplex) -> LocalBoxFuture<'static, ()>>;

/// The websocket callback: receives the typed message channel once the
/// adapter has completed the handshake.
pub type ConnectFn = Box<dyn FnOnce(WebSocket) -> LocalBoxFuture<'static, ()>>;

/// A request that has not been decided yet.
pub struct NewContext {
    request: Request,
    token: Token,
}

impl NewContext {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            token: Token::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// A new undecided context over a different request, same token.
    pub fn with_request(self, request: Request) -> NewContext {
        NewContext {
            request,
            token: self.token,
        }
    }

    /// Maps the request in place, keeping the token.
    pub fn map_request(self, f: impl FnOnce(Request) -> Request) -> NewContext {
        NewContext {
            request: f(self.request),
            token: self.token,
        }
    }

    /// Decides this request with a response.
    pub fn respond(self, response: Response) -> ResponseContext {
        ResponseContext {
            response,
            token: self.token,
        }
    }

    /// Takes over the connection. Terminal.
    pub fn hijack<F, Fut>(self, callback: F) -> HijackContext
    where
        F: FnOnce(Duplex) -> Fut + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        HijackContext {
            callback: Box::new(move |duplex| Box::pin(callback(duplex))),
            token: self.token,
        }
    }

    /// Upgrades to a websocket. Terminal.
    pub fn connect<F, Fut>(self, callback: F) -> ConnectContext
    where
        F: FnOnce(WebSocket) -> Fut + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        ConnectContext {
            callback: Box::new(move |socket| Box::pin(callback(socket))),
            token: self.token,
        }
    }

    pub(crate) fn into_parts(self) -> (Request, Token) {
        (self.request, self.token)
    }
}

/// A request decided with a response. Downstream middleware may transform
/// it into another `ResponseContext`; nothing else.
pub struct ResponseContext {
    response: Response,
    token: Token,
}

impl ResponseContext {
    /// Builds a response context directly against a token. This is the
    /// escape hatch middleware uses to synthesize a response (timeouts,
    /// error translation) when the `NewContext` was already handed away.
    pub fn synthesize(token: &Token, response: Response) -> Self {
        Self {
            response,
            token: token.clone(),
        }
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Transforms the response, keeping the token.
    pub fn map(self, f: impl FnOnce(Response) -> Response) -> ResponseContext {
        ResponseContext {
            response: f(self.response),
            token: self.token,
        }
    }

    pub fn into_response(self) -> Response {
        self.response
    }
}

/// A request that took over its socket. Terminal: no transitions exist.
pub struct HijackContext {
    callback: HijackFn,
    token: Token,
}

impl HijackContext {
    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn into_callback(self) -> HijackFn {
        self.callback
    }
}

/// A request upgraded to a websocket. Terminal: no transitions exist.
pub struct ConnectContext {
    callback: ConnectFn,
    token: Token,
}

impl ConnectContext {
    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn into_callback(self) -> ConnectFn {
        self.callback
    }
}

/// The closed set of decided requests a handler returns.
pub enum HandledContext {
    Response(ResponseContext),
    Hijack(HijackContext),
    Connect(ConnectContext),
}

impl HandledContext {
    pub fn token(&self) -> &Token {
        match self {
            HandledContext::Response(c) => c.token(),
            HandledContext::Hijack(c) => c.token(),
            HandledContext::Connect(c) => c.token(),
        }
    }

    /// Transforms the response when this is a response context; hijack and
    /// connect pass through untouched.
    pub fn map_response(self, f: impl FnOnce(Response) -> Response) -> Self {
        match self {
            HandledContext::Response(c) => HandledContext::Response(c.map(f)),
            other => other,
        }
    }
}

impl From<ResponseContext> for HandledContext {
    fn from(c: ResponseContext) -> Self {
        HandledContext::Response(c)
    }
}

impl From<HijackContext> for HandledContext {
    fn from(c: HijackContext) -> Self {
        HandledContext::Hijack(c)
    }
}

impl From<ConnectContext> for HandledContext {
    fn from(c: ConnectContext) -> Self {
        HandledContext::Connect(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Body, Request, Response};

    fn ctx() -> NewContext {
        NewContext::new(Request::get("http://example.com/x").unwrap())
    }

    #[test]
    fn token_survives_transitions() {
        let ctx = ctx();
        let token = ctx.token().clone();
        let ctx = ctx.with_request(Request::get("http://example.com/y").unwrap());
        assert_eq!(*ctx.token(), token);
        let decided = ctx.respond(Response::ok(Body::empty()));
        assert_eq!(*decided.token(), token);
        let decided = decided.map(|r| r.with_status(http::StatusCode::ACCEPTED));
        assert_eq!(*decided.token(), token);
        assert_eq!(decided.response().status(), http::StatusCode::ACCEPTED);
    }

    #[test]
    fn tokens_are_identity_not_structure() {
        let a = ctx();
        let b = ctx();
        assert_ne!(*a.token(), *b.token());
        assert_eq!(*a.token(), a.token().clone());
    }

    #[test]
    fn properties_are_typed_and_scoped_to_the_token() {
        let user: Property<String> = Property::new("user");
        let count: Property<u32> = Property::new("count");

        let req_ctx = ctx();
        let token = req_ctx.token().clone();
        assert!(user.set(&token, "ada".into()).is_none());
        count.set(&token, 3);

        assert_eq!(user.get(&token).as_deref(), Some("ada"));
        assert_eq!(count.get(&token), Some(3));

        // A second handle of the same type is a distinct key.
        let other: Property<String> = Property::new("other");
        assert!(other.get(&token).is_none());

        // Another request sees nothing.
        let stranger = ctx().token().clone();
        assert!(user.get(&stranger).is_none());

        assert_eq!(user.take(&token).as_deref(), Some("ada"));
        assert!(user.get(&token).is_none());
    }

    #[test]
    fn properties_drop_with_the_token() {
        let prop: Property<Rc<()>> = Property::new("probe");
        let probe = Rc::new(());
        {
            let ctx = ctx();
            prop.set(ctx.token(), probe.clone());
            assert_eq!(Rc::strong_count(&probe), 2);
            let _decided = ctx.respond(Response::ok(Body::empty()));
            // Still alive: the terminal context holds the token.
            assert_eq!(Rc::strong_count(&probe), 2);
        }
        assert_eq!(Rc::strong_count(&probe), 1);
    }
}
