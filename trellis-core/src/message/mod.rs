//! Immutable request and response records.
//!
//! Requests arrive from the adapter fully formed and never mutate; routing
//! derives new records (a narrowed [`Url`], a replaced body) instead of
//! editing in place. Responses are built from a handful of conventional
//! constructors and transformed into new values that share the underlying
//! byte stream.

mod body;
mod headers;
mod method;
pub mod typed;

use std::net::SocketAddr;

pub use body::{Body, BodyError, ByteStream};
use bytes::Bytes;
use http::{StatusCode, Uri, Version};
pub use headers::{HeaderError, Headers, HeadersBuilder};
pub use method::{Method, MethodSet};

use crate::path::NormalizedPath;

/// Request construction errors. Programmer (or adapter) errors; fail
/// eagerly.
#[derive(thiserror::Error, Debug)]
pub enum RequestError {
    #[error("requested uri must be absolute, got `{0}`")]
    NotAbsolute(String),
    #[error("requested uri must not carry a fragment")]
    HasFragment,
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
}

/// Where a request came from.
#[derive(Clone, Debug, Default)]
pub struct ConnectionInfo {
    pub peer_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    pub secure: bool,
}

impl ConnectionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Parses and records the peer address; rejects malformed input
    /// eagerly.
    pub fn peer_str(mut self, addr: &str) -> Result<Self, RequestError> {
        self.peer_addr = Some(
            addr.parse()
                .map_err(|_| RequestError::InvalidAddress(addr.to_owned()))?,
        );
        Ok(self)
    }

    pub fn local(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

/// Parses a raw request target into a [`Uri`], rejecting fragments and
/// relative forms. Adapters use this at the wire boundary.
pub fn parse_request_uri(raw: &str) -> Result<Uri, RequestError> {
    if raw.contains('#') {
        return Err(RequestError::HasFragment);
    }
    let uri: Uri = raw
        .parse()
        .map_err(|_| RequestError::NotAbsolute(raw.to_owned()))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(RequestError::NotAbsolute(raw.to_owned()));
    }
    Ok(uri)
}

/// The scope-relative URL: the remaining path at the current routing scope
/// plus the query string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Url {
    path: NormalizedPath,
    query: Option<String>,
}

impl Url {
    pub fn new(path: NormalizedPath, query: Option<String>) -> Self {
        Self { path, query }
    }

    /// Parses a path-and-query string such as `/a/b?x=1`.
    pub fn parse(path_and_query: &str) -> Self {
        match path_and_query.split_once('?') {
            Some((path, query)) => Self {
                path: NormalizedPath::normalize(path),
                query: Some(query.to_owned()),
            },
            None => Self {
                path: NormalizedPath::normalize(path_and_query),
                query: None,
            },
        }
    }

    pub fn path(&self) -> &NormalizedPath {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The same query over a different path; used when routing descends a
    /// scope.
    pub fn with_path(&self, path: NormalizedPath) -> Self {
        Self {
            path,
            query: self.query.clone(),
        }
    }
}

impl std::fmt::Display for Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.query {
            Some(q) => write!(f, "{}?{}", self.path, q),
            None => write!(f, "{}", self.path),
        }
    }
}

/// An immutable request record.
#[derive(Debug)]
pub struct Request {
    method: Method,
    requested_uri: Uri,
    url: Url,
    version: Version,
    headers: Headers,
    body: Body,
    connection: ConnectionInfo,
    extensions: http::Extensions,
}

impl Request {
    /// Builds a request. `requested_uri` must be absolute and carry no
    /// fragment; the scope-relative [`Url`] starts out as the uri's own
    /// path and query.
    pub fn new(
        method: Method,
        requested_uri: Uri,
        version: Version,
        headers: Headers,
        body: Body,
        connection: ConnectionInfo,
    ) -> Result<Self, RequestError> {
        if requested_uri.scheme().is_none() || requested_uri.authority().is_none() {
            return Err(RequestError::NotAbsolute(requested_uri.to_string()));
        }
        let url = Url::parse(
            requested_uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/"),
        );
        Ok(Self {
            method,
            requested_uri,
            url,
            version,
            headers,
            body,
            connection,
            extensions: http::Extensions::new(),
        })
    }

    /// A bare GET request for tests and fakes.
    pub fn get(uri: &str) -> Result<Self, RequestError> {
        let uri = parse_request_uri(uri)?;
        Self::new(
            Method::Get,
            uri,
            Version::HTTP_11,
            Headers::new(),
            Body::empty(),
            ConnectionInfo::new(),
        )
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn requested_uri(&self) -> &Uri {
        &self.requested_uri
    }

    /// The remaining path at the current routing scope, plus query.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn extensions(&self) -> &http::Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.extensions
    }

    /// The same request narrowed to a different routing scope.
    pub fn with_url(self, url: Url) -> Self {
        Self { url, ..self }
    }

    /// The same request with another method; used by HEAD fallbacks.
    pub fn with_method(self, method: Method) -> Self {
        Self { method, ..self }
    }
}

/// An immutable response record.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
}

impl Response {
    pub fn new(status: StatusCode, headers: Headers, body: Body) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn ok(body: Body) -> Self {
        Self::new(StatusCode::OK, Headers::new(), body)
    }

    pub fn bad_request() -> Self {
        Self::text_status(StatusCode::BAD_REQUEST, "Bad Request")
    }

    pub fn unauthorized() -> Self {
        Self::text_status(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    pub fn not_found() -> Self {
        Self::text_status(StatusCode::NOT_FOUND, "Not Found")
    }

    /// A 304. Carries no body by construction.
    pub fn not_modified(headers: Headers) -> Self {
        Self::new(StatusCode::NOT_MODIFIED, headers, Body::empty())
    }

    pub fn forbidden() -> Self {
        Self::text_status(StatusCode::FORBIDDEN, "Forbidden")
    }

    /// The response for a body that blew past its read limit.
    pub fn payload_too_large() -> Self {
        Self::text_status(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
    }

    /// A 204. Carries no body by construction.
    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT, Headers::new(), Body::empty())
    }

    pub fn found(location: &str) -> Self {
        Self::redirect(StatusCode::FOUND, location)
    }

    pub fn see_other(location: &str) -> Self {
        Self::redirect(StatusCode::SEE_OTHER, location)
    }

    pub fn moved_permanently(location: &str) -> Self {
        Self::redirect(StatusCode::MOVED_PERMANENTLY, location)
    }

    fn redirect(status: StatusCode, location: &str) -> Self {
        let headers = Headers::builder()
            .location(location)
            .map(HeadersBuilder::seal)
            .unwrap_or_default();
        Self::new(status, headers, Body::empty())
    }

    pub fn method_not_allowed(allowed: MethodSet) -> Self {
        let headers = Headers::builder().allow(allowed).seal();
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            headers,
            Body::from_text("Method Not Allowed"),
        )
    }

    /// The generic 500. The body never leaks internals.
    pub fn internal_server_error() -> Self {
        Self::text_status(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }

    fn text_status(status: StatusCode, text: &str) -> Self {
        Self::new(status, Headers::new(), Body::from_text(text))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// A new response with another status, sharing the body stream.
    pub fn with_status(self, status: StatusCode) -> Self {
        Self { status, ..self }
    }

    /// A new response with the given headers, sharing the body stream.
    pub fn with_headers(self, headers: Headers) -> Self {
        Self { headers, ..self }
    }

    /// A new response with one header replaced.
    pub fn with_header(self, name: &str, value: &str) -> Result<Self, HeaderError> {
        let headers = self.headers.to_builder().insert(name, value)?.seal();
        Ok(Self { headers, ..self })
    }

    /// A new response with the body passed through `f`.
    pub fn map_body(self, f: impl FnOnce(Body) -> Body) -> Self {
        Self {
            body: f(self.body),
            ..self
        }
    }
}

/// How the adapter must frame the response body on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMode {
    /// Emit a `Content-Length` of exactly this many bytes.
    Fixed(u64),
    /// Apply chunked transfer encoding.
    Chunked,
    /// Stream until close; framing is delimited by connection shutdown.
    Close,
}

/// Decides the wire framing for a response.
///
/// Informational, 204 and 304 responses and `multipart/byteranges` bodies
/// never get chunked encoding; an explicit `Transfer-Encoding: identity`
/// suppresses the chunked upgrade too. Everything else with an unknown
/// length is chunked.
pub fn transfer_mode(response: &Response) -> TransferMode {
    let status = response.status();
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return TransferMode::Fixed(0);
    }

    let declared = response
        .body()
        .content_length()
        .or_else(|| response.headers().content_length());

    let multipart = response
        .headers()
        .content_type()
        .map(|ct| ct.mime.essence_str() == "multipart/byteranges")
        .unwrap_or(false);
    let identity = response
        .headers()
        .transfer_encoding()
        .map(|te| te.eq_ignore_ascii_case("identity"))
        .unwrap_or(false);

    match declared {
        Some(len) => TransferMode::Fixed(len),
        None if multipart || identity => TransferMode::Close,
        None => TransferMode::Chunked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_requires_absolute_uri() {
        assert!(Request::get("http://example.com/a/b?x=1").is_ok());
        assert!(matches!(
            Request::get("/relative"),
            Err(RequestError::NotAbsolute(_))
        ));
    }

    #[test]
    fn url_tracks_the_routing_scope() {
        let req = Request::get("http://example.com/api/users/7?full=1").unwrap();
        assert_eq!(req.url().path().as_str(), "/api/users/7");
        assert_eq!(req.url().query(), Some("full=1"));

        let narrowed = req
            .url()
            .with_path(NormalizedPath::normalize("/users/7"));
        let req = req.with_url(narrowed);
        assert_eq!(req.url().to_string(), "/users/7?full=1");
        assert_eq!(req.requested_uri().path(), "/api/users/7");
    }

    #[test]
    fn connection_info_rejects_bad_addresses() {
        assert!(ConnectionInfo::new().peer_str("127.0.0.1:80").is_ok());
        assert!(matches!(
            ConnectionInfo::new().peer_str("nope"),
            Err(RequestError::InvalidAddress(_))
        ));
    }

    #[test]
    fn conventional_constructors() {
        assert_eq!(Response::not_found().status(), StatusCode::NOT_FOUND);
        assert_eq!(Response::no_content().status(), StatusCode::NO_CONTENT);
        assert_eq!(
            Response::found("/elsewhere").headers().location(),
            Some("/elsewhere")
        );
        assert_eq!(
            Response::see_other("/next").status(),
            StatusCode::SEE_OTHER
        );
        assert_eq!(
            Response::moved_permanently("/new").headers().location(),
            Some("/new")
        );
        let resp = Response::method_not_allowed(
            [Method::Get, Method::Head].into_iter().collect(),
        );
        assert_eq!(resp.headers().get("allow"), Some("GET, HEAD"));
        let ise = Response::internal_server_error();
        assert_eq!(
            ise.body().body_type().unwrap().render(),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn transfer_mode_rules() {
        let resp = Response::ok(Body::from_bytes(Bytes::from_static(b"abc")));
        assert_eq!(transfer_mode(&resp), TransferMode::Fixed(3));

        let no_len = Response::ok(Body::from_stream(
            futures_util::stream::StreamExt::boxed_local(futures_util::stream::empty()),
            None,
            None,
        ));
        assert_eq!(transfer_mode(&no_len), TransferMode::Chunked);

        let not_modified = Response::not_modified(Headers::new());
        assert_eq!(transfer_mode(&not_modified), TransferMode::Fixed(0));

        let multipart = Response::ok(Body::from_stream(
            futures_util::stream::StreamExt::boxed_local(futures_util::stream::empty()),
            None,
            None,
        ))
        .with_header("Content-Type", "multipart/byteranges; boundary=xyz")
        .unwrap();
        assert_eq!(transfer_mode(&multipart), TransferMode::Close);

        let identity = Response::ok(Body::from_stream(
            futures_util::stream::StreamExt::boxed_local(futures_util::stream::empty()),
            None,
            None,
        ))
        .with_header("Transfer-Encoding", "identity")
        .unwrap();
        assert_eq!(transfer_mode(&identity), TransferMode::Close);
    }
}
