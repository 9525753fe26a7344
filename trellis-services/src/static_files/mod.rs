//! The static file engine.
//!
//! Serves files from a root directory with conditional requests, single
//! and multipart byte ranges, content-addressed ETags, MIME sniffing and
//! optional cache-busting URL rewriting. Anything that is not a readable
//! regular file inside the root (missing entries, directories, symlink
//! escapes, filtered names) goes to the fallback handler, a plain 404 by
//! default, so this handler composes cleanly behind a tail route like
//! `/static/**`.

pub mod busting;
mod info;
mod range;

use std::{
    collections::VecDeque,
    io,
    ops::Range,
    path::PathBuf,
    rc::Rc,
    time::SystemTime,
};

use bytes::Bytes;
use futures::StreamExt;
use http::StatusCode;
pub use info::{FileInfo, GuessResolver, MimeResolver};
use tracing::debug;
use trellis_core::{
    context::{HandledContext, NewContext},
    handler::{BoxHandler, Handler, HandlerFuture},
    message::{
        typed::{CacheControl, ContentRange, MediaType},
        Body, ByteStream, Headers, Method, MethodSet, Request, Response,
    },
    AnyResult,
};

pub use busting::{strip_cache_bust, CacheBustingConfig};

use self::{
    info::{file_info, CHUNK_SIZE},
    range::{BodyPlan, Part},
};

/// Computes the `Cache-Control` for a served file.
pub type CacheControlFn = Rc<dyn Fn(&Request, &FileInfo) -> CacheControl>;

/// Decides whether a path segment should be hidden; `true` hides.
pub type HiddenFilter = Rc<dyn Fn(&str) -> bool>;

struct Inner {
    root: PathBuf,
    cache_control: CacheControlFn,
    resolver: Rc<dyn MimeResolver>,
    busting: Option<CacheBustingConfig>,
    fallback: Option<BoxHandler>,
    hidden: Option<HiddenFilter>,
}

/// Serves files below a root directory. Cheap to clone; clones share
/// configuration.
#[derive(Clone)]
pub struct StaticHandler(Rc<Inner>);

impl StaticHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(Rc::new(Inner {
            root: root.into(),
            cache_control: Rc::new(|_, _| CacheControl::new()),
            resolver: Rc::new(GuessResolver),
            busting: None,
            fallback: None,
            hidden: None,
        }))
    }

    fn inner(&mut self) -> &mut Inner {
        Rc::get_mut(&mut self.0).expect("configure the handler before cloning it")
    }

    /// Sets the cache-control callback; it sees the request and the file's
    /// metadata.
    pub fn with_cache_control(mut self, f: CacheControlFn) -> Self {
        self.inner().cache_control = f;
        self
    }

    /// Replaces the MIME resolver.
    pub fn with_resolver(mut self, resolver: Rc<dyn MimeResolver>) -> Self {
        self.inner().resolver = resolver;
        self
    }

    /// Enables inbound hash stripping for cache-busted URLs.
    pub fn with_cache_busting(mut self, config: CacheBustingConfig) -> Self {
        self.inner().busting = Some(config);
        self
    }

    /// The handler consulted for anything this engine will not serve.
    /// Defaults to a plain 404.
    pub fn with_fallback(mut self, fallback: BoxHandler) -> Self {
        self.inner().fallback = Some(fallback);
        self
    }

    /// Installs a name filter; segments it returns `true` for are treated
    /// as absent. Hiding dotfiles is `|name| name.starts_with('.')`.
    pub fn with_hidden_filter(mut self, filter: HiddenFilter) -> Self {
        self.inner().hidden = Some(filter);
        self
    }

    async fn fall_back(&self, ctx: NewContext) -> AnyResult<HandledContext> {
        match &self.0.fallback {
            Some(fallback) => fallback.call(ctx).await,
            None => Ok(ctx.respond(Response::not_found()).into()),
        }
    }

    async fn serve(self, ctx: NewContext) -> AnyResult<HandledContext> {
        let method = ctx.request().method();
        if method != Method::Get && method != Method::Head {
            let allowed: MethodSet = [Method::Get, Method::Head].into_iter().collect();
            return Ok(ctx.respond(Response::method_not_allowed(allowed)).into());
        }

        // The on-disk path comes from the remaining scope segments, with
        // any cache-busting hash stripped from the last one.
        let mut url_path = ctx.request().url().path().clone();
        if let Some(busting) = &self.0.busting {
            if let Some(stripped) = busting.strip_path(&url_path) {
                url_path = stripped;
            }
        }

        if let Some(hidden) = &self.0.hidden {
            if url_path.segments().iter().any(|seg| hidden(seg)) {
                return self.fall_back(ctx).await;
            }
        }

        let mut candidate = self.0.root.clone();
        for seg in url_path.segments() {
            candidate.push(seg);
        }
        // Resolve symlinks, then make sure we are still inside the root.
        let (resolved, metadata) = match candidate.canonicalize() {
            Ok(resolved) => match std::fs::metadata(&resolved) {
                Ok(metadata) => (resolved, metadata),
                Err(_) => return self.fall_back(ctx).await,
            },
            Err(_) => return self.fall_back(ctx).await,
        };
        let root = match self.0.root.canonicalize() {
            Ok(root) => root,
            Err(_) => return self.fall_back(ctx).await,
        };
        if !resolved.starts_with(&root) || !metadata.is_file() {
            debug!("refusing to serve {}", resolved.display());
            return self.fall_back(ctx).await;
        }

        let fileinfo = file_info(&resolved, &metadata, self.0.resolver.as_ref()).await?;
        let request = ctx.request();

        let base = Headers::builder()
            .accept_ranges_bytes()
            .etag(&fileinfo.etag)
            .last_modified(fileinfo.modified)
            .cache_control(&(self.0.cache_control)(request, &fileinfo));

        // Conditional requests: If-None-Match wins over If-Modified-Since.
        let headers = request.headers();
        if let Some(inm) = headers.if_none_match() {
            if inm.matches(&fileinfo.etag) {
                return Ok(ctx.respond(Response::not_modified(base.seal())).into());
            }
        } else if let Some(since) = headers.if_modified_since() {
            if secs(since) >= secs(fileinfo.modified) {
                return Ok(ctx.respond(Response::not_modified(base.seal())).into());
            }
        }

        // Ranges apply only when If-Range (if present) still validates.
        let ranges = headers.range().filter(|_| {
            headers
                .if_range()
                .map(|ir| ir.matches(&fileinfo.etag, fileinfo.modified))
                .unwrap_or(true)
        });

        let response = match ranges {
            Some(set) => {
                let resolved_ranges = set.resolve(fileinfo.size);
                match resolved_ranges.len() {
                    0 => {
                        let headers = base
                            .content_range(&ContentRange::unsatisfied(fileinfo.size))
                            .seal();
                        Response::new(StatusCode::RANGE_NOT_SATISFIABLE, headers, Body::empty())
                    }
                    1 => {
                        let range = resolved_ranges[0].clone();
                        let plan = BodyPlan::single(range.clone());
                        let headers = base
                            .content_range(&ContentRange::bytes(range, fileinfo.size))
                            .content_type(&MediaType::new(fileinfo.mime.clone()))
                            .content_length(plan.total_len)
                            .seal();
                        self.ranged_response(method, &resolved, headers, plan)
                    }
                    _ => {
                        let plan =
                            BodyPlan::multipart(&resolved_ranges, fileinfo.size, &fileinfo.mime);
                        let content_type = plan
                            .content_type
                            .as_deref()
                            .and_then(MediaType::parse)
                            .expect("multipart plans carry a content type");
                        let headers = base
                            .content_type(&content_type)
                            .content_length(plan.total_len)
                            .seal();
                        self.ranged_response(method, &resolved, headers, plan)
                    }
                }
            }
            None => {
                let plan = BodyPlan::full(fileinfo.size);
                let headers = base
                    .content_type(&MediaType::new(fileinfo.mime.clone()))
                    .content_length(plan.total_len)
                    .seal();
                self.ranged_response(method, &resolved, headers, plan)
                    .with_status(StatusCode::OK)
            }
        };

        Ok(ctx.respond(response).into())
    }

    /// Assembles the terminal response for a plan; 206 for ranges, and an
    /// empty stream under the same headers for HEAD.
    fn ranged_response(
        &self,
        method: Method,
        path: &std::path::Path,
        headers: Headers,
        plan: BodyPlan,
    ) -> Response {
        let body = if method == Method::Head {
            Body::from_stream(futures::stream::empty().boxed_local(), None, None)
        } else {
            let total = plan.total_len;
            Body::from_stream(body_stream(path.to_owned(), plan.parts), Some(total), None)
        };
        Response::new(StatusCode::PARTIAL_CONTENT, headers, body)
    }
}

impl Handler for StaticHandler {
    fn call(&self, ctx: NewContext) -> HandlerFuture {
        let this = self.clone();
        Box::pin(async move { this.serve(ctx).await })
    }
}

fn secs(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct StreamState {
    path: PathBuf,
    file: Option<monoio::fs::File>,
    parts: VecDeque<Part>,
    current: Option<Range<u64>>,
    failed: bool,
}

/// Streams a body plan from disk. The file handle is opened on first use
/// and owned by the stream, so it is released when the stream is dropped:
/// on completion, on error, and on client disconnect alike.
fn body_stream(path: PathBuf, parts: Vec<Part>) -> ByteStream {
    let state = StreamState {
        path,
        file: None,
        parts: parts.into(),
        current: None,
        failed: false,
    };
    futures::stream::unfold(state, |mut st| async move {
        if st.failed {
            return None;
        }
        loop {
            if let Some(cur) = &mut st.current {
                if cur.start >= cur.end {
                    st.current = None;
                    continue;
                }
                if st.file.is_none() {
                    match monoio::fs::File::open(&st.path).await {
                        Ok(file) => st.file = Some(file),
                        Err(e) => {
                            st.failed = true;
                            return Some((Err(e), st));
                        }
                    }
                }
                let want = (cur.end - cur.start).min(CHUNK_SIZE as u64) as usize;
                let buf = vec![0u8; want];
                let (res, mut buf) = st.file.as_ref().unwrap().read_at(buf, cur.start).await;
                match res {
                    Ok(0) => {
                        // The file shrank under us; the declared length can
                        // no longer be honored.
                        st.failed = true;
                        return Some((
                            Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "file truncated while serving",
                            )),
                            st,
                        ));
                    }
                    Ok(n) => {
                        cur.start += n as u64;
                        buf.truncate(n);
                        return Some((Ok(Bytes::from(buf)), st));
                    }
                    Err(e) => {
                        st.failed = true;
                        return Some((Err(e), st));
                    }
                }
            }
            match st.parts.pop_front() {
                Some(Part::Bytes(bytes)) => return Some((Ok(bytes), st)),
                Some(Part::File(range)) => {
                    st.current = Some(range);
                    continue;
                }
                None => return None,
            }
        }
    })
    .boxed_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use trellis_core::message::{ConnectionInfo, Request};

    fn fixture(contents: &[u8]) -> (tempfile::TempDir, StaticHandler) {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("file.txt")).unwrap();
        f.write_all(contents).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::File::create(dir.path().join("sub/inner.txt"))
            .unwrap()
            .write_all(b"inner")
            .unwrap();
        std::fs::File::create(dir.path().join(".secret"))
            .unwrap()
            .write_all(b"hidden")
            .unwrap();
        let handler = StaticHandler::new(dir.path());
        (dir, handler)
    }

    fn request(method: Method, path: &str, headers: Headers) -> NewContext {
        NewContext::new(
            Request::new(
                method,
                format!("http://example.com{path}").parse().unwrap(),
                http::Version::HTTP_11,
                headers,
                Body::empty(),
                ConnectionInfo::new(),
            )
            .unwrap(),
        )
    }

    async fn run(handler: &StaticHandler, ctx: NewContext) -> Response {
        match handler.call(ctx).await.unwrap() {
            HandledContext::Response(rc) => rc.into_response(),
            _ => panic!("expected a response"),
        }
    }

    async fn body_bytes(response: Response) -> Bytes {
        response.into_body().read(None).await.unwrap()
    }

    #[monoio::test]
    async fn serves_whole_files_with_validators() {
        let (_dir, handler) = fixture(b"hello world");
        let resp = run(&handler, request(Method::Get, "/file.txt", Headers::new())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("accept-ranges"), Some("bytes"));
        assert!(resp.headers().etag().is_some());
        assert!(resp.headers().last_modified().is_some());
        assert_eq!(resp.headers().content_length(), Some(11));
        assert_eq!(
            resp.headers().content_type().unwrap().mime.essence_str(),
            "text/plain"
        );
        assert_eq!(&body_bytes(resp).await[..], b"hello world");
    }

    #[monoio::test]
    async fn head_gets_headers_and_no_body() {
        let (_dir, handler) = fixture(b"hello world");
        let resp = run(&handler, request(Method::Head, "/file.txt", Headers::new())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().content_length(), Some(11));
        assert!(body_bytes(resp).await.is_empty());
    }

    #[monoio::test]
    async fn non_get_head_is_405() {
        let (_dir, handler) = fixture(b"x");
        let resp = run(&handler, request(Method::Post, "/file.txt", Headers::new())).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers().get("allow"), Some("GET, HEAD"));
    }

    #[monoio::test]
    async fn missing_and_directory_paths_fall_back_to_404() {
        let (_dir, handler) = fixture(b"x");
        for path in ["/missing.txt", "/sub", "/"] {
            let resp = run(&handler, request(Method::Get, path, Headers::new())).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "for {path}");
        }
        // Nested files are fine.
        let resp = run(&handler, request(Method::Get, "/sub/inner.txt", Headers::new())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[monoio::test]
    async fn if_none_match_returns_304_without_body() {
        let (_dir, handler) = fixture(b"hello world");
        let first = run(&handler, request(Method::Get, "/file.txt", Headers::new())).await;
        let etag = first.headers().etag().unwrap();

        let headers = Headers::builder()
            .insert("If-None-Match", &etag.to_string())
            .unwrap()
            .seal();
        let resp = run(&handler, request(Method::Get, "/file.txt", headers)).await;
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
        assert!(resp.headers().etag().is_some());
        assert!(body_bytes(resp).await.is_empty());

        let headers = Headers::builder()
            .insert("If-None-Match", "*")
            .unwrap()
            .seal();
        let resp = run(&handler, request(Method::Get, "/file.txt", headers)).await;
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    }

    #[monoio::test]
    async fn if_modified_since_honors_the_file_clock() {
        let (_dir, handler) = fixture(b"hello world");
        let first = run(&handler, request(Method::Get, "/file.txt", Headers::new())).await;
        let modified = first.headers().last_modified().unwrap();

        let headers = Headers::builder()
            .insert("If-Modified-Since", &httpdate::fmt_http_date(modified))
            .unwrap()
            .seal();
        let resp = run(&handler, request(Method::Get, "/file.txt", headers)).await;
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

        let stale = modified - std::time::Duration::from_secs(3600);
        let headers = Headers::builder()
            .insert("If-Modified-Since", &httpdate::fmt_http_date(stale))
            .unwrap()
            .seal();
        let resp = run(&handler, request(Method::Get, "/file.txt", headers)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[monoio::test]
    async fn single_range_is_206_with_content_range() {
        let contents: Vec<u8> = (0..100).collect();
        let (_dir, handler) = fixture(&contents);
        let headers = Headers::builder().insert("Range", "bytes=0-9").unwrap().seal();
        let resp = run(&handler, request(Method::Get, "/file.txt", headers)).await;
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            resp.headers().get("content-range"),
            Some("bytes 0-9/100")
        );
        assert_eq!(resp.headers().content_length(), Some(10));
        let body = body_bytes(resp).await;
        assert_eq!(&body[..], &contents[0..10]);
    }

    #[monoio::test]
    async fn unsatisfiable_range_is_416() {
        let contents: Vec<u8> = (0..100).collect();
        let (_dir, handler) = fixture(&contents);
        let headers = Headers::builder()
            .insert("Range", "bytes=200-299")
            .unwrap()
            .seal();
        let resp = run(&handler, request(Method::Get, "/file.txt", headers)).await;
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(resp.headers().get("content-range"), Some("bytes */100"));
    }

    #[monoio::test]
    async fn multipart_ranges_precompute_content_length() {
        let contents: Vec<u8> = (0..100).collect();
        let (_dir, handler) = fixture(&contents);
        let headers = Headers::builder()
            .insert("Range", "bytes=0-9,90-99")
            .unwrap()
            .seal();
        let resp = run(&handler, request(Method::Get, "/file.txt", headers)).await;
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        let content_type = resp.headers().content_type().unwrap();
        assert_eq!(content_type.mime.essence_str(), "multipart/byteranges");
        let declared = resp.headers().content_length().unwrap();

        let body = body_bytes(resp).await;
        assert_eq!(body.len() as u64, declared);
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("Content-Range: bytes 0-9/100"));
        assert!(text.contains("Content-Range: bytes 90-99/100"));
        assert!(text.trim_end().ends_with("--"));
    }

    #[monoio::test]
    async fn if_range_mismatch_serves_the_full_file() {
        let contents: Vec<u8> = (0..100).collect();
        let (_dir, handler) = fixture(&contents);
        let headers = Headers::builder()
            .insert("Range", "bytes=0-9")
            .unwrap()
            .insert("If-Range", "\"some-other-etag\"")
            .unwrap()
            .seal();
        let resp = run(&handler, request(Method::Get, "/file.txt", headers)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().content_length(), Some(100));
    }

    #[monoio::test]
    async fn hidden_filter_hides_dotfiles() {
        let (_dir, handler) = fixture(b"x");
        let handler = handler.with_hidden_filter(Rc::new(|name| name.starts_with('.')));
        let resp = run(&handler, request(Method::Get, "/.secret", Headers::new())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = run(&handler, request(Method::Get, "/file.txt", Headers::new())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[monoio::test]
    async fn cache_busted_urls_strip_to_the_real_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("app.js"))
            .unwrap()
            .write_all(b"let x = 1;")
            .unwrap();
        let config = CacheBustingConfig::new(dir.path(), "/");
        let handler = StaticHandler::new(dir.path()).with_cache_busting(config.clone());

        let busted = config.try_asset_path("/app.js").await;
        assert_ne!(busted, "/app.js");
        let resp = run(&handler, request(Method::Get, &busted, Headers::new())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&body_bytes(resp).await[..], b"let x = 1;");
    }

    #[monoio::test]
    async fn cache_control_callback_shapes_the_header() {
        let (_dir, handler) = fixture(b"x");
        let handler = handler.with_cache_control(Rc::new(|_req, _info| {
            CacheControl::new()
                .public()
                .max_age(std::time::Duration::from_secs(60))
        }));
        let resp = run(&handler, request(Method::Get, "/file.txt", Headers::new())).await;
        assert_eq!(
            resp.headers().get("cache-control"),
            Some("public, max-age=60")
        );
    }
}
