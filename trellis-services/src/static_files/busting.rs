//! Cache-busting URL rewriting.
//!
//! Outbound, [`CacheBustingConfig::try_asset_path`] turns `/assets/app.js`
//! into `/assets/app@<etag>.js`, so changed content gets a new URL and
//! unchanged content stays cacheable forever. Inbound, the hash is
//! stripped from the last segment, either by the static handler when it
//! is configured with a busting config, or by the [`strip_cache_bust`]
//! middleware for any other handler chain.

use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

use trellis_core::{
    handler::{handler_fn, middleware_fn, BoxHandler, Handler, Middleware},
    path::NormalizedPath,
};

use super::info::{file_info, GuessResolver, MimeResolver};

/// The default hash separator.
pub const DEFAULT_SEPARATOR: char = '@';

/// Rewrites asset URLs by content hash.
#[derive(Clone)]
pub struct CacheBustingConfig {
    root: PathBuf,
    mount: NormalizedPath,
    separator: char,
    resolver: Rc<dyn MimeResolver>,
}

impl CacheBustingConfig {
    /// `root` is the on-disk directory the assets live in; `mount` is the
    /// URL prefix they are served under.
    pub fn new(root: impl Into<PathBuf>, mount: &str) -> Self {
        Self {
            root: root.into(),
            mount: NormalizedPath::normalize(mount),
            separator: DEFAULT_SEPARATOR,
            resolver: Rc::new(GuessResolver),
        }
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Strips `sep<hash>` from a single segment, if present: `app@abc.js`
    /// becomes `app.js`. Returns `None` when the segment carries no hash.
    pub fn strip_segment(&self, segment: &str) -> Option<String> {
        let sep = segment.rfind(self.separator)?;
        let rest = &segment[sep + self.separator.len_utf8()..];
        let (hash, ext) = match rest.find('.') {
            Some(dot) => (&rest[..dot], &rest[dot..]),
            None => (rest, ""),
        };
        if hash.is_empty() {
            return None;
        }
        Some(format!("{}{}", &segment[..sep], ext))
    }

    /// Strips the hash from the last segment of `path`, if present.
    pub fn strip_path(&self, path: &NormalizedPath) -> Option<NormalizedPath> {
        let last = path.segments().last()?;
        let stripped = self.strip_segment(last)?;
        let mut segments = path.segments().to_vec();
        *segments.last_mut().unwrap() = stripped;
        Some(NormalizedPath::from_segments(segments))
    }

    /// Computes the busted form of an asset URL: the file's ETag is
    /// inserted before the extension. On any failure (the path is outside
    /// the mount, escapes the filesystem root, or cannot be read) the
    /// original path is returned unchanged.
    pub async fn try_asset_path(&self, path: &str) -> String {
        match self.bust(path).await {
            Some(busted) => busted,
            None => path.to_owned(),
        }
    }

    async fn bust(&self, path: &str) -> Option<String> {
        let url = NormalizedPath::normalize(path);
        let mount_len = self.mount.len();
        if url.segments().len() <= mount_len
            || url.segments()[..mount_len] != *self.mount.segments()
        {
            return None;
        }
        let rel = url.sub_path(mount_len, None);

        let mut fs_path = self.root.clone();
        for seg in rel.segments() {
            fs_path.push(seg);
        }
        let resolved = fs_path.canonicalize().ok()?;
        let root = self.root.canonicalize().ok()?;
        if !resolved.starts_with(&root) {
            return None;
        }
        let metadata = std::fs::metadata(&resolved).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let info = file_info(&resolved, &metadata, self.resolver.as_ref())
            .await
            .ok()?;

        let mut segments = url.segments().to_vec();
        let last = segments.last_mut().unwrap();
        *last = insert_hash(last, self.separator, info.etag.tag());
        Some(NormalizedPath::from_segments(segments).as_str().to_owned())
    }
}

impl std::fmt::Debug for CacheBustingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBustingConfig")
            .field("root", &self.root)
            .field("mount", &self.mount.as_str())
            .field("separator", &self.separator)
            .finish()
    }
}

fn insert_hash(segment: &str, separator: char, hash: &str) -> String {
    match segment.rfind('.') {
        Some(dot) if dot > 0 => {
            format!("{}{}{}{}", &segment[..dot], separator, hash, &segment[dot..])
        }
        _ => format!("{segment}{separator}{hash}"),
    }
}

/// Middleware that strips a cache-busting hash from the request URL before
/// the rest of the chain sees it.
pub fn strip_cache_bust(config: CacheBustingConfig) -> Middleware {
    middleware_fn(move |inner: BoxHandler| {
        let config = config.clone();
        handler_fn(move |ctx| {
            let inner = inner.clone();
            let config = config.clone();
            async move {
                let ctx = ctx.map_request(|req| {
                    match config.strip_path(req.url().path()) {
                        Some(stripped) => {
                            let url = req.url().with_path(stripped);
                            req.with_url(url)
                        }
                        None => req,
                    }
                });
                inner.call(ctx).await
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture() -> (tempfile::TempDir, CacheBustingConfig) {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("app.js")).unwrap();
        f.write_all(b"console.log('hi')").unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::File::create(dir.path().join("css/site.css"))
            .unwrap()
            .write_all(b"body{}")
            .unwrap();
        std::fs::File::create(dir.path().join("no-extension")).unwrap();
        let config = CacheBustingConfig::new(dir.path(), "/assets");
        (dir, config)
    }

    #[test]
    fn strip_segment_requires_a_hash() {
        let (_dir, config) = fixture();
        assert_eq!(
            config.strip_segment("app@abc123.js").as_deref(),
            Some("app.js")
        );
        assert_eq!(config.strip_segment("plain@deadbeef").as_deref(), Some("plain"));
        assert_eq!(config.strip_segment("app.js"), None);
        // Separator with an empty hash is not a busted name.
        assert_eq!(config.strip_segment("app@.js"), None);
    }

    #[monoio::test]
    async fn round_trip_strip_of_bust_is_identity() {
        let (_dir, config) = fixture();
        for path in ["/assets/app.js", "/assets/css/site.css", "/assets/no-extension"] {
            let busted = config.try_asset_path(path).await;
            assert_ne!(busted, path, "expected {path} to gain a hash");
            let busted_path = NormalizedPath::normalize(&busted);
            let stripped = config.strip_path(&busted_path).unwrap();
            assert_eq!(stripped.as_str(), path);
        }
    }

    #[monoio::test]
    async fn bust_inserts_the_etag_before_the_extension() {
        let (_dir, config) = fixture();
        let busted = config.try_asset_path("/assets/app.js").await;
        assert!(busted.starts_with("/assets/app@"));
        assert!(busted.ends_with(".js"));
        let hash = &busted["/assets/app@".len()..busted.len() - ".js".len()];
        assert_eq!(hash.len(), 40);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[monoio::test]
    async fn failures_return_the_original() {
        let (_dir, config) = fixture();
        // Missing file, wrong mount, directory, escape attempt.
        for path in [
            "/assets/missing.js",
            "/elsewhere/app.js",
            "/assets/css",
            "/assets/../../etc/passwd",
        ] {
            assert_eq!(config.try_asset_path(path).await, path);
        }
    }
}
