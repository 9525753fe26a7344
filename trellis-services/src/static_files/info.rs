//! Content-addressed file metadata.
//!
//! A [`FileInfo`] bundles what conditional requests and range serving need
//! to know about a file: size, modification time, the hex SHA-1 ETag of
//! its contents and its sniffed MIME type. Computing one costs a full
//! read, so infos live in a per-worker LRU cache and are revalidated
//! against a fresh `(size, mtime)` stat before reuse.

use std::{
    cell::RefCell,
    io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    rc::Rc,
    time::SystemTime,
};

use lru::LruCache;
use sha1::{Digest, Sha1};
use trellis_core::message::typed::EntityTag;

/// Capacity of the per-worker file info cache.
const CACHE_CAPACITY: usize = 1024;

/// Read granularity for hashing and serving.
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

thread_local! {
    static CACHE: RefCell<LruCache<PathBuf, Rc<FileInfo>>> =
        RefCell::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap()));
}

/// Everything the engine knows about one file on disk.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub size: u64,
    pub modified: SystemTime,
    /// Hex SHA-1 of the file contents; a strong validator.
    pub etag: EntityTag,
    pub mime: mime::Mime,
}

/// Resolves a file's MIME type from a magic prefix and its path.
///
/// A boundary trait so tests can fake sniffing without fixture files.
pub trait MimeResolver {
    /// How many leading bytes [`MimeResolver::resolve`] wants to see.
    fn magic_len(&self) -> usize {
        16
    }

    fn resolve(&self, path: &Path, magic: &[u8]) -> mime::Mime;
}

/// The default resolver: a handful of magic signatures, then extension
/// lookup, then `application/octet-stream`.
#[derive(Clone, Copy, Debug, Default)]
pub struct GuessResolver;

impl MimeResolver for GuessResolver {
    fn resolve(&self, path: &Path, magic: &[u8]) -> mime::Mime {
        if let Some(sniffed) = sniff(magic) {
            return sniffed;
        }
        mime_guess::from_path(path).first_or_octet_stream()
    }
}

fn sniff(magic: &[u8]) -> Option<mime::Mime> {
    const TABLE: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b", "application/gzip"),
    ];
    TABLE
        .iter()
        .find(|(prefix, _)| magic.starts_with(prefix))
        .and_then(|(_, mime)| mime.parse().ok())
}

/// Fetches the info for `path`, reusing the cached entry when its
/// `(size, mtime)` still matches the metadata the caller just statted.
pub(crate) async fn file_info(
    path: &Path,
    metadata: &std::fs::Metadata,
    resolver: &dyn MimeResolver,
) -> io::Result<Rc<FileInfo>> {
    let size = metadata.len();
    let modified = metadata.modified()?;

    let cached = CACHE.with(|c| c.borrow_mut().get(path).cloned());
    if let Some(info) = cached {
        if info.size == size && info.modified == modified {
            return Ok(info);
        }
    }

    let info = Rc::new(compute(path, size, modified, resolver).await?);
    CACHE.with(|c| {
        c.borrow_mut().put(path.to_owned(), info.clone());
    });
    Ok(info)
}

/// One full pass over the file: hash every byte, keep the magic prefix for
/// sniffing. The handle is dropped before returning.
async fn compute(
    path: &Path,
    size: u64,
    modified: SystemTime,
    resolver: &dyn MimeResolver,
) -> io::Result<FileInfo> {
    let file = monoio::fs::File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut magic = Vec::with_capacity(resolver.magic_len());
    let mut pos = 0u64;
    loop {
        let buf = vec![0u8; CHUNK_SIZE];
        let (res, buf) = file.read_at(buf, pos).await;
        let n = res?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        if magic.len() < resolver.magic_len() {
            let want = resolver.magic_len() - magic.len();
            magic.extend_from_slice(&buf[..want.min(n)]);
        }
        pos += n as u64;
    }
    let etag = EntityTag::strong(hex::encode(hasher.finalize()));
    let mime = resolver.resolve(path, &magic);
    Ok(FileInfo {
        size,
        modified,
        etag,
        mime,
    })
}
