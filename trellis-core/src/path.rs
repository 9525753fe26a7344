//! Canonical, interned URL paths.
//!
//! A [`NormalizedPath`] is the canonical form of a URL path: it begins with
//! `/`, has no trailing `/` (except for the root itself), carries no empty
//! or `.` segments, and has `..` resolved against the segment list. Equality
//! and hashing are structural over the segment sequence.
//!
//! Normalization consults a per-worker LRU cache keyed by both the raw input
//! and the canonical rendering, so equal paths usually share one allocation.
//! Interning is a performance optimization only; it never changes semantics.

use std::{
    cell::RefCell,
    fmt,
    hash::{Hash, Hasher},
    num::NonZeroUsize,
    rc::Rc,
};

use lru::LruCache;

/// Capacity of the per-worker interning cache.
const INTERN_CAPACITY: usize = 1024;

thread_local! {
    static INTERN: RefCell<LruCache<String, NormalizedPath>> =
        RefCell::new(LruCache::new(NonZeroUsize::new(INTERN_CAPACITY).unwrap()));
}

#[derive(Debug)]
struct Inner {
    segments: Vec<String>,
    rendered: String,
}

/// A canonical URL path: ordered non-empty segments behind a shared
/// allocation.
#[derive(Clone, Debug)]
pub struct NormalizedPath(Rc<Inner>);

impl NormalizedPath {
    /// Normalizes `raw` into its canonical form, consulting the intern
    /// cache first.
    ///
    /// Empty segments are collapsed, `.` is dropped, and `..` pops the
    /// previous segment (a `..` at the root is silently discarded).
    pub fn normalize(raw: &str) -> Self {
        if let Some(hit) = INTERN.with(|c| c.borrow_mut().get(raw).cloned()) {
            return hit;
        }
        let path = Self::build(raw);
        INTERN.with(|c| {
            let mut cache = c.borrow_mut();
            cache.put(raw.to_owned(), path.clone());
            if path.as_str() != raw {
                cache.put(path.as_str().to_owned(), path.clone());
            }
        });
        path
    }

    fn build(raw: &str) -> Self {
        let mut segments: Vec<String> = Vec::new();
        for seg in raw.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s.to_owned()),
            }
        }
        Self::from_segments(segments)
    }

    /// The root path, `/`.
    pub fn root() -> Self {
        Self::from_segments(Vec::new())
    }

    /// Builds a path directly from canonical segments.
    ///
    /// The segments must already be non-empty and free of `.`/`..`; this is
    /// the constructor the trie uses when reassembling matched prefixes.
    pub fn from_segments(segments: Vec<String>) -> Self {
        let rendered = render(&segments);
        Self(Rc::new(Inner { segments, rendered }))
    }

    /// The canonical segment sequence.
    pub fn segments(&self) -> &[String] {
        &self.0.segments
    }

    /// Number of segments; zero for the root.
    pub fn len(&self) -> usize {
        self.0.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.segments.is_empty()
    }

    /// The rendered form. Always begins with `/`.
    pub fn as_str(&self) -> &str {
        &self.0.rendered
    }

    /// A sub-path over segments `[start, end)`; `end` defaults to the end.
    ///
    /// Out-of-range indices are clamped.
    pub fn sub_path(&self, start: usize, end: Option<usize>) -> Self {
        let len = self.len();
        let start = start.min(len);
        let end = end.unwrap_or(len).min(len).max(start);
        Self::from_segments(self.0.segments[start..end].to_vec())
    }

    /// Concatenates two canonical paths.
    pub fn join(&self, other: &NormalizedPath) -> Self {
        if other.is_root() {
            return self.clone();
        }
        let mut segments = self.0.segments.clone();
        segments.extend(other.0.segments.iter().cloned());
        Self::from_segments(segments)
    }
}

fn render(segments: &[String]) -> String {
    if segments.is_empty() {
        return "/".to_owned();
    }
    let mut out = String::with_capacity(segments.iter().map(|s| s.len() + 1).sum());
    for seg in segments {
        out.push('/');
        out.push_str(seg);
    }
    out
}

impl PartialEq for NormalizedPath {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0.segments == other.0.segments
    }
}

impl Eq for NormalizedPath {}

impl Hash for NormalizedPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.segments.hash(state);
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for NormalizedPath {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dots_and_empty_segments() {
        assert_eq!(NormalizedPath::normalize("/a//b/./c").as_str(), "/a/b/c");
        assert_eq!(NormalizedPath::normalize("a/b/").as_str(), "/a/b");
        assert_eq!(NormalizedPath::normalize("/a/b/../c").as_str(), "/a/c");
        assert_eq!(NormalizedPath::normalize("/../..").as_str(), "/");
        assert_eq!(NormalizedPath::normalize("").as_str(), "/");
        assert_eq!(NormalizedPath::normalize("/").as_str(), "/");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["/a//b/../c/.", "x/y/z", "/", "//", "/.."] {
            let once = NormalizedPath::normalize(raw);
            let twice = NormalizedPath::normalize(once.as_str());
            assert_eq!(once, twice);
            assert!(once.as_str().starts_with('/'));
        }
    }

    #[test]
    fn equality_is_structural() {
        let a = NormalizedPath::normalize("/a/b");
        let b = NormalizedPath::from_segments(vec!["a".into(), "b".into()]);
        assert_eq!(a, b);

        use std::collections::hash_map::DefaultHasher;
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn interning_shares_representation() {
        let a = NormalizedPath::normalize("/x/y");
        let b = NormalizedPath::normalize("/x/y");
        assert!(Rc::ptr_eq(&a.0, &b.0));
        // The canonical rendering of a messy input hits the same entry.
        let c = NormalizedPath::normalize("/x//y/");
        assert_eq!(a, c);
    }

    #[test]
    fn sub_path_and_join_round_trip() {
        let p = NormalizedPath::normalize("/a/b/c/d");
        let head = p.sub_path(0, Some(2));
        let tail = p.sub_path(2, None);
        assert_eq!(head.as_str(), "/a/b");
        assert_eq!(tail.as_str(), "/c/d");
        assert_eq!(head.join(&tail), p);
        assert_eq!(p.sub_path(4, None).as_str(), "/");
        assert_eq!(p.join(&NormalizedPath::root()), p);
    }
}
