//! Parsed views over raw header values.
//!
//! Raw string storage stays authoritative in [`Headers`](super::Headers);
//! these types are the typed lenses the static engine and conditional
//! request logic work with.

use std::{
    fmt::{self, Display, Formatter},
    ops::Range,
    time::{Duration, SystemTime},
};

/// A strong or weak entity tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityTag {
    weak: bool,
    tag: String,
}

impl EntityTag {
    /// A strong tag. The value is the opaque quoted part, without quotes.
    pub fn strong(tag: impl Into<String>) -> Self {
        Self {
            weak: false,
            tag: tag.into(),
        }
    }

    pub fn weak(tag: impl Into<String>) -> Self {
        Self {
            weak: true,
            tag: tag.into(),
        }
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Parses `"abc"` or `W/"abc"`. Unquoted values are tolerated the way
    /// lenient servers treat them.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (weak, rest) = match s.strip_prefix("W/") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let tag = rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')).unwrap_or(rest);
        if tag.contains('"') {
            return None;
        }
        Some(Self {
            weak,
            tag: tag.to_owned(),
        })
    }

    /// Strong comparison: both tags strong and octet-identical.
    pub fn strong_eq(&self, other: &EntityTag) -> bool {
        !self.weak && !other.weak && self.tag == other.tag
    }

    /// Weak comparison: tags octet-identical, weakness ignored.
    pub fn weak_eq(&self, other: &EntityTag) -> bool {
        self.tag == other.tag
    }
}

impl Display for EntityTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.weak {
            f.write_str("W/")?;
        }
        write!(f, "\"{}\"", self.tag)
    }
}

/// The parsed `If-None-Match` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IfNoneMatch {
    Any,
    Tags(Vec<EntityTag>),
}

impl IfNoneMatch {
    pub fn parse(s: &str) -> Option<Self> {
        if s.trim() == "*" {
            return Some(IfNoneMatch::Any);
        }
        let tags: Vec<EntityTag> = s
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .filter_map(EntityTag::parse)
            .collect();
        if tags.is_empty() {
            return None;
        }
        Some(IfNoneMatch::Tags(tags))
    }

    /// Whether the header validates `etag` (weak comparison, as conditional
    /// GET semantics use).
    pub fn matches(&self, etag: &EntityTag) -> bool {
        match self {
            IfNoneMatch::Any => true,
            IfNoneMatch::Tags(tags) => tags.iter().any(|t| t.weak_eq(etag)),
        }
    }
}

/// One element of a `Range: bytes=` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeSpec {
    /// `S-E`, inclusive on both ends.
    FromTo(u64, u64),
    /// `S-`, from offset to the end.
    From(u64),
    /// `-N`, the final N bytes.
    Suffix(u64),
}

impl RangeSpec {
    /// Resolves against a resource of `len` bytes into a clamped half-open
    /// range, or `None` when unsatisfiable (start at or past the end, or an
    /// empty result after clamping).
    pub fn resolve(self, len: u64) -> Option<Range<u64>> {
        let (start, end) = match self {
            RangeSpec::FromTo(s, e) => (s, e.saturating_add(1).min(len)),
            RangeSpec::From(s) => (s, len),
            RangeSpec::Suffix(n) => {
                if n == 0 {
                    return None;
                }
                (len.saturating_sub(n), len)
            }
        };
        if start >= end || start >= len {
            return None;
        }
        Some(start..end)
    }
}

/// A parsed `Range` header: an ordered list of byte range specs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RangeSet(pub Vec<RangeSpec>);

impl RangeSet {
    /// Parses `bytes=0-9,20-,-5`. Returns `None` for other units or
    /// syntactically hopeless input; individual malformed elements are
    /// dropped.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.trim().strip_prefix("bytes=")?;
        let mut specs = Vec::new();
        for part in rest.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let spec = if let Some(n) = part.strip_prefix('-') {
                RangeSpec::Suffix(n.parse().ok()?)
            } else {
                let (start, end) = part.split_once('-')?;
                let start: u64 = start.trim().parse().ok()?;
                match end.trim() {
                    "" => RangeSpec::From(start),
                    e => {
                        let end: u64 = e.parse().ok()?;
                        if end < start {
                            return None;
                        }
                        RangeSpec::FromTo(start, end)
                    }
                }
            };
            specs.push(spec);
        }
        if specs.is_empty() {
            return None;
        }
        Some(Self(specs))
    }

    /// Resolves every spec against `len`, dropping unsatisfiable elements.
    pub fn resolve(&self, len: u64) -> Vec<Range<u64>> {
        self.0.iter().filter_map(|s| s.resolve(len)).collect()
    }
}

/// A `Content-Range` value: `bytes S-E/L` or `bytes */L` for 416.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentRange {
    /// Inclusive byte positions, absent in the unsatisfied form.
    pub range: Option<(u64, u64)>,
    pub complete_length: Option<u64>,
}

impl ContentRange {
    /// The satisfied form for a half-open range within `len` bytes.
    pub fn bytes(range: Range<u64>, len: u64) -> Self {
        Self {
            range: Some((range.start, range.end.saturating_sub(1))),
            complete_length: Some(len),
        }
    }

    /// The `bytes */L` form used on 416.
    pub fn unsatisfied(len: u64) -> Self {
        Self {
            range: None,
            complete_length: Some(len),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.trim().strip_prefix("bytes ")?;
        let (range, len) = rest.split_once('/')?;
        let complete_length = match len.trim() {
            "*" => None,
            l => Some(l.parse().ok()?),
        };
        let range = match range.trim() {
            "*" => None,
            r => {
                let (s, e) = r.split_once('-')?;
                Some((s.parse().ok()?, e.parse().ok()?))
            }
        };
        Some(Self {
            range,
            complete_length,
        })
    }
}

impl Display for ContentRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("bytes ")?;
        match self.range {
            Some((s, e)) => write!(f, "{s}-{e}")?,
            None => f.write_str("*")?,
        }
        match self.complete_length {
            Some(l) => write!(f, "/{l}"),
            None => f.write_str("/*"),
        }
    }
}

/// A parsed `If-Range` value: an entity tag or an HTTP date.
#[derive(Clone, Debug)]
pub enum IfRange {
    Tag(EntityTag),
    Date(SystemTime),
}

impl IfRange {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        // Dates never contain `"`; a tag always does (or is weak-prefixed).
        if s.starts_with('"') || s.starts_with("W/") {
            return EntityTag::parse(s).map(IfRange::Tag);
        }
        httpdate::parse_http_date(s).ok().map(IfRange::Date)
    }

    /// Whether the validator still matches the representation. Entity tags
    /// use strong comparison; dates must equal the last modification time
    /// at one-second granularity.
    pub fn matches(&self, etag: &EntityTag, last_modified: SystemTime) -> bool {
        match self {
            IfRange::Tag(tag) => tag.strong_eq(etag),
            IfRange::Date(date) => {
                to_secs(*date) == to_secs(last_modified)
            }
        }
    }
}

fn to_secs(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A `Cache-Control` response value, built directive by directive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: Vec<String>,
}

impl CacheControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public(mut self) -> Self {
        self.directives.push("public".into());
        self
    }

    pub fn private(mut self) -> Self {
        self.directives.push("private".into());
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.directives.push("no-cache".into());
        self
    }

    pub fn no_store(mut self) -> Self {
        self.directives.push("no-store".into());
        self
    }

    pub fn immutable(mut self) -> Self {
        self.directives.push("immutable".into());
        self
    }

    pub fn max_age(mut self, age: Duration) -> Self {
        self.directives.push(format!("max-age={}", age.as_secs()));
        self
    }

    pub fn parse(s: &str) -> Self {
        Self {
            directives: s
                .split(',')
                .map(|d| d.trim().to_owned())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn has(&self, directive: &str) -> bool {
        self.directives
            .iter()
            .any(|d| d.eq_ignore_ascii_case(directive) || d.split('=').next() == Some(directive))
    }
}

impl Display for CacheControl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.directives.join(", "))
    }
}

/// A media type with optional content encoding; the `body_type` of a body.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaType {
    pub mime: mime::Mime,
    pub encoding: Option<String>,
}

impl MediaType {
    pub fn new(mime: mime::Mime) -> Self {
        Self {
            mime,
            encoding: None,
        }
    }

    pub fn with_encoding(mime: mime::Mime, encoding: impl Into<String>) -> Self {
        Self {
            mime,
            encoding: Some(encoding.into()),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let mime: mime::Mime = s.trim().parse().ok()?;
        let encoding = mime.get_param(mime::CHARSET).map(|c| c.to_string());
        Some(Self { mime, encoding })
    }

    /// Renders as a `Content-Type` value.
    pub fn render(&self) -> String {
        match (&self.encoding, self.mime.get_param(mime::CHARSET)) {
            (Some(enc), None) => format!("{}; charset={}", self.mime.essence_str(), enc),
            _ => self.mime.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_tag_parse_and_compare() {
        let strong = EntityTag::parse("\"abc\"").unwrap();
        assert!(!strong.is_weak());
        assert_eq!(strong.tag(), "abc");
        assert_eq!(strong.to_string(), "\"abc\"");

        let weak = EntityTag::parse("W/\"abc\"").unwrap();
        assert!(weak.is_weak());
        assert!(weak.weak_eq(&strong));
        assert!(!weak.strong_eq(&strong));
        assert!(strong.strong_eq(&EntityTag::strong("abc")));
    }

    #[test]
    fn if_none_match_star_and_lists() {
        assert_eq!(IfNoneMatch::parse("*"), Some(IfNoneMatch::Any));
        let inm = IfNoneMatch::parse("\"a\", W/\"b\"").unwrap();
        assert!(inm.matches(&EntityTag::strong("a")));
        assert!(inm.matches(&EntityTag::strong("b")));
        assert!(!inm.matches(&EntityTag::strong("c")));
    }

    #[test]
    fn range_parsing() {
        let set = RangeSet::parse("bytes=0-9,20-,-5").unwrap();
        assert_eq!(
            set.0,
            vec![
                RangeSpec::FromTo(0, 9),
                RangeSpec::From(20),
                RangeSpec::Suffix(5)
            ]
        );
        assert!(RangeSet::parse("lines=1-2").is_none());
        assert!(RangeSet::parse("bytes=9-1").is_none());
        assert!(RangeSet::parse("bytes=").is_none());
    }

    #[test]
    fn range_resolution_clamps_and_rejects() {
        assert_eq!(RangeSpec::FromTo(0, 9).resolve(100), Some(0..10));
        assert_eq!(RangeSpec::FromTo(90, 150).resolve(100), Some(90..100));
        assert_eq!(RangeSpec::From(95).resolve(100), Some(95..100));
        assert_eq!(RangeSpec::Suffix(5).resolve(100), Some(95..100));
        assert_eq!(RangeSpec::Suffix(500).resolve(100), Some(0..100));
        assert_eq!(RangeSpec::FromTo(200, 299).resolve(100), None);
        assert_eq!(RangeSpec::From(100).resolve(100), None);
        assert_eq!(RangeSpec::Suffix(0).resolve(100), None);
    }

    #[test]
    fn content_range_renders_both_forms() {
        assert_eq!(ContentRange::bytes(0..10, 100).to_string(), "bytes 0-9/100");
        assert_eq!(ContentRange::unsatisfied(100).to_string(), "bytes */100");
        let parsed = ContentRange::parse("bytes 0-9/100").unwrap();
        assert_eq!(parsed.range, Some((0, 9)));
        assert_eq!(parsed.complete_length, Some(100));
    }

    #[test]
    fn if_range_distinguishes_tags_from_dates() {
        assert!(matches!(
            IfRange::parse("\"abc\""),
            Some(IfRange::Tag(_))
        ));
        assert!(matches!(
            IfRange::parse("Sun, 06 Nov 1994 08:49:37 GMT"),
            Some(IfRange::Date(_))
        ));
        let etag = EntityTag::strong("abc");
        let now = SystemTime::now();
        assert!(IfRange::Tag(etag.clone()).matches(&etag, now));
        assert!(!IfRange::Tag(EntityTag::weak("abc")).matches(&etag, now));
        assert!(IfRange::Date(now).matches(&etag, now));
    }

    #[test]
    fn cache_control_builder_renders_directives() {
        let cc = CacheControl::new().public().max_age(Duration::from_secs(3600));
        assert_eq!(cc.to_string(), "public, max-age=3600");
        let parsed = CacheControl::parse("no-cache, max-age=0");
        assert!(parsed.has("no-cache"));
        assert!(parsed.has("max-age"));
    }

    #[test]
    fn media_type_round_trips_charset() {
        let mt = MediaType::parse("text/html; charset=utf-8").unwrap();
        assert_eq!(mt.mime.essence_str(), "text/html");
        assert_eq!(mt.encoding.as_deref(), Some("utf-8"));
        let plain = MediaType::with_encoding(mime::TEXT_PLAIN, "utf-8");
        assert_eq!(plain.render(), "text/plain; charset=utf-8");
    }
}
