//! The sealed header collection.
//!
//! [`Headers`] wraps an `http::HeaderMap`: an ordered multimap with
//! case-insensitive lookup keyed by the canonical lowercase name. Writes go
//! through [`HeadersBuilder`], which validates per-header constraints for
//! the names the core understands; once sealed, a collection is immutable
//! and cheap to share.

use std::{rc::Rc, time::SystemTime};

use http::header::{self, HeaderMap, HeaderName, HeaderValue};

use super::{
    method::MethodSet,
    typed::{CacheControl, ContentRange, EntityTag, IfNoneMatch, IfRange, MediaType, RangeSet},
    Method,
};

/// Header validation errors. These are programmer errors and fail eagerly.
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("invalid header name `{0}`")]
    InvalidName(String),
    #[error("invalid value for header `{name}`: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// An immutable, sealed header collection.
#[derive(Clone, Debug, Default)]
pub struct Headers {
    map: Rc<HeaderMap>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> HeadersBuilder {
        HeadersBuilder {
            map: HeaderMap::new(),
        }
    }

    /// A builder seeded with a copy of this collection.
    pub fn to_builder(&self) -> HeadersBuilder {
        HeadersBuilder {
            map: (*self.map).clone(),
        }
    }

    /// First value for `name`, as a string. Non-UTF-8 values read as
    /// absent from the string view; the raw bytes stay available through
    /// [`Headers::raw`].
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.map
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The underlying raw storage.
    pub fn raw(&self) -> &HeaderMap {
        &self.map
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v)))
    }

    // Typed accessors. Raw storage stays authoritative; parse failures
    // read as absence.

    pub fn content_length(&self) -> Option<u64> {
        self.get(header::CONTENT_LENGTH.as_str())?.trim().parse().ok()
    }

    pub fn content_type(&self) -> Option<MediaType> {
        MediaType::parse(self.get(header::CONTENT_TYPE.as_str())?)
    }

    pub fn etag(&self) -> Option<EntityTag> {
        EntityTag::parse(self.get(header::ETAG.as_str())?)
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        httpdate::parse_http_date(self.get(header::LAST_MODIFIED.as_str())?).ok()
    }

    pub fn if_modified_since(&self) -> Option<SystemTime> {
        httpdate::parse_http_date(self.get(header::IF_MODIFIED_SINCE.as_str())?).ok()
    }

    pub fn if_none_match(&self) -> Option<IfNoneMatch> {
        IfNoneMatch::parse(self.get(header::IF_NONE_MATCH.as_str())?)
    }

    pub fn if_range(&self) -> Option<IfRange> {
        IfRange::parse(self.get(header::IF_RANGE.as_str())?)
    }

    pub fn range(&self) -> Option<RangeSet> {
        RangeSet::parse(self.get(header::RANGE.as_str())?)
    }

    pub fn content_range(&self) -> Option<ContentRange> {
        ContentRange::parse(self.get(header::CONTENT_RANGE.as_str())?)
    }

    pub fn cache_control(&self) -> Option<CacheControl> {
        self.get(header::CACHE_CONTROL.as_str()).map(CacheControl::parse)
    }

    pub fn allow(&self) -> Option<MethodSet> {
        let value = self.get(header::ALLOW.as_str())?;
        Some(
            value
                .split(',')
                .filter_map(|m| m.trim().parse::<Method>().ok())
                .collect(),
        )
    }

    /// Accepted media types, in header order. Quality weights are kept as
    /// mime parameters.
    pub fn accept(&self) -> Vec<MediaType> {
        self.get(header::ACCEPT.as_str())
            .map(|v| v.split(',').filter_map(MediaType::parse).collect())
            .unwrap_or_default()
    }

    pub fn transfer_encoding(&self) -> Option<&str> {
        self.get(header::TRANSFER_ENCODING.as_str())
    }

    pub fn location(&self) -> Option<&str> {
        self.get(header::LOCATION.as_str())
    }

    /// The `Host` header, lowercased, with any port stripped. This is the
    /// canonical virtual-hosting key.
    pub fn host(&self) -> Option<String> {
        let raw = self.get(header::HOST.as_str())?;
        let host = match raw.rsplit_once(':') {
            // Only strip a port, not the tail of an IPv6 literal.
            Some((head, tail)) if tail.chars().all(|c| c.is_ascii_digit()) => head,
            _ => raw,
        };
        Some(host.trim().to_ascii_lowercase())
    }
}

impl From<HeaderMap> for Headers {
    fn from(map: HeaderMap) -> Self {
        Self { map: Rc::new(map) }
    }
}

/// Write access to a header collection; sealing produces [`Headers`].
#[derive(Debug, Default)]
pub struct HeadersBuilder {
    map: HeaderMap,
}

impl HeadersBuilder {
    /// Sets `name` to `value`, replacing previous values, after validating
    /// the constraints the core knows for that header.
    pub fn insert(mut self, name: &str, value: &str) -> Result<Self, HeaderError> {
        let (name, value) = validate(name, value)?;
        self.map.insert(name, value);
        Ok(self)
    }

    /// Appends a value without displacing existing ones.
    pub fn append(mut self, name: &str, value: &str) -> Result<Self, HeaderError> {
        let (name, value) = validate(name, value)?;
        self.map.append(name, value);
        Ok(self)
    }

    pub fn remove(mut self, name: &str) -> Self {
        self.map.remove(name);
        self
    }

    // Typed writers for the headers the core emits. These cannot fail:
    // the rendered values are valid by construction.

    pub fn content_length(self, len: u64) -> Self {
        self.insert_valid(header::CONTENT_LENGTH, len.to_string())
    }

    pub fn content_type(self, media: &MediaType) -> Self {
        self.insert_valid(header::CONTENT_TYPE, media.render())
    }

    pub fn etag(self, tag: &EntityTag) -> Self {
        self.insert_valid(header::ETAG, tag.to_string())
    }

    pub fn last_modified(self, when: SystemTime) -> Self {
        self.insert_valid(header::LAST_MODIFIED, httpdate::fmt_http_date(when))
    }

    pub fn cache_control(self, cc: &CacheControl) -> Self {
        if cc.is_empty() {
            return self;
        }
        self.insert_valid(header::CACHE_CONTROL, cc.to_string())
    }

    pub fn allow(self, methods: MethodSet) -> Self {
        self.insert_valid(header::ALLOW, methods.to_string())
    }

    pub fn content_range(self, range: &ContentRange) -> Self {
        self.insert_valid(header::CONTENT_RANGE, range.to_string())
    }

    pub fn accept_ranges_bytes(self) -> Self {
        self.insert_valid(header::ACCEPT_RANGES, "bytes".to_owned())
    }

    pub fn location(self, location: &str) -> Result<Self, HeaderError> {
        self.insert(header::LOCATION.as_str(), location)
    }

    fn insert_valid(mut self, name: HeaderName, value: String) -> Self {
        let value = HeaderValue::from_str(&value)
            .unwrap_or_else(|_| HeaderValue::from_static(""));
        self.map.insert(name, value);
        self
    }

    /// Seals the collection.
    pub fn seal(self) -> Headers {
        Headers {
            map: Rc::new(self.map),
        }
    }
}

/// Validates name and value, plus the per-header constraints the core
/// understands.
fn validate(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HeaderError> {
    let header_name: HeaderName = name
        .parse()
        .map_err(|_| HeaderError::InvalidName(name.to_owned()))?;
    let invalid = |reason: &str| HeaderError::InvalidValue {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };
    let header_value =
        HeaderValue::from_str(value).map_err(|_| invalid("not a legal header value"))?;

    if header_name == header::CONTENT_LENGTH {
        value
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid("expected a non-negative integer"))?;
    } else if header_name == header::DATE
        || header_name == header::LAST_MODIFIED
        || header_name == header::IF_MODIFIED_SINCE
        || header_name == header::EXPIRES
    {
        httpdate::parse_http_date(value).map_err(|_| invalid("expected an HTTP date"))?;
    } else if header_name == header::ETAG {
        EntityTag::parse(value).ok_or_else(|| invalid("expected an entity tag"))?;
    } else if header_name == header::CONTENT_RANGE {
        ContentRange::parse(value).ok_or_else(|| invalid("expected a byte content-range"))?;
    } else if header_name == header::CONTENT_TYPE {
        MediaType::parse(value).ok_or_else(|| invalid("expected a media type"))?;
    }
    Ok((header_name, header_value))
}
