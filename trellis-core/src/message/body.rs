//! Single-read streaming message bodies.
//!
//! A body is an opaque, pull-based byte stream with an optional declared
//! content length and media type. The stream is consumed at most once:
//! after a take or a read, any further consumption fails deterministically
//! so a broken handler cannot silently re-read a socket. Because the
//! stream is pulled chunk by chunk, back-pressure falls out naturally: the
//! producer only runs when the consumer awaits the next chunk.

use std::{cell::RefCell, io};

use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};

use super::typed::MediaType;

/// The chunk stream a body is made of. Local (not `Send`): bodies never
/// leave their worker.
pub type ByteStream = futures_util::stream::LocalBoxStream<'static, io::Result<Bytes>>;

/// Body consumption errors.
#[derive(thiserror::Error, Debug)]
pub enum BodyError {
    #[error("body stream was already consumed")]
    AlreadyConsumed,
    #[error("body exceeds the permitted {limit} bytes")]
    TooLarge { limit: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An opaque byte stream with optional length and media type.
pub struct Body {
    stream: RefCell<Option<ByteStream>>,
    content_length: Option<u64>,
    body_type: Option<MediaType>,
}

impl Body {
    /// An empty body with a declared length of zero.
    pub fn empty() -> Self {
        Self {
            stream: RefCell::new(Some(stream::empty().boxed_local())),
            content_length: Some(0),
            body_type: None,
        }
    }

    /// A body over an in-memory chunk; the length is declared.
    pub fn from_bytes(bytes: Bytes) -> Self {
        let len = bytes.len() as u64;
        Self {
            stream: RefCell::new(Some(stream::once(async move { Ok(bytes) }).boxed_local())),
            content_length: Some(len),
            body_type: None,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        let mut body = Self::from_bytes(Bytes::from(text.into()));
        body.body_type = Some(MediaType::with_encoding(mime::TEXT_PLAIN, "utf-8"));
        body
    }

    /// A body over an arbitrary stream.
    pub fn from_stream(
        stream: ByteStream,
        content_length: Option<u64>,
        body_type: Option<MediaType>,
    ) -> Self {
        Self {
            stream: RefCell::new(Some(stream)),
            content_length,
            body_type,
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn body_type(&self) -> Option<&MediaType> {
        self.body_type.as_ref()
    }

    pub fn with_body_type(mut self, body_type: MediaType) -> Self {
        self.body_type = Some(body_type);
        self
    }

    /// Whether the stream has been consumed already.
    pub fn is_consumed(&self) -> bool {
        self.stream.borrow().is_none()
    }

    /// Takes the chunk stream. The single consumption of this body.
    pub fn take_stream(&self) -> Result<ByteStream, BodyError> {
        self.stream
            .borrow_mut()
            .take()
            .ok_or(BodyError::AlreadyConsumed)
    }

    /// Collects the whole body into memory, consuming the stream.
    ///
    /// With `max_length` set, a declared content length above the limit
    /// fails before any chunk is pulled, and an undeclared stream fails as
    /// soon as the cumulative size passes the limit, leaving the connection
    /// usable for the next request.
    pub async fn read(&self, max_length: Option<u64>) -> Result<Bytes, BodyError> {
        if let (Some(limit), Some(declared)) = (max_length, self.content_length) {
            if declared > limit {
                return Err(BodyError::TooLarge { limit });
            }
        }
        let mut stream = self.take_stream()?;
        let mut buf = BytesMut::with_capacity(
            self.content_length.unwrap_or(0).min(64 * 1024) as usize
        );
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(limit) = max_length {
                if (buf.len() + chunk.len()) as u64 > limit {
                    return Err(BodyError::TooLarge { limit });
                }
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("content_length", &self.content_length)
            .field("body_type", &self.body_type)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[monoio::test]
    async fn reads_collect_all_chunks() {
        let chunks = vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))];
        let body = Body::from_stream(stream::iter(chunks).boxed_local(), None, None);
        let bytes = body.read(None).await.unwrap();
        assert_eq!(&bytes[..], b"hello world");
    }

    #[monoio::test]
    async fn second_read_fails_deterministically() {
        let body = Body::from_bytes(Bytes::from_static(b"x"));
        body.read(None).await.unwrap();
        assert!(matches!(
            body.read(None).await,
            Err(BodyError::AlreadyConsumed)
        ));
        assert!(matches!(
            body.take_stream(),
            Err(BodyError::AlreadyConsumed)
        ));
    }

    #[monoio::test]
    async fn declared_oversize_fails_before_reading() {
        let body = Body::from_stream(
            stream::once(async { Ok(Bytes::from(vec![0u8; 100])) }).boxed_local(),
            Some(100),
            None,
        );
        assert!(matches!(
            body.read(Some(10)).await,
            Err(BodyError::TooLarge { limit: 10 })
        ));
        // The stream was not consumed by the short-circuit.
        assert!(!body.is_consumed());
    }

    #[monoio::test]
    async fn unknown_length_fails_at_the_limit() {
        let chunks = (0..10).map(|_| Ok(Bytes::from(vec![0u8; 10])));
        let body = Body::from_stream(stream::iter(chunks).boxed_local(), None, None);
        assert!(matches!(
            body.read(Some(35)).await,
            Err(BodyError::TooLarge { limit: 35 })
        ));
    }

    #[monoio::test]
    async fn empty_body_has_zero_length() {
        let body = Body::empty();
        assert_eq!(body.content_length(), Some(0));
        assert!(body.read(None).await.unwrap().is_empty());
    }
}
