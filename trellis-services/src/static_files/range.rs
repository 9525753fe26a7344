//! Byte-range serving plans.
//!
//! Range math lives in `trellis_core::message::typed`; this module turns
//! resolved ranges into a concrete body plan: the interleaving of literal
//! header bytes and file slices, with the total `Content-Length`
//! precomputed so multipart responses never need chunked framing.

use std::ops::Range;

use bytes::Bytes;
use rand::Rng;
use trellis_core::message::typed::ContentRange;

/// One piece of a response body.
pub(crate) enum Part {
    /// Literal bytes (multipart headers, boundaries).
    Bytes(Bytes),
    /// A slice of the file.
    File(Range<u64>),
}

impl Part {
    fn len(&self) -> u64 {
        match self {
            Part::Bytes(b) => b.len() as u64,
            Part::File(r) => r.end - r.start,
        }
    }
}

/// The body layout for one response: its parts and total byte count.
pub(crate) struct BodyPlan {
    pub parts: Vec<Part>,
    pub total_len: u64,
    /// Set for multipart plans; becomes the `Content-Type`.
    pub content_type: Option<String>,
}

impl BodyPlan {
    /// The whole file.
    pub fn full(len: u64) -> Self {
        Self {
            parts: vec![Part::File(0..len)],
            total_len: len,
            content_type: None,
        }
    }

    /// A single range.
    pub fn single(range: Range<u64>) -> Self {
        let total_len = range.end - range.start;
        Self {
            parts: vec![Part::File(range)],
            total_len,
            content_type: None,
        }
    }

    /// A `multipart/byteranges` body. Every part carries its own
    /// `Content-Type` and `Content-Range`; the terminator is
    /// `\r\n--boundary--\r\n`.
    pub fn multipart(ranges: &[Range<u64>], file_len: u64, mime: &mime::Mime) -> Self {
        let boundary = boundary();
        let mut parts = Vec::with_capacity(ranges.len() * 2 + 1);
        for range in ranges {
            let header = format!(
                "\r\n--{boundary}\r\nContent-Type: {mime}\r\nContent-Range: {}\r\n\r\n",
                ContentRange::bytes(range.clone(), file_len),
            );
            parts.push(Part::Bytes(Bytes::from(header)));
            parts.push(Part::File(range.clone()));
        }
        parts.push(Part::Bytes(Bytes::from(format!("\r\n--{boundary}--\r\n"))));
        let total_len = parts.iter().map(Part::len).sum();
        Self {
            parts,
            total_len,
            content_type: Some(format!("multipart/byteranges; boundary={boundary}")),
        }
    }
}

fn boundary() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}
