//! Part byte ranges and the `Content-Range` wire format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The byte range of one part within an archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartRange {
    /// Zero-based part index.
    pub index: u64,
    /// Offset of the first byte.
    pub start: u64,
    /// Number of bytes; never zero for a real part.
    pub length: u64,
}

impl PartRange {
    /// Range of part `index` for an archive of `size` bytes split in `part_size` parts.
    ///
    /// Returns `None` when `index` is not a valid part index.
    pub fn for_part(index: u64, size: u64, part_size: u64) -> Option<Self> {
        let start = index.checked_mul(part_size)?;
        if start >= size {
            return None;
        }
        let length = part_size.min(size - start);
        Some(Self {
            index,
            start,
            length,
        })
    }

    /// Offset of the last byte (inclusive).
    pub fn end_inclusive(&self) -> u64 {
        self.start + self.length - 1
    }

    /// Offset one past the last byte.
    pub fn end_exclusive(&self) -> u64 {
        self.start + self.length
    }

    /// The `Content-Range` header value for this part.
    pub fn content_range(&self) -> ContentRange {
        ContentRange {
            start: self.start,
            end: self.end_inclusive(),
        }
    }
}

/// A `bytes {start}-{end}/*` range with an inclusive end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
}

impl ContentRange {
    /// Length in bytes.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Parse a `bytes {start}-{end}/*` header value.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let invalid = || crate::Error::InvalidContentRange(s.to_string());

        let rest = s.strip_prefix("bytes ").ok_or_else(invalid)?;
        let span = rest.strip_suffix("/*").ok_or_else(invalid)?;
        let (start, end) = parse_span(span).ok_or_else(invalid)?;
        Ok(Self { start, end })
    }

    /// Parse the bare `{start}-{end}` form used in part listings.
    pub fn parse_span(s: &str) -> crate::Result<Self> {
        let (start, end) =
            parse_span(s).ok_or_else(|| crate::Error::InvalidContentRange(s.to_string()))?;
        Ok(Self { start, end })
    }
}

fn parse_span(span: &str) -> Option<(u64, u64)> {
    let (start, end) = span.split_once('-')?;
    if start.is_empty() || end.is_empty() {
        return None;
    }
    if !start.bytes().all(|b| b.is_ascii_digit()) || !end.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    (end >= start).then_some((start, end))
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/*", self.start, self.end)
    }
}
