//! HTTP byte-range calculation.
//!
//! [`resolve_range`] is a pure function: it takes the raw `Range` header (if
//! any) and the authoritative file size and produces the window to serve.
//! Only the single-range form `bytes=<start>-[<end>]` is accepted.

use vr_core::config::RangePolicy;
use vr_core::{Error, Result};

/// An inclusive byte window inside a resource of `total` bytes.
///
/// Invariant: `start <= end < total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
    total: u64,
}

impl ByteRange {
    /// Build a range, returning `None` if the invariant does not hold.
    pub fn new(start: u64, end: u64, total: u64) -> Option<Self> {
        (start <= end && end < total).then_some(Self { start, end, total })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of bytes in the window.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a `ByteRange` holds at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` header value for a 206 response.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// What to serve for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeWindow {
    /// No range requested: the whole file, status 200.
    Full(ByteRange),
    /// A satisfiable range: status 206 with `Content-Range`.
    Partial(ByteRange),
    /// No range requested on a zero-byte file: status 200, empty body.
    Empty,
}

impl ServeWindow {
    pub fn is_partial(&self) -> bool {
        matches!(self, ServeWindow::Partial(_))
    }

    /// Number of body bytes.
    pub fn len(&self) -> u64 {
        match self {
            ServeWindow::Full(r) | ServeWindow::Partial(r) => r.len(),
            ServeWindow::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> Option<&ByteRange> {
        match self {
            ServeWindow::Full(r) | ServeWindow::Partial(r) => Some(r),
            ServeWindow::Empty => None,
        }
    }
}

/// Compute the serving window for an optional `Range` header value.
///
/// # Errors
///
/// - [`Error::MalformedRange`] if the value is not `bytes=N-[M]`.
/// - [`Error::RangeOutOfBounds`] if `N >= size`.
/// - Under [`RangePolicy::Strict`], an end before the start is malformed and an
///   end at or past `size` is out of bounds; [`RangePolicy::Clamp`] clamps both
///   to `size - 1`.
pub fn resolve_range(spec: Option<&str>, size: u64, policy: RangePolicy) -> Result<ServeWindow> {
    let Some(raw) = spec else {
        return Ok(match ByteRange::new(0, size.saturating_sub(1), size) {
            Some(r) => ServeWindow::Full(r),
            None => ServeWindow::Empty,
        });
    };

    let malformed = || Error::MalformedRange {
        value: raw.to_string(),
        size,
    };

    let (start, end) = parse_spec(raw).ok_or_else(malformed)?;

    if start >= size {
        return Err(Error::RangeOutOfBounds { start, size });
    }

    let last = size - 1;
    let end = match end {
        None => last,
        Some(end) if end < start => match policy {
            RangePolicy::Clamp => last,
            RangePolicy::Strict => return Err(malformed()),
        },
        Some(end) if end > last => match policy {
            RangePolicy::Clamp => last,
            RangePolicy::Strict => return Err(Error::RangeOutOfBounds { start: end, size }),
        },
        Some(end) => end,
    };

    ByteRange::new(start, end, size)
        .map(ServeWindow::Partial)
        .ok_or_else(|| Error::Internal(format!("range {start}-{end} violates size {size}")))
}

/// Parse `bytes=<start>-[<end>]` into its numeric parts.
fn parse_spec(raw: &str) -> Option<(u64, Option<u64>)> {
    let rest = raw.trim().strip_prefix("bytes=")?;
    let (start, end) = rest.split_once('-')?;

    let start = parse_digits(start.trim())?;
    let end = match end.trim() {
        "" => None,
        e => Some(parse_digits(e)?),
    };

    Some((start, end))
}

/// Strict unsigned decimal; `u64::from_str` would also accept a leading `+`.
fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
