//! Line boundary detection for text protocol headers.

use memchr::memchr;
use thiserror::Error;

/// A line exceeded the configured maximum length.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("line exceeds {limit} bytes")]
pub struct LineTooLong {
    /// Configured maximum line length.
    pub limit: usize,
}

/// A complete line found at the start of the buffered input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line {
    len: usize,
    consumed: usize,
}

impl Line {
    /// The line content without its terminator.
    #[must_use]
    pub fn content<'a>(&self, input: &'a [u8]) -> &'a [u8] { &input[..self.len] }

    /// Bytes to drop from the input, terminator included.
    #[must_use]
    pub fn consumed(&self) -> usize { self.consumed }

    /// Whether the line is empty (a bare CRLF or LF).
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len == 0 }
}

/// Finds LF-terminated lines in input that arrives in arbitrary chunks.
///
/// The scanner remembers how many buffered bytes it has already examined,
/// so feeding the same growing buffer again only scans the new bytes. A
/// trailing CR before the LF is stripped from the line content.
#[derive(Debug, Clone)]
pub struct LineScanner {
    scanned: usize,
    max_len: usize,
}

impl LineScanner {
    /// Create a scanner rejecting lines longer than `max_len` bytes.
    #[must_use]
    pub fn new(max_len: usize) -> Self { Self { scanned: 0, max_len } }

    /// Maximum accepted line length.
    #[must_use]
    pub fn max_len(&self) -> usize { self.max_len }

    /// Forget the scan position.
    pub fn reset(&mut self) { self.scanned = 0; }

    /// Look for the next complete line at the start of `input`.
    ///
    /// Returns `Ok(None)` when no terminator has arrived yet. After a line
    /// is returned the caller must drop [`Line::consumed`] bytes from the
    /// front of its buffer before calling again.
    ///
    /// # Errors
    ///
    /// Returns [`LineTooLong`] once the line is known to exceed the limit,
    /// whether or not its terminator has arrived.
    pub fn next_line(&mut self, input: &[u8]) -> Result<Option<Line>, LineTooLong> {
        let start = self.scanned.min(input.len());
        let Some(offset) = memchr(b'\n', &input[start..]) else {
            self.scanned = input.len();
            // One byte of slack for a CR whose LF has not arrived yet.
            if input.len() > self.max_len.saturating_add(1) {
                return Err(LineTooLong {
                    limit: self.max_len,
                });
            }
            return Ok(None);
        };
        let lf = start + offset;
        let len = if lf > 0 && input[lf - 1] == b'\r' { lf - 1 } else { lf };
        self.scanned = 0;
        if len > self.max_len {
            return Err(LineTooLong {
                limit: self.max_len,
            });
        }
        Ok(Some(Line { len, consumed: lf + 1 }))
    }
}
