//! Newline framing over a byte stream
//!
//! Bytes arrive in arbitrary chunks. The framer keeps whatever follows the
//! last terminator and hands out complete, trimmed, non-empty lines.

use crate::error::AppError;

/// Per-connection line accumulator
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_line_len: usize,
}

impl LineFramer {
    /// Create a framer that rejects more than `max_line_len` unterminated bytes
    pub fn new(max_line_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_len,
        }
    }

    /// Append a chunk and push every line it completes onto `lines`
    ///
    /// `\n` ends a line; a preceding `\r` and surrounding whitespace are
    /// stripped. Blank lines are dropped. Fails once the unterminated
    /// remainder exceeds the configured limit; lines completed by the same
    /// chunk are still pushed first.
    pub fn feed(&mut self, chunk: &[u8], lines: &mut Vec<String>) -> Result<(), AppError> {
        let scanned = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut start = 0;
        // Only the new bytes can contain a terminator
        let mut cursor = scanned;
        while let Some(offset) = self.buf[cursor..].iter().position(|&b| b == b'\n') {
            let end = cursor + offset;
            let line = String::from_utf8_lossy(&self.buf[start..end]);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
            start = end + 1;
            cursor = start;
        }
        self.buf.drain(..start);

        if self.buf.len() > self.max_line_len {
            return Err(AppError::LineTooLong {
                limit: self.max_line_len,
            });
        }
        Ok(())
    }

    /// Bytes held back waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
