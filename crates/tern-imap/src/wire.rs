//! Logical-line framing for the IMAP wire protocol.
//!
//! IMAP responses are CRLF-terminated lines, but a line may end in a literal
//! marker `{n}` in which case the next n bytes (and the line that follows
//! them) belong to the same logical unit. The [`LineBuffer`] accumulates raw
//! socket bytes and yields only complete logical lines, so the lexer never
//! sees a partial literal.

use bytes::BytesMut;

use crate::{Error, Result};

/// Default capacity for the receive accumulator.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum logical line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size to prevent memory exhaustion.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Accumulates raw bytes and splits them into complete logical lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    /// Creates an empty line buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Appends raw bytes received from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Exposes the accumulator for direct socket reads.
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Removes and returns the next complete logical line, without its final
    /// CRLF. Embedded literal markers and their payloads are kept inline.
    ///
    /// Returns `Ok(None)` when no complete line is buffered yet.
    pub fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut scan = 0usize;

        loop {
            let Some(crlf) = find_crlf(&self.buf[scan..]) else {
                if self.buf.len() > MAX_LINE_LENGTH {
                    return Err(Error::Protocol("line too long".to_string()));
                }
                return Ok(None);
            };
            let line_end = scan + crlf + 2;

            match literal_length(&self.buf[..line_end]) {
                Some(len) if len > MAX_LITERAL_SIZE => {
                    return Err(Error::Protocol(format!(
                        "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                    )));
                }
                Some(len) => {
                    // The literal payload and the line after it are part of
                    // this logical line; wait until all of it arrived.
                    if self.buf.len() < line_end + len {
                        return Ok(None);
                    }
                    scan = line_end + len;
                }
                None => {
                    let mut line = self.buf.split_to(line_end).to_vec();
                    line.truncate(line.len() - 2);
                    return Ok(Some(line));
                }
            }
        }
    }

    /// Discards everything buffered so far.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses a literal length from the end of a CRLF-terminated segment,
/// matching `{123}\r\n`.
fn literal_length(line: &[u8]) -> Option<usize> {
    if !line.ends_with(b"\r\n") {
        return None;
    }
    let line = &line[..line.len() - 2];

    if !line.ends_with(b"}") {
        return None;
    }
    let open = line.iter().rposition(|&b| b == b'{')?;

    let num_str = std::str::from_utf8(&line[open + 1..line.len() - 1]).ok()?;
    if num_str.is_empty() {
        return None;
    }
    num_str.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"hello\r\n"), Some(5));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"no newline"), None);
        assert_eq!(find_crlf(b"just\n"), None);
        assert_eq!(find_crlf(b"just\r"), None);
    }

    #[test]
    fn test_literal_length() {
        assert_eq!(literal_length(b"BODY {123}\r\n"), Some(123));
        assert_eq!(literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(literal_length(b"{999999}\r\n"), Some(999_999));
        assert_eq!(literal_length(b"no literal\r\n"), None);
        assert_eq!(literal_length(b"incomplete {123"), None);
        assert_eq!(literal_length(b"wrong {abc}\r\n"), None);
    }

    #[test]
    fn test_simple_line() {
        let mut buf = LineBuffer::new();
        buf.extend(b"* OK ready\r\n");

        assert_eq!(buf.next_line().unwrap().unwrap(), b"* OK ready");
        assert!(buf.next_line().unwrap().is_none());
    }

    #[test]
    fn test_partial_line_held_back() {
        let mut buf = LineBuffer::new();
        buf.extend(b"* OK rea");

        assert!(buf.next_line().unwrap().is_none());

        buf.extend(b"dy\r\n* 3 EXISTS\r\n");
        assert_eq!(buf.next_line().unwrap().unwrap(), b"* OK ready");
        assert_eq!(buf.next_line().unwrap().unwrap(), b"* 3 EXISTS");
    }

    #[test]
    fn test_literal_kept_inline() {
        let mut buf = LineBuffer::new();
        buf.extend(b"* 1 FETCH (BODY {5}\r\nhello)\r\n");

        assert_eq!(
            buf.next_line().unwrap().unwrap(),
            b"* 1 FETCH (BODY {5}\r\nhello)"
        );
    }

    #[test]
    fn test_literal_straddling_reads() {
        let mut buf = LineBuffer::new();
        buf.extend(b"* 1 FETCH (BODY {10}\r\nhel");
        assert!(buf.next_line().unwrap().is_none());

        buf.extend(b"lo wo");
        assert!(buf.next_line().unwrap().is_none());

        buf.extend(b"rld)\r\n");
        assert_eq!(
            buf.next_line().unwrap().unwrap(),
            b"* 1 FETCH (BODY {10}\r\nhello world)"
        );
    }

    #[test]
    fn test_zero_length_literal() {
        let mut buf = LineBuffer::new();
        buf.extend(b"* 1 FETCH (BODY {0}\r\n)\r\n");

        assert_eq!(
            buf.next_line().unwrap().unwrap(),
            b"* 1 FETCH (BODY {0}\r\n)"
        );
    }

    #[test]
    fn test_crlf_inside_literal_not_a_terminator() {
        let mut buf = LineBuffer::new();
        buf.extend(b"* 1 FETCH (BODY {6}\r\nab\r\ncd)\r\n");

        assert_eq!(
            buf.next_line().unwrap().unwrap(),
            b"* 1 FETCH (BODY {6}\r\nab\r\ncd)"
        );
    }

    #[test]
    fn test_oversized_literal_rejected() {
        let mut buf = LineBuffer::new();
        let header = format!("* 1 FETCH (BODY {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        buf.extend(header.as_bytes());

        assert!(buf.next_line().is_err());
    }
}
