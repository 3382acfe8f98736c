//! Tokenizer for IMAP server lines.
//!
//! One logical line (with any literal payloads already buffered inline) is
//! cut into tokens by a [`Scanner`]. The argument parser drives the scanner
//! and decides what the tokens mean; response-code sections and partial
//! markers are scanned raw because their content is re-dispatched or glued
//! onto the preceding atom rather than tokenized.

use crate::{Error, Result};

/// One lexical element cut from a server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Bare word, e.g. `OK`, `\Seen`, `INBOX`.
    Atom(&'a str),
    /// All-digit word.
    Number(i64),
    /// Double-quoted string, unescaped.
    Quoted(String),
    /// Counted literal payload, borrowed from the line.
    Literal(&'a [u8]),
    /// `(` opening a parenthesised list.
    Open,
    /// `)` closing a parenthesised list.
    Close,
}

/// Cursor over the bytes of one server line.
pub struct Scanner<'a> {
    line: &'a [u8],
    cursor: usize,
}

impl<'a> Scanner<'a> {
    /// Starts scanning at the beginning of `line`.
    #[must_use]
    pub const fn new(line: &'a [u8]) -> Self {
        Self { line, cursor: 0 }
    }

    /// How many bytes have been consumed.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.cursor
    }

    /// The line content from `at` onwards, for original-text capture.
    #[must_use]
    pub fn tail_from(&self, at: usize) -> &'a [u8] {
        &self.line[at.min(self.line.len())..]
    }

    /// True when the next unconsumed byte is `b`. Does not skip blanks, so
    /// this distinguishes `BODY[...]` from `BODY [...]`.
    #[must_use]
    pub fn next_is(&self, b: u8) -> bool {
        self.line.get(self.cursor) == Some(&b)
    }

    /// Consumes any run of spaces.
    pub fn skip_blanks(&mut self) {
        while self.next_is(b' ') {
            self.cursor += 1;
        }
    }

    /// Cuts the next token off the line, or `None` at the end. The caller
    /// skips blanks; a stray control byte is a parse error.
    pub fn token(&mut self) -> Result<Option<Token<'a>>> {
        let Some(&first) = self.line.get(self.cursor) else {
            return Ok(None);
        };

        let token = match first {
            b'(' => {
                self.cursor += 1;
                Token::Open
            }
            b')' => {
                self.cursor += 1;
                Token::Close
            }
            b'"' => self.quoted()?,
            b'{' => self.literal()?,
            _ if is_atom_byte(first) => self.word()?,
            other => return Err(self.fail(format!("unexpected byte {other:#04x}"))),
        };

        Ok(Some(token))
    }

    /// Longest run of atom bytes; all digits makes it a number.
    fn word(&mut self) -> Result<Token<'a>> {
        let start = self.cursor;
        let len = self.line[start..]
            .iter()
            .take_while(|&&b| is_atom_byte(b))
            .count();
        self.cursor = start + len;

        let text = utf8(&self.line[start..self.cursor], start)?;
        if text.bytes().all(|b| b.is_ascii_digit())
            && let Ok(n) = text.parse()
        {
            return Ok(Token::Number(n));
        }
        Ok(Token::Atom(text))
    }

    /// `"..."` with `\"` and `\\` escapes undone.
    fn quoted(&mut self) -> Result<Token<'a>> {
        let mut content = Vec::new();
        let mut i = self.cursor + 1;

        loop {
            match self.line.get(i) {
                None => return Err(self.fail("quoted string never closes".to_string())),
                Some(b'"') => break,
                Some(b'\\') => match self.line.get(i + 1) {
                    Some(&c @ (b'"' | b'\\')) => {
                        content.push(c);
                        i += 2;
                    }
                    _ => return Err(self.fail("bad escape in quoted string".to_string())),
                },
                Some(&c) => {
                    content.push(c);
                    i += 1;
                }
            }
        }

        self.cursor = i + 1;
        let content = String::from_utf8(content)
            .map_err(|_| self.fail("quoted string is not UTF-8".to_string()))?;
        Ok(Token::Quoted(content))
    }

    /// `{n}` CRLF followed by exactly n payload bytes, all in the line.
    fn literal(&mut self) -> Result<Token<'a>> {
        let digits_at = self.cursor + 1;
        let Some(brace) = self.line[digits_at..]
            .iter()
            .position(|&b| b == b'}')
            .map(|n| digits_at + n)
        else {
            return Err(self.fail("literal size never closes".to_string()));
        };

        let count: usize = utf8(&self.line[digits_at..brace], digits_at)?
            .parse()
            .map_err(|_| self.fail("literal size is not a number".to_string()))?;

        if self.line.get(brace + 1..brace + 3) != Some(b"\r\n".as_slice()) {
            return Err(self.fail("literal size must end the line".to_string()));
        }

        let payload_at = brace + 3;
        let Some(payload) = self.line.get(payload_at..payload_at + count) else {
            return Err(self.fail("literal payload is cut short".to_string()));
        };

        self.cursor = payload_at + count;
        Ok(Token::Literal(payload))
    }

    /// Consumes a `[...]` section (the opening bracket included) and
    /// returns its content. Brackets nest one level in section specs like
    /// `BODY[HEADER.FIELDS (...)]`.
    pub fn section(&mut self) -> Result<&'a str> {
        if !self.next_is(b'[') {
            return Err(self.fail("expected a bracketed section".to_string()));
        }
        let start = self.cursor + 1;
        let mut depth = 1_usize;

        for (i, &b) in self.line.iter().enumerate().skip(start) {
            match b {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        self.cursor = i + 1;
                        return utf8(&self.line[start..i], start);
                    }
                }
                _ => {}
            }
        }

        Err(self.fail("bracketed section never closes".to_string()))
    }

    /// Consumes a `<...>` partial-fetch marker if one is attached, and
    /// returns its content. An unterminated marker is left alone.
    pub fn angles(&mut self) -> Option<&'a str> {
        if !self.next_is(b'<') {
            return None;
        }
        let start = self.cursor + 1;
        let close = self.line[start..]
            .iter()
            .position(|&b| b == b'>')
            .map(|n| start + n)?;

        let content = std::str::from_utf8(&self.line[start..close]).ok()?;
        self.cursor = close + 1;
        Some(content)
    }

    fn fail(&self, message: String) -> Error {
        Error::Parse {
            position: self.cursor,
            message,
        }
    }
}

/// Converts a scanned slice to text, or reports a parse error at `at`.
fn utf8<'a>(bytes: &'a [u8], at: usize) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|_| Error::Parse {
        position: at,
        message: "invalid UTF-8".to_string(),
    })
}

/// Atom bytes per RFC 3501: printable ASCII minus the delimiters the
/// grammar reserves. `\` stays in so flags like `\Seen` scan as one word;
/// `]` stays out so response codes terminate.
#[must_use]
pub const fn is_atom_byte(b: u8) -> bool {
    if !b.is_ascii_graphic() {
        return false;
    }
    !matches!(b, b'(' | b')' | b'{' | b'"' | b'[' | b']')
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Collects every token, skipping blanks like the parser does.
    fn all(line: &[u8]) -> Vec<Token<'_>> {
        let mut scan = Scanner::new(line);
        let mut out = Vec::new();
        loop {
            scan.skip_blanks();
            match scan.token().unwrap() {
                Some(token) => out.push(token),
                None => return out,
            }
        }
    }

    #[test]
    fn test_words_and_numbers() {
        assert_eq!(
            all(b"OK 23 LOGIN"),
            vec![Token::Atom("OK"), Token::Number(23), Token::Atom("LOGIN")]
        );
    }

    #[test]
    fn test_digit_prefixed_word_is_an_atom() {
        assert_eq!(all(b"8BITMIME"), vec![Token::Atom("8BITMIME")]);
    }

    #[test]
    fn test_flags_keep_their_backslash() {
        assert_eq!(
            all(b"(\\Seen \\Flagged)"),
            vec![
                Token::Open,
                Token::Atom("\\Seen"),
                Token::Atom("\\Flagged"),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_quoted_string() {
        assert_eq!(
            all(b"\"hello world\""),
            vec![Token::Quoted("hello world".to_string())]
        );
    }

    #[test]
    fn test_quoted_escapes_undone() {
        assert_eq!(
            all(br#""a \"b\" \\c""#),
            vec![Token::Quoted(r#"a "b" \c"#.to_string())]
        );
    }

    #[test]
    fn test_unclosed_quote_is_an_error() {
        let mut scan = Scanner::new(b"\"oops");
        assert!(scan.token().is_err());
    }

    #[test]
    fn test_literal_payload_borrowed() {
        assert_eq!(
            all(b"{5}\r\nhello rest"),
            vec![Token::Literal(b"hello"), Token::Atom("rest")]
        );
    }

    #[test]
    fn test_empty_literal() {
        assert_eq!(
            all(b"{0}\r\n after"),
            vec![Token::Literal(b""), Token::Atom("after")]
        );
    }

    #[test]
    fn test_short_literal_is_an_error() {
        let mut scan = Scanner::new(b"{10}\r\nabc");
        assert!(scan.token().is_err());
    }

    #[test]
    fn test_section_scan() {
        let mut scan = Scanner::new(b"[UIDNEXT 100] rest");
        assert_eq!(scan.section().unwrap(), "UIDNEXT 100");
        scan.skip_blanks();
        assert_eq!(scan.token().unwrap(), Some(Token::Atom("rest")));
    }

    #[test]
    fn test_section_nests_once() {
        let mut scan = Scanner::new(b"[HEADER.FIELDS (DATE FROM)]");
        assert_eq!(scan.section().unwrap(), "HEADER.FIELDS (DATE FROM)");
        assert_eq!(scan.token().unwrap(), None);
    }

    #[test]
    fn test_angles_marker() {
        let mut scan = Scanner::new(b"<0.1024> x");
        assert_eq!(scan.angles(), Some("0.1024"));
        scan.skip_blanks();
        assert_eq!(scan.token().unwrap(), Some(Token::Atom("x")));
    }

    #[test]
    fn test_angles_absent() {
        let mut scan = Scanner::new(b"plain");
        assert_eq!(scan.angles(), None);
        assert_eq!(scan.offset(), 0);
    }

    #[test]
    fn test_is_atom_byte() {
        for good in [b'A', b'z', b'0', b':', b'\\', b'*', b'%', b'+', b'.'] {
            assert!(is_atom_byte(good), "{good:?}");
        }
        for bad in [b' ', b'(', b')', b'{', b'"', b'[', b']', b'\r', b'\n', 0x7F] {
            assert!(!is_atom_byte(bad), "{bad:?}");
        }
    }
}
