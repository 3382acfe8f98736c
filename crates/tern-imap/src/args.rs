//! Parsed IMAP argument trees.
//!
//! Server lines are scanned by the [`Scanner`](crate::lexer::Scanner) and
//! assembled into a tree of arguments. Every node keeps the untokenised
//! remainder of the line it was parsed from, because the status handler
//! passes that text through to completion callbacks verbatim and response
//! codes are re-dispatched as synthetic lines.

use crate::lexer::{Scanner, Token};
use crate::{Error, Result};

/// The kind of a parsed argument node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgKind {
    /// Bare atom, including `NIL` (kept as `Atom("NIL")`).
    Atom(String),
    /// Numeric atom.
    Number(i64),
    /// Quoted string or literal.
    String(String),
    /// Parenthesised list.
    List(Vec<ImapArg>),
    /// Response code, the text between `[` and `]` in a status response.
    Response(String),
}

/// One node of a parsed argument tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapArg {
    /// What was parsed.
    pub kind: ArgKind,
    /// The untokenised text of the line from this node onwards.
    pub original: String,
}

impl ImapArg {
    /// Returns the atom text if this node is an atom.
    #[must_use]
    pub fn as_atom(&self) -> Option<&str> {
        match &self.kind {
            ArgKind::Atom(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the string content if this node is a string or an atom.
    ///
    /// IMAP servers are permitted to send astrings where the grammar says
    /// string, so consumers that expect text accept both.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ArgKind::Atom(s) | ArgKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric value if this node is a number.
    #[must_use]
    pub const fn as_number(&self) -> Option<i64> {
        match self.kind {
            ArgKind::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Returns the child nodes if this node is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[ImapArg]> {
        match &self.kind {
            ArgKind::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns true if this node is the `NIL` atom.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(&self.kind, ArgKind::Atom(s) if s.eq_ignore_ascii_case("NIL"))
    }
}

/// Parses the argument portion of a server line into a tree.
///
/// The caller strips the leading token and command word; this sees only the
/// arguments. Literals must already be buffered in full.
pub fn parse_args(input: &[u8]) -> Result<Vec<ImapArg>> {
    let mut scan = Scanner::new(input);
    parse_nodes(&mut scan, false)
}

/// Parses sibling nodes until the line ends, or until the `)` closing the
/// list when `nested`.
fn parse_nodes(scan: &mut Scanner<'_>, nested: bool) -> Result<Vec<ImapArg>> {
    let mut nodes = Vec::new();

    loop {
        scan.skip_blanks();
        let at = scan.offset();

        // A bracket at argument position opens a response code; its raw
        // content is captured for re-dispatch, not tokenized.
        if scan.next_is(b'[') {
            let code = scan.section()?.to_string();
            nodes.push(node(ArgKind::Response(code), scan, at)?);
            continue;
        }

        let Some(token) = scan.token()? else {
            if nested {
                return Err(Error::Parse {
                    position: at,
                    message: "list never closes".to_string(),
                });
            }
            return Ok(nodes);
        };

        let kind = match token {
            Token::Close if nested => return Ok(nodes),
            Token::Close => {
                return Err(Error::Parse {
                    position: at,
                    message: "stray closing parenthesis".to_string(),
                });
            }
            Token::Open => ArgKind::List(parse_nodes(scan, true)?),
            Token::Atom(word) => ArgKind::Atom(absorb_section(scan, word)?),
            Token::Number(n) => ArgKind::Number(n),
            Token::Quoted(s) => ArgKind::String(s),
            Token::Literal(payload) => {
                let text = String::from_utf8(payload.to_vec()).map_err(|_| Error::Parse {
                    position: at,
                    message: "literal is not UTF-8".to_string(),
                })?;
                ArgKind::String(text)
            }
        };

        nodes.push(node(kind, scan, at)?);
    }
}

/// Glues a directly attached `[...]` section (and `<...>` partial marker)
/// onto an atom, so FETCH keys like `BODY[HEADER.FIELDS (DATE FROM)]` stay
/// one word.
fn absorb_section(scan: &mut Scanner<'_>, word: &str) -> Result<String> {
    if !scan.next_is(b'[') {
        return Ok(word.to_string());
    }
    let section = scan.section()?;
    let marker = scan.angles();

    let mut name = format!("{word}[{section}]");
    if let Some(marker) = marker {
        name.push('<');
        name.push_str(marker);
        name.push('>');
    }
    Ok(name)
}

/// Wraps a parsed kind with the untokenised line text from `at` onwards,
/// cut before any embedded literal payload.
fn node(kind: ArgKind, scan: &Scanner<'_>, at: usize) -> Result<ImapArg> {
    let tail = scan.tail_from(at);
    let cut = tail
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(tail.len());
    let original = std::str::from_utf8(&tail[..cut])
        .map_err(|_| Error::Parse {
            position: at,
            message: "invalid UTF-8".to_string(),
        })?
        .to_string();

    Ok(ImapArg { kind, original })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_atoms() {
        let args = parse_args(b"IMAP4rev1 AUTH=PLAIN SASL-IR").unwrap();

        assert_eq!(args.len(), 3);
        assert_eq!(args[0].as_atom(), Some("IMAP4rev1"));
        assert_eq!(args[1].as_atom(), Some("AUTH=PLAIN"));
        assert_eq!(args[2].as_atom(), Some("SASL-IR"));
    }

    #[test]
    fn test_numbers_and_strings() {
        let args = parse_args(b"23 \"hello world\"").unwrap();

        assert_eq!(args[0].as_number(), Some(23));
        assert_eq!(args[1].as_str(), Some("hello world"));
    }

    #[test]
    fn test_nil_stays_atom() {
        let args = parse_args(b"NIL").unwrap();

        assert_eq!(args[0].as_atom(), Some("NIL"));
        assert!(args[0].is_nil());
    }

    #[test]
    fn test_nil_case_insensitive() {
        let args = parse_args(b"nil").unwrap();

        assert_eq!(args[0].as_atom(), Some("nil"));
        assert!(args[0].is_nil());
    }

    #[test]
    fn test_list() {
        let args = parse_args(b"(\\HasNoChildren) \"/\" INBOX").unwrap();

        let flags = args[0].as_list().unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].as_atom(), Some("\\HasNoChildren"));
        assert_eq!(args[1].as_str(), Some("/"));
        assert_eq!(args[2].as_str(), Some("INBOX"));
    }

    #[test]
    fn test_empty_list() {
        let args = parse_args(b"()").unwrap();

        assert_eq!(args[0].as_list().unwrap().len(), 0);
    }

    #[test]
    fn test_nested_lists_depth_four() {
        // Shaped like a BODYSTRUCTURE of a multipart inside a multipart.
        let args = parse_args(b"(((\"a\" (\"k\" \"v\")) \"mixed\") \"related\")").unwrap();

        let l1 = args[0].as_list().unwrap();
        let l2 = l1[0].as_list().unwrap();
        let l3 = l2[0].as_list().unwrap();
        let l4 = l3[1].as_list().unwrap();
        assert_eq!(l4[0].as_str(), Some("k"));
        assert_eq!(l4[1].as_str(), Some("v"));
        assert_eq!(l2[1].as_str(), Some("mixed"));
        assert_eq!(l1[1].as_str(), Some("related"));
    }

    #[test]
    fn test_response_code() {
        let args = parse_args(b"[READ-WRITE] SELECT completed").unwrap();

        assert_eq!(args[0].kind, ArgKind::Response("READ-WRITE".to_string()));
        assert_eq!(args[1].as_atom(), Some("SELECT"));
        assert_eq!(args[1].original, "SELECT completed");
    }

    #[test]
    fn test_response_code_with_arguments() {
        let args = parse_args(b"[UIDNEXT 4392] Predicted next UID").unwrap();

        assert_eq!(args[0].kind, ArgKind::Response("UIDNEXT 4392".to_string()));
    }

    #[test]
    fn test_original_text_preserved() {
        let args = parse_args(b"LOGIN completed, welcome").unwrap();

        assert_eq!(args[0].original, "LOGIN completed, welcome");
        assert_eq!(args[1].original, "completed, welcome");
    }

    #[test]
    fn test_literal_argument() {
        let args = parse_args(b"{5}\r\nhello world").unwrap();

        assert_eq!(args[0].as_str(), Some("hello"));
        assert_eq!(args[1].as_atom(), Some("world"));
    }

    #[test]
    fn test_zero_length_literal() {
        let args = parse_args(b"{0}\r\n after").unwrap();

        assert_eq!(args[0].as_str(), Some(""));
        assert_eq!(args[1].as_atom(), Some("after"));
    }

    #[test]
    fn test_body_section_atom() {
        let args = parse_args(b"BODY[HEADER.FIELDS (DATE FROM)] {4}\r\nabcd").unwrap();

        assert_eq!(args[0].as_atom(), Some("BODY[HEADER.FIELDS (DATE FROM)]"));
        assert_eq!(args[1].as_str(), Some("abcd"));
    }

    #[test]
    fn test_body_section_with_partial_marker() {
        let args = parse_args(b"BODY[1]<0.1024> \"x\"").unwrap();

        assert_eq!(args[0].as_atom(), Some("BODY[1]<0.1024>"));
        assert_eq!(args[1].as_str(), Some("x"));
    }

    #[test]
    fn test_unbalanced_list_is_error() {
        assert!(parse_args(b"(\\Seen").is_err());
    }

    #[test]
    fn test_stray_close_is_error() {
        assert!(parse_args(b"\\Seen)").is_err());
    }
}
