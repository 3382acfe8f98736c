//! IMAP command builders and serialization.

/// A client command, serialized as `<tag> <command>\r\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPABILITY command.
    Capability,
    /// LOGOUT command.
    Logout,
    /// STARTTLS command.
    StartTls,
    /// LOGIN command.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// AUTHENTICATE command.
    Authenticate {
        /// Authentication mechanism.
        mechanism: String,
        /// Initial response (SASL-IR).
        initial_response: Option<String>,
    },
    /// LIST command.
    List {
        /// Reference name.
        reference: String,
        /// Mailbox pattern.
        pattern: String,
    },
    /// SELECT command.
    Select {
        /// Mailbox to select.
        mailbox: String,
    },
    /// FETCH command over an inclusive 1-based sequence range.
    Fetch {
        /// First sequence number.
        min: u32,
        /// Last sequence number.
        max: u32,
        /// Raw attribute list, e.g. `UID FLAGS INTERNALDATE`.
        items: String,
    },
    /// DELETE command.
    Delete {
        /// Mailbox to delete.
        mailbox: String,
    },
    /// IDLE command (RFC 2177).
    Idle,
    /// DONE (to end IDLE; sent without a tag).
    Done,
}

impl Command {
    /// Serializes the command to bytes with the given tag.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::new();

        // DONE doesn't get a tag (it's sent during IDLE)
        if !matches!(self, Self::Done) {
            buf.extend_from_slice(tag.as_bytes());
            buf.push(b' ');
        }

        match self {
            Self::Capability => buf.extend_from_slice(b"CAPABILITY"),
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
            Self::StartTls => buf.extend_from_slice(b"STARTTLS"),

            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username);
                buf.push(b' ');
                write_astring(&mut buf, password);
            }

            Self::Authenticate {
                mechanism,
                initial_response,
            } => {
                buf.extend_from_slice(b"AUTHENTICATE ");
                buf.extend_from_slice(mechanism.as_bytes());
                if let Some(resp) = initial_response {
                    buf.push(b' ');
                    buf.extend_from_slice(resp.as_bytes());
                }
            }

            Self::List { reference, pattern } => {
                buf.extend_from_slice(b"LIST ");
                write_astring(&mut buf, reference);
                buf.push(b' ');
                write_astring(&mut buf, pattern);
            }

            Self::Select { mailbox } => {
                buf.extend_from_slice(b"SELECT ");
                write_astring(&mut buf, mailbox);
            }

            Self::Fetch { min, max, items } => {
                buf.extend_from_slice(format!("FETCH {min}:{max} ({items})").as_bytes());
            }

            Self::Delete { mailbox } => {
                buf.extend_from_slice(b"DELETE ");
                write_astring(&mut buf, mailbox);
            }

            Self::Idle => buf.extend_from_slice(b"IDLE"),
            Self::Done => buf.extend_from_slice(b"DONE"),
        }

        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// Writes an astring (atom or quoted string with `"` and `\` escaped).
pub(crate) fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        buf.push(b'"');
        for b in s.bytes() {
            if b == b'"' || b == b'\\' {
                buf.push(b'\\');
            }
            buf.push(b);
        }
        buf.push(b'"');
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

/// Returns true if the byte needs quoting.
const fn needs_quoting(b: u8) -> bool {
    matches!(b, b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*') || b < 0x20 || b == 0x7F
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_command() {
        let cmd = Command::Capability;
        assert_eq!(cmd.serialize("A1"), b"A1 CAPABILITY\r\n");
    }

    #[test]
    fn test_login_command() {
        let cmd = Command::Login {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        assert_eq!(cmd.serialize("A2"), b"A2 LOGIN user pass\r\n");
    }

    #[test]
    fn test_login_quotes_and_escapes() {
        let cmd = Command::Login {
            username: "user@example.com".to_string(),
            password: "pa\"ss\\word".to_string(),
        };
        assert_eq!(
            cmd.serialize("A2"),
            b"A2 LOGIN user@example.com \"pa\\\"ss\\\\word\"\r\n"
        );
    }

    #[test]
    fn test_authenticate_with_initial_response() {
        let cmd = Command::Authenticate {
            mechanism: "PLAIN".to_string(),
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(
            cmd.serialize("A2"),
            b"A2 AUTHENTICATE PLAIN AHVzZXIAcGFzcw==\r\n"
        );
    }

    #[test]
    fn test_authenticate_without_initial_response() {
        let cmd = Command::Authenticate {
            mechanism: "PLAIN".to_string(),
            initial_response: None,
        };
        assert_eq!(cmd.serialize("A2"), b"A2 AUTHENTICATE PLAIN\r\n");
    }

    #[test]
    fn test_list_command() {
        let cmd = Command::List {
            reference: String::new(),
            pattern: "*".to_string(),
        };
        // * is a list-wildcard and gets quoted; servers accept both forms.
        assert_eq!(cmd.serialize("A3"), b"A3 LIST \"\" \"*\"\r\n");
    }

    #[test]
    fn test_select_command() {
        let cmd = Command::Select {
            mailbox: "INBOX".to_string(),
        };
        assert_eq!(cmd.serialize("A4"), b"A4 SELECT INBOX\r\n");
    }

    #[test]
    fn test_select_quoted_mailbox() {
        let cmd = Command::Select {
            mailbox: "Archive 2024".to_string(),
        };
        assert_eq!(cmd.serialize("A4"), b"A4 SELECT \"Archive 2024\"\r\n");
    }

    #[test]
    fn test_fetch_command() {
        let cmd = Command::Fetch {
            min: 1,
            max: 3,
            items: "UID FLAGS".to_string(),
        };
        assert_eq!(cmd.serialize("A5"), b"A5 FETCH 1:3 (UID FLAGS)\r\n");
    }

    #[test]
    fn test_idle_and_done() {
        assert_eq!(Command::Idle.serialize("A6"), b"A6 IDLE\r\n");
        assert_eq!(Command::Done.serialize(""), b"DONE\r\n");
    }
}
