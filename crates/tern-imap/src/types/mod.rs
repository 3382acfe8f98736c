//! Core IMAP types.
//!
//! The fundamental types used throughout the engine: response status,
//! capability flags, receive modes, and the mailbox/message model mutated by
//! untagged server data.

mod capability;
mod mailbox;

pub use capability::Capabilities;
pub use mailbox::{Header, Mailbox, Message, MessagePart};

/// Status delivered to a completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command failed (protocol/syntax error).
    Bad,
    /// Server greeting (pre-authenticated).
    PreAuth,
    /// Server is closing the connection.
    Bye,
    /// Delivered when our side anticipates an error before the server ever
    /// replies: connect failure, disconnect with pending commands, shutdown.
    PreError,
}

impl Status {
    /// Returns true if this is a successful status.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::PreAuth)
    }

    /// Parses a status word, if it is one.
    #[must_use]
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "PREAUTH" => Some(Self::PreAuth),
            "BYE" => Some(Self::Bye),
            _ => None,
        }
    }
}

/// Receive mode of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecvMode {
    /// Hold off processing; used while the certificate prompt is open.
    #[default]
    Wait,
    /// Normal line-by-line processing.
    Line,
    /// IDLE mode: the connection is a pure untagged-event stream.
    Idle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(Status::parse("OK"), Some(Status::Ok));
        assert_eq!(Status::parse("no"), Some(Status::No));
        assert_eq!(Status::parse("Bad"), Some(Status::Bad));
        assert_eq!(Status::parse("PREAUTH"), Some(Status::PreAuth));
        assert_eq!(Status::parse("BYE"), Some(Status::Bye));
        assert_eq!(Status::parse("FETCH"), None);
    }

    #[test]
    fn test_status_is_ok() {
        assert!(Status::Ok.is_ok());
        assert!(Status::PreAuth.is_ok());
        assert!(!Status::No.is_ok());
        assert!(!Status::Bad.is_ok());
        assert!(!Status::Bye.is_ok());
        assert!(!Status::PreError.is_ok());
    }
}
