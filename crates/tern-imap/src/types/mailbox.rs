//! Mailbox and message model.
//!
//! These records are owned by the connection and mutated only from untagged
//! server data. Workers send clones of them across the update queue, so the
//! renderer side never aliases engine state.

use chrono::{DateTime, FixedOffset};

/// A mailbox known to the connection, populated by LIST/LSUB and SELECT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mailbox {
    /// Mailbox name as reported by the server.
    pub name: String,
    /// Flags defined for this mailbox.
    pub flags: Vec<String>,
    /// The subset of flags that can be changed permanently.
    pub permanent_flags: Vec<String>,
    /// Number of messages in the mailbox.
    pub exists: i64,
    /// Number of recent messages.
    pub recent: i64,
    /// First unseen message sequence number.
    pub unseen: i64,
    /// Predicted next UID. Advisory only; nothing reads it back.
    pub next_uid: i64,
    /// Whether the mailbox was selected read-write.
    pub read_write: bool,
    /// Whether this is the currently selected mailbox.
    pub selected: bool,
    /// Messages, ordered by sequence index.
    pub messages: Vec<Message>,
}

impl Mailbox {
    /// Creates an empty mailbox record with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns the message with the given 1-based sequence index.
    #[must_use]
    pub fn message(&self, index: u32) -> Option<&Message> {
        self.messages.iter().find(|m| m.index == index)
    }

    /// Returns a mutable reference to the message with the given sequence
    /// index, creating the record if it does not exist yet.
    pub fn message_mut(&mut self, index: u32) -> &mut Message {
        if let Some(pos) = self.messages.iter().position(|m| m.index == index) {
            return &mut self.messages[pos];
        }
        let msg = Message {
            index,
            ..Message::default()
        };
        let pos = self
            .messages
            .iter()
            .position(|m| m.index > index)
            .unwrap_or(self.messages.len());
        self.messages.insert(pos, msg);
        &mut self.messages[pos]
    }

    /// Removes the message at the given sequence index and shifts the
    /// indices of the messages after it, as EXPUNGE requires. Returns the
    /// removed message.
    pub fn expunge(&mut self, index: u32) -> Option<Message> {
        let pos = self.messages.iter().position(|m| m.index == index)?;
        let removed = self.messages.remove(pos);
        for msg in &mut self.messages {
            if msg.index > index {
                msg.index -= 1;
            }
        }
        if self.exists > 0 {
            self.exists -= 1;
        }
        Some(removed)
    }
}

/// One message in a mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned sequence index, 1-based. Shifts on EXPUNGE.
    pub index: u32,
    /// Unique identifier, stable across the session.
    pub uid: Option<i64>,
    /// Message flags, e.g. `\Seen`.
    pub flags: Vec<String>,
    /// Parsed headers from a `BODY[HEADER.FIELDS (...)]` fetch.
    pub headers: Vec<Header>,
    /// Server INTERNALDATE.
    pub internal_date: Option<DateTime<FixedOffset>>,
    /// Multipart subtype (e.g. `mixed`) when the body is multipart.
    pub multipart_type: Option<String>,
    /// Body parts in structure order.
    pub parts: Vec<MessagePart>,
    /// A fetch for this message is in flight.
    pub fetching: bool,
    /// The requested attributes have arrived.
    pub populated: bool,
}

impl Message {
    /// Returns the value of the named header, case-insensitively.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(key))
            .map(|h| h.value.as_str())
    }

    /// Returns true if the message carries the given flag.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }
}

/// A single `Key: value` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name.
    pub key: String,
    /// Header value with continuation lines folded.
    pub value: String,
}

/// One part of a message body structure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePart {
    /// MIME type, e.g. `text`.
    pub mime_type: String,
    /// MIME subtype, e.g. `plain`.
    pub subtype: String,
    /// Key/value body parameters, e.g. charset.
    pub parameters: Vec<(String, String)>,
    /// Content-ID, if any.
    pub body_id: Option<String>,
    /// Content-Description, if any.
    pub body_description: Option<String>,
    /// Transfer encoding, e.g. `base64`.
    pub encoding: Option<String>,
    /// Size in octets.
    pub size: i64,
    /// Raw content once fetched; empty until then.
    pub content: Vec<u8>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_mut_creates_in_order() {
        let mut mbox = Mailbox::new("INBOX");
        mbox.message_mut(3).uid = Some(103);
        mbox.message_mut(1).uid = Some(101);
        mbox.message_mut(2).uid = Some(102);

        let indices: Vec<u32> = mbox.messages.iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_message_mut_reuses_existing() {
        let mut mbox = Mailbox::new("INBOX");
        mbox.message_mut(1).uid = Some(101);
        mbox.message_mut(1).flags.push("\\Seen".to_string());

        assert_eq!(mbox.messages.len(), 1);
        assert_eq!(mbox.messages[0].uid, Some(101));
    }

    #[test]
    fn test_expunge_shifts_indices() {
        let mut mbox = Mailbox::new("INBOX");
        mbox.exists = 3;
        for i in 1..=3 {
            mbox.message_mut(i).uid = Some(100 + i64::from(i));
        }

        let removed = mbox.expunge(2).unwrap();
        assert_eq!(removed.uid, Some(102));
        assert_eq!(mbox.exists, 2);

        let pairs: Vec<(u32, Option<i64>)> =
            mbox.messages.iter().map(|m| (m.index, m.uid)).collect();
        assert_eq!(pairs, vec![(1, Some(101)), (2, Some(103))]);
    }

    #[test]
    fn test_expunge_unknown_index() {
        let mut mbox = Mailbox::new("INBOX");
        assert!(mbox.expunge(5).is_none());
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let mut msg = Message::default();
        msg.headers.push(Header {
            key: "Subject".to_string(),
            value: "hello".to_string(),
        });

        assert_eq!(msg.header("subject"), Some("hello"));
        assert_eq!(msg.header("SUBJECT"), Some("hello"));
        assert_eq!(msg.header("From"), None);
    }
}
