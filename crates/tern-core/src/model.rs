//! The renderer-side account model.
//!
//! Workers send snapshots, never references; the coordinator folds them
//! into this mirror, which is the only state the renderer reads. Nothing
//! here touches the network.

use std::time::Instant;

use tern_imap::{Mailbox, Message};

use crate::coordinator::DirtyPanels;
use crate::messages::{StatusLevel, Update};

/// Status line shown for an account.
#[derive(Debug, Clone)]
pub struct StatusLine {
    /// Severity.
    pub level: StatusLevel,
    /// Text to display.
    pub text: String,
    /// When the line was set; the renderer fades stale lines.
    pub since: Instant,
}

impl Default for StatusLine {
    fn default() -> Self {
        Self {
            level: StatusLevel::Loading,
            text: "connecting...".to_string(),
            since: Instant::now(),
        }
    }
}

/// Cursor state of the message list panel.
#[derive(Debug, Clone, Copy, Default)]
pub struct UiCursors {
    /// Index of the first visible message row.
    pub list_offset: usize,
    /// Index of the highlighted message.
    pub selected_message: usize,
}

/// Everything the renderer knows about one account.
#[derive(Debug)]
pub struct AccountState {
    /// Account name from the configuration.
    pub name: String,
    /// Mailbox snapshots, in the order the server listed them.
    pub mailboxes: Vec<Mailbox>,
    /// Name of the mailbox shown in the message list.
    pub selected: Option<String>,
    /// Current status line.
    pub status: StatusLine,
    /// Message list cursors.
    pub ui: UiCursors,
}

impl AccountState {
    /// Creates the mirror for a freshly configured account.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mailboxes: Vec::new(),
            selected: None,
            status: StatusLine::default(),
            ui: UiCursors::default(),
        }
    }

    /// Returns the named mailbox snapshot.
    #[must_use]
    pub fn mailbox(&self, name: &str) -> Option<&Mailbox> {
        self.mailboxes.iter().find(|m| m.name == name)
    }

    /// Returns the mailbox currently shown in the message list.
    #[must_use]
    pub fn selected_mailbox(&self) -> Option<&Mailbox> {
        self.selected.as_deref().and_then(|name| self.mailbox(name))
    }

    /// Replaces the status line.
    pub fn set_status(&mut self, level: StatusLevel, text: impl Into<String>) {
        self.status = StatusLine {
            level,
            text: text.into(),
            since: Instant::now(),
        };
    }

    /// Folds one worker update into the mirror and reports which panels it
    /// dirtied.
    pub fn apply_update(&mut self, update: Update) -> DirtyPanels {
        match update {
            Update::Ack(_) => DirtyPanels::default(),

            Update::ConnectCertCheck(_) => {
                self.set_status(StatusLevel::Loading, "checking certificate...");
                DirtyPanels::status_bar()
            }

            Update::ConnectDone => {
                self.set_status(StatusLevel::Okay, "connected");
                DirtyPanels::status_bar()
            }

            Update::ConnectError(text) => {
                self.set_status(StatusLevel::Error, text);
                DirtyPanels::status_bar()
            }

            Update::Status { level, text } => {
                self.set_status(level, text);
                DirtyPanels::status_bar()
            }

            Update::MailboxUpdated(snapshot) => {
                let affects_list = self.selected.as_deref() == Some(snapshot.name.as_str());
                if snapshot.selected {
                    self.selected = Some(snapshot.name.clone());
                }
                self.upsert_mailbox(snapshot);
                self.clamp_cursor();
                let mut dirty = DirtyPanels::sidebar();
                if affects_list || self.selected.is_some() {
                    dirty.message_list = true;
                }
                dirty
            }

            Update::MailboxDeleted(name) => {
                self.mailboxes.retain(|m| m.name != name);
                if self.selected.as_deref() == Some(name.as_str()) {
                    self.selected = None;
                    self.ui = UiCursors::default();
                }
                DirtyPanels::all()
            }

            Update::MessageUpdated { mailbox, message } => {
                let affects_list = self.selected.as_deref() == Some(mailbox.as_str());
                self.upsert_message(&mailbox, message);
                if affects_list {
                    DirtyPanels::message_list()
                } else {
                    DirtyPanels::default()
                }
            }

            Update::MessageDeleted { mailbox, uid } => {
                let affects_list = self.selected.as_deref() == Some(mailbox.as_str());
                self.remove_message(&mailbox, uid);
                self.clamp_cursor();
                if affects_list {
                    DirtyPanels::message_list()
                } else {
                    DirtyPanels::default()
                }
            }
        }
    }

    /// Keeps the cursor inside the selected mailbox's message list.
    pub fn clamp_cursor(&mut self) {
        let len = self
            .selected_mailbox()
            .map_or(0, |m| m.messages.len());
        if len == 0 {
            self.ui.selected_message = 0;
            self.ui.list_offset = 0;
        } else if self.ui.selected_message >= len {
            self.ui.selected_message = len - 1;
        }
    }

    fn upsert_mailbox(&mut self, snapshot: Mailbox) {
        if let Some(existing) = self.mailboxes.iter_mut().find(|m| m.name == snapshot.name) {
            *existing = snapshot;
        } else {
            self.mailboxes.push(snapshot);
        }
    }

    fn upsert_message(&mut self, mailbox: &str, message: Message) {
        let Some(mbox) = self.mailboxes.iter_mut().find(|m| m.name == mailbox) else {
            tracing::debug!(mailbox, "message update for unknown mailbox");
            return;
        };
        let index = message.index;
        *mbox.message_mut(index) = message;
    }

    /// Mirrors an EXPUNGE: drop by UID and close the index gap.
    fn remove_message(&mut self, mailbox: &str, uid: Option<i64>) {
        let Some(mbox) = self.mailboxes.iter_mut().find(|m| m.name == mailbox) else {
            return;
        };
        let Some(pos) = mbox.messages.iter().position(|m| m.uid == uid) else {
            return;
        };
        let index = mbox.messages[pos].index;
        mbox.messages.remove(pos);
        for msg in &mut mbox.messages {
            if msg.index > index {
                msg.index -= 1;
            }
        }
        if mbox.exists > 0 {
            mbox.exists -= 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mailbox(name: &str, uids: &[i64]) -> Mailbox {
        let mut mbox = Mailbox::new(name);
        mbox.exists = i64::try_from(uids.len()).unwrap();
        for (i, &uid) in uids.iter().enumerate() {
            let msg = mbox.message_mut(u32::try_from(i + 1).unwrap());
            msg.uid = Some(uid);
        }
        mbox
    }

    #[test]
    fn test_mailbox_upsert() {
        let mut account = AccountState::new("work");

        let dirty = account.apply_update(Update::MailboxUpdated(mailbox("INBOX", &[])));
        assert!(dirty.sidebar);
        assert_eq!(account.mailboxes.len(), 1);

        let mut updated = mailbox("INBOX", &[]);
        updated.exists = 9;
        account.apply_update(Update::MailboxUpdated(updated));
        assert_eq!(account.mailboxes.len(), 1);
        assert_eq!(account.mailbox("INBOX").unwrap().exists, 9);
    }

    #[test]
    fn test_selected_follows_snapshot() {
        let mut account = AccountState::new("work");

        let mut snapshot = mailbox("INBOX", &[101]);
        snapshot.selected = true;
        account.apply_update(Update::MailboxUpdated(snapshot));

        assert_eq!(account.selected.as_deref(), Some("INBOX"));
        assert!(account.selected_mailbox().is_some());
    }

    #[test]
    fn test_message_deleted_shifts_mirror() {
        let mut account = AccountState::new("work");
        let mut snapshot = mailbox("INBOX", &[101, 102, 103]);
        snapshot.selected = true;
        account.apply_update(Update::MailboxUpdated(snapshot));

        let dirty = account.apply_update(Update::MessageDeleted {
            mailbox: "INBOX".to_string(),
            uid: Some(102),
        });

        assert!(dirty.message_list);
        let mbox = account.mailbox("INBOX").unwrap();
        assert_eq!(mbox.exists, 2);
        let pairs: Vec<(u32, Option<i64>)> =
            mbox.messages.iter().map(|m| (m.index, m.uid)).collect();
        assert_eq!(pairs, vec![(1, Some(101)), (2, Some(103))]);
    }

    #[test]
    fn test_cursor_clamped_after_deletion() {
        let mut account = AccountState::new("work");
        let mut snapshot = mailbox("INBOX", &[101, 102]);
        snapshot.selected = true;
        account.apply_update(Update::MailboxUpdated(snapshot));
        account.ui.selected_message = 1;

        account.apply_update(Update::MessageDeleted {
            mailbox: "INBOX".to_string(),
            uid: Some(102),
        });

        assert_eq!(account.ui.selected_message, 0);
    }

    #[test]
    fn test_status_updates() {
        let mut account = AccountState::new("work");

        let dirty = account.apply_update(Update::ConnectError("no route".to_string()));

        assert!(dirty.status_bar);
        assert_eq!(account.status.level, StatusLevel::Error);
        assert_eq!(account.status.text, "no route");
    }

    #[test]
    fn test_mailbox_deleted_resets_selection() {
        let mut account = AccountState::new("work");
        let mut snapshot = mailbox("Trash", &[7]);
        snapshot.selected = true;
        account.apply_update(Update::MailboxUpdated(snapshot));

        account.apply_update(Update::MailboxDeleted("Trash".to_string()));

        assert!(account.selected.is_none());
        assert!(account.mailboxes.is_empty());
    }

    #[test]
    fn test_message_update_for_unknown_mailbox_ignored() {
        let mut account = AccountState::new("work");

        let dirty = account.apply_update(Update::MessageUpdated {
            mailbox: "nope".to_string(),
            message: Message::default(),
        });

        assert!(!dirty.any());
    }
}
