//! The coordinator ↔ worker message contract.
//!
//! Actions flow from the coordinator to a worker, updates flow back. Each
//! direction is one unbounded queue; payloads are owned transfers, so
//! nothing is aliased across the boundary. `Ack` carries the correlation id
//! of the action it acknowledges.

use tern_imap::{Mailbox, Message};

/// An action, tagged with the coordinator's correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMessage {
    /// Correlation id echoed back in [`Update::Ack`].
    pub id: u64,
    /// What the worker should do.
    pub action: Action,
}

/// Requests a worker accepts from the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Establish the IMAP connection for the given URI.
    Connect(String),
    /// The user approved the server certificate.
    CertOkay,
    /// The user rejected the server certificate.
    CertReject,
    /// List every mailbox on the account.
    ListMailboxes,
    /// Select the named mailbox.
    SelectMailbox(String),
    /// Fetch the inclusive sequence range `[min, max]` of the selected
    /// mailbox.
    FetchMessages {
        /// First sequence number.
        min: u32,
        /// Last sequence number.
        max: u32,
    },
    /// Delete the named mailbox.
    DeleteMailbox(String),
    /// Log out, close the socket and exit the worker task.
    Shutdown,
}

/// Updates a worker emits towards the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// An action was received and is being handled.
    Ack(u64),
    /// The server presented this certificate; connection processing is
    /// held until `CertOkay`/`CertReject` arrives.
    ConnectCertCheck(CertInfo),
    /// Connection established and authenticated.
    ConnectDone,
    /// Connecting failed; the worker now accepts only `Shutdown`.
    ConnectError(String),
    /// Snapshot of a changed mailbox.
    MailboxUpdated(Mailbox),
    /// A mailbox is gone.
    MailboxDeleted(String),
    /// Snapshot of a changed message.
    MessageUpdated {
        /// Owning mailbox name.
        mailbox: String,
        /// The changed message.
        message: Message,
    },
    /// A message was expunged.
    MessageDeleted {
        /// Owning mailbox name.
        mailbox: String,
        /// UID of the removed message, when known.
        uid: Option<i64>,
    },
    /// Free-form status line for the account.
    Status {
        /// Severity.
        level: StatusLevel,
        /// Human-readable text.
        text: String,
    },
}

/// Certificate details surfaced for the trust prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Hostname the certificate was presented for.
    pub host: String,
    /// DER-encoded end-entity certificate.
    pub der: Vec<u8>,
}

/// Severity of a status-line update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    /// Everything is fine.
    Okay,
    /// An operation is in progress.
    Loading,
    /// Something went wrong; shown until replaced.
    Error,
}
