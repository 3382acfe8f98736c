//! # tern-imap
//!
//! The IMAP4rev1 (RFC 3501) client protocol engine behind the tern mail
//! client: a streaming parser and state machine covering what a mail reader
//! needs, keyed by per-command tags and driven by the owning worker's poll
//! loop.
//!
//! ## Shape
//!
//! - **Callback-driven**: every command registers a one-shot completion
//!   under its tag; the completion fires from within
//!   [`Connection::receive`] when the matching tagged status arrives, or
//!   with [`Status::PreError`] when the engine gives up (connect failure,
//!   disconnect, shutdown). There is no secondary error channel.
//! - **Sans-suspension**: the engine never awaits between protocol steps.
//!   Reading, TLS upgrades and flushing are driven by the worker that owns
//!   the connection.
//! - **Argument trees**: server lines are lexed into
//!   [`args::ImapArg`] trees that keep the untokenised text of every node,
//!   because response codes are re-dispatched as synthetic lines and status
//!   text is passed to callbacks verbatim.
//!
//! ## Protocol coverage
//!
//! Connection setup, capability negotiation, STARTTLS, `AUTHENTICATE
//! PLAIN` (with and without SASL-IR) and `LOGIN`, LIST/LSUB, SELECT (with a
//! queue so only one is in flight), FETCH with attribute merging, DELETE,
//! unsolicited mailbox updates, and IDLE (RFC 2177) with an automatic
//! DONE+IDLE refresh cycle.

pub mod args;
pub mod command;
pub mod engine;
pub mod lexer;
pub mod stream;
pub mod tag;
pub mod types;
pub mod uri;
pub mod wire;

mod error;

pub use args::{ArgKind, ImapArg, parse_args};
pub use command::Command;
pub use engine::{Completion, Connection, DEFAULT_FETCH_ITEMS, EngineEvent, IDLE_REFRESH};
pub use error::{Error, Result};
pub use stream::ImapStream;
pub use tag::TagGenerator;
pub use types::{Capabilities, Header, Mailbox, Message, MessagePart, RecvMode, Status};
pub use uri::ImapUri;
pub use wire::LineBuffer;

/// IMAP protocol version supported.
pub const IMAP_VERSION: &str = "IMAP4rev1";
