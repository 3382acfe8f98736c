//! # tern-core
//!
//! The worker/coordinator layer of the tern mail client: one foreground
//! coordinator plus one background worker per account, each worker owning
//! exactly one IMAP engine from [`tern_imap`].
//!
//! ## Shape
//!
//! Workers and the coordinator exchange structured messages over a pair of
//! unbounded queues per account (actions in, updates out). Enqueueing never
//! blocks; payloads are owned transfers. The worker turns the asynchronous
//! protocol into an eventually-consistent mailbox mirror that the renderer
//! reads: engine events become snapshot updates, the coordinator folds them
//! into [`model::AccountState`] and redraws the dirty panels.
//!
//! Errors never cross a task boundary as panics: connect failures,
//! authentication refusals and disconnects all arrive as
//! [`messages::Update`] values and end up in the account's status line.
//!
//! The renderer, key-binding tables and configuration parsing are external
//! collaborators; their boundary contracts are [`coordinator::Renderer`],
//! [`coordinator::UiCommand`] and the account name/URI pair handed to
//! [`coordinator::Coordinator::add_account`].

pub mod coordinator;
pub mod messages;
pub mod model;
pub mod worker;

mod connect;

pub use coordinator::{Coordinator, DirtyPanels, Renderer, UiCommand};
pub use messages::{Action, ActionMessage, CertInfo, StatusLevel, Update};
pub use model::{AccountState, StatusLine, UiCursors};
pub use worker::{Worker, WorkerHandle};
