//! The IMAP protocol engine.
//!
//! A [`Connection`] owns the socket, the tag allocator and the pending
//! callback table. Every protocol step is expressed as registering a
//! one-shot completion and returning; the completion fires synchronously
//! from within [`Connection::receive`] when the matching tagged status
//! arrives. The engine itself never suspends between protocol steps, so the
//! owning worker's poll is the only suspension point.

mod dispatch;
mod fetch;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::command::Command;
use crate::stream::ImapStream;
use crate::tag::TagGenerator;
use crate::types::{Capabilities, Mailbox, RecvMode, Status};
use crate::uri::ImapUri;
use crate::wire::LineBuffer;
use crate::{Error, Result};

/// Default attribute list requested when populating a message list.
pub const DEFAULT_FETCH_ITEMS: &str = "UID FLAGS INTERNALDATE BODYSTRUCTURE BODY.PEEK[\
HEADER.FIELDS (DATE FROM SUBJECT TO CC MESSAGE-ID REFERENCES \
CONTENT-TYPE IN-REPLY-TO REPLY-TO)]";

/// Re-issue IDLE before the server's 29-minute inactivity kill.
pub const IDLE_REFRESH: Duration = Duration::from_secs(28 * 60);

/// One-shot completion invoked when the tagged status for a command
/// arrives, or with [`Status::PreError`] when the engine gives up on it.
pub type Completion<S> = Box<dyn FnOnce(&mut Connection<S>, Status, &str) + Send>;

/// A pending-callback record, keyed by tag in the connection.
struct PendingEntry<S> {
    complete: Option<Completion<S>>,
}

/// State changes the engine observed, drained by the owning worker after
/// every receive step and translated into update messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A mailbox record changed (LIST data, EXISTS, RECENT, flags).
    MailboxUpdated(String),
    /// A mailbox was deleted server-side.
    MailboxDeleted(String),
    /// A message record changed.
    MessageUpdated {
        /// Owning mailbox name.
        mailbox: String,
        /// Sequence index of the message.
        index: u32,
    },
    /// A message was expunged.
    MessageDeleted {
        /// Owning mailbox name.
        mailbox: String,
        /// UID of the removed message, when known.
        uid: Option<i64>,
    },
    /// The server announced it is closing the connection.
    Closed,
}

/// An IMAP connection and its protocol state.
///
/// Exclusively owned by one worker for its whole lifetime; callbacks only
/// ever see it as a borrowed `&mut` for the duration of one invocation.
pub struct Connection<S = ImapStream> {
    stream: Option<S>,
    recv_buf: LineBuffer,
    outbox: Vec<u8>,
    /// Receive mode; `Wait` holds processing until the certificate prompt
    /// resolves.
    pub mode: RecvMode,
    tags: TagGenerator,
    pending: HashMap<String, PendingEntry<S>>,
    /// Server capabilities, unknown until the first CAPABILITY data.
    pub caps: Option<Capabilities>,
    /// The URI this connection was established from.
    pub uri: ImapUri,
    /// Mailboxes known to this connection.
    pub mailboxes: Vec<Mailbox>,
    /// Name of the currently selected mailbox.
    pub selected: Option<String>,
    /// SELECT in flight: untagged data already belongs to this mailbox.
    pending_select: Option<String>,
    select_queue: VecDeque<(String, Option<Completion<S>>)>,
    /// Command bytes queued while an IDLE is being wound down.
    deferred: Vec<u8>,
    /// Payload to emit when the server sends a `+` continuation.
    continuation: Option<Vec<u8>>,
    idle_tag: Option<String>,
    idle_active: bool,
    idle_since: Option<Instant>,
    /// Instant of the last successful network read.
    pub last_network: Instant,
    /// Whether authentication completed.
    pub logged_in: bool,
    closing: bool,
    tls_upgrade_wanted: bool,
    events: VecDeque<EngineEvent>,
}

impl Connection<ImapStream> {
    /// Resolves the host, opens the socket (with implicit TLS for `imaps`)
    /// and installs the `*`-tagged completion awaiting the server greeting.
    ///
    /// # Errors
    ///
    /// Returns a connect error for DNS, TCP or TLS handshake failures.
    pub async fn connect(uri: ImapUri, greeting: Completion<ImapStream>) -> Result<Self> {
        let stream = ImapStream::open(&uri.host, uri.port, uri.use_tls).await?;

        // With TLS the main thread gets to inspect the certificate before
        // any IMAP traffic is processed.
        let mode = if uri.use_tls {
            RecvMode::Wait
        } else {
            RecvMode::Line
        };

        Ok(Self::from_stream(stream, uri, mode, greeting))
    }

    /// Returns the DER bytes of the server certificate, if the stream is
    /// encrypted.
    #[must_use]
    pub fn peer_certificate(&self) -> Option<Vec<u8>> {
        self.stream.as_ref().and_then(ImapStream::peer_certificate)
    }

    /// Upgrades the socket to TLS in place. Nothing may be transmitted
    /// between the STARTTLS OK and this call.
    ///
    /// # Errors
    ///
    /// Returns a TLS error if the handshake fails; the connection is
    /// unusable afterwards.
    pub async fn upgrade_tls(&mut self) -> Result<()> {
        self.tls_upgrade_wanted = false;
        let stream = self.stream.take().ok_or(Error::Disconnected)?;
        let host = self.uri.host.clone();
        self.stream = Some(stream.upgrade_to_tls(&host).await?);
        // Stale capabilities predate the encrypted channel.
        self.caps = None;
        Ok(())
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Builds a connection over an established stream.
    pub fn from_stream(
        stream: S,
        uri: ImapUri,
        mode: RecvMode,
        greeting: Completion<S>,
    ) -> Self {
        let mut pending = HashMap::new();
        pending.insert(
            "*".to_string(),
            PendingEntry {
                complete: Some(greeting),
            },
        );

        Self {
            stream: Some(stream),
            recv_buf: LineBuffer::new(),
            outbox: Vec::new(),
            mode,
            tags: TagGenerator::default(),
            pending,
            caps: None,
            uri,
            mailboxes: Vec::new(),
            selected: None,
            pending_select: None,
            select_queue: VecDeque::new(),
            deferred: Vec::new(),
            continuation: None,
            idle_tag: None,
            idle_active: false,
            idle_since: None,
            last_network: Instant::now(),
            logged_in: false,
            closing: false,
            tls_upgrade_wanted: false,
            events: VecDeque::new(),
        }
    }

    /// Reads available bytes, consumes complete logical lines and feeds each
    /// to the line dispatcher. Returns the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] when the peer closed the connection;
    /// all pending completions have fired with [`Status::PreError`] by the
    /// time this returns.
    pub async fn receive(&mut self) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Disconnected);
        };

        let n = match stream.read_buf(self.recv_buf.bytes_mut()).await {
            Ok(n) => n,
            Err(e) => {
                self.fail_pending();
                return Err(e.into());
            }
        };
        if n == 0 {
            self.fail_pending();
            return Err(Error::Disconnected);
        }
        self.last_network = Instant::now();

        loop {
            match self.recv_buf.next_line() {
                Ok(Some(line)) => {
                    if let Err(e) = dispatch::handle_line(self, &line) {
                        // Malformed line: log, drop, carry on.
                        tracing::warn!(error = %e, "dropping malformed server line");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "resetting receive buffer");
                    self.recv_buf.clear();
                    break;
                }
            }
        }

        Ok(n)
    }

    /// Allocates the next tag, serializes the command and records the
    /// pending completion. If an IDLE is active, `DONE` is emitted first and
    /// the command bytes are held back until the IDLE tag completes.
    ///
    /// Returns the allocated tag.
    pub fn send(&mut self, complete: Option<Completion<S>>, cmd: &Command) -> String {
        if self.idle_active {
            self.leave_idle();
        }

        let tag = self.tags.next();
        let bytes = cmd.serialize(&tag);
        self.pending
            .insert(tag.clone(), PendingEntry { complete });
        tracing::debug!(tag = %tag, "queueing command");

        if self.idle_tag.is_some() {
            self.deferred.extend_from_slice(&bytes);
        } else {
            self.outbox.extend_from_slice(&bytes);
        }
        tag
    }

    /// Writes everything queued for transmission.
    ///
    /// # Errors
    ///
    /// Propagates socket write errors.
    pub async fn flush(&mut self) -> Result<()> {
        if self.outbox.is_empty() {
            return Ok(());
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Disconnected);
        };
        stream.write_all(&self.outbox).await?;
        stream.flush().await?;
        self.outbox.clear();
        Ok(())
    }

    /// Issues LOGOUT if logged in, shuts the socket down and fires every
    /// pending completion with [`Status::PreError`].
    pub async fn close(&mut self) {
        if self.logged_in && !self.closing {
            let _ = self.send(None, &Command::Logout);
            let _ = self.flush().await;
        }
        self.closing = true;
        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.shutdown().await;
        }
        self.stream = None;
        self.fail_pending();
    }

    /// Fires every pending completion (and queued SELECT) with
    /// [`Status::PreError`].
    pub fn fail_pending(&mut self) {
        let entries: Vec<PendingEntry<S>> =
            self.pending.drain().map(|(_, entry)| entry).collect();
        for mut entry in entries {
            if let Some(cb) = entry.complete.take() {
                cb(self, Status::PreError, "");
            }
        }
        let queued: Vec<_> = self.select_queue.drain(..).collect();
        for (_, complete) in queued {
            if let Some(cb) = complete {
                cb(self, Status::PreError, "");
            }
        }
        self.pending_select = None;
        self.idle_tag = None;
        self.idle_active = false;
    }

    // === Command helpers ===

    /// Sends CAPABILITY.
    pub fn capability(&mut self, complete: Option<Completion<S>>) -> String {
        self.send(complete, &Command::Capability)
    }

    /// Sends LIST with the given reference name and pattern.
    pub fn list(
        &mut self,
        complete: Option<Completion<S>>,
        reference: &str,
        pattern: &str,
    ) -> String {
        self.send(
            complete,
            &Command::List {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            },
        )
    }

    /// Sends SELECT, or queues it if another SELECT is in flight.
    ///
    /// SELECT invalidates unsolicited updates tied to the prior mailbox, so
    /// only one may be outstanding; queued names are issued in order as
    /// their predecessors complete.
    pub fn select(&mut self, complete: Option<Completion<S>>, mailbox: &str) {
        if self.pending_select.is_some() {
            self.select_queue.push_back((mailbox.to_string(), complete));
            return;
        }
        self.issue_select(mailbox.to_string(), complete);
    }

    fn issue_select(&mut self, mailbox: String, complete: Option<Completion<S>>) {
        self.pending_select = Some(mailbox.clone());
        let name = mailbox.clone();
        self.send(
            Some(Box::new(move |conn, status, args| {
                conn.finish_select(&name, status);
                if let Some(cb) = complete {
                    cb(conn, status, args);
                }
                // On PreError the connection is going away; fail_pending
                // resolves whatever is still queued.
                if status != Status::PreError
                    && let Some((next, cb)) = conn.select_queue.pop_front()
                {
                    conn.issue_select(next, cb);
                }
            })),
            &Command::Select { mailbox },
        );
    }

    /// The `selected` marker moves only on successful completion.
    fn finish_select(&mut self, name: &str, status: Status) {
        self.pending_select = None;
        if status != Status::Ok {
            return;
        }
        for mbox in &mut self.mailboxes {
            mbox.selected = false;
        }
        self.selected = Some(name.to_string());
        let mbox = self.mailbox_mut(name);
        mbox.selected = true;
        let name = mbox.name.clone();
        self.events.push_back(EngineEvent::MailboxUpdated(name));
    }

    /// Sends FETCH over the inclusive sequence range `[min, max]` with the
    /// given attribute list, marking affected records as fetching.
    pub fn fetch(
        &mut self,
        complete: Option<Completion<S>>,
        min: u32,
        max: u32,
        items: &str,
    ) -> String {
        if let Some(mbox) = self.target_mailbox_mut() {
            for msg in &mut mbox.messages {
                if msg.index >= min && msg.index <= max {
                    msg.fetching = true;
                }
            }
        }
        self.send(
            complete,
            &Command::Fetch {
                min,
                max,
                items: items.to_string(),
            },
        )
    }

    /// Sends DELETE; on OK the mailbox record is dropped and a deletion
    /// event emitted.
    pub fn delete(&mut self, complete: Option<Completion<S>>, mailbox: &str) -> String {
        let name = mailbox.to_string();
        self.send(
            Some(Box::new(move |conn, status, args| {
                if status == Status::Ok {
                    conn.mailboxes.retain(|m| m.name != name);
                    if conn.selected.as_deref() == Some(name.as_str()) {
                        conn.selected = None;
                    }
                    conn.events
                        .push_back(EngineEvent::MailboxDeleted(name.clone()));
                }
                if let Some(cb) = complete {
                    cb(conn, status, args);
                }
            })),
            &Command::Delete {
                mailbox: mailbox.to_string(),
            },
        )
    }

    /// Queues the in-band payload to transmit when the server sends a `+`
    /// continuation (the non-SASL-IR arm of AUTHENTICATE).
    pub fn queue_continuation(&mut self, payload: Vec<u8>) {
        self.continuation = Some(payload);
    }

    // === IDLE ===

    /// Returns true when the connection is eligible to enter IDLE: the
    /// server supports it, we are logged in with a mailbox selected, and no
    /// command is outstanding.
    #[must_use]
    pub fn can_idle(&self) -> bool {
        self.caps.as_ref().is_some_and(|c| c.idle)
            && self.logged_in
            && self.selected.is_some()
            && self.pending.is_empty()
            && self.continuation.is_none()
            && self.idle_tag.is_none()
            && !self.closing
            && self.mode == RecvMode::Line
    }

    /// Enters IDLE if eligible. The connection becomes a pure
    /// untagged-event stream once the server acknowledges with `+`.
    pub fn maybe_idle(&mut self) {
        if !self.can_idle() {
            return;
        }
        let tag = self.send(
            Some(Box::new(|conn, _status, _args| {
                // The IDLE tag resolves after DONE; release anything that
                // queued up behind it.
                conn.idle_tag = None;
                conn.idle_active = false;
                if conn.mode == RecvMode::Idle {
                    conn.mode = RecvMode::Line;
                }
                let deferred = std::mem::take(&mut conn.deferred);
                conn.outbox.extend_from_slice(&deferred);
            })),
            &Command::Idle,
        );
        self.idle_tag = Some(tag);
    }

    /// Winds down an active IDLE by sending DONE.
    pub fn leave_idle(&mut self) {
        if !self.idle_active {
            return;
        }
        self.outbox.extend_from_slice(&Command::Done.serialize(""));
        self.idle_active = false;
        self.idle_since = None;
        self.mode = RecvMode::Line;
    }

    /// Periodic keepalive: cycles DONE+IDLE before the server's inactivity
    /// timeout. Called from the worker's timer.
    pub fn idle_tick(&mut self) {
        if self.idle_active
            && self
                .idle_since
                .is_some_and(|since| since.elapsed() >= IDLE_REFRESH)
        {
            tracing::debug!("refreshing IDLE");
            self.leave_idle();
        }
    }

    // === State access ===

    /// Drains the events observed since the last call.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    /// Returns the mailbox with the given name.
    #[must_use]
    pub fn mailbox(&self, name: &str) -> Option<&Mailbox> {
        self.mailboxes.iter().find(|m| m.name == name)
    }

    /// Returns the mailbox record for `name`, creating it if needed.
    pub(crate) fn mailbox_mut(&mut self, name: &str) -> &mut Mailbox {
        if let Some(pos) = self.mailboxes.iter().position(|m| m.name == name) {
            return &mut self.mailboxes[pos];
        }
        self.mailboxes.push(Mailbox::new(name));
        let last = self.mailboxes.len() - 1;
        &mut self.mailboxes[last]
    }

    /// The mailbox untagged data currently applies to: a SELECT in flight
    /// wins over the selected one, because updates arriving after SELECT was
    /// issued already belong to the new mailbox.
    pub(crate) fn target_mailbox_mut(&mut self) -> Option<&mut Mailbox> {
        let name = self
            .pending_select
            .clone()
            .or_else(|| self.selected.clone())?;
        Some(self.mailbox_mut(&name))
    }

    /// Returns true once the server announced (or we initiated) closure.
    #[must_use]
    pub const fn is_closing(&self) -> bool {
        self.closing
    }

    /// Returns true when a STARTTLS completion asked for the socket to be
    /// upgraded. The worker performs the upgrade between poll iterations.
    #[must_use]
    pub const fn wants_tls_upgrade(&self) -> bool {
        self.tls_upgrade_wanted
    }

    /// Returns true while an IDLE is acknowledged and running.
    #[must_use]
    pub const fn is_idling(&self) -> bool {
        self.idle_active
    }

    /// Number of outstanding tagged commands.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // === Internals shared with the dispatcher ===

    pub(crate) fn pending_remove(&mut self, tag: &str) -> Option<Completion<S>> {
        self.pending.remove(tag).and_then(|mut e| e.complete.take())
    }

    pub(crate) fn push_event(&mut self, event: EngineEvent) {
        self.events.push_back(event);
    }

    pub(crate) fn take_continuation(&mut self) -> Option<Vec<u8>> {
        self.continuation.take()
    }

    pub(crate) fn outbox_mut(&mut self) -> &mut Vec<u8> {
        &mut self.outbox
    }

    pub(crate) const fn idle_requested(&self) -> bool {
        self.idle_tag.is_some()
    }

    pub(crate) fn begin_idle(&mut self) {
        self.idle_active = true;
        self.idle_since = Some(Instant::now());
        self.mode = RecvMode::Idle;
    }

    pub(crate) fn mark_closing(&mut self) {
        self.closing = true;
    }

    /// Asks the owning worker to upgrade the socket to TLS before anything
    /// else is transmitted. Called from a STARTTLS completion, which cannot
    /// perform the upgrade itself.
    pub fn request_tls_upgrade(&mut self) {
        self.tls_upgrade_wanted = true;
    }
}
