//! The per-account worker agent.
//!
//! Each account gets one worker task that exclusively owns one IMAP
//! connection. The worker waits on the union of (inbound action queue,
//! socket readable, IDLE refresh timer) and dispatches exactly one event
//! per iteration, which keeps the protocol state machine linear: a network
//! event and an action are never interleaved within one step.

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use tern_imap::engine::{Connection, DEFAULT_FETCH_ITEMS, EngineEvent};
use tern_imap::{ImapUri, RecvMode};

use crate::connect;
use crate::messages::{Action, ActionMessage, CertInfo, StatusLevel, Update};

/// How often the worker checks whether an active IDLE needs refreshing.
const TIMER_INTERVAL: Duration = Duration::from_secs(30);

/// Handle the coordinator keeps per worker: the action queue in, the update
/// queue out, and the task itself.
#[derive(Debug)]
pub struct WorkerHandle {
    /// Sends actions to the worker. Enqueueing never blocks.
    pub actions: UnboundedSender<ActionMessage>,
    /// Receives updates from the worker.
    pub updates: UnboundedReceiver<Update>,
    /// The worker task, for teardown.
    pub task: JoinHandle<()>,
}

/// A per-account background agent owning one IMAP connection.
pub struct Worker {
    actions: UnboundedReceiver<ActionMessage>,
    updates: UnboundedSender<Update>,
    conn: Option<Connection>,
    /// After a connection error, only `Shutdown` is honoured.
    failed: bool,
}

impl Worker {
    /// Spawns a worker task and returns the coordinator-side handle.
    #[must_use]
    pub fn spawn() -> WorkerHandle {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let worker = Self {
            actions: action_rx,
            updates: update_tx,
            conn: None,
            failed: false,
        };
        let task = tokio::spawn(worker.run());

        WorkerHandle {
            actions: action_tx,
            updates: update_rx,
            task,
        }
    }

    async fn run(mut self) {
        let mut timer = tokio::time::interval(TIMER_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            // Evaluated before the select so the branch guard does not
            // borrow `self` while the branch futures hold its fields.
            let pollable = self.pollable();

            tokio::select! {
                msg = self.actions.recv() => {
                    match msg {
                        // Coordinator dropped the handle: treat as shutdown.
                        None => break,
                        Some(msg) => {
                            if self.handle_action(msg).await {
                                break;
                            }
                        }
                    }
                }
                result = receive_step(&mut self.conn), if pollable => {
                    if let Err(e) = result {
                        // Pending completions already fired with PreError.
                        self.fail(&format!("connection lost: {e}"));
                        self.conn = None;
                    }
                }
                _ = timer.tick() => {
                    if let Some(conn) = self.conn.as_mut() {
                        conn.idle_tick();
                    }
                }
            }

            self.pump().await;
        }

        tracing::debug!("worker exiting");
    }

    /// Whether the socket should be polled at all: not before the
    /// connection exists, not while the certificate prompt is open.
    fn pollable(&self) -> bool {
        !self.failed
            && self
                .conn
                .as_ref()
                .is_some_and(|c| c.mode != RecvMode::Wait)
    }

    /// Handles one action. Returns true when the worker should exit.
    async fn handle_action(&mut self, msg: ActionMessage) -> bool {
        tracing::debug!(id = msg.id, action = ?msg.action, "action");
        self.post(Update::Ack(msg.id));

        match msg.action {
            Action::Shutdown => {
                if let Some(mut conn) = self.conn.take() {
                    conn.close().await;
                }
                return true;
            }

            _ if self.failed => {
                self.post(Update::Status {
                    level: StatusLevel::Error,
                    text: "account is disconnected".to_string(),
                });
            }

            Action::Connect(uri) => self.handle_connect(&uri).await,

            Action::CertOkay => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.mode = RecvMode::Line;
                }
            }

            Action::CertReject => {
                if let Some(mut conn) = self.conn.take() {
                    conn.close().await;
                }
                self.failed = true;
                self.post(Update::ConnectError(
                    "server certificate rejected".to_string(),
                ));
            }

            Action::ListMailboxes => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.list(Some(status_on_failure(&self.updates)), "", "*");
                } else {
                    self.not_connected();
                }
            }

            Action::SelectMailbox(name) => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.select(Some(status_on_failure(&self.updates)), &name);
                } else {
                    self.not_connected();
                }
            }

            Action::FetchMessages { min, max } => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.fetch(
                        Some(status_on_failure(&self.updates)),
                        min,
                        max,
                        DEFAULT_FETCH_ITEMS,
                    );
                } else {
                    self.not_connected();
                }
            }

            Action::DeleteMailbox(name) => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.delete(Some(status_on_failure(&self.updates)), &name);
                } else {
                    self.not_connected();
                }
            }
        }

        false
    }

    /// Parses the URI and dials the server. With implicit TLS the
    /// certificate is surfaced for approval before any line is processed.
    async fn handle_connect(&mut self, uri: &str) {
        let uri = match ImapUri::parse(uri) {
            Ok(uri) => uri,
            Err(e) => {
                self.fail(&e.to_string());
                return;
            }
        };
        tracing::debug!(
            host = %uri.host,
            port = uri.port,
            tls = uri.use_tls,
            "connecting to IMAP server"
        );

        let host = uri.host.clone();
        match Connection::connect(uri, connect::on_greeting(self.updates.clone())).await {
            Ok(conn) => {
                if let Some(der) = conn.peer_certificate() {
                    self.post(Update::ConnectCertCheck(CertInfo { host, der }));
                }
                self.conn = Some(conn);
            }
            Err(e) => self.fail(&format!("error connecting to IMAP server: {e}")),
        }
    }

    /// Post-event housekeeping: translate engine events into updates,
    /// perform a requested TLS upgrade, re-enter IDLE, flush the wire.
    async fn pump(&mut self) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };

        let mut closed = false;
        for event in conn.take_events() {
            match event {
                EngineEvent::MailboxUpdated(name) => {
                    if let Some(mbox) = conn.mailbox(&name) {
                        let _ = self.updates.send(Update::MailboxUpdated(mbox.clone()));
                    }
                }
                EngineEvent::MailboxDeleted(name) => {
                    let _ = self.updates.send(Update::MailboxDeleted(name));
                }
                EngineEvent::MessageUpdated { mailbox, index } => {
                    let message = conn.mailbox(&mailbox).and_then(|m| m.message(index));
                    if let Some(message) = message {
                        let _ = self.updates.send(Update::MessageUpdated {
                            mailbox,
                            message: message.clone(),
                        });
                    }
                }
                EngineEvent::MessageDeleted { mailbox, uid } => {
                    let _ = self
                        .updates
                        .send(Update::MessageDeleted { mailbox, uid });
                }
                EngineEvent::Closed => closed = true,
            }
        }

        if closed {
            if let Some(mut conn) = self.conn.take() {
                conn.close().await;
            }
            self.fail("server closed the connection");
            return;
        }

        if conn.wants_tls_upgrade() {
            match conn.upgrade_tls().await {
                Ok(()) => {
                    tracing::debug!("socket upgraded to TLS");
                    connect::request_capabilities(conn, self.updates.clone());
                }
                Err(e) => {
                    self.fail(&format!("TLS connection failed: {e}"));
                    self.conn = None;
                    return;
                }
            }
        }

        conn.maybe_idle();

        if let Err(e) = conn.flush().await {
            self.fail(&format!("connection lost: {e}"));
            self.conn = None;
        }
    }

    fn fail(&mut self, text: &str) {
        tracing::error!(error = text, "worker entering failed state");
        self.failed = true;
        self.post(Update::ConnectError(text.to_string()));
    }

    fn not_connected(&self) {
        self.post(Update::Status {
            level: StatusLevel::Error,
            text: "not connected".to_string(),
        });
    }

    fn post(&self, update: Update) {
        // The coordinator may already be gone during teardown.
        let _ = self.updates.send(update);
    }
}

/// Awaits readable data on the connection, or parks forever when there is
/// no connection (the select guard keeps this branch disabled then).
async fn receive_step(conn: &mut Option<Connection>) -> tern_imap::Result<usize> {
    match conn.as_mut() {
        Some(conn) => conn.receive().await,
        None => std::future::pending().await,
    }
}

/// A completion that surfaces server refusals in the status bar and stays
/// quiet on success, where the untagged data already produced updates.
fn status_on_failure(
    updates: &UnboundedSender<Update>,
) -> tern_imap::Completion<tern_imap::ImapStream> {
    let updates = updates.clone();
    Box::new(move |_conn, status, args| {
        if !status.is_ok() {
            let text = if args.is_empty() {
                format!("command failed: {status:?}")
            } else {
                args.to_string()
            };
            let _ = updates.send(Update::Status {
                level: StatusLevel::Error,
                text,
            });
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn action(id: u64, action: Action) -> ActionMessage {
        ActionMessage { id, action }
    }

    #[tokio::test]
    async fn shutdown_exits_task() {
        let mut handle = Worker::spawn();

        handle.actions.send(action(1, Action::Shutdown)).unwrap();
        handle.task.await.unwrap();

        assert_eq!(handle.updates.recv().await.unwrap(), Update::Ack(1));
    }

    #[tokio::test]
    async fn dropping_handle_stops_worker() {
        let handle = Worker::spawn();
        let task = handle.task;
        drop(handle.actions);

        task.await.unwrap();
    }

    #[tokio::test]
    async fn actions_before_connect_report_status() {
        let mut handle = Worker::spawn();

        handle
            .actions
            .send(action(7, Action::ListMailboxes))
            .unwrap();

        assert_eq!(handle.updates.recv().await.unwrap(), Update::Ack(7));
        match handle.updates.recv().await.unwrap() {
            Update::Status { level, text } => {
                assert_eq!(level, StatusLevel::Error);
                assert_eq!(text, "not connected");
            }
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_uri_fails_connect_and_locks_worker() {
        let mut handle = Worker::spawn();

        handle
            .actions
            .send(action(1, Action::Connect("smtp://x".to_string())))
            .unwrap();

        assert_eq!(handle.updates.recv().await.unwrap(), Update::Ack(1));
        assert!(matches!(
            handle.updates.recv().await.unwrap(),
            Update::ConnectError(_)
        ));

        // Everything but Shutdown is refused now.
        handle
            .actions
            .send(action(2, Action::SelectMailbox("INBOX".to_string())))
            .unwrap();
        assert_eq!(handle.updates.recv().await.unwrap(), Update::Ack(2));
        assert!(matches!(
            handle.updates.recv().await.unwrap(),
            Update::Status {
                level: StatusLevel::Error,
                ..
            }
        ));

        handle.actions.send(action(3, Action::Shutdown)).unwrap();
        handle.task.await.unwrap();
    }

    #[tokio::test]
    async fn update_queue_preserves_fifo_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..100_u64 {
            tx.send(Update::Ack(i)).unwrap();
        }
        for i in 0..100_u64 {
            assert_eq!(rx.recv().await.unwrap(), Update::Ack(i));
        }
    }
}
