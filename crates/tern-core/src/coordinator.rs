//! The foreground coordinator.
//!
//! One task owns the account mirrors and the renderer. Each tick it drains
//! every worker's update queue, folds the updates into the model, marks the
//! affected panels dirty, translates queued UI commands into actions and
//! redraws. It never blocks on a worker.
//!
//! The renderer and the key-binding layer are external collaborators; only
//! their boundary contracts live here: [`Renderer`], [`UiCommand`] and
//! [`DirtyPanels`].

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::messages::{Action, ActionMessage, StatusLevel, Update};
use crate::model::AccountState;
use crate::worker::{Worker, WorkerHandle};

/// Interval of the render timer that also paces update draining.
const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Which panels need redrawing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyPanels {
    /// The mailbox sidebar.
    pub sidebar: bool,
    /// The message list.
    pub message_list: bool,
    /// The status bar.
    pub status_bar: bool,
}

impl DirtyPanels {
    /// Every panel dirty.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            sidebar: true,
            message_list: true,
            status_bar: true,
        }
    }

    /// Only the sidebar dirty.
    #[must_use]
    pub const fn sidebar() -> Self {
        Self {
            sidebar: true,
            message_list: false,
            status_bar: false,
        }
    }

    /// Only the message list dirty.
    #[must_use]
    pub const fn message_list() -> Self {
        Self {
            sidebar: false,
            message_list: true,
            status_bar: false,
        }
    }

    /// Only the status bar dirty.
    #[must_use]
    pub const fn status_bar() -> Self {
        Self {
            sidebar: false,
            message_list: false,
            status_bar: true,
        }
    }

    /// Whether anything needs redrawing.
    #[must_use]
    pub const fn any(self) -> bool {
        self.sidebar || self.message_list || self.status_bar
    }

    /// Accumulates another dirty set.
    pub fn merge(&mut self, other: Self) {
        self.sidebar |= other.sidebar;
        self.message_list |= other.message_list;
        self.status_bar |= other.status_bar;
    }
}

/// Drawing surface contract; the terminal cell renderer implements this.
pub trait Renderer {
    /// Redraws the dirty panels from the account mirrors.
    fn draw(&mut self, accounts: &[&AccountState], selected_account: usize, dirty: DirtyPanels);
}

/// Commands the key-binding layer produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    /// Move the message cursor by a signed amount.
    SeekMessage(isize),
    /// Jump the message cursor to an absolute index.
    SelectMessage(usize),
    /// Switch to the next account.
    NextAccount,
    /// Switch to the previous account.
    PreviousAccount,
    /// Select a mailbox on the current account.
    SelectMailbox(String),
    /// Fetch a sequence range of the selected mailbox.
    FetchMessages {
        /// First sequence number.
        min: u32,
        /// Last sequence number.
        max: u32,
    },
    /// Delete a mailbox on the current account.
    DeleteMailbox(String),
    /// Leave the main loop.
    Quit,
}

/// One configured account: its mirror plus the worker that feeds it.
struct Account {
    state: AccountState,
    handle: WorkerHandle,
    next_action_id: u64,
}

impl Account {
    fn send_action(&mut self, action: Action) {
        self.next_action_id += 1;
        let msg = ActionMessage {
            id: self.next_action_id,
            action,
        };
        if self.handle.actions.send(msg).is_err() {
            self.state
                .set_status(StatusLevel::Error, "worker is gone");
        }
    }
}

/// The single foreground coordinator.
pub struct Coordinator<R: Renderer> {
    accounts: Vec<Account>,
    selected_account: usize,
    renderer: R,
    commands: UnboundedReceiver<UiCommand>,
    exit: bool,
}

impl<R: Renderer> Coordinator<R> {
    /// Creates a coordinator and the queue the key-binding layer feeds.
    #[must_use]
    pub fn new(renderer: R) -> (Self, UnboundedSender<UiCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                accounts: Vec::new(),
                selected_account: 0,
                renderer,
                commands: rx,
                exit: false,
            },
            tx,
        )
    }

    /// Spawns a worker for the account and asks it to connect. Called for
    /// each configured account; a configuration reload only adds and
    /// removes accounts, it never disturbs surviving connections.
    pub fn add_account(&mut self, name: &str, uri: &str) {
        let handle = Worker::spawn();
        let mut account = Account {
            state: AccountState::new(name),
            handle,
            next_action_id: 0,
        };
        account.send_action(Action::Connect(uri.to_string()));
        self.accounts.push(account);
    }

    /// Shuts the named account's worker down and drops its mirror.
    pub fn remove_account(&mut self, name: &str) {
        if let Some(pos) = self.accounts.iter().position(|a| a.state.name == name) {
            let mut account = self.accounts.remove(pos);
            account.send_action(Action::Shutdown);
            if self.selected_account >= self.accounts.len() {
                self.selected_account = 0;
            }
        }
    }

    /// Read access for the renderer between ticks.
    #[must_use]
    pub fn accounts(&self) -> Vec<&AccountState> {
        self.accounts.iter().map(|a| &a.state).collect()
    }

    /// Runs until a `Quit` command arrives. Waits only on the command
    /// queue and the render timer; update queues are drained with
    /// non-blocking reads every tick.
    pub async fn run(&mut self) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !self.exit {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        None => break,
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                _ = tick.tick() => {}
            }

            let dirty = self.drain_updates();
            if dirty.any() {
                self.render(dirty);
            }
        }

        // Teardown: every worker logs out and exits.
        for account in &mut self.accounts {
            account.send_action(Action::Shutdown);
        }
    }

    /// Drains every worker's update queue into the model. Never blocks.
    pub fn drain_updates(&mut self) -> DirtyPanels {
        let mut dirty = DirtyPanels::default();

        for account in &mut self.accounts {
            while let Ok(update) = account.handle.updates.try_recv() {
                match &update {
                    Update::ConnectCertCheck(cert) => {
                        // The chain was already verified against the webpki
                        // roots during the handshake; approve and surface
                        // the host in the status bar.
                        tracing::debug!(host = %cert.host, "approving server certificate");
                        account.send_action(Action::CertOkay);
                    }
                    Update::ConnectDone => {
                        // A fresh connection is worth a mailbox listing.
                        account.send_action(Action::ListMailboxes);
                    }
                    _ => {}
                }
                dirty.merge(account.state.apply_update(update));
            }
        }

        dirty
    }

    /// Translates one UI command into cursor movement or worker actions.
    pub fn handle_command(&mut self, cmd: UiCommand) {
        match cmd {
            UiCommand::SeekMessage(amount) => {
                let Some(account) = self.accounts.get_mut(self.selected_account) else {
                    return;
                };
                let len = account
                    .state
                    .selected_mailbox()
                    .map_or(0, |m| m.messages.len());
                if len == 0 {
                    return;
                }
                let current = isize::try_from(account.state.ui.selected_message).unwrap_or(0);
                let last = isize::try_from(len - 1).unwrap_or(0);
                let target = (current + amount).clamp(0, last);
                account.state.ui.selected_message =
                    usize::try_from(target).unwrap_or(0);
            }

            UiCommand::SelectMessage(index) => {
                let Some(account) = self.accounts.get_mut(self.selected_account) else {
                    return;
                };
                account.state.ui.selected_message = index;
                account.state.clamp_cursor();
            }

            UiCommand::NextAccount => {
                if !self.accounts.is_empty() {
                    self.selected_account = (self.selected_account + 1) % self.accounts.len();
                }
            }

            UiCommand::PreviousAccount => {
                if !self.accounts.is_empty() {
                    self.selected_account =
                        (self.selected_account + self.accounts.len() - 1) % self.accounts.len();
                }
            }

            UiCommand::SelectMailbox(name) => {
                if let Some(account) = self.accounts.get_mut(self.selected_account) {
                    account.state.set_status(StatusLevel::Loading, format!("opening {name}"));
                    account.send_action(Action::SelectMailbox(name));
                }
            }

            UiCommand::FetchMessages { min, max } => {
                if let Some(account) = self.accounts.get_mut(self.selected_account) {
                    account.send_action(Action::FetchMessages { min, max });
                }
            }

            UiCommand::DeleteMailbox(name) => {
                if let Some(account) = self.accounts.get_mut(self.selected_account) {
                    account.send_action(Action::DeleteMailbox(name));
                }
            }

            UiCommand::Quit => self.exit = true,
        }
    }

    fn render(&mut self, dirty: DirtyPanels) {
        let states: Vec<&AccountState> = self.accounts.iter().map(|a| &a.state).collect();
        self.renderer.draw(&states, self.selected_account, dirty);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tern_imap::Mailbox;

    /// Renderer that only counts invocations.
    struct NullRenderer {
        draws: usize,
    }

    impl Renderer for NullRenderer {
        fn draw(&mut self, _accounts: &[&AccountState], _selected: usize, _dirty: DirtyPanels) {
            self.draws += 1;
        }
    }

    fn coordinator_with_account() -> Coordinator<NullRenderer> {
        let (mut coordinator, _commands) = Coordinator::new(NullRenderer { draws: 0 });

        // Assemble the account by hand; no network involved.
        let mut account = Account {
            state: AccountState::new("work"),
            handle: Worker::spawn(),
            next_action_id: 0,
        };
        let mut inbox = Mailbox::new("INBOX");
        inbox.selected = true;
        for i in 1..=5_u32 {
            inbox.message_mut(i).uid = Some(i64::from(i) + 100);
        }
        account.state.selected = Some("INBOX".to_string());
        account.state.mailboxes.push(inbox);
        coordinator.accounts.push(account);
        coordinator
    }

    #[tokio::test]
    async fn seek_message_clamps_to_list() {
        let mut coordinator = coordinator_with_account();

        coordinator.handle_command(UiCommand::SeekMessage(3));
        assert_eq!(coordinator.accounts[0].state.ui.selected_message, 3);

        coordinator.handle_command(UiCommand::SeekMessage(10));
        assert_eq!(coordinator.accounts[0].state.ui.selected_message, 4);

        coordinator.handle_command(UiCommand::SeekMessage(-100));
        assert_eq!(coordinator.accounts[0].state.ui.selected_message, 0);
    }

    #[tokio::test]
    async fn select_message_out_of_range_is_clamped() {
        let mut coordinator = coordinator_with_account();

        coordinator.handle_command(UiCommand::SelectMessage(42));

        assert_eq!(coordinator.accounts[0].state.ui.selected_message, 4);
    }

    #[tokio::test]
    async fn account_cycling_wraps() {
        let mut coordinator = coordinator_with_account();
        coordinator.accounts.push(Account {
            state: AccountState::new("home"),
            handle: Worker::spawn(),
            next_action_id: 0,
        });

        coordinator.handle_command(UiCommand::NextAccount);
        assert_eq!(coordinator.selected_account, 1);
        coordinator.handle_command(UiCommand::NextAccount);
        assert_eq!(coordinator.selected_account, 0);
        coordinator.handle_command(UiCommand::PreviousAccount);
        assert_eq!(coordinator.selected_account, 1);
    }

    #[tokio::test]
    async fn quit_sets_exit() {
        let mut coordinator = coordinator_with_account();

        coordinator.handle_command(UiCommand::Quit);

        assert!(coordinator.exit);
    }

    #[tokio::test]
    async fn select_mailbox_enqueues_action_and_sets_status() {
        let mut coordinator = coordinator_with_account();

        coordinator.handle_command(UiCommand::SelectMailbox("Archive".to_string()));

        let account = &coordinator.accounts[0];
        assert!(account.state.status.text.contains("Archive"));
        assert_eq!(account.next_action_id, 1);
    }
}
