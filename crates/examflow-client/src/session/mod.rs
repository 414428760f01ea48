//! Session protocol client.
//!
//! One [`Shared`] per session holds everything the public handle and the
//! connection task both touch. The lock is never held across an await or a
//! consumer callback.
//!
//! Every connection task is stamped with the session epoch it was started
//! under. `disconnect()` bumps the epoch, so a task that is still unwinding
//! (mid-handshake, mid-backoff) finds itself superseded and drops whatever it
//! was about to write.

mod actor;
pub mod error;
pub(crate) mod inflight;
pub(crate) mod registry;
pub mod state;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use examflow_protocol::QueueCommand;
use examflow_protocol::destinations::ERRORS;

pub(crate) use actor::ConnectionTask;
pub use error::{CommandError, DecodeError, SessionError, SessionResult};
use inflight::InFlight;
use registry::{Delivery, Registry};
pub use state::{Lifecycle, Reconnect, ReconnectPolicy, SessionState};

/// Opaque bearer credential identifying a staff member.
#[derive(Clone, PartialEq, Eq)]
pub struct StaffCredential(String);

impl StaffCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for the CONNECT frame only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StaffCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaffCredential(***)")
    }
}

impl From<&str> for StaffCredential {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StaffCredential {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

pub(crate) type ConnectedCallback = Arc<dyn Fn() + Send + Sync>;
pub(crate) type ErrorCallback = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Identifies one registered pair of connect callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    on_connected: ConnectedCallback,
    on_error: ErrorCallback,
}

/// Connect callbacks, kept until removed or the session ends.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<Listener>,
}

impl Listeners {
    pub fn add(&mut self, on_connected: ConnectedCallback, on_error: ErrorCallback) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push(Listener {
            id,
            on_connected,
            on_error,
        });
        id
    }

    /// Returns false when `id` was not registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|listener| listener.id != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn connected(&self) -> Vec<ConnectedCallback> {
        self.entries.iter().map(|l| l.on_connected.clone()).collect()
    }

    pub fn errors(&self) -> Vec<ErrorCallback> {
        self.entries.iter().map(|l| l.on_error.clone()).collect()
    }

    /// Empties the set, returning the error callbacks.
    pub fn take_errors(&mut self) -> Vec<ErrorCallback> {
        let errors = self.errors();
        self.entries.clear();
        errors
    }
}

/// Instructions from the public handle to the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Subscribe { stomp_id: String, destination: String },
    Unsubscribe { stomp_id: String },
    Publish(QueueCommand),
    /// Unsubscribe the listed ids, send DISCONNECT and close.
    Shutdown { unsubscribe: Vec<String> },
}

/// Point-in-time view of a session, for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub reconnect_attempts: u32,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub subscriptions: usize,
    pub pending_commands: Vec<String>,
}

pub(crate) struct Core {
    pub epoch: u64,
    pub lifecycle: Lifecycle,
    pub registry: Registry,
    pub inflight: InFlight,
    pub listeners: Listeners,
    pub commands: Option<mpsc::UnboundedSender<Command>>,
    pub runtime: Option<Handle>,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_error: Option<(SessionError, DateTime<Utc>)>,
    state_tx: watch::Sender<SessionState>,
}

impl Core {
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Publishes the lifecycle state to watchers if it changed.
    pub fn sync_state(&self) {
        let state = self.lifecycle.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Queues a command for the live connection task.
    pub fn send(&self, command: Command) -> bool {
        match self.commands {
            Some(ref tx) => tx.send(command).is_ok(),
            None => false,
        }
    }

    pub fn record_error(&mut self, error: &SessionError) {
        self.last_error = Some((error.clone(), Utc::now()));
    }

    /// Hands a client-side notice to every errors subscription.
    pub fn notify_errors(&self, error: CommandError) {
        for entry in self.registry.on_destination(ERRORS) {
            entry.deliver(Delivery::Notice(error.clone()));
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.lifecycle.state(),
            reconnect_attempts: self.lifecycle.attempts(),
            connected_since: self.connected_since,
            last_error: self.last_error.as_ref().map(|(e, _)| e.to_string()),
            last_error_at: self.last_error.as_ref().map(|(_, at)| *at),
            subscriptions: self.registry.len(),
            pending_commands: self
                .inflight
                .pending()
                .iter()
                .map(|kind| kind.to_string())
                .collect(),
        }
    }
}

/// State shared between a session handle and its connection task.
pub(crate) struct Shared {
    core: Mutex<Core>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.lock();
        f.debug_struct("Shared")
            .field("epoch", &core.epoch)
            .field("state", &core.state())
            .field("subscriptions", &core.registry.len())
            .field("listeners", &core.listeners.len())
            .finish()
    }
}

impl Shared {
    pub fn new(policy: ReconnectPolicy) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Arc::new(Self {
            core: Mutex::new(Core {
                epoch: 0,
                lifecycle: Lifecycle::new(policy),
                registry: Registry::new(),
                inflight: InFlight::new(),
                listeners: Listeners::default(),
                commands: None,
                runtime: None,
                connected_since: None,
                last_error: None,
                state_tx,
            }),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.lock().state_tx.subscribe()
    }

    /// Removes a subscription if `generation` still owns `key`.
    pub fn unsubscribe(&self, key: &str, generation: u64) {
        let mut core = self.lock();
        if let Some(entry) = core.registry.remove(key, generation) {
            tracing::debug!(key, id = %entry.stomp_id, "unsubscribing");
            if core.state().is_connected() {
                core.send(Command::Unsubscribe {
                    stomp_id: entry.stomp_id,
                });
            }
        }
    }
}
