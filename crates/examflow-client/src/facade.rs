//! Queue session facade.
//!
//! [`QueueSession`] is what dashboards talk to: connect, subscribe to the
//! exam-workflow destinations, publish commands. Every operation returns
//! immediately; replies arrive on subscriptions.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use examflow_core::{QueueBroadcast, QueueItem, QueueSize};
use examflow_protocol::destinations::{
    ERRORS, QUEUE_ITEM_DETAILS, QUEUE_SIZE_REPLY, RECEPTION_QUEUE, queue_broadcast,
};
use examflow_protocol::{HeartBeat, QueueCommand};

use crate::session::{
    Command, CommandError, ConnectedCallback, ConnectionTask, ErrorCallback, ListenerId,
    ReconnectPolicy, SessionError, SessionResult, SessionState, SessionStatus, Shared,
    StaffCredential,
};
use crate::subscription::{Payload, Subscription, SubscriptionHandle};
use crate::transport::{Transport, TransportKind, endpoint_url};

const QUEUE_ITEMS_KEY: &str = "queueItems";
const QUEUE_SIZE_KEY: &str = "queueSize";
const ERRORS_KEY: &str = "errors";

fn broadcast_key(queue_id: &str) -> String {
    format!("queueBroadcast-{}", queue_id)
}

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server base URL; the exam-workflow endpoint path is appended.
    pub base_url: Url,
    pub transport: TransportKind,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub heart_beat: HeartBeat,
    /// How long a take-next or queue-size command may wait for its reply.
    pub command_timeout: Duration,
}

impl SessionConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            transport: TransportKind::default(),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            heart_beat: HeartBeat::default(),
            command_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_heart_beat(mut self, heart_beat: HeartBeat) -> Self {
        self.heart_beat = heart_beat;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Full URL of the exam-workflow endpoint.
    pub fn endpoint(&self) -> Url {
        endpoint_url(&self.base_url)
    }
}

/// Handle to one queue session. Clones share the session.
#[derive(Clone)]
pub struct QueueSession {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    config: Arc<SessionConfig>,
}

impl std::fmt::Debug for QueueSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSession")
            .field("endpoint", &self.config.endpoint().as_str())
            .field("shared", &self.shared)
            .finish()
    }
}

/// What `connect` decided under the lock, carried out after releasing it.
pub(crate) enum Start {
    AlreadyConnected(ConnectedCallback),
    Joined,
    Spawn(ConnectionTask, Handle),
    NoRuntime(ErrorCallback, SessionError),
}

impl QueueSession {
    /// A session using the transport named in `config`.
    pub fn new(config: SessionConfig) -> Self {
        let transport = config.transport.build(config.connect_timeout);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Shared::new(config.reconnect),
            transport,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connects, or joins the connection already in progress.
    ///
    /// If the session is already connected, `on_connected` runs once right
    /// away and neither callback is kept. Otherwise both are registered:
    /// `on_connected` runs every time the broker accepts the handshake,
    /// including after an automatic reconnect, and `on_error` runs once the
    /// session fails for good or the broker reports an ERROR. Registered
    /// callbacks stay until `disconnect()` or a terminal failure.
    pub fn connect<C, E>(&self, credential: impl Into<StaffCredential>, on_connected: C, on_error: E)
    where
        C: Fn() + Send + Sync + 'static,
        E: Fn(&SessionError) + Send + Sync + 'static,
    {
        let (_, start) = self.begin(
            credential.into(),
            Arc::new(on_connected),
            Arc::new(on_error),
            false,
        );
        self.finish(start);
    }

    /// Decides how to connect and registers the callbacks, all under the
    /// session lock. With `keep` the callbacks are registered even when the
    /// session is already connected; the returned id removes them again.
    pub(crate) fn begin(
        &self,
        credential: StaffCredential,
        on_connected: ConnectedCallback,
        on_error: ErrorCallback,
        keep: bool,
    ) -> (Option<ListenerId>, Start) {
        let mut core = self.shared.lock();
        match core.state() {
            SessionState::Connected => {
                debug!("already connected");
                let id = keep.then(|| core.listeners.add(on_connected.clone(), on_error));
                (id, Start::AlreadyConnected(on_connected))
            }
            SessionState::Connecting { .. } | SessionState::Reconnecting { .. } => {
                debug!(state = %core.state(), "joining connection in progress");
                let id = core.listeners.add(on_connected, on_error);
                (Some(id), Start::Joined)
            }
            SessionState::Disconnected | SessionState::Failed => match Handle::try_current() {
                Ok(runtime) => {
                    core.lifecycle.start();
                    core.epoch += 1;
                    core.last_error = None;
                    let id = core.listeners.add(on_connected, on_error);

                    let (tx, rx) = mpsc::unbounded_channel();
                    core.commands = Some(tx);
                    core.runtime = Some(runtime.clone());
                    core.sync_state();

                    let task = ConnectionTask::new(
                        self.shared.clone(),
                        core.epoch,
                        self.transport.clone(),
                        self.config.endpoint(),
                        credential,
                        self.config.heart_beat,
                        rx,
                    );
                    (Some(id), Start::Spawn(task, runtime))
                }
                Err(e) => {
                    let err = SessionError::Setup(e.to_string());
                    core.record_error(&err);
                    (None, Start::NoRuntime(on_error, err))
                }
            },
        }
    }

    /// Runs the callbacks and spawns the task that `begin` decided on.
    pub(crate) fn finish(&self, start: Start) {
        match start {
            Start::AlreadyConnected(listener) => listener(),
            Start::Joined => {}
            Start::Spawn(task, runtime) => {
                info!(endpoint = %self.config.endpoint(), transport = %self.config.transport, "connecting");
                runtime.spawn(task.run());
            }
            Start::NoRuntime(listener, err) => {
                warn!(error = %err, "cannot connect");
                listener(&err);
            }
        }
    }

    /// Drops a pair of connect callbacks. Returns false if they were already
    /// gone.
    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.lock().listeners.remove(id)
    }

    /// Number of registered connect callback pairs.
    pub fn listeners(&self) -> usize {
        self.shared.lock().listeners.len()
    }

    /// Tears the session down from any state.
    ///
    /// Every subscription is deactivated before this returns; frames already
    /// in flight are dropped.
    pub fn disconnect(&self) {
        let (commands, unsubscribe, was) = {
            let mut core = self.shared.lock();
            let was = core.state();
            core.epoch += 1;
            core.lifecycle.disconnect();
            let unsubscribe: Vec<String> = core
                .registry
                .drain()
                .into_iter()
                .map(|entry| entry.stomp_id)
                .collect();
            core.inflight.clear();
            core.listeners.clear();
            core.connected_since = None;
            core.sync_state();
            (core.commands.take(), unsubscribe, was)
        };

        if was != SessionState::Disconnected {
            info!(from = %was, subscriptions = unsubscribe.len(), "disconnecting");
        }
        if let Some(tx) = commands {
            let _ = tx.send(Command::Shutdown { unsubscribe });
        }
    }

    /// True only when the broker has accepted the handshake.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state()
    }

    /// Receiver notified on every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.watch_state()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.lock().status()
    }

    /// Items assigned to this staff member by take-next or in-progress.
    pub fn queue_items(&self) -> SessionResult<Subscription<QueueItem>> {
        self.subscribe(QUEUE_ITEMS_KEY.to_string(), QUEUE_ITEM_DETAILS.to_string())
    }

    /// Replies to [`query_queue_size`](Self::query_queue_size).
    pub fn queue_sizes(&self) -> SessionResult<Subscription<QueueSize>> {
        self.subscribe(QUEUE_SIZE_KEY.to_string(), QUEUE_SIZE_REPLY.to_string())
    }

    /// Public updates for one queue.
    pub fn queue_broadcasts(&self, queue_id: &str) -> SessionResult<Subscription<QueueBroadcast>> {
        self.subscribe(broadcast_key(queue_id), queue_broadcast(queue_id))
    }

    /// Server rejections plus client-side command notices.
    pub fn errors(&self) -> SessionResult<Subscription<CommandError>> {
        self.subscribe(ERRORS_KEY.to_string(), ERRORS.to_string())
    }

    pub fn subscribe_to_queue_items<F>(&self, callback: F) -> SessionResult<SubscriptionHandle>
    where
        F: FnMut(QueueItem) + Send + 'static,
    {
        let runtime = self.runtime()?;
        Ok(self.queue_items()?.spawn_callback(&runtime, callback))
    }

    pub fn subscribe_to_queue_size<F>(&self, callback: F) -> SessionResult<SubscriptionHandle>
    where
        F: FnMut(QueueSize) + Send + 'static,
    {
        let runtime = self.runtime()?;
        Ok(self.queue_sizes()?.spawn_callback(&runtime, callback))
    }

    pub fn subscribe_to_queue_broadcast<F>(
        &self,
        queue_id: &str,
        callback: F,
    ) -> SessionResult<SubscriptionHandle>
    where
        F: FnMut(QueueBroadcast) + Send + 'static,
    {
        let runtime = self.runtime()?;
        Ok(self
            .queue_broadcasts(queue_id)?
            .spawn_callback(&runtime, callback))
    }

    /// Broadcasts for the reception desk queue.
    pub fn subscribe_to_reception_queue<F>(&self, callback: F) -> SessionResult<SubscriptionHandle>
    where
        F: FnMut(QueueBroadcast) + Send + 'static,
    {
        self.subscribe_to_queue_broadcast(RECEPTION_QUEUE, callback)
    }

    pub fn subscribe_to_errors<F>(&self, callback: F) -> SessionResult<SubscriptionHandle>
    where
        F: FnMut(CommandError) + Send + 'static,
    {
        let runtime = self.runtime()?;
        Ok(self.errors()?.spawn_callback(&runtime, callback))
    }

    /// Asks for the next item of `queue_id`. The item, or a rejection,
    /// arrives on the items or errors subscription.
    pub fn take_next_item(&self, queue_id: &str) -> SessionResult<()> {
        self.publish(QueueCommand::take_next(queue_id))
    }

    /// Asks for the size of `queue_id`; the reply arrives on the size
    /// subscription.
    pub fn query_queue_size(&self, queue_id: &str) -> SessionResult<()> {
        self.publish(QueueCommand::queue_size(queue_id))
    }

    /// Asks the server to redeliver the item this staff member already
    /// holds. Nothing arrives when no item is held.
    pub fn get_in_progress_item(&self) -> SessionResult<()> {
        self.publish(QueueCommand::InProgress)
    }

    fn subscribe<T: Payload>(&self, key: String, destination: String) -> SessionResult<Subscription<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let registered = {
            let mut core = self.shared.lock();
            if !core.state().is_connected() {
                warn!(%destination, state = %core.state(), "cannot subscribe, session not connected");
                return Err(SessionError::NotConnected);
            }
            let (registered, replaced) = core.registry.insert(key.as_str(), destination.as_str(), tx);
            if let Some(old) = replaced {
                debug!(%key, id = %old.stomp_id, "replacing subscription");
                core.send(Command::Unsubscribe {
                    stomp_id: old.stomp_id,
                });
            }
            core.send(Command::Subscribe {
                stomp_id: registered.stomp_id.clone(),
                destination,
            });
            registered
        };
        debug!(%key, id = %registered.stomp_id, "subscribed");

        Ok(Subscription::new(
            key,
            registered.generation,
            registered.active,
            rx,
            Arc::downgrade(&self.shared),
        ))
    }

    fn publish(&self, command: QueueCommand) -> SessionResult<()> {
        let kind = command.kind();
        let mut core = self.shared.lock();
        if !core.state().is_connected() {
            warn!(command = %kind, state = %core.state(), "command not sent, session not connected");
            return Err(SessionError::NotConnected);
        }
        if let Err(e) = core
            .inflight
            .begin(kind, Instant::now(), self.config.command_timeout)
        {
            warn!(command = %kind, "command not sent, previous one still pending");
            return Err(e);
        }
        if !core.send(Command::Publish(command)) {
            core.inflight.complete(kind);
            return Err(SessionError::NotConnected);
        }
        Ok(())
    }

    fn runtime(&self) -> SessionResult<Handle> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(handle);
        }
        self.shared
            .lock()
            .runtime
            .clone()
            .ok_or_else(|| SessionError::Setup("no tokio runtime available".to_string()))
    }
}
