//! The connection task.
//!
//! One task per live session. It owns the transport and the frame decoder,
//! drives the [`Lifecycle`](super::Lifecycle) through handshake, heart-beats
//! and reconnects, and routes inbound MESSAGE frames into the registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};
use url::Url;

use examflow_protocol::destinations::{ERRORS, QUEUE_ITEM_DETAILS, QUEUE_SIZE_REPLY};
use examflow_protocol::{
    CommandKind, Frame, FrameCommand, FrameDecoder, HEARTBEAT, HeartBeat, Inbound, Negotiated,
    QueueCommand, encode_frame, negotiate,
};

use super::error::{CommandError, SessionError};
use super::registry::Delivery;
use super::{Command, Core, Reconnect, Shared, StaffCredential};
use crate::transport::{Transport, TransportEvent, TransportHandle};

/// Stand-in deadline for disabled timers.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Why one connection incarnation ended.
#[derive(Debug)]
enum Ended {
    /// `disconnect()` asked us to stop.
    Shutdown,
    /// A newer epoch owns the session.
    Superseded,
    /// Recoverable loss; the reconnect policy decides.
    Lost(SessionError),
    /// The broker refused the handshake.
    Rejected(SessionError),
}

enum Handshake {
    Pending,
    Connected(Negotiated, Vec<Frame>),
    Failed(SessionError),
}

/// Outbound side of a live connection, tracking when we last wrote.
struct Wire {
    handle: TransportHandle,
    last_sent: Instant,
}

impl Wire {
    fn send(&mut self, frame: &Frame) -> bool {
        debug!(command = %frame.command, destination = ?frame.destination(), "sending frame");
        self.last_sent = Instant::now();
        self.handle.send(encode_frame(frame))
    }

    fn heart_beat(&mut self) -> bool {
        self.last_sent = Instant::now();
        self.handle.send(HEARTBEAT)
    }
}

pub(crate) struct ConnectionTask {
    shared: Arc<Shared>,
    epoch: u64,
    transport: Arc<dyn Transport>,
    url: Url,
    credential: StaffCredential,
    heart_beat: HeartBeat,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ConnectionTask {
    pub fn new(
        shared: Arc<Shared>,
        epoch: u64,
        transport: Arc<dyn Transport>,
        url: Url,
        credential: StaffCredential,
        heart_beat: HeartBeat,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            shared,
            epoch,
            transport,
            url,
            credential,
            heart_beat,
            commands,
        }
    }

    /// Locks the shared core, or returns `None` if this task was superseded.
    fn core(&self) -> Option<std::sync::MutexGuard<'_, Core>> {
        let core = self.shared.lock();
        (core.epoch == self.epoch).then_some(core)
    }

    pub async fn run(mut self) {
        info!(url = %self.url, epoch = self.epoch, "session starting");

        loop {
            match self.connect_once().await {
                Ended::Shutdown => {
                    info!(epoch = self.epoch, "session closed");
                    return;
                }
                Ended::Superseded => {
                    debug!(epoch = self.epoch, "connection task superseded");
                    return;
                }
                Ended::Rejected(err) => {
                    error!(error = %err, "broker rejected the session");
                    self.terminate(err, |core| core.lifecycle.reject());
                    return;
                }
                Ended::Lost(err) => {
                    let decision = {
                        let Some(mut core) = self.core() else { return };
                        core.connected_since = None;
                        core.record_error(&err);
                        for kind in core.inflight.pending() {
                            core.notify_errors(CommandError::Undelivered(kind));
                        }
                        core.inflight.clear();
                        let decision = core.lifecycle.connection_lost();
                        core.sync_state();
                        decision
                    };

                    match decision {
                        Reconnect::Retry { attempt, delay } => {
                            warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "connection lost, reconnecting");
                            if !self.wait(delay).await {
                                return;
                            }
                            let Some(mut core) = self.core() else { return };
                            core.lifecycle.retry();
                            core.sync_state();
                        }
                        Reconnect::GiveUp { attempts } => {
                            error!(error = %err, attempts, "reconnect budget exhausted");
                            self.terminate(SessionError::ReconnectExhausted { attempts }, |_| {});
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Moves to a terminal state and reports `err` to every connect caller.
    fn terminate(&self, err: SessionError, transition: impl FnOnce(&mut Core)) {
        let listeners = {
            let Some(mut core) = self.core() else { return };
            transition(&mut core);
            core.record_error(&err);
            core.connected_since = None;
            core.commands = None;
            core.sync_state();
            core.listeners.take_errors()
        };
        for listener in listeners {
            listener(&err);
        }
    }

    /// Sleeps out a reconnect delay. Returns false if told to stop meanwhile.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { .. }) | None => return false,
                    Some(command) => self.while_offline(command),
                },
            }
        }
    }

    /// Commands arriving while no connection is up.
    ///
    /// Subscriptions live in the registry and are replayed on connect.
    fn while_offline(&self, command: Command) {
        if let Command::Publish(command) = command {
            self.undelivered(command.kind());
        }
    }

    fn undelivered(&self, kind: CommandKind) {
        warn!(command = %kind, "command not sent, connection is down");
        if let Some(mut core) = self.core() {
            core.inflight.complete(kind);
            core.notify_errors(CommandError::Undelivered(kind));
        }
    }

    async fn connect_once(&mut self) -> Ended {
        let mut handle = self.transport.open(&self.url);
        let mut decoder = FrameDecoder::new();
        let mut transport_error: Option<String> = None;

        // handshake
        let (negotiated, backlog) = loop {
            tokio::select! {
                event = handle.next_event() => match event {
                    Some(TransportEvent::Opened) => {
                        debug!("transport open, sending CONNECT");
                        handle.send(encode_frame(&Frame::connect(
                            self.credential.expose(),
                            self.heart_beat,
                        )));
                    }
                    Some(TransportEvent::Message(text)) => {
                        match self.handshake_reply(&mut decoder, &text) {
                            Handshake::Pending => {}
                            Handshake::Connected(negotiated, backlog) => break (negotiated, backlog),
                            Handshake::Failed(err) => {
                                handle.close();
                                return Ended::Rejected(err);
                            }
                        }
                    }
                    Some(TransportEvent::Error(e)) => {
                        debug!(error = %e, "transport error during handshake");
                        transport_error = Some(e);
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        return Ended::Lost(closed_error(transport_error, reason));
                    }
                    None => return Ended::Lost(closed_error(transport_error, None)),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { .. }) | None => {
                        handle.close();
                        return Ended::Shutdown;
                    }
                    Some(command) => self.while_offline(command),
                },
            }
        };

        let mut wire = Wire {
            handle,
            last_sent: Instant::now(),
        };

        let listeners = {
            let Some(mut core) = self.core() else {
                wire.handle.close();
                return Ended::Superseded;
            };
            core.lifecycle.connected();
            core.connected_since = Some(Utc::now());
            core.sync_state();

            let restore: Vec<Frame> = core
                .registry
                .entries()
                .map(|entry| Frame::subscribe(&entry.stomp_id, &entry.destination))
                .collect();
            if !restore.is_empty() {
                info!(count = restore.len(), "restoring subscriptions");
            }
            for frame in &restore {
                if !wire.send(frame) {
                    debug!(id = ?frame.get("id"), "transport gone, subscription not restored");
                }
            }
            core.listeners.connected()
        };

        info!(
            send_every_ms = negotiated.send_every.map(|d| d.as_millis() as u64),
            expect_every_ms = negotiated.expect_every.map(|d| d.as_millis() as u64),
            "session connected"
        );
        for listener in listeners {
            listener();
        }

        for frame in backlog {
            if let Some(ended) = self.on_frame(frame) {
                wire.handle.close();
                return ended;
            }
        }

        self.connected(wire, decoder, negotiated).await
    }

    fn handshake_reply(&self, decoder: &mut FrameDecoder, text: &str) -> Handshake {
        let mut items = decoder.push(text.as_bytes()).into_iter();
        while let Some(item) = items.next() {
            match item {
                Ok(Inbound::Frame(frame)) if frame.command == FrameCommand::Connected => {
                    let negotiated = negotiate(self.heart_beat, frame.get("heart-beat"))
                        .unwrap_or_else(|e| {
                            warn!(error = %e, "ignoring heart-beat header");
                            Negotiated::default()
                        });
                    let backlog = items
                        .filter_map(|item| match item {
                            Ok(Inbound::Frame(frame)) => Some(frame),
                            _ => None,
                        })
                        .collect();
                    return Handshake::Connected(negotiated, backlog);
                }
                Ok(Inbound::Frame(frame)) if frame.command == FrameCommand::Error => {
                    return Handshake::Failed(SessionError::Protocol(frame.error_text()));
                }
                Ok(Inbound::Frame(frame)) => {
                    debug!(command = %frame.command, "ignoring frame before CONNECTED");
                }
                Ok(Inbound::HeartBeat) => {}
                Err(e) => warn!(error = %e, "dropping malformed frame"),
            }
        }
        Handshake::Pending
    }

    async fn connected(
        &mut self,
        mut wire: Wire,
        mut decoder: FrameDecoder,
        negotiated: Negotiated,
    ) -> Ended {
        let mut last_received = Instant::now();
        let mut transport_error: Option<String> = None;
        let far = Instant::now() + FAR_FUTURE;

        loop {
            let send_at = negotiated.send_every.map(|every| wire.last_sent + every);
            let silence_at = negotiated
                .silence_limit()
                .map(|limit| last_received + limit);
            let deadline = self.core().map(|core| core.inflight.next_deadline());
            let Some(expire_at) = deadline else {
                return self.superseded(&mut wire);
            };

            tokio::select! {
                event = wire.handle.next_event() => match event {
                    Some(TransportEvent::Message(text)) => {
                        last_received = Instant::now();
                        for item in decoder.push(text.as_bytes()) {
                            match item {
                                Ok(Inbound::Frame(frame)) => {
                                    if let Some(ended) = self.on_frame(frame) {
                                        wire.handle.close();
                                        return ended;
                                    }
                                }
                                Ok(Inbound::HeartBeat) => {}
                                Err(e) => warn!(error = %e, "dropping malformed frame"),
                            }
                        }
                    }
                    Some(TransportEvent::Opened) => {}
                    Some(TransportEvent::Error(e)) => {
                        warn!(error = %e, "transport error");
                        transport_error = Some(e);
                    }
                    Some(TransportEvent::Closed(reason)) => {
                        return Ended::Lost(closed_error(transport_error, reason));
                    }
                    None => return Ended::Lost(closed_error(transport_error, None)),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Subscribe { stomp_id, destination }) => {
                        if !wire.send(&Frame::subscribe(&stomp_id, &destination)) {
                            debug!(%stomp_id, %destination, "transport gone, SUBSCRIBE not sent");
                        }
                    }
                    Some(Command::Unsubscribe { stomp_id }) => {
                        if !wire.send(&Frame::unsubscribe(&stomp_id)) {
                            debug!(%stomp_id, "transport gone, UNSUBSCRIBE not sent");
                        }
                    }
                    Some(Command::Publish(command)) => self.publish(&mut wire, command),
                    Some(Command::Shutdown { unsubscribe }) => {
                        for stomp_id in &unsubscribe {
                            if !wire.send(&Frame::unsubscribe(stomp_id)) {
                                debug!(%stomp_id, "transport gone, UNSUBSCRIBE not sent");
                            }
                        }
                        wire.send(&Frame::disconnect());
                        wire.handle.close();
                        return Ended::Shutdown;
                    }
                    None => {
                        wire.handle.close();
                        return Ended::Shutdown;
                    }
                },
                _ = sleep_until(send_at.unwrap_or(far)), if send_at.is_some() => {
                    wire.heart_beat();
                }
                _ = sleep_until(silence_at.unwrap_or(far)), if silence_at.is_some() => {
                    let limit = negotiated.silence_limit().unwrap_or_default();
                    warn!(silence_ms = limit.as_millis() as u64, "broker went silent");
                    wire.handle.close();
                    return Ended::Lost(SessionError::HeartBeatTimeout(limit));
                }
                _ = sleep_until(expire_at.unwrap_or(far)), if expire_at.is_some() => {
                    self.expire_commands();
                }
            }
        }
    }

    /// Leaves a live connection after `disconnect()` bumped the epoch.
    ///
    /// The shutdown command may already be queued behind the frame that
    /// noticed; honour it so the broker still sees UNSUBSCRIBE and DISCONNECT.
    fn superseded(&mut self, wire: &mut Wire) -> Ended {
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Shutdown { unsubscribe } = command {
                for stomp_id in &unsubscribe {
                    if !wire.send(&Frame::unsubscribe(stomp_id)) {
                        debug!(%stomp_id, "transport gone, UNSUBSCRIBE not sent");
                    }
                }
                wire.send(&Frame::disconnect());
                break;
            }
        }
        wire.handle.close();
        Ended::Superseded
    }

    fn publish(&self, wire: &mut Wire, command: QueueCommand) {
        let kind = command.kind();
        let body = match command.body() {
            Ok(body) => body,
            Err(e) => {
                warn!(command = %kind, error = %e, "cannot encode command");
                if let Some(mut core) = self.core() {
                    core.inflight.complete(kind);
                }
                return;
            }
        };
        if !wire.send(&Frame::send(command.destination(), body)) {
            self.undelivered(kind);
        }
    }

    /// Handles one inbound frame while connected.
    fn on_frame(&self, frame: Frame) -> Option<Ended> {
        match frame.command {
            FrameCommand::Message => {
                self.dispatch(frame);
                None
            }
            FrameCommand::Error => {
                let err = SessionError::Protocol(frame.error_text());
                warn!(error = %err, "broker sent ERROR");
                let listeners = match self.core() {
                    Some(mut core) => {
                        core.record_error(&err);
                        core.listeners.errors()
                    }
                    None => return Some(Ended::Superseded),
                };
                for listener in listeners {
                    listener(&err);
                }
                Some(Ended::Lost(err))
            }
            other => {
                debug!(command = %other, "ignoring frame");
                None
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        let Some(mut core) = self.core() else { return };
        let destination = frame.destination();

        match destination {
            Some(QUEUE_ITEM_DETAILS) => {
                core.inflight.complete(CommandKind::TakeNext);
            }
            Some(QUEUE_SIZE_REPLY) => {
                core.inflight.complete(CommandKind::QueueSize);
            }
            Some(ERRORS) => {
                core.inflight.complete_oldest();
            }
            _ => {}
        }

        let targets = core.registry.route(frame.subscription(), destination);
        debug!(
            destination = ?destination,
            subscription = ?frame.subscription(),
            targets = targets.len(),
            "message received"
        );
        for entry in targets {
            entry.deliver(Delivery::Body(frame.body.clone()));
        }
    }

    fn expire_commands(&self) {
        let Some(mut core) = self.core() else { return };
        for (kind, after) in core.inflight.expire(Instant::now()) {
            warn!(command = %kind, waited_ms = after.as_millis() as u64, "command timed out");
            core.notify_errors(CommandError::TimedOut { kind, after });
        }
    }
}

fn closed_error(transport_error: Option<String>, reason: Option<String>) -> SessionError {
    SessionError::Transport(
        transport_error
            .or(reason)
            .unwrap_or_else(|| "connection closed".to_string()),
    )
}
