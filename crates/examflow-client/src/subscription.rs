//! Subscriptions as cancellable streams.
//!
//! A [`Subscription`] yields decoded payloads for one destination. It ends
//! as soon as it is unsubscribed or the session disconnects, even when frames
//! are still buffered, and dropping it unsubscribes.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use examflow_core::{QueueBroadcast, QueueItem, QueueSize};

use crate::session::registry::Delivery;
use crate::session::{CommandError, DecodeError, Shared};

/// Something a subscription can decode its messages into.
pub trait Payload: Sized + Send + 'static {
    /// Short name used in decode error logs.
    const NAME: &'static str;

    /// Decodes a MESSAGE body.
    fn from_body(body: &str) -> Result<Self, DecodeError>;

    /// Converts a client-side notice; most payloads ignore them.
    fn from_notice(_notice: &CommandError) -> Option<Self> {
        None
    }
}

impl Payload for QueueItem {
    const NAME: &'static str = "queue item";

    fn from_body(body: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(body).map_err(|e| DecodeError::new(Self::NAME, e))
    }
}

impl Payload for QueueSize {
    const NAME: &'static str = "queue size";

    fn from_body(body: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(body.trim()).map_err(|e| DecodeError::new(Self::NAME, e))
    }
}

impl Payload for QueueBroadcast {
    const NAME: &'static str = "queue broadcast";

    fn from_body(body: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(body).map_err(|e| DecodeError::new(Self::NAME, e))
    }
}

impl Payload for CommandError {
    const NAME: &'static str = "error message";

    fn from_body(body: &str) -> Result<Self, DecodeError> {
        Ok(CommandError::Rejected(body.to_string()))
    }

    fn from_notice(notice: &CommandError) -> Option<Self> {
        Some(notice.clone())
    }
}

/// Removes one registry entry, once.
#[derive(Debug, Clone)]
pub struct Unsubscriber {
    key: String,
    generation: u64,
    active: Arc<AtomicBool>,
    session: Weak<Shared>,
}

impl Unsubscriber {
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst)
            && let Some(shared) = self.session.upgrade()
        {
            shared.unsubscribe(&self.key, self.generation);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// A live subscription yielding `T`.
pub struct Subscription<T> {
    unsubscriber: Unsubscriber,
    rx: mpsc::UnboundedReceiver<Delivery>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Payload> Subscription<T> {
    pub(crate) fn new(
        key: String,
        generation: u64,
        active: Arc<AtomicBool>,
        rx: mpsc::UnboundedReceiver<Delivery>,
        session: Weak<Shared>,
    ) -> Self {
        Self {
            unsubscriber: Unsubscriber {
                key,
                generation,
                active,
                session,
            },
            rx,
            _payload: PhantomData,
        }
    }

    /// Registry key this subscription occupies.
    pub fn key(&self) -> &str {
        &self.unsubscriber.key
    }

    pub fn is_active(&self) -> bool {
        self.unsubscriber.is_active()
    }

    /// Stops deliveries now and tells the broker.
    pub fn unsubscribe(&self) {
        self.unsubscriber.unsubscribe();
    }

    pub fn unsubscriber(&self) -> Unsubscriber {
        self.unsubscriber.clone()
    }

    /// Drives the stream on `runtime`, calling `callback` for every payload.
    pub(crate) fn spawn_callback<F>(self, runtime: &Handle, callback: F) -> SubscriptionHandle
    where
        F: FnMut(T) + Send + 'static,
    {
        let unsubscriber = self.unsubscriber();
        let gate = self.unsubscriber();
        let task = runtime.spawn(drive(self, gate, callback));
        SubscriptionHandle { unsubscriber, task }
    }
}

/// Feeds `stream` to `callback`. `gate` is checked again after each item
/// arrives, since a disconnect on another worker may land in between.
async fn drive<T, S, F>(mut stream: S, gate: Unsubscriber, mut callback: F)
where
    S: Stream<Item = T> + Unpin,
    F: FnMut(T),
{
    while let Some(payload) = stream.next().await {
        if !gate.is_active() {
            break;
        }
        callback(payload);
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.unsubscriber.key)
            .field("active", &self.unsubscriber.is_active())
            .finish()
    }
}

impl<T: Payload> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        loop {
            if !this.unsubscriber.is_active() {
                return Poll::Ready(None);
            }
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Delivery::Body(body))) => match T::from_body(&body) {
                    Ok(payload) => return Poll::Ready(Some(payload)),
                    Err(e) => {
                        warn!(key = %this.unsubscriber.key, error = %e, "dropping undecodable message");
                    }
                },
                Poll::Ready(Some(Delivery::Notice(notice))) => {
                    if let Some(payload) = T::from_notice(&notice) {
                        return Poll::Ready(Some(payload));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscriber.unsubscribe();
    }
}

/// Callback-style subscription.
///
/// Dropping the handle leaves the callback attached; call
/// [`unsubscribe`](Self::unsubscribe) to detach it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    unsubscriber: Unsubscriber,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        self.unsubscriber.unsubscribe();
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        self.unsubscriber.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached<T: Payload>() -> (Subscription<T>, mpsc::UnboundedSender<Delivery>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        let sub = Subscription::new("test".into(), 1, active.clone(), rx, Weak::new());
        (sub, tx, active)
    }

    #[tokio::test]
    async fn skips_undecodable_bodies() {
        let (mut sub, tx, _) = detached::<QueueSize>();
        tx.send(Delivery::Body("not a number".into())).unwrap();
        tx.send(Delivery::Body("12".into())).unwrap();
        assert_eq!(sub.next().await, Some(QueueSize(12)));
    }

    #[tokio::test]
    async fn callback_skips_payload_that_raced_a_deactivation() {
        let (sub, _tx, active) = detached::<QueueSize>();
        let gate = sub.unsubscriber();

        let flag = active.clone();
        let racing = futures_util::stream::iter(vec![QueueSize(1), QueueSize(2)])
            .inspect(move |size| {
                if *size == QueueSize(2) {
                    flag.store(false, Ordering::SeqCst);
                }
            });

        let mut seen = Vec::new();
        drive(racing, gate, |size| seen.push(size)).await;
        assert_eq!(seen, vec![QueueSize(1)]);
        assert!(!active.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn ends_when_deactivated_even_with_buffered_frames() {
        let (mut sub, tx, active) = detached::<QueueSize>();
        tx.send(Delivery::Body("1".into())).unwrap();
        tx.send(Delivery::Body("2".into())).unwrap();

        assert_eq!(sub.next().await, Some(QueueSize(1)));
        active.store(false, Ordering::SeqCst);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn notices_reach_error_subscriptions_only() {
        let notice = CommandError::Undelivered(examflow_protocol::CommandKind::TakeNext);

        let (mut errors, tx, _) = detached::<CommandError>();
        tx.send(Delivery::Notice(notice.clone())).unwrap();
        tx.send(Delivery::Body("Queue is empty".into())).unwrap();
        assert_eq!(errors.next().await, Some(notice.clone()));
        assert_eq!(
            errors.next().await,
            Some(CommandError::Rejected("Queue is empty".into()))
        );

        let (mut sizes, tx, _) = detached::<QueueSize>();
        tx.send(Delivery::Notice(notice)).unwrap();
        tx.send(Delivery::Body("5".into())).unwrap();
        assert_eq!(sizes.next().await, Some(QueueSize(5)));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_without_a_session() {
        let (sub, _tx, active) = detached::<QueueItem>();
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!active.load(Ordering::SeqCst));
        assert!(!sub.is_active());
    }
}
