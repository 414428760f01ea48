//! Subscription registry.
//!
//! Maps a consumer-facing key (`queueItems`, `queueBroadcast-<id>`, ...) to
//! the STOMP subscription currently serving it. Each entry owns an `active`
//! flag shared with its [`Subscription`](crate::subscription::Subscription);
//! deliveries stop the moment the flag drops, even if frames are queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use super::error::CommandError;

/// What a registry entry hands to its subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Raw MESSAGE body.
    Body(String),
    /// Client-side notice about a command.
    Notice(CommandError),
}

pub type Sink = mpsc::UnboundedSender<Delivery>;

#[derive(Debug)]
pub struct Entry {
    pub stomp_id: String,
    pub destination: String,
    pub generation: u64,
    sink: Sink,
    active: Arc<AtomicBool>,
}

impl Entry {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Sends to the subscriber unless it was deactivated or dropped.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        self.is_active() && self.sink.send(delivery).is_ok()
    }
}

/// Identity of a freshly registered entry.
#[derive(Debug, Clone)]
pub struct Registered {
    pub stomp_id: String,
    pub generation: u64,
    pub active: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
    next_id: u64,
    next_generation: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers `key`, returning the replaced entry (already deactivated).
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        destination: impl Into<String>,
        sink: Sink,
    ) -> (Registered, Option<Entry>) {
        self.next_id += 1;
        self.next_generation += 1;

        let active = Arc::new(AtomicBool::new(true));
        let entry = Entry {
            stomp_id: format!("sub-{}", self.next_id),
            destination: destination.into(),
            generation: self.next_generation,
            sink,
            active: active.clone(),
        };
        let registered = Registered {
            stomp_id: entry.stomp_id.clone(),
            generation: entry.generation,
            active,
        };

        let replaced = self.entries.insert(key.into(), entry);
        if let Some(ref old) = replaced {
            old.deactivate();
        }
        (registered, replaced)
    }

    /// Removes `key` if it still holds `generation`.
    ///
    /// A subscription replaced under the same key cannot remove its successor.
    pub fn remove(&mut self, key: &str, generation: u64) -> Option<Entry> {
        match self.entries.get(key) {
            Some(entry) if entry.generation == generation => {
                let entry = self.entries.remove(key)?;
                entry.deactivate();
                Some(entry)
            }
            _ => None,
        }
    }

    /// Entries a MESSAGE frame belongs to.
    ///
    /// Routed by the `subscription` header. Only frames without one fall back
    /// to matching on destination, so a frame for a dropped subscription id
    /// never reaches its replacement.
    pub fn route(&self, subscription: Option<&str>, destination: Option<&str>) -> Vec<&Entry> {
        match (subscription, destination) {
            (Some(id), _) => self.entries.values().filter(|e| e.stomp_id == id).collect(),
            (None, Some(destination)) => self
                .entries
                .values()
                .filter(|e| e.destination == destination)
                .collect(),
            (None, None) => Vec::new(),
        }
    }

    /// Entries subscribed to `destination`.
    pub fn on_destination<'a>(&'a self, destination: &'a str) -> impl Iterator<Item = &'a Entry> {
        self.entries
            .values()
            .filter(move |e| e.destination == destination)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Deactivates and removes everything.
    pub fn drain(&mut self) -> Vec<Entry> {
        let entries: Vec<Entry> = self.entries.drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.deactivate();
        }
        entries
    }
}
