//! Synchronization policy: what gets pushed to clients, and when.
//!
//! [`SyncHub`] is an actor. It is the only owner of the registered client set
//! and of the last pushed snapshot per [`Category`]; everything else talks to
//! it through a [`SyncHandle`].
//!
//! Change notifications are coalesced. Each category has an "already
//! scheduled" flag: only the notification that flips it enqueues a
//! recomputation, and the hub clears it right before querying the adapter, so
//! a change that lands during a recomputation schedules another one.
//!
//! A recomputation is only broadcast when its encoded frame differs from the
//! last one pushed for the same category.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use playlink_wire::{ClientInfo, MessageType, build_frame, serialize_item, serialize_message};
use tokio::sync::{mpsc, oneshot};

use crate::adapter::{AdapterError, PlayerAdapter};
use crate::connection::{ConnectionHandle, ConnectionId};

/// A pushed state category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    State,
    Item,
    Playlist,
    Queue,
}

impl Category {
    /// All categories, in full-sync order.
    pub const ALL: [Category; 4] = [
        Category::State,
        Category::Item,
        Category::Playlist,
        Category::Queue,
    ];

    fn index(self) -> usize {
        match self {
            Category::State => 0,
            Category::Item => 1,
            Category::Playlist => 2,
            Category::Queue => 3,
        }
    }

    /// Frame type used when pushing this category.
    pub fn message_type(self) -> MessageType {
        match self {
            Category::State => MessageType::State,
            Category::Item => MessageType::Item,
            Category::Playlist => MessageType::Playlist,
            Category::Queue => MessageType::Queue,
        }
    }
}

type ScheduledFlags = Arc<[AtomicBool; 4]>;

pub(crate) enum SyncEvent {
    Register {
        handle: ConnectionHandle,
        info: ClientInfo,
    },
    Unregister(ConnectionId),
    Recompute(Category),
    ClientCount(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable entry point into the hub.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncEvent>,
    scheduled: ScheduledFlags,
}

/// Receiving side of a [`SyncHandle`], consumed by [`SyncHub::new`].
pub struct SyncEvents {
    pub(crate) rx: mpsc::UnboundedReceiver<SyncEvent>,
    scheduled: ScheduledFlags,
}

impl SyncHandle {
    /// Create a handle before the hub exists, so adapters can hold one.
    pub fn channel() -> (SyncHandle, SyncEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduled: ScheduledFlags = Arc::new(Default::default());
        (
            SyncHandle {
                tx,
                scheduled: Arc::clone(&scheduled),
            },
            SyncEvents { rx, scheduled },
        )
    }

    pub fn notify_state_changed(&self) {
        self.notify(Category::State);
    }

    pub fn notify_item_changed(&self) {
        self.notify(Category::Item);
    }

    pub fn notify_playlist_changed(&self) {
        self.notify(Category::Playlist);
    }

    pub fn notify_queue_changed(&self) {
        self.notify(Category::Queue);
    }

    /// Schedule a recomputation of `category` unless one is already pending.
    pub fn notify(&self, category: Category) {
        if self.scheduled[category.index()].swap(true, Ordering::AcqRel) {
            return;
        }
        self.send(SyncEvent::Recompute(category));
    }

    pub(crate) fn register(&self, handle: ConnectionHandle, info: ClientInfo) {
        self.send(SyncEvent::Register { handle, info });
    }

    pub(crate) fn unregister(&self, id: ConnectionId) {
        self.send(SyncEvent::Unregister(id));
    }

    /// Number of registered clients, 0 once the hub is gone.
    pub async fn client_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.send(SyncEvent::ClientCount(tx));
        rx.await.unwrap_or(0)
    }

    /// Say goodbye to every client and stop the hub. Returns once the bye
    /// frames are queued.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(SyncEvent::Shutdown(tx));
        let _ = rx.await;
    }

    fn send(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Sync hub is gone, dropping event");
        }
    }
}

/// Owner of the client set and the last pushed snapshots.
pub struct SyncHub {
    adapter: Arc<dyn PlayerAdapter>,
    rx: mpsc::UnboundedReceiver<SyncEvent>,
    scheduled: ScheduledFlags,
    clients: HashMap<ConnectionId, ConnectionHandle>,
    snapshots: [Option<Bytes>; 4],
}

impl SyncHub {
    pub fn new(adapter: Arc<dyn PlayerAdapter>, events: SyncEvents) -> Self {
        Self {
            adapter,
            rx: events.rx,
            scheduled: events.scheduled,
            clients: HashMap::new(),
            snapshots: Default::default(),
        }
    }

    /// Process events until shutdown.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        tracing::debug!("Sync hub stopped");
    }

    /// Apply one event. Returns `false` when the hub should stop.
    pub(crate) fn handle_event(&mut self, event: SyncEvent) -> bool {
        match event {
            SyncEvent::Register { handle, info } => self.register(handle, &info),
            SyncEvent::Unregister(id) => {
                if self.clients.remove(&id).is_some() {
                    tracing::debug!("Connection {id:?} left the client set");
                }
            }
            SyncEvent::Recompute(category) => self.recompute(category),
            SyncEvent::ClientCount(reply) => {
                let _ = reply.send(self.clients.len());
            }
            SyncEvent::Shutdown(ack) => {
                self.say_goodbye();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn register(&mut self, handle: ConnectionHandle, info: &ClientInfo) {
        let id = handle.id();
        if self.clients.contains_key(&id) {
            tracing::warn!("Connection {id:?} is already registered");
            return;
        }
        tracing::debug!(
            "Full sync for {id:?} (thumbnails {}x{})",
            info.image_width,
            info.image_height
        );

        match serialize_message(MessageType::PlayerInfo, &self.adapter.player_info()) {
            Ok(frame) => handle.send(Bytes::from(frame)),
            Err(e) => tracing::warn!("Failed to serialize player info: {e}"),
        }
        // The new client has seen nothing yet, so it gets everything regardless
        // of the stored snapshots.
        for category in Category::ALL {
            if let Some(frame) = self.current_frame(category) {
                handle.send(frame);
            }
        }
        self.clients.insert(id, handle);
    }

    fn recompute(&mut self, category: Category) {
        self.scheduled[category.index()].store(false, Ordering::Release);

        let Some(frame) = self.current_frame(category) else {
            return;
        };
        let slot = &mut self.snapshots[category.index()];
        if slot.as_ref() == Some(&frame) {
            tracing::trace!("{category:?} unchanged, push suppressed");
            return;
        }
        *slot = Some(frame.clone());

        tracing::debug!(
            "Pushing {category:?} to {} client(s)",
            self.clients.len()
        );
        let targets: Vec<ConnectionHandle> = self.clients.values().cloned().collect();
        for client in targets {
            client.send(frame.clone());
        }
    }

    /// Query the adapter and frame the current value of `category`.
    fn current_frame(&self, category: Category) -> Option<Bytes> {
        let msg_type = category.message_type();
        let framed = match category {
            Category::State => self
                .adapter
                .current_state()
                .map(|v| serialize_message(msg_type, &v)),
            Category::Item => self
                .adapter
                .current_item()
                .map(|v| serialize_item(msg_type, &v)),
            Category::Playlist => self
                .adapter
                .playlist()
                .map(|v| serialize_message(msg_type, &v)),
            Category::Queue => self
                .adapter
                .queue()
                .map(|v| serialize_message(msg_type, &v)),
        };
        match framed {
            Ok(Ok(frame)) => Some(Bytes::from(frame)),
            Ok(Err(e)) => {
                tracing::warn!("Failed to serialize {category:?}: {e}");
                None
            }
            Err(e @ AdapterError::Unavailable(_)) => {
                tracing::debug!("No {category:?} to push: {e}");
                None
            }
            Err(e) => {
                tracing::warn!("Adapter failed to report {category:?}: {e}");
                None
            }
        }
    }

    fn say_goodbye(&mut self) {
        let bye = match build_frame(MessageType::Bye, &[]) {
            Ok(frame) => Bytes::from(frame),
            Err(e) => {
                tracing::error!("Failed to build bye frame: {e}");
                Bytes::new()
            }
        };
        tracing::info!("Saying goodbye to {} client(s)", self.clients.len());
        for (_, client) in self.clients.drain() {
            client.send(bye.clone());
        }
    }
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
