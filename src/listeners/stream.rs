//! Per-subscription streams and their consumers.

use super::registry::ListenerRegistry;
use super::types::{DropReason, ListenOptions, SnapshotEvent, SubscriptionState};
use crate::address::Address;
use crossbeam_channel::{bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// State shared by a stream, its consumers and its registry entry.
pub(crate) struct StreamShared {
    pub(super) address: Address,
    pub(super) options: ListenOptions,
    pub(super) registry: Weak<ListenerRegistry>,
    pub(super) state: Mutex<StreamState>,
}

pub(super) struct StreamState {
    pub(super) subscription: SubscriptionState,
    pub(super) consumers: BTreeMap<u64, Sender<SnapshotEvent>>,
    pub(super) next_consumer: u64,
}

impl StreamShared {
    pub(super) fn new(
        address: Address,
        options: ListenOptions,
        registry: Weak<ListenerRegistry>,
    ) -> Self {
        Self {
            address,
            options,
            registry,
            state: Mutex::new(StreamState {
                subscription: SubscriptionState::Unsubscribed,
                consumers: BTreeMap::new(),
                next_consumer: 1,
            }),
        }
    }
}

/// A live feed of snapshots for one document.
///
/// Creating a stream sends nothing. The first [`listen`](Self::listen)
/// subscribes; dropping the last [`Listener`] unsubscribes. Clones share the
/// same subscription.
#[derive(Clone)]
pub struct SnapshotStream {
    shared: Arc<StreamShared>,
}

impl SnapshotStream {
    pub(super) fn new(shared: Arc<StreamShared>) -> Self {
        Self { shared }
    }

    /// Attach a consumer. Every consumer sees every event from the moment
    /// it attaches, in arrival order.
    pub fn listen(&self) -> Listener {
        match self.shared.registry.upgrade() {
            Some(registry) => registry.attach(&self.shared),
            None => Listener::closed(Arc::clone(&self.shared)),
        }
    }

    pub fn address(&self) -> &Address {
        &self.shared.address
    }

    pub fn options(&self) -> ListenOptions {
        self.shared.options
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.state.lock().subscription
    }

    pub fn consumer_count(&self) -> usize {
        self.shared.state.lock().consumers.len()
    }
}

impl std::fmt::Debug for SnapshotStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStream")
            .field("address", &self.shared.address)
            .field("state", &self.state())
            .finish()
    }
}

/// One consumer of a [`SnapshotStream`]. Dropping it detaches.
pub struct Listener {
    stream: Arc<StreamShared>,
    consumer: Option<u64>,
    receiver: Receiver<SnapshotEvent>,
}

impl Listener {
    pub(super) fn new(
        stream: Arc<StreamShared>,
        consumer: u64,
        receiver: Receiver<SnapshotEvent>,
    ) -> Self {
        Self {
            stream,
            consumer: Some(consumer),
            receiver,
        }
    }

    /// A listener on a shut-down instance: yields one `Dropped` and ends.
    pub(super) fn closed(stream: Arc<StreamShared>) -> Self {
        let (sender, receiver) = bounded(1);
        let _ = sender.send(SnapshotEvent::Dropped {
            reason: DropReason::Shutdown,
        });
        Self {
            stream,
            consumer: None,
            receiver,
        }
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<SnapshotEvent, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<SnapshotEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<SnapshotEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Blocking iterator; ends once the stream stops feeding this consumer.
    pub fn iter(&self) -> crossbeam_channel::Iter<'_, SnapshotEvent> {
        self.receiver.iter()
    }

    pub fn address(&self) -> &Address {
        &self.stream.address
    }

    /// Detach now. Same as dropping.
    pub fn cancel(self) {}
}

impl Drop for Listener {
    fn drop(&mut self) {
        let Some(consumer) = self.consumer.take() else {
            return;
        };
        match self.stream.registry.upgrade() {
            Some(registry) => registry.detach(&self.stream, consumer),
            None => {
                self.stream.state.lock().consumers.remove(&consumer);
            }
        }
    }
}
