//! Listener registry: routes push events from the shared channel to the
//! subscription that owns their handle.

use super::stream::{Listener, SnapshotStream, StreamShared};
use super::types::{DropReason, ListenOptions, SnapshotEvent, SubscriptionState};
use crate::address::Address;
use crate::channel::{pending_pair, Bridge, Operation, Pending, PushEvent};
use crate::error::{ClientError, Result};
use crate::snapshot;
use crate::types::ListenerHandle;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Default per-consumer buffer before a consumer is dropped as too slow.
pub const DEFAULT_CONSUMER_BUFFER: usize = 1000;

#[derive(Default)]
struct RegistryState {
    /// Active subscriptions by handle.
    entries: HashMap<ListenerHandle, Arc<StreamShared>>,
    /// Handles whose unsubscribe has been sent but not acknowledged.
    unsubscribing: HashSet<ListenerHandle>,
    /// Streams whose subscribe has been sent but not resolved.
    subscribing: Vec<Weak<StreamShared>>,
}

/// Table of active subscriptions for one database instance.
///
/// Lock order is stream state, then registry state. No lock is held while
/// calling into the bridge, since transports may answer inline.
pub struct ListenerRegistry {
    weak_self: Weak<ListenerRegistry>,
    bridge: Arc<Bridge>,
    state: Mutex<RegistryState>,
    buffer_size: usize,
    closed: AtomicBool,
}

impl ListenerRegistry {
    pub fn new(bridge: Arc<Bridge>, buffer_size: usize) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            bridge,
            state: Mutex::new(RegistryState::default()),
            buffer_size: buffer_size.max(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a stream for `address`. Nothing is sent until it gains a
    /// consumer.
    pub fn subscribe(&self, address: Address, options: ListenOptions) -> SnapshotStream {
        SnapshotStream::new(Arc::new(StreamShared::new(
            address,
            options,
            self.weak_self.clone(),
        )))
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered handles, sorted.
    pub fn handles(&self) -> Vec<ListenerHandle> {
        let mut handles: Vec<_> = self.state.lock().entries.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Number of unsubscribes sent but not yet acknowledged.
    pub fn pending_unsubscribes(&self) -> usize {
        self.state.lock().unsubscribing.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // --- Consumers ---

    pub(crate) fn attach(&self, stream: &Arc<StreamShared>) -> Listener {
        if self.is_closed() {
            return Listener::closed(Arc::clone(stream));
        }

        // one slot reserved for the terminal event
        let (sender, receiver) = bounded(self.buffer_size + 1);
        let (consumer, first) = {
            let mut state = stream.state.lock();
            let consumer = state.next_consumer;
            state.next_consumer += 1;
            state.consumers.insert(consumer, sender);

            let first = state.subscription == SubscriptionState::Unsubscribed;
            if first {
                state.subscription = SubscriptionState::Subscribing;
            }
            (consumer, first)
        };

        if first {
            self.issue_subscribe(stream);
        }

        Listener::new(Arc::clone(stream), consumer, receiver)
    }

    pub(crate) fn detach(&self, stream: &Arc<StreamShared>, consumer: u64) {
        let handle = {
            let mut state = stream.state.lock();
            if state.consumers.remove(&consumer).is_none() || !state.consumers.is_empty() {
                return;
            }
            match state.subscription {
                SubscriptionState::Active(handle) => {
                    state.subscription = SubscriptionState::Unsubscribed;
                    self.retire(handle, stream);
                    handle
                }
                SubscriptionState::Subscribing => {
                    debug!(
                        address = %stream.address,
                        "last consumer left while subscribing; unsubscribe deferred"
                    );
                    return;
                }
                SubscriptionState::Unsubscribed => return,
            }
        };

        debug!(%handle, address = %stream.address, "last consumer detached");
        let _ = self.issue_unsubscribe(handle);
    }

    // --- Subscription lifecycle ---

    fn issue_subscribe(&self, stream: &Arc<StreamShared>) {
        debug!(address = %stream.address, "first consumer attached; subscribing");

        let payload = json!({
            "path": stream.address.path(),
            "includeMetadataChanges": stream.options.include_metadata_changes,
        });
        self.state.lock().subscribing.push(Arc::downgrade(stream));

        let target = Arc::clone(stream);
        let registry = self.weak_self.clone();
        let bridge = Arc::clone(&self.bridge);

        self.bridge
            .invoke_with(Operation::SubscribeDocument, payload, move |result| {
                match registry.upgrade() {
                    Some(registry) => registry.on_subscribed(&target, result),
                    None => release_orphan(&bridge, &target.address, result),
                }
            });
    }

    fn on_subscribed(&self, stream: &Arc<StreamShared>, result: Result<Value>) {
        self.state
            .lock()
            .subscribing
            .retain(|pending| !std::ptr::eq(pending.as_ptr(), Arc::as_ptr(stream)));

        let mut state = stream.state.lock();

        let handle = match result.and_then(parse_handle) {
            Ok(handle) => handle,
            Err(error) => {
                warn!(address = %stream.address, error = %error, "subscribe failed");
                state.subscription = SubscriptionState::Unsubscribed;
                let consumers = std::mem::take(&mut state.consumers);
                drop(state);
                notify(consumers, SnapshotEvent::Failed(error));
                return;
            }
        };

        if self.is_closed() || state.consumers.is_empty() {
            debug!(
                %handle,
                address = %stream.address,
                "no consumers left when subscribe resolved; unsubscribing"
            );
            state.subscription = SubscriptionState::Unsubscribed;
            let consumers = std::mem::take(&mut state.consumers);
            self.retire(handle, stream);
            drop(state);
            notify(
                consumers,
                SnapshotEvent::Dropped {
                    reason: DropReason::Shutdown,
                },
            );
            let _ = self.issue_unsubscribe(handle);
            return;
        }

        match self.insert(handle, stream) {
            Ok(()) => {
                state.subscription = SubscriptionState::Active(handle);
                debug!(%handle, address = %stream.address, "subscription active");
            }
            Err(error) => {
                warn!(%handle, error = %error, "refusing subscribe reply");
                state.subscription = SubscriptionState::Unsubscribed;
                let consumers = std::mem::take(&mut state.consumers);
                drop(state);
                notify(consumers, SnapshotEvent::Failed(error));
            }
        }
    }

    fn issue_unsubscribe(&self, handle: ListenerHandle) -> Pending<()> {
        let (sender, pending) = pending_pair();
        let registry = self.weak_self.clone();

        self.bridge
            .invoke_with(Operation::Unsubscribe, json!({ "handle": handle.0 }), move |result| {
                if let Some(registry) = registry.upgrade() {
                    registry.state.lock().unsubscribing.remove(&handle);
                }
                if let Err(e) = &result {
                    warn!(%handle, error = %e, "unsubscribe failed");
                }
                let _ = sender.send(result.map(|_| ()));
            });

        pending
    }

    // --- Table ---

    fn insert(&self, handle: ListenerHandle, stream: &Arc<StreamShared>) -> Result<()> {
        let mut state = self.state.lock();
        if state.unsubscribing.contains(&handle) {
            return Err(ClientError::MalformedReply(format!(
                "handle {} reissued while its unsubscribe is pending",
                handle
            )));
        }
        if state.entries.contains_key(&handle) {
            return Err(ClientError::MalformedReply(format!(
                "handle {} is already registered",
                handle
            )));
        }
        state.entries.insert(handle, Arc::clone(stream));
        Ok(())
    }

    /// Remove `handle` if `stream` owns it and mark it as unsubscribing.
    fn retire(&self, handle: ListenerHandle, stream: &Arc<StreamShared>) {
        let mut state = self.state.lock();
        if state
            .entries
            .get(&handle)
            .is_some_and(|owner| Arc::ptr_eq(owner, stream))
        {
            state.entries.remove(&handle);
        }
        state.unsubscribing.insert(handle);
    }

    // --- Push events ---

    /// Route a push event to its stream. Events for unknown or retired
    /// handles are dropped.
    pub fn dispatch(&self, event: PushEvent) {
        let handle = event.handle;
        let stream = self.state.lock().entries.get(&handle).cloned();
        let Some(stream) = stream else {
            trace!(%handle, "dropping event for unregistered handle");
            return;
        };

        let change = snapshot::decode_event(&event.body);

        let mut state = stream.state.lock();
        if state.subscription != SubscriptionState::Active(handle) {
            trace!(%handle, "dropping event for retired handle");
            return;
        }

        let outgoing = match change {
            Ok(change) => SnapshotEvent::from(change),
            Err(error) => {
                warn!(%handle, error = %error, "malformed push event; ending subscription");
                state.subscription = SubscriptionState::Unsubscribed;
                let consumers = std::mem::take(&mut state.consumers);
                self.retire(handle, &stream);
                drop(state);
                notify(consumers, SnapshotEvent::Failed(error));
                let _ = self.issue_unsubscribe(handle);
                return;
            }
        };

        trace!(%handle, consumers = state.consumers.len(), "delivering event");

        let mut lost = Vec::new();
        for (id, sender) in &state.consumers {
            if sender.len() >= self.buffer_size {
                lost.push((*id, true));
                continue;
            }
            match sender.try_send(outgoing.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => lost.push((*id, true)),
                Err(TrySendError::Disconnected(_)) => lost.push((*id, false)),
            }
        }

        if lost.is_empty() {
            return;
        }

        for (id, overflowed) in lost {
            if let Some(sender) = state.consumers.remove(&id) {
                if overflowed {
                    warn!(%handle, consumer = id, "dropping slow consumer");
                    let _ = sender.try_send(SnapshotEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }

        if state.consumers.is_empty() {
            state.subscription = SubscriptionState::Unsubscribed;
            self.retire(handle, &stream);
            drop(state);
            let _ = self.issue_unsubscribe(handle);
        }
    }

    // --- Teardown ---

    /// Unsubscribe every remaining handle and detach all consumers.
    ///
    /// Streams still waiting on their subscribe reply lose their consumers
    /// now and unsubscribe as soon as the handle arrives. Returns the pending
    /// acknowledgements for registered handles; later calls return nothing.
    pub fn shutdown(&self) -> Vec<Pending<()>> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }

        let (entries, subscribing) = {
            let mut state = self.state.lock();
            let entries: Vec<(ListenerHandle, Arc<StreamShared>)> =
                state.entries.drain().collect();
            for (handle, _) in &entries {
                state.unsubscribing.insert(*handle);
            }
            let subscribing: Vec<_> = state
                .subscribing
                .iter()
                .filter_map(Weak::upgrade)
                .collect();
            (entries, subscribing)
        };
        debug!(
            count = entries.len(),
            subscribing = subscribing.len(),
            "shutting down listener registry"
        );

        for stream in subscribing {
            let consumers = {
                let mut state = stream.state.lock();
                if state.subscription != SubscriptionState::Subscribing {
                    continue;
                }
                std::mem::take(&mut state.consumers)
            };
            notify(
                consumers,
                SnapshotEvent::Dropped {
                    reason: DropReason::Shutdown,
                },
            );
        }

        let mut acks = Vec::with_capacity(entries.len());
        for (handle, stream) in entries {
            let consumers = {
                let mut state = stream.state.lock();
                // a concurrent detach may already own this unsubscribe
                if state.subscription != SubscriptionState::Active(handle) {
                    continue;
                }
                state.subscription = SubscriptionState::Unsubscribed;
                std::mem::take(&mut state.consumers)
            };
            notify(
                consumers,
                SnapshotEvent::Dropped {
                    reason: DropReason::Shutdown,
                },
            );
            acks.push(self.issue_unsubscribe(handle));
        }
        acks
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("handles", &self.handles())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A subscribe that resolved after its registry was dropped still owns a
/// remote handle; release it directly.
fn release_orphan(bridge: &Bridge, address: &Address, result: Result<Value>) {
    let Ok(handle) = result.and_then(parse_handle) else {
        return;
    };
    warn!(%handle, %address, "subscribe resolved after its registry was dropped; unsubscribing");
    bridge.invoke_with(
        Operation::Unsubscribe,
        json!({ "handle": handle.0 }),
        move |result| {
            if let Err(e) = result {
                warn!(%handle, error = %e, "unsubscribe failed");
            }
        },
    );
}

/// Subscribe replies carry the handle bare or as `{"handle": n}`.
fn parse_handle(reply: Value) -> Result<ListenerHandle> {
    let raw = match &reply {
        Value::Object(map) => map.get("handle").and_then(Value::as_i64),
        other => other.as_i64(),
    };
    raw.map(ListenerHandle).ok_or_else(|| {
        ClientError::MalformedReply(format!("subscribe reply carries no handle: {}", reply))
    })
}

fn notify(consumers: BTreeMap<u64, Sender<SnapshotEvent>>, event: SnapshotEvent) {
    for sender in consumers.into_values() {
        let _ = sender.try_send(event.clone());
    }
}
