//! Types for live document subscriptions.

use crate::address::Address;
use crate::error::ClientError;
use crate::snapshot::{DocumentChange, DocumentSnapshot};
use crate::types::{ListenerHandle, SnapshotMetadata};

/// Options for a document subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenOptions {
    /// Also emit snapshots whose only change is in metadata.
    pub include_metadata_changes: bool,
}

/// Where a stream's subscription currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No subscription; the next consumer issues one.
    Unsubscribed,
    /// Subscribe request sent, handle not yet known.
    Subscribing,
    /// Registered under the handle.
    Active(ListenerHandle),
}

/// Events delivered to a [`Listener`](super::Listener).
#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotEvent {
    /// The document as it now exists.
    Snapshot(DocumentSnapshot),

    /// The document does not exist (never created, or deleted).
    Missing {
        address: Address,
        metadata: SnapshotMetadata,
    },

    /// The subscription failed; no further events follow.
    Failed(ClientError),

    /// This consumer was detached; no further events follow.
    Dropped { reason: DropReason },
}

impl SnapshotEvent {
    /// True if no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SnapshotEvent::Failed(_) | SnapshotEvent::Dropped { .. })
    }
}

impl From<DocumentChange> for SnapshotEvent {
    fn from(change: DocumentChange) -> Self {
        match change {
            DocumentChange::Exists(snapshot) => SnapshotEvent::Snapshot(snapshot),
            DocumentChange::Missing { address, metadata } => {
                SnapshotEvent::Missing { address, metadata }
            }
        }
    }
}

/// Why a consumer was detached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Its buffer overflowed (slow consumer).
    BufferOverflow,
    /// The database instance shut down.
    Shutdown,
}
