//! Live document subscriptions multiplexed over the shared event channel.
//!
//! The remote service tags push events only with an integer handle. The
//! [`ListenerRegistry`] maps each handle back to the [`SnapshotStream`] that
//! requested it, and reference-counts consumers:
//! - the first [`Listener`] issues the subscribe request
//! - the handle is registered once the request resolves
//! - the last listener to detach retires the handle and unsubscribes
//! - detaching before the handle is known defers the unsubscribe until it is
//!
//! Each consumer has a bounded buffer; a consumer that falls behind is
//! dropped rather than stalling delivery to the others.
//!
//! # Example
//!
//! ```ignore
//! let stream = doc.snapshots(false);
//! let listener = stream.listen();
//!
//! for event in listener.iter() {
//!     match event {
//!         SnapshotEvent::Snapshot(snapshot) => println!("{:?}", snapshot.fields()),
//!         SnapshotEvent::Missing { .. } => println!("deleted"),
//!         SnapshotEvent::Failed(_) | SnapshotEvent::Dropped { .. } => break,
//!     }
//! }
//! ```

mod registry;
mod stream;
mod types;

pub use registry::{ListenerRegistry, DEFAULT_CONSUMER_BUFFER};
pub use stream::{Listener, SnapshotStream};
pub use types::{DropReason, ListenOptions, SnapshotEvent, SubscriptionState};
