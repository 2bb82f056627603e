//! # docwire
//!
//! Client-side addressing and live-subscription layer for a remote,
//! path-addressed document database.
//!
//! ## Core Concepts
//!
//! - **Addresses**: slash-delimited paths alternating collection / document
//! - **Bridge**: the single request/response channel to the service
//! - **Snapshots**: immutable views of a document plus metadata
//! - **Listeners**: push events multiplexed by handle into per-document streams
//!
//! ## Example
//!
//! ```ignore
//! use docwire::{ClientConfig, Database, Fields, MemoryTransport, ReadPolicy, SetOptions};
//!
//! let db = Database::new(ClientConfig::default(), Arc::new(MemoryTransport::new()));
//!
//! let user = db.doc("users/42")?;
//! let mut fields = Fields::new();
//! fields.insert("name".into(), json!("A"));
//! user.set(fields, SetOptions::default())?;
//!
//! if let Some(snapshot) = user.get(ReadPolicy::default())?.into_option() {
//!     println!("{:?}", snapshot.fields());
//! }
//!
//! // Live updates
//! let listener = user.snapshots(false).listen();
//! let first = listener.recv()?;
//! ```

pub mod address;
pub mod channel;
pub mod database;
pub mod error;
pub mod listeners;
pub mod reference;
pub mod snapshot;
pub mod types;

// Re-exports
pub use address::Address;
pub use channel::{
    Bridge, EventSink, MemoryTransport, Operation, Pending, PushEvent, Request, Responder,
    StreamTransport, Transport,
};
pub use database::{ClientConfig, Database, DEFAULT_INSTANCE};
pub use error::{ClientError, Result};
pub use listeners::{
    DropReason, ListenOptions, Listener, ListenerRegistry, SnapshotEvent, SnapshotStream,
    SubscriptionState,
};
pub use reference::{CollectionReference, DocumentReference};
pub use snapshot::{DocumentChange, DocumentLookup, DocumentSnapshot};
pub use types::*;
