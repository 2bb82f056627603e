//! The channel to the remote service.
//!
//! - [`Bridge`]: the single request/response primitive the rest of the
//!   client is written against
//! - [`Transport`]: the seam a concrete channel implements
//! - [`MemoryTransport`]: an in-process service
//! - [`StreamTransport`]: framed MessagePack over any byte stream
//!
//! # Example
//!
//! ```ignore
//! let service = Arc::new(MemoryTransport::new());
//! let bridge = Bridge::new(InstanceId("app".into()), service);
//!
//! let reply = bridge
//!     .invoke_for_result(Operation::GetDocument, json!({"path": "users/42"}))
//!     .wait()?;
//! ```

mod bridge;
pub mod codec;
mod memory;
mod stream;

pub use bridge::{
    Bridge, EventSink, Operation, Pending, PushEvent, Request, Responder, Transport,
};
pub(crate) use bridge::pending_pair;
pub use memory::MemoryTransport;
pub use stream::StreamTransport;
