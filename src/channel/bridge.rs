//! Request/response bridge to the remote service.
//!
//! The bridge is the only component that talks to a [`Transport`]. Everything
//! above it (references, the listener registry) is expressed in terms of
//! [`Bridge::invoke`], [`Bridge::invoke_for_result`] and
//! [`Bridge::invoke_with`].

use crate::error::{ClientError, Result};
use crate::types::{InstanceId, ListenerHandle};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Named operations understood by the remote service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    GetDocument,
    SetDocument,
    UpdateDocument,
    DeleteDocument,
    SubscribeDocument,
    Unsubscribe,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetDocument => "get-document",
            Operation::SetDocument => "set-document",
            Operation::UpdateDocument => "update-document",
            Operation::DeleteDocument => "delete-document",
            Operation::SubscribeDocument => "subscribe-document",
            Operation::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request as handed to the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub operation: Operation,
    /// Always a JSON object carrying at least `instance`.
    pub payload: Value,
}

impl Request {
    /// Target path, for document operations.
    pub fn path(&self) -> Option<&str> {
        self.payload.get("path").and_then(Value::as_str)
    }
}

/// Unsolicited notification for an active subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct PushEvent {
    pub handle: ListenerHandle,
    /// `path`, `data`, `metadata` and optionally `exists`.
    pub body: Value,
}

type ReplyCallback = Box<dyn FnOnce(Result<Value>) + Send>;

/// One-shot reply slot for a single request.
///
/// A responder dropped without answering resolves its request with a
/// transport error, so nobody waits on a reply that can never come.
pub struct Responder {
    operation: Operation,
    callback: Option<ReplyCallback>,
}

impl Responder {
    pub fn new<F>(operation: Operation, callback: F) -> Self
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        Self {
            operation,
            callback: Some(Box::new(callback)),
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Resolve the request.
    pub fn respond(mut self, result: Result<Value>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(ClientError::Transport(format!(
                "reply for {} dropped by transport",
                self.operation
            ))));
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("operation", &self.operation)
            .field("answered", &self.callback.is_none())
            .finish()
    }
}

/// Destination for push events coming off a transport.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(PushEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(PushEvent) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn deliver(&self, event: PushEvent) {
        (self.deliver)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// The asynchronous request/response and push-event channel.
///
/// Implementations may answer on any thread, including synchronously inside
/// `send`. Callers never hold locks across `send`.
pub trait Transport: Send + Sync {
    /// Send a request; its reply must eventually go to `responder`.
    fn send(&self, request: Request, responder: Responder);

    /// Install the sink receiving push events. Replaces any previous sink.
    fn attach(&self, sink: EventSink);

    /// Stop accepting requests. Outstanding replies may fail.
    fn close(&self) {}
}

/// Pending result of a single request.
#[must_use = "a pending reply does nothing unless waited on"]
pub struct Pending<T> {
    receiver: Receiver<Result<T>>,
}

/// Create a connected reply sender and pending result.
pub(crate) fn pending_pair<T>() -> (Sender<Result<T>>, Pending<T>) {
    let (sender, receiver) = bounded(1);
    (sender, Pending { receiver })
}

impl<T> Pending<T> {
    /// An already-resolved result.
    pub fn ready(result: Result<T>) -> Self {
        let (sender, pending) = pending_pair();
        let _ = sender.send(result);
        pending
    }

    /// Block until the reply arrives.
    pub fn wait(self) -> Result<T> {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(ClientError::Transport("reply channel closed".into())))
    }

    /// Block for at most `timeout`. `None` if no reply arrived in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(Err(ClientError::Transport("reply channel closed".into())))
            }
        }
    }

    /// Non-blocking poll.
    pub fn try_wait(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(Err(ClientError::Transport("reply channel closed".into())))
            }
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    /// New requests refused, except unsubscribes.
    closing: bool,
    /// Transport closed; everything refused.
    closed: bool,
    /// Requests sent and not yet resolved.
    in_flight: usize,
}

/// Bridge between typed client operations and a transport.
///
/// Closing is a drain: once [`close`](Bridge::close) is called only
/// `unsubscribe` is still admitted, and the transport itself is closed when
/// the last outstanding request resolves.
pub struct Bridge {
    instance: InstanceId,
    transport: Arc<dyn Transport>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl Bridge {
    pub fn new(instance: InstanceId, transport: Arc<dyn Transport>) -> Self {
        Self {
            instance,
            transport,
            lifecycle: Arc::new(Mutex::new(Lifecycle::default())),
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Send an operation whose reply is a bare acknowledgement.
    pub fn invoke(&self, operation: Operation, payload: Value) -> Pending<()> {
        let (sender, pending) = pending_pair();
        self.invoke_with(operation, payload, move |result| {
            let _ = sender.send(result.map(|_| ()));
        });
        pending
    }

    /// Send an operation and keep its reply payload.
    pub fn invoke_for_result(&self, operation: Operation, payload: Value) -> Pending<Value> {
        let (sender, pending) = pending_pair();
        self.invoke_with(operation, payload, move |result| {
            let _ = sender.send(result);
        });
        pending
    }

    /// Send an operation and run `on_reply` when it resolves.
    ///
    /// `on_reply` may run on the transport's delivery thread, or on this
    /// thread before `invoke_with` returns.
    pub fn invoke_with<F>(&self, operation: Operation, payload: Value, on_reply: F)
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        let payload = match self.stamp(payload) {
            Ok(payload) => payload,
            Err(e) => {
                on_reply(Err(e));
                return;
            }
        };

        let admitted = {
            let mut lifecycle = self.lifecycle.lock();
            let admitted = !lifecycle.closed
                && (!lifecycle.closing || operation == Operation::Unsubscribe);
            if admitted {
                lifecycle.in_flight += 1;
            }
            admitted
        };
        if !admitted {
            on_reply(Err(ClientError::Shutdown));
            return;
        }

        let path = payload.get("path").and_then(Value::as_str).unwrap_or("");
        debug!(
            instance = %self.instance,
            operation = operation.as_str(),
            path,
            "dispatching request"
        );

        let lifecycle = Arc::clone(&self.lifecycle);
        let transport = Arc::clone(&self.transport);
        let responder = Responder::new(operation, move |result| {
            on_reply(result);
            settle(&lifecycle, transport.as_ref());
        });

        self.transport.send(Request { operation, payload }, responder);
    }

    /// Refuse further requests other than `unsubscribe`, and close the
    /// transport once nothing is outstanding.
    pub fn close(&self) {
        let idle = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.closing {
                return;
            }
            lifecycle.closing = true;
            debug!(
                instance = %self.instance,
                in_flight = lifecycle.in_flight,
                "closing bridge"
            );
            if lifecycle.in_flight == 0 {
                lifecycle.closed = true;
            }
            lifecycle.closed
        };
        if idle {
            self.transport.close();
        }
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.lifecycle.lock().closing
    }

    /// Number of requests sent and not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.lifecycle.lock().in_flight
    }

    fn stamp(&self, payload: Value) -> Result<Value> {
        match payload {
            Value::Object(mut map) => {
                map.insert(
                    "instance".to_string(),
                    Value::String(self.instance.0.clone()),
                );
                Ok(Value::Object(map))
            }
            other => Err(ClientError::Serialization(format!(
                "request payload must be an object, got {}",
                other
            ))),
        }
    }
}

/// Account for one resolved request; the last one out of a closing bridge
/// closes the transport.
fn settle(lifecycle: &Mutex<Lifecycle>, transport: &dyn Transport) {
    let drained = {
        let mut lifecycle = lifecycle.lock();
        lifecycle.in_flight = lifecycle.in_flight.saturating_sub(1);
        let drained = lifecycle.closing && !lifecycle.closed && lifecycle.in_flight == 0;
        if drained {
            lifecycle.closed = true;
        }
        drained
    };
    if drained {
        debug!("bridge drained; closing transport");
        transport.close();
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("instance", &self.instance)
            .field("closed", &self.is_closed())
            .finish()
    }
}
