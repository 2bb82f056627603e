//! In-process document service.
//!
//! Answers every operation against a map of documents, on the calling
//! thread. Subscriptions get an initial snapshot and a push event after every
//! write to their path. Useful for tests and for running without a backend.

use super::bridge::{EventSink, Operation, PushEvent, Request, Responder, Transport};
use crate::error::{ClientError, Result};
use crate::types::{Fields, ListenerHandle, ReadPolicy};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

type DocumentKey = (String, String);

struct Watch {
    key: DocumentKey,
    include_metadata_changes: bool,
}

#[derive(Default)]
struct ServiceState {
    documents: HashMap<DocumentKey, Fields>,
    watches: BTreeMap<i64, Watch>,
    next_handle: i64,
    /// Every request received, kept until `take_requests` drains it.
    log: Vec<Request>,
    closed: bool,
}

/// Outcome of one request: the reply plus any push events it caused.
struct Outcome {
    reply: Result<Value>,
    events: Vec<PushEvent>,
}

impl Outcome {
    fn reply(reply: Result<Value>) -> Self {
        Self {
            reply,
            events: Vec::new(),
        }
    }
}

/// An in-memory [`Transport`] that is also the remote service.
///
/// Meant for tests and local runs: it keeps every document and every
/// request it has seen in memory.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<ServiceState>,
    sink: RwLock<Option<EventSink>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a raw push event, as if the service had sent it.
    pub fn emit(&self, handle: ListenerHandle, body: Value) {
        self.deliver(vec![PushEvent { handle, body }]);
    }

    /// Every request received so far, in arrival order.
    ///
    /// The log grows for the life of the transport; long-running users
    /// should drain it with [`take_requests`](Self::take_requests).
    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().log.clone()
    }

    /// Drain the request log.
    pub fn take_requests(&self) -> Vec<Request> {
        std::mem::take(&mut self.state.lock().log)
    }

    /// Number of received requests for one operation.
    pub fn request_count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|r| r.operation == operation)
            .count()
    }

    /// Handles the service currently considers subscribed.
    pub fn active_watches(&self) -> Vec<ListenerHandle> {
        self.state
            .lock()
            .watches
            .keys()
            .map(|h| ListenerHandle(*h))
            .collect()
    }

    /// Whether the subscription behind `handle` asked for metadata-only
    /// changes. `None` if the handle is not subscribed.
    pub fn includes_metadata_changes(&self, handle: ListenerHandle) -> Option<bool> {
        self.state
            .lock()
            .watches
            .get(&handle.0)
            .map(|w| w.include_metadata_changes)
    }

    /// Stored fields of a document, bypassing the client.
    pub fn document(&self, instance: &str, path: &str) -> Option<Fields> {
        self.state
            .lock()
            .documents
            .get(&(instance.to_string(), path.to_string()))
            .cloned()
    }

    fn deliver(&self, events: Vec<PushEvent>) {
        if events.is_empty() {
            return;
        }
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => {
                for event in events {
                    trace!(handle = %event.handle, "memory service pushing event");
                    sink.deliver(event);
                }
            }
            None => trace!("no sink attached; discarding push events"),
        }
    }

    fn handle(&self, request: &Request) -> Outcome {
        let mut state = self.state.lock();
        state.log.push(request.clone());

        if state.closed {
            return Outcome::reply(Err(ClientError::Transport("memory transport closed".into())));
        }

        match request.operation {
            Operation::Unsubscribe => {
                let reply = int_field(&request.payload, "handle").map(|handle| {
                    state.watches.remove(&handle);
                    Value::Null
                });
                Outcome::reply(reply)
            }
            operation => match document_key(&request.payload) {
                Ok(key) => state.apply(operation, key, &request.payload),
                Err(e) => Outcome::reply(Err(e)),
            },
        }
    }
}

impl ServiceState {
    fn apply(&mut self, operation: Operation, key: DocumentKey, payload: &Value) -> Outcome {
        match operation {
            Operation::GetDocument => {
                let policy = payload
                    .get("readPolicy")
                    .cloned()
                    .map(serde_json::from_value::<ReadPolicy>)
                    .transpose();
                match policy {
                    Ok(policy) => {
                        let from_cache = policy == Some(ReadPolicy::CacheOnly);
                        Outcome::reply(Ok(self.document_body(&key, from_cache)))
                    }
                    Err(e) => Outcome::reply(Err(invalid_argument(e.to_string()))),
                }
            }
            Operation::SetDocument => {
                let fields = match object_field(payload, "data") {
                    Ok(fields) => fields,
                    Err(e) => return Outcome::reply(Err(e)),
                };
                let merge = payload
                    .pointer("/options/merge")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if merge {
                    self.documents.entry(key.clone()).or_default().extend(fields);
                } else {
                    self.documents.insert(key.clone(), fields);
                }
                self.acknowledge_write(&key)
            }
            Operation::UpdateDocument => {
                let fields = match object_field(payload, "data") {
                    Ok(fields) => fields,
                    Err(e) => return Outcome::reply(Err(e)),
                };
                let Some(existing) = self.documents.get_mut(&key) else {
                    return Outcome::reply(Err(ClientError::remote(
                        "not-found",
                        format!("no document to update: {}", key.1),
                    )));
                };
                existing.extend(fields);
                self.acknowledge_write(&key)
            }
            Operation::DeleteDocument => {
                self.documents.remove(&key);
                self.acknowledge_write(&key)
            }
            Operation::SubscribeDocument => {
                let include_metadata_changes = payload
                    .get("includeMetadataChanges")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                self.next_handle += 1;
                let handle = self.next_handle;
                let initial = PushEvent {
                    handle: ListenerHandle(handle),
                    body: self.document_body(&key, false),
                };
                self.watches.insert(
                    handle,
                    Watch {
                        key,
                        include_metadata_changes,
                    },
                );
                Outcome {
                    reply: Ok(Value::from(handle)),
                    events: vec![initial],
                }
            }
            Operation::Unsubscribe => Outcome::reply(Err(invalid_argument(
                "unsubscribe carries no document path".into(),
            ))),
        }
    }

    fn acknowledge_write(&self, key: &DocumentKey) -> Outcome {
        let body = self.document_body(key, false);
        let events = self
            .watches
            .iter()
            .filter(|(_, watch)| &watch.key == key)
            .map(|(handle, _)| PushEvent {
                handle: ListenerHandle(*handle),
                body: body.clone(),
            })
            .collect();
        Outcome {
            reply: Ok(Value::Null),
            events,
        }
    }

    fn document_body(&self, key: &DocumentKey, from_cache: bool) -> Value {
        let metadata = json!({"pendingWrites": false, "fromCache": from_cache});
        match self.documents.get(key) {
            Some(fields) => json!({
                "path": key.1,
                "exists": true,
                "data": Value::Object(fields.clone().into_iter().collect()),
                "metadata": metadata,
            }),
            None => json!({
                "path": key.1,
                "exists": false,
                "metadata": metadata,
            }),
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&self, request: Request, responder: Responder) {
        let outcome = self.handle(&request);
        responder.respond(outcome.reply);
        self.deliver(outcome.events);
    }

    fn attach(&self, sink: EventSink) {
        *self.sink.write() = Some(sink);
    }

    fn close(&self) {
        self.state.lock().closed = true;
    }
}

fn invalid_argument(message: String) -> ClientError {
    ClientError::remote("invalid-argument", message)
}

fn document_key(payload: &Value) -> Result<DocumentKey> {
    Ok((str_field(payload, "instance")?, str_field(payload, "path")?))
}

fn str_field(payload: &Value, name: &str) -> Result<String> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid_argument(format!("missing string field '{}'", name)))
}

fn int_field(payload: &Value, name: &str) -> Result<i64> {
    payload
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid_argument(format!("missing integer field '{}'", name)))
}

fn object_field(payload: &Value, name: &str) -> Result<Fields> {
    match payload.get(name) {
        Some(Value::Object(map)) => Ok(into_fields(map.clone())),
        _ => Err(invalid_argument(format!("missing object field '{}'", name))),
    }
}

fn into_fields(map: Map<String, Value>) -> Fields {
    map.into_iter().collect()
}
