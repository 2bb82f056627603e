//! Shared helpers for integration tests.

#![allow(dead_code)]

use docwire::{
    ClientConfig, Database, EventSink, Fields, ListenerHandle, Operation, PushEvent, Request,
    Responder, Result, Transport,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// Build a field map from a JSON object literal.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Push event body for an existing document.
pub fn doc_body(path: &str, data: Value) -> Value {
    json!({
        "path": path,
        "exists": true,
        "data": data,
        "metadata": {"pendingWrites": false, "fromCache": false},
    })
}

pub fn config(instance: &str) -> ClientConfig {
    ClientConfig {
        instance: instance.to_string(),
        ..Default::default()
    }
}

/// Transport that records requests and answers only when told to.
#[derive(Default)]
pub struct ScriptedTransport {
    requests: Mutex<Vec<(Request, Option<Responder>)>>,
    sink: Mutex<Option<EventSink>>,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn database(self: &Arc<Self>) -> Database {
        Database::new(config("test"), self.clone())
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(r, _)| r.operation == operation)
            .count()
    }

    /// Payloads of every request for `operation`, in order.
    pub fn payloads(&self, operation: Operation) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|(r, _)| r.operation == operation)
            .map(|(r, _)| r.payload.clone())
            .collect()
    }

    /// Answer the oldest unanswered request for `operation`.
    pub fn answer(&self, operation: Operation, reply: Result<Value>) {
        let responder = self
            .requests
            .lock()
            .iter_mut()
            .find(|(r, responder)| r.operation == operation && responder.is_some())
            .and_then(|(_, responder)| responder.take())
            .unwrap_or_else(|| panic!("no unanswered {} request", operation));
        responder.respond(reply);
    }

    /// Answer every outstanding request for `operation` with `reply`.
    pub fn answer_all(&self, operation: Operation, reply: Value) {
        while self.unanswered(operation) > 0 {
            self.answer(operation, Ok(reply.clone()));
        }
    }

    pub fn unanswered(&self, operation: Operation) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(r, responder)| r.operation == operation && responder.is_some())
            .count()
    }

    /// Times the bridge has closed this transport.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Deliver a push event as the service would.
    pub fn push(&self, handle: i64, body: Value) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.deliver(PushEvent {
                handle: ListenerHandle(handle),
                body,
            });
        }
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: Request, responder: Responder) {
        self.requests.lock().push((request, Some(responder)));
    }

    fn attach(&self, sink: EventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
