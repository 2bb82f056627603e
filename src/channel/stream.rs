//! Transport over any byte stream (TCP, Unix socket, pipe).
//!
//! Requests are written as frames from the caller's thread. A dedicated
//! reader thread decodes incoming frames, resolves replies by request id and
//! forwards push events to the attached sink, in arrival order.
//!
//! Closing shuts the connection down in both directions, which ends the
//! reader thread and shows the peer an end of stream. Use
//! [`StreamTransport::connect_tcp`], [`StreamTransport::connect_unix`], or
//! pass a shutdown hook to [`StreamTransport::spawn_with_shutdown`].

use super::bridge::{EventSink, PushEvent, Request, Responder, Transport};
use super::codec::{self, Inbound, Outbound};
use crate::error::{ClientError, Result};
use crate::types::ListenerHandle;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};

type ShutdownHook = Box<dyn FnOnce() + Send>;

struct Shared {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    shutdown: Mutex<Option<ShutdownHook>>,
    pending: Mutex<HashMap<u64, Responder>>,
    sink: RwLock<Option<EventSink>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    /// Mark closed and fail everything still waiting.
    fn fail_pending(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        let pending: Vec<Responder> = self.pending.lock().drain().map(|(_, r)| r).collect();
        if !pending.is_empty() {
            warn!(count = pending.len(), reason, "failing outstanding requests");
        }
        for responder in pending {
            responder.respond(Err(ClientError::Transport(reason.to_string())));
        }
    }

    fn route(&self, body: &[u8]) {
        match codec::decode_inbound(body) {
            Ok(Inbound::Reply { id, value, error }) => {
                let responder = self.pending.lock().remove(&id);
                match responder {
                    Some(responder) => responder.respond(match error {
                        Some(failure) => Err(failure.into()),
                        None => Ok(value),
                    }),
                    None => warn!(id, "reply for unknown request"),
                }
            }
            Ok(Inbound::Event { handle, body }) => {
                let sink = self.sink.read().clone();
                match sink {
                    Some(sink) => sink.deliver(PushEvent {
                        handle: ListenerHandle(handle),
                        body,
                    }),
                    None => trace!(handle, "no sink attached; dropping event"),
                }
            }
            Err(e) => match codec::reply_id(body) {
                Some(id) => {
                    let responder = self.pending.lock().remove(&id);
                    if let Some(responder) = responder {
                        responder.respond(Err(e));
                    }
                }
                None => warn!(error = %e, "discarding undecodable frame"),
            },
        }
    }
}

/// A [`Transport`] speaking the framed protocol of [`codec`].
pub struct StreamTransport {
    shared: Arc<Shared>,
}

impl StreamTransport {
    /// Start a transport over split halves of a connection.
    ///
    /// Without a shutdown hook, `close` stops writing and fails pending
    /// requests, but the reader thread runs until `reader` reaches its end.
    pub fn spawn<R, W>(reader: R, writer: W) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::start(reader, writer, None)
    }

    /// Start a transport whose `close` also runs `shutdown`, which must
    /// unblock `reader` (typically by shutting the connection down).
    pub fn spawn_with_shutdown<R, W, F>(reader: R, writer: W, shutdown: F) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        Self::start(reader, writer, Some(Box::new(shutdown)))
    }

    /// Start a transport over a TCP connection.
    pub fn connect_tcp(stream: TcpStream) -> Result<Self> {
        let reader = stream.try_clone()?;
        let handle = stream.try_clone()?;
        Self::spawn_with_shutdown(reader, stream, move || {
            let _ = handle.shutdown(Shutdown::Both);
        })
    }

    /// Start a transport over a Unix domain socket.
    #[cfg(unix)]
    pub fn connect_unix(stream: std::os::unix::net::UnixStream) -> Result<Self> {
        let reader = stream.try_clone()?;
        let handle = stream.try_clone()?;
        Self::spawn_with_shutdown(reader, stream, move || {
            let _ = handle.shutdown(Shutdown::Both);
        })
    }

    fn start<R, W>(reader: R, writer: W, shutdown: Option<ShutdownHook>) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(Some(Box::new(writer))),
            shutdown: Mutex::new(shutdown),
            pending: Mutex::new(HashMap::new()),
            sink: RwLock::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("docwire-reader".into())
            .spawn(move || read_loop(reader_shared, reader))?;

        Ok(Self { shared })
    }

    /// Number of requests still waiting for a reply.
    pub fn outstanding(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

fn read_loop<R: Read>(shared: Arc<Shared>, mut reader: R) {
    let reason = loop {
        match codec::read_frame(&mut reader) {
            Ok(Some(body)) => shared.route(&body),
            Ok(None) => break "stream closed by peer".to_string(),
            Err(ClientError::MalformedReply(e)) => warn!(error = %e, "skipping corrupt frame"),
            Err(e) => break e.to_string(),
        }
        if shared.closed.load(Ordering::SeqCst) {
            break "transport closed".to_string();
        }
    };
    debug!(reason = %reason, "stream reader exiting");
    shared.fail_pending(&reason);
}

impl Transport for StreamTransport {
    fn send(&self, request: Request, responder: Responder) {
        if self.is_closed() {
            responder.respond(Err(ClientError::Transport("stream transport closed".into())));
            return;
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let body = match codec::encode(&Outbound::new(id, request)) {
            Ok(body) => body,
            Err(e) => {
                responder.respond(Err(e));
                return;
            }
        };

        // registered before writing: the reply may beat the write call back
        self.shared.pending.lock().insert(id, responder);

        let written = match self.shared.writer.lock().as_mut() {
            Some(writer) => codec::write_frame(writer, &body),
            None => Err(ClientError::Transport("stream transport closed".into())),
        };

        if let Err(e) = written {
            warn!(id, error = %e, "failed to write request");
            let responder = self.shared.pending.lock().remove(&id);
            if let Some(responder) = responder {
                responder.respond(Err(e));
            }
        }
    }

    fn attach(&self, sink: EventSink) {
        *self.shared.sink.write() = Some(sink);
    }

    fn close(&self) {
        self.shared.writer.lock().take();
        self.shared.fail_pending("stream transport closed");
        let shutdown = self.shared.shutdown.lock().take();
        if let Some(shutdown) = shutdown {
            debug!("shutting down stream connection");
            shutdown();
        }
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.close();
    }
}
