//! The database instance tying the bridge and the listener registry together.

use crate::address::Address;
use crate::channel::{Bridge, EventSink, Transport};
use crate::error::{ClientError, Result};
use crate::listeners::{ListenerRegistry, DEFAULT_CONSUMER_BUFFER};
use crate::reference::{CollectionReference, DocumentReference};
use crate::types::InstanceId;
use std::sync::Arc;
use tracing::{debug, warn};

/// Instance identifier used when none is configured.
pub const DEFAULT_INSTANCE: &str = "[DEFAULT]";

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Identifier of the database instance, sent with every request.
    pub instance: String,

    /// Events buffered per listener before it is dropped as too slow.
    pub consumer_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            instance: DEFAULT_INSTANCE.to_string(),
            consumer_buffer_size: DEFAULT_CONSUMER_BUFFER,
        }
    }
}

struct DatabaseInner {
    config: ClientConfig,
    instance: InstanceId,
    bridge: Arc<Bridge>,
    registry: Arc<ListenerRegistry>,
}

/// Handle to one database instance.
///
/// Cheap to clone; every clone shares the same bridge and registry. The
/// transport's event sink is claimed by this instance, so use one transport
/// per instance.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Create an instance on top of `transport`.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let instance = InstanceId(config.instance.clone());
        let bridge = Arc::new(Bridge::new(instance.clone(), Arc::clone(&transport)));
        let registry = ListenerRegistry::new(Arc::clone(&bridge), config.consumer_buffer_size);

        let sink_registry = Arc::downgrade(&registry);
        transport.attach(EventSink::new(move |event| {
            if let Some(registry) = sink_registry.upgrade() {
                registry.dispatch(event);
            }
        }));

        debug!(instance = %instance, "database instance created");

        Self {
            inner: Arc::new(DatabaseInner {
                config,
                instance,
                bridge,
                registry,
            }),
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.inner.instance
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn bridge(&self) -> &Bridge {
        &self.inner.bridge
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.inner.registry
    }

    /// Reference to the document at `path` (even number of components).
    pub fn doc(&self, path: &str) -> Result<DocumentReference> {
        let address = Address::parse(path)?;
        if !address.is_document() {
            return Err(ClientError::InvalidPath(format!(
                "\"{}\" is a collection path",
                address
            )));
        }
        Ok(DocumentReference::new(self.clone(), address))
    }

    /// Reference to the collection at `path` (odd number of components).
    pub fn collection(&self, path: &str) -> Result<CollectionReference> {
        let address = Address::parse(path)?;
        if !address.is_collection() {
            return Err(ClientError::InvalidPath(format!(
                "\"{}\" is a document path",
                address
            )));
        }
        Ok(CollectionReference::new(self.clone(), address))
    }

    /// Number of subscriptions currently registered under a handle.
    pub fn active_listeners(&self) -> usize {
        self.inner.registry.len()
    }

    /// Unsubscribe every live listener, wait for the acknowledgements, then
    /// close the bridge. Later operations fail with `Shutdown`.
    ///
    /// Subscribes still in flight are not waited for: when their handle
    /// arrives it is unsubscribed, and the transport closes once the last
    /// outstanding request resolves.
    pub fn shutdown(&self) {
        self.inner.shutdown(true);
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.bridge.is_closed()
    }
}

impl DatabaseInner {
    fn shutdown(&self, wait: bool) {
        if self.bridge.is_closed() {
            return;
        }
        debug!(instance = %self.instance, "shutting down database instance");

        let acks = self.registry.shutdown();
        if wait {
            for ack in acks {
                if let Err(e) = ack.wait() {
                    warn!(instance = %self.instance, error = %e, "unsubscribe during shutdown failed");
                }
            }
        }
        self.bridge.close();
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

impl PartialEq for Database {
    fn eq(&self, other: &Self) -> bool {
        self.inner.instance == other.inner.instance
    }
}

impl Eq for Database {}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("instance", &self.inner.instance)
            .field("active_listeners", &self.active_listeners())
            .finish()
    }
}
