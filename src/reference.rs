//! Document and collection references.
//!
//! A reference is a database handle plus an [`Address`]. It holds no other
//! state, so it is cheap to clone and safe to share across threads. Every
//! one-shot operation blocks the calling thread until the service replies.

use crate::address::Address;
use crate::channel::Operation;
use crate::database::Database;
use crate::error::{ClientError, Result};
use crate::listeners::{ListenOptions, SnapshotStream};
use crate::snapshot::{self, DocumentLookup};
use crate::types::{Fields, ReadPolicy, SetOptions};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Reference to a single document.
#[derive(Clone)]
pub struct DocumentReference {
    database: Database,
    address: Address,
}

impl DocumentReference {
    pub(crate) fn new(database: Database, address: Address) -> Self {
        debug_assert!(address.is_document());
        Self { database, address }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn id(&self) -> &str {
        self.address.last_component()
    }

    pub fn path(&self) -> String {
        self.address.path()
    }

    /// The collection containing this document.
    pub fn parent(&self) -> CollectionReference {
        let address = self
            .address
            .parent()
            .expect("document addresses have at least two components");
        CollectionReference::new(self.database.clone(), address)
    }

    /// A subcollection at `path`, relative to this document.
    pub fn collection(&self, path: &str) -> Result<CollectionReference> {
        let address = self.address.child(path)?;
        if !address.is_collection() {
            return Err(ClientError::InvalidPath(format!(
                "\"{}\" is a document path",
                address
            )));
        }
        Ok(CollectionReference::new(self.database.clone(), address))
    }

    /// Read the document. A missing document is `Absent`, not an error.
    pub fn get(&self, policy: ReadPolicy) -> Result<DocumentLookup> {
        let reply = self
            .database
            .bridge()
            .invoke_for_result(
                Operation::GetDocument,
                json!({
                    "path": self.path(),
                    "readPolicy": policy.as_str(),
                }),
            )
            .wait()?;
        snapshot::decode_lookup(&reply)
    }

    /// Write the document, replacing it unless `options.merge` is set.
    pub fn set(&self, fields: Fields, options: SetOptions) -> Result<()> {
        self.database
            .bridge()
            .invoke(
                Operation::SetDocument,
                json!({
                    "path": self.path(),
                    "data": fields_to_value(fields),
                    "options": {"merge": options.merge},
                }),
            )
            .wait()
    }

    /// Write any serializable value that encodes as a map.
    pub fn set_data<T: Serialize>(&self, data: &T, options: SetOptions) -> Result<()> {
        self.set(value_to_fields(serde_json::to_value(data)?)?, options)
    }

    /// Merge `fields` into an existing document. Fails with
    /// `RemoteOperation` if the document does not exist.
    pub fn update(&self, fields: Fields) -> Result<()> {
        self.database
            .bridge()
            .invoke(
                Operation::UpdateDocument,
                json!({
                    "path": self.path(),
                    "data": fields_to_value(fields),
                }),
            )
            .wait()
    }

    pub fn delete(&self) -> Result<()> {
        self.database
            .bridge()
            .invoke(Operation::DeleteDocument, json!({ "path": self.path() }))
            .wait()
    }

    /// Live snapshots of this document. Nothing is sent until the stream's
    /// first `listen`.
    pub fn snapshots(&self, include_metadata_changes: bool) -> SnapshotStream {
        self.database.registry().subscribe(
            self.address.clone(),
            ListenOptions {
                include_metadata_changes,
            },
        )
    }
}

impl PartialEq for DocumentReference {
    fn eq(&self, other: &Self) -> bool {
        self.database.instance() == other.database.instance() && self.address == other.address
    }
}

impl Eq for DocumentReference {}

impl Hash for DocumentReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.database.instance().hash(state);
        self.address.hash(state);
    }
}

impl fmt::Debug for DocumentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DocumentReference({}: {})",
            self.database.instance(),
            self.address
        )
    }
}

/// Reference to a collection of documents.
#[derive(Clone)]
pub struct CollectionReference {
    database: Database,
    address: Address,
}

impl CollectionReference {
    pub(crate) fn new(database: Database, address: Address) -> Self {
        debug_assert!(address.is_collection());
        Self { database, address }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn id(&self) -> &str {
        self.address.last_component()
    }

    pub fn path(&self) -> String {
        self.address.path()
    }

    /// The document containing this collection; `None` at the top level.
    pub fn parent(&self) -> Option<DocumentReference> {
        self.address
            .parent()
            .map(|address| DocumentReference::new(self.database.clone(), address))
    }

    /// A document at `path`, relative to this collection.
    pub fn doc(&self, path: &str) -> Result<DocumentReference> {
        let address = self.address.child(path)?;
        if !address.is_document() {
            return Err(ClientError::InvalidPath(format!(
                "\"{}\" is a collection path",
                address
            )));
        }
        Ok(DocumentReference::new(self.database.clone(), address))
    }
}

impl PartialEq for CollectionReference {
    fn eq(&self, other: &Self) -> bool {
        self.database.instance() == other.database.instance() && self.address == other.address
    }
}

impl Eq for CollectionReference {}

impl Hash for CollectionReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.database.instance().hash(state);
        self.address.hash(state);
    }
}

impl fmt::Debug for CollectionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CollectionReference({}: {})",
            self.database.instance(),
            self.address
        )
    }
}

fn fields_to_value(fields: Fields) -> Value {
    Value::Object(fields.into_iter().collect())
}

fn value_to_fields(value: Value) -> Result<Fields> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(ClientError::Serialization(format!(
            "document data must serialize to a map, got {}",
            other
        ))),
    }
}
