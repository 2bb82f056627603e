//! Document snapshots and the decoder that builds them from replies.

use crate::address::Address;
use crate::error::{ClientError, Result};
use crate::types::{Fields, SnapshotMetadata};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Immutable point-in-time view of a document.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    address: Address,
    fields: Fields,
    metadata: SnapshotMetadata,
}

impl DocumentSnapshot {
    pub fn new(address: Address, fields: Fields, metadata: SnapshotMetadata) -> Self {
        Self {
            address,
            fields,
            metadata,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Document ID.
    pub fn id(&self) -> &str {
        self.address.last_component()
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Deserialize the fields into an application type.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        let object: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(serde_json::from_value(Value::Object(object))?)
    }
}

/// Result of a point read: the document, or proof that it does not exist.
#[derive(Clone, Debug, PartialEq)]
pub enum DocumentLookup {
    Found(DocumentSnapshot),
    Absent,
}

impl DocumentLookup {
    pub fn exists(&self) -> bool {
        matches!(self, DocumentLookup::Found(_))
    }

    pub fn snapshot(&self) -> Option<&DocumentSnapshot> {
        match self {
            DocumentLookup::Found(snapshot) => Some(snapshot),
            DocumentLookup::Absent => None,
        }
    }

    pub fn into_option(self) -> Option<DocumentSnapshot> {
        match self {
            DocumentLookup::Found(snapshot) => Some(snapshot),
            DocumentLookup::Absent => None,
        }
    }
}

/// State of a watched document carried by a push event.
#[derive(Clone, Debug, PartialEq)]
pub enum DocumentChange {
    Exists(DocumentSnapshot),
    Missing {
        address: Address,
        metadata: SnapshotMetadata,
    },
}

/// Shape shared by get replies and push event bodies.
#[derive(Deserialize)]
struct RawDocument {
    path: String,
    #[serde(default)]
    exists: Option<bool>,
    #[serde(default)]
    data: Option<Map<String, Value>>,
    metadata: SnapshotMetadata,
}

impl RawDocument {
    fn parse(reply: &Value) -> Result<Self> {
        RawDocument::deserialize(reply).map_err(|e| ClientError::MalformedReply(e.to_string()))
    }

    fn address(&self) -> Result<Address> {
        let address = Address::parse(&self.path).map_err(|e| {
            ClientError::MalformedReply(format!("bad path \"{}\": {}", self.path, e))
        })?;
        if !address.is_document() {
            return Err(ClientError::MalformedReply(format!(
                "\"{}\" is not a document path",
                self.path
            )));
        }
        Ok(address)
    }

    fn into_snapshot(self) -> Result<DocumentSnapshot> {
        let address = self.address()?;
        let data = self.data.ok_or_else(|| {
            ClientError::MalformedReply(format!("no data for existing document {}", address))
        })?;
        Ok(DocumentSnapshot {
            address,
            fields: data.into_iter().collect(),
            metadata: self.metadata,
        })
    }
}

/// Decode a reply that must carry an existing document.
pub fn decode_snapshot(reply: &Value) -> Result<DocumentSnapshot> {
    RawDocument::parse(reply)?.into_snapshot()
}

/// Decode a `get-document` reply.
///
/// Existence is decided by the explicit `exists` flag only: an existing
/// document with no fields is `Found`.
pub fn decode_lookup(reply: &Value) -> Result<DocumentLookup> {
    let raw = RawDocument::parse(reply)?;
    match raw.exists {
        Some(true) => Ok(DocumentLookup::Found(raw.into_snapshot()?)),
        Some(false) => {
            raw.address()?;
            Ok(DocumentLookup::Absent)
        }
        None => Err(ClientError::MalformedReply(
            "get reply carries no 'exists' flag".into(),
        )),
    }
}

/// Decode a push event body. Without an `exists` flag, the presence of
/// `data` decides.
pub fn decode_event(body: &Value) -> Result<DocumentChange> {
    let raw = RawDocument::parse(body)?;
    let exists = raw.exists.unwrap_or(raw.data.is_some());
    if exists {
        Ok(DocumentChange::Exists(raw.into_snapshot()?))
    } else {
        Ok(DocumentChange::Missing {
            address: raw.address()?,
            metadata: raw.metadata,
        })
    }
}
