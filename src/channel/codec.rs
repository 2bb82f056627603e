//! Frame codec for byte-stream transports.
//!
//! Frame layout:
//! ```text
//! ┌────────────┬────────────┬──────────────────────┐
//! │ len: u32 BE│ crc: u32 BE│ body: MessagePack    │
//! └────────────┴────────────┴──────────────────────┘
//! ```
//! `crc` is the CRC-32 of `body`. Bodies use named-field MessagePack so
//! either side can be written in any language.

use super::bridge::{Operation, Request};
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{ErrorKind, Read, Write};

/// Largest accepted frame body.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const HEADER_SIZE: usize = 8;

/// Client to service message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    /// Correlates the reply.
    pub id: u64,
    pub operation: Operation,
    pub payload: Value,
}

impl Outbound {
    pub fn new(id: u64, request: Request) -> Self {
        Self {
            id,
            operation: request.operation,
            payload: request.payload,
        }
    }
}

/// Rejection reported by the service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub code: String,
    pub message: String,
}

impl From<RemoteFailure> for ClientError {
    fn from(failure: RemoteFailure) -> Self {
        ClientError::RemoteOperation {
            code: failure.code,
            message: failure.message,
        }
    }
}

/// Service to client message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inbound {
    /// Answer to the outbound message with the same `id`.
    Reply {
        id: u64,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        error: Option<RemoteFailure>,
    },
    /// Unsolicited push for an active subscription.
    Event { handle: i64, body: Value },
}

impl Inbound {
    pub fn ok(id: u64, value: Value) -> Self {
        Inbound::Reply {
            id,
            value,
            error: None,
        }
    }

    pub fn rejected(id: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Inbound::Reply {
            id,
            value: Value::Null,
            error: Some(RemoteFailure {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// Just enough of a reply to route a decode failure to its caller.
#[derive(Deserialize)]
struct ReplyHeader {
    kind: String,
    id: Option<u64>,
}

/// Encode a message body.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(message)?)
}

/// Decode a service message body.
///
/// Map keys that are not strings are rejected here, since a reply tree only
/// admits string keys.
pub fn decode_inbound(body: &[u8]) -> Result<Inbound> {
    Ok(rmp_serde::from_slice(body)?)
}

/// Decode a client message body (service side).
pub fn decode_outbound(body: &[u8]) -> Result<Outbound> {
    Ok(rmp_serde::from_slice(body)?)
}

/// Recover the request id of a reply body that failed to decode.
pub fn reply_id(body: &[u8]) -> Option<u64> {
    let header: ReplyHeader = rmp_serde::from_slice(body).ok()?;
    if header.kind == "reply" {
        header.id
    } else {
        None
    }
}

/// Write one frame.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, body: &[u8]) -> Result<()> {
    if body.len() > MAX_FRAME_SIZE {
        return Err(ClientError::Serialization(format!(
            "frame of {} bytes exceeds limit of {}",
            body.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(body.len() as u32).to_be_bytes());
    header[4..8].copy_from_slice(&crc32fast::hash(body).to_be_bytes());

    writer.write_all(&header)?;
    writer.write_all(body)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream, that is, one that
/// falls between frames.
///
/// A checksum mismatch is a `MalformedReply` and leaves the stream aligned on
/// the next frame. A truncated header or an oversized length is a
/// `Transport` error, since the stream can no longer be trusted.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(ClientError::Transport(format!(
                    "truncated frame header: {} of {} bytes",
                    filled, HEADER_SIZE
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let expected = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    if len > MAX_FRAME_SIZE {
        return Err(ClientError::Transport(format!(
            "incoming frame of {} bytes exceeds limit of {}",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;

    let got = crc32fast::hash(&body);
    if got != expected {
        return Err(ClientError::MalformedReply(format!(
            "frame checksum mismatch: expected {:08x}, got {:08x}",
            expected, got
        )));
    }

    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::io::Cursor;

    #[test]
    fn test_reply_frame_roundtrip() {
        let message = Inbound::ok(3, json!({"path": "users/42", "exists": true}));
        let mut wire = Vec::new();
        write_frame(&mut wire, &encode(&message).unwrap()).unwrap();

        let mut cursor = Cursor::new(wire);
        let body = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(decode_inbound(&body).unwrap(), message);
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_outbound_carries_operation_name() {
        let outbound = Outbound {
            id: 1,
            operation: Operation::SubscribeDocument,
            payload: json!({"path": "a/b"}),
        };
        let body = encode(&outbound).unwrap();
        assert_eq!(decode_outbound(&body).unwrap(), outbound);
    }

    #[test]
    fn test_checksum_mismatch_is_malformed() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &encode(&Inbound::ok(1, Value::Null)).unwrap()).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let result = read_frame(&mut Cursor::new(wire));
        assert!(matches!(result, Err(ClientError::MalformedReply(_))));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
        wire.extend_from_slice(&0u32.to_be_bytes());

        let result = read_frame(&mut Cursor::new(wire));
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }

    #[test]
    fn test_truncated_header_is_transport_error() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abcdef").unwrap();

        for cut in 1..HEADER_SIZE {
            let result = read_frame(&mut Cursor::new(wire[..cut].to_vec()));
            assert!(
                matches!(result, Err(ClientError::Transport(_))),
                "header cut after {} bytes gave {:?}",
                cut,
                result
            );
        }
        assert!(read_frame(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn test_truncated_body_is_transport_error() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abcdef").unwrap();
        wire.truncate(wire.len() - 2);

        let result = read_frame(&mut Cursor::new(wire));
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }

    #[derive(Serialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    enum IntKeyedReply {
        Reply { id: u64, value: BTreeMap<u32, String> },
    }

    #[test]
    fn test_non_string_keys_are_malformed() {
        let mut value = BTreeMap::new();
        value.insert(1u32, "x".to_string());
        let body = encode(&IntKeyedReply::Reply { id: 9, value }).unwrap();

        assert!(matches!(
            decode_inbound(&body),
            Err(ClientError::MalformedReply(_))
        ));
        assert_eq!(reply_id(&body), Some(9));
    }
}
