//! Operation wire format.
//!
//! Every value appended to a log is a JSON object with a `type` field. The
//! four built-in types carry a `record`:
//!
//! ```text
//! { "type": "add-invite",    "record": <InviteRecord> }
//! { "type": "del-invite",    "record": <InviteRecord> }
//! { "type": "add-writer",    "record": { "key": <hex> } }
//! { "type": "remove-writer", "record": { "key": <hex> } }
//! ```
//!
//! Any other value is a custom operation. A custom operation that carries a
//! string `filename` and a `blob` (array of bytes, or a UTF-8 string) can be
//! read as a file write with [`CustomOp::file`]. Decoding an operation never
//! looks at those fields, so a custom value is never rejected for its shape.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{CoreError, Result};
use crate::invite::InviteRecord;
use crate::types::WriterKey;

pub const ADD_INVITE: &str = "add-invite";
pub const DEL_INVITE: &str = "del-invite";
pub const ADD_WRITER: &str = "add-writer";
pub const REMOVE_WRITER: &str = "remove-writer";

/// A decoded log operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    AddInvite(InviteRecord),
    DelInvite(InviteRecord),
    AddWriter(WriterKey),
    RemoveWriter(WriterKey),
    Custom(CustomOp),
}

/// Anything that is not a built-in operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomOp {
    /// The `type` field, or empty if the value has none.
    pub kind: String,

    /// The value exactly as appended.
    pub value: Value,
}

/// A file write embedded in a custom operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub blob: Bytes,
}

#[derive(Serialize, Deserialize)]
struct WriterRecord {
    key: WriterKey,
}

impl Operation {
    /// Decode an appended value.
    pub fn from_value(value: &Value) -> Result<Self> {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("");

        match kind {
            ADD_INVITE => Ok(Self::AddInvite(invite_record(value)?)),
            DEL_INVITE => Ok(Self::DelInvite(invite_record(value)?)),
            ADD_WRITER => Ok(Self::AddWriter(writer_record(value)?)),
            REMOVE_WRITER => Ok(Self::RemoveWriter(writer_record(value)?)),
            _ => Ok(Self::Custom(CustomOp {
                kind: kind.to_string(),
                value: value.clone(),
            })),
        }
    }

    /// Encode for appending.
    pub fn to_value(&self) -> Value {
        match self {
            Self::AddInvite(record) => json!({ "type": ADD_INVITE, "record": record.to_json() }),
            Self::DelInvite(record) => json!({ "type": DEL_INVITE, "record": record.to_json() }),
            Self::AddWriter(key) => {
                json!({ "type": ADD_WRITER, "record": { "key": key.to_hex() } })
            }
            Self::RemoveWriter(key) => {
                json!({ "type": REMOVE_WRITER, "record": { "key": key.to_hex() } })
            }
            Self::Custom(op) => op.value.clone(),
        }
    }

    /// The dispatch tag.
    pub fn kind(&self) -> &str {
        match self {
            Self::AddInvite(_) => ADD_INVITE,
            Self::DelInvite(_) => DEL_INVITE,
            Self::AddWriter(_) => ADD_WRITER,
            Self::RemoveWriter(_) => REMOVE_WRITER,
            Self::Custom(op) => &op.kind,
        }
    }
}

impl CustomOp {
    /// The file write this value carries, if any.
    pub fn file(&self) -> Result<Option<FileWrite>> {
        FileWrite::from_value(&self.value)
    }
}

fn record(value: &Value) -> Result<&Value> {
    value
        .get("record")
        .ok_or_else(|| CoreError::MalformedOperation("missing record".into()))
}

fn invite_record(value: &Value) -> Result<InviteRecord> {
    InviteRecord::deserialize(record(value)?)
        .map_err(|e| CoreError::MalformedOperation(format!("invite record: {}", e)))
}

fn writer_record(value: &Value) -> Result<WriterKey> {
    WriterRecord::deserialize(record(value)?)
        .map(|r| r.key)
        .map_err(|e| CoreError::MalformedOperation(format!("writer record: {}", e)))
}

impl FileWrite {
    /// Find an embedded file in a custom value.
    ///
    /// `filename` and `blob` are looked up at the top level first, then inside
    /// `record`. A `blob` that is neither a byte array nor a string is an error.
    pub fn from_value(value: &Value) -> Result<Option<Self>> {
        let holder = if value.get("blob").is_some() {
            value
        } else {
            match value.get("record") {
                Some(record) if record.get("blob").is_some() => record,
                _ => return Ok(None),
            }
        };

        let Some(path) = holder.get("filename").and_then(Value::as_str) else {
            return Ok(None);
        };

        let blob = match &holder["blob"] {
            Value::String(s) => Bytes::copy_from_slice(s.as_bytes()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| {
                            CoreError::MalformedOperation("blob byte out of range".into())
                        })
                })
                .collect::<Result<Vec<u8>>>()?
                .into(),
            Value::Null => return Ok(None),
            other => {
                return Err(CoreError::MalformedOperation(format!(
                    "blob must be bytes or a string, got {}",
                    other
                )))
            }
        };

        Ok(Some(Self {
            path: path.to_string(),
            blob,
        }))
    }

    /// Build a custom operation value that writes `blob` at `path`.
    pub fn to_value(&self, kind: &str) -> Value {
        let mut map = Map::new();
        map.insert("type".into(), Value::String(kind.to_string()));
        map.insert("filename".into(), Value::String(self.path.clone()));
        map.insert(
            "blob".into(),
            Value::Array(self.blob.iter().map(|b| Value::from(*b)).collect()),
        );
        Value::Object(map)
    }
}

/// Encode an operation value as entry payload bytes.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CoreError::EncodingError(e.to_string()))
}

/// Decode entry payload bytes back into an operation value.
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
}
