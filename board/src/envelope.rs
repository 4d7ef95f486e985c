//! Envelope codec: the transmissible wrapper around one operation batch.
//!
//! An envelope tags a batch with the sending process's [`SourceId`] and a
//! fixed-width UTC timestamp with millisecond precision (so timestamps sort
//! as strings), and optionally carries the sender's full tree as
//! observed at send time (`children`). The codec never transforms operation
//! payloads; it only wraps and unwraps them.
//!
//! Decoding is forward compatible: payloads whose `kind` is not `"op"` are
//! reported as [`Decoded::Ignored`] rather than as errors, and operations of
//! unknown type inside an `"op"` envelope are dropped without failing the
//! batch.

#[cfg(test)]
#[path = "envelope_test.rs"]
mod envelope_test;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::echo::SourceId;
use crate::op::{Operation, deserialize_lenient};
use crate::tree::{Element, Path};

/// The only envelope kind this crate applies.
pub const ENVELOPE_KIND: &str = "op";

/// Timestamp used when the clock cannot be formatted.
const EPOCH_TIMESTAMP: &str = "1970-01-01T00:00:00.000Z";

/// Error returned by [`decode`] and [`Envelope::encode`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload is not valid JSON, or an `"op"` envelope has the wrong shape.
    #[error("invalid envelope json: {0}")]
    Json(#[from] serde_json::Error),
    /// The payload parsed but is not a JSON object.
    #[error("envelope is not a JSON object")]
    NotAnObject,
    /// The payload has no string `kind` field.
    #[error("envelope has no kind field")]
    MissingKind,
}

/// One operation batch on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Always [`ENVELOPE_KIND`] for envelopes built by this crate.
    pub kind: String,
    /// Identity of the sending process.
    #[serde(default)]
    pub source_id: SourceId,
    /// Encode-time wall clock, RFC 3339.
    #[serde(default)]
    pub timestamp: String,
    /// Sender's full tree at send time. Takes precedence over `operations` on receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Element>>,
    /// Structural operations in the order they happened.
    #[serde(default, deserialize_with = "deserialize_lenient")]
    pub operations: Vec<Operation>,
}

/// Result of decoding a raw payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// An `"op"` envelope.
    Op(Envelope),
    /// A well-formed payload of some other kind.
    Ignored { kind: String },
}

impl Envelope {
    /// Wrap a batch, stamping the current time.
    #[must_use]
    pub fn new(source_id: SourceId, operations: Vec<Operation>, snapshot: Option<Vec<Element>>) -> Self {
        Self {
            kind: ENVELOPE_KIND.to_owned(),
            source_id,
            timestamp: format_timestamp(OffsetDateTime::now_utc()),
            children: snapshot,
            operations,
        }
    }

    /// Serialize to the JSON string handed to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if a property value cannot be serialized.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// One [`ElementChange`] per operation, in order.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if an element cannot be serialized.
    pub fn changes(&self) -> Result<Vec<ElementChange>, CodecError> {
        self.operations.iter().map(ElementChange::of).collect()
    }

    /// Log-friendly counts.
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary {
            kind: self.kind.clone(),
            source_id: self.source_id.to_string(),
            ops: self.operations.len(),
            children: self.children.as_ref().map(Vec::len),
        }
    }
}

/// Decode a raw transport payload.
///
/// # Errors
///
/// Returns [`CodecError`] for unparseable JSON, a non-object payload, a missing
/// `kind`, or an `"op"` envelope whose fields have the wrong shape.
pub fn decode(raw: &str) -> Result<Decoded, CodecError> {
    let value: Value = serde_json::from_str(raw)?;
    decode_value(value)
}

/// Decode an already-parsed payload.
///
/// # Errors
///
/// Same as [`decode`], minus the JSON parse step.
pub fn decode_value(value: Value) -> Result<Decoded, CodecError> {
    let Some(object) = value.as_object() else {
        return Err(CodecError::NotAnObject);
    };
    let Some(kind) = object.get("kind").and_then(Value::as_str) else {
        return Err(CodecError::MissingKind);
    };
    if kind != ENVELOPE_KIND {
        return Ok(Decoded::Ignored { kind: kind.to_owned() });
    }
    Ok(Decoded::Op(serde_json::from_value(value)?))
}

// =============================================================================
// SUMMARY
// =============================================================================

/// Counts describing an envelope, for structured logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub kind: String,
    pub source_id: String,
    pub ops: usize,
    pub children: Option<usize>,
}

impl Summary {
    /// Summarize any payload, decodable or not. Missing fields read as `"?"` / zero.
    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).unwrap_or("?").to_owned();
        Self {
            kind: text("kind"),
            source_id: text("source_id"),
            ops: value
                .get("operations")
                .and_then(Value::as_array)
                .map_or(0, Vec::len),
            children: value.get("children").and_then(Value::as_array).map(Vec::len),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind={} source_id={} ops={}", self.kind, self.source_id, self.ops)?;
        match self.children {
            Some(n) => write!(f, " children={n}"),
            None => write!(f, " children=-"),
        }
    }
}

// =============================================================================
// CHANGES
// =============================================================================

/// Per-element view of one operation, for monitors and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementChange {
    /// Wire tag of the operation.
    pub operation_type: &'static str,
    /// Id of the element the operation carries, when it carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    /// Kind of that element, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
    /// The carried element for insert/remove; path and payloads for set.
    pub element_data: Value,
}

impl ElementChange {
    /// Describe one operation.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if an element cannot be serialized.
    pub fn of(op: &Operation) -> Result<Self, CodecError> {
        let (element, element_data) = match op {
            Operation::InsertNode { node, .. } | Operation::RemoveNode { node: Some(node), .. } => {
                (Some(node), serde_json::to_value(node)?)
            }
            Operation::RemoveNode { path, node: None } => (None, Value::Object(path_data(path)?)),
            Operation::SetNode { path, node, properties, new_properties } => {
                let mut data = path_data(path)?;
                if let Some(node) = node {
                    data.insert("node".to_owned(), serde_json::to_value(node)?);
                }
                if let Some(properties) = properties {
                    data.insert("properties".to_owned(), Value::Object(properties.clone()));
                }
                if let Some(new_properties) = new_properties {
                    data.insert("newProperties".to_owned(), Value::Object(new_properties.clone()));
                }
                (node.as_ref(), Value::Object(data))
            }
        };
        Ok(Self {
            operation_type: op.kind(),
            element_id: element.map(|el| el.id.clone()),
            element_type: element.map(|el| el.kind.clone()).filter(|kind| !kind.is_empty()),
            element_data,
        })
    }
}

impl fmt::Display for ElementChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} id={} type={}",
            self.operation_type,
            self.element_id.as_deref().unwrap_or("-"),
            self.element_type.as_deref().unwrap_or("-"),
        )
    }
}

fn path_data(path: &Path) -> Result<Map<String, Value>, CodecError> {
    let mut data = Map::new();
    data.insert("path".to_owned(), serde_json::to_value(path)?);
    Ok(data)
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ` in UTC. Always 24 characters.
fn format_timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    at.to_offset(UtcOffset::UTC)
        .format(&format)
        .unwrap_or_else(|_| EPOCH_TIMESTAMP.to_owned())
}
