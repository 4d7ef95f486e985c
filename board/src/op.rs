//! Structural operations and classification of the raw edit feed.
//!
//! The drawing surface reports every edit as an opaque JSON operation tagged
//! by `type`. Only three kinds change the document structure and are
//! synchronized: `insert_node`, `remove_node` and `set_node`. Selection,
//! viewport and theme changes are local view state and never leave the
//! process. Anything else is logged and ignored.
//!
//! [`Operation`] is a closed enum. Adding a kind means extending the enum and
//! every exhaustive `match` over it, the reconciler first among them.

#[cfg(test)]
#[path = "op_test.rs"]
mod op_test;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::tree::{Element, Path, Properties};

/// Wire tag for [`Operation::InsertNode`].
pub const INSERT_NODE: &str = "insert_node";
/// Wire tag for [`Operation::RemoveNode`].
pub const REMOVE_NODE: &str = "remove_node";
/// Wire tag for [`Operation::SetNode`].
pub const SET_NODE: &str = "set_node";

/// Operation kinds that only touch local view state.
pub const METADATA_KINDS: [&str; 3] = ["set_selection", "set_viewport", "set_theme"];

/// One atomic structural edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// `node` becomes a child at `path`'s final index within the parent at `path`'s prefix.
    InsertNode { path: Path, node: Element },
    /// The element at `path` is removed. `node`, when present, is the removed content.
    RemoveNode {
        path: Path,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<Element>,
    },
    /// Full replacement (`node`) or sparse merge (`properties`) of the element at `path`.
    SetNode {
        path: Path,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<Element>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<Properties>,
        /// Post-edit values as reported by the drawing library. Preferred over
        /// `properties` as the merge source when present.
        #[serde(rename = "newProperties", default, skip_serializing_if = "Option::is_none")]
        new_properties: Option<Properties>,
    },
}

/// What a `set_node` asks the reconciler to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetAction<'a> {
    /// Replace the element wholesale.
    Replace(&'a Element),
    /// Merge sparse properties into the existing element.
    Merge(&'a Properties),
    /// Neither payload is present.
    Nothing,
}

impl Operation {
    /// Insert `node` at `path`.
    #[must_use]
    pub fn insert(path: &[usize], node: Element) -> Self {
        Self::InsertNode { path: Path::new(path), node }
    }

    /// Remove the element at `path`, carrying its content so receivers can locate it by id.
    #[must_use]
    pub fn remove(path: &[usize], node: Option<Element>) -> Self {
        Self::RemoveNode { path: Path::new(path), node }
    }

    /// Replace the element at `path` wholesale.
    #[must_use]
    pub fn replace(path: &[usize], node: Element) -> Self {
        Self::SetNode { path: Path::new(path), node: Some(node), properties: None, new_properties: None }
    }

    /// Merge `properties` into the element at `path`.
    #[must_use]
    pub fn set_properties(path: &[usize], properties: Properties) -> Self {
        Self::SetNode { path: Path::new(path), node: None, properties: Some(properties), new_properties: None }
    }

    /// Wire tag of this operation.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsertNode { .. } => INSERT_NODE,
            Self::RemoveNode { .. } => REMOVE_NODE,
            Self::SetNode { .. } => SET_NODE,
        }
    }

    /// Positional address carried by the operation.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::InsertNode { path, .. } | Self::RemoveNode { path, .. } | Self::SetNode { path, .. } => path,
        }
    }

    /// Id of the element the operation carries, if it carries one.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::InsertNode { node, .. } => Some(node.id.as_str()),
            Self::RemoveNode { node, .. } | Self::SetNode { node, .. } => node.as_ref().map(|n| n.id.as_str()),
        }
    }

    /// Resolve a `set_node` payload. A full `node` takes precedence over
    /// `properties`; `newProperties` takes precedence over `properties`.
    /// Always [`SetAction::Nothing`] for other kinds.
    #[must_use]
    pub fn set_action(&self) -> SetAction<'_> {
        let Self::SetNode { node, properties, new_properties, .. } = self else {
            return SetAction::Nothing;
        };
        if let Some(node) = node {
            return SetAction::Replace(node);
        }
        match new_properties.as_ref().or(properties.as_ref()) {
            Some(props) => SetAction::Merge(props),
            None => SetAction::Nothing,
        }
    }
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// How a raw operation from the edit feed is treated.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A structural edit that is synchronized.
    Structural(Operation),
    /// Local view state (selection, viewport, theme). Never synchronized.
    Metadata(String),
    /// A `type` this crate does not know.
    Unknown(String),
    /// A structural tag whose payload failed to parse, or no `type` at all.
    Malformed(String),
}

/// Classify one raw operation.
#[must_use]
pub fn classify(raw: &Value) -> Classified {
    let Some(kind) = raw.get("type").and_then(Value::as_str) else {
        return Classified::Malformed("missing type".to_owned());
    };
    match kind {
        INSERT_NODE | REMOVE_NODE | SET_NODE => match Operation::deserialize(raw) {
            Ok(op) => Classified::Structural(op),
            Err(e) => Classified::Malformed(format!("{kind}: {e}")),
        },
        k if METADATA_KINDS.contains(&k) => Classified::Metadata(k.to_owned()),
        k => Classified::Unknown(k.to_owned()),
    }
}

/// Keep only the structural operations of a raw batch, in order.
#[must_use]
pub fn structural(raw: &[Value]) -> Vec<Operation> {
    raw.iter().filter_map(keep_structural).collect()
}

fn keep_structural(raw: &Value) -> Option<Operation> {
    match classify(raw) {
        Classified::Structural(op) => Some(op),
        Classified::Metadata(kind) => {
            debug!(%kind, "op: metadata operation not synchronized");
            None
        }
        Classified::Unknown(kind) => {
            warn!(%kind, "op: unknown operation type ignored");
            None
        }
        Classified::Malformed(reason) => {
            warn!(%reason, "op: malformed operation ignored");
            None
        }
    }
}

/// Deserialize an operation list, dropping entries that are not structural
/// instead of failing the whole batch.
///
/// # Errors
///
/// Fails only when the field is not a JSON array.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Vec<Operation>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(structural(&raw))
}
