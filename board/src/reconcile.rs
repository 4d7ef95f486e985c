//! Document reconciliation: applying an operation batch to the authoritative tree.
//!
//! POLICY
//! ======
//! 1. Snapshot wins. A batch that carries the sender's full tree is adopted
//!    verbatim; its operations are not replayed. Paths are only valid against
//!    the tree they were computed from, so replaying them against a diverged
//!    local tree can corrupt it, while a snapshot cannot.
//! 2. Otherwise operations replay in order against the current tree:
//!    - `insert_node` is skipped when the id already exists anywhere, which
//!      makes duplicate delivery harmless.
//!    - `remove_node` locates its target by id, not by path.
//!    - `set_node` replaces by id when it carries a full node, or merges
//!      properties at its path. Null property values leave keys unchanged.
//! 3. An operation that cannot be applied is skipped; the rest of the batch
//!    still applies.
//!
//! Reconciliation is a pure function from `(tree, batch)` to a new tree plus
//! a description of what changed. The input tree is never modified.

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod reconcile_test;

use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::op::{Operation, SetAction};
use crate::tree::{Element, Tree};

/// Why an operation was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// `insert_node` for an id that is already present.
    DuplicateId,
    /// The target id does not exist (already removed, or never seen).
    NotFound,
    /// The operation's path does not resolve against the current tree.
    PathNotFound,
    /// `set_node` with neither `node` nor `properties`.
    EmptySet,
}

/// What a batch did to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// A snapshot was adopted and differs from the previous tree.
    Snapshot,
    /// Operations were replayed.
    Replayed { applied: usize, skipped: usize },
    /// Nothing changed.
    Unchanged,
}

/// A skipped operation, by position in its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub index: usize,
    pub kind: &'static str,
    pub reason: Skip,
}

/// Output of [`reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub tree: Tree,
    pub change: Change,
    pub skipped: Vec<Skipped>,
}

impl Reconciled {
    /// Whether the view should be given the new tree.
    #[must_use]
    pub fn render_needed(&self) -> bool {
        match self.change {
            Change::Snapshot => true,
            Change::Replayed { applied, .. } => applied > 0,
            Change::Unchanged => false,
        }
    }
}

/// Apply an envelope's batch to `tree`.
#[must_use]
pub fn reconcile_envelope(tree: &Tree, envelope: &Envelope) -> Reconciled {
    reconcile(tree, envelope.children.as_deref(), &envelope.operations)
}

/// Apply a batch to `tree`: adopt `snapshot` if given, otherwise replay `operations`.
#[must_use]
pub fn reconcile(tree: &Tree, snapshot: Option<&[Element]>, operations: &[Operation]) -> Reconciled {
    if let Some(children) = snapshot {
        return adopt(tree, children);
    }
    if operations.is_empty() {
        return Reconciled { tree: tree.clone(), change: Change::Unchanged, skipped: Vec::new() };
    }

    let mut current = tree.clone();
    let mut applied = 0;
    let mut skipped = Vec::new();
    for (index, op) in operations.iter().enumerate() {
        match apply_operation(&current, op) {
            Ok(next) => {
                current = next;
                applied += 1;
            }
            Err(reason) => {
                debug!(index, kind = op.kind(), path = %op.path(), ?reason, "reconcile: operation skipped");
                skipped.push(Skipped { index, kind: op.kind(), reason });
            }
        }
    }
    let change = Change::Replayed { applied, skipped: skipped.len() };
    Reconciled { tree: current, change, skipped }
}

/// Apply one operation, returning the new tree or the reason it was skipped.
///
/// # Errors
///
/// Returns the [`Skip`] reason when the operation does not apply to `tree`.
pub fn apply_operation(tree: &Tree, op: &Operation) -> Result<Tree, Skip> {
    match op {
        Operation::InsertNode { path, node } => {
            if tree.contains(&node.id) {
                return Err(Skip::DuplicateId);
            }
            match tree.insert(path, node.clone()) {
                Ok(next) => Ok(next),
                Err(e) => {
                    debug!(id = %node.id, error = %e, "reconcile: insert path stale, appending at root");
                    let mut children = tree.children().to_vec();
                    children.push(node.clone());
                    Ok(Tree::new(children))
                }
            }
        }
        Operation::RemoveNode { path, node } => match node {
            Some(node) => tree
                .remove_by_id(&node.id)
                .map(|(next, _)| next)
                .ok_or(Skip::NotFound),
            None => tree
                .remove(path)
                .map(|(next, _)| next)
                .map_err(|_| Skip::PathNotFound),
        },
        Operation::SetNode { path, .. } => match op.set_action() {
            SetAction::Replace(node) => tree.replace_by_id(&node.id, node.clone()).ok_or(Skip::NotFound),
            SetAction::Merge(properties) => tree.merge(path, properties).map_err(|_| Skip::PathNotFound),
            SetAction::Nothing => Err(Skip::EmptySet),
        },
    }
}

fn adopt(tree: &Tree, children: &[Element]) -> Reconciled {
    let next = Tree::new(children.to_vec());
    let dupes = next.duplicate_ids();
    if !dupes.is_empty() {
        warn!(count = dupes.len(), first = %dupes[0], "reconcile: adopted snapshot has duplicate ids");
    }
    let change = if next == *tree { Change::Unchanged } else { Change::Snapshot };
    Reconciled { tree: next, change, skipped: Vec::new() }
}
