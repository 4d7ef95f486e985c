//! Document model: board elements, positional paths, and the element forest.
//!
//! This module defines what is on the board (`Element`), how an element is
//! addressed by position (`Path`), and the forest that owns every element
//! (`Tree`). Elements nest through an optional ordered `children` list and
//! carry an open-ended attribute bag (`properties`) that this crate copies but
//! never interprets.
//!
//! A `Tree` is a value. Every mutation takes `&self` and returns a new tree,
//! leaving the receiver untouched so callers can diff or roll back by simply
//! keeping the old value. Mutations that cannot be applied (path beyond
//! bounds, parent without a `children` list) return a [`TreeError`] and
//! produce no new tree.
//!
//! Element ids are unique across the whole forest, not just among siblings,
//! so lookups by id are unambiguous. Paths are only meaningful relative to
//! the tree they were computed against.

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for a board element.
pub type ElementId = String;

/// Open-ended element attributes (position, style, text, ...).
pub type Properties = Map<String, Value>;

// =============================================================================
// ELEMENT
// =============================================================================

/// A node in the document forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Globally unique, immutable identifier.
    pub id: ElementId,
    /// Kind tag (`"geometry"`, `"mindmap"`, ...). Opaque to this crate.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Ordered child elements, when this element is a container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Element>>,
    /// Every other attribute, kept losslessly.
    #[serde(flatten)]
    pub properties: Properties,
}

impl Element {
    /// Create a childless element with no properties.
    pub fn new(id: impl Into<ElementId>, kind: impl Into<String>) -> Self {
        Self { id: id.into(), kind: kind.into(), children: None, properties: Properties::new() }
    }

    /// Builder: set one property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builder: attach a children list.
    #[must_use]
    pub fn with_children(mut self, children: Vec<Element>) -> Self {
        self.children = Some(children);
        self
    }

    /// Look up a single property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Merge a sparse property update into this element.
    ///
    /// Null values mean "leave unchanged", not "clear". `id` is immutable and
    /// is never overwritten; `type` updates [`Element::kind`]; `children` is
    /// structural and only changes through insert/remove operations.
    ///
    /// Returns the number of keys written.
    pub fn merge_properties(&mut self, incoming: &Properties) -> usize {
        let mut written = 0;
        for (key, value) in incoming {
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                "id" | "children" => {}
                "type" => {
                    if let Some(kind) = value.as_str() {
                        self.kind = kind.to_owned();
                        written += 1;
                    }
                }
                _ => {
                    self.properties.insert(key.clone(), value.clone());
                    written += 1;
                }
            }
        }
        written
    }
}

// =============================================================================
// PATH
// =============================================================================

/// Positional address of an element: child indices descending from the forest root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<usize>);

impl Path {
    /// Build a path from child indices.
    #[must_use]
    pub fn new(indices: &[usize]) -> Self {
        Self(indices.to_vec())
    }

    /// The raw index sequence.
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    /// True for the empty path, which addresses the forest itself.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into the parent prefix and the final child index.
    #[must_use]
    pub fn split_last(&self) -> Option<(&[usize], usize)> {
        self.0.split_last().map(|(last, prefix)| (prefix, *last))
    }

    /// The path of the `index`-th child of the element at this path.
    #[must_use]
    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }
}

impl From<Vec<usize>> for Path {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Why a positional mutation could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// The empty path addresses the forest, not an element.
    #[error("empty path does not address an element")]
    EmptyPath,
    /// Some index along the path is out of bounds.
    #[error("path not found: {0}")]
    PathNotFound(Path),
    /// The parent addressed by the path prefix has no `children` list.
    #[error("element at {0} has no children collection")]
    NoChildren(Path),
}

// =============================================================================
// TREE
// =============================================================================

/// The document forest: an ordered list of top-level elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tree {
    children: Vec<Element>,
}

impl Tree {
    /// Wrap a list of top-level elements.
    #[must_use]
    pub fn new(children: Vec<Element>) -> Self {
        Self { children }
    }

    /// Top-level elements in order.
    #[must_use]
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Consume the tree, returning its top-level elements.
    #[must_use]
    pub fn into_children(self) -> Vec<Element> {
        self.children
    }

    /// Total number of elements at every depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if the forest has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Depth-first, pre-order traversal of every element.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self.children.iter()] }
    }

    /// Find an element anywhere in the forest by id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Element> {
        self.iter().find(|el| el.id == id)
    }

    /// Whether an element with this id exists at any depth.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Resolve an id to its current path.
    #[must_use]
    pub fn path_of(&self, id: &str) -> Option<Path> {
        locate(&self.children, id, &mut Vec::new()).map(Path)
    }

    /// Element at a path, if the path resolves.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&Element> {
        let (first, rest) = path.indices().split_first()?;
        let mut node = self.children.get(*first)?;
        for index in rest {
            node = node.children.as_ref()?.get(*index)?;
        }
        Some(node)
    }

    /// Ids that occur more than once. Empty for a well-formed forest.
    #[must_use]
    pub fn duplicate_ids(&self) -> Vec<ElementId> {
        let mut seen = HashSet::new();
        let mut dupes = Vec::new();
        for el in self.iter() {
            if !seen.insert(el.id.as_str()) && !dupes.contains(&el.id) {
                dupes.push(el.id.clone());
            }
        }
        dupes
    }

    // --- Positional mutations ---

    /// Insert `node` so that it ends up at `path`.
    ///
    /// The final index may equal the sibling count (append).
    ///
    /// # Errors
    ///
    /// `EmptyPath`, `PathNotFound` if the parent does not resolve or the index
    /// is past the end, `NoChildren` if the parent is not a container.
    pub fn insert(&self, path: &Path, node: Element) -> Result<Tree, TreeError> {
        let (prefix, index) = path.split_last().ok_or(TreeError::EmptyPath)?;
        let mut next = self.clone();
        let siblings = siblings_mut(&mut next.children, prefix, path)?;
        if index > siblings.len() {
            return Err(TreeError::PathNotFound(path.clone()));
        }
        siblings.insert(index, node);
        Ok(next)
    }

    /// Remove the element at `path`, returning the new tree and the removed element.
    ///
    /// # Errors
    ///
    /// `EmptyPath`, `PathNotFound`, or `NoChildren` when the path does not resolve.
    pub fn remove(&self, path: &Path) -> Result<(Tree, Element), TreeError> {
        let (prefix, index) = path.split_last().ok_or(TreeError::EmptyPath)?;
        let mut next = self.clone();
        let siblings = siblings_mut(&mut next.children, prefix, path)?;
        if index >= siblings.len() {
            return Err(TreeError::PathNotFound(path.clone()));
        }
        let removed = siblings.remove(index);
        Ok((next, removed))
    }

    /// Replace the element at `path` wholesale.
    ///
    /// # Errors
    ///
    /// `EmptyPath`, `PathNotFound`, or `NoChildren` when the path does not resolve.
    pub fn replace(&self, path: &Path, node: Element) -> Result<Tree, TreeError> {
        let mut next = self.clone();
        *node_mut(&mut next.children, path)? = node;
        Ok(next)
    }

    /// Merge a sparse property update into the element at `path`.
    ///
    /// # Errors
    ///
    /// `EmptyPath`, `PathNotFound`, or `NoChildren` when the path does not resolve.
    pub fn merge(&self, path: &Path, properties: &Properties) -> Result<Tree, TreeError> {
        let mut next = self.clone();
        node_mut(&mut next.children, path)?.merge_properties(properties);
        Ok(next)
    }

    // --- Content-addressed mutations ---

    /// Remove an element by id. `None` if no such element exists.
    #[must_use]
    pub fn remove_by_id(&self, id: &str) -> Option<(Tree, Element)> {
        let mut next = self.clone();
        let removed = take(&mut next.children, id)?;
        Some((next, removed))
    }

    /// Replace an element by id. `None` if no such element exists.
    #[must_use]
    pub fn replace_by_id(&self, id: &str, node: Element) -> Option<Tree> {
        let mut next = self.clone();
        *find_mut(&mut next.children, id)? = node;
        Some(next)
    }
}

impl From<Vec<Element>> for Tree {
    fn from(children: Vec<Element>) -> Self {
        Self::new(children)
    }
}

impl<'a> IntoIterator for &'a Tree {
    type Item = &'a Element;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Depth-first, pre-order iterator over a [`Tree`].
pub struct Iter<'a> {
    stack: Vec<std::slice::Iter<'a, Element>>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(el) => {
                    if let Some(children) = &el.children {
                        self.stack.push(children.iter());
                    }
                    return Some(el);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn locate(nodes: &[Element], id: &str, trail: &mut Vec<usize>) -> Option<Vec<usize>> {
    for (index, node) in nodes.iter().enumerate() {
        trail.push(index);
        if node.id == id {
            return Some(trail.clone());
        }
        if let Some(children) = &node.children {
            if let Some(found) = locate(children, id, trail) {
                return Some(found);
            }
        }
        trail.pop();
    }
    None
}

/// Sibling list addressed by `prefix`. `full` is only used for error reporting.
fn siblings_mut<'a>(
    roots: &'a mut Vec<Element>,
    prefix: &[usize],
    full: &Path,
) -> Result<&'a mut Vec<Element>, TreeError> {
    let mut list = roots;
    for (depth, index) in prefix.iter().enumerate() {
        let node = list
            .get_mut(*index)
            .ok_or_else(|| TreeError::PathNotFound(full.clone()))?;
        list = node
            .children
            .as_mut()
            .ok_or_else(|| TreeError::NoChildren(Path::new(&prefix[..=depth])))?;
    }
    Ok(list)
}

fn node_mut<'a>(roots: &'a mut Vec<Element>, path: &Path) -> Result<&'a mut Element, TreeError> {
    let (prefix, index) = path.split_last().ok_or(TreeError::EmptyPath)?;
    let siblings = siblings_mut(roots, prefix, path)?;
    siblings
        .get_mut(index)
        .ok_or_else(|| TreeError::PathNotFound(path.clone()))
}

fn take(nodes: &mut Vec<Element>, id: &str) -> Option<Element> {
    if let Some(index) = nodes.iter().position(|node| node.id == id) {
        return Some(nodes.remove(index));
    }
    nodes.iter_mut().filter_map(|node| node.children.as_mut()).find_map(|children| take(children, id))
}

fn find_mut<'a>(nodes: &'a mut [Element], id: &str) -> Option<&'a mut Element> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = node.children.as_deref_mut().and_then(|children| find_mut(children, id)) {
            return Some(found);
        }
    }
    None
}
