//! Tree Node Store
//!
//! Every node of the tree lives behind its own reader/writer lock and is
//! addressed through a reference-counted handle. A child slot is just an
//! `Option` of such a handle, so a node can only be reached while its
//! parent's lock is held, and its memory is released when the last handle
//! (the parent link or an owned lock guard) goes away.
//!
//! ## Layout
//!
//! ```text
//!            Arc<RwLock<Node>>
//!          ┌─────────────────────┐
//!          │ key   │ value       │
//!          │ left  │ right       │──> Arc<RwLock<Node>> (keys >= key)
//!          └───┬─────────────────┘
//!              │
//!              ▼
//!     Arc<RwLock<Node>> (keys < key)
//! ```

use parking_lot::RwLock;
use std::fmt;
use std::mem;
use std::sync::Arc;
use thiserror::Error;

/// Maximum length in bytes of a key or a value.
pub const MAX_FIELD_LEN: usize = 255;

/// Shared handle to a locked node.
pub type NodeRef = Arc<RwLock<Node>>;

/// A child slot: empty, or the only owning link to a subtree.
pub type Link = Option<NodeRef>;

/// Errors raised while constructing a node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The key exceeds [`MAX_FIELD_LEN`]
    #[error("key too long: {len} bytes (max: {max})")]
    KeyTooLong { len: usize, max: usize },

    /// The value exceeds [`MAX_FIELD_LEN`]
    #[error("value too long: {len} bytes (max: {max})")]
    ValueTooLong { len: usize, max: usize },
}

/// A single key-value pair in the tree.
#[derive(Default)]
pub struct Node {
    pub(crate) key: String,
    pub(crate) value: String,
    pub(crate) left: Link,
    pub(crate) right: Link,
}

impl Node {
    /// Creates a detached leaf node.
    ///
    /// Fails if either field is longer than [`MAX_FIELD_LEN`] bytes.
    pub fn new(key: &str, value: &str) -> Result<Self, NodeError> {
        if key.len() > MAX_FIELD_LEN {
            return Err(NodeError::KeyTooLong {
                len: key.len(),
                max: MAX_FIELD_LEN,
            });
        }
        if value.len() > MAX_FIELD_LEN {
            return Err(NodeError::ValueTooLong {
                len: value.len(),
                max: MAX_FIELD_LEN,
            });
        }

        Ok(Self {
            key: key.to_owned(),
            value: value.to_owned(),
            left: None,
            right: None,
        })
    }

    /// The root sentinel: empty key, never holds data.
    pub(crate) fn sentinel() -> Self {
        Self::default()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Wraps the node in its lock and returns a handle to it.
    pub(crate) fn into_ref(self) -> NodeRef {
        Arc::new(RwLock::new(self))
    }

    /// Returns the child a search for `key` continues into.
    #[inline]
    pub(crate) fn child(&self, key: &str) -> Option<&NodeRef> {
        if key < self.key.as_str() {
            self.left.as_ref()
        } else {
            self.right.as_ref()
        }
    }

    /// Returns the slot that holds, or would hold, `key`.
    #[inline]
    pub(crate) fn slot_mut(&mut self, key: &str) -> &mut Link {
        if key < self.key.as_str() {
            &mut self.left
        } else {
            &mut self.right
        }
    }

    /// Moves the key and value out of `other` into this node.
    pub(crate) fn take_entry(&mut self, other: &mut Node) {
        self.key = mem::take(&mut other.key);
        self.value = mem::take(&mut other.value);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("has_left", &self.left.is_some())
            .field("has_right", &self.right.is_some())
            .finish()
    }
}

impl Drop for Node {
    // Children are released with an explicit stack so that dropping a
    // list-shaped tree cannot overflow the call stack.
    fn drop(&mut self) {
        if self.left.is_some() || self.right.is_some() {
            free_subtree(self.left.take());
            free_subtree(self.right.take());
        }
    }
}

/// Frees every node reachable from `link` without recursion.
///
/// Takes no locks: a subtree is only handed here once nothing else can reach
/// it. Returns the number of nodes actually freed; a node still referenced
/// elsewhere is left to its other owner.
pub(crate) fn free_subtree(link: Link) -> usize {
    let mut stack: Vec<NodeRef> = link.into_iter().collect();
    let mut freed = 0;

    while let Some(handle) = stack.pop() {
        if let Ok(lock) = Arc::try_unwrap(handle) {
            let mut node = lock.into_inner();
            stack.extend(node.left.take());
            stack.extend(node.right.take());
            freed += 1;
        }
    }

    freed
}
