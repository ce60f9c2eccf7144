//! Lock-Coupled Binary Search Tree
//!
//! This module implements the storage engine for TreeKV: an unbalanced binary
//! search tree in which every node carries its own reader/writer lock. There is
//! no global lock; threads walk the tree hand-over-hand.
//!
//! ## Lock Coupling
//!
//! ```text
//!   (root) ── lock ─┐
//!      │            │  1. hold parent
//!      ▼            │
//!     [m] ── lock ──┤  2. lock child
//!      │            │  3. release parent
//!      ▼            │
//!     [t] ── lock ──┘  ... repeat until found / empty slot
//! ```
//!
//! A thread always holds at least one lock on the path to where it stands, so
//! no other thread can unlink the node it is about to step into. Queries take
//! shared locks. Adds and removes take exclusive locks along the whole path,
//! because the parent slot they rewrite must not change between the search
//! and the rewrite.
//!
//! Guards are owned (`ArcRwLock*Guard`), which lets a guard outlive the borrow
//! of the parent it was reached from. A node's children are only reachable
//! through its guard, so the locking discipline is checked by the compiler.
//!
//! ## Cancellation
//!
//! Every operation here is synchronous. Callers running inside async tasks
//! never hold a node lock across an `.await`, so a cancelled task can never
//! leave a lock held behind it.

use super::node::{free_subtree, Node, NodeError, NodeRef};
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type SharedGuard = ArcRwLockReadGuard<RawRwLock, Node>;
type ExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, Node>;

/// Lock mode used while walking the tree.
pub(crate) trait Access {
    type Guard: Deref<Target = Node>;

    fn lock(node: &NodeRef) -> Self::Guard;
}

/// Shared (read) locking.
pub(crate) struct Shared;

/// Exclusive (write) locking.
pub(crate) struct Exclusive;

impl Access for Shared {
    type Guard = SharedGuard;

    #[inline]
    fn lock(node: &NodeRef) -> Self::Guard {
        node.read_arc()
    }
}

impl Access for Exclusive {
    type Guard = ExclusiveGuard;

    #[inline]
    fn lock(node: &NodeRef) -> Self::Guard {
        node.write_arc()
    }
}

/// Result of a search: the located node and its parent, both still locked.
pub(crate) struct Search<G> {
    /// Parent of the target, or the node the target would hang from
    pub parent: G,
    /// The node holding the key, if present
    pub target: Option<G>,
}

/// Walks down from `start` looking for `key`.
///
/// `start` must already be locked in mode `A`. Each child is locked before the
/// previous node is released. The caller drops whichever returned guards it
/// does not need.
pub(crate) fn search<A: Access>(start: A::Guard, key: &str) -> Search<A::Guard> {
    let mut parent = start;

    loop {
        let next = match parent.child(key) {
            Some(next) => Arc::clone(next),
            None => {
                return Search {
                    parent,
                    target: None,
                }
            }
        };

        let current = A::lock(&next);
        if current.key == key {
            return Search {
                parent,
                target: Some(current),
            };
        }

        // The old parent guard is released only after `current` is held.
        parent = current;
    }
}

/// Outcome of [`Tree::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

/// Outcome of [`Tree::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotPresent,
}

/// The shared key-value tree.
///
/// Designed to be wrapped in an `Arc` and shared by every connection task and
/// the administrator console. All operations are thread-safe.
///
/// # Example
///
/// ```
/// use treekv::storage::{AddOutcome, Tree};
///
/// let tree = Tree::new();
/// assert_eq!(tree.add("name", "Ariz").unwrap(), AddOutcome::Added);
/// assert_eq!(tree.query("name").as_deref(), Some("Ariz"));
/// ```
pub struct Tree {
    /// Sentinel root; never freed, holds no real key
    root: NodeRef,

    /// Number of keys currently stored
    key_count: AtomicU64,

    /// Statistics: total queries
    query_count: AtomicU64,

    /// Statistics: total add attempts
    add_count: AtomicU64,

    /// Statistics: total remove attempts
    remove_count: AtomicU64,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("query_count", &self.query_count.load(Ordering::Relaxed))
            .field("add_count", &self.add_count.load(Ordering::Relaxed))
            .field("remove_count", &self.remove_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Creates an empty tree holding only the root sentinel.
    pub fn new() -> Self {
        Self {
            root: Node::sentinel().into_ref(),
            key_count: AtomicU64::new(0),
            query_count: AtomicU64::new(0),
            add_count: AtomicU64::new(0),
            remove_count: AtomicU64::new(0),
        }
    }

    /// Looks up the value stored under `key`.
    pub fn query(&self, key: &str) -> Option<String> {
        self.query_count.fetch_add(1, Ordering::Relaxed);

        let Search { parent, target } = search::<Shared>(self.root.read_arc(), key);
        drop(parent);

        target.map(|node| node.value.clone())
    }

    /// Inserts `key` with `value` unless the key is already present.
    ///
    /// An existing value is never overwritten. Fails only if the key or value
    /// is too long, in which case the tree is left untouched.
    pub fn add(&self, key: &str, value: &str) -> Result<AddOutcome, NodeError> {
        self.add_count.fetch_add(1, Ordering::Relaxed);

        let Search { mut parent, target } = search::<Exclusive>(self.root.write_arc(), key);
        if target.is_some() {
            return Ok(AddOutcome::AlreadyPresent);
        }

        let leaf = Node::new(key, value)?;
        *parent.slot_mut(key) = Some(leaf.into_ref());
        self.key_count.fetch_add(1, Ordering::Relaxed);

        Ok(AddOutcome::Added)
    }

    /// Removes `key` from the tree.
    pub fn remove(&self, key: &str) -> RemoveOutcome {
        self.remove_count.fetch_add(1, Ordering::Relaxed);

        let Search { mut parent, target } = search::<Exclusive>(self.root.write_arc(), key);
        let Some(mut target) = target else {
            return RemoveOutcome::NotPresent;
        };

        if target.left.is_none() || target.right.is_none() {
            // At most one child: splice it into the parent's slot. The target
            // is freed when its guard, the last handle to it, is dropped.
            let child = if target.right.is_none() {
                target.left.take()
            } else {
                target.right.take()
            };
            *parent.slot_mut(key) = child;
            drop(parent);
            drop(target);
        } else {
            // Two children: the parent link is untouched, only the target's
            // contents change.
            drop(parent);
            replace_with_successor(&mut target);
        }

        self.key_count.fetch_sub(1, Ordering::Relaxed);
        RemoveOutcome::Removed
    }

    /// Writes a pre-order dump of the tree to `out`.
    ///
    /// Each node stays read-locked until both of its subtrees have been
    /// written. The dump is advisory and is not a snapshot of the whole tree.
    pub fn traverse_and_print<W: Write>(&self, out: &mut W) -> io::Result<()> {
        enum Step {
            Visit(Option<NodeRef>, usize),
            Release(SharedGuard),
        }

        let mut stack = vec![Step::Visit(Some(Arc::clone(&self.root)), 0)];

        while let Some(step) = stack.pop() {
            let (link, depth) = match step {
                Step::Release(guard) => {
                    drop(guard);
                    continue;
                }
                Step::Visit(link, depth) => (link, depth),
            };

            write!(out, "{:width$}", "", width = depth)?;

            let Some(handle) = link else {
                writeln!(out, "(null)")?;
                continue;
            };

            let node = handle.read_arc();
            if Arc::ptr_eq(&handle, &self.root) {
                writeln!(out, "(root)")?;
            } else {
                writeln!(out, "{} {}", node.key, node.value)?;
            }

            let (left, right) = (node.left.clone(), node.right.clone());
            stack.push(Step::Release(node));
            stack.push(Step::Visit(right, depth + 1));
            stack.push(Step::Visit(left, depth + 1));
        }

        Ok(())
    }

    /// Dumps the tree to the file at `path`, or to stdout when `path` is
    /// missing or blank. An existing file is truncated.
    pub fn print_to(&self, path: Option<&str>) -> io::Result<()> {
        match path.map(str::trim).filter(|p| !p.is_empty()) {
            None => {
                let stdout = io::stdout();
                let mut out = stdout.lock();
                self.traverse_and_print(&mut out)?;
                out.flush()
            }
            Some(path) => {
                let mut out = BufWriter::new(File::create(path)?);
                self.traverse_and_print(&mut out)?;
                out.flush()
            }
        }
    }

    /// Returns every key in order.
    ///
    /// The root stays read-locked for the whole walk, so the result is a
    /// consistent snapshot.
    pub fn keys(&self) -> Vec<String> {
        enum Step {
            Visit(Option<NodeRef>),
            Emit(String),
            Release(SharedGuard),
        }

        let root = self.root.read_arc();
        let mut keys = Vec::new();
        let mut stack = vec![
            Step::Visit(root.right.clone()),
            Step::Visit(root.left.clone()),
        ];

        while let Some(step) = stack.pop() {
            match step {
                Step::Visit(None) => {}
                Step::Visit(Some(handle)) => {
                    let node = handle.read_arc();
                    let (left, right) = (node.left.clone(), node.right.clone());
                    let key = node.key.clone();
                    stack.push(Step::Release(node));
                    stack.push(Step::Visit(right));
                    stack.push(Step::Emit(key));
                    stack.push(Step::Visit(left));
                }
                Step::Emit(key) => keys.push(key),
                Step::Release(guard) => drop(guard),
            }
        }

        drop(root);
        keys
    }

    /// Returns the number of keys stored.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns tree statistics.
    pub fn stats(&self) -> TreeStats {
        TreeStats {
            keys: self.key_count.load(Ordering::Relaxed),
            query_ops: self.query_count.load(Ordering::Relaxed),
            add_ops: self.add_count.load(Ordering::Relaxed),
            remove_ops: self.remove_count.load(Ordering::Relaxed),
        }
    }

    /// Frees every node except the root sentinel and returns how many were
    /// freed.
    ///
    /// Only call this once no other thread can touch the tree (after all
    /// client handlers have drained). The walk takes no node locks.
    pub fn teardown(&self) -> usize {
        let (left, right) = {
            let mut root = self.root.write();
            (root.left.take(), root.right.take())
        };

        let freed = free_subtree(left) + free_subtree(right);
        self.key_count.store(0, Ordering::Relaxed);
        freed
    }
}

/// Replaces the contents of `target`, which has two children, with those of
/// its in-order successor and unlinks the successor.
///
/// The walk down the left spine of the right subtree is lock-coupled: the
/// next node is locked before the predecessor's lock is released, and the
/// predecessor stays locked until the successor has been unlinked from it.
fn replace_with_successor(target: &mut Node) {
    let Some(right) = target.right.clone() else {
        return;
    };

    let mut predecessor = right.write_arc();
    let mut next = match predecessor.left.clone() {
        Some(next) => next,
        None => {
            // The right child itself is the successor.
            target.take_entry(&mut predecessor);
            target.right = predecessor.right.take();
            return;
        }
    };

    loop {
        let mut candidate = next.write_arc();
        match candidate.left.clone() {
            None => {
                target.take_entry(&mut candidate);
                predecessor.left = candidate.right.take();
                return;
            }
            Some(left) => {
                next = left;
                predecessor = candidate;
            }
        }
    }
}

/// Tree statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Total query operations
    pub query_ops: u64,
    /// Total add operations
    pub add_ops: u64,
    /// Total remove operations
    pub remove_ops: u64,
}
