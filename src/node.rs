use std::sync::Arc;

use crossbeam_epoch::{Atomic, Shared};

use crate::key::Key;

/// A tree vertex: one [`Key`] record plus two atomically updated child
/// slots. A null slot means "no child".
///
/// `key` is immutable for the node's whole lifetime; only the child slots
/// change. Dropping a `Node` never cascades into its children (deletion
/// retires single nodes while their subtrees stay linked), which `Atomic`
/// already guarantees: it drops the pointer, not the pointee. Whole-tree
/// teardown walks the structure explicitly.
pub(crate) struct Node {
    pub(crate) key: Arc<Key>,
    pub(crate) left: Atomic<Node>,
    pub(crate) right: Atomic<Node>,
}

impl Node {
    pub(crate) fn new(key: Arc<Key>) -> Self {
        Self {
            key,
            left: Atomic::null(),
            right: Atomic::null(),
        }
    }

    /// A node adopting existing subtrees, used by deletion's successor
    /// patch.
    pub(crate) fn with_children(
        key: Arc<Key>,
        left: Shared<'_, Node>,
        right: Shared<'_, Node>,
    ) -> Self {
        Self {
            key,
            left: Atomic::from(left),
            right: Atomic::from(right),
        }
    }
}
