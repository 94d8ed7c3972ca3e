use std::{
    cmp::Ordering,
    sync::{atomic::Ordering as AtomicOrdering, Arc},
};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use log::trace;
use parking_lot::RwLock;

use crate::{key::Key, node::Node};

/// Which child slot a node was reached through, for the diagnostic dump.
#[derive(Clone, Copy)]
enum Position {
    Left,
    Right,
    Root,
}

/// An in-memory binary search tree mapping byte-string keys to ordered
/// lists of byte-string values, safe for access from any number of threads.
///
/// Keys are unique and ordered byte-lexicographically; putting an existing
/// key appends to its value list instead of creating a second node. The
/// tree is intentionally unbalanced: no rebalancing happens, so sorted-order
/// insertion degrades to a linked list with O(n) operations.
///
/// # Concurrency
///
/// * [`put`](Tree::put) installs nodes with compare-and-swap on the child
///   slots and holds the shared side of the structure latch. Concurrent
///   puts never block each other; contention for one empty slot is settled
///   by CAS retry.
/// * [`get`](Tree::get), the scans and [`remove`](Tree::remove) take no
///   lock at all. Every traversal pins an epoch guard, and deletion retires
///   unlinked nodes through the epoch collector, so readers can never
///   dereference freed memory. A scan that overlaps a delete may observe a
///   mid-rebuild snapshot, which is the documented contract: results
///   reflect a possibly-changing snapshot taken node by node.
/// * [`delete`](Tree::delete) holds the exclusive side of the structure
///   latch: it is serialized against puts and other deletes, never against
///   readers.
pub struct Tree {
    root: Atomic<Node>,

    /// Structure latch. Put holds the shared side, delete the exclusive
    /// side; point and range reads bypass it entirely.
    latch: RwLock<()>,
}

impl Tree {
    pub fn new() -> Self {
        Self {
            root: Atomic::null(),
            latch: RwLock::new(()),
        }
    }

    /// Ensures a key equal to `key` exists and appends `value` to its value
    /// list.
    ///
    /// Racing inserts of the same new key are settled by CAS, with the
    /// loser continuing into the node the winner installed; appends to an
    /// existing key serialize only on that key's latch, never on the tree
    /// structure.
    pub fn put(&self, key: &[u8], value: &[u8]) {
        let _structure = self.latch.read();
        let guard = epoch::pin();

        // Allocated the first time an empty slot is seen, reused across CAS
        // retries, dropped unused when the key turns out to exist already.
        let mut spare: Option<Owned<Node>> = None;
        let mut slot = &self.root;

        loop {
            let current = slot.load(AtomicOrdering::Acquire, &guard);

            // SAFETY: nodes are retired only through the epoch collector;
            // the pin above keeps every reachable node alive.
            match unsafe { current.as_ref() } {
                None => {
                    let node = spare.take().unwrap_or_else(|| {
                        Owned::new(Node::new(Arc::new(Key::new(key, value))))
                    });

                    match slot.compare_exchange(
                        Shared::null(),
                        node,
                        AtomicOrdering::AcqRel,
                        AtomicOrdering::Acquire,
                        &guard,
                    ) {
                        Ok(_) => return,
                        Err(err) => {
                            // Another writer filled the slot first; keep the
                            // allocation and descend into what it installed.
                            trace!("put: lost a slot race, continuing below the winner");
                            spare = Some(err.new);
                        }
                    }
                }
                Some(node) => match key.cmp(node.key.bytes()) {
                    Ordering::Less => slot = &node.left,
                    Ordering::Greater => slot = &node.right,
                    Ordering::Equal => {
                        node.key.append(value);
                        return;
                    }
                },
            }
        }
    }

    /// Looks up `key`, returning its [`Key`] record if present.
    ///
    /// Lock-free. The returned record is shared: it stays valid (and keeps
    /// reflecting value-list updates) even if the key is deleted from the
    /// tree afterwards.
    pub fn get(&self, key: &[u8]) -> Option<Arc<Key>> {
        let guard = epoch::pin();
        let mut current = self.root.load(AtomicOrdering::Acquire, &guard);

        // SAFETY: the pinned guard keeps every reachable node alive.
        while let Some(node) = unsafe { current.as_ref() } {
            current = match key.cmp(node.key.bytes()) {
                Ordering::Less => node.left.load(AtomicOrdering::Acquire, &guard),
                Ordering::Greater => node.right.load(AtomicOrdering::Acquire, &guard),
                Ordering::Equal => return Some(Arc::clone(&node.key)),
            };
        }

        None
    }

    /// Removes the first value equal to `value` from `key`'s value list,
    /// preserving the order of the remainder. No-op when the key or the
    /// value is absent.
    pub fn remove(&self, key: &[u8], value: &[u8]) {
        if let Some(found) = self.get(key) {
            found.remove_value(value);
        }
    }

    /// Unlinks `key` and its whole value list from the tree. No-op when
    /// absent.
    ///
    /// Holds the exclusive side of the structure latch for the duration, so
    /// deletes are serialized against puts and against each other. Readers
    /// are not excluded: unlinked nodes are handed to the epoch collector
    /// and freed only once no pinned traversal can still reach them, and
    /// caller-held [`Key`] records survive independently via `Arc`.
    pub fn delete(&self, key: &[u8]) {
        let _structure = self.latch.write();
        let guard = epoch::pin();

        let root = self.root.load(AtomicOrdering::Acquire, &guard);
        let replacement = Self::delete_rec(root, key, &guard);
        self.root.store(replacement, AtomicOrdering::Release);
    }

    /// Rebuilds the subtree rooted at `node` without `key` and returns the
    /// replacement subtree root. Caller must hold the exclusive latch.
    fn delete_rec<'g>(node: Shared<'g, Node>, key: &[u8], guard: &'g Guard) -> Shared<'g, Node> {
        // SAFETY: reachable nodes stay alive while the guard is pinned.
        let Some(n) = (unsafe { node.as_ref() }) else {
            return Shared::null();
        };

        match key.cmp(n.key.bytes()) {
            Ordering::Less => {
                let left = n.left.load(AtomicOrdering::Acquire, guard);
                n.left.store(Self::delete_rec(left, key, guard), AtomicOrdering::Release);
                node
            }
            Ordering::Greater => {
                let right = n.right.load(AtomicOrdering::Acquire, guard);
                n.right.store(Self::delete_rec(right, key, guard), AtomicOrdering::Release);
                node
            }
            Ordering::Equal => {
                let left = n.left.load(AtomicOrdering::Acquire, guard);
                let right = n.right.load(AtomicOrdering::Acquire, guard);

                let replacement = if left.is_null() {
                    right
                } else if right.is_null() {
                    left
                } else {
                    // Two children: splice in the in-order successor, the
                    // smallest key of the right subtree. The replacement
                    // node adopts the successor's Key record (identity, not
                    // a byte copy) and the target's subtrees; node fields
                    // other than the child slots never change in place, so
                    // lock-free readers cannot race a field overwrite.
                    //
                    // SAFETY: non-null, checked above.
                    let successor = Self::min_node(unsafe { right.deref() }, guard);
                    let successor_key = Arc::clone(&successor.key);
                    let new_right = Self::delete_rec(right, successor_key.bytes(), guard);

                    Owned::new(Node::with_children(successor_key, left, new_right))
                        .into_shared(guard)
                };

                trace!("delete: retiring node for {}", hex::encode(key));

                // SAFETY: the node is unlinked under the exclusive latch and
                // destruction is deferred until no pinned reader remains.
                unsafe { guard.defer_destroy(node) };

                replacement
            }
        }
    }

    /// Leftmost node of the subtree rooted at `node`, the holder of its
    /// smallest key.
    fn min_node<'g>(node: &'g Node, guard: &'g Guard) -> &'g Node {
        let mut current = node;

        loop {
            let left = current.left.load(AtomicOrdering::Acquire, guard);

            // SAFETY: reachable nodes stay alive while the guard is pinned.
            match unsafe { left.as_ref() } {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    /// All keys in `[lo, hi]`, both bounds inclusive, in ascending order.
    /// An empty result is a valid outcome, not an error.
    pub fn range(&self, lo: &[u8], hi: &[u8]) -> Vec<Arc<Key>> {
        let guard = epoch::pin();
        let mut out = Vec::new();

        Self::range_rec(
            self.root.load(AtomicOrdering::Acquire, &guard),
            lo,
            hi,
            &guard,
            &mut out,
        );

        out
    }

    fn range_rec<'g>(
        node: Shared<'g, Node>,
        lo: &[u8],
        hi: &[u8],
        guard: &'g Guard,
        out: &mut Vec<Arc<Key>>,
    ) {
        // SAFETY: reachable nodes stay alive while the guard is pinned.
        let Some(n) = (unsafe { node.as_ref() }) else {
            return;
        };
        let key = n.key.bytes();

        // Subtrees that cannot overlap [lo, hi] are pruned.
        if key > lo {
            Self::range_rec(n.left.load(AtomicOrdering::Acquire, guard), lo, hi, guard, out);
        }
        if key >= lo && key <= hi {
            out.push(Arc::clone(&n.key));
        }
        if key < hi {
            Self::range_rec(n.right.load(AtomicOrdering::Acquire, guard), lo, hi, guard, out);
        }
    }

    /// All keys strictly greater than `key`, ascending.
    pub fn greater_than(&self, key: &[u8]) -> Vec<Arc<Key>> {
        self.filter_in_order(|k| k > key)
    }

    /// All keys greater than or equal to `key`, ascending.
    pub fn greater_than_eq(&self, key: &[u8]) -> Vec<Arc<Key>> {
        self.filter_in_order(|k| k >= key)
    }

    /// All keys strictly less than `key`, ascending.
    pub fn less_than(&self, key: &[u8]) -> Vec<Arc<Key>> {
        self.filter_in_order(|k| k < key)
    }

    /// All keys less than or equal to `key`, ascending.
    pub fn less_than_eq(&self, key: &[u8]) -> Vec<Arc<Key>> {
        self.filter_in_order(|k| k <= key)
    }

    /// All keys except `key`, ascending.
    pub fn nget(&self, key: &[u8]) -> Vec<Arc<Key>> {
        self.filter_in_order(|k| k != key)
    }

    /// In-order walk over the whole tree collecting the keys `keep`
    /// accepts. Emission is left, node, right, so the output is ascending
    /// without a sort step.
    fn filter_in_order(&self, keep: impl Fn(&[u8]) -> bool) -> Vec<Arc<Key>> {
        let guard = epoch::pin();
        let mut out = Vec::new();

        Self::filter_rec(
            self.root.load(AtomicOrdering::Acquire, &guard),
            &keep,
            &guard,
            &mut out,
        );

        out
    }

    fn filter_rec<'g, F: Fn(&[u8]) -> bool>(
        node: Shared<'g, Node>,
        keep: &F,
        guard: &'g Guard,
        out: &mut Vec<Arc<Key>>,
    ) {
        // SAFETY: reachable nodes stay alive while the guard is pinned.
        let Some(n) = (unsafe { node.as_ref() }) else {
            return;
        };

        Self::filter_rec(n.left.load(AtomicOrdering::Acquire, guard), keep, guard, out);
        if keep(n.key.bytes()) {
            out.push(Arc::clone(&n.key));
        }
        Self::filter_rec(n.right.load(AtomicOrdering::Acquire, guard), keep, guard, out);
    }

    /// Diagnostic in-order dump to stdout, tagging each key with the child
    /// slot it hangs off.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn print(&self) {
        let guard = epoch::pin();
        Self::print_rec(
            self.root.load(AtomicOrdering::Acquire, &guard),
            Position::Root,
            &guard,
        );
    }

    #[cfg_attr(coverage_nightly, coverage(off))]
    fn print_rec<'g>(node: Shared<'g, Node>, position: Position, guard: &'g Guard) {
        // SAFETY: reachable nodes stay alive while the guard is pinned.
        let Some(n) = (unsafe { node.as_ref() }) else {
            return;
        };

        Self::print_rec(n.left.load(AtomicOrdering::Acquire, guard), Position::Left, guard);

        let key = String::from_utf8_lossy(n.key.bytes());
        match position {
            Position::Left => println!("L: {key}"),
            Position::Right => println!("R: {key}"),
            Position::Root => println!("ROOT: {key}"),
        }

        Self::print_rec(n.right.load(AtomicOrdering::Acquire, guard), Position::Right, guard);
    }

    /// Frees the whole subtree rooted at `node`.
    ///
    /// # Safety
    ///
    /// Every node in the subtree must be exclusively owned by this walk; no
    /// other thread may be traversing it.
    unsafe fn drop_subtree(node: Shared<'_, Node>, guard: &Guard) {
        if let Some(n) = node.as_ref() {
            Self::drop_subtree(n.left.load(AtomicOrdering::Relaxed, guard), guard);
            Self::drop_subtree(n.right.load(AtomicOrdering::Relaxed, guard), guard);
            drop(node.into_owned());
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        // `&mut self` rules out concurrent operations, and nodes already
        // retired by deletes belong to the epoch collector, so this walk
        // frees every still-linked node exactly once.
        let guard = unsafe { epoch::unprotected() };
        unsafe { Self::drop_subtree(self.root.load(AtomicOrdering::Relaxed, guard), guard) };
    }
}
