use std::fmt;

use parking_lot::Mutex;

/// A single sort key and the ordered list of values stored under it.
///
/// Keys compare byte-lexicographically. The value list keeps insertion
/// order and permits duplicate values; every access to the list goes
/// through the key's latch.
///
/// The tree hands out `Arc<Key>` from its read operations, so a record
/// obtained from [`Tree::get`](crate::Tree::get) or a scan stays valid even
/// after the key is structurally deleted from the tree.
pub struct Key {
    bytes: Box<[u8]>,
    values: Mutex<Vec<Vec<u8>>>,
}

impl Key {
    pub(crate) fn new(bytes: &[u8], first_value: &[u8]) -> Self {
        Self {
            bytes: bytes.into(),
            values: Mutex::new(vec![first_value.to_vec()]),
        }
    }

    /// The sort key.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A snapshot of the value list, taken under the latch.
    pub fn values(&self) -> Vec<Vec<u8>> {
        self.values.lock().clone()
    }

    /// Appends `value` to the end of the value list.
    pub(crate) fn append(&self, value: &[u8]) {
        self.values.lock().push(value.to_vec());
    }

    /// Removes the first value equal to `value` by byte content, keeping
    /// the relative order of the remainder. No-op when nothing matches.
    pub(crate) fn remove_value(&self, value: &[u8]) {
        let mut values = self.values.lock();

        if let Some(index) = values.iter().position(|v| v == value) {
            values.remove(index);
        }
    }
}

impl fmt::Debug for Key {
    #[cfg_attr(coverage_nightly, coverage(off))]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("k", &hex::encode(&self.bytes))
            .field(
                "values",
                &self.values.lock().iter().map(hex::encode).collect::<Vec<_>>(),
            )
            .finish()
    }
}
