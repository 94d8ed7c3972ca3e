use itertools::Itertools;
use proptest::{
    collection::{hash_set, vec},
    prelude::*,
    sample::SizeRange,
};

/// Strategy over single keys: short byte strings from a small alphabet, so
/// that equal keys (multi-value paths) and shared prefixes both come up
/// often.
pub fn key() -> impl Strategy<Value = Vec<u8>> {
    vec(0u8..4, 1..6)
}

/// Strategy over single values.
pub fn value() -> impl Strategy<Value = Vec<u8>> {
    vec(any::<u8>(), 0..12)
}

/// Strategy over value lists.
pub fn values(size: impl Into<SizeRange>) -> impl Strategy<Value = Vec<Vec<u8>>> {
    vec(value(), size)
}

/// Strategy over (key, value) entry lists, with repeated keys likely.
pub fn entries(size: impl Into<SizeRange>) -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>)>> {
    vec((key(), value()), size)
}

/// Strategy over lists of distinct keys. Order follows the backing hash
/// set's iteration order, not the key order; sort in the test when the
/// expectation needs it.
pub fn distinct_keys(size: impl Into<SizeRange>) -> impl Strategy<Value = Vec<Vec<u8>>> {
    hash_set(key(), size).prop_map(|keys| keys.into_iter().collect_vec())
}
