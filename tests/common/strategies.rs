//! Proptest strategies for key spaces and batch settings.

use proptest::prelude::*;
use std::collections::BTreeSet;

/// (min_value, max_value) with max >= min
pub fn key_bounds_strategy() -> impl Strategy<Value = (i64, i64)> {
    (1i64..10_000, 0i64..50_000).prop_map(|(min, span)| (min, min + span))
}

pub fn batch_size_strategy() -> impl Strategy<Value = i64> {
    1i64..5_000
}

/// Non-empty sparse key set within `1..100_000`
pub fn sparse_keys_strategy() -> impl Strategy<Value = BTreeSet<i64>> {
    prop::collection::btree_set(1i64..100_000, 1..300)
}
