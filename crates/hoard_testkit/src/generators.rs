//! Property-based test generators using proptest.

use crate::fixtures::Player;
use hoard_storage::{Batch, TableId};
use proptest::prelude::*;

/// Strategy for storage keys.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    prop::collection::vec(any::<u8>(), 1..32)
}

/// Strategy for stored values. Never empty, since empty means delete.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    prop::collection::vec(any::<u8>(), 1..256)
}

/// Strategy for batches over a subset of `tables`.
pub fn batch_strategy(tables: Vec<TableId>) -> impl Strategy<Value = Batch> {
    let entry = (key_strategy(), value_strategy());
    prop::sample::subsequence(tables.clone(), 1..=tables.len().max(1)).prop_flat_map(
        move |chosen| {
            prop::collection::vec(prop::collection::vec(entry.clone(), 1..8), chosen.len())
                .prop_map(move |entries| chosen.iter().copied().zip(entries).collect())
        },
    )
}

/// Strategy for sample players.
pub fn player_strategy() -> impl Strategy<Value = Player> {
    (
        any::<u64>(),
        prop::string::string_regex("[a-z]{1,16}").expect("Invalid regex"),
        1u32..100,
        any::<u64>(),
    )
        .prop_map(|(id, name, level, gold)| Player {
            id,
            name,
            level,
            gold,
        })
}
