//! Property-based test generators using proptest.
//!
//! Records drawn from these strategies always carry an integer `id` and use
//! small value pools so that identities, unique keys and team keys collide
//! often enough to exercise merges and index moves.

use objcache_codec::{Timestamp, Value};
use objcache_core::{Record, Selector};
use proptest::prelude::*;

/// Names drawn for the `name` field.
pub const NAMES: [&str; 6] = ["ann", "bob", "cy", "dee", "eve", "fay"];

/// Teams drawn for the `team` field.
pub const TEAMS: [&str; 3] = ["red", "blue", "green"];

/// Strategy for small identity values.
pub fn id_strategy(max_id: i64) -> impl Strategy<Value = i64> {
    1..=max_id.max(1)
}

/// Strategy for timestamps within a fixed window.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (1_600_000_000_000i64..1_600_000_100_000).prop_map(|ms| {
        Timestamp::from_millis(ms).expect("Window lies inside the timestamp range")
    })
}

/// Strategy for scalar field values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::Integer),
        "[a-z]{0,6}".prop_map(Value::Text),
        timestamp_strategy().prop_map(Value::Timestamp),
    ]
}

/// Strategy for `users` records with ids in `1..=max_id`.
///
/// `name` and `team` are sometimes absent, so index keys may contain nulls.
pub fn user_record_strategy(max_id: i64) -> impl Strategy<Value = Record> {
    (
        id_strategy(max_id),
        proptest::option::of(proptest::sample::select(NAMES.to_vec())),
        proptest::option::of(proptest::sample::select(TEAMS.to_vec())),
        proptest::option::of(-50i64..50),
        timestamp_strategy(),
    )
        .prop_map(|(id, name, team, score, updated_at)| {
            let mut record = Record::new().with("id", id).with("updatedAt", updated_at);
            if let Some(name) = name {
                record.set("name", name);
            }
            if let Some(team) = team {
                record.set("team", team);
            }
            if let Some(score) = score {
                record.set("score", score);
            }
            record
        })
}

/// Strategy for batches of `users` records.
pub fn user_batch_strategy(max_id: i64, max_len: usize) -> impl Strategy<Value = Vec<Record>> {
    proptest::collection::vec(user_record_strategy(max_id), 0..=max_len)
}

/// Strategy for equality selectors over the `users` fields.
pub fn user_selector_strategy() -> impl Strategy<Value = Selector> {
    (
        proptest::option::of(proptest::sample::select(TEAMS.to_vec())),
        proptest::option::of(proptest::sample::select(NAMES.to_vec())),
    )
        .prop_map(|(team, name)| {
            let mut selector = Selector::default();
            if let Some(team) = team {
                selector = selector.and("team", team);
            }
            if let Some(name) = name {
                selector = selector.and("name", name);
            }
            selector
        })
}
