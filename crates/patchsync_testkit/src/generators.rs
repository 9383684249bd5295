//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use patchsync_protocol::{apply_operation, JsonPath, Operation, Sequence, UpdateBatch};
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Keys are drawn from a small alphabet so generated operations collide often.
const KEYS: &[&str] = &["a", "b", "c", "d"];

/// Strategy for generating object keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(KEYS).prop_map(str::to_string)
}

/// Strategy for generating scalar JSON values.
pub fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| Value::from(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ]
}

/// Strategy for generating small nested JSON values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_strategy().prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(key_strategy(), inner, 0..4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Strategy for generating object paths one to three keys deep.
pub fn path_strategy() -> impl Strategy<Value = JsonPath> {
    prop::collection::vec(key_strategy(), 1..=3).prop_map(JsonPath::new)
}

/// Strategy for generating operations. They may or may not apply to a
/// given tree.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (path_strategy(), value_strategy()).prop_map(|(path, value)| Operation::add(path, value)),
        (path_strategy(), value_strategy())
            .prop_map(|(path, value)| Operation::replace(path, value)),
        path_strategy().prop_map(Operation::remove),
    ]
}

/// Turns raw operation lists into a valid chain of durable batches.
///
/// Operations that would fail against the running tree are dropped, so
/// every returned batch applies cleanly in order. Returns the batches
/// (sequences `start + 1` onward) and the tree after all of them.
pub fn build_chain(
    base: &Value,
    start: Sequence,
    raw: Vec<Vec<Operation>>,
) -> (Vec<UpdateBatch>, Value) {
    let mut tree = base.clone();
    let mut batches = Vec::with_capacity(raw.len());

    for (offset, operations) in raw.into_iter().enumerate() {
        let kept: Vec<Operation> = operations
            .into_iter()
            .filter(|op| apply_operation(&mut tree, op).is_ok())
            .collect();
        batches.push(UpdateBatch::durable(start + 1 + offset as Sequence, kept));
    }

    (batches, tree)
}

/// Strategy for generating a valid chain of durable batches over `base`.
///
/// Yields the batches and the tree they converge to.
pub fn batch_chain_strategy(
    base: Value,
    start: Sequence,
    max_batches: usize,
) -> impl Strategy<Value = (Vec<UpdateBatch>, Value)> {
    prop::collection::vec(
        prop::collection::vec(operation_strategy(), 0..4),
        0..=max_batches,
    )
    .prop_map(move |raw| build_chain(&base, start, raw))
}

/// Strategy for generating an object tree to start from.
pub fn tree_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 0..4)
        .prop_map(|entries| Value::Object(entries.into_iter().collect()))
}
