//! Convergence properties: any valid chain of revisions lands on the same
//! tree a fresh dump would produce, and speculative patches never leak into
//! the confirmed state once resolved.

use patchsync_client::PatchLog;
use patchsync_protocol::{Dump, Operation};
use patchsync_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replayed_chain_matches_dump(
        (base, (batches, expected)) in tree_strategy()
            .prop_flat_map(|base| (Just(base.clone()), batch_chain_strategy(base, 3, 8)))
    ) {
        let log = PatchLog::from_dump(Dump::new(base, 3));
        let count = batches.len() as u64;
        for batch in batches {
            prop_assert!(log.apply_batch(batch).is_ok());
        }

        let dumped = PatchLog::from_dump(Dump::new(expected, 3 + count));
        prop_assert_eq!(log.sequence(), dumped.sequence());
        prop_assert_eq!(log.snapshot().tree, dumped.snapshot().tree);
    }

    #[test]
    fn retracted_speculation_leaves_confirmed_tree(
        base in tree_strategy(),
        speculative in prop::collection::vec(operation_strategy(), 1..4),
    ) {
        let log = PatchLog::from_dump(Dump::new(base.clone(), 1));
        let before = log.snapshot().tree;

        if let Ok(token) = log.apply_speculative(speculative) {
            prop_assert!(log.is_pending(token));
            prop_assert!(log.retract(token));
        }

        prop_assert_eq!(log.snapshot().tree, before);
        prop_assert_eq!(log.sequence(), 1);
        prop_assert!(log.pending_tokens().is_empty());
    }

    #[test]
    fn speculation_survives_unrelated_revisions(
        (base, (batches, expected)) in tree_strategy()
            .prop_flat_map(|base| (Just(base.clone()), batch_chain_strategy(base, 0, 4)))
    ) {
        // A speculative write under a key the generators never produce
        // cannot conflict with any durable batch.
        let log = PatchLog::from_dump(Dump::new(base, 0));
        let marker = patchsync_protocol::JsonPath::new(["pending-marker"]);
        let token = log
            .apply_speculative(vec![Operation::add(marker.clone(), true)])
            .unwrap();

        for batch in batches {
            log.apply_batch(batch).unwrap();
        }
        prop_assert_eq!(log.get(&marker), Some(serde_json::Value::Bool(true)));

        log.retract(token);
        let snapshot = log.snapshot();
        prop_assert_eq!(snapshot.tree.as_ref(), &expected);
    }
}
