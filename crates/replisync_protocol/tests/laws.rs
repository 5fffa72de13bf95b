//! Property tests for replicated set and resolver laws.

use proptest::prelude::*;
use replisync_protocol::{ConflictResolver, ReplicatedSet, ResolutionStrategy, Snapshot};

fn set_strategy() -> impl Strategy<Value = ReplicatedSet<String>> {
    prop::collection::vec("[a-f]{1,3}", 0..12)
        .prop_map(|items| ReplicatedSet::with_items("laws", items))
}

proptest! {
    #[test]
    fn merge_is_commutative(a in set_strategy(), b in set_strategy()) {
        prop_assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn merge_is_associative(a in set_strategy(), b in set_strategy(), c in set_strategy()) {
        prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[test]
    fn merge_is_idempotent(a in set_strategy(), b in set_strategy()) {
        prop_assert_eq!(a.merge(&a), a.clone());
        let once = a.merge(&b);
        prop_assert_eq!(once.merge(&b), once);
    }

    #[test]
    fn snapshot_roundtrip(a in set_strategy()) {
        let json = a.to_json().unwrap();
        prop_assert_eq!(ReplicatedSet::from_json(&json).unwrap(), a.clone());

        let snapshot: Snapshot<String> = a.to_snapshot();
        prop_assert_eq!(ReplicatedSet::from_snapshot(snapshot), a);
    }

    #[test]
    fn winner_strategies_return_one_side(a in set_strategy(), b in set_strategy()) {
        let client = ConflictResolver::new(ResolutionStrategy::ClientWins);
        prop_assert_eq!(client.resolve_sets(&a, &b), a.clone());

        let server = ConflictResolver::new(ResolutionStrategy::ServerWins);
        prop_assert_eq!(server.resolve_sets(&a, &b), b);
    }

    #[test]
    fn merge_strategy_contains_both_and_is_stable(a in set_strategy(), b in set_strategy()) {
        let resolver = ConflictResolver::new(ResolutionStrategy::Merge);
        let first = resolver.resolve_sets(&a, &b);

        prop_assert!(a.is_subset(&first));
        prop_assert!(b.is_subset(&first));
        prop_assert_eq!(resolver.resolve_sets(&a, &b), first);
    }

    #[test]
    fn replicas_converge_under_any_delivery_order(
        items in prop::collection::vec("[a-z]{1,2}", 1..16),
        split in 0usize..16,
    ) {
        let split = split.min(items.len());
        let (left, right) = items.split_at(split);

        let replica_a = left.iter().fold(ReplicatedSet::new("laws"), |s, i| s.add(i.clone()));
        let replica_b = right.iter().rev().fold(ReplicatedSet::new("laws"), |s, i| s.add(i.clone()));

        // Re-deliver b's state twice to simulate at-least-once delivery.
        let a_view = replica_a.merge(&replica_b).merge(&replica_b);
        let b_view = replica_b.merge(&replica_a);

        prop_assert_eq!(&a_view, &b_view);
        prop_assert_eq!(a_view, ReplicatedSet::with_items("laws", items));
    }
}
