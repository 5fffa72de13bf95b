//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random sets, snapshots and requests.

use proptest::prelude::*;
use replisync_engine::{SyncOperation, SyncRequest};
use replisync_protocol::{ReplicatedSet, ResolutionStrategy, Snapshot};

/// Strategy for generating valid set ids.
pub fn set_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating set elements.
///
/// The alphabet is small so generated sets overlap often.
pub fn element_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-f]{1,3}").expect("Invalid regex")
}

/// Strategy for generating element lists, duplicates included.
pub fn items_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(element_strategy(), 0..16)
}

/// Strategy for generating replicas of the set `id`.
pub fn replicated_set_strategy(id: &str) -> impl Strategy<Value = ReplicatedSet<String>> {
    let id = id.to_string();
    items_strategy().prop_map(move |items| ReplicatedSet::with_items(id.clone(), items))
}

/// Strategy for generating snapshots, possibly with duplicate elements.
pub fn snapshot_strategy() -> impl Strategy<Value = Snapshot<String>> {
    (set_id_strategy(), items_strategy()).prop_map(|(id, items)| Snapshot::new(id, items))
}

/// Strategy for generating resolution strategies.
pub fn resolution_strategy() -> impl Strategy<Value = ResolutionStrategy> {
    prop_oneof![
        Just(ResolutionStrategy::ClientWins),
        Just(ResolutionStrategy::ServerWins),
        Just(ResolutionStrategy::Merge),
    ]
}

/// Strategy for generating operations.
pub fn operation_strategy() -> impl Strategy<Value = SyncOperation<String>> {
    prop_oneof![
        element_strategy().prop_map(SyncOperation::Add),
        items_strategy().prop_map(SyncOperation::Merge),
        Just(SyncOperation::PullAndResolve),
        Just(SyncOperation::GetItems),
    ]
}

/// Strategy for generating local-only requests against one set.
pub fn local_request_strategy(set_id: &str) -> impl Strategy<Value = SyncRequest<String>> {
    let set_id = set_id.to_string();
    prop_oneof![
        element_strategy().prop_map(SyncOperation::Add),
        items_strategy().prop_map(SyncOperation::Merge),
    ]
    .prop_map(move |operation| SyncRequest::new(set_id.clone(), operation))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_sets_keep_their_id(set in replicated_set_strategy("fixed")) {
            prop_assert_eq!(set.id(), "fixed");
        }

        #[test]
        fn generated_set_ids_are_non_empty(id in set_id_strategy()) {
            prop_assert!(!id.is_empty());
        }

        #[test]
        fn local_requests_stay_local(request in local_request_strategy("s")) {
            prop_assert!(!request.operation.is_remote());
        }
    }
}
