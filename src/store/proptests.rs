//! Property-based tests for the conversation store
//!
//! These tests verify the merge invariants hold across arbitrary batches.

use super::*;
use crate::runtime::testing::InMemoryStorage;
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

const CONV: &str = "conv-prop";

fn fresh() -> ConversationStore {
    ConversationStore::new(CONV, Arc::new(InMemoryStorage::new()))
}

fn sorted_ids(store: &ConversationStore) -> Vec<String> {
    let mut ids: Vec<String> = store.snapshot().into_iter().map(|m| m.id).collect();
    ids.sort();
    ids
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_timestamp() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        4 => (1u32..10_000).prop_map(|t| Some(f64::from(t) / 10.0)),
        1 => Just(None),
    ]
}

fn arb_text_message() -> impl Strategy<Value = Message> {
    ("m[0-9]{1,2}", "[a-z ]{0,12}", arb_timestamp()).prop_map(|(id, content, ts)| {
        let mut message = Message::text(CONV, "rin", content).with_id(id);
        message.timestamp = ts;
        message
    })
}

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        4 => arb_text_message(),
        1 => ("r[0-9]{1,2}", "m[0-9]{1,2}", 1u32..10_000).prop_map(|(id, target, t)| {
            Message::recall(id, CONV, "rin", &target, f64::from(t) / 10.0)
        }),
    ]
}

/// A batch with unique ids; same-id overwrites inside one batch are covered
/// by the unit tests
fn arb_batch() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(arb_message(), 0..20).prop_map(|messages| {
        let mut seen = std::collections::HashSet::new();
        messages
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect()
    })
}

/// Batches whose ids never collide across the two halves
fn arb_disjoint_batches() -> impl Strategy<Value = (Vec<Message>, Vec<Message>)> {
    (arb_batch(), arb_batch()).prop_map(|(left, right)| {
        let tag = |prefix: &'static str| {
            move |mut m: Message| {
                m.id = format!("{prefix}{}", m.id);
                m
            }
        };
        (
            left.into_iter().filter(|m| !m.is_recall()).map(tag("a-")).collect(),
            right.into_iter().filter(|m| !m.is_recall()).map(tag("b-")).collect(),
        )
    })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Merging the same batch twice leaves the store as it was after once
    #[test]
    fn merge_is_idempotent(batch in arb_batch()) {
        let mut store = fresh();
        store.merge(CONV, batch.clone());
        let once = store.snapshot();
        let cursor = store.sync_cursor();

        let outcome = store.merge(CONV, batch);
        prop_assert!(!outcome.changed);
        prop_assert_eq!(store.snapshot(), once);
        prop_assert!((store.sync_cursor() - cursor).abs() < f64::EPSILON);
    }

    /// Disjoint batches reach the same set in either order
    #[test]
    fn disjoint_merges_commute((left, right) in arb_disjoint_batches()) {
        let mut forward = fresh();
        forward.merge(CONV, left.clone());
        forward.merge(CONV, right.clone());

        let mut backward = fresh();
        backward.merge(CONV, right);
        backward.merge(CONV, left);

        prop_assert_eq!(sorted_ids(&forward), sorted_ids(&backward));
        prop_assert!((forward.sync_cursor() - backward.sync_cursor()).abs() < f64::EPSILON);
    }

    /// Splitting a batch into fragments does not change the resulting set
    #[test]
    fn fragmentation_is_invisible(batch in arb_batch(), split in 0usize..20) {
        let split = split.min(batch.len());
        let mut whole = fresh();
        whole.merge(CONV, batch.clone());

        let mut pieces = fresh();
        let (head, tail) = batch.split_at(split);
        pieces.merge(CONV, head.to_vec());
        pieces.merge(CONV, tail.to_vec());

        prop_assert_eq!(whole.snapshot(), pieces.snapshot());
    }

    /// The sync cursor never decreases, whatever arrives
    #[test]
    fn sync_cursor_is_monotonic(batches in prop::collection::vec(arb_batch(), 1..6)) {
        let mut store = fresh();
        let mut last = store.sync_cursor();
        for batch in batches {
            store.merge(CONV, batch);
            prop_assert!(store.sync_cursor() >= last);
            last = store.sync_cursor();
        }
    }

    /// Re-delivering dated ids with different timestamps leaves the cursor
    /// at the highest timestamp seen on first arrival
    #[test]
    fn redelivery_of_dated_ids_holds_cursor(batch in arb_batch(), shift in -500i32..500) {
        let dated: Vec<Message> = batch
            .into_iter()
            .filter(|m| m.finite_timestamp().is_some())
            .collect();
        let first_seen_max = dated
            .iter()
            .filter_map(Message::finite_timestamp)
            .fold(0.0, f64::max);

        let mut store = fresh();
        store.merge(CONV, dated.clone());
        let shifted: Vec<Message> = dated
            .into_iter()
            .map(|mut m| {
                m.timestamp = m.timestamp.map(|ts| ts + f64::from(shift));
                m
            })
            .collect();
        store.merge(CONV, shifted);

        prop_assert!((store.sync_cursor() - first_seen_max).abs() < f64::EPSILON);
    }

    /// Every present target of a seen tombstone is marked recalled,
    /// regardless of arrival order
    #[test]
    fn recalls_resolve_in_any_order(batch in arb_batch()) {
        let mut store = fresh();
        let mut reversed = batch.clone();
        reversed.reverse();
        for message in reversed {
            store.merge(CONV, vec![message]);
        }

        for tombstone in batch.iter().filter(|m| m.is_recall()) {
            if let Some(target) = tombstone.recall_target() {
                if let Some(message) = store.get(target) {
                    prop_assert!(message.is_recalled);
                }
            }
        }
    }

    /// Display order is ascending by timestamp
    #[test]
    fn snapshot_is_sorted(batch in arb_batch()) {
        let mut store = fresh();
        store.merge(CONV, batch);
        let keys: Vec<f64> = store.snapshot().iter().map(Message::sort_key).collect();
        prop_assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }
}
