//! Reply aggregation completes after every branch answered, in any order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use semcan::core::{PeerHandle, PeerId};
use semcan::messages::{AnycastReply, ReplyPayload, RequestId, RoutingPath};
use semcan::router::{MergeOutcome, ReplyAggregator};
use std::time::Duration;

#[tokio::test]
async fn test_fan_out_completes_after_k_plus_one_merges() {
    let mut rng = StdRng::seed_from_u64(42);
    for k in 1..=8usize {
        for _ in 0..5 {
            let aggregator = ReplyAggregator::new();
            let id = RequestId::new();
            let local = PeerId::new();
            let parent = PeerHandle::new("parent");
            aggregator.register(id, k, RoutingPath::new().with(parent.clone()));
            let local_query = tokio::spawn(async { Ok(ReplyPayload::Count(1)) });
            aggregator.attach_local_query(id, 1, local_query);

            let mut replies: Vec<AnycastReply> = (0..k)
                .map(|hops| {
                    AnycastReply::local(id, PeerId::new(), ReplyPayload::Count(1), hops as u32 + 2)
                })
                .collect();
            replies.shuffle(&mut rng);

            let mut completed = None;
            for (i, reply) in replies.into_iter().enumerate() {
                match aggregator.merge(reply) {
                    MergeOutcome::Awaiting { received, expected } => {
                        assert_eq!(received, i + 1);
                        assert_eq!(expected, k);
                        assert!(i + 1 < k);
                    }
                    MergeOutcome::Complete(entry) => {
                        assert_eq!(i + 1, k);
                        completed = Some(entry);
                    }
                    MergeOutcome::Unknown => panic!("entry vanished before completion"),
                }
            }

            let completed = completed.expect("aggregation did not complete");
            let entry = aggregator.finish(completed, local).await;
            assert_eq!(entry.accumulator.payload, ReplyPayload::Count(k as u64 + 1));
            assert_eq!(entry.accumulator.responders.len(), k + 1);
            assert!(entry.accumulator.responders.contains(&local));
            assert_eq!(entry.accumulator.max_request_hops, k as u32 + 1);
            assert_eq!(entry.return_path.last(), Some(&parent));
            assert_eq!(aggregator.pending_count(), 0);

            // Nothing left to double count.
            assert!(matches!(aggregator.merge(AnycastReply::empty(id)), MergeOutcome::Unknown));
        }
    }
}

#[tokio::test]
async fn test_shortfall_counts_as_a_reply() {
    let aggregator = ReplyAggregator::new();
    let id = RequestId::new();
    aggregator.register(id, 2, RoutingPath::new());
    aggregator.merge(AnycastReply::local(id, PeerId::new(), ReplyPayload::Count(4), 1));
    let MergeOutcome::Complete(entry) = aggregator.merge(AnycastReply::shortfall(id, 1)) else {
        panic!("expected completion")
    };
    assert_eq!(entry.accumulator.missing_branches, 1);
    assert_eq!(entry.accumulator.payload, ReplyPayload::Count(4));
}

#[tokio::test]
async fn test_stale_entries_expire() {
    let aggregator = ReplyAggregator::new();
    aggregator.register(RequestId::new(), 3, RoutingPath::new());
    aggregator.register(RequestId::new(), 1, RoutingPath::new());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(aggregator.expire(Duration::from_millis(10)), 2);
    assert_eq!(aggregator.pending_count(), 0);
}
