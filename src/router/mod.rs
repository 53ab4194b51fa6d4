//! Anycast routing and reply aggregation.

pub mod aggregator;
pub mod anycast;

pub use aggregator::{AggregationStatus, MergeOutcome, PendingReplyEntry, ReplyAggregator};
pub use anycast::{AnycastRouter, RoutingDecision, SeenRequests};
