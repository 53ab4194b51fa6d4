//! Per-peer aggregation of anycast replies.
//!
//! Every peer that forwards or fans out a request keeps one
//! [`PendingReplyEntry`] for it. Child replies are merged into the entry until
//! the expected count is reached; the background local query started during
//! fan-out is then joined and merged, and the result travels one hop back
//! along the routing path (or wakes the initiator).

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::core::PeerId;
use crate::messages::{AnycastReply, ReplyPayload, RequestId, RoutingPath};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStatus {
    Awaiting,
    AllResponsesReceived,
}

/// Aggregation state of one request at one peer.
#[derive(Debug, Clone)]
pub struct PendingReplyEntry {
    pub request: RequestId,
    pub expected: usize,
    pub received: usize,
    pub accumulator: AnycastReply,
    /// Path the merged reply goes back along; empty at the initiator
    pub return_path: RoutingPath,
    pub status: AggregationStatus,
    pub created_at: Instant,
}

impl PendingReplyEntry {
    fn new(request: RequestId, expected: usize, return_path: RoutingPath) -> Self {
        Self {
            request,
            expected,
            received: 0,
            accumulator: AnycastReply::empty(request),
            return_path,
            status: AggregationStatus::Awaiting,
            created_at: Instant::now(),
        }
    }

    fn merge(&mut self, reply: AnycastReply) {
        self.accumulator.merge(reply);
        self.received += 1;
        if self.received >= self.expected {
            self.status = AggregationStatus::AllResponsesReceived;
        }
    }

    pub fn missing(&self) -> usize {
        self.expected.saturating_sub(self.received)
    }
}

#[derive(Debug)]
pub enum MergeOutcome {
    /// More replies are expected.
    Awaiting { received: usize, expected: usize },
    /// The entry was complete and has been removed.
    Complete(PendingReplyEntry),
    /// No entry for the request: it completed, expired or was abandoned.
    Unknown,
}

/// Reply aggregation state of one peer.
#[derive(Debug, Default)]
pub struct ReplyAggregator {
    entries: DashMap<RequestId, PendingReplyEntry>,
    /// Background local queries with the hop count the request had locally
    pending_queries: DashMap<RequestId, (u32, JoinHandle<Result<ReplyPayload>>)>,
    initiators: DashMap<RequestId, oneshot::Sender<AnycastReply>>,
}

impl ReplyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for a request. Must happen before any reply can arrive.
    pub fn register(&self, request: RequestId, expected: usize, return_path: RoutingPath) {
        self.entries.insert(request, PendingReplyEntry::new(request, expected, return_path));
    }

    /// Attach the background local query started for a request.
    pub fn attach_local_query(
        &self,
        request: RequestId,
        hops: u32,
        handle: JoinHandle<Result<ReplyPayload>>,
    ) {
        self.pending_queries.insert(request, (hops, handle));
    }

    pub fn merge(&self, reply: AnycastReply) -> MergeOutcome {
        let request = reply.request;
        let (complete, received, expected) = {
            let Some(mut entry) = self.entries.get_mut(&request) else {
                return MergeOutcome::Unknown;
            };
            entry.merge(reply);
            let complete = entry.status == AggregationStatus::AllResponsesReceived;
            (complete, entry.received, entry.expected)
        };
        if !complete {
            return MergeOutcome::Awaiting { received, expected };
        }
        match self.entries.remove(&request) {
            Some((_, entry)) => MergeOutcome::Complete(entry),
            None => MergeOutcome::Unknown,
        }
    }

    /// Join the background local query of a completed entry, if any, and
    /// produce the reply to send upstream. A failed query counts as empty.
    pub async fn finish(&self, mut entry: PendingReplyEntry, local: PeerId) -> PendingReplyEntry {
        if let Some((_, (hops, handle))) = self.pending_queries.remove(&entry.request) {
            let payload = match handle.await {
                Ok(Ok(payload)) => payload,
                Ok(Err(err)) => {
                    tracing::warn!(request = %entry.request, error = %err, "Local query failed");
                    ReplyPayload::Empty
                }
                Err(err) => {
                    tracing::warn!(
                        request = %entry.request,
                        error = %err,
                        "Local query task aborted"
                    );
                    ReplyPayload::Empty
                }
            };
            entry.accumulator.merge(AnycastReply::local(entry.request, local, payload, hops));
        }
        entry
    }

    /// Register the caller waiting for the final reply of a request it initiated.
    pub fn register_initiator(&self, request: RequestId) -> oneshot::Receiver<AnycastReply> {
        let (sender, receiver) = oneshot::channel();
        self.initiators.insert(request, sender);
        receiver
    }

    /// Hand the final reply to the waiting caller. Returns false if nobody waits anymore.
    pub fn wake_initiator(&self, reply: AnycastReply) -> bool {
        match self.initiators.remove(&reply.request) {
            Some((_, sender)) => sender.send(reply).is_ok(),
            None => false,
        }
    }

    /// Give up on a request, returning whatever was merged so far.
    pub fn abandon(&self, request: &RequestId) -> Option<PendingReplyEntry> {
        self.initiators.remove(request);
        if let Some((_, (_, handle))) = self.pending_queries.remove(request) {
            handle.abort();
        }
        self.entries.remove(request).map(|(_, entry)| entry)
    }

    pub fn is_pending(&self, request: &RequestId) -> bool {
        self.entries.contains_key(request)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Drop entries older than `ttl`, returning how many were dropped.
    pub fn expire(&self, ttl: Duration) -> usize {
        let expired: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|entry| entry.created_at.elapsed() >= ttl)
            .map(|entry| *entry.key())
            .collect();
        expired.iter().filter(|id| self.abandon(id).is_some()).count()
    }
}
