//! Messages exchanged between peers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::core::{Binding, Node, PeerHandle, PeerId, Quadruple, QuadruplePattern};
use crate::pubsub::subscription::{
    AtomicQuery, IndexedSubsubscription, NotificationId, SubscriptionId,
};
use crate::validator::Constraint;

/// 128-bit identifier of an anycast request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Peers a request went through, used to route replies back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPath(Vec<PeerHandle>);

impl RoutingPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// The path extended with one more hop.
    pub fn with(&self, peer: PeerHandle) -> RoutingPath {
        let mut hops = self.0.clone();
        hops.push(peer);
        RoutingPath(hops)
    }

    /// The peer a reply must be sent to.
    pub fn last(&self) -> Option<&PeerHandle> {
        self.0.last()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.0.iter().any(|hop| hop.id == peer)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What a peer does with a request once its zone validates the constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Return the local quadruples matching the pattern
    Find(QuadruplePattern),
    /// Return the number of quadruples stored locally
    Count,
    /// Store the quadruple and match it against indexed sub-subscriptions
    Publish(Quadruple),
    /// Index a sub-subscription
    IndexSubsubscription(IndexedSubsubscription),
    /// Drop every sub-subscription and match record of a subscription
    RemoveSubscription(SubscriptionId),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Find(_) => "find",
            Operation::Count => "count",
            Operation::Publish(_) => "publish",
            Operation::IndexSubsubscription(_) => "index-subsubscription",
            Operation::RemoveSubscription(_) => "remove-subscription",
        }
    }
}

/// A request routed to every zone validating its constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnycastRequest {
    pub id: RequestId,
    pub constraint: Constraint,
    pub operation: Operation,
    pub path: RoutingPath,
    pub hops: u32,
}

impl AnycastRequest {
    pub fn new(constraint: Constraint, operation: Operation) -> Self {
        Self { id: RequestId::new(), constraint, operation, path: RoutingPath::new(), hops: 0 }
    }

    /// The copy sent to the next peer.
    pub fn forwarded_by(&self, peer: &PeerHandle) -> AnycastRequest {
        AnycastRequest {
            id: self.id,
            constraint: self.constraint.clone(),
            operation: self.operation.clone(),
            path: self.path.with(peer.clone()),
            hops: self.hops + 1,
        }
    }
}

/// Result data carried by replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyPayload {
    #[default]
    Empty,
    Quadruples(Vec<Quadruple>),
    Count(u64),
}

impl ReplyPayload {
    /// Combine two payloads. `Empty` is the identity.
    pub fn merge(self, other: ReplyPayload) -> ReplyPayload {
        match (self, other) {
            (ReplyPayload::Empty, other) => other,
            (current, ReplyPayload::Empty) => current,
            (ReplyPayload::Quadruples(mut a), ReplyPayload::Quadruples(b)) => {
                a.extend(b);
                ReplyPayload::Quadruples(a)
            }
            (ReplyPayload::Count(a), ReplyPayload::Count(b)) => ReplyPayload::Count(a + b),
            (current, other) => {
                tracing::warn!(?current, ?other, "Dropping reply payload of a different kind");
                current
            }
        }
    }

    pub fn quadruples(&self) -> &[Quadruple] {
        match self {
            ReplyPayload::Quadruples(quads) => quads,
            _ => &[],
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            ReplyPayload::Count(count) => *count,
            _ => 0,
        }
    }
}

/// A (partially) aggregated reply to an anycast request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnycastReply {
    pub request: RequestId,
    pub payload: ReplyPayload,
    /// Peers whose local result is included
    pub responders: BTreeSet<PeerId>,
    /// Largest hop count the request reached in this subtree
    pub max_request_hops: u32,
    /// Branches whose reply will never arrive
    pub missing_branches: usize,
}

impl AnycastReply {
    pub fn empty(request: RequestId) -> Self {
        Self {
            request,
            payload: ReplyPayload::Empty,
            responders: BTreeSet::new(),
            max_request_hops: 0,
            missing_branches: 0,
        }
    }

    /// The local result of one peer.
    pub fn local(request: RequestId, responder: PeerId, payload: ReplyPayload, hops: u32) -> Self {
        Self {
            request,
            payload,
            responders: BTreeSet::from([responder]),
            max_request_hops: hops,
            missing_branches: 0,
        }
    }

    /// A reply standing in for branches that could not be reached.
    pub fn shortfall(request: RequestId, missing: usize) -> Self {
        Self { missing_branches: missing, ..Self::empty(request) }
    }

    pub fn merge(&mut self, other: AnycastReply) {
        let payload = std::mem::take(&mut self.payload);
        self.payload = payload.merge(other.payload);
        self.responders.extend(other.responders);
        self.max_request_hops = self.max_request_hops.max(other.max_request_hops);
        self.missing_branches += other.missing_branches;
    }
}

/// A partial solution persisted by a peer that matched a sub-subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchedSolution {
    pub binding: Binding,
    pub quadruple: Quadruple,
}

/// Everything that travels between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Request(AnycastRequest),
    Reply(AnycastReply),
    /// A holder matched sub-subscription `index` for a notification instance
    MatchSignal { notification: NotificationId, index: usize, graph: Node, holder: PeerHandle },
    /// Ask a holder for the solutions it persisted
    RetrieveSubSolution {
        notification: NotificationId,
        index: usize,
        query: AtomicQuery,
        requester: PeerHandle,
    },
    SubSolution {
        notification: NotificationId,
        index: usize,
        holder: PeerHandle,
        solutions: Vec<MatchedSolution>,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Reply(_) => "reply",
            Message::MatchSignal { .. } => "match-signal",
            Message::RetrieveSubSolution { .. } => "retrieve-sub-solution",
            Message::SubSolution { .. } => "sub-solution",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_merge_rules() {
        assert_eq!(ReplyPayload::Empty.merge(ReplyPayload::Count(2)), ReplyPayload::Count(2));
        assert_eq!(ReplyPayload::Count(2).merge(ReplyPayload::Count(3)), ReplyPayload::Count(5));
        let quad = Quadruple::new(
            Node::iri("http://g"),
            Node::iri("http://s"),
            Node::iri("http://p"),
            Node::literal("o"),
        );
        let merged = ReplyPayload::Quadruples(vec![quad.clone()])
            .merge(ReplyPayload::Empty)
            .merge(ReplyPayload::Quadruples(vec![quad]));
        assert_eq!(merged.quadruples().len(), 2);
    }

    #[test]
    fn test_reply_merge_tracks_metadata() {
        let id = RequestId::new();
        let a = PeerId::new();
        let b = PeerId::new();
        let mut reply = AnycastReply::local(id, a, ReplyPayload::Count(1), 2);
        reply.merge(AnycastReply::local(id, b, ReplyPayload::Count(4), 5));
        reply.merge(AnycastReply::shortfall(id, 1));
        assert_eq!(reply.payload.count(), 5);
        assert_eq!(reply.responders.len(), 2);
        assert_eq!(reply.max_request_hops, 5);
        assert_eq!(reply.missing_branches, 1);
    }

    #[test]
    fn test_forwarding_appends_to_path() {
        let request = AnycastRequest::new(Constraint::everywhere(), Operation::Count);
        let me = PeerHandle::new("me");
        let forwarded = request.forwarded_by(&me);
        assert_eq!(forwarded.id, request.id);
        assert_eq!(forwarded.hops, 1);
        assert_eq!(forwarded.path.last(), Some(&me));
        assert!(request.path.is_empty());
    }
}
