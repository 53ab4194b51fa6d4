//! Routing decisions for anycast requests.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::core::{PeerHandle, PeerId};
use crate::messages::{AnycastRequest, RequestId};
use crate::overlay::{NeighborTable, Zone};
use crate::validator::{routing_hints, validates};

/// What a peer does with a request it has not seen before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// The local zone does not validate: forward to the first reachable candidate.
    Forward { candidates: Vec<PeerHandle> },
    /// The local zone does not validate and no neighbor leads closer.
    Unroutable,
    /// The local zone validates and so do these neighbors: query locally and fan out.
    FanOut { neighbors: Vec<PeerHandle> },
    /// The local zone validates and no other neighbor needs the request.
    Deliver,
}

/// Pure routing logic of one peer.
#[derive(Debug, Clone)]
pub struct AnycastRouter {
    local: PeerId,
}

impl AnycastRouter {
    pub fn new(local: PeerId) -> Self {
        Self { local }
    }

    fn eligible(&self, request: &AnycastRequest, peer: &PeerHandle) -> bool {
        peer.id != self.local && !request.path.contains(peer.id)
    }

    pub fn decide(
        &self,
        zone: &Zone,
        neighbors: &NeighborTable,
        request: &AnycastRequest,
    ) -> RoutingDecision {
        if !validates(zone, &request.constraint) {
            let mut seen = BTreeSet::new();
            let candidates: Vec<PeerHandle> = routing_hints(zone, &request.constraint)
                .into_iter()
                .flat_map(|(dimension, direction)| {
                    neighbors.nearest(dimension, direction, &request.constraint.key)
                })
                .filter(|entry| self.eligible(request, &entry.peer))
                .filter(|entry| seen.insert(entry.peer.id))
                .map(|entry| entry.peer.clone())
                .collect();
            return if candidates.is_empty() {
                RoutingDecision::Unroutable
            } else {
                RoutingDecision::Forward { candidates }
            };
        }

        let mut seen = BTreeSet::new();
        let targets: Vec<PeerHandle> = neighbors
            .iter()
            .map(|(_, _, entry)| entry)
            .filter(|entry| self.eligible(request, &entry.peer))
            .filter(|entry| validates(&entry.zone, &request.constraint))
            .filter(|entry| seen.insert(entry.peer.id))
            .map(|entry| entry.peer.clone())
            .collect();
        if targets.is_empty() {
            RoutingDecision::Deliver
        } else {
            RoutingDecision::FanOut { neighbors: targets }
        }
    }
}

/// Request ids a peer already processed.
#[derive(Debug, Default)]
pub struct SeenRequests {
    seen: DashMap<RequestId, Instant>,
}

impl SeenRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the id. Returns false if it was already present.
    pub fn insert(&self, id: RequestId) -> bool {
        match self.seen.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                true
            }
        }
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.seen.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget ids older than `ttl`, returning how many were dropped.
    pub fn expire(&self, ttl: Duration) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, seen_at| seen_at.elapsed() < ttl);
        before.saturating_sub(self.seen.len())
    }
}
