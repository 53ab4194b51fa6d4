//! Sub-subscriptions indexed at a peer and the partial solutions they matched.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::core::{quadruple_hash, Binding, Quadruple};
use crate::messages::MatchedSolution;
use crate::pubsub::subscription::{
    AtomicQuery, IndexedSubsubscription, NotificationId, SubscriptionId,
};

/// Sub-subscriptions whose constraint is validated by the local zone.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    entries: DashMap<SubscriptionId, Vec<IndexedSubsubscription>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the same sub-subscription was already indexed.
    pub fn insert(&self, indexed: IndexedSubsubscription) -> bool {
        let mut entry = self.entries.entry(indexed.subsubscription.parent).or_default();
        if entry.iter().any(|known| known.subsubscription.index == indexed.subsubscription.index) {
            return false;
        }
        entry.push(indexed);
        true
    }

    pub fn remove_subscription(&self, id: &SubscriptionId) -> usize {
        self.entries.remove(id).map_or(0, |(_, removed)| removed.len())
    }

    /// Every indexed sub-subscription the quadruple satisfies, with the bindings it produces.
    pub fn matching(&self, quad: &Quadruple) -> Vec<(IndexedSubsubscription, Binding)> {
        self.entries
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter_map(|indexed| {
                        indexed
                            .subsubscription
                            .query
                            .matches(quad)
                            .map(|binding| (indexed.clone(), binding))
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A partial solution kept by the peer that matched it.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    /// Hash of the published quadruple
    pub quadruple_hash: String,
    pub solution: MatchedSolution,
    pub recorded_at: Instant,
}

/// Partial solutions per (notification, sub-subscription index).
#[derive(Debug, Default)]
pub struct MatchStore {
    records: DashMap<(NotificationId, usize), Vec<MatchRecord>>,
}

impl MatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a match. Returns false if this quadruple was already recorded for it.
    pub fn record(
        &self,
        notification: NotificationId,
        index: usize,
        binding: Binding,
        quadruple: Quadruple,
    ) -> bool {
        let hash = quadruple_hash(&quadruple);
        let mut records = self.records.entry((notification, index)).or_default();
        if records.iter().any(|record| record.quadruple_hash == hash) {
            return false;
        }
        records.push(MatchRecord {
            quadruple_hash: hash,
            solution: MatchedSolution { binding, quadruple },
            recorded_at: Instant::now(),
        });
        true
    }

    /// The recorded solutions whose quadruple satisfies `query`.
    pub fn lookup(
        &self,
        notification: &NotificationId,
        index: usize,
        query: &AtomicQuery,
    ) -> Vec<MatchedSolution> {
        let key = (notification.clone(), index);
        self.records
            .get(&key)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| query.matches(&record.solution.quadruple).is_some())
                    .map(|record| record.solution.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove_subscription(&self, id: &SubscriptionId) -> usize {
        let before = self.len();
        self.records.retain(|(notification, _), _| notification.subscription != *id);
        before.saturating_sub(self.len())
    }

    /// Drop records older than `ttl`, returning how many were dropped.
    pub fn expire(&self, ttl: Duration) -> usize {
        let before = self.len();
        self.records.retain(|_, records| {
            records.retain(|record| record.recorded_at.elapsed() < ttl);
            !records.is_empty()
        });
        before.saturating_sub(self.len())
    }

    pub fn len(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
