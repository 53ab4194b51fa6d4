//! Reassembly of notifications at the peer owning a subscription.
//!
//! Holders of matched sub-subscriptions send a match signal naming the
//! notification instance and the sub-subscription index. Once every index has
//! been signalled, the reconstructor asks each holder for its sub-solutions
//! through graph-bound queries, joins them, and emits notifications for the
//! solutions it has not delivered yet.
//!
//! The reconstructor only computes what should happen; the peer performs the
//! returned [`ReconstructionAction`]s.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::{quadruple_hash, Binding, Node, PeerHandle, PeerId};
use crate::messages::MatchedSolution;
use crate::pubsub::rewriter::SubscriptionRewriter;
use crate::pubsub::subscription::{
    AtomicQuery, Notification, NotificationId, NotificationKind, NotificationPayload, Subscription,
    SubscriptionId,
};
use crate::{Error, Result};

/// Work the peer has to perform after a reconstruction step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconstructionAction {
    /// Ask `holder` for the sub-solutions of `index` matching `query`
    Retrieve { holder: PeerHandle, notification: NotificationId, index: usize, query: AtomicQuery },
    /// Push a notification to the subscriber
    Deliver(Notification),
}

/// Union of partial bindings. A variable bound to two different values makes
/// the solution inconsistent.
pub fn join_bindings<'a>(bindings: impl IntoIterator<Item = &'a Binding>) -> Result<Binding> {
    let mut joined = Binding::new();
    for binding in bindings {
        for (variable, value) in binding {
            match joined.get(variable) {
                Some(existing) if existing != value => {
                    return Err(Error::MalformedSubscription(format!(
                        "variable ?{} bound to both {} and {}",
                        variable, existing, value
                    )));
                }
                Some(_) => {}
                None => {
                    joined.insert(variable.clone(), value.clone());
                }
            }
        }
    }
    Ok(joined)
}

#[derive(Debug)]
struct NotificationState {
    kind: NotificationKind,
    /// Graph-bound query per sub-subscription index
    queries: Vec<AtomicQuery>,
    holders: Vec<Vec<PeerHandle>>,
    solutions: Vec<BTreeMap<PeerId, Vec<MatchedSolution>>>,
    retrieving: bool,
    delivered: HashSet<Vec<String>>,
    signalled: bool,
    created_at: Instant,
}

impl NotificationState {
    fn new(subscription: &Subscription, graph: &Node) -> Result<Self> {
        let mut binding = Binding::new();
        if let Some(variable) = subscription.graph_variable() {
            binding.insert(variable.to_string(), graph.clone());
        }
        let queries = if subscription.patterns.len() == 1 {
            vec![subscription.patterns[0].bind(&binding)]
        } else {
            SubscriptionRewriter::rewrite(subscription, &binding)?
                .into_iter()
                .map(|sub| sub.query)
                .collect()
        };
        let n = queries.len();
        Ok(Self {
            kind: subscription.kind,
            queries,
            holders: vec![Vec::new(); n],
            solutions: vec![BTreeMap::new(); n],
            retrieving: false,
            delivered: HashSet::new(),
            signalled: false,
            created_at: Instant::now(),
        })
    }

    fn all_signalled(&self) -> bool {
        self.holders.iter().all(|holders| !holders.is_empty())
    }

    fn retrieve(
        &self,
        notification: &NotificationId,
        index: usize,
        holder: &PeerHandle,
    ) -> ReconstructionAction {
        ReconstructionAction::Retrieve {
            holder: holder.clone(),
            notification: notification.clone(),
            index,
            query: self.queries[index].clone(),
        }
    }
}

/// Every combination taking one sub-solution per index.
fn combinations(
    solutions: &[BTreeMap<PeerId, Vec<MatchedSolution>>],
) -> Vec<Vec<&MatchedSolution>> {
    let mut combinations: Vec<Vec<&MatchedSolution>> = vec![Vec::new()];
    for per_holder in solutions {
        let candidates: Vec<&MatchedSolution> = per_holder.values().flatten().collect();
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                candidates.iter().map(move |candidate| {
                    let mut next = prefix.clone();
                    next.push(*candidate);
                    next
                })
            })
            .collect();
    }
    combinations
}

/// Notification reconstruction state of one peer.
#[derive(Debug, Default)]
pub struct NotificationReconstructor {
    pending: Mutex<HashMap<NotificationId, NotificationState>>,
}

impl NotificationReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A holder matched sub-subscription `index` of a notification instance.
    pub fn on_signal(
        &self,
        subscription: &Subscription,
        notification: NotificationId,
        index: usize,
        graph: &Node,
        holder: PeerHandle,
    ) -> Result<Vec<ReconstructionAction>> {
        if index >= subscription.patterns.len() {
            return Err(Error::MalformedSubscription(format!(
                "sub-subscription index {} out of range for {}",
                index, subscription.id
            )));
        }
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| Error::Registry("reconstructor lock poisoned".into()))?;
        let state = match pending.entry(notification.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => slot.insert(NotificationState::new(subscription, graph)?),
        };
        if !state.holders[index].iter().any(|known| known.id == holder.id) {
            state.holders[index].push(holder.clone());
        }

        if !state.all_signalled() {
            return Ok(Vec::new());
        }

        if state.kind == NotificationKind::Signal {
            if state.signalled {
                return Ok(Vec::new());
            }
            state.signalled = true;
            return Ok(vec![ReconstructionAction::Deliver(Notification {
                id: notification,
                payload: NotificationPayload::Signal,
            })]);
        }

        if state.retrieving {
            return Ok(vec![state.retrieve(&notification, index, &holder)]);
        }
        state.retrieving = true;
        let mut actions = Vec::new();
        for (i, holders) in state.holders.iter().enumerate() {
            for h in holders {
                actions.push(state.retrieve(&notification, i, h));
            }
        }
        Ok(actions)
    }

    /// A holder answered a retrieval. Replaces what it sent before for `index`.
    pub fn on_sub_solution(
        &self,
        subscription: &Subscription,
        notification: &NotificationId,
        index: usize,
        holder: PeerId,
        solutions: Vec<MatchedSolution>,
    ) -> Vec<ReconstructionAction> {
        let Ok(mut pending) = self.pending.lock() else {
            tracing::error!("Reconstructor lock poisoned");
            return Vec::new();
        };
        let Some(state) = pending.get_mut(notification) else {
            tracing::debug!(%notification, "Sub-solution for unknown or expired notification");
            return Vec::new();
        };
        if index >= state.solutions.len() {
            tracing::warn!(%notification, index, "Sub-solution index out of range");
            return Vec::new();
        }
        state.solutions[index].insert(holder, solutions);

        if state.solutions.iter().any(|per_holder| per_holder.values().all(Vec::is_empty)) {
            return Vec::new();
        }

        let mut fresh = Vec::new();
        for combination in combinations(&state.solutions) {
            let joined = match join_bindings(combination.iter().map(|s| &s.binding)) {
                Ok(joined) => joined,
                Err(err) => {
                    tracing::debug!(
                        %notification,
                        error = %err,
                        "Discarding inconsistent solution"
                    );
                    continue;
                }
            };
            if !subscription.accepts(&joined) {
                continue;
            }
            let mut key: Vec<String> =
                combination.iter().map(|s| quadruple_hash(&s.quadruple)).collect();
            key.sort();
            if !state.delivered.insert(key) {
                continue;
            }
            let payload = match state.kind {
                NotificationKind::Binding => {
                    NotificationPayload::Binding(subscription.project(&joined))
                }
                NotificationKind::CompoundEvent => {
                    let mut quads: Vec<_> =
                        combination.iter().map(|s| s.quadruple.clone()).collect();
                    quads.dedup();
                    NotificationPayload::CompoundEvent(quads)
                }
                NotificationKind::Signal => NotificationPayload::Signal,
            };
            let notification = Notification { id: notification.clone(), payload };
            fresh.push(ReconstructionAction::Deliver(notification));
        }
        fresh
    }

    pub fn forget_subscription(&self, id: &SubscriptionId) -> usize {
        let Ok(mut pending) = self.pending.lock() else {
            return 0;
        };
        let before = pending.len();
        pending.retain(|notification, _| notification.subscription != *id);
        before - pending.len()
    }

    /// Drop notification state older than `ttl`, returning how many were dropped.
    pub fn expire(&self, ttl: Duration) -> usize {
        let Ok(mut pending) = self.pending.lock() else {
            return 0;
        };
        let before = pending.len();
        pending.retain(|_, state| state.created_at.elapsed() < ttl);
        before - pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|pending| pending.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_bindings_union_and_conflict() {
        let a = Binding::from([
            ("id".to_string(), Node::iri("alice")),
            ("name".to_string(), Node::literal("A")),
        ]);
        let b = Binding::from([
            ("id".to_string(), Node::iri("alice")),
            ("mail".to_string(), Node::literal("a@x")),
        ]);
        let joined = join_bindings([&a, &b]).unwrap();
        assert_eq!(joined.len(), 3);

        let c = Binding::from([("id".to_string(), Node::iri("bob"))]);
        assert!(matches!(join_bindings([&a, &c]), Err(Error::MalformedSubscription(_))));
    }

    #[test]
    fn test_signal_kind_delivers_once_without_retrieval() {
        let subscription = Subscription::parse(
            "SELECT * WHERE { GRAPH ?g { ?s <http://ex/p> ?o . ?s <http://ex/q> ?v } }",
            NotificationKind::Signal,
            "test",
        )
        .unwrap();
        let reconstructor = NotificationReconstructor::new();
        let nid = NotificationId::new(subscription.id, "k");
        let graph = Node::iri("http://ex/g");
        let holder = PeerHandle::new("h");

        let first =
            reconstructor.on_signal(&subscription, nid.clone(), 0, &graph, holder.clone()).unwrap();
        assert!(first.is_empty());
        let second =
            reconstructor.on_signal(&subscription, nid.clone(), 1, &graph, holder.clone()).unwrap();
        assert!(matches!(second.as_slice(), [ReconstructionAction::Deliver(_)]));
        let third = reconstructor.on_signal(&subscription, nid, 1, &graph, holder).unwrap();
        assert!(third.is_empty());

        assert_eq!(reconstructor.forget_subscription(&subscription.id), 1);
        assert_eq!(reconstructor.pending_count(), 0);
    }
}
