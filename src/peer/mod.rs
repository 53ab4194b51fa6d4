//! The peer service.
//!
//! A [`Peer`] owns one zone of the overlay and its local store. Its service
//! loop decodes the frames arriving in its mailbox and dispatches each message
//! on a bounded pool of tokio tasks. The public methods are the entry points of
//! the operations a peer initiates: publish, subscribe, unsubscribe, find,
//! count and query.

mod handlers;

use dashmap::DashMap;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::PeerConfig;
use crate::core::{
    current_time_millis, decode_message, Binding, PeerHandle, PeerId, Quadruple, QuadruplePattern,
    Triple,
};
use crate::messages::{AnycastReply, AnycastRequest, Operation, ReplyPayload};
use crate::overlay::{Zone, ZoneProvider};
use crate::parsing::{decompose_query, QueryForm};
use crate::pubsub::{
    IndexedSubsubscription, MatchStore, NotificationKind, NotificationReconstructor,
    SubscriberSink, Subscription, SubscriptionId, SubscriptionIndex, SubscriptionRewriter,
};
use crate::querying::{LocalStore, OxigraphStore};
use crate::registry::{SubscriptionRegistry, SubscriptionRegistryConfig};
use crate::router::{AnycastRouter, ReplyAggregator, SeenRequests};
use crate::transport::{Mailbox, Transport};
use crate::validator::Constraint;
use crate::{Error, Result};

/// Final reply of an anycast request as seen by its initiator.
#[derive(Debug, Clone)]
pub struct AnycastResponse {
    pub reply: AnycastReply,
    /// False when the request timed out before every reply arrived
    pub complete: bool,
}

impl AnycastResponse {
    pub fn is_partial(&self) -> bool {
        !self.complete || self.reply.missing_branches > 0
    }

    /// The reply, or [`Error::AggregationTimeout`] if some branch is missing.
    pub fn require_complete(self) -> Result<AnycastReply> {
        if self.is_partial() {
            return Err(Error::AggregationTimeout {
                request: self.reply.request,
                missing: self.reply.missing_branches.max(1),
            });
        }
        Ok(self.reply)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Solutions(Vec<Binding>),
    Boolean(bool),
    Graph(Vec<Triple>),
}

/// Result of a one-shot SPARQL query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub result: QueryResult,
    /// Some zones did not answer in time
    pub partial: bool,
}

pub(crate) struct PeerInner {
    handle: PeerHandle,
    topology: Arc<dyn ZoneProvider>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn LocalStore>,
    config: PeerConfig,
    router: AnycastRouter,
    seen: SeenRequests,
    aggregator: ReplyAggregator,
    subscriptions: SubscriptionIndex,
    matches: MatchStore,
    registry: SubscriptionRegistry,
    reconstructor: NotificationReconstructor,
    sinks: DashMap<SubscriptionId, Arc<dyn SubscriberSink>>,
    workers: Arc<Semaphore>,
}

impl PeerInner {
    fn sweep(&self) {
        let seen = self.seen.expire(self.config.seen_request_ttl());
        let pending = self.aggregator.expire(self.config.pending_entry_ttl());
        let notifications = self.reconstructor.expire(self.config.notification_ttl());
        let matches = self.matches.expire(self.config.notification_ttl());
        if seen + pending + notifications + matches > 0 {
            tracing::debug!(
                peer = %self.handle,
                seen,
                pending,
                notifications,
                matches,
                "Expired peer state"
            );
        }
    }
}

/// A peer of the overlay. Cloning gives another handle to the same peer.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    pub fn new(
        handle: PeerHandle,
        topology: Arc<dyn ZoneProvider>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn LocalStore>,
        config: PeerConfig,
    ) -> Self {
        let registry = SubscriptionRegistry::with_config(SubscriptionRegistryConfig {
            max_subscriptions: config.max_subscriptions,
        });
        let workers = Arc::new(Semaphore::new(config.worker_threads.max(1)));
        Self {
            inner: Arc::new(PeerInner {
                router: AnycastRouter::new(handle.id),
                handle,
                topology,
                transport,
                store,
                config,
                seen: SeenRequests::new(),
                aggregator: ReplyAggregator::new(),
                subscriptions: SubscriptionIndex::new(),
                matches: MatchStore::new(),
                registry,
                reconstructor: NotificationReconstructor::new(),
                sinks: DashMap::new(),
                workers,
            }),
        }
    }

    /// Start the service loop. It runs until the mailbox is closed.
    pub fn spawn(&self, mut mailbox: Mailbox) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(inner.config.sweep_interval());
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(
                peer = %inner.handle,
                zone = %inner.topology.local_zone(),
                "Peer started"
            );
            loop {
                tokio::select! {
                    frame = mailbox.recv() => {
                        let Some(frame) = frame else { break };
                        let message = match decode_message(&frame) {
                            Ok(message) => message,
                            Err(err) => {
                                tracing::warn!(
                                    peer = %inner.handle,
                                    error = %err,
                                    "Dropping undecodable frame"
                                );
                                continue;
                            }
                        };
                        let Ok(permit) = Arc::clone(&inner.workers).acquire_owned().await else {
                            break;
                        };
                        let worker = Arc::clone(&inner);
                        tokio::spawn(async move {
                            let _permit = permit;
                            worker.dispatch(message).await;
                        });
                    }
                    _ = sweep.tick() => inner.sweep(),
                }
            }
            tracing::debug!(peer = %inner.handle, "Peer stopped");
        })
    }

    pub fn handle(&self) -> &PeerHandle {
        &self.inner.handle
    }

    pub fn id(&self) -> PeerId {
        self.inner.handle.id
    }

    pub fn local_zone(&self) -> Zone {
        self.inner.topology.local_zone()
    }

    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    /// Route `operation` to every zone validating `constraint` and wait for the
    /// aggregated reply, at most for the configured request timeout.
    pub async fn anycast(
        &self,
        constraint: Constraint,
        operation: Operation,
    ) -> Result<AnycastResponse> {
        let request = AnycastRequest::new(constraint, operation);
        let id = request.id;
        tracing::debug!(
            peer = %self.inner.handle,
            request = %id,
            operation = request.operation.name(),
            constraint = %request.constraint,
            "Initiating anycast"
        );
        let receiver = self.inner.aggregator.register_initiator(id);
        self.inner.handle_request(request).await;

        match tokio::time::timeout(self.inner.config.request_timeout(), receiver).await {
            Ok(Ok(reply)) => {
                if reply.missing_branches > 0 {
                    tracing::warn!(
                        request = %id,
                        missing = reply.missing_branches,
                        "Anycast completed with unreachable branches"
                    );
                }
                Ok(AnycastResponse { complete: true, reply })
            }
            Ok(Err(_)) => Err(Error::PeerStopped),
            Err(_) => {
                let (reply, missing) = match self.inner.aggregator.abandon(&id) {
                    Some(entry) => {
                        let missing = entry.missing();
                        (entry.accumulator, missing)
                    }
                    None => (AnycastReply::empty(id), 1),
                };
                tracing::warn!(
                    request = %id,
                    missing,
                    "Anycast timed out, returning partial result"
                );
                Ok(AnycastResponse { reply, complete: false })
            }
        }
    }

    /// Store a quadruple at the peer owning its coordinate. Quadruples without
    /// a publication time are stamped with the current time.
    ///
    /// Quadruples RDF does not allow are rejected before routing, and a
    /// store failure at the owner is reported as [`Error::Store`].
    pub async fn publish(&self, quad: Quadruple) -> Result<()> {
        quad.validate()?;
        let quad = match quad.publication_time {
            Some(_) => quad,
            None => quad.with_publication_time(current_time_millis()),
        };
        let constraint = Constraint::key(quad.coordinate());
        let response = self.anycast(constraint, Operation::Publish(quad)).await?;
        if response.is_partial() {
            tracing::warn!(
                request = %response.reply.request,
                "Publication not acknowledged by its owner"
            );
            return Ok(());
        }
        match response.reply.payload {
            ReplyPayload::Count(_) => Ok(()),
            _ => Err(Error::Store(format!(
                "owner of request {} failed to store the quadruple",
                response.reply.request
            ))),
        }
    }

    /// Publish quadruples forming one event: they share one publication time.
    pub async fn publish_batch(&self, quads: Vec<Quadruple>) -> Result<()> {
        let time = current_time_millis();
        let publications = quads.into_iter().map(|quad| {
            let quad = match quad.publication_time {
                Some(_) => quad,
                None => quad.with_publication_time(time),
            };
            self.publish(quad)
        });
        join_all(publications).await.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    /// Register a continuous SPARQL query. This peer reconstructs its
    /// notifications and pushes them to `sink`.
    pub async fn subscribe(
        &self,
        sparql: &str,
        kind: NotificationKind,
        sink: Arc<dyn SubscriberSink>,
    ) -> Result<SubscriptionId> {
        let subscription = Subscription::parse(sparql, kind, sink.endpoint())?;
        let subscription = self.inner.registry.register(subscription)?;
        let id = subscription.id;
        self.inner.sinks.insert(id, sink);

        let subsubscriptions = SubscriptionRewriter::decompose(&subscription);
        let indexing = subsubscriptions.into_iter().map(|subsubscription| {
            let constraint = subsubscription.query.constraint();
            let operation = Operation::IndexSubsubscription(IndexedSubsubscription {
                subsubscription,
                home: self.inner.handle.clone(),
            });
            self.anycast(constraint, operation)
        });
        let mut indexed_at = 0;
        for response in join_all(indexing).await {
            match response {
                Ok(response) => {
                    if response.is_partial() {
                        tracing::warn!(
                            subscription = %id,
                            "Sub-subscription only partially indexed"
                        );
                    }
                    indexed_at += response.reply.payload.count();
                }
                Err(err) => {
                    self.inner.sinks.remove(&id);
                    let _ = self.inner.registry.unregister(&id);
                    return Err(err);
                }
            }
        }
        tracing::info!(
            subscription = %id,
            patterns = subscription.patterns.len(),
            indexed_at,
            "Subscription registered"
        );
        Ok(id)
    }

    /// Stop a subscription. Notifications already on their way may still arrive.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.inner.registry.unregister(&id)?;
        self.inner.sinks.remove(&id);
        self.inner.reconstructor.forget_subscription(&id);
        let response =
            self.anycast(Constraint::everywhere(), Operation::RemoveSubscription(id)).await?;
        if response.is_partial() {
            tracing::warn!(subscription = %id, "Some peers may still hold sub-subscriptions");
        }
        tracing::info!(subscription = %id, "Subscription removed");
        Ok(())
    }

    /// Every stored quadruple matching `pattern`.
    pub async fn find(&self, pattern: QuadruplePattern) -> Result<Vec<Quadruple>> {
        let constraint = Constraint::key(pattern.coordinate());
        let response = self.anycast(constraint, Operation::Find(pattern)).await?;
        if response.is_partial() {
            tracing::warn!(request = %response.reply.request, "Find returned a partial result");
        }
        Ok(response.reply.payload.quadruples().to_vec())
    }

    /// Number of quadruples stored across the overlay.
    pub async fn count_statements(&self) -> Result<u64> {
        let response = self.anycast(Constraint::everywhere(), Operation::Count).await?;
        if response.is_partial() {
            tracing::warn!(request = %response.reply.request, "Count returned a partial result");
        }
        Ok(response.reply.payload.count())
    }

    /// Evaluate a SELECT, ASK or CONSTRUCT query over the whole overlay.
    ///
    /// Each triple pattern is routed separately; the gathered quadruples are
    /// loaded into a scratch store where the query itself is evaluated.
    pub async fn query(&self, sparql: &str) -> Result<QueryResponse> {
        let decomposed = decompose_query(sparql)?;
        if decomposed.unrouted_filters > 0 {
            tracing::debug!(
                unrouted = decomposed.unrouted_filters,
                "Filters not usable for routing, evaluated after gathering"
            );
        }
        let lookups = decomposed
            .atomic_queries
            .iter()
            .map(|atomic| self.anycast(atomic.constraint(), Operation::Find(atomic.pattern())));
        let responses = join_all(lookups).await;

        let scratch = OxigraphStore::with_union_default_graph()?;
        let mut partial = false;
        for response in responses {
            let response = response?;
            partial |= response.is_partial();
            for quad in response.reply.payload.quadruples() {
                scratch.add(quad)?;
            }
        }

        let result = match decomposed.form {
            QueryForm::Select => QueryResult::Solutions(scratch.sparql_select(sparql)?),
            QueryForm::Ask => QueryResult::Boolean(scratch.sparql_ask(sparql)?),
            QueryForm::Construct => QueryResult::Graph(scratch.sparql_construct(sparql)?),
        };
        if partial {
            tracing::warn!("Query evaluated over a partial result");
        }
        Ok(QueryResponse { result, partial })
    }

    pub fn local_statement_count(&self) -> Result<usize> {
        self.inner.store.len()
    }

    /// Sub-subscriptions indexed in this zone.
    pub fn indexed_subsubscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    pub fn match_record_count(&self) -> usize {
        self.inner.matches.len()
    }

    /// Subscriptions whose notifications this peer reconstructs.
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn pending_reply_count(&self) -> usize {
        self.inner.aggregator.pending_count()
    }
}
