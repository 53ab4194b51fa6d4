//! Message handling of the peer service.

use std::sync::Arc;

use crate::core::correlation_key;
use crate::messages::{AnycastReply, AnycastRequest, Message, Operation, ReplyPayload};
use crate::peer::PeerInner;
use crate::pubsub::{NotificationId, ReconstructionAction};
use crate::router::{MergeOutcome, PendingReplyEntry, RoutingDecision};
use crate::Result;

impl PeerInner {
    pub(crate) async fn dispatch(self: &Arc<Self>, message: Message) {
        tracing::trace!(peer = %self.handle, kind = message.kind(), "Handling message");
        match message {
            Message::Request(request) => self.handle_request(request).await,
            Message::Reply(reply) => self.merge(reply).await,
            Message::MatchSignal { notification, index, graph, holder } => {
                let Some(subscription) = self.registry.get(&notification.subscription) else {
                    tracing::debug!(%notification, "Match signal for unknown subscription");
                    return;
                };
                let reconstructor = &self.reconstructor;
                match reconstructor.on_signal(&subscription, notification, index, &graph, holder) {
                    Ok(actions) => self.perform(actions),
                    Err(err) => tracing::warn!(error = %err, "Rejected match signal"),
                }
            }
            Message::RetrieveSubSolution { notification, index, query, requester } => {
                let solutions = self.matches.lookup(&notification, index, &query);
                let reply = Message::SubSolution {
                    notification,
                    index,
                    holder: self.handle.clone(),
                    solutions,
                };
                if let Err(err) = self.transport.send(&requester, reply) {
                    tracing::warn!(requester = %requester, error = %err, "Sub-solution not sent");
                }
            }
            Message::SubSolution { notification, index, holder, solutions } => {
                let Some(subscription) = self.registry.get(&notification.subscription) else {
                    tracing::debug!(%notification, "Sub-solution for unknown subscription");
                    return;
                };
                let actions = self.reconstructor.on_sub_solution(
                    &subscription,
                    &notification,
                    index,
                    holder.id,
                    solutions,
                );
                self.perform(actions);
            }
        }
    }

    pub(crate) async fn handle_request(self: &Arc<Self>, request: AnycastRequest) {
        if !self.seen.insert(request.id) {
            tracing::debug!(peer = %self.handle, request = %request.id, "Duplicate request");
            if let Some(sender) = request.path.last() {
                let ack = Message::Reply(AnycastReply::empty(request.id));
                if let Err(err) = self.transport.send(sender, ack) {
                    tracing::warn!(error = %err, "Duplicate acknowledgement not sent");
                }
            }
            return;
        }

        let zone = self.topology.local_zone();
        let neighbors = self.topology.neighbor_table();
        match self.router.decide(&zone, &neighbors, &request) {
            RoutingDecision::Unroutable => {
                tracing::debug!(
                    peer = %self.handle,
                    request = %request.id,
                    "No neighbor leads towards the constraint"
                );
                self.send_upstream(&request, AnycastReply::empty(request.id));
            }
            RoutingDecision::Forward { candidates } => {
                self.aggregator.register(request.id, 1, request.path.clone());
                let forwarded = request.forwarded_by(&self.handle);
                for candidate in &candidates {
                    match self.transport.send(candidate, Message::Request(forwarded.clone())) {
                        Ok(()) => {
                            tracing::trace!(request = %request.id, next = %candidate, "Forwarded");
                            return;
                        }
                        Err(err) => {
                            tracing::warn!(
                                next = %candidate,
                                error = %err,
                                "Forward failed, trying an alternate"
                            );
                        }
                    }
                }
                self.merge(AnycastReply::shortfall(request.id, 1)).await;
            }
            RoutingDecision::FanOut { neighbors } => {
                self.aggregator.register(request.id, neighbors.len(), request.path.clone());
                let worker = Arc::clone(self);
                let operation = request.operation.clone();
                let local = tokio::task::spawn_blocking(move || worker.execute_local(&operation));
                self.aggregator.attach_local_query(request.id, request.hops, local);

                let forwarded = request.forwarded_by(&self.handle);
                for neighbor in &neighbors {
                    let branch = Message::Request(forwarded.clone());
                    if let Err(err) = self.transport.send(neighbor, branch) {
                        tracing::warn!(
                            neighbor = %neighbor,
                            error = %err,
                            "Fan-out branch unreachable"
                        );
                        self.merge(AnycastReply::shortfall(request.id, 1)).await;
                    }
                }
            }
            RoutingDecision::Deliver => {
                self.aggregator.register(request.id, 1, request.path.clone());
                let worker = Arc::clone(self);
                let operation = request.operation.clone();
                let local = tokio::task::spawn_blocking(move || worker.execute_local(&operation));
                let payload = match local.await {
                    Ok(Ok(payload)) => payload,
                    Ok(Err(err)) => {
                        tracing::warn!(
                            request = %request.id,
                            error = %err,
                            "Local operation failed"
                        );
                        ReplyPayload::Empty
                    }
                    Err(err) => {
                        tracing::warn!(
                            request = %request.id,
                            error = %err,
                            "Local operation aborted"
                        );
                        ReplyPayload::Empty
                    }
                };
                let reply = AnycastReply::local(request.id, self.handle.id, payload, request.hops);
                self.merge(reply).await;
            }
        }
    }

    async fn merge(self: &Arc<Self>, reply: AnycastReply) {
        let request = reply.request;
        match self.aggregator.merge(reply) {
            MergeOutcome::Complete(entry) => self.complete(entry).await,
            MergeOutcome::Awaiting { received, expected } => {
                tracing::trace!(request = %request, received, expected, "Awaiting replies");
            }
            MergeOutcome::Unknown => {
                tracing::debug!(
                    peer = %self.handle,
                    request = %request,
                    "Reply for unknown request"
                );
            }
        }
    }

    async fn complete(self: &Arc<Self>, entry: PendingReplyEntry) {
        let entry = self.aggregator.finish(entry, self.handle.id).await;
        match entry.return_path.last() {
            Some(parent) => {
                if let Err(err) = self.transport.send(parent, Message::Reply(entry.accumulator)) {
                    tracing::warn!(
                        parent = %parent,
                        error = %err,
                        "Reply could not be sent upstream"
                    );
                }
            }
            None => {
                if !self.aggregator.wake_initiator(entry.accumulator) {
                    tracing::debug!(request = %entry.request, "Initiator no longer waiting");
                }
            }
        }
    }

    fn send_upstream(&self, request: &AnycastRequest, reply: AnycastReply) {
        match request.path.last() {
            Some(parent) => {
                if let Err(err) = self.transport.send(parent, Message::Reply(reply)) {
                    tracing::warn!(
                        parent = %parent,
                        error = %err,
                        "Reply could not be sent upstream"
                    );
                }
            }
            None => {
                self.aggregator.wake_initiator(reply);
            }
        }
    }

    /// Run an operation against the local store. Blocking.
    fn execute_local(&self, operation: &Operation) -> Result<ReplyPayload> {
        match operation {
            Operation::Find(pattern) => Ok(ReplyPayload::Quadruples(self.store.find(pattern)?)),
            Operation::Count => Ok(ReplyPayload::Count(self.store.len()? as u64)),
            Operation::Publish(quad) => {
                let added = self.store.add(quad)?;
                for (indexed, binding) in self.subscriptions.matching(quad) {
                    let subsubscription = indexed.subsubscription;
                    let notification = NotificationId::new(
                        subsubscription.parent,
                        correlation_key(&quad.graph, quad.publication_time),
                    );
                    let fresh = self.matches.record(
                        notification.clone(),
                        subsubscription.index,
                        binding,
                        quad.clone(),
                    );
                    if !fresh {
                        continue;
                    }
                    tracing::debug!(
                        peer = %self.handle,
                        %notification,
                        index = subsubscription.index,
                        "Sub-subscription matched"
                    );
                    let signal = Message::MatchSignal {
                        notification,
                        index: subsubscription.index,
                        graph: quad.graph.clone(),
                        holder: self.handle.clone(),
                    };
                    if let Err(err) = self.transport.send(&indexed.home, signal) {
                        tracing::warn!(home = %indexed.home, error = %err, "Match signal not sent");
                    }
                }
                Ok(ReplyPayload::Count(u64::from(added)))
            }
            Operation::IndexSubsubscription(indexed) => {
                let inserted = self.subscriptions.insert(indexed.clone());
                Ok(ReplyPayload::Count(u64::from(inserted)))
            }
            Operation::RemoveSubscription(id) => {
                let removed = self.subscriptions.remove_subscription(id);
                self.matches.remove_subscription(id);
                Ok(ReplyPayload::Count(removed as u64))
            }
        }
    }

    fn perform(&self, actions: Vec<ReconstructionAction>) {
        for action in actions {
            match action {
                ReconstructionAction::Retrieve { holder, notification, index, query } => {
                    let request = Message::RetrieveSubSolution {
                        notification,
                        index,
                        query,
                        requester: self.handle.clone(),
                    };
                    if let Err(err) = self.transport.send(&holder, request) {
                        tracing::warn!(
                            holder = %holder,
                            error = %err,
                            "Sub-solution retrieval not sent"
                        );
                    }
                }
                ReconstructionAction::Deliver(notification) => {
                    let subscription = notification.id.subscription;
                    let sink = self.sinks.get(&subscription).map(|sink| Arc::clone(sink.value()));
                    let Some(sink) = sink else {
                        tracing::debug!(%subscription, "No sink for notification");
                        continue;
                    };
                    self.registry.record_notification(&subscription);
                    tracing::debug!(notification = %notification.id, "Delivering notification");
                    tokio::spawn(async move {
                        let id = notification.id.clone();
                        if let Err(err) = sink.notify(notification).await {
                            tracing::warn!(
                                notification = %id,
                                endpoint = %sink.endpoint(),
                                error = %err,
                                "Notification push failed"
                            );
                        }
                    });
                }
            }
        }
    }
}
