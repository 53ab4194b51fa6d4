//! Subscription rewriting.
//!
//! A subscription is split into one [`Subsubscription`] per triple pattern.
//! Once a publication for graph `G` matched one of them, the home peer rewrites
//! the subscription with `?g = G` (plus whatever else is already bound), which
//! gives the graph-bound queries used to retrieve the sub-solutions.

use crate::core::Binding;
use crate::pubsub::subscription::{PatternNode, Subscription, Subsubscription};
use crate::{Error, Result};

pub struct SubscriptionRewriter;

impl SubscriptionRewriter {
    /// The unbound sub-subscriptions of a subscription, in pattern order.
    pub fn decompose(subscription: &Subscription) -> Vec<Subsubscription> {
        subscription
            .patterns
            .iter()
            .enumerate()
            .map(|(index, query)| Subsubscription {
                parent: subscription.id,
                index,
                query: query.clone(),
            })
            .collect()
    }

    /// Substitute `binding` into every pattern of a multi-pattern subscription.
    ///
    /// The graph must end up bound, either because it is a constant or because
    /// `binding` carries the graph variable.
    pub fn rewrite(subscription: &Subscription, binding: &Binding) -> Result<Vec<Subsubscription>> {
        if subscription.patterns.len() < 2 {
            return Err(Error::MalformedSubscription(format!(
                "rewriting needs at least two triple patterns, subscription {} has {}",
                subscription.id,
                subscription.patterns.len()
            )));
        }
        if let PatternNode::Variable(graph) = &subscription.graph {
            if !binding.contains_key(graph) {
                return Err(Error::MalformedSubscription(format!(
                    "graph variable ?{} is not bound",
                    graph
                )));
            }
        }

        let rewritten: Vec<Subsubscription> = subscription
            .patterns
            .iter()
            .enumerate()
            .map(|(index, query)| Subsubscription {
                parent: subscription.id,
                index,
                query: query.bind(binding),
            })
            .collect();

        debug_assert!(rewritten.windows(2).all(|pair| pair[0].query.graph == pair[1].query.graph));
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Node;
    use crate::pubsub::subscription::NotificationKind;

    fn foaf() -> Subscription {
        Subscription::parse(
            "PREFIX foaf: <http://xmlns.com/foaf/0.1/>
             SELECT ?name ?email WHERE { GRAPH ?g {
                 ?id foaf:name ?name . ?id foaf:email ?email
             } }",
            NotificationKind::Binding,
            "test",
        )
        .unwrap()
    }

    #[test]
    fn test_rewrite_binds_graph_and_known_variables() {
        let subscription = foaf();
        let binding = Binding::from([
            ("g".to_string(), Node::iri("http://example.org/event/1")),
            ("id".to_string(), Node::iri("http://example.org/alice")),
        ]);
        let rewritten = SubscriptionRewriter::rewrite(&subscription, &binding).unwrap();
        assert_eq!(rewritten.len(), 2);
        for (i, sub) in rewritten.iter().enumerate() {
            assert_eq!(sub.index, i);
            assert_eq!(sub.parent, subscription.id);
            assert_eq!(
                sub.query.graph,
                PatternNode::Constant(Node::iri("http://example.org/event/1"))
            );
            assert_eq!(
                sub.query.subject,
                PatternNode::Constant(Node::iri("http://example.org/alice"))
            );
        }
        assert_eq!(rewritten[0].query.object, PatternNode::variable("name"));
    }

    #[test]
    fn test_rewrite_requires_bound_graph() {
        let err = SubscriptionRewriter::rewrite(&foaf(), &Binding::new()).unwrap_err();
        assert!(matches!(err, Error::MalformedSubscription(_)));
    }

    #[test]
    fn test_decompose_keeps_order() {
        let subscription = foaf();
        let parts = SubscriptionRewriter::decompose(&subscription);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].query, subscription.patterns[1]);
    }
}
