//! Subscriptions, their atomic fragments and notification identities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::core::{
    current_time_millis, Binding, Coordinate, Dimension, Element, Node, PeerHandle, Quadruple,
    QuadruplePattern,
};
use crate::parsing::sparql_parser::parse_subscription;
use crate::validator::{Constraint, FilterExpr, VariableDimensions};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        SubscriptionId(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A position of a triple pattern: a variable or a fixed term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternNode {
    Variable(String),
    Constant(Node),
}

impl PatternNode {
    pub fn variable(name: impl Into<String>) -> Self {
        PatternNode::Variable(name.into())
    }

    pub fn as_variable(&self) -> Option<&str> {
        match self {
            PatternNode::Variable(name) => Some(name),
            PatternNode::Constant(_) => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Node> {
        match self {
            PatternNode::Constant(node) => Some(node),
            PatternNode::Variable(_) => None,
        }
    }

    fn bind(&self, binding: &Binding) -> PatternNode {
        match self {
            PatternNode::Variable(name) => binding
                .get(name)
                .map_or_else(|| self.clone(), |node| PatternNode::Constant(node.clone())),
            PatternNode::Constant(_) => self.clone(),
        }
    }
}

impl From<Node> for PatternNode {
    fn from(node: Node) -> Self {
        PatternNode::Constant(node)
    }
}

impl fmt::Display for PatternNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternNode::Variable(name) => write!(f, "?{}", name),
            PatternNode::Constant(node) => write!(f, "{}", node),
        }
    }
}

/// A single quadruple pattern plus the filters that only involve its variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtomicQuery {
    pub graph: PatternNode,
    pub subject: PatternNode,
    pub predicate: PatternNode,
    pub object: PatternNode,
    pub filters: Vec<FilterExpr>,
}

impl AtomicQuery {
    pub fn new(
        graph: PatternNode,
        subject: PatternNode,
        predicate: PatternNode,
        object: PatternNode,
    ) -> Self {
        Self { graph, subject, predicate, object, filters: Vec::new() }
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn component(&self, dimension: Dimension) -> &PatternNode {
        match dimension {
            Dimension::Graph => &self.graph,
            Dimension::Subject => &self.subject,
            Dimension::Predicate => &self.predicate,
            Dimension::Object => &self.object,
        }
    }

    pub fn variables(&self) -> BTreeSet<String> {
        Dimension::ALL
            .iter()
            .filter_map(|&d| self.component(d).as_variable().map(str::to_string))
            .collect()
    }

    /// First dimension each variable occurs on.
    pub fn variable_dimensions(&self) -> VariableDimensions {
        let mut dimensions = VariableDimensions::new();
        for d in Dimension::ALL {
            if let Some(name) = self.component(d).as_variable() {
                dimensions.entry(name.to_string()).or_insert(d);
            }
        }
        dimensions
    }

    /// Routing key made of the fixed terms.
    pub fn key(&self) -> Coordinate {
        Coordinate::new(Dimension::ALL.map(|d| self.component(d).as_constant().map(Element::from)))
    }

    pub fn pattern(&self) -> QuadruplePattern {
        QuadruplePattern::new(
            self.graph.as_constant().cloned(),
            self.subject.as_constant().cloned(),
            self.predicate.as_constant().cloned(),
            self.object.as_constant().cloned(),
        )
    }

    /// Constraint selecting the zones that may hold matching quadruples.
    pub fn constraint(&self) -> Constraint {
        match FilterExpr::conjunction(self.filters.iter().cloned()) {
            Some(filter) => Constraint::with_filter(self.key(), filter, self.variable_dimensions()),
            None => Constraint::key(self.key()),
        }
    }

    /// Substitute the variables present in `binding`, filters included.
    pub fn bind(&self, binding: &Binding) -> AtomicQuery {
        AtomicQuery {
            graph: self.graph.bind(binding),
            subject: self.subject.bind(binding),
            predicate: self.predicate.bind(binding),
            object: self.object.bind(binding),
            filters: self.filters.iter().map(|f| f.substitute(binding)).collect(),
        }
    }

    /// Unify with a quadruple and check the filters. Returns the variable bindings on success.
    pub fn matches(&self, quad: &Quadruple) -> Option<Binding> {
        let mut binding = Binding::new();
        for d in Dimension::ALL {
            let value = quad.node(d);
            match self.component(d) {
                PatternNode::Constant(node) if node != value => return None,
                PatternNode::Constant(_) => {}
                PatternNode::Variable(name) => match binding.get(name) {
                    Some(bound) if bound != value => return None,
                    Some(_) => {}
                    None => {
                        binding.insert(name.clone(), value.clone());
                    }
                },
            }
        }
        if self.filters.iter().all(|f| f.evaluate(&binding)) {
            Some(binding)
        } else {
            None
        }
    }
}

impl fmt::Display for AtomicQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GRAPH {} {{ {} {} {} }}",
            self.graph, self.subject, self.predicate, self.object
        )?;
        for filter in &self.filters {
            write!(f, " FILTER {}", filter)?;
        }
        Ok(())
    }
}

/// What a subscriber receives for a completed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NotificationKind {
    /// The solution projected on the selected variables
    #[default]
    Binding,
    /// Every quadruple that contributed to the solution
    CompoundEvent,
    /// Only the notification identity
    Signal,
}

/// A continuous SPARQL subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    /// Endpoint description of the subscriber
    pub subscriber: String,
    pub sparql: String,
    pub graph: PatternNode,
    pub patterns: Vec<AtomicQuery>,
    /// Filter conjuncts over variables of several patterns, checked on joined solutions
    pub join_filters: Vec<FilterExpr>,
    pub result_vars: Vec<String>,
    pub kind: NotificationKind,
    pub created_at: u64,
}

impl Subscription {
    /// Parse a SELECT subscription of the form `SELECT ... WHERE { GRAPH ?g { ... } }`.
    pub fn parse(
        sparql: &str,
        kind: NotificationKind,
        subscriber: impl Into<String>,
    ) -> Result<Self> {
        let parsed = parse_subscription(sparql)?;
        Ok(Self {
            id: SubscriptionId::new(),
            subscriber: subscriber.into(),
            sparql: sparql.to_string(),
            graph: parsed.graph,
            patterns: parsed.patterns,
            join_filters: parsed.join_filters,
            result_vars: parsed.result_vars,
            kind,
            created_at: current_time_millis(),
        })
    }

    /// Whether a joined solution satisfies the cross-pattern filters.
    pub fn accepts(&self, binding: &Binding) -> bool {
        self.join_filters.iter().all(|f| f.evaluate(binding))
    }

    pub fn graph_variable(&self) -> Option<&str> {
        self.graph.as_variable()
    }

    /// Restrict a full solution to the selected variables.
    pub fn project(&self, binding: &Binding) -> Binding {
        if self.result_vars.is_empty() {
            return binding.clone();
        }
        binding
            .iter()
            .filter(|(name, _)| self.result_vars.iter().any(|v| v == *name))
            .map(|(name, node)| (name.clone(), node.clone()))
            .collect()
    }
}

/// One atomic fragment of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subsubscription {
    pub parent: SubscriptionId,
    pub index: usize,
    pub query: AtomicQuery,
}

/// A sub-subscription as stored by the peers that index it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSubsubscription {
    pub subsubscription: Subsubscription,
    /// Peer holding the parent subscription and reconstructing its notifications
    pub home: PeerHandle,
}

/// Identity of one notification instance of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationId {
    pub subscription: SubscriptionId,
    pub correlation: String,
}

impl NotificationId {
    pub fn new(subscription: SubscriptionId, correlation: impl Into<String>) -> Self {
        Self { subscription, correlation: correlation.into() }
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subscription, self.correlation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationPayload {
    Binding(Binding),
    CompoundEvent(Vec<Quadruple>),
    Signal,
}

/// What is pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub payload: NotificationPayload,
}
