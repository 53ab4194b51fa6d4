//! Core data structures and types for the Semcan event network

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Number of dimensions of the coordinate space: graph, subject, predicate, object.
pub const DIMENSIONS: usize = 4;

/// One axis of the coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dimension {
    Graph,
    Subject,
    Predicate,
    Object,
}

impl Dimension {
    /// All dimensions, in routing order.
    pub const ALL: [Dimension; DIMENSIONS] =
        [Dimension::Graph, Dimension::Subject, Dimension::Predicate, Dimension::Object];

    pub fn index(self) -> usize {
        match self {
            Dimension::Graph => 0,
            Dimension::Subject => 1,
            Dimension::Predicate => 2,
            Dimension::Object => 3,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Graph => "graph",
            Dimension::Subject => "subject",
            Dimension::Predicate => "predicate",
            Dimension::Object => "object",
        };
        f.write_str(name)
    }
}

/// A value on one dimension. Elements are totally ordered by their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Element(String);

impl Element {
    pub fn new(value: impl Into<String>) -> Self {
        Element(value.into())
    }

    /// The smallest element (the empty string).
    pub fn min() -> Self {
        Element(String::new())
    }

    /// Upper bound of the keyspace. Zones whose upper bound is `max` are unbounded above.
    pub fn max() -> Self {
        Element(char::MAX.to_string())
    }

    pub fn is_max(&self) -> bool {
        self.0.starts_with(char::MAX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Element::new(value)
    }
}

impl From<&Node> for Element {
    fn from(node: &Node) -> Self {
        Element::new(node.lexical_form())
    }
}

/// An RDF term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Node {
    Iri(String),
    Blank(String),
    Literal { value: String, datatype: Option<String>, language: Option<String> },
}

impl Node {
    pub fn iri(value: impl Into<String>) -> Self {
        Node::Iri(value.into())
    }

    pub fn blank(id: impl Into<String>) -> Self {
        Node::Blank(id.into())
    }

    /// A plain (xsd:string) literal.
    pub fn literal(value: impl Into<String>) -> Self {
        Node::Literal { value: value.into(), datatype: None, language: None }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Node::Literal { value: value.into(), datatype: Some(datatype.into()), language: None }
    }

    pub fn lang_literal(value: impl Into<String>, language: impl Into<String>) -> Self {
        Node::Literal { value: value.into(), datatype: None, language: Some(language.into()) }
    }

    /// The string used as coordinate element: the IRI, the blank node label or the literal value.
    pub fn lexical_form(&self) -> &str {
        match self {
            Node::Iri(value) | Node::Blank(value) => value,
            Node::Literal { value, .. } => value,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Node::Literal { .. })
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Iri(iri) => write!(f, "<{}>", iri),
            Node::Blank(id) => write!(f, "_:{}", id),
            Node::Literal { value, language: Some(language), .. } => {
                write!(f, "\"{}\"@{}", value, language)
            }
            Node::Literal { value, datatype: Some(datatype), .. } => {
                write!(f, "\"{}\"^^<{}>", value, datatype)
            }
            Node::Literal { value, .. } => write!(f, "\"{}\"", value),
        }
    }
}

/// Variable bindings of one solution, keyed by variable name without `?`.
pub type Binding = BTreeMap<String, Node>;

/// A position in the coordinate space. `None` components are wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate([Option<Element>; DIMENSIONS]);

impl Coordinate {
    pub fn new(elements: [Option<Element>; DIMENSIONS]) -> Self {
        Coordinate(elements)
    }

    /// A coordinate made only of wildcards.
    pub fn wildcard() -> Self {
        Coordinate([None, None, None, None])
    }

    pub fn get(&self, dimension: Dimension) -> Option<&Element> {
        self.0[dimension.index()].as_ref()
    }

    pub fn is_exact(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> =
            self.0.iter().map(|e| e.as_ref().map_or("*", Element::as_str)).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// An RDF statement in a named graph, optionally stamped with its publication time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quadruple {
    pub graph: Node,
    pub subject: Node,
    pub predicate: Node,
    pub object: Node,
    /// Milliseconds since the epoch
    pub publication_time: Option<u64>,
}

impl Quadruple {
    pub fn new(graph: Node, subject: Node, predicate: Node, object: Node) -> Self {
        Self { graph, subject, predicate, object, publication_time: None }
    }

    pub fn with_publication_time(mut self, time: u64) -> Self {
        self.publication_time = Some(time);
        self
    }

    pub fn node(&self, dimension: Dimension) -> &Node {
        match dimension {
            Dimension::Graph => &self.graph,
            Dimension::Subject => &self.subject,
            Dimension::Predicate => &self.predicate,
            Dimension::Object => &self.object,
        }
    }

    /// The exact routing key of this quadruple.
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(Dimension::ALL.map(|d| Some(Element::from(self.node(d)))))
    }

    /// Check the positions RDF restricts: graph and subject must not be
    /// literals, the predicate must be an IRI.
    pub fn validate(&self) -> crate::Result<()> {
        if self.graph.is_literal() {
            return Err(crate::Error::InvalidQuadruple(format!("literal graph name in {}", self)));
        }
        if self.subject.is_literal() {
            return Err(crate::Error::InvalidQuadruple(format!("literal subject in {}", self)));
        }
        if !matches!(self.predicate, Node::Iri(_)) {
            return Err(crate::Error::InvalidQuadruple(format!("non-IRI predicate in {}", self)));
        }
        Ok(())
    }

    pub fn triple(&self) -> Triple {
        Triple {
            subject: self.subject.clone(),
            predicate: self.predicate.clone(),
            object: self.object.clone(),
        }
    }
}

impl fmt::Display for Quadruple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.subject, self.predicate, self.object, self.graph)
    }
}

/// An RDF triple, as produced by CONSTRUCT queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Node,
    pub predicate: Node,
    pub object: Node,
}

/// A quadruple pattern: `None` matches any term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuadruplePattern {
    pub graph: Option<Node>,
    pub subject: Option<Node>,
    pub predicate: Option<Node>,
    pub object: Option<Node>,
}

impl QuadruplePattern {
    pub fn new(
        graph: Option<Node>,
        subject: Option<Node>,
        predicate: Option<Node>,
        object: Option<Node>,
    ) -> Self {
        Self { graph, subject, predicate, object }
    }

    /// The pattern matching every quadruple.
    pub fn any() -> Self {
        Self::default()
    }

    fn component(&self, dimension: Dimension) -> Option<&Node> {
        match dimension {
            Dimension::Graph => self.graph.as_ref(),
            Dimension::Subject => self.subject.as_ref(),
            Dimension::Predicate => self.predicate.as_ref(),
            Dimension::Object => self.object.as_ref(),
        }
    }

    pub fn matches(&self, quad: &Quadruple) -> bool {
        Dimension::ALL
            .iter()
            .all(|&d| self.component(d).map_or(true, |node| node == quad.node(d)))
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(Dimension::ALL.map(|d| self.component(d).map(Element::from)))
    }
}

/// Identity of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new() -> Self {
        PeerId(Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a peer needs to address another peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerHandle {
    pub id: PeerId,
    pub address: String,
}

impl PeerHandle {
    pub fn new(address: impl Into<String>) -> Self {
        Self { id: PeerId::new(), address: address.into() }
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// Milliseconds since the Unix epoch.
pub fn current_time_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

pub mod encoding;
pub use encoding::*;
