//! Oxigraph-based local quadruple store.
//!
//! Quadruples are kept in an in-memory oxigraph [`Store`]; SPARQL queries run
//! through oxigraph's `SparqlEvaluator`.
//!
//! # Example
//!
//! ```
//! use semcan::core::{Node, Quadruple, QuadruplePattern};
//! use semcan::querying::{LocalStore, OxigraphStore};
//!
//! let store = OxigraphStore::new().unwrap();
//! store.add(&Quadruple::new(
//!     Node::iri("http://example.org/g"),
//!     Node::iri("http://example.org/alice"),
//!     Node::iri("http://example.org/knows"),
//!     Node::iri("http://example.org/bob"),
//! )).unwrap();
//!
//! let found = store.find(&QuadruplePattern::any()).unwrap();
//! assert_eq!(found.len(), 1);
//! assert!(store.sparql_ask("ASK { GRAPH ?g { ?s ?p ?o } }").unwrap());
//! ```

use oxigraph::model::vocab::xsd;
use oxigraph::model::{BlankNode, GraphName, Literal, NamedNode, NamedOrBlankNode, Quad, Term};
use oxigraph::sparql::{QueryResults, SparqlEvaluator};
use oxigraph::store::Store;

use crate::core::{Binding, Node, Quadruple, QuadruplePattern, Triple};
use crate::querying::LocalStore;
use crate::{Error, Result};

impl From<oxigraph::store::StorageError> for Error {
    fn from(err: oxigraph::store::StorageError) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<oxigraph::sparql::QueryEvaluationError> for Error {
    fn from(err: oxigraph::sparql::QueryEvaluationError) -> Self {
        Error::Store(err.to_string())
    }
}

fn named_node(iri: &str) -> Result<NamedNode> {
    NamedNode::new(iri).map_err(|e| Error::Store(format!("invalid IRI <{}>: {}", iri, e)))
}

fn blank_node(id: &str) -> Result<BlankNode> {
    BlankNode::new(id).map_err(|e| Error::Store(format!("invalid blank node _:{}: {}", id, e)))
}

fn to_term(node: &Node) -> Result<Term> {
    Ok(match node {
        Node::Iri(iri) => named_node(iri)?.into(),
        Node::Blank(id) => blank_node(id)?.into(),
        Node::Literal { value, language: Some(language), .. } => {
            Literal::new_language_tagged_literal(value.as_str(), language.as_str())
                .map_err(|e| Error::Store(e.to_string()))?
                .into()
        }
        Node::Literal { value, datatype: Some(datatype), .. } => {
            Literal::new_typed_literal(value.as_str(), named_node(datatype)?).into()
        }
        Node::Literal { value, .. } => Literal::new_simple_literal(value.as_str()).into(),
    })
}

fn to_graph_name(node: &Node) -> Result<GraphName> {
    match node {
        Node::Iri(iri) => Ok(GraphName::NamedNode(named_node(iri)?)),
        Node::Blank(id) => Ok(GraphName::BlankNode(blank_node(id)?)),
        Node::Literal { .. } => Err(Error::Store(format!("literal graph name {}", node))),
    }
}

fn to_quad(quad: &Quadruple, graph: GraphName) -> Result<Quad> {
    let predicate = match &quad.predicate {
        Node::Iri(iri) => named_node(iri)?,
        other => return Err(Error::Store(format!("predicate must be an IRI, got {}", other))),
    };
    let object = to_term(&quad.object)?;
    match &quad.subject {
        Node::Iri(iri) => Ok(Quad::new(named_node(iri)?, predicate, object, graph)),
        Node::Blank(id) => Ok(Quad::new(blank_node(id)?, predicate, object, graph)),
        Node::Literal { .. } => Err(Error::Store(format!("literal subject {}", quad.subject))),
    }
}

fn to_subject(node: &Node) -> Result<NamedOrBlankNode> {
    match node {
        Node::Iri(iri) => Ok(named_node(iri)?.into()),
        Node::Blank(id) => Ok(blank_node(id)?.into()),
        Node::Literal { .. } => Err(Error::Store(format!("literal subject {}", node))),
    }
}

fn to_predicate(node: &Node) -> Result<NamedNode> {
    match node {
        Node::Iri(iri) => named_node(iri),
        other => Err(Error::Store(format!("predicate must be an IRI, got {}", other))),
    }
}

/// Convert a pattern component. An error means it is bound to a term no
/// stored quadruple can hold.
fn bound<T>(node: Option<&Node>, convert: impl Fn(&Node) -> Result<T>) -> Result<Option<T>> {
    node.map(convert).transpose()
}

fn from_term(term: Term) -> Option<Node> {
    match term {
        Term::NamedNode(node) => Some(Node::Iri(node.into_string())),
        Term::BlankNode(node) => Some(Node::Blank(node.as_str().to_string())),
        Term::Literal(literal) => {
            let language = literal.language().map(str::to_string);
            let datatype = literal.datatype();
            let datatype = if language.is_some() || datatype == xsd::STRING {
                None
            } else {
                Some(datatype.as_str().to_string())
            };
            Some(Node::Literal { value: literal.value().to_string(), datatype, language })
        }
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn from_quad(quad: Quad) -> Option<Quadruple> {
    let graph = match quad.graph_name {
        GraphName::NamedNode(node) => Node::Iri(node.into_string()),
        GraphName::BlankNode(node) => Node::Blank(node.as_str().to_string()),
        GraphName::DefaultGraph => return None,
    };
    Some(Quadruple::new(
        graph,
        from_term(Term::from(quad.subject))?,
        Node::Iri(quad.predicate.into_string()),
        from_term(quad.object)?,
    ))
}

pub struct OxigraphStore {
    store: Store,
    mirror_default_graph: bool,
}

impl OxigraphStore {
    pub fn new() -> Result<Self> {
        Ok(Self { store: Store::new()?, mirror_default_graph: false })
    }

    /// A store that also copies every quadruple into the default graph, so
    /// queries without a GRAPH clause see the union of all graphs.
    pub fn with_union_default_graph() -> Result<Self> {
        Ok(Self { store: Store::new()?, mirror_default_graph: true })
    }

    fn evaluate(&self, query: &str) -> Result<QueryResults> {
        let prepared = SparqlEvaluator::new()
            .parse_query(query)
            .map_err(|e| Error::MalformedQuery(e.to_string()))?;
        Ok(prepared.on_store(&self.store).execute()?)
    }
}

impl LocalStore for OxigraphStore {
    fn add(&self, quad: &Quadruple) -> Result<bool> {
        let inserted = self.store.insert(&to_quad(quad, to_graph_name(&quad.graph)?)?)?;
        if self.mirror_default_graph {
            self.store.insert(&to_quad(quad, GraphName::DefaultGraph)?)?;
        }
        Ok(inserted)
    }

    fn remove(&self, quad: &Quadruple) -> Result<bool> {
        let removed = self.store.remove(&to_quad(quad, to_graph_name(&quad.graph)?)?)?;
        if self.mirror_default_graph {
            self.store.remove(&to_quad(quad, GraphName::DefaultGraph)?)?;
        }
        Ok(removed)
    }

    fn find(&self, pattern: &QuadruplePattern) -> Result<Vec<Quadruple>> {
        let (Ok(subject), Ok(predicate), Ok(object), Ok(graph)) = (
            bound(pattern.subject.as_ref(), to_subject),
            bound(pattern.predicate.as_ref(), to_predicate),
            bound(pattern.object.as_ref(), to_term),
            bound(pattern.graph.as_ref(), to_graph_name),
        ) else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for quad in self.store.quads_for_pattern(
            subject.as_ref().map(NamedOrBlankNode::as_ref),
            predicate.as_ref().map(NamedNode::as_ref),
            object.as_ref().map(Term::as_ref),
            graph.as_ref().map(GraphName::as_ref),
        ) {
            // Mirrored default graph copies are skipped here.
            if let Some(quad) = from_quad(quad?) {
                found.push(quad);
            }
        }
        Ok(found)
    }

    fn len(&self) -> Result<usize> {
        let total = self.store.len()?;
        if self.mirror_default_graph {
            Ok(total / 2)
        } else {
            Ok(total)
        }
    }

    fn sparql_ask(&self, query: &str) -> Result<bool> {
        match self.evaluate(query)? {
            QueryResults::Boolean(answer) => Ok(answer),
            _ => Err(Error::MalformedQuery("expected an ASK query".to_string())),
        }
    }

    fn sparql_select(&self, query: &str) -> Result<Vec<Binding>> {
        let QueryResults::Solutions(solutions) = self.evaluate(query)? else {
            return Err(Error::MalformedQuery("expected a SELECT query".to_string()));
        };
        let mut bindings = Vec::new();
        for solution in solutions {
            let solution = solution?;
            let mut binding = Binding::new();
            for (variable, term) in solution.iter() {
                if let Some(node) = from_term(term.clone()) {
                    binding.insert(variable.as_str().to_string(), node);
                }
            }
            bindings.push(binding);
        }
        Ok(bindings)
    }

    fn sparql_construct(&self, query: &str) -> Result<Vec<Triple>> {
        let QueryResults::Graph(triples) = self.evaluate(query)? else {
            return Err(Error::MalformedQuery("expected a CONSTRUCT query".to_string()));
        };
        let mut constructed = Vec::new();
        for triple in triples {
            let triple = triple?;
            let subject = from_term(Term::from(triple.subject));
            let object = from_term(triple.object);
            if let (Some(subject), Some(object)) = (subject, object) {
                constructed.push(Triple {
                    subject,
                    predicate: Node::Iri(triple.predicate.into_string()),
                    object,
                });
            }
        }
        Ok(constructed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(subject: &str, predicate: &str, object: Node) -> Quadruple {
        Quadruple::new(
            Node::iri("http://example.org/g"),
            Node::iri(format!("http://example.org/{}", subject)),
            Node::iri(format!("http://example.org/{}", predicate)),
            object,
        )
    }

    #[test]
    fn test_literal_kinds_survive_storage() {
        let store = OxigraphStore::new().unwrap();
        let typed = Node::typed_literal("30", "http://www.w3.org/2001/XMLSchema#integer");
        let tagged = Node::lang_literal("chat", "fr");
        store.add(&quad("alice", "age", typed.clone())).unwrap();
        store.add(&quad("alice", "label", tagged.clone())).unwrap();
        store.add(&quad("alice", "name", Node::literal("Alice"))).unwrap();

        let objects: Vec<Node> =
            store.find(&QuadruplePattern::any()).unwrap().into_iter().map(|q| q.object).collect();
        assert!(objects.contains(&typed));
        assert!(objects.contains(&tagged));
        assert!(objects.contains(&Node::literal("Alice")));
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_add_is_idempotent_and_remove() {
        let store = OxigraphStore::new().unwrap();
        let q = quad("alice", "knows", Node::iri("http://example.org/bob"));
        assert!(store.add(&q).unwrap());
        assert!(!store.add(&q).unwrap());
        assert!(store.remove(&q).unwrap());
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_rejects_literal_subject() {
        let store = OxigraphStore::new().unwrap();
        let bad = Quadruple::new(
            Node::iri("http://example.org/g"),
            Node::literal("not a subject"),
            Node::iri("http://example.org/p"),
            Node::literal("o"),
        );
        assert!(matches!(store.add(&bad), Err(Error::Store(_))));
    }

    #[test]
    fn test_find_uses_bound_components() {
        let store = OxigraphStore::with_union_default_graph().unwrap();
        store.add(&quad("alice", "knows", Node::iri("http://example.org/bob"))).unwrap();
        store.add(&quad("alice", "name", Node::literal("Alice"))).unwrap();
        store.add(&quad("bob", "name", Node::literal("Bob"))).unwrap();

        let names = store
            .find(&QuadruplePattern::new(
                None,
                None,
                Some(Node::iri("http://example.org/name")),
                None,
            ))
            .unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|q| q.graph == Node::iri("http://example.org/g")));

        let alice = QuadruplePattern::new(
            Some(Node::iri("http://example.org/g")),
            Some(Node::iri("http://example.org/alice")),
            None,
            None,
        );
        assert_eq!(store.find(&alice).unwrap().len(), 2);
        assert_eq!(store.find(&QuadruplePattern::any()).unwrap().len(), 3);

        let literal_subject = QuadruplePattern::new(None, Some(Node::literal("alice")), None, None);
        assert!(store.find(&literal_subject).unwrap().is_empty());
        let literal_graph = QuadruplePattern::new(Some(Node::literal("g")), None, None, None);
        assert!(store.find(&literal_graph).unwrap().is_empty());
        let unknown = QuadruplePattern::new(None, None, None, Some(Node::literal("Carol")));
        assert!(store.find(&unknown).unwrap().is_empty());
    }

    #[test]
    fn test_union_default_graph_select() {
        let store = OxigraphStore::with_union_default_graph().unwrap();
        store.add(&quad("alice", "knows", Node::iri("http://example.org/bob"))).unwrap();
        store.add(&quad("bob", "knows", Node::iri("http://example.org/carol"))).unwrap();

        let rows = store
            .sparql_select("SELECT ?s WHERE { ?s <http://example.org/knows> ?o }")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(store.len().unwrap(), 2);

        let triples = store
            .sparql_construct("CONSTRUCT { ?o ?p ?s } WHERE { ?s ?p ?o }")
            .unwrap();
        assert_eq!(triples.len(), 2);
    }

    #[test]
    fn test_malformed_query_is_reported() {
        let store = OxigraphStore::new().unwrap();
        assert!(matches!(store.sparql_select("SELEKT nothing"), Err(Error::MalformedQuery(_))));
        assert!(store.sparql_ask("SELECT * WHERE { ?s ?p ?o }").is_err());
    }
}
