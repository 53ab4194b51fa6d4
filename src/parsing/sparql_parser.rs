//! SPARQL parsing on top of spargebra.
//!
//! Two entry points:
//! - [`parse_subscription`] turns `SELECT ... WHERE { GRAPH ?g { ... } }` into
//!   a graph term, ordered atomic patterns with their filters, and the selected
//!   variables.
//! - [`decompose_query`] splits a SELECT, ASK or CONSTRUCT query into atomic
//!   queries that can be routed independently.

use spargebra::algebra::{Expression, Function, GraphPattern};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use spargebra::Query;
use std::ops::Range;

use crate::core::Node;
use crate::pubsub::subscription::{AtomicQuery, PatternNode};
use crate::validator::{ComparisonOp, FilterExpr, Operand};
use crate::{Error, Result};

const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

/// A subscription body.
#[derive(Debug, Clone)]
pub struct ParsedSubscription {
    pub graph: PatternNode,
    pub patterns: Vec<AtomicQuery>,
    /// Filter conjuncts spanning several patterns, checked on joined solutions
    pub join_filters: Vec<FilterExpr>,
    pub result_vars: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryForm {
    Select,
    Ask,
    Construct,
}

/// A query split into independently routable parts.
#[derive(Debug, Clone)]
pub struct DecomposedQuery {
    pub form: QueryForm,
    pub atomic_queries: Vec<AtomicQuery>,
    /// Filter conjuncts left out of routing constraints
    pub unrouted_filters: usize,
}

fn literal_node(literal: &spargebra::term::Literal) -> Node {
    if let Some(language) = literal.language() {
        return Node::lang_literal(literal.value(), language);
    }
    let datatype = literal.datatype().as_str();
    if datatype == XSD_STRING {
        Node::literal(literal.value())
    } else {
        Node::typed_literal(literal.value(), datatype)
    }
}

fn term_pattern(term: &TermPattern) -> Result<PatternNode> {
    match term {
        TermPattern::Variable(v) => Ok(PatternNode::variable(v.as_str())),
        TermPattern::NamedNode(n) => Ok(PatternNode::Constant(Node::iri(n.as_str()))),
        // Blank nodes in a query body behave like variables.
        TermPattern::BlankNode(b) => Ok(PatternNode::variable(format!("_{}", b.as_str()))),
        TermPattern::Literal(l) => Ok(PatternNode::Constant(literal_node(l))),
        #[allow(unreachable_patterns)]
        other => Err(Error::MalformedQuery(format!("unsupported term {}", other))),
    }
}

fn named_node_pattern(pattern: &NamedNodePattern) -> PatternNode {
    match pattern {
        NamedNodePattern::Variable(v) => PatternNode::variable(v.as_str()),
        NamedNodePattern::NamedNode(n) => PatternNode::Constant(Node::iri(n.as_str())),
    }
}

fn operand(expr: &Expression) -> Option<Operand> {
    match expr {
        Expression::Variable(v) => Some(Operand::variable(v.as_str())),
        Expression::Literal(l) => Some(Operand::constant(l.value())),
        Expression::NamedNode(n) => Some(Operand::constant(n.as_str())),
        Expression::FunctionCall(Function::Str, args) if args.len() == 1 => operand(&args[0]),
        _ => None,
    }
}

fn comparison(
    op: ComparisonOp,
    lhs: &Expression,
    rhs: &Expression,
    whole: &Expression,
) -> FilterExpr {
    match (operand(lhs), operand(rhs)) {
        (Some(Operand::Variable(_)), Some(Operand::Variable(_))) => {
            FilterExpr::Unsupported(whole.to_string())
        }
        (Some(l), Some(r)) => FilterExpr::compare(op, l, r),
        _ => FilterExpr::Unsupported(whole.to_string()),
    }
}

/// Convert a SPARQL expression to a filter tree. Nodes outside comparisons
/// combined with `&&` and `||` become [`FilterExpr::Unsupported`].
pub fn filter_from_expression(expr: &Expression) -> FilterExpr {
    match expr {
        Expression::And(a, b) => {
            FilterExpr::and(filter_from_expression(a), filter_from_expression(b))
        }
        Expression::Or(a, b) => {
            FilterExpr::or(filter_from_expression(a), filter_from_expression(b))
        }
        Expression::Equal(a, b) => comparison(ComparisonOp::Eq, a, b, expr),
        Expression::Greater(a, b) => comparison(ComparisonOp::Gt, a, b, expr),
        Expression::GreaterOrEqual(a, b) => comparison(ComparisonOp::Ge, a, b, expr),
        Expression::Less(a, b) => comparison(ComparisonOp::Lt, a, b, expr),
        Expression::LessOrEqual(a, b) => comparison(ComparisonOp::Le, a, b, expr),
        Expression::Not(inner) => match inner.as_ref() {
            Expression::Equal(a, b) => comparison(ComparisonOp::Ne, a, b, expr),
            _ => FilterExpr::Unsupported(expr.to_string()),
        },
        _ => FilterExpr::Unsupported(expr.to_string()),
    }
}

fn conjuncts(filter: FilterExpr, into: &mut Vec<FilterExpr>) {
    match filter {
        FilterExpr::And(a, b) => {
            conjuncts(*a, into);
            conjuncts(*b, into);
        }
        other => into.push(other),
    }
}

/// A filter conjunct and the patterns it restricts: those collected below it.
struct ScopedFilter {
    filter: FilterExpr,
    scope: Range<usize>,
}

/// Walks the algebra collecting triple patterns and filters.
struct PatternCollector {
    /// Reject constructs a subscription cannot express
    strict: bool,
    patterns: Vec<AtomicQuery>,
    filters: Vec<ScopedFilter>,
    result_vars: Option<Vec<String>>,
    default_graphs: usize,
}

impl PatternCollector {
    fn new(strict: bool) -> Self {
        Self {
            strict,
            patterns: Vec::new(),
            filters: Vec::new(),
            result_vars: None,
            default_graphs: 0,
        }
    }

    /// Attach every filter to the patterns of its scope that bind all its
    /// variables. Returns the filters no such pattern could take.
    fn attach_filters(&mut self) -> Vec<FilterExpr> {
        let mut detached = Vec::new();
        for ScopedFilter { filter, scope } in std::mem::take(&mut self.filters) {
            let variables = filter.variables();
            let mut attached = false;
            for pattern in &mut self.patterns[scope] {
                if variables.is_subset(&pattern.variables()) {
                    pattern.filters.push(filter.clone());
                    attached = true;
                }
            }
            if !attached {
                detached.push(filter);
            }
        }
        detached
    }

    fn unsupported(&self, what: &str) -> Result<()> {
        if self.strict {
            Err(Error::MalformedSubscription(format!("{} is not supported in subscriptions", what)))
        } else {
            Ok(())
        }
    }

    fn add_triple(&mut self, triple: &TriplePattern, graph: Option<&PatternNode>) -> Result<()> {
        let graph = match graph {
            Some(graph) => graph.clone(),
            None => {
                if self.strict {
                    return Err(Error::MalformedSubscription(
                        "triple patterns must be inside a GRAPH block".to_string(),
                    ));
                }
                self.default_graphs += 1;
                PatternNode::variable(format!("__graph{}", self.default_graphs))
            }
        };
        self.patterns.push(AtomicQuery::new(
            graph,
            term_pattern(&triple.subject)?,
            named_node_pattern(&triple.predicate),
            term_pattern(&triple.object)?,
        ));
        Ok(())
    }

    fn collect(&mut self, pattern: &GraphPattern, graph: Option<&PatternNode>) -> Result<()> {
        match pattern {
            GraphPattern::Bgp { patterns } => {
                for triple in patterns {
                    self.add_triple(triple, graph)?;
                }
                Ok(())
            }
            GraphPattern::Graph { name, inner } => {
                let name = named_node_pattern(name);
                self.collect(inner, Some(&name))
            }
            GraphPattern::Filter { expr, inner } => {
                let start = self.patterns.len();
                self.collect(inner, graph)?;
                let scope = start..self.patterns.len();
                let mut parts = Vec::new();
                conjuncts(filter_from_expression(expr), &mut parts);
                self.filters.extend(
                    parts.into_iter().map(|filter| ScopedFilter { filter, scope: scope.clone() }),
                );
                Ok(())
            }
            GraphPattern::Join { left, right } => {
                self.collect(left, graph)?;
                self.collect(right, graph)
            }
            GraphPattern::Project { inner, variables } => {
                if self.result_vars.is_none() {
                    self.result_vars =
                        Some(variables.iter().map(|v| v.as_str().to_string()).collect());
                }
                self.collect(inner, graph)
            }
            GraphPattern::Distinct { inner }
            | GraphPattern::Reduced { inner }
            | GraphPattern::Slice { inner, .. }
            | GraphPattern::OrderBy { inner, .. } => self.collect(inner, graph),
            GraphPattern::LeftJoin { left, right, .. }
            | GraphPattern::Union { left, right }
            | GraphPattern::Minus { left, right } => {
                self.unsupported("OPTIONAL, UNION or MINUS")?;
                self.collect(left, graph)?;
                self.collect(right, graph)
            }
            GraphPattern::Extend { inner, .. } | GraphPattern::Group { inner, .. } => {
                self.unsupported("BIND or GROUP BY")?;
                self.collect(inner, graph)
            }
            GraphPattern::Path { .. } => {
                self.unsupported("property paths")?;
                // A path can touch any quadruple of its graph.
                self.patterns.push(AtomicQuery::new(
                    graph.cloned().unwrap_or_else(|| PatternNode::variable("__path_graph")),
                    PatternNode::variable("__path_s"),
                    PatternNode::variable("__path_p"),
                    PatternNode::variable("__path_o"),
                ));
                Ok(())
            }
            _ => self.unsupported("this graph pattern"),
        }
    }
}

/// Parse a subscription. Every filter must be classifiable by the zone validator.
pub fn parse_subscription(sparql: &str) -> Result<ParsedSubscription> {
    let query =
        Query::parse(sparql, None).map_err(|e| Error::MalformedSubscription(e.to_string()))?;
    let Query::Select { pattern, .. } = &query else {
        return Err(Error::MalformedSubscription(
            "subscriptions must be SELECT queries".to_string(),
        ));
    };

    let mut collector = PatternCollector::new(true);
    collector.collect(pattern, None)?;
    if collector.patterns.is_empty() {
        return Err(Error::MalformedSubscription("no triple pattern".to_string()));
    }

    let graph = collector.patterns[0].graph.clone();
    if collector.patterns.iter().any(|p| p.graph != graph) {
        return Err(Error::MalformedSubscription(
            "all triple patterns must share one GRAPH block".to_string(),
        ));
    }

    if let Some(unsupported) =
        collector.filters.iter().find_map(|scoped| scoped.filter.first_unsupported())
    {
        return Err(Error::UnsupportedFilterExpression(unsupported));
    }

    let join_filters = collector.attach_filters();
    let result_vars = collector.result_vars.unwrap_or_default();
    Ok(ParsedSubscription { graph, patterns: collector.patterns, join_filters, result_vars })
}

/// Split a query into atomic queries, one per triple pattern, each carrying the
/// supported filter conjuncts in scope that only involve its own variables.
pub fn decompose_query(sparql: &str) -> Result<DecomposedQuery> {
    let query = Query::parse(sparql, None).map_err(|e| Error::MalformedQuery(e.to_string()))?;
    let (form, pattern) = match &query {
        Query::Select { pattern, .. } => (QueryForm::Select, pattern),
        Query::Ask { pattern, .. } => (QueryForm::Ask, pattern),
        Query::Construct { pattern, .. } => (QueryForm::Construct, pattern),
        Query::Describe { .. } => {
            return Err(Error::MalformedQuery("DESCRIBE queries are not supported".to_string()))
        }
    };

    let mut collector = PatternCollector::new(false);
    collector.collect(pattern, None)?;

    let before = collector.filters.len();
    collector.filters.retain(|scoped| scoped.filter.is_supported());
    let unrouted_filters = before - collector.filters.len();
    collector.attach_filters();
    Ok(DecomposedQuery { form, atomic_queries: collector.patterns, unrouted_filters })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOAF_SUBSCRIPTION: &str = "PREFIX foaf: <http://xmlns.com/foaf/0.1/>
        SELECT ?name ?email WHERE { GRAPH ?g { ?id foaf:name ?name . ?id foaf:email ?email } }";

    #[test]
    fn test_parse_subscription_patterns_in_order() {
        let parsed = parse_subscription(FOAF_SUBSCRIPTION).unwrap();
        assert_eq!(parsed.graph, PatternNode::variable("g"));
        assert_eq!(parsed.patterns.len(), 2);
        assert_eq!(
            parsed.patterns[0].predicate,
            PatternNode::Constant(Node::iri("http://xmlns.com/foaf/0.1/name"))
        );
        assert_eq!(
            parsed.patterns[1].predicate,
            PatternNode::Constant(Node::iri("http://xmlns.com/foaf/0.1/email"))
        );
        assert_eq!(parsed.result_vars, vec!["name".to_string(), "email".to_string()]);
    }

    #[test]
    fn test_filters_attach_to_patterns_binding_their_variables() {
        let parsed = parse_subscription(
            "SELECT ?s WHERE {
                 GRAPH ?g { ?s <http://ex/p> ?o . ?s <http://ex/q> ?v }
                 FILTER(?o > \"k\" && str(?v) != \"x\")
             }",
        )
        .unwrap();
        assert_eq!(parsed.patterns[0].filters.len(), 1);
        assert_eq!(parsed.patterns[1].filters.len(), 1);
        assert!(matches!(
            parsed.patterns[1].filters[0],
            FilterExpr::Comparison { op: ComparisonOp::Ne, .. }
        ));
        assert!(parsed.join_filters.is_empty());
    }

    #[test]
    fn test_cross_pattern_filter_is_kept_for_joins() {
        let parsed = parse_subscription(
            "SELECT * WHERE {
                 GRAPH ?g { ?s <http://ex/p> ?o . ?x <http://ex/q> ?v }
                 FILTER(?o = \"a\" || ?v = \"b\")
             }",
        )
        .unwrap();
        assert!(parsed.patterns.iter().all(|p| p.filters.is_empty()));
        assert_eq!(parsed.join_filters.len(), 1);
    }

    #[test]
    fn test_unsupported_subscription_filter_is_rejected() {
        let err = parse_subscription(
            "SELECT * WHERE { GRAPH ?g { ?s <http://ex/p> ?o } FILTER(regex(?o, \"^a\")) }",
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFilterExpression(_)));

        let err = parse_subscription(
            "SELECT * WHERE {
                 GRAPH ?g { ?s <http://ex/p> ?o . ?s <http://ex/q> ?v } FILTER(?o < ?v)
             }",
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFilterExpression(_)));
    }

    #[test]
    fn test_malformed_subscriptions() {
        assert!(matches!(
            parse_subscription("SELECT * WHERE { ?s ?p ?o }"),
            Err(Error::MalformedSubscription(_))
        ));
        assert!(matches!(
            parse_subscription("ASK { GRAPH ?g { ?s ?p ?o } }"),
            Err(Error::MalformedSubscription(_))
        ));
        assert!(matches!(parse_subscription("SELECT"), Err(Error::MalformedSubscription(_))));
    }

    #[test]
    fn test_decompose_query_keeps_routable_filters() {
        let decomposed = decompose_query(
            "SELECT ?s WHERE {
                 ?s <http://ex/age> ?age . ?s <http://ex/name> ?n
                 FILTER(?age > \"3\" && regex(?n, \"x\"))
             }",
        )
        .unwrap();
        assert_eq!(decomposed.form, QueryForm::Select);
        assert_eq!(decomposed.atomic_queries.len(), 2);
        assert_eq!(decomposed.atomic_queries[0].filters.len(), 1);
        assert!(decomposed.atomic_queries[1].filters.is_empty());
        assert_eq!(decomposed.unrouted_filters, 1);
    }

    #[test]
    fn test_filters_stay_inside_their_union_branch() {
        let decomposed = decompose_query(
            "SELECT ?o WHERE {
                 { GRAPH ?g { ?s <http://ex/p> ?o } }
                 UNION
                 { GRAPH ?g { ?s <http://ex/q> ?o FILTER(?o < \"M\") } }
             }",
        )
        .unwrap();
        assert_eq!(decomposed.atomic_queries.len(), 2);
        assert!(decomposed.atomic_queries[0].filters.is_empty());
        assert_eq!(decomposed.atomic_queries[1].filters.len(), 1);

        let parsed = parse_subscription(
            "SELECT * WHERE { GRAPH ?g {
                 ?s <http://ex/p> ?o .
                 { ?s <http://ex/q> ?o FILTER(?o > \"k\") }
             } }",
        )
        .unwrap();
        assert!(parsed.patterns[0].filters.is_empty());
        assert_eq!(parsed.patterns[1].filters.len(), 1);
        assert!(parsed.join_filters.is_empty());
    }

    #[test]
    fn test_decompose_rejects_describe() {
        assert!(matches!(
            decompose_query("DESCRIBE <http://ex/a>"),
            Err(Error::MalformedQuery(_))
        ));
        let ask = decompose_query("ASK { GRAPH <http://ex/g> { ?s ?p ?o } }").unwrap();
        assert_eq!(ask.form, QueryForm::Ask);
        assert_eq!(ask.atomic_queries[0].graph, PatternNode::Constant(Node::iri("http://ex/g")));
    }
}
