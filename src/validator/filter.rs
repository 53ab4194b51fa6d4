//! Boolean filter expressions over comparisons, evaluated against zones or bindings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::core::{Binding, Dimension, Element};
use crate::overlay::{Direction, Zone};

/// Dimension each variable of an atomic pattern is bound to.
pub type VariableDimensions = BTreeMap<String, Dimension>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    /// The operator obtained by swapping both operands: `a < b` is `b > a`.
    pub fn flipped(self) -> ComparisonOp {
        match self {
            ComparisonOp::Eq => ComparisonOp::Eq,
            ComparisonOp::Ne => ComparisonOp::Ne,
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Le => ComparisonOp::Ge,
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Ge => ComparisonOp::Le,
        }
    }

    pub fn apply(self, lhs: &Element, rhs: &Element) -> bool {
        match self {
            ComparisonOp::Eq => lhs == rhs,
            ComparisonOp::Ne => lhs != rhs,
            ComparisonOp::Lt => lhs < rhs,
            ComparisonOp::Le => lhs <= rhs,
            ComparisonOp::Gt => lhs > rhs,
            ComparisonOp::Ge => lhs >= rhs,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Variable(String),
    Constant(Element),
}

impl Operand {
    pub fn variable(name: impl Into<String>) -> Self {
        Operand::Variable(name.into())
    }

    pub fn constant(value: impl Into<Element>) -> Self {
        Operand::Constant(value.into())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Variable(name) => write!(f, "?{}", name),
            Operand::Constant(value) => write!(f, "{:?}", value.as_str()),
        }
    }
}

/// A filter expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterExpr {
    Comparison { op: ComparisonOp, lhs: Operand, rhs: Operand },
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    /// A node the validator cannot reason about, kept with its textual form.
    Unsupported(String),
}

/// A comparison rewritten as `?variable op constant`.
enum Normalized<'a> {
    VariableConstant(&'a str, ComparisonOp, &'a Element),
    Constants(&'a Element, ComparisonOp, &'a Element),
    Unsupported,
}

fn normalize<'a>(op: ComparisonOp, lhs: &'a Operand, rhs: &'a Operand) -> Normalized<'a> {
    match (lhs, rhs) {
        (Operand::Variable(v), Operand::Constant(c)) => Normalized::VariableConstant(v, op, c),
        (Operand::Constant(c), Operand::Variable(v)) => {
            Normalized::VariableConstant(v, op.flipped(), c)
        }
        (Operand::Constant(a), Operand::Constant(b)) => Normalized::Constants(a, op, b),
        (Operand::Variable(_), Operand::Variable(_)) => Normalized::Unsupported,
    }
}

/// Whether a zone may hold a value `v` with `v op constant` on `dimension`.
fn zone_admits(zone: &Zone, dimension: Dimension, op: ComparisonOp, constant: &Element) -> bool {
    let lower = zone.lower(dimension);
    let upper = zone.upper(dimension);
    match op {
        ComparisonOp::Gt => upper > constant,
        ComparisonOp::Ge => upper >= constant,
        ComparisonOp::Lt => lower < constant,
        ComparisonOp::Le => lower <= constant,
        ComparisonOp::Eq => lower <= constant && constant <= upper,
        ComparisonOp::Ne => true,
    }
}

impl FilterExpr {
    pub fn compare(op: ComparisonOp, lhs: Operand, rhs: Operand) -> Self {
        FilterExpr::Comparison { op, lhs, rhs }
    }

    pub fn and(lhs: FilterExpr, rhs: FilterExpr) -> Self {
        FilterExpr::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: FilterExpr, rhs: FilterExpr) -> Self {
        FilterExpr::Or(Box::new(lhs), Box::new(rhs))
    }

    /// Conjunction of all expressions, `None` when the list is empty.
    pub fn conjunction(exprs: impl IntoIterator<Item = FilterExpr>) -> Option<FilterExpr> {
        exprs.into_iter().reduce(FilterExpr::and)
    }

    /// Whether some point of the zone may satisfy this expression.
    ///
    /// Variables that are not mapped to a dimension cannot prune anything.
    /// Unsupported nodes reject the zone.
    pub fn validates(&self, zone: &Zone, variables: &VariableDimensions) -> bool {
        match self {
            FilterExpr::Comparison { op, lhs, rhs } => match normalize(*op, lhs, rhs) {
                Normalized::VariableConstant(var, op, constant) => match variables.get(var) {
                    Some(&dimension) => zone_admits(zone, dimension, op, constant),
                    None => true,
                },
                Normalized::Constants(a, op, b) => op.apply(a, b),
                Normalized::Unsupported => false,
            },
            FilterExpr::And(lhs, rhs) => {
                lhs.validates(zone, variables) && rhs.validates(zone, variables)
            }
            FilterExpr::Or(lhs, rhs) => {
                lhs.validates(zone, variables) || rhs.validates(zone, variables)
            }
            FilterExpr::Unsupported(_) => false,
        }
    }

    /// Direction to move in when this expression rejects the zone.
    pub fn routing_hint(
        &self,
        zone: &Zone,
        variables: &VariableDimensions,
    ) -> Option<(Dimension, Direction)> {
        if self.validates(zone, variables) {
            return None;
        }
        match self {
            FilterExpr::Comparison { op, lhs, rhs } => match normalize(*op, lhs, rhs) {
                Normalized::VariableConstant(var, op, constant) => {
                    let dimension = *variables.get(var)?;
                    let direction = match op {
                        ComparisonOp::Gt | ComparisonOp::Ge => Direction::Superior,
                        ComparisonOp::Lt | ComparisonOp::Le => Direction::Inferior,
                        ComparisonOp::Eq if constant < zone.lower(dimension) => Direction::Inferior,
                        ComparisonOp::Eq => Direction::Superior,
                        ComparisonOp::Ne => return None,
                    };
                    Some((dimension, direction))
                }
                _ => None,
            },
            FilterExpr::And(lhs, rhs) | FilterExpr::Or(lhs, rhs) => lhs
                .routing_hint(zone, variables)
                .or_else(|| rhs.routing_hint(zone, variables)),
            FilterExpr::Unsupported(_) => None,
        }
    }

    /// Evaluate against concrete values. Unbound variables make a comparison false.
    pub fn evaluate(&self, binding: &Binding) -> bool {
        match self {
            FilterExpr::Comparison { op, lhs, rhs } => {
                let resolve = |operand: &Operand| match operand {
                    Operand::Variable(name) => binding.get(name).map(Element::from),
                    Operand::Constant(value) => Some(value.clone()),
                };
                match (resolve(lhs), resolve(rhs)) {
                    (Some(a), Some(b)) => op.apply(&a, &b),
                    _ => false,
                }
            }
            FilterExpr::And(lhs, rhs) => lhs.evaluate(binding) && rhs.evaluate(binding),
            FilterExpr::Or(lhs, rhs) => lhs.evaluate(binding) || rhs.evaluate(binding),
            FilterExpr::Unsupported(_) => false,
        }
    }

    /// Replace bound variables by their values.
    pub fn substitute(&self, binding: &Binding) -> FilterExpr {
        match self {
            FilterExpr::Comparison { op, lhs, rhs } => {
                let bind = |operand: &Operand| match operand {
                    Operand::Variable(name) => binding
                        .get(name)
                        .map_or_else(|| operand.clone(), |node| Operand::Constant(node.into())),
                    Operand::Constant(_) => operand.clone(),
                };
                FilterExpr::Comparison { op: *op, lhs: bind(lhs), rhs: bind(rhs) }
            }
            FilterExpr::And(lhs, rhs) => {
                FilterExpr::and(lhs.substitute(binding), rhs.substitute(binding))
            }
            FilterExpr::Or(lhs, rhs) => {
                FilterExpr::or(lhs.substitute(binding), rhs.substitute(binding))
            }
            FilterExpr::Unsupported(text) => FilterExpr::Unsupported(text.clone()),
        }
    }

    pub fn variables(&self) -> BTreeSet<String> {
        let mut variables = BTreeSet::new();
        self.collect_variables(&mut variables);
        variables
    }

    fn collect_variables(&self, into: &mut BTreeSet<String>) {
        match self {
            FilterExpr::Comparison { lhs, rhs, .. } => {
                for operand in [lhs, rhs] {
                    if let Operand::Variable(name) = operand {
                        into.insert(name.clone());
                    }
                }
            }
            FilterExpr::And(lhs, rhs) | FilterExpr::Or(lhs, rhs) => {
                lhs.collect_variables(into);
                rhs.collect_variables(into);
            }
            FilterExpr::Unsupported(_) => {}
        }
    }

    /// First node the zone validator cannot classify, if any.
    pub fn first_unsupported(&self) -> Option<String> {
        match self {
            FilterExpr::Comparison { lhs, rhs, .. } => {
                match (lhs, rhs) {
                    (Operand::Variable(_), Operand::Variable(_)) => Some(self.to_string()),
                    _ => None,
                }
            }
            FilterExpr::And(lhs, rhs) | FilterExpr::Or(lhs, rhs) => {
                lhs.first_unsupported().or_else(|| rhs.first_unsupported())
            }
            FilterExpr::Unsupported(text) => Some(text.clone()),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.first_unsupported().is_none()
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::Comparison { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op.symbol(), rhs),
            FilterExpr::And(lhs, rhs) => write!(f, "({} && {})", lhs, rhs),
            FilterExpr::Or(lhs, rhs) => write!(f, "({} || {})", lhs, rhs),
            FilterExpr::Unsupported(text) => write!(f, "unsupported({})", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Node;

    fn subject_zone(lo: &str, hi: &str) -> Zone {
        let mut lower = std::array::from_fn(|_| Element::min());
        let mut upper = std::array::from_fn(|_| Element::max());
        lower[1] = Element::new(lo);
        upper[1] = Element::new(hi);
        Zone::new(lower, upper)
    }

    fn vars() -> VariableDimensions {
        BTreeMap::from([("s".to_string(), Dimension::Subject)])
    }

    fn cmp(op: ComparisonOp, constant: &str) -> FilterExpr {
        FilterExpr::compare(op, Operand::variable("s"), Operand::constant(constant))
    }

    #[test]
    fn test_range_filters_against_zone() {
        let zone = subject_zone("b", "n");
        assert!(cmp(ComparisonOp::Lt, "k").validates(&zone, &vars()));
        assert!(!cmp(ComparisonOp::Gt, "k").validates(&subject_zone("b", "h"), &vars()));
        assert!(!cmp(ComparisonOp::Lt, "a").validates(&zone, &vars()));
        assert!(cmp(ComparisonOp::Eq, "n").validates(&zone, &vars()));
        assert!(cmp(ComparisonOp::Ne, "c").validates(&zone, &vars()));
    }

    #[test]
    fn test_constant_on_left_is_flipped() {
        let zone = subject_zone("b", "n");
        let expr =
            FilterExpr::compare(ComparisonOp::Gt, Operand::constant("c"), Operand::variable("s"));
        // "c" > ?s holds for some ?s iff lower < "c"
        assert!(expr.validates(&zone, &vars()));
        let expr =
            FilterExpr::compare(ComparisonOp::Gt, Operand::constant("a"), Operand::variable("s"));
        assert!(!expr.validates(&zone, &vars()));
    }

    #[test]
    fn test_unmapped_variable_and_unsupported_nodes() {
        let zone = subject_zone("b", "n");
        let unmapped = FilterExpr::compare(
            ComparisonOp::Gt,
            Operand::variable("other"),
            Operand::constant("z"),
        );
        assert!(unmapped.validates(&zone, &vars()));
        assert!(!FilterExpr::Unsupported("regex(?s, \"x\")".into()).validates(&zone, &vars()));
        let var_var =
            FilterExpr::compare(ComparisonOp::Lt, Operand::variable("s"), Operand::variable("o"));
        assert!(!var_var.validates(&zone, &vars()));
        assert!(!var_var.is_supported());
    }

    #[test]
    fn test_routing_hint_points_towards_constant() {
        let zone = subject_zone("b", "n");
        assert_eq!(
            cmp(ComparisonOp::Gt, "x").routing_hint(&zone, &vars()),
            Some((Dimension::Subject, Direction::Superior))
        );
        assert_eq!(
            cmp(ComparisonOp::Le, "a").routing_hint(&zone, &vars()),
            Some((Dimension::Subject, Direction::Inferior))
        );
        assert_eq!(cmp(ComparisonOp::Lt, "k").routing_hint(&zone, &vars()), None);
    }

    #[test]
    fn test_evaluate_on_binding() {
        let binding = Binding::from([("s".to_string(), Node::literal("dog"))]);
        assert!(cmp(ComparisonOp::Gt, "cat").evaluate(&binding));
        assert!(!cmp(ComparisonOp::Eq, "cat").evaluate(&binding));
        let either = FilterExpr::or(cmp(ComparisonOp::Eq, "cat"), cmp(ComparisonOp::Eq, "dog"));
        assert!(either.evaluate(&binding));
        assert!(!cmp(ComparisonOp::Gt, "a").evaluate(&Binding::new()));
        assert_eq!(either.variables().len(), 1);
    }
}
