//! Zone validation.
//!
//! A [`Constraint`] describes where matching data may live: a key with
//! wildcard components, optionally narrowed by a filter expression over the
//! variables of the pattern the key was derived from. [`validates`] decides
//! whether a zone may hold such data and drives both fan-out and pruning of
//! anycast requests.

pub mod filter;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{Coordinate, Dimension};
use crate::overlay::{Containment, Direction, Zone};

pub use filter::{ComparisonOp, FilterExpr, Operand, VariableDimensions};

/// Routing constraint of an anycast request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub key: Coordinate,
    pub filter: Option<FilterExpr>,
    pub variables: VariableDimensions,
}

impl Constraint {
    /// A key-only constraint.
    pub fn key(key: Coordinate) -> Self {
        Self { key, filter: None, variables: VariableDimensions::new() }
    }

    /// A key narrowed by a filter over pattern variables.
    pub fn with_filter(key: Coordinate, filter: FilterExpr, variables: VariableDimensions) -> Self {
        Self { key, filter: Some(filter), variables }
    }

    /// The constraint every zone satisfies.
    pub fn everywhere() -> Self {
        Self::key(Coordinate::wildcard())
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{} where {}", self.key, filter),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Whether `zone` may contain data satisfying `constraint`.
pub fn validates(zone: &Zone, constraint: &Constraint) -> bool {
    zone.contains_coordinate(&constraint.key)
        && constraint.filter.as_ref().map_or(true, |f| f.validates(zone, &constraint.variables))
}

/// Directions towards zones that may validate, most specific first: fixed key
/// elements in dimension order, then the first failing filter comparison.
pub fn routing_hints(zone: &Zone, constraint: &Constraint) -> Vec<(Dimension, Direction)> {
    let mut hints: Vec<(Dimension, Direction)> = Dimension::ALL
        .iter()
        .filter_map(|&d| {
            let element = constraint.key.get(d)?;
            match zone.contains(d, element) {
                Containment::Below => Some((d, Direction::Inferior)),
                Containment::Above => Some((d, Direction::Superior)),
                Containment::Inside => None,
            }
        })
        .collect();

    if let Some(hint) =
        constraint.filter.as_ref().and_then(|f| f.routing_hint(zone, &constraint.variables))
    {
        if !hints.contains(&hint) {
            hints.push(hint);
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Element;

    fn object_zone(lo: &str, hi: &str) -> Zone {
        let mut lower = std::array::from_fn(|_| Element::min());
        let mut upper = std::array::from_fn(|_| Element::max());
        lower[3] = Element::new(lo);
        upper[3] = Element::new(hi);
        Zone::new(lower, upper)
    }

    #[test]
    fn test_key_mode() {
        let zone = object_zone("b", "n");
        let inside = Constraint::key(Coordinate::new([None, None, None, Some("c".into())]));
        let above = Constraint::key(Coordinate::new([None, None, None, Some("x".into())]));
        assert!(validates(&zone, &inside));
        assert!(!validates(&zone, &above));
        assert!(validates(&zone, &Constraint::everywhere()));
        assert_eq!(routing_hints(&zone, &above), vec![(Dimension::Object, Direction::Superior)]);
    }

    #[test]
    fn test_filter_mode_narrows_key() {
        let zone = object_zone("b", "n");
        let variables = VariableDimensions::from([("o".to_string(), Dimension::Object)]);
        let constraint = Constraint::with_filter(
            Coordinate::wildcard(),
            FilterExpr::compare(ComparisonOp::Gt, Operand::variable("o"), Operand::constant("p")),
            variables,
        );
        assert!(!validates(&zone, &constraint));
        assert_eq!(
            routing_hints(&zone, &constraint),
            vec![(Dimension::Object, Direction::Superior)]
        );
        assert!(validates(&object_zone("n", "z"), &constraint));
    }
}
