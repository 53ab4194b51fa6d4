//! Zones of the coordinate space.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{Coordinate, Dimension, Element, DIMENSIONS};

/// Position of a value relative to a zone's interval on one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Containment {
    Below,
    Inside,
    Above,
}

/// Side of a zone along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Inferior,
    Superior,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Inferior, Direction::Superior];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Inferior => Direction::Superior,
            Direction::Superior => Direction::Inferior,
        }
    }
}

/// A hyper-rectangle `[lower, upper)` on every dimension.
///
/// An upper bound equal to [`Element::max`] is open-ended, so the zones of a
/// partition cover every possible key exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zone {
    lower: [Element; DIMENSIONS],
    upper: [Element; DIMENSIONS],
}

impl Zone {
    pub fn new(lower: [Element; DIMENSIONS], upper: [Element; DIMENSIONS]) -> Self {
        Self { lower, upper }
    }

    /// The whole coordinate space.
    pub fn universe() -> Self {
        Self {
            lower: std::array::from_fn(|_| Element::min()),
            upper: std::array::from_fn(|_| Element::max()),
        }
    }

    pub fn lower(&self, dimension: Dimension) -> &Element {
        &self.lower[dimension.index()]
    }

    pub fn upper(&self, dimension: Dimension) -> &Element {
        &self.upper[dimension.index()]
    }

    pub fn contains(&self, dimension: Dimension, value: &Element) -> Containment {
        if value < self.lower(dimension) {
            Containment::Below
        } else if value >= self.upper(dimension) && !self.upper(dimension).is_max() {
            Containment::Above
        } else {
            Containment::Inside
        }
    }

    /// True if every non-wildcard element of the coordinate lies inside this zone.
    pub fn contains_coordinate(&self, coordinate: &Coordinate) -> bool {
        Dimension::ALL.iter().all(|&d| {
            coordinate.get(d).map_or(true, |e| self.contains(d, e) == Containment::Inside)
        })
    }

    /// Split along `dimension` at `at`, returning the inferior and superior halves.
    pub fn split(&self, dimension: Dimension, at: Element) -> Option<(Zone, Zone)> {
        if self.contains(dimension, &at) != Containment::Inside || &at == self.lower(dimension) {
            return None;
        }
        let mut inferior = self.clone();
        let mut superior = self.clone();
        inferior.upper[dimension.index()] = at.clone();
        superior.lower[dimension.index()] = at;
        Some((inferior, superior))
    }

    fn overlaps(&self, other: &Zone, dimension: Dimension) -> bool {
        let below_other_upper =
            other.upper(dimension).is_max() || self.lower(dimension) < other.upper(dimension);
        let above_other_lower =
            self.upper(dimension).is_max() || other.lower(dimension) < self.upper(dimension);
        below_other_upper && above_other_lower
    }

    /// Where `other` lies relative to this zone if the two share a boundary
    /// hyperplane: abutting on exactly one dimension and overlapping on all others.
    pub fn abuts(&self, other: &Zone) -> Option<(Dimension, Direction)> {
        let mut found = None;
        for dimension in Dimension::ALL {
            if self.overlaps(other, dimension) {
                continue;
            }
            let direction = if self.upper(dimension) == other.lower(dimension) {
                Direction::Superior
            } else if self.lower(dimension) == other.upper(dimension) {
                Direction::Inferior
            } else {
                return None;
            };
            if found.is_some() {
                return None;
            }
            found = Some((dimension, direction));
        }
        found
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = Dimension::ALL
            .iter()
            .map(|&d| {
                let upper = if self.upper(d).is_max() { "max" } else { self.upper(d).as_str() };
                format!("[{:?}, {:?})", self.lower(d).as_str(), upper)
            })
            .collect();
        write!(f, "{}", parts.join(" x "))
    }
}
