//! Zone providers and grid-shaped overlays.

use std::sync::RwLock;

use crate::core::{Dimension, Element, PeerHandle, PeerId, DIMENSIONS};
use crate::overlay::neighbor_table::{NeighborEntry, NeighborTable};
use crate::overlay::zone::Zone;
use crate::{Error, Result};

/// Source of the local zone and the neighbor table of a peer.
///
/// Join, leave and zone reassignment are handled by whoever implements this trait.
pub trait ZoneProvider: Send + Sync {
    fn local_zone(&self) -> Zone;
    fn neighbor_table(&self) -> NeighborTable;
}

/// A fixed zone and neighbor table, editable for fault scenarios.
#[derive(Debug)]
pub struct StaticTopology {
    zone: Zone,
    neighbors: RwLock<NeighborTable>,
}

impl StaticTopology {
    pub fn new(zone: Zone, neighbors: NeighborTable) -> Self {
        Self { zone, neighbors: RwLock::new(neighbors) }
    }

    /// A single peer owning the whole space.
    pub fn standalone() -> Self {
        Self::new(Zone::universe(), NeighborTable::new())
    }

    /// Drop a neighbor, e.g. after it left the overlay.
    pub fn forget_neighbor(&self, peer: PeerId) -> bool {
        match self.neighbors.write() {
            Ok(mut table) => table.remove(peer),
            Err(_) => false,
        }
    }
}

impl ZoneProvider for StaticTopology {
    fn local_zone(&self) -> Zone {
        self.zone.clone()
    }

    fn neighbor_table(&self) -> NeighborTable {
        self.neighbors.read().map(|table| table.clone()).unwrap_or_default()
    }
}

// Printable ASCII range used for uniform split points: '0' up to 'z'.
const SPLIT_RANGE_START: u32 = 0x30;
const SPLIT_RANGE_LEN: u32 = 0x4b;

/// Most slices a uniform grid can cut one dimension into: one per character
/// of the split range.
pub const MAX_UNIFORM_SLICES: usize = SPLIT_RANGE_LEN as usize;

/// Builds a consistent partition of the coordinate space as a grid of zones.
#[derive(Debug, Clone)]
pub struct OverlayBuilder {
    split_points: [Vec<Element>; DIMENSIONS],
}

impl OverlayBuilder {
    /// `peers_per_dimension[d]` slices of equal width over printable ASCII on
    /// dimension `d`, capped at [`MAX_UNIFORM_SLICES`] so no slice is empty.
    pub fn uniform(peers_per_dimension: [usize; DIMENSIONS]) -> Self {
        let split_points = peers_per_dimension.map(|count| {
            let count = count.clamp(1, MAX_UNIFORM_SLICES) as u32;
            (1..count)
                .filter_map(|i| char::from_u32(SPLIT_RANGE_START + i * SPLIT_RANGE_LEN / count))
                .map(|c| Element::new(c.to_string()))
                .collect()
        });
        Self { split_points }
    }

    /// Replace the split points of one dimension.
    pub fn with_split_points(mut self, dimension: Dimension, mut points: Vec<Element>) -> Self {
        points.retain(|p| *p != Element::min() && !p.is_max());
        points.sort();
        points.dedup();
        self.split_points[dimension.index()] = points;
        self
    }

    pub fn slices(&self, dimension: Dimension) -> usize {
        self.split_points[dimension.index()].len() + 1
    }

    pub fn peer_count(&self) -> usize {
        Dimension::ALL.iter().map(|&d| self.slices(d)).product()
    }

    /// Longest shortest path between two peers of the grid.
    pub fn diameter(&self) -> usize {
        Dimension::ALL.iter().map(|&d| self.slices(d) - 1).sum()
    }

    fn bounds(&self, dimension: Dimension, slice: usize) -> (Element, Element) {
        let points = &self.split_points[dimension.index()];
        let lower = if slice == 0 { Element::min() } else { points[slice - 1].clone() };
        let upper = points.get(slice).cloned().unwrap_or_else(Element::max);
        (lower, upper)
    }

    /// All zones of the grid.
    pub fn zones(&self) -> Vec<Zone> {
        let mut zones = Vec::with_capacity(self.peer_count());
        for g in 0..self.slices(Dimension::Graph) {
            for s in 0..self.slices(Dimension::Subject) {
                for p in 0..self.slices(Dimension::Predicate) {
                    for o in 0..self.slices(Dimension::Object) {
                        let cell = [g, s, p, o];
                        let bounds: [(Element, Element); DIMENSIONS] =
                            std::array::from_fn(|i| self.bounds(Dimension::ALL[i], cell[i]));
                        zones.push(Zone::new(
                            bounds.clone().map(|(lower, _)| lower),
                            bounds.map(|(_, upper)| upper),
                        ));
                    }
                }
            }
        }
        zones
    }

    /// Assign one zone to each peer and compute the matching neighbor tables.
    pub fn build(&self, peers: &[PeerHandle]) -> Result<Vec<StaticTopology>> {
        let zones = self.zones();
        if peers.len() != zones.len() {
            return Err(Error::Config(format!(
                "overlay needs {} peers, got {}",
                zones.len(),
                peers.len()
            )));
        }

        let topologies = zones
            .iter()
            .enumerate()
            .map(|(i, zone)| {
                let mut table = NeighborTable::new();
                for (j, other) in zones.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    if let Some((dimension, direction)) = zone.abuts(other) {
                        table.add(
                            dimension,
                            direction,
                            NeighborEntry::new(peers[j].clone(), other.clone()),
                        );
                    }
                }
                StaticTopology::new(zone.clone(), table)
            })
            .collect();
        Ok(topologies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_grid_shape() {
        let builder = OverlayBuilder::uniform([1, 3, 2, 1]);
        assert_eq!(builder.peer_count(), 6);
        assert_eq!(builder.diameter(), 3);
        assert_eq!(builder.zones().len(), 6);
    }

    #[test]
    fn test_uniform_slices_are_never_empty() {
        let builder = OverlayBuilder::uniform([1, MAX_UNIFORM_SLICES, 1, 1]);
        assert_eq!(builder.slices(Dimension::Subject), MAX_UNIFORM_SLICES);
        for zone in builder.zones() {
            assert!(zone.lower(Dimension::Subject) < zone.upper(Dimension::Subject));
        }

        let capped = OverlayBuilder::uniform([1, 200, 1, 1]);
        assert_eq!(capped.slices(Dimension::Subject), MAX_UNIFORM_SLICES);
        assert_eq!(capped.peer_count(), MAX_UNIFORM_SLICES);
    }

    #[test]
    fn test_grid_neighbors_are_symmetric() {
        let builder = OverlayBuilder::uniform([2, 2, 2, 1]);
        let peers: Vec<PeerHandle> =
            (0..builder.peer_count()).map(|i| PeerHandle::new(format!("peer-{}", i))).collect();
        let topologies = builder.build(&peers).unwrap();

        for (i, topology) in topologies.iter().enumerate() {
            let table = topology.neighbor_table();
            // Every cell of a 2x2x2 grid has one neighbor per split dimension.
            assert_eq!(table.len(), 3);
            for (dimension, direction, entry) in table.iter() {
                let j = peers.iter().position(|p| p.id == entry.peer.id).unwrap();
                let back = topologies[j].neighbor_table();
                assert!(back
                    .get(dimension, direction.opposite())
                    .iter()
                    .any(|e| e.peer.id == peers[i].id));
            }
        }
    }

    #[test]
    fn test_build_requires_matching_peer_count() {
        let builder = OverlayBuilder::uniform([1, 2, 1, 1]);
        assert!(builder.build(&[PeerHandle::new("only")]).is_err());
    }

    #[test]
    fn test_custom_split_points() {
        let builder = OverlayBuilder::uniform([1, 1, 1, 1])
            .with_split_points(Dimension::Subject, vec!["m".into(), "c".into(), "m".into()]);
        assert_eq!(builder.slices(Dimension::Subject), 3);
        let zones = builder.zones();
        assert_eq!(zones[0].upper(Dimension::Subject), &Element::new("c"));
        assert_eq!(zones[1].lower(Dimension::Subject), &Element::new("c"));
        assert!(zones[2].upper(Dimension::Subject).is_max());
    }
}
