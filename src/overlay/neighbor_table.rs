use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{Coordinate, Dimension, PeerHandle, PeerId};
use crate::overlay::zone::{Containment, Direction, Zone};

/// A neighbor as seen from the local peer: its handle and a snapshot of its zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub peer: PeerHandle,
    pub zone: Zone,
}

impl NeighborEntry {
    pub fn new(peer: PeerHandle, zone: Zone) -> Self {
        Self { peer, zone }
    }

    /// Number of key dimensions whose element lies outside this neighbor's zone.
    fn distance_to(&self, key: &Coordinate) -> usize {
        Dimension::ALL
            .iter()
            .filter(|&&d| {
                key.get(d).map_or(false, |e| self.zone.contains(d, e) != Containment::Inside)
            })
            .count()
    }
}

/// Neighbors indexed by (dimension, direction).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborTable {
    slots: BTreeMap<(Dimension, Direction), Vec<NeighborEntry>>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a neighbor to a slot. A peer already present in the slot is replaced.
    pub fn add(&mut self, dimension: Dimension, direction: Direction, entry: NeighborEntry) {
        let slot = self.slots.entry((dimension, direction)).or_default();
        slot.retain(|existing| existing.peer.id != entry.peer.id);
        slot.push(entry);
    }

    pub fn remove(&mut self, peer: PeerId) -> bool {
        let mut removed = false;
        for slot in self.slots.values_mut() {
            let before = slot.len();
            slot.retain(|entry| entry.peer.id != peer);
            removed |= slot.len() != before;
        }
        removed
    }

    pub fn get(&self, dimension: Dimension, direction: Direction) -> &[NeighborEntry] {
        self.slots.get(&(dimension, direction)).map_or(&[][..], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, Direction, &NeighborEntry)> {
        self.slots
            .iter()
            .flat_map(|(&(d, dir), entries)| entries.iter().map(move |entry| (d, dir, entry)))
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.iter().any(|(_, _, entry)| entry.peer.id == peer)
    }

    pub fn len(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries of one slot, the ones whose zone is closest to `key` first.
    pub fn nearest(
        &self,
        dimension: Dimension,
        direction: Direction,
        key: &Coordinate,
    ) -> Vec<&NeighborEntry> {
        let mut entries: Vec<&NeighborEntry> = self.get(dimension, direction).iter().collect();
        entries.sort_by_key(|entry| entry.distance_to(key));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Element;

    #[test]
    fn test_slots_and_nearest() {
        let (_, high) = Zone::universe().split(Dimension::Object, "m".into()).unwrap();
        let (high_low, high_high) = high.split(Dimension::Subject, "m".into()).unwrap();

        let a = PeerHandle::new("a");
        let b = PeerHandle::new("b");
        let mut table = NeighborTable::new();
        table.add(Dimension::Object, Direction::Superior, NeighborEntry::new(a.clone(), high_low));
        table.add(Dimension::Object, Direction::Superior, NeighborEntry::new(b.clone(), high_high));
        assert_eq!(table.len(), 2);
        assert!(table.get(Dimension::Object, Direction::Inferior).is_empty());

        let key = Coordinate::new([None, Some(Element::new("x")), None, Some(Element::new("z"))]);
        let nearest = table.nearest(Dimension::Object, Direction::Superior, &key);
        assert_eq!(nearest[0].peer, b);

        assert!(table.remove(b.id));
        assert!(!table.contains(b.id));
        assert!(table.contains(a.id));
    }

    #[test]
    fn test_add_replaces_same_peer() {
        let peer = PeerHandle::new("a");
        let mut table = NeighborTable::new();
        let first = NeighborEntry::new(peer.clone(), Zone::universe());
        let second = NeighborEntry::new(peer, Zone::universe());
        table.add(Dimension::Graph, Direction::Inferior, first);
        table.add(Dimension::Graph, Direction::Inferior, second);
        assert_eq!(table.len(), 1);
    }
}
