//! The CAN overlay: zones, neighbor tables and the providers that maintain them.

pub mod neighbor_table;
pub mod topology;
pub mod zone;

pub use neighbor_table::{NeighborEntry, NeighborTable};
pub use topology::{OverlayBuilder, StaticTopology, ZoneProvider, MAX_UNIFORM_SLICES};
pub use zone::{Containment, Direction, Zone};
