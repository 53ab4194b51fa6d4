//! Local quadruple storage of a peer.

pub mod oxigraph_adapter;

pub use oxigraph_adapter::OxigraphStore;

use crate::core::{Binding, Quadruple, QuadruplePattern, Triple};
use crate::Result;

/// The storage engine a peer keeps its quadruples in.
///
/// Implementations handle their own synchronization; peers call them from
/// several worker tasks at once.
pub trait LocalStore: Send + Sync {
    /// Returns false if the quadruple was already stored.
    fn add(&self, quad: &Quadruple) -> Result<bool>;
    fn remove(&self, quad: &Quadruple) -> Result<bool>;
    fn find(&self, pattern: &QuadruplePattern) -> Result<Vec<Quadruple>>;
    fn len(&self) -> Result<usize>;
    fn sparql_ask(&self, query: &str) -> Result<bool>;
    fn sparql_select(&self, query: &str) -> Result<Vec<Binding>>;
    fn sparql_construct(&self, query: &str) -> Result<Vec<Triple>>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
