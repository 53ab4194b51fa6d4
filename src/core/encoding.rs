//! Binary encoding of peer messages and content hashing.

use sha2::{Digest, Sha256};

use crate::core::{Node, Quadruple};
use crate::messages::Message;
use crate::Result;

/// Encode a message into the byte frame carried by the transport
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    Ok(bincode::serialize(message)?)
}

/// Decode a byte frame produced by [`encode_message`]
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    Ok(bincode::deserialize(bytes)?)
}

/// Correlation key shared by all quadruples of one publication.
///
/// Quadruples published together carry the same graph and publication time,
/// so matches of different sub-subscriptions triggered by one event end up
/// under the same key.
pub fn correlation_key(graph: &Node, publication_time: Option<u64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(graph.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(publication_time.unwrap_or(0).to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Content hash of a quadruple, publication time included
pub fn quadruple_hash(quad: &Quadruple) -> String {
    let mut hasher = Sha256::new();
    for node in [&quad.graph, &quad.subject, &quad.predicate, &quad.object] {
        hasher.update(node.to_string().as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(quad.publication_time.unwrap_or(0).to_le_bytes());
    hex::encode(hasher.finalize())
}
