//! Peer-to-peer message delivery.
//!
//! [`InMemoryNetwork`] connects peers of one process through tokio channels.
//! Messages are bincode-encoded on send so that every hop works on its own
//! copy, and the network can delay or drop traffic towards a peer to exercise
//! failure handling.

use dashmap::{DashMap, DashSet};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::core::{encode_message, PeerHandle, PeerId};
use crate::messages::Message;
use crate::{Error, Result};

/// Delivers messages to other peers.
///
/// Delivery is reliable and ordered per pair of peers while the target is
/// reachable. An error means the message was not handed over.
pub trait Transport: Send + Sync {
    fn send(&self, to: &PeerHandle, message: Message) -> Result<()>;
}

/// Receiving side of a peer's mailbox.
pub type Mailbox = mpsc::UnboundedReceiver<Vec<u8>>;

#[derive(Debug, Default)]
pub struct InMemoryNetwork {
    mailboxes: DashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>,
    delays: DashMap<PeerId, Duration>,
    disconnected: DashSet<PeerId>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the mailbox of a peer.
    pub fn register(&self, peer: &PeerHandle) -> Mailbox {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.mailboxes.insert(peer.id, sender);
        receiver
    }

    /// Remove a peer. Its service loop ends once the mailbox drains.
    pub fn unregister(&self, peer: PeerId) {
        self.mailboxes.remove(&peer);
        self.delays.remove(&peer);
        self.disconnected.remove(&peer);
    }

    /// Delay every message sent to `peer` by `delay`.
    pub fn set_delay(&self, peer: PeerId, delay: Duration) {
        self.delays.insert(peer, delay);
    }

    pub fn clear_delay(&self, peer: PeerId) {
        self.delays.remove(&peer);
    }

    /// Make `peer` unreachable: sends to it fail.
    pub fn disconnect(&self, peer: PeerId) {
        self.disconnected.insert(peer);
    }

    pub fn reconnect(&self, peer: PeerId) {
        self.disconnected.remove(&peer);
    }

    pub fn peer_count(&self) -> usize {
        self.mailboxes.len()
    }
}

impl Transport for InMemoryNetwork {
    fn send(&self, to: &PeerHandle, message: Message) -> Result<()> {
        if self.disconnected.contains(&to.id) {
            return Err(Error::RoutingFailure { peer: to.id, reason: "disconnected".to_string() });
        }
        let sender = self
            .mailboxes
            .get(&to.id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::RoutingFailure {
                peer: to.id,
                reason: "unknown peer".to_string(),
            })?;
        let frame = encode_message(&message)?;

        match self.delays.get(&to.id).map(|entry| *entry.value()) {
            Some(delay) => {
                let peer = to.id;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if sender.send(frame).is_err() {
                        tracing::debug!(%peer, "Delayed message dropped, mailbox closed");
                    }
                });
                Ok(())
            }
            None => sender.send(frame).map_err(|_| Error::RoutingFailure {
                peer: to.id,
                reason: "mailbox closed".to_string(),
            }),
        }
    }
}
