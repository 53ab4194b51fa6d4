//! An in-process overlay: every peer of a grid-shaped CAN, wired through an
//! [`InMemoryNetwork`] and running on the current tokio runtime.

use rand::Rng;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::{OverlayConfig, PeerConfig};
use crate::core::{Coordinate, PeerHandle};
use crate::overlay::{OverlayBuilder, StaticTopology, ZoneProvider};
use crate::peer::Peer;
use crate::querying::OxigraphStore;
use crate::transport::{InMemoryNetwork, Transport};
use crate::{Error, Result};

pub struct EventCloud {
    network: Arc<InMemoryNetwork>,
    peers: Vec<Peer>,
    topologies: Vec<Arc<StaticTopology>>,
    services: Vec<JoinHandle<()>>,
    diameter: usize,
}

impl EventCloud {
    /// Start a uniform grid overlay. Must be called from within a tokio runtime.
    pub fn start(config: OverlayConfig) -> Result<Self> {
        config.validate()?;
        Self::with_builder(&OverlayBuilder::uniform(config.peers_per_dimension), config.peer)
    }

    /// Start an overlay with explicit split points.
    pub fn with_builder(builder: &OverlayBuilder, config: PeerConfig) -> Result<Self> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Config(
                "an event cloud must be started inside a tokio runtime".to_string(),
            ));
        }

        let handles: Vec<PeerHandle> =
            (0..builder.peer_count()).map(|i| PeerHandle::new(format!("peer-{}", i))).collect();
        let topologies: Vec<Arc<StaticTopology>> =
            builder.build(&handles)?.into_iter().map(Arc::new).collect();
        let network = Arc::new(InMemoryNetwork::new());

        let mut peers = Vec::with_capacity(handles.len());
        let mut services = Vec::with_capacity(handles.len());
        for (handle, topology) in handles.into_iter().zip(&topologies) {
            let mailbox = network.register(&handle);
            let peer = Peer::new(
                handle,
                Arc::clone(topology) as Arc<dyn ZoneProvider>,
                Arc::clone(&network) as Arc<dyn Transport>,
                Arc::new(OxigraphStore::new()?),
                config.clone(),
            );
            services.push(peer.spawn(mailbox));
            peers.push(peer);
        }

        tracing::info!(peers = peers.len(), diameter = builder.diameter(), "Event cloud started");
        Ok(Self { network, peers, topologies, services, diameter: builder.diameter() })
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn peer(&self, index: usize) -> Option<&Peer> {
        self.peers.get(index)
    }

    pub fn random_peer(&self) -> &Peer {
        let index = rand::thread_rng().gen_range(0..self.peers.len());
        &self.peers[index]
    }

    /// The network connecting the peers, for delay and failure injection.
    pub fn network(&self) -> &Arc<InMemoryNetwork> {
        &self.network
    }

    pub fn topology(&self, index: usize) -> Option<&Arc<StaticTopology>> {
        self.topologies.get(index)
    }

    /// The peer whose zone contains an exact coordinate.
    pub fn owner_of(&self, coordinate: &Coordinate) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.local_zone().contains_coordinate(coordinate))
    }

    pub fn diameter(&self) -> usize {
        self.diameter
    }

    /// Close every mailbox and wait for the service loops to end.
    pub async fn shutdown(self) {
        for peer in &self.peers {
            self.network.unregister(peer.id());
        }
        for service in self.services {
            if let Err(err) = service.await {
                tracing::warn!(error = %err, "Peer service ended abnormally");
            }
        }
        tracing::info!("Event cloud stopped");
    }
}
