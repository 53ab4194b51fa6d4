//! # Semcan
//!
//! Semcan is a distributed RDF event-notification network built on a semantic
//! Content-Addressable Network (CAN).
//!
//! Peers own hyper-rectangular zones of a four dimensional keyspace
//! (graph, subject, predicate, object) and store the quadruples whose
//! coordinates fall into their zone. On top of that overlay Semcan offers:
//!
//! - anycast routing with key and SPARQL filter based zone pruning, including
//!   synchronized aggregation of the partial replies,
//! - continuous SPARQL subscriptions, decomposed into atomic sub-subscriptions
//!   indexed where matching data will land, and re-joined into notifications,
//! - one-shot SPARQL queries evaluated over the quadruples gathered by anycast.
//!
//! ## Example
//!
//! ```rust,no_run
//! use semcan::api::EventCloud;
//! use semcan::config::OverlayConfig;
//! use semcan::core::{Node, Quadruple};
//!
//! # async fn example() -> semcan::Result<()> {
//! let cloud = EventCloud::start(OverlayConfig::default())?;
//! let quad = Quadruple::new(
//!     Node::iri("http://example.org/g"),
//!     Node::iri("http://example.org/alice"),
//!     Node::iri("http://xmlns.com/foaf/0.1/name"),
//!     Node::literal("Alice"),
//! );
//! cloud.random_peer().publish(quad).await?;
//! cloud.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::new_without_default)]

/// Core data structures and types
pub mod core;

/// Configuration structures and utilities
pub mod config;

/// Zones, neighbor tables and overlay topologies
pub mod overlay;

/// Zone validation of key and filter constraints
pub mod validator;

/// Messages exchanged between peers
pub mod messages;

/// Anycast routing and reply aggregation
pub mod router;

/// Peer-to-peer message delivery
pub mod transport;

/// Local quadruple storage
pub mod querying;

/// Module for parsing SPARQL subscriptions and queries
pub mod parsing;

/// Publish/subscribe: rewriting, matching and notification reconstruction
pub mod pubsub;

/// Subscriptions owned by a peer
pub mod registry;

/// The peer service
pub mod peer;

/// In-process event cloud
pub mod api;

pub mod error {
    //! Error types and result definitions

    use thiserror::Error;

    use crate::core::PeerId;
    use crate::messages::RequestId;

    /// Result type alias for Semcan operations
    pub type Result<T> = std::result::Result<T, Error>;

    /// Main error type for Semcan
    #[derive(Debug, Error)]
    pub enum Error {
        /// A neighbor could not be reached while forwarding
        #[error("Routing failure towards peer {peer}: {reason}")]
        RoutingFailure { peer: PeerId, reason: String },

        /// A subscription that cannot be decomposed or reconstructed
        #[error("Malformed subscription: {0}")]
        MalformedSubscription(String),

        /// A filter expression the zone validator cannot classify
        #[error("Unsupported filter expression: {0}")]
        UnsupportedFilterExpression(String),

        /// An anycast request whose replies did not all arrive in time
        #[error("Aggregation of request {request} timed out with {missing} missing branches")]
        AggregationTimeout { request: RequestId, missing: usize },

        /// A quadruple RDF does not allow, such as one with a literal subject
        #[error("Invalid quadruple: {0}")]
        InvalidQuadruple(String),

        /// A SPARQL query that cannot be parsed or is not supported
        #[error("Malformed query: {0}")]
        MalformedQuery(String),

        /// Local store error
        #[error("Store error: {0}")]
        Store(String),

        /// Message encoding or decoding error
        #[error("Codec error: {0}")]
        Codec(String),

        /// Configuration error
        #[error("Configuration error: {0}")]
        Config(String),

        /// Subscriber notification error
        #[error("Notification error: {0}")]
        Notification(String),

        /// Subscription registry error
        #[error("Registry error: {0}")]
        Registry(String),

        /// The peer service is no longer running
        #[error("Peer stopped")]
        PeerStopped,

        /// IO error
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
    }

    impl From<bincode::Error> for Error {
        fn from(err: bincode::Error) -> Self {
            Error::Codec(err.to_string())
        }
    }

    impl From<serde_json::Error> for Error {
        fn from(err: serde_json::Error) -> Self {
            Error::Config(err.to_string())
        }
    }

    impl From<reqwest::Error> for Error {
        fn from(err: reqwest::Error) -> Self {
            Error::Notification(err.to_string())
        }
    }
}

// Re-export commonly used types
pub use error::{Error, Result};
