//! Continuous SPARQL subscriptions.
//!
//! A subscription is decomposed into atomic sub-subscriptions that are
//! indexed by the peers whose zone may receive matching quadruples. Matches
//! are signalled to the peer owning the subscription, which reconstructs the
//! full solution and notifies the subscriber.

pub mod matching;
pub mod reconstructor;
pub mod rewriter;
pub mod sink;
pub mod subscription;

pub use matching::{MatchRecord, MatchStore, SubscriptionIndex};
pub use reconstructor::{join_bindings, NotificationReconstructor, ReconstructionAction};
pub use rewriter::SubscriptionRewriter;
pub use sink::{ChannelSink, HttpSubscriberSink, SubscriberSink};
pub use subscription::{
    AtomicQuery, IndexedSubsubscription, Notification, NotificationId, NotificationKind,
    NotificationPayload, PatternNode, Subscription, SubscriptionId, Subsubscription,
};
