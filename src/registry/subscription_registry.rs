use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::core::current_time_millis;
use crate::pubsub::subscription::{Subscription, SubscriptionId};

/// Metadata associated with a registered subscription
#[derive(Debug, Clone)]
pub struct SubscriptionMetadata {
    pub subscription: Arc<Subscription>,
    pub registered_at: u64,
    pub notification_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistryConfig {
    /// Maximum number of subscriptions that can be registered
    pub max_subscriptions: Option<usize>,
}

/// Errors specific to the Subscription Registry operations
#[derive(Debug)]
pub enum SubscriptionRegistryError {
    SubscriptionNotFound(SubscriptionId),
    SubscriptionAlreadyExists(SubscriptionId),
    MaxSubscriptionsReached,
    LockPoisoned,
}

impl std::fmt::Display for SubscriptionRegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionRegistryError::SubscriptionNotFound(id) => {
                write!(f, "Subscription not found : {}", id)
            }
            SubscriptionRegistryError::SubscriptionAlreadyExists(id) => {
                write!(f, "Subscription already exists : {}", id)
            }
            SubscriptionRegistryError::MaxSubscriptionsReached => {
                write!(f, "Maximum number of registered subscriptions reached")
            }
            SubscriptionRegistryError::LockPoisoned => write!(f, "Registry lock poisoned"),
        }
    }
}

impl std::error::Error for SubscriptionRegistryError {}

impl From<SubscriptionRegistryError> for crate::Error {
    fn from(err: SubscriptionRegistryError) -> Self {
        crate::Error::Registry(err.to_string())
    }
}

/// Subscriptions whose notifications are reconstructed by this peer.
pub struct SubscriptionRegistry {
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, SubscriptionMetadata>>>,
    config: SubscriptionRegistryConfig,
}

impl SubscriptionRegistry {
    /// Create a new registry with the default configuration
    pub fn new() -> Self {
        SubscriptionRegistry {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            config: SubscriptionRegistryConfig::default(),
        }
    }

    /// Create a registry with a custom configuration
    pub fn with_config(config: SubscriptionRegistryConfig) -> Self {
        SubscriptionRegistry { subscriptions: Arc::new(RwLock::new(HashMap::new())), config }
    }

    pub fn register(
        &self,
        subscription: Subscription,
    ) -> Result<Arc<Subscription>, SubscriptionRegistryError> {
        let mut subscriptions =
            self.subscriptions.write().map_err(|_| SubscriptionRegistryError::LockPoisoned)?;
        if subscriptions.contains_key(&subscription.id) {
            return Err(SubscriptionRegistryError::SubscriptionAlreadyExists(subscription.id));
        }
        if let Some(max) = self.config.max_subscriptions {
            if subscriptions.len() >= max {
                return Err(SubscriptionRegistryError::MaxSubscriptionsReached);
            }
        }
        let subscription = Arc::new(subscription);
        subscriptions.insert(
            subscription.id,
            SubscriptionMetadata {
                subscription: Arc::clone(&subscription),
                registered_at: current_time_millis(),
                notification_count: 0,
            },
        );
        Ok(subscription)
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<Arc<Subscription>> {
        let subscriptions = self.subscriptions.read().ok()?;
        subscriptions.get(id).map(|metadata| Arc::clone(&metadata.subscription))
    }

    pub fn metadata(&self, id: &SubscriptionId) -> Option<SubscriptionMetadata> {
        self.subscriptions.read().ok()?.get(id).cloned()
    }

    pub fn unregister(
        &self,
        id: &SubscriptionId,
    ) -> Result<SubscriptionMetadata, SubscriptionRegistryError> {
        let mut subscriptions =
            self.subscriptions.write().map_err(|_| SubscriptionRegistryError::LockPoisoned)?;
        subscriptions.remove(id).ok_or(SubscriptionRegistryError::SubscriptionNotFound(*id))
    }

    /// Count a delivered notification.
    pub fn record_notification(&self, id: &SubscriptionId) {
        if let Ok(mut subscriptions) = self.subscriptions.write() {
            if let Some(metadata) = subscriptions.get_mut(id) {
                metadata.notification_count += 1;
            }
        }
    }

    pub fn list(&self) -> Vec<SubscriptionId> {
        self.subscriptions.read().map(|s| s.keys().copied().collect()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
