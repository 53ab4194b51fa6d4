pub mod subscription_registry;

pub use subscription_registry::{
    SubscriptionMetadata, SubscriptionRegistry, SubscriptionRegistryConfig,
    SubscriptionRegistryError,
};
