//! Subscriber endpoints notifications are pushed to.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::pubsub::subscription::Notification;
use crate::{Error, Result};

/// Where the notifications of one subscription go.
///
/// Delivery is fire-and-forget: the peer logs a failed push and moves on.
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;

    /// Printable description of the endpoint, stored with the subscription.
    fn endpoint(&self) -> String;
}

/// Posts notifications as JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSubscriberSink {
    url: String,
    client: reqwest::Client,
}

impl HttpSubscriberSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, Duration::from_secs(30))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url: url.into(), client })
    }
}

#[async_trait]
impl SubscriberSink for HttpSubscriberSink {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let response = self.client.post(&self.url).json(&notification).send().await?;
        if !response.status().is_success() {
            return Err(Error::Notification(format!(
                "{} answered {}",
                self.url,
                response.status()
            )));
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

/// Hands notifications to an in-process receiver.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl SubscriberSink for ChannelSink {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.sender
            .send(notification)
            .map_err(|_| Error::Notification("receiver dropped".to_string()))
    }

    fn endpoint(&self) -> String {
        "channel".to_string()
    }
}
