//! Transport Abstraction (§4.1): a narrow interface for topics and
//! subscriptions that every other component depends on through `Arc<dyn
//! Transport>`, grounded in the way `up-streamer-rust` hides its broker
//! behind `Arc<dyn UTransport>` and constructed the way the teacher's
//! `pubsub::Client` separates topic/subscription handles from the client
//! that created them.

pub mod memory;

#[cfg(feature = "google-cloud")]
pub mod google_pubsub;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use octue_gax::cancel::CancellationToken;

use crate::error::RuntimeError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handle to a created topic. Transports are free to store whatever
/// backend-specific path they need behind `name`; the runtime only ever
/// compares and logs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicHandle {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    Pull,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub name: String,
    pub topic_name: String,
}

/// A message pulled or streamed off a subscription, carrying enough to
/// acknowledge it and dispatch on its attributes.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
}

impl ReceivedMessage {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|value| value.as_str())
    }
}

pub type SubscribeCallback = std::sync::Arc<dyn Fn(ReceivedMessage, CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

/// A running `subscribe` invocation. Dropping or cancelling the token passed
/// to `subscribe` stops delivery; `stop` additionally waits for the
/// in-flight dispatch loop to finish.
#[async_trait]
pub trait StreamingHandle: Send + Sync {
    async fn stop(self: Box<Self>);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn create_topic(&self, name: &str, allow_existing: bool) -> Result<TopicHandle, RuntimeError>;

    async fn delete_topic(&self, topic: &TopicHandle) -> Result<(), RuntimeError>;

    /// Used by `ask` to enforce §4.4.3's `service_not_found` precondition
    /// without creating the child's topic as a side effect.
    async fn topic_exists(&self, name: &str) -> Result<bool, RuntimeError>;

    async fn create_subscription(
        &self,
        topic: &TopicHandle,
        name: &str,
        allow_existing: bool,
        mode: SubscriptionMode,
        expiration: Option<Duration>,
    ) -> Result<SubscriptionHandle, RuntimeError>;

    async fn delete_subscription(&self, subscription: &SubscriptionHandle) -> Result<(), RuntimeError>;

    async fn publish(&self, topic: &TopicHandle, data: Vec<u8>, attributes: HashMap<String, String>) -> Result<(), RuntimeError>;

    async fn pull(&self, subscription: &SubscriptionHandle, max_messages: usize, deadline: Duration) -> Result<Vec<ReceivedMessage>, RuntimeError>;

    async fn acknowledge(&self, subscription: &SubscriptionHandle, ack_ids: Vec<String>) -> Result<(), RuntimeError>;

    async fn subscribe(&self, subscription: &SubscriptionHandle, cancel: CancellationToken, callback: SubscribeCallback) -> Result<Box<dyn StreamingHandle>, RuntimeError>;

    /// Whether a previously created subscription is a push subscription,
    /// used by `wait_for_answer` to enforce §4.4.5's
    /// `push_subscription_cannot_be_pulled` precondition.
    fn subscription_mode(&self, subscription: &SubscriptionHandle) -> SubscriptionMode;
}
