//! An in-memory bus used by tests and by the examples in this crate's own
//! test suite, grounded in the way the teacher's `Subscription` fans a topic
//! out to per-subscriber `async_channel` queues (`pubsub/src/subscription.rs`).
//! There is no real broker behind it, so redelivery, ordering guarantees
//! across subscribers, and at-least-once semantics are not modeled beyond
//! what a single `async_channel` already provides.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use octue_gax::cancel::CancellationToken;
use octue_gax::status::{Code, Status};
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::transport::{ReceivedMessage, StreamingHandle, SubscribeCallback, SubscriptionHandle, SubscriptionMode, Transport, TopicHandle};

struct TopicState {
    subscriptions: Vec<String>,
}

struct SubscriptionState {
    mode: SubscriptionMode,
    sender: async_channel::Sender<ReceivedMessage>,
    receiver: async_channel::Receiver<ReceivedMessage>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, TopicState>,
    subscriptions: HashMap<String, SubscriptionState>,
}

/// In-memory [`Transport`] implementation, suitable for unit and integration
/// tests that don't need a real cloud pub/sub project.
#[derive(Default)]
pub struct InMemoryTransport {
    state: Mutex<State>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn create_topic(&self, name: &str, allow_existing: bool) -> Result<TopicHandle, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if state.topics.contains_key(name) {
            if allow_existing {
                return Ok(TopicHandle { name: name.to_string() });
            }
            return Err(Status::new(Code::AlreadyExists, format!("topic '{name}' already exists")).into());
        }
        state.topics.insert(name.to_string(), TopicState { subscriptions: Vec::new() });
        Ok(TopicHandle { name: name.to_string() })
    }

    async fn topic_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().unwrap().topics.contains_key(name))
    }

    async fn delete_topic(&self, topic: &TopicHandle) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        match state.topics.remove(&topic.name) {
            Some(removed) => {
                for sub_name in removed.subscriptions {
                    state.subscriptions.remove(&sub_name);
                }
                Ok(())
            }
            None => Err(Status::new(Code::NotFound, format!("topic '{}' does not exist", topic.name)).into()),
        }
    }

    async fn create_subscription(
        &self,
        topic: &TopicHandle,
        name: &str,
        allow_existing: bool,
        mode: SubscriptionMode,
        _expiration: Option<Duration>,
    ) -> Result<SubscriptionHandle, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if !state.topics.contains_key(&topic.name) {
            return Err(Status::new(Code::NotFound, format!("topic '{}' does not exist", topic.name)).into());
        }
        if state.subscriptions.contains_key(name) {
            if allow_existing {
                return Ok(SubscriptionHandle { name: name.to_string(), topic_name: topic.name.clone() });
            }
            return Err(Status::new(Code::AlreadyExists, format!("subscription '{name}' already exists")).into());
        }

        let (sender, receiver) = async_channel::unbounded();
        state.subscriptions.insert(name.to_string(), SubscriptionState { mode, sender, receiver });
        state.topics.get_mut(&topic.name).unwrap().subscriptions.push(name.to_string());

        Ok(SubscriptionHandle { name: name.to_string(), topic_name: topic.name.clone() })
    }

    async fn delete_subscription(&self, subscription: &SubscriptionHandle) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if state.subscriptions.remove(&subscription.name).is_none() {
            return Err(Status::new(Code::NotFound, format!("subscription '{}' does not exist", subscription.name)).into());
        }
        if let Some(topic) = state.topics.get_mut(&subscription.topic_name) {
            topic.subscriptions.retain(|name| name != &subscription.name);
        }
        Ok(())
    }

    async fn publish(&self, topic: &TopicHandle, data: Vec<u8>, attributes: HashMap<String, String>) -> Result<(), RuntimeError> {
        let subscriptions: Vec<async_channel::Sender<ReceivedMessage>> = {
            let state = self.state.lock().unwrap();
            let topic_state = state
                .topics
                .get(&topic.name)
                .ok_or_else(|| Status::new(Code::NotFound, format!("topic '{}' does not exist", topic.name)))?;
            topic_state
                .subscriptions
                .iter()
                .map(|name| state.subscriptions.get(name).unwrap().sender.clone())
                .collect()
        };

        for sender in subscriptions {
            let message = ReceivedMessage {
                ack_id: Uuid::new_v4().to_string(),
                data: data.clone(),
                attributes: attributes.clone(),
            };
            sender
                .send(message)
                .await
                .map_err(|_| Status::new(Code::Internal, "subscriber channel closed"))?;
        }

        Ok(())
    }

    async fn pull(&self, subscription: &SubscriptionHandle, max_messages: usize, deadline: Duration) -> Result<Vec<ReceivedMessage>, RuntimeError> {
        let receiver = {
            let state = self.state.lock().unwrap();
            state
                .subscriptions
                .get(&subscription.name)
                .ok_or_else(|| Status::new(Code::NotFound, format!("subscription '{}' does not exist", subscription.name)))?
                .receiver
                .clone()
        };

        let mut out = Vec::new();
        let deadline_at = tokio::time::Instant::now() + deadline;
        while out.len() < max_messages {
            let remaining = deadline_at.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() && !out.is_empty() {
                break;
            }
            match tokio::time::timeout(remaining.max(Duration::from_millis(1)), receiver.recv()).await {
                Ok(Ok(message)) => out.push(message),
                Ok(Err(_)) => break,
                Err(_) => break,
            }
        }
        Ok(out)
    }

    async fn acknowledge(&self, subscription: &SubscriptionHandle, _ack_ids: Vec<String>) -> Result<(), RuntimeError> {
        let state = self.state.lock().unwrap();
        if !state.subscriptions.contains_key(&subscription.name) {
            return Err(Status::new(Code::NotFound, format!("subscription '{}' does not exist", subscription.name)).into());
        }
        Ok(())
    }

    async fn subscribe(&self, subscription: &SubscriptionHandle, cancel: CancellationToken, callback: SubscribeCallback) -> Result<Box<dyn StreamingHandle>, RuntimeError> {
        let receiver = {
            let state = self.state.lock().unwrap();
            state
                .subscriptions
                .get(&subscription.name)
                .ok_or_else(|| Status::new(Code::NotFound, format!("subscription '{}' does not exist", subscription.name)))?
                .receiver
                .clone()
        };

        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    received = receiver.recv() => {
                        match received {
                            Ok(message) => callback(message, task_cancel.clone()).await,
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Ok(Box::new(InMemoryStreamingHandle { cancel, handle }))
    }

    fn subscription_mode(&self, subscription: &SubscriptionHandle) -> SubscriptionMode {
        let state = self.state.lock().unwrap();
        state
            .subscriptions
            .get(&subscription.name)
            .map(|sub| sub.mode)
            .unwrap_or(SubscriptionMode::Pull)
    }
}

struct InMemoryStreamingHandle {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl StreamingHandle for InMemoryStreamingHandle {
    async fn stop(self: Box<Self>) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    #[tokio::test]
    async fn publish_then_pull_round_trips_a_message() {
        let transport = InMemoryTransport::new();
        let topic = transport.create_topic("t", false).await.unwrap();
        let sub = transport
            .create_subscription(&topic, "t-sub", false, SubscriptionMode::Pull, None)
            .await
            .unwrap();

        transport.publish(&topic, b"hello".to_vec(), Map::new()).await.unwrap();

        let messages = transport.pull(&sub, 1, Duration::from_millis(100)).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, b"hello");
    }

    #[tokio::test]
    async fn pull_returns_empty_when_nothing_published() {
        let transport = InMemoryTransport::new();
        let topic = transport.create_topic("t", false).await.unwrap();
        let sub = transport
            .create_subscription(&topic, "t-sub", false, SubscriptionMode::Pull, None)
            .await
            .unwrap();

        let messages = transport.pull(&sub, 1, Duration::from_millis(10)).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn creating_an_existing_topic_without_allow_existing_fails() {
        let transport = InMemoryTransport::new();
        transport.create_topic("t", false).await.unwrap();
        let result = transport.create_topic("t", false).await;
        assert!(result.is_err());
    }
}
