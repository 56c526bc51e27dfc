//! The real [`Transport`] binding, behind the `google-cloud` feature: it
//! delegates every operation to the teacher's own published `gcloud-pubsub`
//! crate rather than re-implementing a Pub/Sub client, grounded directly in
//! `pubsub/src/client.rs`, `pubsub/src/topic.rs` and
//! `pubsub/src/subscription.rs`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gcloud_gax::cancel::CancellationToken as GCancel;
use gcloud_googleapis::pubsub::v1::PubsubMessage;
use gcloud_googleapis::Code as GCode;
use gcloud_pubsub::client::{Client, ClientConfig};
use gcloud_pubsub::subscriber::ReceivedMessage as GReceivedMessage;
use gcloud_pubsub::subscription::SubscriptionConfig;
use gcloud_pubsub::topic::TopicConfig;
use octue_gax::cancel::CancellationToken;
use octue_gax::status::{Code, Status};

use crate::backend::{Backend, CredentialsProvider};
use crate::error::RuntimeError;
use crate::transport::{BoxFuture, ReceivedMessage, StreamingHandle, SubscribeCallback, SubscriptionHandle, SubscriptionMode, Transport, TopicHandle};

fn map_code(code: GCode) -> Code {
    match code {
        GCode::Ok => Code::Ok,
        GCode::Cancelled => Code::Cancelled,
        GCode::Unknown => Code::Unknown,
        GCode::InvalidArgument => Code::InvalidArgument,
        GCode::DeadlineExceeded => Code::DeadlineExceeded,
        GCode::NotFound => Code::NotFound,
        GCode::AlreadyExists => Code::AlreadyExists,
        GCode::PermissionDenied => Code::PermissionDenied,
        GCode::ResourceExhausted => Code::ResourceExhausted,
        GCode::FailedPrecondition => Code::FailedPrecondition,
        GCode::Aborted => Code::Aborted,
        GCode::OutOfRange => Code::OutOfRange,
        GCode::Unimplemented => Code::Unimplemented,
        GCode::Internal => Code::Internal,
        GCode::Unavailable => Code::Unavailable,
        GCode::DataLoss => Code::DataLoss,
        GCode::Unauthenticated => Code::Unauthenticated,
    }
}

fn map_status(status: gcloud_googleapis::Status) -> Status {
    Status::new(map_code(status.code()), status.message().to_string())
}

fn gcancel(cancel: &CancellationToken) -> GCancel {
    let mapped = GCancel::new();
    let child = cancel.child_token();
    let mapped_clone = mapped.clone();
    tokio::spawn(async move {
        child.cancelled().await;
        mapped_clone.cancel();
    });
    mapped
}

/// Binds the runtime's [`Transport`] abstraction to a real Google Cloud
/// Pub/Sub project, via the teacher's own client rather than a bespoke one.
pub struct GoogleCloudTransport {
    client: Client,
    modes: Mutex<HashMap<String, SubscriptionMode>>,
    /// `Subscription` exposes no bulk `ack(ack_ids)` - only
    /// `subscriber::ReceivedMessage::ack(&self)` per message. `pull` stashes
    /// the teacher's own message handles here so `acknowledge` can look them
    /// back up by ack id and call their `ack()` individually.
    pending_acks: Mutex<HashMap<String, GReceivedMessage>>,
}

impl GoogleCloudTransport {
    /// Resolves `backend.credentials_source` through `credentials` before
    /// connecting, per §13's rule that the runtime itself never reads
    /// `std::env::var`. The pinned client (`pubsub/src/client.rs`) exposes no
    /// credentials field on `ClientConfig`; its underlying `auth` crate
    /// (`foundation/auth/src/credentials.rs`) discovers them by reading
    /// `GOOGLE_APPLICATION_CREDENTIALS_JSON` itself, so a resolved credential
    /// is handed off through that variable rather than read from it.
    pub async fn connect(project_id: &str, backend: &Backend, credentials: Arc<dyn CredentialsProvider>) -> Result<Self, RuntimeError> {
        if let Some(source) = &backend.credentials_source {
            if let Some(credentials_json) = credentials.credentials_for(source) {
                std::env::set_var("GOOGLE_APPLICATION_CREDENTIALS_JSON", credentials_json);
            }
        }

        let client = Client::new(project_id, Some(ClientConfig::default()))
            .await
            .map_err(|error| RuntimeError::from(Status::new(Code::Unavailable, error.to_string())))?;
        Ok(Self {
            client,
            modes: Mutex::new(HashMap::new()),
            pending_acks: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl Transport for GoogleCloudTransport {
    async fn create_topic(&self, name: &str, allow_existing: bool) -> Result<TopicHandle, RuntimeError> {
        match self.client.create_topic(GCancel::new(), name, Some(TopicConfig::default()), None).await {
            Ok(topic) => Ok(TopicHandle { name: topic.id().unwrap_or_else(|| name.to_string()) }),
            Err(status) if allow_existing && status.code() == GCode::AlreadyExists => Ok(TopicHandle { name: name.to_string() }),
            Err(status) => Err(map_status(status).into()),
        }
    }

    async fn topic_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let mut handle = self.client.topic(name);
        handle.exists().await.map_err(|status| map_status(status).into())
    }

    async fn delete_topic(&self, topic: &TopicHandle) -> Result<(), RuntimeError> {
        let mut handle = self.client.topic(&topic.name);
        handle.delete().await.map_err(|status| map_status(status).into())
    }

    async fn create_subscription(
        &self,
        topic: &TopicHandle,
        name: &str,
        allow_existing: bool,
        mode: SubscriptionMode,
        _expiration: Option<Duration>,
    ) -> Result<SubscriptionHandle, RuntimeError> {
        let fqtn = self.client.fully_qualified_topic_name(&topic.name);
        let result = self
            .client
            .create_subscription(GCancel::new(), name, &fqtn, SubscriptionConfig::default(), None)
            .await;

        match result {
            Ok(_) | Err(_) if allow_existing => {}
            Err(status) => return Err(map_status(status).into()),
            Ok(_) => {}
        }

        self.modes.lock().unwrap().insert(name.to_string(), mode);
        Ok(SubscriptionHandle { name: name.to_string(), topic_name: topic.name.clone() })
    }

    async fn delete_subscription(&self, subscription: &SubscriptionHandle) -> Result<(), RuntimeError> {
        let handle = self.client.subscription(&subscription.name);
        handle.delete(None, None).await.map_err(|status| map_status(status).into())?;
        self.modes.lock().unwrap().remove(&subscription.name);
        Ok(())
    }

    async fn publish(&self, topic: &TopicHandle, data: Vec<u8>, attributes: HashMap<String, String>) -> Result<(), RuntimeError> {
        let handle = self.client.topic(&topic.name);
        handle
            .publish(PubsubMessage {
                data,
                attributes,
                message_id: String::new(),
                publish_time: None,
                ordering_key: String::new(),
            })
            .await
            .map(|_message_id| ())
            .map_err(|status| map_status(status).into())
    }

    async fn pull(&self, subscription: &SubscriptionHandle, max_messages: usize, _deadline: Duration) -> Result<Vec<ReceivedMessage>, RuntimeError> {
        let handle = self.client.subscription(&subscription.name);
        let messages = handle
            .pull(max_messages as i32, None, None)
            .await
            .map_err(|status| RuntimeError::from(map_status(status)))?;

        let mut pending = self.pending_acks.lock().unwrap();
        Ok(messages
            .into_iter()
            .map(|message| {
                let ack_id = message.ack_id().to_string();
                let received = ReceivedMessage {
                    ack_id: ack_id.clone(),
                    data: message.message.data.clone(),
                    attributes: message.message.attributes.clone(),
                };
                pending.insert(ack_id, message);
                received
            })
            .collect())
    }

    /// `Subscription` has no bulk `ack`; only `subscriber::ReceivedMessage::ack(&self)`
    /// acks, one message at a time. An id with no cached handle (already
    /// acked, or redelivered past its ack deadline) is skipped rather than
    /// treated as an error.
    async fn acknowledge(&self, subscription: &SubscriptionHandle, ack_ids: Vec<String>) -> Result<(), RuntimeError> {
        let _ = subscription;
        for ack_id in ack_ids {
            let message = self.pending_acks.lock().unwrap().remove(&ack_id);
            if let Some(message) = message {
                message.ack().await.map_err(|status| RuntimeError::from(map_status(status)))?;
            }
        }
        Ok(())
    }

    async fn subscribe(&self, subscription: &SubscriptionHandle, cancel: CancellationToken, callback: SubscribeCallback) -> Result<Box<dyn StreamingHandle>, RuntimeError> {
        let handle = self.client.subscription(&subscription.name);
        let gcancel_token = gcancel(&cancel);
        let our_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            let _ = handle
                .receive(
                    move |message, _gcancel: GCancel| {
                        let callback = callback.clone();
                        let cancel = our_cancel.clone();
                        let ack_id = message.ack_id().to_string();
                        let data = message.message.data.clone();
                        let attributes = message.message.attributes.clone();
                        async move {
                            let received = ReceivedMessage { ack_id, data, attributes };
                            callback(received, cancel).await
                        }
                    },
                    gcancel_token,
                    None,
                )
                .await;
        });

        Ok(Box::new(GoogleCloudStreamingHandle { cancel, join }))
    }

    fn subscription_mode(&self, subscription: &SubscriptionHandle) -> SubscriptionMode {
        self.modes.lock().unwrap().get(&subscription.name).copied().unwrap_or(SubscriptionMode::Pull)
    }
}

struct GoogleCloudStreamingHandle {
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl StreamingHandle for GoogleCloudStreamingHandle {
    async fn stop(self: Box<Self>) {
        self.cancel.cancel();
        let _ = self.join.await;
    }
}

#[allow(dead_code)]
fn _assert_box_future_bound<'a>(_: BoxFuture<'a, ()>) {}
