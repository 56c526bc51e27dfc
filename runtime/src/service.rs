//! Service Core (§4.4): identity, `serve`, `ask`, `answer`, `wait_for_answer`
//! and the reply-channel lifecycle. Grounded in the supervisor-task /
//! per-question-task shape of the teacher's `Subscription::receive`
//! (`pubsub/src/subscription.rs`) and in `original_source/octue/cloud/pub_sub/service.py`
//! for the exact method shapes and state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use octue_gax::cancel::CancellationToken;
use octue_gax::retry::{self, RetrySetting};
use uuid::Uuid;

use crate::backend::Backend;
use crate::envelope::{Answer, LogRecordPayload, MonitorPayload, Question, FORWARD_LOGS_ATTRIBUTE, KIND_ATTRIBUTE, MessageKind, QUESTION_UUID_ATTRIBUTE};
use crate::error::RuntimeError;
use crate::exceptions::ExceptionMapping;
use crate::log_forward::{reemit_log_record, AnalysisLogHandler, HandleMonitorMessage, MonitorValidator};
use crate::naming;
use crate::transport::{BoxFuture, SubscriptionHandle, SubscriptionMode, Transport, TopicHandle};

/// Output of a successful run-function invocation (§4.4.4).
#[derive(Debug, Clone, Default)]
pub struct RunFunctionOutput {
    pub output_values: Option<serde_json::Value>,
    pub output_manifest: Option<String>,
}

/// What a run-function invocation raises, carrying enough to reconstruct a
/// remote exception on the asker (§4.2, §9).
#[derive(Debug, Clone)]
pub struct RunFunctionFailure {
    pub exception_type: String,
    pub message: String,
    pub traceback: Vec<String>,
}

pub type RunFunctionResult = Result<RunFunctionOutput, RunFunctionFailure>;

/// The user-supplied analysis function (§4.4.4): `(input_values,
/// input_manifest, analysis_log_handler, handle_monitor_message)`.
pub type RunFunction = Arc<dyn Fn(Option<serde_json::Value>, Option<String>, AnalysisLogHandler, HandleMonitorMessage) -> BoxFuture<'static, RunFunctionResult> + Send + Sync>;

/// Everything `wait_for_answer` needs to re-publish the original question if
/// no delivery acknowledgement arrives in time (§4.4.5). `ask` returns this
/// alongside the reply subscription and question uuid; the spec's narrower
/// `(reply_sub, question_uuid)` signature is preserved as the first two
/// elements of [`AskResult`] (see DESIGN.md for this extension's rationale).
#[derive(Debug, Clone)]
pub struct RedeliverQuestion {
    topic: TopicHandle,
    data: Vec<u8>,
    attributes: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct AskResult {
    pub reply_subscription: SubscriptionHandle,
    pub question_uuid: String,
    pub redeliver: RedeliverQuestion,
}

/// Invoked by the asker for every monitor payload received while streaming
/// an answer (§4.4.5).
pub type MonitorCallback = Arc<dyn Fn(MonitorPayload) + Send + Sync>;

/// The actor owning one identity, one transport, one optional run function
/// and one credentials source (§4.4.1).
pub struct ServiceCore {
    id: String,
    backend: Backend,
    transport: Arc<dyn Transport>,
    run_function: Option<RunFunction>,
    exceptions: ExceptionMapping,
}

impl ServiceCore {
    pub fn new(backend: Backend, transport: Arc<dyn Transport>, run_function: Option<RunFunction>, id: Option<&str>) -> Result<Self, RuntimeError> {
        let id = naming::namespaced_id(id)?;
        Ok(Self {
            id,
            backend,
            transport,
            run_function,
            exceptions: ExceptionMapping::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// §4.4.2. One supervisor task (this future) spawns one task per
    /// question; cancelling `cancel` stops new questions from being pulled
    /// off the subscription. Answers already in flight run to completion.
    pub async fn serve(self: &Arc<Self>, cancel: CancellationToken, timeout: Option<Duration>, cleanup_on_exit: bool) -> Result<(), RuntimeError> {
        let run_function = self
            .run_function
            .clone()
            .ok_or_else(|| RuntimeError::InvalidArgument("serve requires a run function".to_string()))?;

        let topic = self.transport.create_topic(&naming::server_topic_name(&self.id), true).await?;
        let subscription_name = format!("{}.server", self.id);
        let subscription = self
            .transport
            .create_subscription(&topic, &subscription_name, true, SubscriptionMode::Pull, None)
            .await?;

        let this = self.clone();
        let callback = Arc::new(move |message: crate::transport::ReceivedMessage, question_cancel: CancellationToken| -> BoxFuture<'static, ()> {
            let this = this.clone();
            Box::pin(async move {
                let question_uuid = match message.attribute(QUESTION_UUID_ATTRIBUTE) {
                    Some(value) => value.to_string(),
                    None => {
                        tracing::warn!(service = %this.id, "dropping question with no question_uuid attribute");
                        return;
                    }
                };
                let forward_logs = message.attribute(FORWARD_LOGS_ATTRIBUTE).map(|v| v != "false").unwrap_or(true);

                let question = match Question::from_bytes(&message.data) {
                    Ok(question) => question,
                    Err(error) => {
                        tracing::warn!(service = %this.id, %error, "dropping malformed question");
                        return;
                    }
                };

                let run_function = run_function.clone();
                tokio::spawn(async move {
                    if let Err(error) = this
                        .answer(run_function, question.input_values, question.input_manifest, &question_uuid, forward_logs, Duration::from_secs(30))
                        .await
                    {
                        tracing::error!(service = %this.id, %question_uuid, %error, "failed to answer question");
                    }
                    let _ = question_cancel;
                });
            })
        });

        let streaming = self.transport.subscribe(&subscription, cancel.clone(), callback).await?;

        match timeout {
            Some(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            None => cancel.cancelled().await,
        }

        streaming.stop().await;

        if cleanup_on_exit {
            self.transport.delete_subscription(&subscription).await?;
            self.transport.delete_topic(&topic).await?;
        }

        Ok(())
    }

    /// §4.4.3.
    #[allow(clippy::too_many_arguments)]
    pub async fn ask(
        &self,
        cancel: CancellationToken,
        child_id: &str,
        input_values: Option<serde_json::Value>,
        input_manifest: Option<String>,
        manifest_all_datasets_in_cloud: bool,
        allow_local_files: bool,
        forward_logs: bool,
        question_uuid: Option<String>,
        timeout: Duration,
    ) -> Result<AskResult, RuntimeError> {
        let child_id = naming::namespaced_id(Some(child_id))?;

        if input_manifest.is_some() && !manifest_all_datasets_in_cloud && !allow_local_files {
            return Err(RuntimeError::FileLocationError);
        }

        if !self.transport.topic_exists(&child_id).await? {
            return Err(RuntimeError::ServiceNotFound(child_id));
        }
        let child_topic = TopicHandle { name: child_id.clone() };

        let question_uuid = question_uuid.unwrap_or_else(|| Uuid::new_v4().to_string());
        let reply_name = naming::reply_channel_name(&child_id, &question_uuid);
        let reply_topic = self.transport.create_topic(&reply_name, false).await?;
        let reply_subscription = self
            .transport
            .create_subscription(&reply_topic, &reply_name, false, SubscriptionMode::Pull, None)
            .await?;

        let question = Question { input_values, input_manifest };
        let data = question.to_bytes()?;

        let mut attributes = HashMap::new();
        attributes.insert(QUESTION_UUID_ATTRIBUTE.to_string(), question_uuid.clone());
        attributes.insert(FORWARD_LOGS_ATTRIBUTE.to_string(), forward_logs.to_string());

        publish_with_retry(&self.transport, &child_topic, data.clone(), attributes.clone(), RetrySetting::for_deadline(timeout), Some(cancel)).await?;

        Ok(AskResult {
            reply_subscription,
            question_uuid,
            redeliver: RedeliverQuestion {
                topic: child_topic,
                data,
                attributes,
            },
        })
    }

    /// §4.4.4 (server side). Never lets the run function's failure - or
    /// panic - escape; both become a terminal error envelope.
    async fn answer(
        &self,
        run_function: RunFunction,
        input_values: Option<serde_json::Value>,
        input_manifest: Option<String>,
        question_uuid: &str,
        forward_logs: bool,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let reply_topic = TopicHandle { name: naming::reply_channel_name(&self.id, question_uuid) };
        let retry = RetrySetting::for_deadline(timeout);

        publish_intermediate(&self.transport, &reply_topic, MessageKind::DeliveryAck, Vec::new(), retry.clone()).await?;

        let (log_sender, log_receiver) = async_channel::unbounded::<LogRecordPayload>();
        let (monitor_sender, monitor_receiver) = async_channel::unbounded::<MonitorPayload>();

        let logs = AnalysisLogHandler::new(&self.id, log_sender);
        let monitor = HandleMonitorMessage::new(monitor_sender, None, logs.clone());

        let log_forwarder = {
            let transport = self.transport.clone();
            let reply_topic = reply_topic.clone();
            let retry = retry.clone();
            tokio::spawn(async move {
                while let Ok(payload) = log_receiver.recv().await {
                    if !forward_logs {
                        continue;
                    }
                    if let Ok(bytes) = payload.to_bytes() {
                        let _ = publish_intermediate(&transport, &reply_topic, MessageKind::LogRecord, bytes, retry.clone()).await;
                    }
                }
            })
        };

        let monitor_forwarder = {
            let transport = self.transport.clone();
            let reply_topic = reply_topic.clone();
            let retry = retry.clone();
            tokio::spawn(async move {
                while let Ok(payload) = monitor_receiver.recv().await {
                    if let Ok(bytes) = serde_json::to_vec(&payload) {
                        let _ = publish_intermediate(&transport, &reply_topic, MessageKind::Monitor, bytes, retry.clone()).await;
                    }
                }
            })
        };

        let invocation = run_function(input_values, input_manifest, logs, monitor);
        let outcome = match tokio::spawn(invocation).await {
            Ok(Ok(output)) => Answer::ok(output.output_values, output.output_manifest),
            Ok(Err(failure)) => Answer::err(failure.exception_type, failure.message, failure.traceback),
            Err(join_error) => Answer::err("RunFunctionPanicked", join_error.to_string(), Vec::new()),
        };

        let _ = log_forwarder.await;
        let _ = monitor_forwarder.await;

        let kind = match &outcome {
            Answer::Ok { .. } => MessageKind::Result,
            Answer::Err { .. } => MessageKind::Error,
        };
        publish_intermediate(&self.transport, &reply_topic, kind, outcome.to_bytes()?, retry).await
    }

    /// §4.4.5.
    #[allow(clippy::too_many_arguments)]
    pub async fn wait_for_answer(
        &self,
        cancel: CancellationToken,
        ask: &AskResult,
        timeout: Duration,
        delivery_ack_timeout: Duration,
        retry_interval: Duration,
        max_redeliveries: u32,
        monitor_handler: Option<MonitorCallback>,
        monitor_validator: Option<MonitorValidator>,
    ) -> Result<Answer, RuntimeError> {
        if self.transport.subscription_mode(&ask.reply_subscription) == SubscriptionMode::Push {
            let _ = self.transport.delete_subscription(&ask.reply_subscription).await;
            let _ = self.transport.delete_topic(&TopicHandle { name: ask.reply_subscription.topic_name.clone() }).await;
            return Err(RuntimeError::PushSubscriptionCannotBePulled);
        }

        let result = self
            .pull_until_terminal(&cancel, ask, timeout, delivery_ack_timeout, retry_interval, max_redeliveries, monitor_handler, monitor_validator)
            .await;

        let _ = self.transport.delete_subscription(&ask.reply_subscription).await;
        let _ = self.transport.delete_topic(&TopicHandle { name: ask.reply_subscription.topic_name.clone() }).await;

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn pull_until_terminal(
        &self,
        cancel: &CancellationToken,
        ask: &AskResult,
        timeout: Duration,
        delivery_ack_timeout: Duration,
        retry_interval: Duration,
        max_redeliveries: u32,
        monitor_handler: Option<MonitorCallback>,
        monitor_validator: Option<MonitorValidator>,
    ) -> Result<Answer, RuntimeError> {
        let overall_deadline = tokio::time::Instant::now() + timeout;

        // Phase A: delivery acknowledgement, with a bounded number of re-asks.
        let mut redeliveries = 0;
        'delivery: loop {
            let ack_deadline = tokio::time::Instant::now() + delivery_ack_timeout;
            loop {
                if tokio::time::Instant::now() >= overall_deadline {
                    return Err(RuntimeError::AnswerTimeout);
                }
                let remaining = ack_deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let messages = self.pull(cancel, &ask.reply_subscription, remaining.min(retry_interval)).await?;
                for message in &messages {
                    self.transport.acknowledge(&ask.reply_subscription, vec![message.ack_id.clone()]).await?;
                }

                // A single pull can bundle the delivery ack together with a
                // terminal result/error (or log/monitor messages) in one
                // batch. Classify every message before deciding whether to
                // leave the delivery-ack phase, so a terminal answer that
                // arrived alongside the ack is returned rather than quietly
                // dropped while Phase B waits for a message already consumed.
                let mut saw_delivery_ack = false;
                let mut terminal: Option<Result<Answer, RuntimeError>> = None;
                for message in &messages {
                    if terminal.is_some() {
                        break;
                    }
                    match message.attribute(KIND_ATTRIBUTE).and_then(MessageKind::from_str) {
                        Some(MessageKind::DeliveryAck) => saw_delivery_ack = true,
                        Some(MessageKind::LogRecord) | Some(MessageKind::Monitor) => {
                            if let Err(error) = self.dispatch_non_terminal(message, monitor_handler.as_ref(), monitor_validator.as_ref()) {
                                terminal = Some(Err(error));
                            }
                        }
                        _ => {
                            terminal = Some(match Answer::from_bytes(&message.data)? {
                                answer @ Answer::Ok { .. } => Ok(answer),
                                Answer::Err { exception_type, exception_message, traceback } => {
                                    Err(self.exceptions.reconstruct(&exception_type, exception_message, traceback))
                                }
                            });
                        }
                    }
                }

                if let Some(result) = terminal {
                    return result;
                }
                if saw_delivery_ack {
                    break 'delivery;
                }
            }

            if redeliveries >= max_redeliveries {
                return Err(RuntimeError::QuestionNotDelivered);
            }
            redeliveries += 1;
            tracing::warn!(question_uuid = %ask.question_uuid, "No acknowledgement of question delivery");
            publish_with_retry(
                &self.transport,
                &ask.redeliver.topic,
                ask.redeliver.data.clone(),
                ask.redeliver.attributes.clone(),
                RetrySetting::for_deadline(delivery_ack_timeout),
                Some(cancel.clone()),
            )
            .await?;
        }

        // Phase B: stream intermediate messages until a terminal one arrives.
        loop {
            if tokio::time::Instant::now() >= overall_deadline {
                return Err(RuntimeError::AnswerTimeout);
            }
            let remaining = overall_deadline.saturating_duration_since(tokio::time::Instant::now());
            let messages = self.pull(cancel, &ask.reply_subscription, remaining.min(retry_interval)).await?;

            for message in messages {
                self.transport.acknowledge(&ask.reply_subscription, vec![message.ack_id.clone()]).await?;

                match message.attribute(KIND_ATTRIBUTE).and_then(MessageKind::from_str) {
                    Some(MessageKind::LogRecord) | Some(MessageKind::Monitor) | Some(MessageKind::DeliveryAck) => {
                        self.dispatch_non_terminal(&message, monitor_handler.as_ref(), monitor_validator.as_ref())?;
                    }
                    _ => {
                        let answer = Answer::from_bytes(&message.data)?;
                        return match answer {
                            Answer::Ok { .. } => Ok(answer),
                            Answer::Err { exception_type, exception_message, traceback } => {
                                Err(self.exceptions.reconstruct(&exception_type, exception_message, traceback))
                            }
                        };
                    }
                }
            }
        }
    }

    /// Returns `Err(RuntimeError::InvalidMonitorMessage)` if a monitor
    /// payload fails asker-side validation (§4.4.5), distinct from the
    /// emission-side validation `HandleMonitorMessage::emit` performs on the
    /// child before the message is ever sent (§4.6).
    fn dispatch_non_terminal(
        &self,
        message: &crate::transport::ReceivedMessage,
        monitor_handler: Option<&MonitorCallback>,
        monitor_validator: Option<&MonitorValidator>,
    ) -> Result<(), RuntimeError> {
        match message.attribute(KIND_ATTRIBUTE).and_then(MessageKind::from_str) {
            Some(MessageKind::LogRecord) => {
                if let Ok(payload) = LogRecordPayload::from_bytes(&message.data) {
                    reemit_log_record(&self.id, &payload);
                }
            }
            Some(MessageKind::Monitor) => {
                if let Ok(payload) = serde_json::from_slice::<MonitorPayload>(&message.data) {
                    if let Some(validator) = monitor_validator {
                        if let Err(reason) = validator(&payload) {
                            return Err(RuntimeError::InvalidMonitorMessage(reason));
                        }
                    }
                    if let Some(handler) = monitor_handler {
                        handler(payload);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn pull(&self, cancel: &CancellationToken, subscription: &SubscriptionHandle, deadline: Duration) -> Result<Vec<crate::transport::ReceivedMessage>, RuntimeError> {
        retry::invoke(Some(cancel.clone()), None, || {
            let transport = self.transport.clone();
            let subscription = subscription.clone();
            async move { transport.pull(&subscription, 16, deadline).await }
        })
        .await
    }
}

async fn publish_intermediate(transport: &Arc<dyn Transport>, topic: &TopicHandle, kind: MessageKind, data: Vec<u8>, retry_setting: RetrySetting) -> Result<(), RuntimeError> {
    let mut attributes = HashMap::new();
    attributes.insert(KIND_ATTRIBUTE.to_string(), kind.as_str().to_string());
    publish_with_retry(transport, topic, data, attributes, retry_setting, None).await
}

async fn publish_with_retry(
    transport: &Arc<dyn Transport>,
    topic: &TopicHandle,
    data: Vec<u8>,
    attributes: HashMap<String, String>,
    retry_setting: RetrySetting,
    cancel: Option<CancellationToken>,
) -> Result<(), RuntimeError> {
    retry::invoke(cancel, Some(retry_setting), || {
        let transport = transport.clone();
        let topic = topic.clone();
        let data = data.clone();
        let attributes = attributes.clone();
        async move { transport.publish(&topic, data, attributes).await }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::InMemoryTransport;

    fn echo_run_function() -> RunFunction {
        Arc::new(|input_values, _manifest, _logs, _monitor| -> BoxFuture<'static, RunFunctionResult> {
            Box::pin(async move {
                Ok(RunFunctionOutput {
                    output_values: input_values,
                    output_manifest: None,
                })
            })
        })
    }

    fn failing_run_function(exception_type: &'static str, message: &'static str) -> RunFunction {
        Arc::new(move |_values, _manifest, _logs, _monitor| -> BoxFuture<'static, RunFunctionResult> {
            Box::pin(async move {
                Err(RunFunctionFailure {
                    exception_type: exception_type.to_string(),
                    message: message.to_string(),
                    traceback: vec!["line 1".to_string()],
                })
            })
        })
    }

    async fn spawn_child(transport: Arc<dyn Transport>, id: &str, run_function: RunFunction) -> (Arc<ServiceCore>, CancellationToken) {
        let child = Arc::new(ServiceCore::new(Backend::in_memory(), transport, Some(run_function), Some(id)).unwrap());
        let cancel = CancellationToken::new();
        let serving = child.clone();
        let serve_cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = serving.serve(serve_cancel, None, true).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        (child, cancel)
    }

    #[tokio::test]
    async fn happy_path_round_trip_returns_the_childs_output() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let (_child, child_cancel) = spawn_child(transport.clone(), "happy-path", echo_run_function()).await;

        let asker = ServiceCore::new(Backend::in_memory(), transport, None, Some("asker")).unwrap();
        let cancel = CancellationToken::new();
        let ask = asker
            .ask(
                cancel.clone(),
                "happy-path",
                Some(serde_json::json!("Hello! It worked!")),
                None,
                true,
                false,
                true,
                None,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        let answer = asker
            .wait_for_answer(cancel, &ask, Duration::from_secs(5), Duration::from_secs(1), Duration::from_millis(50), 2, None, None)
            .await
            .unwrap();

        match answer {
            Answer::Ok { output_values, .. } => assert_eq!(output_values, Some(serde_json::json!("Hello! It worked!"))),
            Answer::Err { .. } => panic!("expected Ok"),
        }

        child_cancel.cancel();
    }

    #[tokio::test]
    async fn remote_known_exception_is_reconstructed_with_the_same_message() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let (_child, child_cancel) = spawn_child(
            transport.clone(),
            "manifest-checker",
            failing_run_function("InvalidManifestContents", "'met_mast_id' is a required property"),
        )
        .await;

        let asker = ServiceCore::new(Backend::in_memory(), transport, None, Some("asker-2")).unwrap();
        let cancel = CancellationToken::new();
        let ask = asker
            .ask(cancel.clone(), "manifest-checker", None, None, true, false, true, None, Duration::from_secs(5))
            .await
            .unwrap();

        let error = asker
            .wait_for_answer(cancel, &ask, Duration::from_secs(5), Duration::from_secs(1), Duration::from_millis(50), 2, None, None)
            .await
            .unwrap_err();

        match error {
            RuntimeError::Known { exception_type, message, .. } => {
                assert_eq!(exception_type, "InvalidManifestContents");
                assert_eq!(message, "'met_mast_id' is a required property");
            }
            other => panic!("expected Known, got {other:?}"),
        }

        child_cancel.cancel();
    }

    #[tokio::test]
    async fn remote_unknown_exception_becomes_a_generic_error() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let (_child, child_cancel) = spawn_child(
            transport.clone(),
            "flaky",
            failing_run_function("AnUnknownException", "This is an exception unknown to the asker."),
        )
        .await;

        let asker = ServiceCore::new(Backend::in_memory(), transport, None, Some("asker-3")).unwrap();
        let cancel = CancellationToken::new();
        let ask = asker.ask(cancel.clone(), "flaky", None, None, true, false, true, None, Duration::from_secs(5)).await.unwrap();

        let error = asker
            .wait_for_answer(cancel, &ask, Duration::from_secs(5), Duration::from_secs(1), Duration::from_millis(50), 2, None, None)
            .await
            .unwrap_err();

        match error {
            RuntimeError::Remote { type_name, message, .. } => {
                assert_eq!(type_name, "AnUnknownException");
                assert_eq!(message, "This is an exception unknown to the asker.");
            }
            other => panic!("expected Remote, got {other:?}"),
        }

        child_cancel.cancel();
    }

    #[tokio::test]
    async fn asking_a_service_that_does_not_exist_fails_fast() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let asker = ServiceCore::new(Backend::in_memory(), transport, None, Some("lonely-asker")).unwrap();
        let cancel = CancellationToken::new();

        let result = asker.ask(cancel, "nobody-home", None, None, true, false, true, None, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(RuntimeError::ServiceNotFound(_))));
    }

    #[tokio::test]
    async fn timeout_raises_and_still_tears_down_the_reply_channel() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        // A server topic with no subscriber consuming it: the question is
        // accepted but never answered.
        transport.create_topic("octue.services.silent", true).await.unwrap();

        let asker = ServiceCore::new(Backend::in_memory(), transport.clone(), None, Some("asker-4")).unwrap();
        let cancel = CancellationToken::new();
        let ask = asker.ask(cancel.clone(), "silent", None, None, true, false, true, None, Duration::from_millis(50)).await.unwrap();

        let result = asker
            .wait_for_answer(cancel, &ask, Duration::from_millis(50), Duration::from_millis(20), Duration::from_millis(10), 1, None, None)
            .await;

        assert!(matches!(result, Err(RuntimeError::AnswerTimeout) | Err(RuntimeError::QuestionNotDelivered)));
        assert!(!transport.topic_exists(&ask.reply_subscription.topic_name).await.unwrap());
    }

    #[tokio::test]
    async fn a_terminal_answer_bundled_with_the_delivery_ack_is_not_discarded() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        transport.create_topic("octue.services.bundling", true).await.unwrap();

        let asker = ServiceCore::new(Backend::in_memory(), transport.clone(), None, Some("asker-5")).unwrap();
        let cancel = CancellationToken::new();
        let ask = asker
            .ask(cancel.clone(), "bundling", None, None, true, false, true, None, Duration::from_secs(5))
            .await
            .unwrap();

        // Publish the delivery ack and the terminal result back to back,
        // with nobody pulling in between, so both land in the same batch the
        // first time `wait_for_answer` calls `pull`.
        let reply_topic = TopicHandle { name: ask.reply_subscription.topic_name.clone() };
        let retry = RetrySetting::for_deadline(Duration::from_secs(1));
        publish_intermediate(&transport, &reply_topic, MessageKind::DeliveryAck, Vec::new(), retry.clone()).await.unwrap();
        let answer = Answer::ok(Some(serde_json::json!("bundled")), None);
        publish_intermediate(&transport, &reply_topic, MessageKind::Result, answer.to_bytes().unwrap(), retry).await.unwrap();

        let result = asker
            .wait_for_answer(cancel, &ask, Duration::from_secs(5), Duration::from_secs(1), Duration::from_millis(50), 2, None, None)
            .await
            .unwrap();

        match result {
            Answer::Ok { output_values, .. } => assert_eq!(output_values, Some(serde_json::json!("bundled"))),
            Answer::Err { .. } => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn an_invalid_monitor_message_raises_on_the_asker_instead_of_being_silently_dropped() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        transport.create_topic("octue.services.monitoring", true).await.unwrap();

        let asker = ServiceCore::new(Backend::in_memory(), transport.clone(), None, Some("asker-6")).unwrap();
        let cancel = CancellationToken::new();
        let ask = asker
            .ask(cancel.clone(), "monitoring", None, None, true, false, true, None, Duration::from_secs(5))
            .await
            .unwrap();

        let reply_topic = TopicHandle { name: ask.reply_subscription.topic_name.clone() };
        let retry = RetrySetting::for_deadline(Duration::from_secs(1));
        publish_intermediate(&transport, &reply_topic, MessageKind::DeliveryAck, Vec::new(), retry.clone()).await.unwrap();
        publish_intermediate(&transport, &reply_topic, MessageKind::Monitor, serde_json::to_vec(&serde_json::json!({"oops": true})).unwrap(), retry)
            .await
            .unwrap();

        let validator: MonitorValidator = std::sync::Arc::new(|value| {
            if value.get("progress").is_some() {
                Ok(())
            } else {
                Err("missing 'progress' field".to_string())
            }
        });

        let result = asker
            .wait_for_answer(cancel, &ask, Duration::from_secs(5), Duration::from_secs(1), Duration::from_millis(50), 2, None, Some(validator))
            .await;

        match result {
            Err(RuntimeError::InvalidMonitorMessage(reason)) => assert!(reason.contains("progress")),
            other => panic!("expected InvalidMonitorMessage, got {other:?}"),
        }
    }
}
