//! Child Handle (§4.5): a thin per-call wrapper around an ephemeral
//! [`ServiceCore`] that exists only to ask one child service a question and
//! wait for its answer.

use std::sync::Arc;
use std::time::Duration;

use octue_gax::cancel::CancellationToken;

use crate::backend::Backend;
use crate::envelope::Answer;
use crate::error::RuntimeError;
use crate::log_forward::MonitorValidator;
use crate::service::{AskResult, MonitorCallback, ServiceCore};
use crate::transport::Transport;

/// Knobs an asker may tune per question, mirroring §4.4.3/§4.4.5's optional
/// parameters. `Default` matches the spec's stated defaults.
#[derive(Clone)]
pub struct AskOptions {
    pub manifest_all_datasets_in_cloud: bool,
    pub allow_local_files: bool,
    pub forward_logs: bool,
    pub question_uuid: Option<String>,
    pub timeout: Duration,
    pub delivery_ack_timeout: Duration,
    pub retry_interval: Duration,
    pub max_redeliveries: u32,
    pub monitor_handler: Option<MonitorCallback>,
    /// Validates incoming monitor messages on the asker side (§4.4.5),
    /// distinct from the child-side validator `HandleMonitorMessage` applies
    /// before a monitor message is ever sent (§4.6).
    pub monitor_validator: Option<MonitorValidator>,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            manifest_all_datasets_in_cloud: true,
            allow_local_files: false,
            forward_logs: true,
            question_uuid: None,
            timeout: Duration::from_secs(60),
            delivery_ack_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(100),
            max_redeliveries: 2,
            monitor_handler: None,
            monitor_validator: None,
        }
    }
}

/// A handle identifying one child service by id. Constructing it does not
/// contact the child; each [`Child::ask`] call creates a fresh [`ServiceCore`]
/// identity scoped to that one question, per §4.5.
pub struct Child {
    id: String,
    backend: Backend,
    transport: Arc<dyn Transport>,
}

impl Child {
    pub fn new(id: impl Into<String>, backend: Backend, transport: Arc<dyn Transport>) -> Self {
        Self {
            id: id.into(),
            backend,
            transport,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Asks the child a single question and waits for its answer, per
    /// §4.5's "ask-and-wait in one call" convenience.
    pub async fn ask(
        &self,
        cancel: CancellationToken,
        input_values: Option<serde_json::Value>,
        input_manifest: Option<String>,
        options: AskOptions,
    ) -> Result<Answer, RuntimeError> {
        let asker = ServiceCore::new(self.backend.clone(), self.transport.clone(), None, None)?;

        let ask_result: AskResult = asker
            .ask(
                cancel.clone(),
                &self.id,
                input_values,
                input_manifest,
                options.manifest_all_datasets_in_cloud,
                options.allow_local_files,
                options.forward_logs,
                options.question_uuid,
                options.timeout,
            )
            .await?;

        asker
            .wait_for_answer(
                cancel,
                &ask_result,
                options.timeout,
                options.delivery_ack_timeout,
                options.retry_interval,
                options.max_redeliveries,
                options.monitor_handler,
                options.monitor_validator,
            )
            .await
    }
}
