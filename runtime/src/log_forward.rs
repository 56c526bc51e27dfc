//! Log/Monitor Forwarding (§4.6): sinks installed around one invocation of
//! the user run function, and the asker-side re-emission of what they
//! forward. Kept independent of the runtime's own operational `tracing`
//! output (§12) - these sinks carry the *user function's* structured log
//! records and monitor data over the reply channel, a different channel
//! entirely from this process's own logging.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::envelope::{LogRecordPayload, MonitorPayload};

/// Mirrors the Python standard library's numeric logging levels, since that
/// is the vocabulary `original_source`'s log records are framed in and the
/// wire schema (§4.2) specifies `level:int`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum LogLevel {
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

fn now_unix_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Forwards log records emitted by a single run-function invocation to its
/// reply channel. The user function calls this directly - it is not a
/// global `tracing` subscriber - so that different concurrent invocations
/// never cross-contaminate each other's forwarded logs (§5's "independent
/// log/monitor sinks" requirement).
#[derive(Clone)]
pub struct AnalysisLogHandler {
    logger: String,
    sender: async_channel::Sender<LogRecordPayload>,
}

impl AnalysisLogHandler {
    pub(crate) fn new(logger: impl Into<String>, sender: async_channel::Sender<LogRecordPayload>) -> Self {
        Self { logger: logger.into(), sender }
    }

    pub async fn emit(&self, level: LogLevel, message: impl Into<String>, exc_info: Option<String>) {
        let payload = LogRecordPayload {
            level: level as i32,
            msg: message.into(),
            created: now_unix_seconds(),
            logger: self.logger.clone(),
            exc_info,
        };
        let _ = self.sender.send(payload).await;
    }

    pub async fn debug(&self, message: impl Into<String>) {
        self.emit(LogLevel::Debug, message, None).await
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message, None).await
    }

    pub async fn warning(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warning, message, None).await
    }

    pub async fn error(&self, message: impl Into<String>, exc_info: Option<String>) {
        self.emit(LogLevel::Error, message, exc_info).await
    }
}

/// Validates a monitor payload against an application-supplied schema. The
/// runtime prescribes no schema language (§4.6 leaves it application-defined)
/// - the embedder wires in whatever validator it needs.
pub type MonitorValidator = Arc<dyn Fn(&MonitorPayload) -> Result<(), String> + Send + Sync>;

/// Forwards monitor data emitted by a single run-function invocation.
/// Validation failures are reported as an error log rather than propagated,
/// so a bad monitor message never crashes the run function, and previously
/// valid monitor messages already queued are unaffected (§4.6).
#[derive(Clone)]
pub struct HandleMonitorMessage {
    sender: async_channel::Sender<MonitorPayload>,
    validator: Option<MonitorValidator>,
    logs: AnalysisLogHandler,
}

impl HandleMonitorMessage {
    pub(crate) fn new(sender: async_channel::Sender<MonitorPayload>, validator: Option<MonitorValidator>, logs: AnalysisLogHandler) -> Self {
        Self { sender, validator, logs }
    }

    pub async fn emit(&self, payload: MonitorPayload) {
        if let Some(validator) = &self.validator {
            if let Err(reason) = validator(&payload) {
                self.logs.error(format!("monitor message failed schema validation: {reason}"), None).await;
                return;
            }
        }
        let _ = self.sender.send(payload).await;
    }
}

/// Re-emits a log record received from a child on the asker side, prefixed
/// with the child's service name so correlation is preserved, e.g.
/// `[my-super-service] Starting analysis.` (§4.6, matching the bracket
/// format exercised by `original_source`'s test suite).
pub fn reemit_log_record(service_name: &str, payload: &LogRecordPayload) {
    let prefixed = format!("[{service_name}] {}", payload.msg);
    match payload.level {
        level if level >= LogLevel::Critical as i32 || level >= LogLevel::Error as i32 => {
            tracing::error!(logger = %payload.logger, "{prefixed}");
        }
        level if level >= LogLevel::Warning as i32 => tracing::warn!(logger = %payload.logger, "{prefixed}"),
        level if level >= LogLevel::Info as i32 => tracing::info!(logger = %payload.logger, "{prefixed}"),
        _ => tracing::debug!(logger = %payload.logger, "{prefixed}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn analysis_log_handler_forwards_emitted_records_in_order() {
        let (sender, receiver) = async_channel::unbounded();
        let handler = AnalysisLogHandler::new("my-service", sender);

        handler.info("first").await;
        handler.warning("second").await;

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.msg, "first");
        assert_eq!(second.msg, "second");
        assert_eq!(first.level, LogLevel::Info as i32);
    }

    #[tokio::test]
    async fn invalid_monitor_message_is_not_forwarded() {
        let (log_sender, log_receiver) = async_channel::unbounded();
        let logs = AnalysisLogHandler::new("my-service", log_sender);
        let (sender, receiver) = async_channel::unbounded();
        let validator: MonitorValidator = Arc::new(|value| {
            if value.get("progress").is_some() {
                Ok(())
            } else {
                Err("missing 'progress' field".to_string())
            }
        });
        let monitor = HandleMonitorMessage::new(sender, Some(validator), logs);

        monitor.emit(serde_json::json!({"oops": true})).await;
        assert!(receiver.try_recv().is_err());

        let log_record = log_receiver.recv().await.unwrap();
        assert!(log_record.msg.contains("schema validation"));
    }

    #[tokio::test]
    async fn valid_monitor_messages_still_reach_the_asker_after_an_invalid_one() {
        let (log_sender, _log_receiver) = async_channel::unbounded();
        let logs = AnalysisLogHandler::new("my-service", log_sender);
        let (sender, receiver) = async_channel::unbounded();
        let validator: MonitorValidator = Arc::new(|value| {
            if value.get("progress").is_some() {
                Ok(())
            } else {
                Err("missing 'progress' field".to_string())
            }
        });
        let monitor = HandleMonitorMessage::new(sender, Some(validator), logs);

        monitor.emit(serde_json::json!({"oops": true})).await;
        monitor.emit(serde_json::json!({"progress": 0.5})).await;

        let received = receiver.recv().await.unwrap();
        assert_eq!(received, serde_json::json!({"progress": 0.5}));
    }
}
