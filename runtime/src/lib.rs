//! # octue-runtime
//!
//! A messaging runtime for building distributed analysis services that
//! communicate by asking each other questions over a pub/sub transport and
//! streaming back logs, progress and a final result or error.
//!
//! * [`Transport`](transport::Transport) abstracts the pub/sub backend: an
//!   in-memory implementation ships for tests, Google Cloud Pub/Sub is
//!   available behind the `google-cloud` feature.
//! * [`ServiceCore`](service::ServiceCore) is the actor: give it an identity
//!   and a run function, then `serve` it to answer questions, or `ask` a
//!   question of another service and `wait_for_answer`.
//! * [`Child`](child::Child) is the thin per-question convenience wrapper
//!   most callers reach for instead of driving `ServiceCore` directly.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use octue_gax::cancel::CancellationToken;
//! use octue_runtime::backend::Backend;
//! use octue_runtime::child::{AskOptions, Child};
//! use octue_runtime::service::{RunFunctionOutput, RunFunctionResult, ServiceCore};
//! use octue_runtime::transport::memory::InMemoryTransport;
//! use octue_runtime::transport::Transport;
//!
//! # async fn example() -> Result<(), octue_runtime::error::RuntimeError> {
//! let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
//!
//! let run_function = Arc::new(|input_values, _manifest, _logs, _monitor| -> std::pin::Pin<Box<dyn std::future::Future<Output = RunFunctionResult> + Send>> {
//!     Box::pin(async move {
//!         Ok(RunFunctionOutput {
//!             output_values: input_values,
//!             output_manifest: None,
//!         })
//!     })
//! });
//!
//! let service = Arc::new(ServiceCore::new(Backend::in_memory(), transport.clone(), Some(run_function), Some("my-service"))?);
//! let cancel = CancellationToken::new();
//! let serving = service.clone();
//! let serve_cancel = cancel.clone();
//! tokio::spawn(async move { serving.serve(serve_cancel, None, true).await });
//!
//! let child = Child::new("my-service", Backend::in_memory(), transport);
//! let answer = child
//!     .ask(CancellationToken::new(), Some(serde_json::json!("Hello!")), None, AskOptions::default())
//!     .await?;
//! # let _ = answer;
//! # Ok(())
//! # }
//! ```
pub mod backend;
pub mod child;
pub mod envelope;
pub mod error;
pub mod exceptions;
pub mod log_forward;
pub mod naming;
pub mod service;
pub mod transport;
