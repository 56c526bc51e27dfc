//! Backend descriptor and credentials injection (§3, §6, §13).
//!
//! Grounded in `original_source/octue/resources/service_backends.py`'s
//! `GCPPubSubBackend`. The runtime never reads the filesystem or environment
//! itself; an embedding application constructs a [`Backend`] explicitly
//! (optionally via `serde::Deserialize` from its own config file) and
//! supplies a [`CredentialsProvider`] the runtime calls when a transport
//! needs to authenticate.

use serde::Deserialize;

/// Which transport kind a [`Backend`] is configured for. Opaque to the
/// runtime beyond dispatch: the transport abstraction is the only component
/// that interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    GoogleCloudPubSub,
    InMemory,
}

/// Immutable per-service configuration of which transport to use and how to
/// authenticate to it (§3's "Backend descriptor").
#[derive(Debug, Clone, Deserialize)]
pub struct Backend {
    pub kind: TransportKind,
    pub project_id: Option<String>,
    /// Name of the environment variable a [`CredentialsProvider`] should
    /// resolve credentials for. Carried here, never read by the runtime.
    pub credentials_source: Option<String>,
}

impl Backend {
    pub fn in_memory() -> Self {
        Self {
            kind: TransportKind::InMemory,
            project_id: None,
            credentials_source: None,
        }
    }

    pub fn google_cloud_pub_sub(project_id: impl Into<String>, credentials_source: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::GoogleCloudPubSub,
            project_id: Some(project_id.into()),
            credentials_source: Some(credentials_source.into()),
        }
    }
}

/// Resolves credentials for a named environment variable. Implemented by the
/// embedding application; the runtime only ever calls this trait, per §6's
/// rule that it "MUST NOT read the filesystem directly".
pub trait CredentialsProvider: Send + Sync {
    fn credentials_for(&self, env_var_name: &str) -> Option<String>;
}

/// A provider that never resolves anything, for the in-memory transport and
/// for tests that have no real credentials to supply.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialsProvider for NoCredentials {
    fn credentials_for(&self, _env_var_name: &str) -> Option<String> {
        None
    }
}
