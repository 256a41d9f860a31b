//! Provider trait and common types for benchmark cloud providers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use inferbench_utils::PollError;

use crate::ssh::RemoteError;

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// An operation was attempted before `init`.
    #[error("provider not initialized: call init first")]
    NotInitialized,

    /// The selected provider has no implementation.
    #[error("unsupported cloud provider: {0}")]
    Unsupported(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// No resource matches the benchmark/role tag pair.
    #[error("no {0} found for this benchmark")]
    NotFound(String),

    /// More than one resource carries the same role tag. The caller must
    /// destroy stale resources before continuing; nothing here guesses
    /// which match is current.
    #[error("{count} resources tagged role={role}; destroy stale resources first")]
    AmbiguousRole { role: InstanceRole, count: usize },

    /// Credential probe failed.
    #[error("credential check failed: {0}")]
    Credentials(String),

    /// A polling loop exhausted its budget.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled from the outside.
    #[error("operation cancelled")]
    Cancelled,

    /// A remote setup command failed.
    #[error("remote command failed: {0}")]
    Remote(#[from] RemoteError),

    /// The image build pipeline failed.
    #[error("image build failed: {0}")]
    Build(String),

    /// Aggregate of concurrent task failures. Every task ran to
    /// completion; every failure is listed.
    #[error("{} of {total} concurrent operations failed: [{}]", failures.len(), failures.join("; "))]
    Partial {
        total: usize,
        failures: Vec<String>,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PollError> for ProviderError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Timeout(bound) => Self::Timeout(bound),
            PollError::Cancelled => Self::Cancelled,
        }
    }
}

/// Role of an instance within a benchmark pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceRole {
    /// GPU host running the inference engine.
    Llm,
    /// CPU host running the benchmark workload.
    Bench,
}

impl InstanceRole {
    /// Tag value for this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Bench => "bench",
        }
    }
}

impl std::fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Requested but not yet running.
    Pending,
    /// Running; a public address is expected.
    Running,
    /// Terminated or terminating.
    Terminated,
    /// Unknown state.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Terminated => write!(f, "terminated"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A provisioned compute instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-assigned identifier.
    pub id: String,
    /// Instance name.
    pub name: String,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Role within the benchmark pair, when the role tag is present.
    pub role: Option<InstanceRole>,
    /// Public IPv4 address; absent until the instance is running.
    pub public_ip: Option<String>,
    /// Instance type / commercial type.
    pub instance_type: String,
    /// Zone or availability zone.
    pub zone: String,
    /// When the instance was created.
    pub created_at: Option<DateTime<Utc>>,
}

/// Machine image state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageState {
    Pending,
    Available,
    Failed,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ImageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Available => write!(f, "available"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A machine image produced by the build pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineImage {
    /// Provider-assigned identifier.
    pub id: String,
    /// Image name.
    pub name: String,
    /// Template instance the image was built from.
    pub source_instance_id: Option<String>,
    /// Build state.
    pub state: ImageState,
    /// When the image was created.
    pub created_at: Option<DateTime<Utc>>,
}

/// Capability interface implemented by every provider variant.
///
/// `init` must be called before any other operation; the other methods
/// fail with [`ProviderError::NotInitialized`] otherwise. All discovery is
/// tag-based and queried live — nothing is cached between calls.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Authenticate with the provider. Must be called first.
    async fn init(&mut self) -> Result<(), ProviderError>;

    /// Verify that the supplied credentials can manage instances.
    ///
    /// The probe's exact shape is a per-provider contract: AWS performs a
    /// reversible dry-run create/delete, Scaleway only lists tagged
    /// resources. Neither leaves resources behind on success.
    async fn validate_credentials(&self) -> Result<(), ProviderError>;

    /// Provision the benchmark pair: one GPU `llm` instance and one CPU
    /// `bench` instance, created concurrently, both tagged with the
    /// benchmark id and their role, each carrying the startup payload.
    async fn create(&self) -> Result<(), ProviderError>;

    /// Delete every resource tagged with the benchmark id. Fails with
    /// [`ProviderError::NotFound`] when nothing matches — silently
    /// succeeding would mask provisioning bugs.
    async fn destroy(&self) -> Result<(), ProviderError>;

    /// Build the GPU machine image via the template-instance pipeline.
    async fn create_llm_image(&self) -> Result<MachineImage, ProviderError>;

    /// Build the CPU machine image via the template-instance pipeline.
    async fn create_bench_image(&self) -> Result<MachineImage, ProviderError>;

    /// Public address of the instance tagged `llm`.
    async fn llm_instance_ip(&self) -> Result<String, ProviderError>;

    /// Public address of the instance tagged `bench`.
    async fn bench_instance_ip(&self) -> Result<String, ProviderError>;
}
