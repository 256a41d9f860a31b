//! Configuration types mirroring the benchmark TOML file.

use serde::{Deserialize, Serialize};

/// Cloud providers accepted by the configuration. `Gcp` parses but has no
/// implementation yet; selecting it fails fast at orchestrator
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Gcp,
    Scaleway,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::Gcp => write!(f, "gcp"),
            Self::Scaleway => write!(f, "scaleway"),
        }
    }
}

/// Supported inference engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Vllm,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vllm => write!(f, "vllm"),
        }
    }
}

/// Top-level benchmark configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Correlation key for every resource of this benchmark session.
    pub bench_id: String,
    /// Cloud provider to run against.
    pub provider: ProviderKind,
    /// Inference engine under test.
    #[serde(rename = "inference_engine")]
    pub engine: EngineKind,
    /// Key authenticating calls to the instance control-plane API.
    pub api_key: String,
    /// AWS section, required when `provider = "aws"`.
    #[serde(default)]
    pub aws: Option<AwsConfig>,
    /// Scaleway section, required when `provider = "scaleway"`.
    #[serde(default)]
    pub scaleway: Option<ScalewayConfig>,
    /// Engine flags, required when `inference_engine = "vllm"`.
    #[serde(default)]
    pub vllm: Option<VllmConfig>,
    /// Benchmark workload parameters.
    pub benchmark: BenchmarkConfig,
    /// Raw TOML text of the file this config was loaded from; shipped to
    /// instances as their startup payload. Not itself part of the schema.
    #[serde(skip)]
    pub raw: String,
}

/// AWS provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub cpu_instance_type: String,
    pub gpu_instance_type: String,
    /// AMI the GPU instance boots from.
    pub gpu_ami: String,
    /// AMI the CPU instance boots from.
    pub cpu_ami: String,
    /// Base AMI used when building new images.
    #[serde(default)]
    pub base_ami: Option<String>,
    /// Static credentials; ignored when a profile is named.
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Named shared-config profile.
    #[serde(default)]
    pub profile_name: Option<String>,
}

/// Scaleway provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalewayConfig {
    /// Zone, e.g. `fr-par-1`.
    pub zone: String,
    pub project_id: String,
    pub organization_id: String,
    /// Commercial type for the CPU (bench) instance.
    pub cpu_commercial_type: String,
    /// Commercial type for the GPU (llm) instance.
    pub gpu_commercial_type: String,
    /// Commercial type used for throwaway template instances.
    pub base_commercial_type: String,
    /// Image label the template instance boots from, e.g. `ubuntu_noble`.
    pub base_image: String,
    /// Image ids produced by the build pipeline, once known.
    #[serde(default)]
    pub gpu_image: Option<String>,
    #[serde(default)]
    pub cpu_image: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub profile_name: Option<String>,
}

/// Engine flags forwarded to `vllm serve`.
///
/// Field names double as flag names: the command builder flattens this
/// struct through its serde representation, so every field except `model`
/// becomes a `--kebab-case-flag value` pair when set. Only the commonly
/// exercised subset of the engine's surface is modeled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VllmConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_remote_code: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kv_cache_dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_model_len: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_parallel_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensor_parallel_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_prefix_caching: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_space: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_memory_utilization: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_batched_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_seqs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce_eager: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_chunked_prefill: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_scheduler_steps: Option<i64>,
}

/// Benchmark workload parameters.
///
/// Flattened into the benchmark interpreter's argv the same way
/// [`VllmConfig`] is; `token` is excluded from argv and travels through the
/// environment instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BenchmarkConfig {
    /// Hugging Face access token. Never placed on a command line.
    pub token: String,
    pub dataset_name: String,
    pub dataset_path: String,
    pub hf_revision: String,
    pub hf_split: String,
    pub num_prompts: i64,
    pub seed: i64,
}
