//! Benchmark configuration model.
//!
//! The configuration is loaded from a TOML file once at startup and passed
//! into every constructor by value or through a [`ConfigHandle`] — nothing
//! in the workspace reads ambient global state. The handle supports atomic
//! replacement so a reload never tears a config mid-read.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod model;

use std::path::Path;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::debug;

pub use model::{
    AwsConfig, BenchmarkConfig, Config, EngineKind, ProviderKind, ScalewayConfig, VllmConfig,
};

/// Errors raised while loading or checking the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML.
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required field is empty or absent.
    #[error("missing required config field: {0}")]
    Missing(&'static str),

    /// The selected provider has no matching section.
    #[error("provider '{0}' selected but its config section is missing")]
    ProviderSection(String),

    /// Neither static keys nor a named profile were supplied.
    #[error("no credentials for provider '{0}': set access/secret keys or a profile name")]
    Credentials(String),
}

impl Config {
    /// Load and structurally validate a configuration file.
    ///
    /// The raw TOML text is kept on the config so it can be shipped to
    /// instances as their startup payload.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or is
    /// missing required structure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config: Self = toml::from_str(&raw)?;
        config.raw = raw;

        debug!(
            bench_id = %config.bench_id,
            provider = %config.provider,
            "Configuration loaded"
        );

        config.check()?;
        Ok(config)
    }

    /// Structural validation: required fields and provider sections.
    /// Field-by-field value rules are the concern of the tools consuming
    /// each section.
    ///
    /// # Errors
    /// Returns [`ConfigError`] naming the first structural problem found.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.bench_id.is_empty() {
            return Err(ConfigError::Missing("bench_id"));
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::Missing("api_key"));
        }

        match self.provider {
            ProviderKind::Aws => {
                let aws = self
                    .aws
                    .as_ref()
                    .ok_or_else(|| ConfigError::ProviderSection("aws".to_string()))?;
                if aws.profile_name.is_none()
                    && (aws.access_key.is_none() || aws.secret_key.is_none())
                {
                    return Err(ConfigError::Credentials("aws".to_string()));
                }
            }
            // No structural requirements yet; provider resolution rejects
            // the selection instead.
            ProviderKind::Gcp => {}
            ProviderKind::Scaleway => {
                let scw = self
                    .scaleway
                    .as_ref()
                    .ok_or_else(|| ConfigError::ProviderSection("scaleway".to_string()))?;
                if scw.profile_name.is_none()
                    && (scw.access_key.is_none() || scw.secret_key.is_none())
                {
                    return Err(ConfigError::Credentials("scaleway".to_string()));
                }
            }
        }

        if self.engine == EngineKind::Vllm && self.vllm.is_none() {
            return Err(ConfigError::Missing("vllm"));
        }

        Ok(())
    }
}

/// Shared, atomically replaceable view of the configuration.
///
/// Readers hold an `Arc<Config>` snapshot; [`ConfigHandle::swap`] installs a
/// new config without tearing in-flight readers.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    /// Wrap a loaded configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current configuration snapshot.
    ///
    /// # Panics
    /// Panics if the lock was poisoned, which requires a panic while
    /// swapping — there is no recovery from that state.
    #[must_use]
    pub fn get(&self) -> Arc<Config> {
        Arc::clone(&self.inner.read().expect("config lock poisoned"))
    }

    /// Replace the configuration atomically.
    ///
    /// # Panics
    /// Panics if the lock was poisoned.
    pub fn swap(&self, config: Config) {
        *self.inner.write().expect("config lock poisoned") = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            bench_id = "bench-42"
            provider = "scaleway"
            inference_engine = "vllm"
            api_key = "secret"

            [scaleway]
            zone = "fr-par-1"
            project_id = "proj-1"
            organization_id = "org-1"
            access_key = "SCWXXX"
            secret_key = "deadbeef"
            cpu_commercial_type = "DEV1-L"
            gpu_commercial_type = "H100-1-80G"
            base_commercial_type = "DEV1-S"
            base_image = "ubuntu_noble"

            [vllm]
            model = "meta-llama/Llama-3.1-8B"
            max-model-len = 4096

            [benchmark]
            token = "hf_xxx"
            dataset-name = "sharegpt"
            dataset-path = "anon8231489123/ShareGPT_Vicuna_unfiltered"
            hf-revision = "main"
            hf-split = "train"
            num-prompts = 200
            seed = 42
        "#
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.bench_id, "bench-42");
        assert_eq!(config.provider, ProviderKind::Scaleway);
        assert_eq!(config.engine, EngineKind::Vllm);
        assert_eq!(
            config.vllm.as_ref().unwrap().model,
            "meta-llama/Llama-3.1-8B"
        );
        assert_eq!(config.benchmark.num_prompts, 200);
        config.check().unwrap();
    }

    #[test]
    fn rejects_missing_provider_section() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.scaleway = None;
        assert!(matches!(
            config.check(),
            Err(ConfigError::ProviderSection(p)) if p == "scaleway"
        ));
    }

    #[test]
    fn rejects_missing_credentials() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        let scw = config.scaleway.as_mut().unwrap();
        scw.access_key = None;
        scw.profile_name = None;
        assert!(matches!(config.check(), Err(ConfigError::Credentials(_))));
    }

    #[test]
    fn handle_swaps_atomically() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        let handle = ConfigHandle::new(config);
        assert_eq!(handle.get().bench_id, "bench-42");

        let mut updated: Config = toml::from_str(minimal_toml()).unwrap();
        updated.bench_id = "bench-43".to_string();
        handle.swap(updated);
        assert_eq!(handle.get().bench_id, "bench-43");
    }
}
