//! Provider-agnostic instance orchestration.
//!
//! The orchestrator resolves the configured provider variant, initializes
//! it once, and forwards the lifecycle operations. It owns nothing: every
//! instance belongs to the provider that created it and is only ever
//! rediscovered through its tags.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use inferbench_config::{Config, ProviderKind};

use crate::providers::{
    Aws, CloudProvider, InstanceRole, MachineImage, ProviderError, Scaleway,
};

/// Provider-agnostic entry point for instance lifecycle operations.
pub struct Orchestrator {
    provider: Box<dyn CloudProvider>,
    token: CancellationToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Resolve and initialize the configured provider.
    ///
    /// # Errors
    /// Fails fast with [`ProviderError::Unsupported`] for providers the
    /// configuration accepts but no variant implements, and propagates any
    /// authentication failure from `init`.
    pub async fn new(config: Arc<Config>) -> Result<Self, ProviderError> {
        Self::with_token(config, CancellationToken::new()).await
    }

    /// Like [`Orchestrator::new`], with an external cancellation token that
    /// aborts long waits (instance boots, image availability).
    ///
    /// # Errors
    /// See [`Orchestrator::new`].
    pub async fn with_token(
        config: Arc<Config>,
        token: CancellationToken,
    ) -> Result<Self, ProviderError> {
        info!(provider = %config.provider, "Resolving cloud provider");

        let mut provider: Box<dyn CloudProvider> = match config.provider {
            ProviderKind::Aws => Box::new(Aws::new(Arc::clone(&config), token.clone())?),
            ProviderKind::Scaleway => {
                Box::new(Scaleway::new(Arc::clone(&config), token.clone())?)
            }
            ProviderKind::Gcp => {
                return Err(ProviderError::Unsupported(config.provider.to_string()))
            }
        };

        provider.init().await?;

        Ok(Self { provider, token })
    }

    /// Wrap an already-initialized provider. Used by tests and anything
    /// that needs a non-standard provider setup.
    #[must_use]
    pub fn from_provider(provider: Box<dyn CloudProvider>, token: CancellationToken) -> Self {
        Self { provider, token }
    }

    /// Token aborting this orchestrator's long waits.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Verify the configured credentials without leaving resources behind.
    ///
    /// # Errors
    /// Propagates the provider's probe failure.
    pub async fn validate_credentials(&self) -> Result<(), ProviderError> {
        self.provider.validate_credentials().await
    }

    /// Provision the benchmark instance pair.
    ///
    /// # Errors
    /// Propagates provisioning failures; concurrent failures arrive
    /// aggregated in [`ProviderError::Partial`].
    pub async fn create(&self) -> Result<(), ProviderError> {
        self.provider.create().await
    }

    /// Tear down every resource tagged with the benchmark id.
    ///
    /// # Errors
    /// [`ProviderError::NotFound`] when nothing matches; aggregated
    /// failures otherwise.
    pub async fn destroy(&self) -> Result<(), ProviderError> {
        self.provider.destroy().await
    }

    /// Build the machine image for `role` through the template-instance
    /// pipeline.
    ///
    /// # Errors
    /// Propagates the pipeline failure.
    pub async fn build_image(&self, role: InstanceRole) -> Result<MachineImage, ProviderError> {
        match role {
            InstanceRole::Llm => self.provider.create_llm_image().await,
            InstanceRole::Bench => self.provider.create_bench_image().await,
        }
    }

    /// Public address of the `llm` instance.
    ///
    /// # Errors
    /// [`ProviderError::NotFound`] or [`ProviderError::AmbiguousRole`].
    pub async fn llm_instance_ip(&self) -> Result<String, ProviderError> {
        self.provider.llm_instance_ip().await
    }

    /// Public address of the `bench` instance.
    ///
    /// # Errors
    /// [`ProviderError::NotFound`] or [`ProviderError::AmbiguousRole`].
    pub async fn bench_instance_ip(&self) -> Result<String, ProviderError> {
        self.provider.bench_instance_ip().await
    }
}
