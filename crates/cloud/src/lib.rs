//! Cloud instance lifecycle orchestration.
//!
//! This crate provisions and tears down the benchmark instance pair (one
//! GPU `llm` host, one CPU `bench` host), builds the reusable machine
//! images they boot from, and resolves their addresses. Providers are
//! tagged variants behind one capability trait; every resource lookup is a
//! live tag query against the provider — there is no local registry.
//!
//! # Example
//!
//! ```rust,ignore
//! use inferbench_cloud::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = inferbench_config::Config::load("config.toml")?;
//!     let orchestrator = Orchestrator::new(config.into()).await?;
//!
//!     orchestrator.create().await?;
//!     let llm_ip = orchestrator.llm_instance_ip().await?;
//!     println!("LLM instance at {llm_ip}");
//!
//!     orchestrator.destroy().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod image;
pub mod orchestrator;
pub mod providers;
pub mod ssh;

pub use orchestrator::Orchestrator;
pub use providers::{
    Aws, CloudProvider, ImageState, Instance, InstanceRole, InstanceState, MachineImage,
    ProviderError, Scaleway,
};
pub use ssh::{KeyMaterial, RemoteError, RemoteExecutor};
