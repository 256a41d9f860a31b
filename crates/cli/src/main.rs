//! inferbench CLI — provision cloud instances, deploy an inference engine,
//! run a benchmark against it, and collect the results.

#![warn(clippy::pedantic)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use inferbench_cloud::{InstanceRole, Orchestrator};
use inferbench_config::Config;
use inferbench_control::ControlClient;

/// inferbench CLI — LLM inference benchmarking on cloud instances.
#[derive(Parser)]
#[command(name = "inferbench")]
#[command(about = "Provision instances and benchmark LLM inference engines")]
struct Cli {
    /// Path to the benchmark configuration file.
    #[arg(long, short, default_value = "config.toml", env = "INFERBENCH_CONFIG")]
    config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Role argument for image builds and log retrieval.
#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    /// GPU host running the inference engine.
    Llm,
    /// CPU host running the benchmark workload.
    Bench,
}

impl From<RoleArg> for InstanceRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Llm => Self::Llm,
            RoleArg::Bench => Self::Bench,
        }
    }
}

impl std::fmt::Display for RoleArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Llm => write!(f, "llm"),
            Self::Bench => write!(f, "bench"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and the cloud credentials.
    Validate,

    /// Create the benchmark instance pair (GPU llm + CPU bench).
    Create,

    /// Destroy every resource tagged with this benchmark's id.
    Destroy,

    /// Deploy the inference engine and wait until the model is ready.
    Deploy,

    /// Start the benchmark against the deployed engine.
    Run,

    /// Show the public addresses of the benchmark pair.
    Ips,

    /// Fetch archived logs from one of the instances.
    Logs {
        /// Which instance to read logs from.
        #[arg(long, value_enum, default_value_t = RoleArg::Llm)]
        role: RoleArg,
    },

    /// Fetch and validate the benchmark results.
    Results,

    /// Build the reusable machine image for a role.
    BuildImage {
        /// Which install profile to build.
        #[arg(value_enum)]
        role: RoleArg,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Arc::new(
        Config::load(&cli.config)
            .with_context(|| format!("failed to load config from {}", cli.config.display()))?,
    );

    // Ctrl-C aborts long waits (instance boots, image builds) instead of
    // leaving an unkillable poll loop behind.
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Interrupt received; aborting waits");
            token.cancel();
        });
    }

    match cli.command {
        Commands::Validate => validate(config, token).await,
        Commands::Create => create(config, token).await,
        Commands::Destroy => destroy(config, token).await,
        Commands::Deploy => deploy(config, token).await,
        Commands::Run => run(config, token).await,
        Commands::Ips => ips(config, token).await,
        Commands::Logs { role } => logs(config, token, role.into()).await,
        Commands::Results => results(config, token).await,
        Commands::BuildImage { role } => build_image(config, token, role.into()).await,
    }
}

async fn validate(config: Arc<Config>, token: CancellationToken) -> Result<()> {
    config.check().context("configuration is invalid")?;
    println!("✅ Configuration is structurally valid");

    let orchestrator = Orchestrator::with_token(config, token).await?;
    orchestrator.validate_credentials().await?;
    println!("✅ Cloud credentials can manage instances");

    Ok(())
}

async fn create(config: Arc<Config>, token: CancellationToken) -> Result<()> {
    let bench_id = config.bench_id.clone();
    let orchestrator = Orchestrator::with_token(config, token).await?;

    orchestrator.create().await?;
    println!("✅ Instance pair created for benchmark {bench_id}");
    println!("   Run 'inferbench ips' once the instances are up to get their addresses");

    Ok(())
}

async fn destroy(config: Arc<Config>, token: CancellationToken) -> Result<()> {
    let bench_id = config.bench_id.clone();
    let orchestrator = Orchestrator::with_token(config, token).await?;

    orchestrator.destroy().await?;
    println!("✅ All resources of benchmark {bench_id} destroyed");

    Ok(())
}

async fn deploy(config: Arc<Config>, token: CancellationToken) -> Result<()> {
    let client = ControlClient::new(config.api_key.clone())?;
    let engine = config.engine;
    let orchestrator = Orchestrator::with_token(config, token.clone()).await?;

    let llm_ip = orchestrator.llm_instance_ip().await?;
    let bench_ip = orchestrator.bench_instance_ip().await?;

    client.wait_for_instances(&llm_ip, &bench_ip, &token).await?;
    println!("✅ Both instances are healthy");

    client.start_engine(&llm_ip, engine).await?;
    println!("   Engine starting on {llm_ip}; waiting for the model");

    client.wait_for_model(&llm_ip, &token).await?;
    println!("✅ Model is ready on {llm_ip}");

    Ok(())
}

async fn run(config: Arc<Config>, token: CancellationToken) -> Result<()> {
    let client = ControlClient::new(config.api_key.clone())?;
    let orchestrator = Orchestrator::with_token(config, token).await?;

    let llm_ip = orchestrator.llm_instance_ip().await?;
    let bench_ip = orchestrator.bench_instance_ip().await?;

    client.start_benchmark(&bench_ip, &llm_ip).await?;
    println!("✅ Benchmark started on {bench_ip} against {llm_ip}");
    println!("   Fetch progress with 'inferbench logs --role bench'");

    Ok(())
}

async fn ips(config: Arc<Config>, token: CancellationToken) -> Result<()> {
    let orchestrator = Orchestrator::with_token(config, token).await?;

    let llm_ip = orchestrator.llm_instance_ip().await?;
    let bench_ip = orchestrator.bench_instance_ip().await?;

    println!("llm:   {llm_ip}");
    println!("bench: {bench_ip}");

    Ok(())
}

async fn logs(config: Arc<Config>, token: CancellationToken, role: InstanceRole) -> Result<()> {
    let client = ControlClient::new(config.api_key.clone())?;
    let orchestrator = Orchestrator::with_token(config, token).await?;

    let (ip, group) = match role {
        InstanceRole::Llm => (orchestrator.llm_instance_ip().await?, "vllm"),
        InstanceRole::Bench => (orchestrator.bench_instance_ip().await?, "bench"),
    };

    let logs = client.logs(&ip, group).await?;
    println!("{logs}");

    Ok(())
}

async fn results(config: Arc<Config>, token: CancellationToken) -> Result<()> {
    let client = ControlClient::new(config.api_key.clone())?;
    let orchestrator = Orchestrator::with_token(config, token).await?;

    let bench_ip = orchestrator.bench_instance_ip().await?;
    let results = client.results(&bench_ip).await?;

    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}

async fn build_image(
    config: Arc<Config>,
    token: CancellationToken,
    role: InstanceRole,
) -> Result<()> {
    let orchestrator = Orchestrator::with_token(config, token).await?;

    println!("Building the {role} image; this can take tens of minutes");
    let image = orchestrator.build_image(role).await?;

    println!("✅ Image {} ({}) is {}", image.id, image.name, image.state);
    if image.state != inferbench_cloud::ImageState::Available {
        bail!("image build finished in state {}", image.state);
    }

    Ok(())
}
