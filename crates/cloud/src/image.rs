//! Shared pieces of the machine-image build pipeline.
//!
//! Each provider drives the same state machine — generate key, launch a
//! template instance, wait until it runs, set it up over SSH, snapshot it
//! into an image, wait until the image is usable, clean everything up — but
//! the API calls differ. The provider-independent parts live here: the
//! install profiles, the remote setup sequence, naming, and the poll
//! policies bounding the waits.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use inferbench_config::Config;
use inferbench_utils::PollPolicy;

use crate::providers::InstanceRole;
use crate::ssh::{RemoteError, RemoteExecutor};

/// User the setup session logs in as on template instances.
pub const SSH_USER: &str = "ubuntu";

/// Bound on the template instance reaching a running state: ~10 minutes.
pub const RUNNING_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(10), 60);

/// Bound on the built image becoming usable: ~30 minutes. Image capture is
/// far slower than instance boot.
pub const IMAGE_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(30), 60);

/// Which install profile a template instance receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallProfile {
    /// GPU host: inference engine and drivers.
    Gpu,
    /// CPU host: benchmark tooling.
    Cpu,
}

impl InstallProfile {
    /// Profile for the given instance role.
    #[must_use]
    pub const fn for_role(role: InstanceRole) -> Self {
        match role {
            InstanceRole::Llm => Self::Gpu,
            InstanceRole::Bench => Self::Cpu,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
        }
    }
}

impl std::fmt::Display for InstallProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run the remote setup sequence on a freshly booted template instance:
/// fetch the install tooling, install the control agent, then run the
/// profile-specific install script. Any failing step aborts the pipeline;
/// the caller's cleanup still runs.
///
/// # Errors
/// Returns the first [`RemoteError`] encountered.
pub async fn run_remote_setup(
    executor: &RemoteExecutor,
    profile: InstallProfile,
    token: &CancellationToken,
) -> Result<(), RemoteError> {
    info!(profile = %profile, "Fetching install tooling");
    executor
        .run(
            "git clone https://github.com/heka-ai/inferbench.git /home/ubuntu/inferbench",
            token,
        )
        .await?;
    executor
        .run(
            "mv /home/ubuntu/inferbench/instance-builder/ec2 /home/ubuntu/",
            token,
        )
        .await?;

    info!(profile = %profile, "Installing the control agent");
    executor
        .run("sudo bash /home/ubuntu/ec2/api/install.sh", token)
        .await?;

    match profile {
        InstallProfile::Gpu => {
            info!("Installing the GPU inference stack");
            executor
                .run("sudo bash /home/ubuntu/ec2/gpu/install.sh", token)
                .await?;
        }
        InstallProfile::Cpu => {
            info!("Installing the CPU benchmark stack");
            executor
                .run("bash /home/ubuntu/ec2/cpu/install.sh", token)
                .await?;
        }
    }

    Ok(())
}

/// Timestamped name for an image built for `profile`.
#[must_use]
pub fn image_name(profile: InstallProfile) -> String {
    format!(
        "inferbench-{}-{}",
        profile,
        Utc::now().format("%Y-%m-%d-%H-%M-%S")
    )
}

/// Startup script injected into benchmark instances at creation: writes the
/// control-plane API key and the full benchmark configuration so the
/// instance can self-configure on boot. Providers deliver it through their
/// user-data mechanism (base64-encoded where the API requires it).
#[must_use]
pub fn startup_payload(config: &Config) -> String {
    format!(
        "#!/bin/bash\n\
         echo \"API_KEY={}\" > /home/ubuntu/.inferbench-env\n\
         cat <<'EOF' > /home/ubuntu/config.toml\n\
         {}\n\
         EOF\n",
        config.api_key, config.raw
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_follows_role() {
        assert_eq!(InstallProfile::for_role(InstanceRole::Llm), InstallProfile::Gpu);
        assert_eq!(InstallProfile::for_role(InstanceRole::Bench), InstallProfile::Cpu);
    }

    #[test]
    fn image_names_carry_profile_and_timestamp() {
        let name = image_name(InstallProfile::Gpu);
        assert!(name.starts_with("inferbench-gpu-"));
        assert!(name.len() > "inferbench-gpu-".len());
    }

    #[test]
    fn payload_embeds_key_and_config() {
        let mut config: Config = toml::from_str(
            r#"
            bench_id = "b1"
            provider = "aws"
            inference_engine = "vllm"
            api_key = "k-123"

            [benchmark]
            token = "t"
            dataset-name = "d"
            dataset-path = "p"
            hf-revision = "main"
            hf-split = "train"
            num-prompts = 1
            seed = 1
        "#,
        )
        .unwrap();
        config.raw = "bench_id = \"b1\"".to_string();

        let payload = startup_payload(&config);
        assert!(payload.contains("API_KEY=k-123"));
        assert!(payload.contains("bench_id = \"b1\""));
        assert!(payload.starts_with("#!/bin/bash"));
    }
}
