//! AWS EC2/IAM API client implementation.
//!
//! Talks to the EC2 Query API directly over HTTP. Request signing (SigV4)
//! is not reimplemented here; credentials ride the standard headers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use inferbench_config::{AwsConfig, Config};
use inferbench_utils::constants::{BENCH_ID_TAG, MANAGED_BY_TAG, MANAGED_BY_VALUE, ROLE_TAG};
use inferbench_utils::wait_until;

use super::models::{
    AwsImage, BlockDeviceMapping, CreateImageResponse, CreateKeyPairResponse,
    DescribeImagesResponse, DescribeInstancesResponse, EbsBlockDevice, Ec2Instance,
    IamInstanceProfileSpec, RunInstancesRequest, RunInstancesResponse, Tag, TagSpecification,
};
use crate::image::{
    image_name, run_remote_setup, startup_payload, InstallProfile, IMAGE_POLICY, RUNNING_POLICY,
    SSH_USER,
};
use crate::providers::traits::{
    CloudProvider, ImageState, Instance, InstanceRole, InstanceState, MachineImage, ProviderError,
};
use crate::providers::drain_tasks;
use crate::ssh::{KeyMaterial, RemoteExecutor};

/// EC2 Query API version.
const EC2_API_VERSION: &str = "2016-11-15";

/// IAM Query API version.
const IAM_API_VERSION: &str = "2010-05-08";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Instance profile attached to benchmark instances.
const INSTANCE_PROFILE_NAME: &str = "inferbench-ec2-instance-profile";

/// IAM role behind the instance profile.
const ROLE_NAME: &str = "inferbench-ec2-role";

/// Root volume size: models and datasets are large.
const ROOT_VOLUME_GIB: i32 = 200;

/// Instance states considered live for discovery and teardown.
const LIVE_STATES: &[&str] = &["pending", "running"];

/// Authenticated API state, present after `init`.
#[derive(Clone)]
struct Api {
    client: Client,
    access_key_id: String,
}

/// AWS provider.
#[derive(Clone)]
pub struct Aws {
    /// Full benchmark configuration (startup payload, bench id).
    config: Arc<Config>,
    /// AWS section of the configuration.
    aws: AwsConfig,
    /// Authenticated state; `None` until `init`.
    api: Option<Api>,
    /// Cancellation for long waits.
    token: CancellationToken,
    /// Endpoint override for tests; replaces both the EC2 and IAM
    /// endpoints when set.
    endpoint: Option<String>,
}

impl Aws {
    /// Create an uninitialized AWS provider from the configuration.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] when the `[aws]` section is
    /// absent.
    pub fn new(config: Arc<Config>, token: CancellationToken) -> Result<Self, ProviderError> {
        let aws = config
            .aws
            .clone()
            .ok_or_else(|| ProviderError::Config("missing [aws] section".to_string()))?;

        Ok(Self {
            config,
            aws,
            api: None,
            token,
            endpoint: None,
        })
    }

    /// Override the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn api(&self) -> Result<&Api, ProviderError> {
        self.api.as_ref().ok_or(ProviderError::NotInitialized)
    }

    fn ec2_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://ec2.{}.amazonaws.com", self.aws.region))
    }

    fn iam_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| "https://iam.amazonaws.com".to_string())
    }

    /// Execute a Query API request.
    async fn aws_request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&impl serde::Serialize>,
    ) -> Result<T, ProviderError> {
        let api = self.api()?;
        debug!(url = %url, method = %method, "AWS request");

        let mut request = api
            .client
            .request(method, url)
            .header("Content-Type", "application/json")
            .header(
                "X-Amz-Date",
                chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
            )
            .header("X-Amz-Security-Context", &api.access_key_id);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                ProviderError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(ProviderError::NotFound(text))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(ProviderError::Credentials(text))
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Tag set for a role-carrying benchmark instance.
    fn bench_tags(&self, role: InstanceRole) -> Vec<Tag> {
        vec![
            Tag {
                key: "Name".to_string(),
                value: format!("benchmark-{}", self.config.bench_id),
            },
            Tag {
                key: MANAGED_BY_TAG.to_string(),
                value: MANAGED_BY_VALUE.to_string(),
            },
            Tag {
                key: BENCH_ID_TAG.to_string(),
                value: self.config.bench_id.clone(),
            },
            Tag {
                key: ROLE_TAG.to_string(),
                value: role.as_str().to_string(),
            },
        ]
    }

    /// Extract the role from an instance's tag set.
    fn role_from_tags(tags: &[Tag]) -> Option<InstanceRole> {
        tags.iter()
            .find(|t| t.key == ROLE_TAG)
            .and_then(|t| match t.value.as_str() {
                "llm" => Some(InstanceRole::Llm),
                "bench" => Some(InstanceRole::Bench),
                _ => None,
            })
    }

    /// Convert an EC2 instance to our Instance type.
    fn to_instance(ec2: &Ec2Instance) -> Instance {
        let state = match ec2.state.name.as_str() {
            "pending" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "shutting-down" | "terminated" | "stopping" | "stopped" => InstanceState::Terminated,
            _ => InstanceState::Unknown,
        };

        let name = ec2
            .tags
            .iter()
            .find(|t| t.key == "Name")
            .map_or_else(|| ec2.instance_id.clone(), |t| t.value.clone());

        Instance {
            id: ec2.instance_id.clone(),
            name,
            state,
            role: Self::role_from_tags(&ec2.tags),
            public_ip: ec2.public_ip_address.clone(),
            instance_type: ec2.instance_type.clone(),
            zone: ec2
                .placement
                .as_ref()
                .map(|p| p.availability_zone.clone())
                .unwrap_or_default(),
            created_at: ec2
                .launch_time
                .as_ref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
        }
    }

    /// Every live instance tagged with this benchmark's id.
    async fn benchmark_instances(&self) -> Result<Vec<Ec2Instance>, ProviderError> {
        let mut url = format!(
            "{}/?Action=DescribeInstances&Version={EC2_API_VERSION}\
             &Filter.1.Name=tag:{BENCH_ID_TAG}&Filter.1.Value.1={}\
             &Filter.2.Name=instance-state-name",
            self.ec2_endpoint(),
            self.config.bench_id,
        );
        for (i, state) in LIVE_STATES.iter().enumerate() {
            url.push_str(&format!("&Filter.2.Value.{}={state}", i + 1));
        }

        let response: DescribeInstancesResponse = self
            .aws_request(reqwest::Method::GET, &url, None::<&()>)
            .await?;

        Ok(response
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .collect())
    }

    /// Fetch one instance by id.
    async fn get_instance(&self, id: &str) -> Result<Ec2Instance, ProviderError> {
        let url = format!(
            "{}/?Action=DescribeInstances&Version={EC2_API_VERSION}&InstanceId.1={id}",
            self.ec2_endpoint()
        );

        let response: DescribeInstancesResponse = self
            .aws_request(reqwest::Method::GET, &url, None::<&()>)
            .await?;

        response
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("instance {id}")))
    }

    /// Launch one instance.
    async fn run_instances(
        &self,
        body: &RunInstancesRequest,
    ) -> Result<RunInstancesResponse, ProviderError> {
        let url = format!(
            "{}/?Action=RunInstances&Version={EC2_API_VERSION}",
            self.ec2_endpoint()
        );
        self.aws_request(reqwest::Method::POST, &url, Some(body))
            .await
    }

    /// Launch one benchmark instance for `role`, carrying the startup
    /// payload and the benchmark tags.
    async fn create_role_instance(&self, role: InstanceRole) -> Result<(), ProviderError> {
        let (instance_type, ami) = match role {
            InstanceRole::Llm => (self.aws.gpu_instance_type.clone(), self.aws.gpu_ami.clone()),
            InstanceRole::Bench => (self.aws.cpu_instance_type.clone(), self.aws.cpu_ami.clone()),
        };

        info!(role = %role, instance_type = %instance_type, ami = %ami, "Creating instance");

        let payload = startup_payload(&self.config);
        let user_data = base64::engine::general_purpose::STANDARD.encode(payload);

        let body = RunInstancesRequest {
            image_id: ami,
            instance_type,
            min_count: 1,
            max_count: 1,
            dry_run: None,
            key_name: None,
            user_data: Some(user_data),
            iam_instance_profile: Some(IamInstanceProfileSpec {
                name: INSTANCE_PROFILE_NAME.to_string(),
            }),
            block_device_mappings: vec![BlockDeviceMapping {
                device_name: "/dev/sda1".to_string(),
                ebs: EbsBlockDevice {
                    volume_size: ROOT_VOLUME_GIB,
                },
            }],
            tag_specifications: vec![TagSpecification {
                resource_type: "instance".to_string(),
                tags: self.bench_tags(role),
            }],
        };

        let response = self.run_instances(&body).await?;
        let instance = response.instances.first().ok_or_else(|| ProviderError::Api {
            status: 500,
            message: "no instance returned from creation".to_string(),
        })?;

        info!(instance_id = %instance.instance_id, role = %role, "Instance created");
        Ok(())
    }

    /// Terminate one instance.
    async fn terminate_instance(&self, id: &str, dry_run: bool) -> Result<(), ProviderError> {
        let url = format!(
            "{}/?Action=TerminateInstances&Version={EC2_API_VERSION}&InstanceId.1={id}&DryRun={dry_run}",
            self.ec2_endpoint()
        );

        self.aws_request::<serde_json::Value>(reqwest::Method::POST, &url, None::<&()>)
            .await
            .map(|_| ())
    }

    /// Make sure the benchmark instance profile (and its role) exists.
    /// Instances need it for SSM access; creating it is idempotent.
    async fn ensure_instance_profile(&self) -> Result<(), ProviderError> {
        let url = format!(
            "{}/?Action=GetInstanceProfile&Version={IAM_API_VERSION}&InstanceProfileName={INSTANCE_PROFILE_NAME}",
            self.iam_endpoint()
        );

        match self
            .aws_request::<serde_json::Value>(reqwest::Method::GET, &url, None::<&()>)
            .await
        {
            Ok(_) => return Ok(()),
            Err(ProviderError::NotFound(_)) => {}
            Err(error) => return Err(error),
        }

        info!(profile = INSTANCE_PROFILE_NAME, "Bootstrapping instance profile");

        let assume_role = serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "ec2.amazonaws.com" },
                "Action": "sts:AssumeRole"
            }]
        });

        let url = format!(
            "{}/?Action=CreateRole&Version={IAM_API_VERSION}&RoleName={ROLE_NAME}&AssumeRolePolicyDocument={}",
            self.iam_endpoint(),
            assume_role
        );
        self.aws_request::<serde_json::Value>(reqwest::Method::POST, &url, None::<&()>)
            .await?;

        let url = format!(
            "{}/?Action=AttachRolePolicy&Version={IAM_API_VERSION}&RoleName={ROLE_NAME}\
             &PolicyArn=arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore",
            self.iam_endpoint()
        );
        self.aws_request::<serde_json::Value>(reqwest::Method::POST, &url, None::<&()>)
            .await?;

        let url = format!(
            "{}/?Action=CreateInstanceProfile&Version={IAM_API_VERSION}&InstanceProfileName={INSTANCE_PROFILE_NAME}",
            self.iam_endpoint()
        );
        self.aws_request::<serde_json::Value>(reqwest::Method::POST, &url, None::<&()>)
            .await?;

        let url = format!(
            "{}/?Action=AddRoleToInstanceProfile&Version={IAM_API_VERSION}\
             &InstanceProfileName={INSTANCE_PROFILE_NAME}&RoleName={ROLE_NAME}",
            self.iam_endpoint()
        );
        self.aws_request::<serde_json::Value>(reqwest::Method::POST, &url, None::<&()>)
            .await?;

        Ok(())
    }

    /// Whether an error is the expected outcome of a successful dry run.
    fn dry_run_passed(error: &ProviderError) -> bool {
        matches!(
            error,
            ProviderError::Api { message, .. } if message.contains("DryRunOperation")
        )
    }

    /// The image build pipeline, specialized by install profile.
    async fn build_image(&self, profile: InstallProfile) -> Result<MachineImage, ProviderError> {
        info!(profile = %profile, "Starting image build");

        // GenerateKey: EC2 generates the pair and hands back the private
        // key exactly once.
        let key_name = format!("benchmark-key-pair-{}", Uuid::new_v4());
        let url = format!(
            "{}/?Action=CreateKeyPair&Version={EC2_API_VERSION}&KeyName={key_name}",
            self.ec2_endpoint()
        );
        let created: CreateKeyPairResponse = self
            .aws_request(reqwest::Method::POST, &url, None::<&()>)
            .await?;
        let key = KeyMaterial::from_private_pem(created.key_name.clone(), &created.key_material)?;

        let mut resources = BuildResources {
            key,
            instance_id: None,
        };

        let built = self.build_inner(&mut resources, profile).await;
        let cleanup = self.cleanup_build(&resources).await;

        match built {
            Ok(image) => {
                cleanup?;
                info!(image_id = %image.id, profile = %profile, "Image build complete");
                Ok(image)
            }
            Err(error) => {
                if let Err(cleanup_error) = cleanup {
                    warn!(%cleanup_error, "Cleanup after failed build also failed");
                }
                Err(error)
            }
        }
    }

    async fn build_inner(
        &self,
        resources: &mut BuildResources,
        profile: InstallProfile,
    ) -> Result<MachineImage, ProviderError> {
        let base_ami = self.aws.base_ami.clone().ok_or_else(|| {
            ProviderError::Config("aws.base_ami is required to build images".to_string())
        })?;

        let instance_type = match profile {
            InstallProfile::Gpu => self.aws.gpu_instance_type.clone(),
            InstallProfile::Cpu => self.aws.cpu_instance_type.clone(),
        };

        // LaunchTemplate.
        let body = RunInstancesRequest {
            image_id: base_ami,
            instance_type,
            min_count: 1,
            max_count: 1,
            dry_run: None,
            key_name: Some(resources.key.name().to_string()),
            user_data: None,
            iam_instance_profile: None,
            block_device_mappings: vec![BlockDeviceMapping {
                device_name: "/dev/sda1".to_string(),
                ebs: EbsBlockDevice {
                    volume_size: ROOT_VOLUME_GIB,
                },
            }],
            tag_specifications: vec![TagSpecification {
                resource_type: "instance".to_string(),
                tags: vec![
                    Tag {
                        key: "Name".to_string(),
                        value: format!("inferbench-template-{profile}"),
                    },
                    Tag {
                        key: MANAGED_BY_TAG.to_string(),
                        value: MANAGED_BY_VALUE.to_string(),
                    },
                ],
            }],
        };

        let response = self.run_instances(&body).await?;
        let instance_id = response
            .instances
            .first()
            .map(|i| i.instance_id.clone())
            .ok_or_else(|| ProviderError::Api {
                status: 500,
                message: "no instance returned from creation".to_string(),
            })?;
        resources.instance_id = Some(instance_id.clone());
        info!(instance_id = %instance_id, "Template instance launched");

        // WaitRunning: the instance must be up and carry a public address.
        wait_until(RUNNING_POLICY, &self.token, || {
            let id = instance_id.clone();
            async move {
                matches!(
                    self.get_instance(&id).await,
                    Ok(i) if i.state.name == "running" && i.public_ip_address.is_some()
                )
            }
        })
        .await?;

        let instance = self.get_instance(&instance_id).await?;
        let address = instance.public_ip_address.clone().ok_or_else(|| {
            ProviderError::Build("template instance has no public address".to_string())
        })?;

        // RemoteSetup.
        let executor = RemoteExecutor::new(address, SSH_USER, resources.key.private_key_path());
        run_remote_setup(&executor, profile, &self.token).await?;

        // CreateImage snapshots the root volume and registers the AMI in
        // one call.
        let name = image_name(profile);
        let url = format!(
            "{}/?Action=CreateImage&Version={EC2_API_VERSION}&InstanceId={instance_id}&Name={name}",
            self.ec2_endpoint()
        );
        let created: CreateImageResponse = self
            .aws_request(reqwest::Method::POST, &url, None::<&()>)
            .await?;
        let image_id = created.image_id.clone();
        info!(image_id = %image_id, "Image registered");

        // WaitImageAvailable.
        wait_until(IMAGE_POLICY, &self.token, || {
            let id = image_id.clone();
            async move {
                matches!(
                    self.get_image(&id).await,
                    Ok(img) if img.state.as_deref() == Some("available")
                )
            }
        })
        .await?;

        let image = self.get_image(&image_id).await?;
        Ok(MachineImage {
            id: image.image_id.clone(),
            name: image.name.clone().unwrap_or(name),
            source_instance_id: Some(instance_id),
            state: ImageState::Available,
            created_at: image
                .creation_date
                .as_ref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
        })
    }

    async fn get_image(&self, id: &str) -> Result<AwsImage, ProviderError> {
        let url = format!(
            "{}/?Action=DescribeImages&Version={EC2_API_VERSION}&ImageId.1={id}",
            self.ec2_endpoint()
        );

        let response: DescribeImagesResponse = self
            .aws_request(reqwest::Method::GET, &url, None::<&()>)
            .await?;

        response
            .images
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(format!("image {id}")))
    }

    /// Unconditional pipeline cleanup: the ephemeral key pair (EC2 side and
    /// local file) and the template instance. Runs on every exit path.
    async fn cleanup_build(&self, resources: &BuildResources) -> Result<(), ProviderError> {
        let mut failures = Vec::new();

        debug!(key_name = %resources.key.name(), "Deleting ephemeral key pair");
        let url = format!(
            "{}/?Action=DeleteKeyPair&Version={EC2_API_VERSION}&KeyName={}",
            self.ec2_endpoint(),
            resources.key.name()
        );
        if let Err(error) = self
            .aws_request::<serde_json::Value>(reqwest::Method::POST, &url, None::<&()>)
            .await
        {
            failures.push(format!("key pair {}: {error}", resources.key.name()));
        }

        if let Err(error) = resources.key.cleanup() {
            failures.push(format!("key file: {error}"));
        }

        if let Some(instance_id) = &resources.instance_id {
            debug!(instance_id = %instance_id, "Terminating template instance");
            if let Err(error) = self.terminate_instance(instance_id, false).await {
                failures.push(format!("template instance {instance_id}: {error}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::Build(format!(
                "cleanup incomplete: {}",
                failures.join("; ")
            )))
        }
    }

    /// Resolve the public address of the single instance tagged with
    /// `role`. More than one match is an explicit ambiguity error.
    async fn instance_ip(&self, role: InstanceRole) -> Result<String, ProviderError> {
        let instances = self.benchmark_instances().await?;
        let matching: Vec<Instance> = instances
            .iter()
            .map(Self::to_instance)
            .filter(|i| i.role == Some(role))
            .collect();

        match matching.as_slice() {
            [] => Err(ProviderError::NotFound(format!("{role} instance"))),
            [instance] => instance.public_ip.clone().ok_or_else(|| {
                ProviderError::NotFound(format!("public address of the {role} instance"))
            }),
            _ => Err(ProviderError::AmbiguousRole {
                role,
                count: matching.len(),
            }),
        }
    }
}

/// Resources acquired by a build in progress, tracked for cleanup.
struct BuildResources {
    key: KeyMaterial,
    instance_id: Option<String>,
}

#[async_trait]
impl CloudProvider for Aws {
    async fn init(&mut self) -> Result<(), ProviderError> {
        info!(region = %self.aws.region, "Initializing AWS client");

        let access_key_id = match (&self.aws.access_key, &self.aws.profile_name) {
            (Some(key), _) => key.clone(),
            (None, Some(profile)) => {
                debug!(profile = %profile, "Loading credentials from environment profile");
                std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
                    ProviderError::Credentials(format!(
                        "profile '{profile}' selected but AWS_ACCESS_KEY_ID is not set"
                    ))
                })?
            }
            (None, None) => {
                return Err(ProviderError::Credentials(
                    "no AWS credentials configured".to_string(),
                ))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        self.api = Some(Api {
            client,
            access_key_id,
        });
        Ok(())
    }

    /// Credential probe contract for AWS: a reversible dry-run
    /// `RunInstances` followed by a dry-run `TerminateInstances` on an id
    /// that does not exist. Nothing is created or deleted on success.
    async fn validate_credentials(&self) -> Result<(), ProviderError> {
        let probe = RunInstancesRequest {
            image_id: self.aws.gpu_ami.clone(),
            instance_type: self.aws.cpu_instance_type.clone(),
            min_count: 1,
            max_count: 1,
            dry_run: Some(true),
            key_name: None,
            user_data: None,
            iam_instance_profile: None,
            block_device_mappings: vec![],
            tag_specifications: vec![],
        };

        match self.run_instances(&probe).await {
            Ok(_) => {}
            Err(error) if Self::dry_run_passed(&error) => {}
            Err(error) => {
                return Err(ProviderError::Credentials(format!(
                    "cannot create instances: {error}"
                )))
            }
        }
        info!("OK - can create an instance");

        match self.terminate_instance("i-123456", true).await {
            Ok(_) => {}
            Err(error) if Self::dry_run_passed(&error) => {}
            Err(ProviderError::Api { message, .. })
                if message.contains("InvalidInstanceID.NotFound") => {}
            Err(error) => {
                return Err(ProviderError::Credentials(format!(
                    "cannot delete instances: {error}"
                )))
            }
        }
        info!("OK - can delete an instance");

        Ok(())
    }

    async fn create(&self) -> Result<(), ProviderError> {
        self.ensure_instance_profile().await?;

        let mut set = JoinSet::new();
        for role in [InstanceRole::Llm, InstanceRole::Bench] {
            let this = self.clone();
            set.spawn(async move { this.create_role_instance(role).await });
        }

        drain_tasks(set).await
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        let instances = self.benchmark_instances().await?;

        if instances.is_empty() {
            return Err(ProviderError::NotFound(
                "instances for this benchmark".to_string(),
            ));
        }

        info!(count = instances.len(), "Destroying benchmark instances");

        let mut set = JoinSet::new();
        for instance in instances {
            let this = self.clone();
            set.spawn(async move {
                this.terminate_instance(&instance.instance_id, false).await?;
                info!(instance_id = %instance.instance_id, "Instance terminated");
                Ok(())
            });
        }

        drain_tasks(set).await
    }

    async fn create_llm_image(&self) -> Result<MachineImage, ProviderError> {
        self.api()?;
        self.build_image(InstallProfile::Gpu).await
    }

    async fn create_bench_image(&self) -> Result<MachineImage, ProviderError> {
        self.api()?;
        self.build_image(InstallProfile::Cpu).await
    }

    async fn llm_instance_ip(&self) -> Result<String, ProviderError> {
        self.instance_ip(InstanceRole::Llm).await
    }

    async fn bench_instance_ip(&self) -> Result<String, ProviderError> {
        self.instance_ip(InstanceRole::Bench).await
    }
}
