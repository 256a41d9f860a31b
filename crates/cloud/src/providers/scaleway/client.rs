//! Scaleway Instance/IAM API client implementation.
//!
//! API documentation: <https://www.scaleway.com/en/developers/api/instance/>

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use inferbench_config::{Config, ScalewayConfig};
use inferbench_utils::constants::{BENCH_ID_TAG, MANAGED_BY_TAG, MANAGED_BY_VALUE, ROLE_TAG};
use inferbench_utils::{wait_until, PollPolicy};

use super::models::{
    ActionRequest, CreateImageRequest, CreateServerRequest, CreateSnapshotRequest,
    CreateSshKeyRequest, Image, ImageResponse, Server, ServerListResponse, ServerResponse,
    SnapshotResponse, SshKey, UpdateVolumeRequest, VolumeListResponse,
};
use crate::image::{
    image_name, run_remote_setup, startup_payload, InstallProfile, IMAGE_POLICY, RUNNING_POLICY,
    SSH_USER,
};
use crate::providers::traits::{
    CloudProvider, ImageState, Instance, InstanceRole, InstanceState, MachineImage, ProviderError,
};
use crate::providers::{collect_failures, drain_tasks};
use crate::ssh::{KeyMaterial, RemoteExecutor};

/// Base URL for the Scaleway API.
const API_BASE_URL: &str = "https://api.scaleway.com";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Bound on a server powering off before deletion: ~3 minutes.
const STOP_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(5), 36);

/// Authenticated API state, present after `init`.
#[derive(Clone)]
struct Api {
    client: Client,
    secret_key: String,
}

/// Scaleway provider.
#[derive(Clone)]
pub struct Scaleway {
    /// Full benchmark configuration (startup payload, bench id).
    config: Arc<Config>,
    /// Scaleway section of the configuration.
    scw: ScalewayConfig,
    /// Organization ID.
    #[allow(dead_code)]
    organization_id: String,
    /// Authenticated state; `None` until `init`.
    api: Option<Api>,
    /// Cancellation for long waits.
    token: CancellationToken,
    /// API base URL, overridable for tests.
    base_url: String,
}

impl Scaleway {
    /// Create an uninitialized Scaleway provider from the configuration.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] when the `[scaleway]` section is
    /// absent.
    pub fn new(config: Arc<Config>, token: CancellationToken) -> Result<Self, ProviderError> {
        let scw = config
            .scaleway
            .clone()
            .ok_or_else(|| ProviderError::Config("missing [scaleway] section".to_string()))?;

        Ok(Self {
            organization_id: scw.organization_id.clone(),
            config,
            scw,
            api: None,
            token,
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Override the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api(&self) -> Result<&Api, ProviderError> {
        self.api.as_ref().ok_or(ProviderError::NotInitialized)
    }

    fn instance_url(&self, path: &str) -> String {
        format!(
            "{}/instance/v1/zones/{}{path}",
            self.base_url, self.scw.zone
        )
    }

    fn iam_url(&self, path: &str) -> String {
        format!("{}/iam/v1alpha1{path}", self.base_url)
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let api = self.api()?;
        debug!(url = %url, "GET request");

        let response = api
            .client
            .get(url)
            .header("X-Auth-Token", &api.secret_key)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated POST request.
    async fn post<T, B>(&self, url: &str, body: &B) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let api = self.api()?;
        debug!(url = %url, "POST request");

        let response = api
            .client
            .post(url)
            .header("X-Auth-Token", &api.secret_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated POST request whose response body is ignored.
    async fn post_empty<B: serde::Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<(), ProviderError> {
        let api = self.api()?;
        debug!(url = %url, "POST request (empty response)");

        let response = api
            .client
            .post(url)
            .header("X-Auth-Token", &api.secret_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        Self::expect_success(response).await
    }

    /// Make an authenticated PATCH request with a JSON body.
    async fn patch<B: serde::Serialize>(&self, url: &str, body: &B) -> Result<(), ProviderError> {
        let api = self.api()?;
        debug!(url = %url, "PATCH request");

        let response = api
            .client
            .patch(url)
            .header("X-Auth-Token", &api.secret_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        Self::expect_success(response).await
    }

    /// Set one user-data key on a server. The instance API takes the raw
    /// script body, not JSON.
    async fn set_user_data(&self, server_id: &str, payload: String) -> Result<(), ProviderError> {
        let api = self.api()?;
        let url = self.instance_url(&format!("/servers/{server_id}/user_data/cloud-init"));
        debug!(url = %url, "PATCH user data");

        let response = api
            .client
            .patch(&url)
            .header("X-Auth-Token", &api.secret_key)
            .header("Content-Type", "text/plain")
            .body(payload)
            .send()
            .await?;

        Self::expect_success(response).await
    }

    /// Make an authenticated DELETE request. A missing resource is treated
    /// as already deleted.
    async fn delete(&self, url: &str) -> Result<(), ProviderError> {
        let api = self.api()?;
        debug!(url = %url, "DELETE request");

        let response = api
            .client
            .delete(url)
            .header("X-Auth-Token", &api.secret_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_success()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_FOUND
        {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
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
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), ProviderError> {
        let status = response.status();
        if status.is_success() || status == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Tag identifying this benchmark's resources.
    fn bench_tag(&self) -> String {
        format!("{BENCH_ID_TAG}/{}", self.config.bench_id)
    }

    /// Full tag set for a role-carrying resource.
    fn tags(&self, role: InstanceRole) -> Vec<String> {
        vec![
            self.bench_tag(),
            format!("{ROLE_TAG}/{}", role.as_str()),
            format!("{MANAGED_BY_TAG}/{MANAGED_BY_VALUE}"),
        ]
    }

    /// Extract the role from a server's tag set.
    fn role_from_tags(tags: &[String]) -> Option<InstanceRole> {
        tags.iter().find_map(|tag| {
            match tag.strip_prefix(ROLE_TAG)?.strip_prefix('/')? {
                "llm" => Some(InstanceRole::Llm),
                "bench" => Some(InstanceRole::Bench),
                _ => None,
            }
        })
    }

    /// Convert a Scaleway server to our Instance type.
    fn to_instance(server: &Server) -> Instance {
        let state = match server.state.as_str() {
            "starting" | "allocating" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "stopping" | "stopped" | "terminating" => InstanceState::Terminated,
            _ => InstanceState::Unknown,
        };

        let public_ip = server
            .public_ip
            .as_ref()
            .map(|ip| ip.address.clone())
            .or_else(|| server.public_ips.first().map(|ip| ip.address.clone()));

        Instance {
            id: server.id.clone(),
            name: server.name.clone(),
            state,
            role: Self::role_from_tags(&server.tags),
            public_ip,
            instance_type: server.commercial_type.clone(),
            zone: server.zone.clone().unwrap_or_else(|| "unknown".to_string()),
            created_at: server
                .creation_date
                .as_ref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
        }
    }

    fn to_image(image: &Image) -> MachineImage {
        let state = match image.state.as_deref() {
            Some("available") => ImageState::Available,
            Some("creating") => ImageState::Pending,
            Some("error") => ImageState::Failed,
            _ => ImageState::Unknown,
        };

        MachineImage {
            id: image.id.clone(),
            name: image.name.clone(),
            source_instance_id: None,
            state,
            created_at: image
                .creation_date
                .as_ref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
        }
    }

    /// List every server tagged with this benchmark's id.
    async fn list_servers(&self) -> Result<Vec<Server>, ProviderError> {
        let url = self.instance_url(&format!("/servers?tags={}", self.bench_tag()));
        let response: ServerListResponse = self.get(&url).await?;
        Ok(response.servers)
    }

    /// Fetch one server by id.
    async fn get_server(&self, id: &str) -> Result<Server, ProviderError> {
        let url = self.instance_url(&format!("/servers/{id}"));
        let response: ServerResponse = self.get(&url).await?;
        Ok(response.server)
    }

    /// Create, tag, and power on one benchmark server.
    async fn create_role_server(&self, role: InstanceRole) -> Result<(), ProviderError> {
        let image = match role {
            InstanceRole::Llm => self.scw.gpu_image.clone(),
            InstanceRole::Bench => self.scw.cpu_image.clone(),
        }
        .unwrap_or_else(|| self.scw.base_image.clone());

        let commercial_type = match role {
            InstanceRole::Llm => self.scw.gpu_commercial_type.clone(),
            InstanceRole::Bench => self.scw.cpu_commercial_type.clone(),
        };

        info!(role = %role, commercial_type = %commercial_type, "Creating server");

        let body = CreateServerRequest {
            name: format!("benchmark-{}-{}", self.config.bench_id, role),
            commercial_type,
            image,
            tags: self.tags(role),
            project: self.scw.project_id.clone(),
        };

        let url = self.instance_url("/servers");
        let response: ServerResponse = self.post(&url, &body).await?;
        let server = response.server;

        info!(server_id = %server.id, role = %role, "Server created");

        // Volumes must carry the benchmark tag themselves: destroy discovers
        // them independently of the server.
        for volume in server.volumes.values() {
            let url = self.instance_url(&format!("/volumes/{}", volume.id));
            self.patch(
                &url,
                &UpdateVolumeRequest {
                    tags: vec![self.bench_tag()],
                },
            )
            .await?;
            debug!(volume_id = %volume.id, "Volume tagged");
        }

        self.set_user_data(&server.id, startup_payload(&self.config))
            .await?;

        self.server_action(&server.id, "poweron").await?;
        info!(server_id = %server.id, "Server powered on");

        Ok(())
    }

    async fn server_action(&self, id: &str, action: &str) -> Result<(), ProviderError> {
        let url = self.instance_url(&format!("/servers/{id}/action"));
        self.post_empty(
            &url,
            &ActionRequest {
                action: action.to_string(),
            },
        )
        .await
    }

    /// Power off (when needed) and delete one server.
    async fn delete_server(&self, server: Server) -> Result<(), ProviderError> {
        if server.state == "running" || server.state == "starting" {
            debug!(server_id = %server.id, "Powering off server");
            self.server_action(&server.id, "poweroff").await?;

            let id = server.id.clone();
            wait_until(STOP_POLICY, &self.token, || {
                let id = id.clone();
                async move {
                    matches!(
                        self.get_server(&id).await,
                        Ok(s) if s.state == "stopped"
                    )
                }
            })
            .await?;
        }

        let url = self.instance_url(&format!("/servers/{}", server.id));
        self.delete(&url).await?;
        info!(server_id = %server.id, "Server deleted");
        Ok(())
    }

    /// The image build pipeline, specialized by install profile.
    async fn build_image(&self, profile: InstallProfile) -> Result<MachineImage, ProviderError> {
        info!(profile = %profile, "Starting image build");

        let key = KeyMaterial::generate(format!("benchmark-key-pair-{}", Uuid::new_v4()))?;
        let mut resources = BuildResources {
            key,
            key_id: None,
            server_id: None,
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

    /// The fallible middle of the pipeline. Every resource it acquires is
    /// recorded in `resources` before use so cleanup can find it.
    async fn build_inner(
        &self,
        resources: &mut BuildResources,
        profile: InstallProfile,
    ) -> Result<MachineImage, ProviderError> {
        // GenerateKey: register the pair with IAM so the template instance
        // accepts it.
        let url = self.iam_url("/ssh-keys");
        let registered: SshKey = self
            .post(
                &url,
                &CreateSshKeyRequest {
                    name: resources.key.name().to_string(),
                    public_key: resources.key.public_key().to_string(),
                    project_id: self.scw.project_id.clone(),
                },
            )
            .await?;
        resources.key_id = Some(registered.id.clone());
        debug!(key_id = %registered.id, "Ephemeral key registered");

        // LaunchTemplate.
        let body = CreateServerRequest {
            name: format!("benchmark-template-{profile}"),
            commercial_type: self.scw.base_commercial_type.clone(),
            image: self.scw.base_image.clone(),
            tags: vec![format!("{MANAGED_BY_TAG}/{MANAGED_BY_VALUE}")],
            project: self.scw.project_id.clone(),
        };
        let url = self.instance_url("/servers");
        let response: ServerResponse = self.post(&url, &body).await?;
        let server_id = response.server.id.clone();
        resources.server_id = Some(server_id.clone());
        info!(server_id = %server_id, "Template server created");

        self.server_action(&server_id, "poweron").await?;

        // WaitRunning: the server must be up and carry a public address.
        wait_until(RUNNING_POLICY, &self.token, || {
            let id = server_id.clone();
            async move {
                matches!(
                    self.get_server(&id).await,
                    Ok(s) if s.state == "running"
                        && (s.public_ip.is_some() || !s.public_ips.is_empty())
                )
            }
        })
        .await?;

        let server = self.get_server(&server_id).await?;
        let address = server
            .public_ip
            .as_ref()
            .map(|ip| ip.address.clone())
            .or_else(|| server.public_ips.first().map(|ip| ip.address.clone()))
            .ok_or_else(|| ProviderError::Build("template server has no public address".to_string()))?;

        // RemoteSetup.
        let executor = RemoteExecutor::new(address, SSH_USER, resources.key.private_key_path());
        run_remote_setup(&executor, profile, &self.token).await?;

        // Snapshot the root volume, then register the image from it.
        let root_volume = server
            .volumes
            .get("0")
            .or_else(|| server.volumes.values().next())
            .ok_or_else(|| ProviderError::Build("template server has no volumes".to_string()))?;

        let name = image_name(profile);
        let url = self.instance_url("/snapshots");
        let snapshot: SnapshotResponse = self
            .post(
                &url,
                &CreateSnapshotRequest {
                    name: format!("{name}-root"),
                    volume_id: root_volume.id.clone(),
                    project: self.scw.project_id.clone(),
                },
            )
            .await?;

        let url = self.instance_url("/images");
        let created: ImageResponse = self
            .post(
                &url,
                &CreateImageRequest {
                    name,
                    root_volume: snapshot.snapshot.id.clone(),
                    arch: "x86_64".to_string(),
                    project: self.scw.project_id.clone(),
                    public: false,
                },
            )
            .await?;
        let image_id = created.image.id.clone();
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
        let mut machine_image = Self::to_image(&image);
        machine_image.source_instance_id = Some(server_id);
        Ok(machine_image)
    }

    async fn get_image(&self, id: &str) -> Result<Image, ProviderError> {
        let url = self.instance_url(&format!("/images/{id}"));
        let response: ImageResponse = self.get(&url).await?;
        Ok(response.image)
    }

    /// Unconditional pipeline cleanup: the ephemeral key (IAM and local
    /// file) and the template server. Runs on every exit path; failures are
    /// collected rather than masking each other.
    async fn cleanup_build(&self, resources: &BuildResources) -> Result<(), ProviderError> {
        let mut failures = Vec::new();

        if let Some(key_id) = &resources.key_id {
            debug!(key_id = %key_id, "Deleting ephemeral key");
            let url = self.iam_url(&format!("/ssh-keys/{key_id}"));
            if let Err(error) = self.delete(&url).await {
                failures.push(format!("ssh key {key_id}: {error}"));
            }
        }

        if let Err(error) = resources.key.cleanup() {
            failures.push(format!("key file: {error}"));
        }

        if let Some(server_id) = &resources.server_id {
            debug!(server_id = %server_id, "Terminating template server");
            if let Err(error) = self.server_action(server_id, "terminate").await {
                failures.push(format!("template server {server_id}: {error}"));
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
        let servers = self.list_servers().await?;
        let matching: Vec<Instance> = servers
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
    key_id: Option<String>,
    server_id: Option<String>,
}

#[async_trait]
impl CloudProvider for Scaleway {
    async fn init(&mut self) -> Result<(), ProviderError> {
        info!(zone = %self.scw.zone, "Initializing Scaleway client");

        let secret_key = match (&self.scw.secret_key, &self.scw.profile_name) {
            (Some(key), _) => key.clone(),
            (None, Some(profile)) => {
                debug!(profile = %profile, "Loading credentials from environment profile");
                std::env::var("SCW_SECRET_KEY").map_err(|_| {
                    ProviderError::Credentials(format!(
                        "profile '{profile}' selected but SCW_SECRET_KEY is not set"
                    ))
                })?
            }
            (None, None) => {
                return Err(ProviderError::Credentials(
                    "no Scaleway credentials configured".to_string(),
                ))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        self.api = Some(Api { client, secret_key });
        Ok(())
    }

    /// Credential probe contract for Scaleway: a read-only list of this
    /// benchmark's servers. Unlike AWS there is no dry-run mode, so no
    /// mutating call is attempted.
    async fn validate_credentials(&self) -> Result<(), ProviderError> {
        self.list_servers().await.map_err(|error| match error {
            ProviderError::Api { status: 401 | 403, message } => {
                ProviderError::Credentials(message)
            }
            other => other,
        })?;

        info!("OK - credentials can list instance resources");
        Ok(())
    }

    async fn create(&self) -> Result<(), ProviderError> {
        self.api()?;

        let mut set = JoinSet::new();
        for role in [InstanceRole::Llm, InstanceRole::Bench] {
            let this = self.clone();
            set.spawn(async move { this.create_role_server(role).await });
        }

        drain_tasks(set).await
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        let servers = self.list_servers().await?;

        let url = self.instance_url(&format!("/volumes?tags={}", self.bench_tag()));
        let volumes: VolumeListResponse = self.get(&url).await?;

        if servers.is_empty() && volumes.volumes.is_empty() {
            return Err(ProviderError::NotFound(
                "resources for this benchmark".to_string(),
            ));
        }

        info!(
            servers = servers.len(),
            volumes = volumes.volumes.len(),
            "Destroying benchmark resources"
        );

        let mut set = JoinSet::new();
        for server in servers {
            let this = self.clone();
            set.spawn(async move { this.delete_server(server).await });
        }
        let (server_total, mut failures) = collect_failures(set).await;

        // Volumes go after their servers: a volume attached to a live
        // server cannot be deleted.
        let url = self.instance_url(&format!("/volumes?tags={}", self.bench_tag()));
        let remaining: VolumeListResponse = self.get(&url).await?;

        let mut set = JoinSet::new();
        for volume in remaining.volumes {
            let this = self.clone();
            set.spawn(async move {
                let url = this.instance_url(&format!("/volumes/{}", volume.id));
                this.delete(&url).await?;
                info!(volume_id = %volume.id, "Volume deleted");
                Ok(())
            });
        }
        let (volume_total, volume_failures) = collect_failures(set).await;
        failures.extend(volume_failures);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::Partial {
                total: server_total + volume_total,
                failures,
            })
        }
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
