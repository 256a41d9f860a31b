//! Scaleway Instance and IAM API request and response models.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Server types
// ============================================================================

/// Instance server.
#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    /// Server ID.
    pub id: String,
    /// Server name.
    pub name: String,
    /// Zone.
    #[serde(default)]
    pub zone: Option<String>,
    /// Server state.
    pub state: String,
    /// Commercial type (e.g. `DEV1-S`, `H100-1-80G`).
    pub commercial_type: String,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Primary public IP.
    #[serde(default)]
    pub public_ip: Option<ServerIp>,
    /// All public IPs.
    #[serde(default)]
    pub public_ips: Vec<ServerIp>,
    /// Image the server booted from.
    #[serde(default)]
    pub image: Option<ImageRef>,
    /// Attached volumes, keyed by slot ("0" is the root volume).
    #[serde(default)]
    pub volumes: HashMap<String, VolumeRef>,
    /// Created at.
    #[serde(default)]
    pub creation_date: Option<String>,
}

/// Public IP attached to a server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerIp {
    /// IP ID.
    #[serde(default)]
    pub id: Option<String>,
    /// IP address.
    pub address: String,
}

/// Image reference on a server.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRef {
    /// Image ID.
    pub id: String,
    /// Image name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Volume reference on a server.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeRef {
    /// Volume ID.
    pub id: String,
    /// Volume name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Single server response.
#[derive(Debug, Deserialize)]
pub struct ServerResponse {
    /// Server details.
    pub server: Server,
}

/// Server list response.
#[derive(Debug, Deserialize)]
pub struct ServerListResponse {
    /// List of servers.
    pub servers: Vec<Server>,
}

/// Request body for creating a server.
#[derive(Debug, Serialize)]
pub struct CreateServerRequest {
    /// Server name.
    pub name: String,
    /// Commercial type.
    pub commercial_type: String,
    /// Image label or ID to boot from.
    pub image: String,
    /// Tags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Project ID.
    pub project: String,
}

/// Server action request ("poweron", "poweroff", "terminate").
#[derive(Debug, Serialize)]
pub struct ActionRequest {
    /// Action name.
    pub action: String,
}

// ============================================================================
// Volume types
// ============================================================================

/// Block volume.
#[derive(Debug, Clone, Deserialize)]
pub struct Volume {
    /// Volume ID.
    pub id: String,
    /// Volume name.
    #[serde(default)]
    pub name: Option<String>,
    /// Volume state.
    #[serde(default)]
    pub state: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Volume list response.
#[derive(Debug, Deserialize)]
pub struct VolumeListResponse {
    /// List of volumes.
    pub volumes: Vec<Volume>,
}

/// Request body for updating a volume's tags.
#[derive(Debug, Serialize)]
pub struct UpdateVolumeRequest {
    /// Replacement tag set.
    pub tags: Vec<String>,
}

// ============================================================================
// Snapshot and image types
// ============================================================================

/// Request body for snapshotting a volume.
#[derive(Debug, Serialize)]
pub struct CreateSnapshotRequest {
    /// Snapshot name.
    pub name: String,
    /// Volume to snapshot.
    pub volume_id: String,
    /// Project ID.
    pub project: String,
}

/// Snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    /// Snapshot ID.
    pub id: String,
    /// Snapshot state.
    #[serde(default)]
    pub state: Option<String>,
}

/// Snapshot creation response.
#[derive(Debug, Deserialize)]
pub struct SnapshotResponse {
    /// Snapshot details.
    pub snapshot: Snapshot,
}

/// Request body for registering an image from a snapshot.
#[derive(Debug, Serialize)]
pub struct CreateImageRequest {
    /// Image name.
    pub name: String,
    /// Root volume snapshot ID.
    pub root_volume: String,
    /// Architecture, e.g. `x86_64`.
    pub arch: String,
    /// Project ID.
    pub project: String,
    /// Whether the image is public.
    pub public: bool,
}

/// Machine image.
#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    /// Image ID.
    pub id: String,
    /// Image name.
    pub name: String,
    /// Image state ("available", "creating", "error").
    #[serde(default)]
    pub state: Option<String>,
    /// Created at.
    #[serde(default)]
    pub creation_date: Option<String>,
}

/// Image response wrapper.
#[derive(Debug, Deserialize)]
pub struct ImageResponse {
    /// Image details.
    pub image: Image,
}

// ============================================================================
// IAM SSH key types
// ============================================================================

/// Request body for registering an SSH key.
#[derive(Debug, Serialize)]
pub struct CreateSshKeyRequest {
    /// Key name.
    pub name: String,
    /// OpenSSH public key.
    pub public_key: String,
    /// Project ID.
    pub project_id: String,
}

/// Registered SSH key.
#[derive(Debug, Clone, Deserialize)]
pub struct SshKey {
    /// Key ID.
    pub id: String,
    /// Key name.
    pub name: String,
    /// Fingerprint.
    #[serde(default)]
    pub fingerprint: Option<String>,
}
