//! AWS EC2/IAM API request and response models.

use serde::{Deserialize, Serialize};

// ============================================================================
// Tag types
// ============================================================================

/// Resource tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    #[serde(rename = "Key")]
    pub key: String,
    /// Tag value.
    #[serde(rename = "Value")]
    pub value: String,
}

/// Tags applied to a resource class at creation.
#[derive(Debug, Clone, Serialize)]
pub struct TagSpecification {
    /// Resource type, e.g. "instance".
    #[serde(rename = "ResourceType")]
    pub resource_type: String,
    /// Tags to apply.
    #[serde(rename = "Tags")]
    pub tags: Vec<Tag>,
}

// ============================================================================
// Instance types
// ============================================================================

/// EC2 instance state.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceStateModel {
    /// State name: pending, running, shutting-down, terminated, …
    #[serde(rename = "Name")]
    pub name: String,
}

/// EC2 instance.
#[derive(Debug, Clone, Deserialize)]
pub struct Ec2Instance {
    /// Instance ID.
    #[serde(rename = "InstanceId")]
    pub instance_id: String,
    /// Instance type.
    #[serde(rename = "InstanceType")]
    pub instance_type: String,
    /// Current state.
    #[serde(rename = "State")]
    pub state: InstanceStateModel,
    /// Public IPv4 address, absent until running.
    #[serde(rename = "PublicIpAddress", default)]
    pub public_ip_address: Option<String>,
    /// AMI the instance booted from.
    #[serde(rename = "ImageId", default)]
    pub image_id: Option<String>,
    /// Availability zone placement.
    #[serde(rename = "Placement", default)]
    pub placement: Option<Placement>,
    /// Launch time.
    #[serde(rename = "LaunchTime", default)]
    pub launch_time: Option<String>,
    /// Tags.
    #[serde(rename = "Tags", default)]
    pub tags: Vec<Tag>,
}

/// Instance placement.
#[derive(Debug, Clone, Deserialize)]
pub struct Placement {
    /// Availability zone.
    #[serde(rename = "AvailabilityZone")]
    pub availability_zone: String,
}

/// One reservation in a describe response.
#[derive(Debug, Clone, Deserialize)]
pub struct Reservation {
    /// Instances in this reservation.
    #[serde(rename = "Instances", default)]
    pub instances: Vec<Ec2Instance>,
}

/// DescribeInstances response.
#[derive(Debug, Deserialize)]
pub struct DescribeInstancesResponse {
    /// Reservations.
    #[serde(rename = "Reservations", default)]
    pub reservations: Vec<Reservation>,
}

/// RunInstances request body.
#[derive(Debug, Serialize)]
pub struct RunInstancesRequest {
    /// AMI to boot.
    #[serde(rename = "ImageId")]
    pub image_id: String,
    /// Instance type.
    #[serde(rename = "InstanceType")]
    pub instance_type: String,
    #[serde(rename = "MinCount")]
    pub min_count: i32,
    #[serde(rename = "MaxCount")]
    pub max_count: i32,
    /// Dry-run flag: validate permissions without creating anything.
    #[serde(rename = "DryRun", skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    /// Key pair granting SSH access.
    #[serde(rename = "KeyName", skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    /// Base64-encoded startup payload.
    #[serde(rename = "UserData", skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    /// IAM instance profile.
    #[serde(rename = "IamInstanceProfile", skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<IamInstanceProfileSpec>,
    /// Root volume sizing.
    #[serde(rename = "BlockDeviceMappings", skip_serializing_if = "Vec::is_empty")]
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    /// Tags applied at creation.
    #[serde(rename = "TagSpecifications", skip_serializing_if = "Vec::is_empty")]
    pub tag_specifications: Vec<TagSpecification>,
}

/// IAM instance profile reference.
#[derive(Debug, Clone, Serialize)]
pub struct IamInstanceProfileSpec {
    /// Profile name.
    #[serde(rename = "Name")]
    pub name: String,
}

/// Block device mapping entry.
#[derive(Debug, Clone, Serialize)]
pub struct BlockDeviceMapping {
    /// Device name, e.g. `/dev/sda1`.
    #[serde(rename = "DeviceName")]
    pub device_name: String,
    /// EBS settings.
    #[serde(rename = "Ebs")]
    pub ebs: EbsBlockDevice,
}

/// EBS settings for a block device.
#[derive(Debug, Clone, Serialize)]
pub struct EbsBlockDevice {
    /// Volume size in GiB.
    #[serde(rename = "VolumeSize")]
    pub volume_size: i32,
}

/// RunInstances response.
#[derive(Debug, Deserialize)]
pub struct RunInstancesResponse {
    /// Launched instances.
    #[serde(rename = "Instances", default)]
    pub instances: Vec<Ec2Instance>,
}

// ============================================================================
// Key pair types
// ============================================================================

/// CreateKeyPair response: AWS generates the pair and returns the private
/// key exactly once.
#[derive(Debug, Deserialize)]
pub struct CreateKeyPairResponse {
    /// Key pair name.
    #[serde(rename = "KeyName")]
    pub key_name: String,
    /// PEM-encoded private key.
    #[serde(rename = "KeyMaterial")]
    pub key_material: String,
}

// ============================================================================
// Image types
// ============================================================================

/// CreateImage response.
#[derive(Debug, Deserialize)]
pub struct CreateImageResponse {
    /// New image ID.
    #[serde(rename = "ImageId")]
    pub image_id: String,
}

/// Machine image.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsImage {
    /// Image ID.
    #[serde(rename = "ImageId")]
    pub image_id: String,
    /// Image name.
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    /// Image state: pending, available, failed.
    #[serde(rename = "State", default)]
    pub state: Option<String>,
    /// Creation date.
    #[serde(rename = "CreationDate", default)]
    pub creation_date: Option<String>,
}

/// DescribeImages response.
#[derive(Debug, Deserialize)]
pub struct DescribeImagesResponse {
    /// Matching images.
    #[serde(rename = "Images", default)]
    pub images: Vec<AwsImage>,
}
