//! Canonical resource model
//!
//! Provider-agnostic request and info structs shared by every driver. An info
//! struct is a snapshot: handlers build a fresh one on every fetch.

use crate::identity::{Iid, ResourceRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-form provider extra
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Looks up a key in a key/value list.
pub fn find_value<'a>(list: &'a [KeyValue], key: &str) -> Option<&'a str> {
    list.iter()
        .find(|kv| kv.key == key)
        .map(|kv| kv.value.as_str())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub region: String,
    pub zone: String,
}

// ---------------------------------------------------------------------------
// VM
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmStatus {
    Creating,
    Booting,
    Running,
    Suspending,
    Suspended,
    Resuming,
    Rebooting,
    Terminating,
    Terminated,
    NotExist,
    Failed,
    /// Provider state with no canonical counterpart
    Unknown,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmStatus::Creating => "Creating",
            VmStatus::Booting => "Booting",
            VmStatus::Running => "Running",
            VmStatus::Suspending => "Suspending",
            VmStatus::Suspended => "Suspended",
            VmStatus::Resuming => "Resuming",
            VmStatus::Rebooting => "Rebooting",
            VmStatus::Terminating => "Terminating",
            VmStatus::Terminated => "Terminated",
            VmStatus::NotExist => "NotExist",
            VmStatus::Failed => "Failed",
            VmStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageType {
    #[default]
    PublicImage,
    MyImage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRequest {
    pub name: String,
    #[serde(default)]
    pub image_type: ImageType,
    pub image: ResourceRef,
    pub vpc: ResourceRef,
    pub subnet: ResourceRef,
    #[serde(default)]
    pub security_groups: Vec<ResourceRef>,
    pub spec_name: String,
    pub key_pair: ResourceRef,
    #[serde(default)]
    pub root_disk_type: Option<String>,
    #[serde(default)]
    pub root_disk_size: Option<String>,
    #[serde(default)]
    pub data_disks: Vec<ResourceRef>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_password: Option<String>,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInfo {
    pub iid: Iid,
    pub start_time: Option<DateTime<Utc>>,
    pub region: RegionInfo,
    pub image_type: ImageType,
    pub image: Iid,
    pub spec_name: String,
    pub vpc: Iid,
    pub subnet: Iid,
    pub security_groups: Vec<Iid>,
    pub key_pair: Iid,
    pub root_disk_type: String,
    pub root_disk_size: String,
    pub root_device_name: String,
    pub data_disks: Vec<Iid>,
    pub user_id: String,
    pub user_password: String,
    pub network_interface: String,
    pub public_ip: String,
    pub public_dns: String,
    pub private_ip: String,
    pub private_dns: String,
    pub platform: String,
    pub access_point: String,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatusInfo {
    pub iid: Iid,
    pub status: VmStatus,
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRequest {
    pub name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub ipv4_cidr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcRequest {
    pub name: String,
    #[serde(default)]
    pub ipv4_cidr: String,
    #[serde(default)]
    pub subnets: Vec<SubnetRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetInfo {
    pub iid: Iid,
    pub zone: String,
    pub ipv4_cidr: String,
    pub key_values: Vec<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcInfo {
    pub iid: Iid,
    pub ipv4_cidr: String,
    pub subnets: Vec<SubnetInfo>,
    pub key_values: Vec<KeyValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// One security rule. Ports are strings; `"-1"` means "all ports".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityRule {
    pub direction: Direction,
    pub ip_protocol: String,
    pub from_port: String,
    pub to_port: String,
    #[serde(default)]
    pub cidr: String,
}

impl SecurityRule {
    pub fn inbound(protocol: &str, from: &str, to: &str, cidr: &str) -> Self {
        Self {
            direction: Direction::Inbound,
            ip_protocol: protocol.to_string(),
            from_port: from.to_string(),
            to_port: to.to_string(),
            cidr: cidr.to_string(),
        }
    }

    pub fn outbound(protocol: &str, from: &str, to: &str, cidr: &str) -> Self {
        Self {
            direction: Direction::Outbound,
            ..Self::inbound(protocol, from, to, cidr)
        }
    }

    /// CIDR with the empty string read as "anywhere".
    pub fn cidr_or_any(&self) -> &str {
        if self.cidr.is_empty() {
            "0.0.0.0/0"
        } else {
            &self.cidr
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRequest {
    pub name: String,
    #[serde(default)]
    pub vpc: ResourceRef,
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupInfo {
    pub iid: Iid,
    pub vpc: Iid,
    pub rules: Vec<SecurityRule>,
    pub key_values: Vec<KeyValue>,
}

// ---------------------------------------------------------------------------
// Key pair
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairInfo {
    pub iid: Iid,
    pub fingerprint: String,
    pub public_key: String,
    /// Only populated in the response to a create call.
    pub private_key: String,
    pub vm_user_id: String,
    pub key_values: Vec<KeyValue>,
}

// ---------------------------------------------------------------------------
// Disk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiskStatus {
    Creating,
    Available,
    Attached,
    Deleting,
    Error,
}

impl fmt::Display for DiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiskStatus::Creating => "Creating",
            DiskStatus::Available => "Available",
            DiskStatus::Attached => "Attached",
            DiskStatus::Deleting => "Deleting",
            DiskStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRequest {
    pub name: String,
    #[serde(default)]
    pub zone: Option<String>,
    /// Empty or `"default"` lets the driver pick.
    #[serde(default)]
    pub disk_type: String,
    /// Size in GB; empty means the driver default.
    #[serde(default)]
    pub disk_size: String,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub iid: Iid,
    pub zone: String,
    pub disk_type: String,
    pub disk_size: String,
    pub status: DiskStatus,
    pub owner_vm: Iid,
    pub created_time: Option<DateTime<Utc>>,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageStatus {
    #[default]
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub iid: Iid,
    pub guest_os: String,
    pub status: ImageStatus,
    pub key_values: Vec<KeyValue>,
}

// ---------------------------------------------------------------------------
// VM spec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VCpuInfo {
    pub count: String,
    /// GHz, empty when the provider does not say
    pub clock: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub count: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpecInfo {
    pub region: String,
    /// The value a `VmRequest::spec_name` takes
    pub name: String,
    pub vcpu: VCpuInfo,
    pub mem_mb: String,
    /// Data disk in GB, empty for root-disk-only specs
    pub disk_gb: String,
    pub gpus: Vec<GpuInfo>,
    pub key_values: Vec<KeyValue>,
}

// ---------------------------------------------------------------------------
// NLB
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerInfo {
    pub protocol: String,
    pub ip: String,
    pub port: String,
    pub dns_name: String,
    pub key_values: Vec<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckInfo {
    pub protocol: String,
    pub port: String,
    pub interval: u32,
    pub timeout: u32,
    pub threshold: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmGroupRequest {
    pub protocol: String,
    pub port: String,
    #[serde(default)]
    pub vms: Vec<ResourceRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NlbRequest {
    pub name: String,
    pub vpc: ResourceRef,
    pub listener: ListenerInfo,
    pub vm_group: VmGroupRequest,
    /// An empty protocol means "same as the listener".
    #[serde(default)]
    pub health_checker: HealthCheckInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NlbInfo {
    pub iid: Iid,
    pub vpc: Iid,
    pub nlb_type: String,
    pub scope: String,
    pub listener: ListenerInfo,
    pub vm_group_port: String,
    pub vm_group_protocol: String,
    pub vms: Vec<Iid>,
    pub health_checker: HealthCheckInfo,
    pub created_time: Option<DateTime<Utc>>,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

/// Health of the VMs behind a load balancer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NlbHealthInfo {
    pub all_vms: Vec<Iid>,
    pub healthy_vms: Vec<Iid>,
    pub unhealthy_vms: Vec<Iid>,
}

// ---------------------------------------------------------------------------
// File system
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileSystemStatus {
    Creating,
    Available,
    Deleting,
    Error,
    #[default]
    Unknown,
}

impl fmt::Display for FileSystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileSystemStatus::Creating => "Creating",
            FileSystemStatus::Available => "Available",
            FileSystemStatus::Deleting => "Deleting",
            FileSystemStatus::Error => "Error",
            FileSystemStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemRequest {
    pub name: String,
    #[serde(default)]
    pub vpc: ResourceRef,
    /// Empty means the first subnet of `vpc`.
    #[serde(default)]
    pub access_subnets: Vec<ResourceRef>,
    /// Empty means the provider default.
    #[serde(default)]
    pub nfs_version: String,
    /// 0 means the provider default.
    #[serde(default)]
    pub capacity_gb: u64,
    #[serde(default)]
    pub iops: Option<u32>,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemInfo {
    pub iid: Iid,
    pub region: String,
    pub zone: String,
    pub vpc: Iid,
    pub access_subnets: Vec<Iid>,
    pub protocol: String,
    pub nfs_version: String,
    pub capacity_gb: u64,
    pub used_size_gb: u64,
    pub status: FileSystemStatus,
    pub created_time: Option<DateTime<Utc>>,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub resource_kind: crate::identity::ResourceKind,
    pub resource: Iid,
    pub tags: Vec<KeyValue>,
    pub key_values: Vec<KeyValue>,
}
