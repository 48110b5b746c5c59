//! SoftLayer vendor structs to canonical info structs
//!
//! Pure functions. Whatever a VM mapping needs beyond the guest itself (the
//! VLAN object, the catalog item of its OS) is fetched by the handler and
//! passed in as a [`GuestDetail`].

use crate::api::{
    FileStorage, NetworkComponent, NetworkVlan, Preset, ProductItem, STORAGE_DELETING,
    STORAGE_FAILED, STORAGE_PENDING, STORAGE_STABLE, SecurityGroup, SecurityGroupRule, SshKey,
    Subnet, VirtualGuest,
};
use crate::lookup::{subnet_name, vlan_name};
use chrono::{DateTime, Utc};
use cloudplug_core::model::{
    Direction, FileSystemInfo, FileSystemStatus, GpuInfo, ImageInfo, ImageStatus, ImageType,
    KeyPairInfo, KeyValue, RegionInfo, SecurityGroupInfo, SecurityRule, SubnetInfo, VCpuInfo,
    VmInfo, VmSpecInfo, VmStatus, VpcInfo,
};
use cloudplug_core::{CloudError, Iid, ResourceKind, Result};

pub const INGRESS: &str = "ingress";
pub const EGRESS: &str = "egress";
pub const IPV4: &str = "IPv4";
pub const ANY_CIDR: &str = "0.0.0.0/0";

/// Canonical name of a rule without a protocol
pub const ALL_PROTOCOLS: &str = "all";

pub fn parse_created(created: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(created)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn id_string(id: Option<i64>) -> String {
    id.map(|id| id.to_string()).unwrap_or_default()
}

/// Power state name (`Running`, `Halted`, ...), empty when unknown.
pub fn power_state(guest: &VirtualGuest) -> &str {
    guest
        .power_state
        .as_ref()
        .and_then(|p| p.name.as_deref().or(p.key_name.as_deref()))
        .unwrap_or_default()
}

pub fn guest_status(guest: &VirtualGuest) -> &str {
    guest
        .status
        .as_ref()
        .and_then(|s| s.key_name.as_deref())
        .unwrap_or_default()
}

pub fn vm_status(power: &str) -> VmStatus {
    match power.to_ascii_lowercase().as_str() {
        "running" => VmStatus::Running,
        "halted" | "paused" => VmStatus::Suspended,
        // a suspended guest is on its way out
        "suspended" => VmStatus::Terminating,
        _ => VmStatus::Failed,
    }
}

/// Provider state a VM mapping needs besides the guest itself
#[derive(Debug, Clone, Default)]
pub struct GuestDetail {
    pub vlan: Option<NetworkVlan>,
    pub image: Option<ProductItem>,
}

fn interface_name(component: &NetworkComponent) -> String {
    format!(
        "{}{}",
        component.name.as_deref().unwrap_or("eth"),
        component.port.unwrap_or_default()
    )
}

fn reference_code(guest: &VirtualGuest) -> Option<&str> {
    guest
        .operating_system
        .as_ref()
        .and_then(|os| os.software_description.as_ref())
        .and_then(|sd| sd.reference_code.as_deref())
}

/// Whether a catalog OS item describes the guest's operating system.
pub fn runs_image(guest: &VirtualGuest, item: &ProductItem) -> bool {
    let wanted = reference_code(guest);
    wanted.is_some()
        && item
            .software_description
            .as_ref()
            .and_then(|sd| sd.reference_code.as_deref())
            == wanted
}

pub fn map_vm(guest: &VirtualGuest, detail: &GuestDetail, region: &str, vm_user: &str) -> VmInfo {
    let private_only = guest.private_network_only_flag.unwrap_or(false);
    let frontend = guest.frontend_network_components.first();
    let primary_nic = if private_only {
        guest.backend_network_components.first()
    } else {
        frontend
    };

    let public_ip = guest.primary_ip_address.clone().unwrap_or_default();
    let private_ip = guest.primary_backend_ip_address.clone().unwrap_or_default();
    let access_ip = if private_only || public_ip.is_empty() {
        &private_ip
    } else {
        &public_ip
    };
    let access_point = if access_ip.is_empty() {
        String::new()
    } else {
        format!("{}:22", access_ip)
    };

    let image = match &detail.image {
        Some(item) => Iid::new(item.key_name.clone().unwrap_or_default(), id_string(item.id)),
        None => {
            let code = reference_code(guest).unwrap_or_default();
            Iid::new(code, "")
        }
    };
    let platform = guest
        .operating_system
        .as_ref()
        .and_then(|os| os.software_description.as_ref())
        .and_then(|sd| sd.long_description.clone().or_else(|| sd.name.clone()))
        .unwrap_or_default();

    let security_groups = frontend
        .map(|nic| {
            nic.security_group_bindings
                .iter()
                .filter_map(|b| b.security_group.as_ref())
                .map(|g| Iid::new(g.name.clone().unwrap_or_default(), id_string(g.id)))
                .collect()
        })
        .unwrap_or_default();
    let subnet = frontend
        .and_then(|nic| nic.primary_subnet.as_ref())
        .map(|s| Iid::new(subnet_name(s), id_string(s.id)))
        .unwrap_or_default();
    let vpc = detail
        .vlan
        .as_ref()
        .map(|v| Iid::new(vlan_name(v), id_string(v.id)))
        .unwrap_or_default();

    let spec_name = guest
        .billing_item
        .as_ref()
        .and_then(|b| b.order_item.as_ref())
        .and_then(|o| o.preset.as_ref())
        .and_then(|p| p.key_name.clone())
        .unwrap_or_default();
    let key_pair = guest
        .ssh_keys
        .first()
        .map(|k| Iid::new(k.label.clone().unwrap_or_default(), id_string(k.id)))
        .unwrap_or_default();
    let datacenter = guest
        .datacenter
        .as_ref()
        .and_then(|d| d.name.clone())
        .unwrap_or_default();

    let mut key_values = vec![
        KeyValue::new("PowerState", power_state(guest)),
        KeyValue::new("Status", guest_status(guest)),
        KeyValue::new("PrivateNetworkOnly", private_only.to_string()),
    ];
    if let Some(domain) = &guest.domain {
        key_values.push(KeyValue::new("Domain", domain));
    }
    if let Some(cpu) = guest.max_cpu {
        key_values.push(KeyValue::new("MaxCpu", cpu.to_string()));
    }
    if let Some(memory) = guest.max_memory {
        key_values.push(KeyValue::new("MaxMemoryMB", memory.to_string()));
    }

    VmInfo {
        iid: Iid::new(guest.hostname.clone().unwrap_or_default(), id_string(guest.id)),
        start_time: guest.create_date.as_deref().and_then(parse_created),
        region: RegionInfo {
            region: region.to_string(),
            zone: datacenter,
        },
        image_type: ImageType::PublicImage,
        image,
        spec_name,
        vpc,
        subnet,
        security_groups,
        key_pair,
        user_id: vm_user.to_string(),
        network_interface: primary_nic.map(interface_name).unwrap_or_default(),
        access_point,
        public_ip: if private_only { String::new() } else { public_ip },
        private_ip,
        platform,
        key_values,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Security rules
// ---------------------------------------------------------------------------

fn full_range(protocol: Option<&str>) -> (i64, i64) {
    match protocol {
        Some("icmp") => (0, 255),
        Some(_) => (1, 65535),
        None => (0, 65535),
    }
}

fn parse_port(value: &str, rule: &SecurityRule) -> Result<i64> {
    value.trim().parse().map_err(|_| {
        CloudError::validation(
            ResourceKind::SecurityGroup,
            format!("port '{}' of {} {} rule is not a number", value, rule.direction, rule.ip_protocol),
        )
    })
}

/// Converts a canonical rule into a SoftLayer rule.
///
/// A port of `"-1"` on either end stands for the protocol's full range.
pub fn to_vendor_rule(rule: &SecurityRule) -> Result<SecurityGroupRule> {
    let protocol = rule.ip_protocol.trim().to_ascii_lowercase();
    let protocol = match protocol.as_str() {
        "tcp" | "udp" | "icmp" => Some(protocol),
        "all" | "-1" => None,
        other => {
            return Err(CloudError::validation(
                ResourceKind::SecurityGroup,
                format!("unsupported protocol '{}'", other),
            ));
        }
    };

    let (min, max) = full_range(protocol.as_deref());
    let (from, to) = if rule.from_port.trim() == "-1" || rule.to_port.trim() == "-1" || protocol.is_none() {
        (min, max)
    } else {
        (parse_port(&rule.from_port, rule)?, parse_port(&rule.to_port, rule)?)
    };
    if from > to || from < min || to > max {
        return Err(CloudError::validation(
            ResourceKind::SecurityGroup,
            format!(
                "port range {}-{} is outside {}-{} for {}",
                from,
                to,
                min,
                max,
                protocol.as_deref().unwrap_or(ALL_PROTOCOLS)
            ),
        ));
    }

    Ok(SecurityGroupRule {
        id: None,
        direction: Some(
            match rule.direction {
                Direction::Inbound => INGRESS,
                Direction::Outbound => EGRESS,
            }
            .to_string(),
        ),
        ethertype: Some(IPV4.to_string()),
        port_range_min: protocol.as_ref().map(|_| from),
        port_range_max: protocol.as_ref().map(|_| to),
        protocol,
        remote_ip: Some(rule.cidr_or_any().to_string()),
    })
}

/// Direction, protocol, port range and CIDR with SoftLayer's defaults
/// filled in.
fn normalized(rule: &SecurityGroupRule) -> (Direction, String, i64, i64, String) {
    let protocol = rule.protocol.as_deref().map(str::to_ascii_lowercase);
    let (mut min, mut max) = full_range(protocol.as_deref());
    if let (Some(from), Some(to)) = (rule.port_range_min, rule.port_range_max)
        && !(protocol.as_deref() == Some("icmp") && from == 0 && to == 0)
    {
        min = from;
        max = to;
    }
    let direction = if rule.direction.as_deref() == Some(INGRESS) {
        Direction::Inbound
    } else {
        Direction::Outbound
    };
    let cidr = rule
        .remote_ip
        .clone()
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| ANY_CIDR.to_string());
    (direction, protocol.unwrap_or_else(|| ALL_PROTOCOLS.to_string()), min, max, cidr)
}

/// Converts a SoftLayer rule into a canonical one. IPv6 rules have no
/// canonical form and map to `None`.
pub fn from_vendor_rule(rule: &SecurityGroupRule) -> Option<SecurityRule> {
    if rule.ethertype.as_deref().is_some_and(|e| !e.eq_ignore_ascii_case(IPV4)) {
        return None;
    }
    let (direction, protocol, from, to, cidr) = normalized(rule);
    Some(SecurityRule {
        direction,
        ip_protocol: protocol,
        from_port: from.to_string(),
        to_port: to.to_string(),
        cidr,
    })
}

/// Whether an existing SoftLayer rule is the one `wanted` describes.
pub fn same_rule(existing: &SecurityGroupRule, wanted: &SecurityGroupRule) -> bool {
    normalized(existing) == normalized(wanted)
}

pub fn map_security_group(group: &SecurityGroup) -> SecurityGroupInfo {
    let mut key_values = Vec::new();
    if let Some(description) = group.description.as_deref().filter(|d| !d.is_empty()) {
        key_values.push(KeyValue::new("Description", description));
    }
    if let Some(created) = &group.create_date {
        key_values.push(KeyValue::new("CreatedTime", created));
    }
    SecurityGroupInfo {
        iid: Iid::new(group.name.clone().unwrap_or_default(), id_string(group.id)),
        // security groups are account wide on SoftLayer
        vpc: Iid::default(),
        rules: group.rules.iter().filter_map(from_vendor_rule).collect(),
        key_values,
    }
}

// ---------------------------------------------------------------------------
// Keys, networks, images
// ---------------------------------------------------------------------------

pub fn map_key_pair(key: &SshKey, vm_user: &str) -> KeyPairInfo {
    let mut key_values = Vec::new();
    if let Some(created) = &key.create_date {
        key_values.push(KeyValue::new("CreatedTime", created));
    }
    KeyPairInfo {
        iid: Iid::new(key.label.clone().unwrap_or_default(), id_string(key.id)),
        fingerprint: key.fingerprint.clone().unwrap_or_default(),
        public_key: key.key.clone().unwrap_or_default(),
        private_key: String::new(),
        vm_user_id: vm_user.to_string(),
        key_values,
    }
}

pub fn map_subnet(subnet: &Subnet, datacenter: &str) -> SubnetInfo {
    let mut key_values = Vec::new();
    if let Some(gateway) = &subnet.gateway {
        key_values.push(KeyValue::new("Gateway", gateway));
    }
    if let Some(usable) = subnet.usable_ip_address_count {
        key_values.push(KeyValue::new("UsableIpAddressCount", usable.to_string()));
    }
    let name = subnet_name(subnet);
    SubnetInfo {
        iid: Iid::new(&name, id_string(subnet.id)),
        zone: datacenter.to_string(),
        ipv4_cidr: name,
        key_values,
    }
}

pub fn map_vpc(vlan: &NetworkVlan, subnets: &[Subnet], datacenter: &str) -> VpcInfo {
    let mut key_values = vec![KeyValue::new(
        "NetworkSpace",
        vlan.network_space.as_deref().unwrap_or_default(),
    )];
    if let Some(name) = vlan.name.as_deref().filter(|n| !n.is_empty()) {
        key_values.push(KeyValue::new("VlanName", name));
    }
    VpcInfo {
        iid: Iid::new(vlan_name(vlan), id_string(vlan.id)),
        ipv4_cidr: String::new(),
        subnets: subnets.iter().map(|s| map_subnet(s, datacenter)).collect(),
        key_values,
    }
}

pub fn map_image(item: &ProductItem) -> ImageInfo {
    let software = item.software_description.as_ref();
    let mut key_values = Vec::new();
    if let Some(code) = software.and_then(|sd| sd.reference_code.as_deref()) {
        key_values.push(KeyValue::new("ReferenceCode", code));
    }
    ImageInfo {
        iid: Iid::new(item.key_name.clone().unwrap_or_default(), id_string(item.id)),
        guest_os: item
            .description
            .clone()
            .or_else(|| software.and_then(|sd| sd.long_description.clone()))
            .unwrap_or_default(),
        status: ImageStatus::Available,
        key_values,
    }
}

// ---------------------------------------------------------------------------
// VM specs
// ---------------------------------------------------------------------------

/// A catalog capacity (`"2"`, `"2.0"`) as a whole number string
fn whole(capacity: Option<&str>) -> String {
    let value: f64 = capacity.and_then(|c| c.trim().parse().ok()).unwrap_or_default();
    format!("{:.0}", value)
}

fn memory_mb(item: &ProductItem) -> String {
    let value: f64 = item
        .capacity
        .as_deref()
        .and_then(|c| c.trim().parse().ok())
        .unwrap_or_default();
    let factor = match item.units.as_deref() {
        Some(u) if u.eq_ignore_ascii_case("MB") => 1.0,
        Some(u) if u.eq_ignore_ascii_case("TB") => 1024.0 * 1024.0,
        _ => 1024.0,
    };
    format!("{:.0}", value * factor)
}

/// The last word of `text` directly followed by `marker`
fn word_before<'a>(text: &'a str, separator: char, marker: &str) -> &'a str {
    let words: Vec<&str> = text.split(separator).collect();
    words
        .windows(2)
        .filter(|pair| pair[1] == marker)
        .map(|pair| pair[0])
        .next_back()
        .unwrap_or_default()
}

/// Whether a preset can be ordered in `datacenter`
pub fn offered_in(preset: &Preset, datacenter: &str) -> bool {
    preset.location_count.unwrap_or(0) == 0
        || preset
            .locations
            .iter()
            .any(|l| l.name.as_deref() == Some(datacenter))
}

/// Spec of a preset, read off its price items: `RAM` for memory, `CORE`
/// for the vCPUs and their clock, `GPU` for accelerators.
pub fn map_vm_spec(preset: &Preset, region: &str) -> VmSpecInfo {
    let mut spec = VmSpecInfo {
        region: region.to_string(),
        name: preset.key_name.clone().unwrap_or_default(),
        ..Default::default()
    };
    for item in preset.prices.iter().filter_map(|p| p.item.as_ref()) {
        let key = item.key_name.as_deref().unwrap_or_default();
        if key.contains("RAM") {
            spec.mem_mb = memory_mb(item);
        }
        if key.contains("CORE") {
            spec.vcpu = VCpuInfo {
                count: whole(item.capacity.as_deref()),
                clock: word_before(item.description.as_deref().unwrap_or_default(), ' ', "GHz").to_string(),
            };
        }
        if key.contains("GPU") {
            spec.gpus.push(GpuInfo {
                count: whole(item.capacity.as_deref()),
                model: word_before(key, '_', "GPU").to_string(),
            });
        }
    }
    spec.key_values.push(KeyValue::new("PresetId", id_string(preset.id)));
    if let Some(description) = &preset.description {
        spec.key_values.push(KeyValue::new("Description", description));
    }
    spec
}

// ---------------------------------------------------------------------------
// File storage
// ---------------------------------------------------------------------------

pub const NFS: &str = "NFS";
pub const NFS_VERSION: &str = "4.1";

pub fn file_system_status(lifecycle: &str) -> FileSystemStatus {
    match lifecycle.to_ascii_lowercase().as_str() {
        STORAGE_STABLE => FileSystemStatus::Available,
        STORAGE_PENDING => FileSystemStatus::Creating,
        STORAGE_DELETING => FileSystemStatus::Deleting,
        STORAGE_FAILED => FileSystemStatus::Error,
        _ => FileSystemStatus::Unknown,
    }
}

/// Name a volume goes by: its notes, or the SoftLayer username when unnamed
pub fn storage_name(storage: &FileStorage) -> String {
    storage
        .notes
        .clone()
        .filter(|n| !n.is_empty())
        .or_else(|| storage.username.clone())
        .unwrap_or_default()
}

/// `vlans` are the datacenter's VLANs; the VPC of a volume is the VLAN of
/// its first allowed subnet.
pub fn map_file_system(storage: &FileStorage, vlans: &[NetworkVlan], region: &str) -> FileSystemInfo {
    let vpc = storage
        .allowed_subnets
        .iter()
        .filter_map(|s| s.network_vlan_id)
        .find_map(|vlan_id| vlans.iter().find(|v| v.id == Some(vlan_id)))
        .map(|vlan| Iid::new(vlan_name(vlan), id_string(vlan.id)))
        .unwrap_or_default();
    let used_bytes: u64 = storage
        .bytes_used
        .as_deref()
        .and_then(|b| b.parse().ok())
        .unwrap_or_default();

    let mut key_values = Vec::new();
    if let Some(username) = &storage.username {
        key_values.push(KeyValue::new("Username", username));
    }
    if let Some(mount) = &storage.file_network_mount_address {
        key_values.push(KeyValue::new("MountAddress", mount));
    }
    if let Some(iops) = &storage.provisioned_iops {
        key_values.push(KeyValue::new("ProvisionedIops", iops));
    }

    FileSystemInfo {
        iid: Iid::new(storage_name(storage), id_string(storage.id)),
        region: region.to_string(),
        zone: storage
            .datacenter
            .as_ref()
            .and_then(|d| d.name.clone())
            .unwrap_or_else(|| region.to_string()),
        vpc,
        access_subnets: storage
            .allowed_subnets
            .iter()
            .map(|s| Iid::new(subnet_name(s), id_string(s.id)))
            .collect(),
        protocol: NFS.to_string(),
        nfs_version: NFS_VERSION.to_string(),
        capacity_gb: storage.capacity_gb.unwrap_or_default(),
        used_size_gb: used_bytes / (1024 * 1024 * 1024),
        status: file_system_status(storage.lifecycle_state.as_deref().unwrap_or_default()),
        created_time: storage.create_date.as_deref().and_then(parse_created),
        tags: Vec::new(),
        key_values,
    }
}
