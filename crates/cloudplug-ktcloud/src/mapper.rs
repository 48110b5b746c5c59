//! KT Cloud vendor structs to canonical info structs
//!
//! Everything here is pure. Whatever a mapper needs beyond the vendor struct
//! itself (tags, port-forwarding rules) is fetched by the handler first and
//! passed in.

use crate::api::{
    DiskOffering, Nlb, NlbVm, PortForwardingRule, ServiceOffering, Tag, Template, VirtualMachine,
    Volume,
};
use crate::spec::VmSpec;
use chrono::{DateTime, Utc};
use cloudplug_core::Iid;
use cloudplug_core::model::{
    DiskInfo, DiskStatus, HealthCheckInfo, ImageInfo, ImageStatus, ImageType, KeyValue,
    ListenerInfo, NlbHealthInfo, NlbInfo, RegionInfo, VCpuInfo, VmInfo, VmSpecInfo, VmStatus,
};
use std::collections::HashMap;

// Tags written on every VM the driver creates
pub const TAG_VPC: &str = "vpcId";
pub const TAG_SUBNET: &str = "subnetId";
pub const TAG_SECURITY_GROUPS: &str = "SecurityGroups";
pub const TAG_PUBLIC_IP: &str = "vmPublicIpId";
pub const TAG_SPEC: &str = "vmSpecId";

pub const BOOT_DEVICE: &str = "/dev/xvda";
const GIB: u64 = 1024 * 1024 * 1024;

/// `2024-05-01T09:00:00+0900`
pub fn parse_created(created: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(created, "%Y-%m-%dT%H:%M:%S%z")
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Unmapped states are `Unknown`, not `Failed`; only `Error` is a failure.
pub fn vm_status(state: &str) -> VmStatus {
    match state.to_ascii_lowercase().as_str() {
        "creating" => VmStatus::Creating,
        "starting" | "booting" => VmStatus::Booting,
        "running" => VmStatus::Running,
        "stopping" => VmStatus::Suspending,
        "stopped" => VmStatus::Suspended,
        "rebooting" => VmStatus::Rebooting,
        "destroying" | "expunging" => VmStatus::Terminating,
        "destroyed" => VmStatus::Terminated,
        "error" => VmStatus::Failed,
        _ => VmStatus::Unknown,
    }
}

pub fn zone_display_name(zone: &str) -> &str {
    match zone.to_ascii_lowercase().as_str() {
        "kr-0" => "KOR-Seoul M",
        "kr-md2-1" => "KOR-Seoul M2",
        "kr-1" => "KOR-Central A",
        "kr-2" => "KOR-Central B",
        "kr-3" => "KOR-HA",
        _ => zone,
    }
}

/// Provider state a VM mapping needs besides the VM itself
#[derive(Debug, Clone, Default)]
pub struct VmEnrichment {
    pub port_forwarding: Vec<PortForwardingRule>,
    pub tags: Vec<Tag>,
}

impl VmEnrichment {
    /// Public address, taken from the first port-forwarding rule of the VM.
    pub fn public_ip(&self, vm_id: &str) -> Option<&str> {
        self.port_forwarding
            .iter()
            .find(|r| r.virtualmachineid.as_deref() == Some(vm_id))
            .and_then(|r| r.ipaddress.as_deref())
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key.as_deref() == Some(key))
            .and_then(|t| t.value.as_deref())
            .filter(|v| !v.is_empty())
    }

    fn security_groups(&self) -> Vec<Iid> {
        self.tag(TAG_SECURITY_GROUPS)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Iid::new(s, s))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tags set by the user, without the driver's bookkeeping tags.
    fn user_tags(&self) -> Vec<KeyValue> {
        const RESERVED: [&str; 5] = [TAG_VPC, TAG_SUBNET, TAG_SECURITY_GROUPS, TAG_PUBLIC_IP, TAG_SPEC];
        self.tags
            .iter()
            .filter_map(|t| Some((t.key.as_deref()?, t.value.as_deref().unwrap_or_default())))
            .filter(|(k, _)| !RESERVED.contains(k))
            .map(|(k, v)| KeyValue::new(k, v))
            .collect()
    }
}

fn same_iid(value: Option<&str>) -> Iid {
    let v = value.unwrap_or_default();
    Iid::new(v, v)
}

pub fn map_vm(vm: &VirtualMachine, enrichment: &VmEnrichment, region: &str, vm_user: &str) -> VmInfo {
    let id = vm.id.clone().unwrap_or_default();
    let name = vm.name.clone().or_else(|| vm.displayname.clone()).unwrap_or_default();
    let public_ip = enrichment.public_ip(&id).unwrap_or_default().to_string();
    let nic = vm.nic.first();
    let zone = vm.zonename.as_deref().or(vm.zoneid.as_deref()).unwrap_or_default();

    let spec_name = enrichment
        .tag(TAG_SPEC)
        .map(str::to_string)
        .or_else(|| vm.serviceofferingid.clone())
        .unwrap_or_default();
    let root_disk_size = spec_name
        .parse::<VmSpec>()
        .map(|s| s.disk_size_label())
        .unwrap_or_default();

    let state = vm.state.as_deref().unwrap_or_default();
    let memory_gb = vm.memory.unwrap_or(0) / 1024;

    VmInfo {
        iid: Iid::new(name, id),
        start_time: vm.created.as_deref().and_then(parse_created),
        region: RegionInfo {
            region: region.to_string(),
            zone: zone_display_name(zone).to_string(),
        },
        image_type: ImageType::PublicImage,
        image: Iid::new(
            vm.templatename.clone().unwrap_or_default(),
            vm.templateid.clone().unwrap_or_default(),
        ),
        spec_name,
        vpc: same_iid(enrichment.tag(TAG_VPC)),
        subnet: same_iid(enrichment.tag(TAG_SUBNET)),
        security_groups: enrichment.security_groups(),
        // KT key pairs have no separate id
        key_pair: same_iid(vm.keypair.as_deref()),
        root_disk_size,
        root_device_name: BOOT_DEVICE.to_string(),
        user_id: vm_user.to_string(),
        user_password: "N/A".to_string(),
        network_interface: nic.and_then(|n| n.id.clone()).unwrap_or_default(),
        access_point: if public_ip.is_empty() {
            String::new()
        } else {
            format!("{}:22", public_ip)
        },
        public_ip,
        private_ip: nic.and_then(|n| n.ipaddress.clone()).unwrap_or_default(),
        platform: "LINUX".to_string(),
        tags: enrichment.user_tags(),
        key_values: vec![
            KeyValue::new("CpuCount", vm.cpunumber.unwrap_or(0).to_string()),
            KeyValue::new("CpuSpeed", vm.cpuspeed.unwrap_or(0).to_string()),
            KeyValue::new("MemorySize(GB)", memory_gb.to_string()),
            KeyValue::new("Hypervisor", vm.hypervisor.clone().unwrap_or_default()),
            KeyValue::new("Zone", zone),
            KeyValue::new("Template", vm.templatename.clone().unwrap_or_default()),
            KeyValue::new("VMStatus", vm_status(state).to_string()),
            KeyValue::new(
                "VMNetworkID",
                nic.and_then(|n| n.networkid.clone()).unwrap_or_default(),
            ),
        ],
        ..Default::default()
    }
}

pub fn disk_status(volume: &Volume) -> DiskStatus {
    if volume.virtualmachineid.as_deref().is_some_and(|v| !v.is_empty()) {
        return DiskStatus::Attached;
    }
    let state = volume.state.as_deref().unwrap_or_default().to_ascii_lowercase();
    match state.as_str() {
        "creating" | "pending" => DiskStatus::Creating,
        "allocated" => DiskStatus::Available,
        "ready" | "attached" => DiskStatus::Attached,
        "deleting" => DiskStatus::Deleting,
        // error, error_creating, ...
        _ => DiskStatus::Error,
    }
}

/// `HDD` or `SSD`
pub fn disk_type(volume: &Volume) -> &'static str {
    match volume.volumetype.as_deref() {
        Some("general") => "HDD",
        Some("ssd") => "SSD",
        _ => {
            let offering = volume.diskofferingname.as_deref().unwrap_or_default();
            if offering.to_ascii_uppercase().contains("SSD") {
                "SSD"
            } else {
                "HDD"
            }
        }
    }
}

/// Root disks and OS images cannot be detached.
pub fn is_bootable(volume: &Volume) -> bool {
    if volume.kind.as_deref() == Some("ROOT") {
        return true;
    }
    let offering = volume.diskofferingname.as_deref().unwrap_or_default().to_ascii_lowercase();
    offering.contains("linux") || offering.contains("win")
}

pub fn map_disk(volume: &Volume, zone: &str) -> DiskInfo {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    DiskInfo {
        iid: Iid::new(opt(&volume.name), opt(&volume.id)),
        zone: zone.to_string(),
        disk_type: disk_type(volume).to_string(),
        disk_size: (volume.size.unwrap_or(0) / GIB).to_string(),
        status: disk_status(volume),
        owner_vm: Iid::new(opt(&volume.vmname), opt(&volume.virtualmachineid)),
        created_time: volume.created.as_deref().and_then(parse_created),
        tags: Vec::new(),
        key_values: vec![
            KeyValue::new("Type", opt(&volume.kind)),
            KeyValue::new("MaxIOPS", volume.maxiops.map(|i| i.to_string()).unwrap_or_default()),
            KeyValue::new("UsagePlanType", opt(&volume.usageplantype)),
            KeyValue::new("AttachedTime", opt(&volume.attached)),
            KeyValue::new("VMState", opt(&volume.vmstate)),
        ],
    }
}

pub fn map_image(template: &Template) -> ImageInfo {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    ImageInfo {
        iid: Iid::new(opt(&template.name), opt(&template.id)),
        guest_os: template
            .ostypename
            .clone()
            .or_else(|| template.displaytext.clone())
            .unwrap_or_default(),
        status: if template.isready.unwrap_or(false) {
            ImageStatus::Available
        } else {
            ImageStatus::Unavailable
        },
        key_values: vec![
            KeyValue::new("DisplayText", opt(&template.displaytext)),
            KeyValue::new("ZoneId", opt(&template.zoneid)),
            KeyValue::new(
                "Size(GB)",
                template.size.map(|s| (s / GIB).to_string()).unwrap_or_default(),
            ),
        ],
    }
}

/// One spec per service offering and data disk choice. `disk` is `None`
/// for the root-disk-only spec.
pub fn map_vm_spec(offering: &ServiceOffering, disk: Option<&DiskOffering>, region: &str, zone: &str) -> VmSpecInfo {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let service_offering_id = opt(&offering.id);
    let spec = match disk {
        Some(d) => VmSpec {
            service_offering_id,
            disk_offering_id: Some(opt(&d.id)),
            disk_size_gb: d.disksize.and_then(|n| u32::try_from(n).ok()),
        },
        None => VmSpec::root_only(service_offering_id),
    };
    let mut key_values = vec![
        KeyValue::new("Zone", zone),
        KeyValue::new("KtServiceOffering", opt(&offering.name)),
    ];
    if let Some(d) = disk {
        key_values.push(KeyValue::new("KtDiskOffering", opt(&d.name)));
    }
    VmSpecInfo {
        region: region.to_string(),
        name: spec.to_string(),
        vcpu: VCpuInfo {
            count: offering.cpunumber.map(|n| n.to_string()).unwrap_or_default(),
            clock: offering
                .cpuspeed
                .map(|mhz| format!("{:.1}", f64::from(mhz) / 1000.0))
                .unwrap_or_default(),
        },
        mem_mb: offering.memory.map(|m| m.to_string()).unwrap_or_default(),
        disk_gb: spec.disk_size_label(),
        gpus: Vec::new(),
        key_values,
    }
}

/// `vm_names` maps VM ids to names; members without an entry keep their id
/// as name.
pub fn map_nlb(nlb: &Nlb, members: &[NlbVm], vm_names: &HashMap<String, String>, vpc: Option<&str>) -> NlbInfo {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let port = opt(&nlb.serviceport);
    let protocol = opt(&nlb.servicetype);

    let mut key_values = vec![
        KeyValue::new("NLB_Method", opt(&nlb.nlboption)),
        KeyValue::new("NLB_State", opt(&nlb.state)),
        KeyValue::new("NLB_ServiceIP", opt(&nlb.serviceip)),
        KeyValue::new("NLB_ServicePort", &port),
        KeyValue::new("ZoneName", opt(&nlb.zonename)),
    ];
    let mut vms = Vec::with_capacity(members.len());
    for member in members {
        let vm = member_iid(member, vm_names);
        key_values.push(KeyValue::new(format!("{}_ServiceId", vm.name_id), opt(&member.serviceid)));
        vms.push(vm);
    }

    NlbInfo {
        iid: Iid::new(opt(&nlb.name), opt(&nlb.nlbid)),
        vpc: vpc.map(|v| Iid::new(v, v)).unwrap_or_default(),
        nlb_type: "PUBLIC".to_string(),
        scope: "REGION".to_string(),
        listener: ListenerInfo {
            protocol: protocol.clone(),
            ip: opt(&nlb.serviceip),
            port: port.clone(),
            dns_name: "N/A".to_string(),
            key_values: Vec::new(),
        },
        vm_group_port: members
            .first()
            .and_then(|m| m.publicport.clone())
            .unwrap_or_else(|| port.clone()),
        vm_group_protocol: protocol,
        vms,
        health_checker: HealthCheckInfo {
            protocol: opt(&nlb.healthchecktype),
            port,
            ..Default::default()
        },
        created_time: None,
        tags: Vec::new(),
        key_values,
    }
}

fn member_iid(member: &NlbVm, vm_names: &HashMap<String, String>) -> Iid {
    let vm_id = member.vmid.clone().unwrap_or_default();
    let name = vm_names.get(&vm_id).cloned().unwrap_or_else(|| vm_id.clone());
    Iid::new(name, vm_id)
}

/// Members reporting `UP` are healthy.
pub fn nlb_health(members: &[NlbVm], vm_names: &HashMap<String, String>) -> NlbHealthInfo {
    let mut health = NlbHealthInfo::default();
    for member in members {
        let vm = member_iid(member, vm_names);
        if member.state.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("up")) {
            health.healthy_vms.push(vm.clone());
        } else {
            health.unhealthy_vms.push(vm.clone());
        }
        health.all_vms.push(vm);
    }
    health
}
