//! KT Cloud SDK contract
//!
//! The operations the driver needs from the KT Cloud (CloudStack based) API.
//! Mutating calls are asynchronous on the KT side: they return a
//! [`JobHandle`] whose job id is polled with `query_async_job_result`.
//!
//! Every field of a vendor struct is optional because the API omits empty
//! values; mappers decide what a missing field means.

use crate::error::ApiResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Async job status codes
pub const JOB_PENDING: i32 = 0;
pub const JOB_SUCCEEDED: i32 = 1;
pub const JOB_FAILED: i32 = 2;

/// Resource type used when tagging VMs
pub const USER_VM: &str = "userVm";

// ---------------------------------------------------------------------------
// Vendor structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct VirtualMachine {
    pub id: Option<String>,
    pub name: Option<String>,
    pub displayname: Option<String>,
    pub state: Option<String>,
    pub zoneid: Option<String>,
    pub zonename: Option<String>,
    pub templateid: Option<String>,
    pub templatename: Option<String>,
    pub serviceofferingid: Option<String>,
    pub serviceofferingname: Option<String>,
    pub cpunumber: Option<u32>,
    pub cpuspeed: Option<u32>,
    /// MB
    pub memory: Option<u64>,
    pub hypervisor: Option<String>,
    pub keypair: Option<String>,
    /// `2024-01-31T10:00:00+0900`
    pub created: Option<String>,
    #[serde(default)]
    pub nic: Vec<Nic>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct Nic {
    pub id: Option<String>,
    pub networkid: Option<String>,
    pub ipaddress: Option<String>,
}

/// Answer to an asynchronous call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct JobHandle {
    pub jobid: Option<String>,
    /// Id of the resource the job works on, when the API reports one.
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct AsyncJob {
    pub jobid: Option<String>,
    pub jobstatus: Option<i32>,
    pub jobresultcode: Option<i32>,
    pub errortext: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct PublicIp {
    pub id: Option<String>,
    pub ipaddress: Option<String>,
    pub state: Option<String>,
    pub zoneid: Option<String>,
    pub usageplantype: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct PortForwardingRule {
    pub id: Option<String>,
    pub ipaddressid: Option<String>,
    pub ipaddress: Option<String>,
    pub protocol: Option<String>,
    pub publicport: Option<String>,
    pub publicendport: Option<String>,
    pub privateport: Option<String>,
    pub privateendport: Option<String>,
    pub virtualmachineid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct FirewallRule {
    pub id: Option<String>,
    pub ipaddressid: Option<String>,
    pub protocol: Option<String>,
    pub startport: Option<String>,
    pub endport: Option<String>,
    pub cidrlist: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct Tag {
    pub key: Option<String>,
    pub value: Option<String>,
    pub resourceid: Option<String>,
    pub resourcetype: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct Volume {
    pub id: Option<String>,
    pub name: Option<String>,
    pub state: Option<String>,
    /// Bytes
    pub size: Option<u64>,
    /// `ROOT` or `DATADISK`
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub volumetype: Option<String>,
    pub diskofferingname: Option<String>,
    pub virtualmachineid: Option<String>,
    pub vmname: Option<String>,
    pub vmstate: Option<String>,
    pub maxiops: Option<u64>,
    pub usageplantype: Option<String>,
    pub attached: Option<String>,
    pub created: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct SshKeyPair {
    pub name: Option<String>,
    pub fingerprint: Option<String>,
    /// Only present in the create response.
    pub privatekey: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct Template {
    pub id: Option<String>,
    pub name: Option<String>,
    pub displaytext: Option<String>,
    pub ostypename: Option<String>,
    pub isready: Option<bool>,
    pub zoneid: Option<String>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct ServiceOffering {
    pub id: Option<String>,
    pub name: Option<String>,
    pub cpunumber: Option<u32>,
    pub cpuspeed: Option<u32>,
    pub memory: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct DiskOffering {
    pub id: Option<String>,
    pub name: Option<String>,
    /// GB
    pub disksize: Option<u64>,
}

/// Network load balancer. NLB calls are synchronous.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct Nlb {
    pub nlbid: Option<String>,
    pub name: Option<String>,
    pub zoneid: Option<String>,
    pub zonename: Option<String>,
    /// `roundrobin`, `leastconnection`, `leastresponse` or `sourceiphash`
    pub nlboption: Option<String>,
    pub state: Option<String>,
    pub serviceip: Option<String>,
    pub serviceport: Option<String>,
    pub servicetype: Option<String>,
    pub healthchecktype: Option<String>,
    pub healthcheckurl: Option<String>,
}

/// A VM behind an NLB
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct NlbVm {
    /// Membership id, used to remove the VM again
    pub serviceid: Option<String>,
    pub nlbid: Option<String>,
    pub vmid: Option<String>,
    pub ipaddress: Option<String>,
    pub publicport: Option<String>,
    /// `UP` when the health check passes
    pub state: Option<String>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VmFilter {
    pub zone_id: String,
    pub vm_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeployVmRequest {
    pub zone_id: String,
    pub service_offering_id: String,
    pub template_id: String,
    pub disk_offering_id: Option<String>,
    pub display_name: String,
    pub host_name: String,
    pub usage_plan_type: String,
    pub key_pair: String,
    /// Base64 encoded cloud-init
    pub user_data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssociateIpRequest {
    pub zone_id: String,
    pub usage_plan_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublicIpFilter {
    pub id: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleFilter {
    pub id: Option<String>,
    pub ip_address_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortForwardingRequest {
    pub ip_address_id: String,
    pub protocol: String,
    pub private_port: String,
    pub private_end_port: String,
    pub public_port: String,
    pub public_end_port: String,
    pub virtual_machine_id: String,
    /// Also opens the matching firewall rule.
    pub open_firewall: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FirewallRuleRequest {
    pub ip_address_id: String,
    pub protocol: String,
    pub cidr_list: String,
    pub start_port: Option<String>,
    pub end_port: Option<String>,
    /// `user` or `system`
    pub rule_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagArg {
    pub key: String,
    pub value: String,
}

impl TagArg {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagsRequest {
    pub resource_ids: Vec<String>,
    pub resource_type: String,
    pub tags: Vec<TagArg>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TagFilter {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VolumeFilter {
    pub zone_id: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub zone_id: String,
    pub usage_plan_type: String,
    /// e.g. `STG 100G`
    pub product_code: String,
    pub iops: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NlbFilter {
    pub zone_id: String,
    pub nlb_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateNlbRequest {
    pub name: String,
    pub zone_id: String,
    pub nlb_option: String,
    /// Empty asks KT Cloud for a new virtual IP.
    pub service_ip: String,
    pub service_port: String,
    pub service_type: String,
    pub health_check_type: String,
    /// Only used by `http` and `https` health checks
    pub health_check_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AddNlbVmRequest {
    pub nlb_id: String,
    pub vm_id: String,
    /// Public IP of the VM
    pub ip_address: String,
    pub public_port: String,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait KtCloudApi: Send + Sync {
    // Virtual machines
    async fn list_virtual_machines(&self, filter: &VmFilter) -> ApiResult<Vec<VirtualMachine>>;
    async fn deploy_virtual_machine(&self, request: &DeployVmRequest) -> ApiResult<JobHandle>;
    async fn start_virtual_machine(&self, vm_id: &str) -> ApiResult<JobHandle>;
    async fn stop_virtual_machine(&self, vm_id: &str) -> ApiResult<JobHandle>;
    async fn reboot_virtual_machine(&self, vm_id: &str) -> ApiResult<JobHandle>;
    async fn destroy_virtual_machine(&self, vm_id: &str) -> ApiResult<JobHandle>;

    // Async jobs
    async fn query_async_job_result(&self, job_id: &str) -> ApiResult<AsyncJob>;

    // Public IPs
    async fn associate_ip_address(&self, request: &AssociateIpRequest) -> ApiResult<JobHandle>;
    async fn disassociate_ip_address(&self, ip_id: &str) -> ApiResult<JobHandle>;
    async fn list_public_ip_addresses(&self, filter: &PublicIpFilter) -> ApiResult<Vec<PublicIp>>;

    // Port forwarding
    async fn create_port_forwarding_rule(&self, request: &PortForwardingRequest) -> ApiResult<JobHandle>;
    async fn delete_port_forwarding_rule(&self, rule_id: &str) -> ApiResult<JobHandle>;
    async fn list_port_forwarding_rules(&self, filter: &RuleFilter) -> ApiResult<Vec<PortForwardingRule>>;

    // Firewall
    async fn create_firewall_rule(&self, request: &FirewallRuleRequest) -> ApiResult<JobHandle>;
    async fn delete_firewall_rule(&self, rule_id: &str) -> ApiResult<JobHandle>;
    async fn list_firewall_rules(&self, filter: &RuleFilter) -> ApiResult<Vec<FirewallRule>>;

    // Tags
    async fn create_tags(&self, request: &TagsRequest) -> ApiResult<JobHandle>;
    async fn delete_tags(&self, request: &TagsRequest) -> ApiResult<JobHandle>;
    async fn list_tags(&self, filter: &TagFilter) -> ApiResult<Vec<Tag>>;

    // Volumes
    async fn list_volumes(&self, filter: &VolumeFilter) -> ApiResult<Vec<Volume>>;
    async fn create_volume(&self, request: &CreateVolumeRequest) -> ApiResult<JobHandle>;
    async fn attach_volume(&self, volume_id: &str, vm_id: &str) -> ApiResult<JobHandle>;
    async fn detach_volume(&self, volume_id: &str) -> ApiResult<JobHandle>;
    async fn delete_volume(&self, volume_id: &str) -> ApiResult<bool>;

    // SSH key pairs
    async fn list_ssh_key_pairs(&self, name: Option<&str>) -> ApiResult<Vec<SshKeyPair>>;
    async fn create_ssh_key_pair(&self, name: &str) -> ApiResult<SshKeyPair>;
    async fn delete_ssh_key_pair(&self, name: &str) -> ApiResult<bool>;

    // Network load balancers
    async fn list_nlbs(&self, filter: &NlbFilter) -> ApiResult<Vec<Nlb>>;
    /// Returns the id of the new NLB.
    async fn create_nlb(&self, request: &CreateNlbRequest) -> ApiResult<String>;
    async fn delete_nlb(&self, nlb_id: &str) -> ApiResult<bool>;
    async fn add_nlb_vm(&self, request: &AddNlbVmRequest) -> ApiResult<NlbVm>;
    async fn remove_nlb_vm(&self, service_id: &str) -> ApiResult<bool>;
    async fn list_nlb_vms(&self, nlb_id: &str) -> ApiResult<Vec<NlbVm>>;

    // Catalog
    async fn list_templates(&self, zone_id: &str) -> ApiResult<Vec<Template>>;
    async fn list_service_offerings(&self, zone_id: &str) -> ApiResult<Vec<ServiceOffering>>;
    async fn list_disk_offerings(&self, zone_id: &str) -> ApiResult<Vec<DiskOffering>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_decodes_with_missing_fields() {
        let vm: VirtualMachine = serde_json::from_str(
            r#"{"id": "vm-1", "name": "web-1", "state": "Running", "cpunumber": 2}"#,
        )
        .unwrap();
        assert_eq!(vm.id.as_deref(), Some("vm-1"));
        assert_eq!(vm.cpunumber, Some(2));
        assert!(vm.nic.is_empty());
        assert!(vm.created.is_none());
    }

    #[test]
    fn test_nlb_vm_decodes() {
        let member: NlbVm = serde_json::from_str(
            r#"{"serviceid": "7001", "vmid": "vm-1", "publicport": "80", "state": "UP"}"#,
        )
        .unwrap();
        assert_eq!(member.serviceid.as_deref(), Some("7001"));
        assert!(member.nlbid.is_none());
    }

    #[test]
    fn test_volume_type_field() {
        let volume: Volume =
            serde_json::from_str(r#"{"id": "vol-1", "type": "ROOT", "size": 21474836480}"#).unwrap();
        assert_eq!(volume.kind.as_deref(), Some("ROOT"));
        assert_eq!(volume.size, Some(20 * 1024 * 1024 * 1024));
    }
}
