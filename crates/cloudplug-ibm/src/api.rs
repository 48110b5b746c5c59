//! SoftLayer SDK contract
//!
//! The subset of the SoftLayer services the driver talks to: account,
//! virtual guests, the product catalog and ordering, network VLANs and
//! subnets, security groups, SSH keys and NAS file storage.
//!
//! Vendor structs use the API's camelCase field names. Every field is
//! optional because object masks decide what the API returns.

use crate::error::ApiResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Package all public virtual servers are ordered from
pub const PUBLIC_CLOUD_SERVER: &str = "PUBLIC_CLOUD_SERVER";

/// Guest status once provisioning is done
pub const STATUS_ACTIVE: &str = "ACTIVE";

pub const NETWORK_PUBLIC: &str = "PUBLIC";
pub const NETWORK_PRIVATE: &str = "PRIVATE";
pub const SUBNET_PRIMARY: &str = "PRIMARY";

pub const CATEGORY_OS: &str = "os";
pub const CATEGORY_PORT_SPEED: &str = "port_speed";

/// `lifecycleState` values of a file storage volume
pub const STORAGE_PENDING: &str = "pending";
pub const STORAGE_STABLE: &str = "stable";
pub const STORAGE_DELETING: &str = "deleting";
pub const STORAGE_FAILED: &str = "failed";

// ---------------------------------------------------------------------------
// Vendor structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Option<i64>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datacenter {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub long_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerState {
    /// `RUNNING`, `HALTED`, `PAUSED`, `SUSPENDED`
    pub key_name: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestStatus {
    pub key_name: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Password {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareDescription {
    pub name: Option<String>,
    pub version: Option<String>,
    pub reference_code: Option<String>,
    pub long_description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystem {
    pub software_description: Option<SoftwareDescription>,
    #[serde(default)]
    pub passwords: Vec<Password>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupBinding {
    pub security_group: Option<SecurityGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkComponent {
    pub id: Option<i64>,
    /// `eth`
    pub name: Option<String>,
    pub port: Option<u32>,
    pub mac_address: Option<String>,
    pub primary_ip_address: Option<String>,
    pub network_vlan_id: Option<i64>,
    pub primary_subnet: Option<Subnet>,
    #[serde(default)]
    pub security_group_bindings: Vec<SecurityGroupBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub preset: Option<Preset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingItem {
    pub id: Option<i64>,
    pub order_item: Option<OrderItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualGuest {
    pub id: Option<i64>,
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub datacenter: Option<Datacenter>,
    pub power_state: Option<PowerState>,
    pub status: Option<GuestStatus>,
    /// RFC 3339
    pub create_date: Option<String>,
    pub max_cpu: Option<u32>,
    /// MB
    pub max_memory: Option<u64>,
    pub primary_ip_address: Option<String>,
    pub primary_backend_ip_address: Option<String>,
    pub private_network_only_flag: Option<bool>,
    #[serde(default)]
    pub frontend_network_components: Vec<NetworkComponent>,
    #[serde(default)]
    pub backend_network_components: Vec<NetworkComponent>,
    pub operating_system: Option<OperatingSystem>,
    pub billing_item: Option<BillingItem>,
    #[serde(default)]
    pub ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    pub hostname: Option<String>,
    pub datacenter: Option<Datacenter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkVlan {
    pub id: Option<i64>,
    pub vlan_number: Option<u32>,
    pub name: Option<String>,
    /// `PUBLIC` or `PRIVATE`
    pub network_space: Option<String>,
    pub primary_router: Option<Router>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub id: Option<i64>,
    pub network_identifier: Option<String>,
    pub cidr: Option<u32>,
    pub gateway: Option<String>,
    /// `PRIMARY`, `SECONDARY_ON_VLAN`, ...
    pub subnet_type: Option<String>,
    pub network_vlan_id: Option<i64>,
    pub usable_ip_address_count: Option<u32>,
    pub virtual_guest_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub create_date: Option<String>,
    #[serde(default)]
    pub rules: Vec<SecurityGroupRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRule {
    pub id: Option<i64>,
    /// `ingress` or `egress`
    pub direction: Option<String>,
    /// `IPv4` or `IPv6`
    pub ethertype: Option<String>,
    /// `tcp`, `udp`, `icmp`; absent means every protocol
    pub protocol: Option<String>,
    pub port_range_min: Option<i64>,
    pub port_range_max: Option<i64>,
    pub remote_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKey {
    pub id: Option<i64>,
    pub label: Option<String>,
    pub key: Option<String>,
    pub fingerprint: Option<String>,
    pub create_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPackage {
    pub id: Option<i64>,
    pub key_name: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCategory {
    pub id: Option<i64>,
    pub category_code: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPrice {
    pub id: Option<i64>,
    /// `None` for the standard price that applies in every location
    pub location_group_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductItem {
    pub id: Option<i64>,
    pub key_name: Option<String>,
    pub description: Option<String>,
    /// Port speed in Mbps for `port_speed` items, cores for `guest_core`
    /// items, memory for `ram` items
    pub capacity: Option<String>,
    /// Unit of `capacity` (`GB` for memory)
    pub units: Option<String>,
    #[serde(default)]
    pub item_category: Option<ItemCategory>,
    #[serde(default)]
    pub prices: Vec<ItemPrice>,
    pub software_description: Option<SoftwareDescription>,
    pub active_usage_price_count: Option<u32>,
    pub capacity_restricted_product_flag: Option<bool>,
    /// Set on port speed items that only carry private traffic
    #[serde(default)]
    pub private_network_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: Option<i64>,
    pub key_name: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// The items the preset is made of
    #[serde(default)]
    pub prices: Vec<PresetPrice>,
    /// 0 when the preset is offered everywhere
    pub location_count: Option<u32>,
    #[serde(default)]
    pub locations: Vec<Datacenter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetPrice {
    pub id: Option<i64>,
    pub item: Option<ProductItem>,
}

/// `SoftLayer_Network_Storage` of type NAS. The user given name is kept in
/// `notes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStorage {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub notes: Option<String>,
    pub capacity_gb: Option<u64>,
    pub provisioned_iops: Option<String>,
    pub bytes_used: Option<String>,
    pub file_network_mount_address: Option<String>,
    pub service_resource_backend_ip_address: Option<String>,
    pub datacenter: Option<Datacenter>,
    /// `pending`, `stable`, `deleting`, `failed`
    pub lifecycle_state: Option<String>,
    pub create_date: Option<String>,
    #[serde(default)]
    pub allowed_subnets: Vec<Subnet>,
}

/// Performance NAS order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStorageOrder {
    pub name: String,
    /// Datacenter name
    pub location: String,
    pub capacity_gb: u64,
    pub iops: u32,
    pub nfs_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNetworkComponent {
    pub network_vlan_id: Option<i64>,
    pub primary_subnet_id: Option<i64>,
    #[serde(default)]
    pub security_group_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderGuest {
    pub hostname: String,
    pub domain: String,
    pub primary_network_component: Option<OrderNetworkComponent>,
    pub primary_backend_network_component: Option<OrderNetworkComponent>,
}

/// `SoftLayer_Container_Product_Order_Virtual_Guest`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductOrder {
    pub package_id: i64,
    /// Datacenter id
    pub location: String,
    pub preset_id: Option<i64>,
    pub quantity: u32,
    pub use_hourly_pricing: bool,
    /// Price ids
    pub prices: Vec<i64>,
    pub virtual_guests: Vec<OrderGuest>,
    pub ssh_key_ids: Vec<i64>,
    pub user_data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: Option<i64>,
    #[serde(default)]
    pub placed_guest_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestFilter {
    pub datacenter: Option<String>,
    pub hostname: Option<String>,
}

// ---------------------------------------------------------------------------
// SDK trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SoftLayerApi: Send + Sync {
    async fn get_account(&self) -> ApiResult<Account>;

    // Virtual guests
    async fn list_virtual_guests(&self, filter: &GuestFilter) -> ApiResult<Vec<VirtualGuest>>;
    /// Fails with `NotFound` for an unknown id.
    async fn get_virtual_guest(&self, id: i64) -> ApiResult<VirtualGuest>;
    async fn power_on(&self, id: i64) -> ApiResult<bool>;
    async fn power_off(&self, id: i64) -> ApiResult<bool>;
    async fn power_cycle(&self, id: i64) -> ApiResult<bool>;
    async fn resume(&self, id: i64) -> ApiResult<bool>;
    async fn delete_virtual_guest(&self, id: i64) -> ApiResult<bool>;

    // Product catalog and ordering
    async fn list_product_packages(&self, key_name: &str) -> ApiResult<Vec<ProductPackage>>;
    async fn list_items(&self, package_id: i64) -> ApiResult<Vec<ProductItem>>;
    async fn list_active_presets(&self, package_id: i64) -> ApiResult<Vec<Preset>>;
    async fn list_datacenters(&self, name: Option<&str>) -> ApiResult<Vec<Datacenter>>;
    async fn place_order(&self, order: &ProductOrder) -> ApiResult<OrderReceipt>;

    // Network
    async fn list_network_vlans(&self, datacenter: &str) -> ApiResult<Vec<NetworkVlan>>;
    async fn list_subnets(&self, vlan_id: i64) -> ApiResult<Vec<Subnet>>;

    // Security groups
    async fn list_security_groups(&self) -> ApiResult<Vec<SecurityGroup>>;
    async fn create_security_group(&self, name: &str, description: &str) -> ApiResult<SecurityGroup>;
    async fn delete_security_group(&self, id: i64) -> ApiResult<bool>;
    async fn add_security_group_rules(
        &self,
        id: i64,
        rules: &[SecurityGroupRule],
    ) -> ApiResult<Vec<SecurityGroupRule>>;
    async fn remove_security_group_rules(&self, id: i64, rule_ids: &[i64]) -> ApiResult<bool>;

    // SSH keys
    async fn list_ssh_keys(&self, label: Option<&str>) -> ApiResult<Vec<SshKey>>;
    async fn create_ssh_key(&self, label: &str, key: &str) -> ApiResult<SshKey>;
    async fn delete_ssh_key(&self, id: i64) -> ApiResult<bool>;

    // File storage
    async fn list_file_storage(&self) -> ApiResult<Vec<FileStorage>>;
    /// Fails with `NotFound` for an unknown id.
    async fn get_file_storage(&self, id: i64) -> ApiResult<FileStorage>;
    async fn order_file_storage(&self, order: &FileStorageOrder) -> ApiResult<FileStorage>;
    async fn delete_file_storage(&self, id: i64) -> ApiResult<bool>;
    async fn allow_access_from_subnets(&self, id: i64, subnet_ids: &[i64]) -> ApiResult<bool>;
    async fn remove_access_from_subnets(&self, id: i64, subnet_ids: &[i64]) -> ApiResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_uses_api_field_names() {
        let guest: VirtualGuest = serde_json::from_str(
            r#"{
                "id": 101,
                "hostname": "web-1",
                "powerState": {"keyName": "RUNNING", "name": "Running"},
                "status": {"keyName": "ACTIVE"},
                "privateNetworkOnlyFlag": false,
                "frontendNetworkComponents": [{"name": "eth", "port": 1, "networkVlanId": 7}]
            }"#,
        )
        .unwrap();
        assert_eq!(guest.id, Some(101));
        assert_eq!(guest.power_state.unwrap().name.as_deref(), Some("Running"));
        assert_eq!(guest.frontend_network_components[0].network_vlan_id, Some(7));
        assert!(guest.backend_network_components.is_empty());
    }

    #[test]
    fn test_preset_prices_carry_items() {
        let preset: Preset = serde_json::from_str(
            r#"{
                "keyName": "B1_2X4X25",
                "locationCount": 0,
                "prices": [{"id": 1, "item": {"keyName": "RAM_4_GB", "capacity": "4", "units": "GB"}}]
            }"#,
        )
        .unwrap();
        let item = preset.prices[0].item.as_ref().unwrap();
        assert_eq!(item.units.as_deref(), Some("GB"));
        assert_eq!(preset.location_count, Some(0));
        assert!(preset.locations.is_empty());
    }
}
