//! In-memory SoftLayer
//!
//! A deterministic [`SoftLayerApi`] for tests. Calls are recorded as
//! `operation:argument`, any operation can be made to fail and placed
//! orders turn into running guests or file storage volumes.

use crate::api::*;
use crate::error::{ApiResult, SoftLayerError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const CREATED: &str = "2024-05-01T09:00:00+09:00";

pub const DATACENTER: &str = "dal10";
pub const DATACENTER_ID: i64 = 1_441_195;
pub const PACKAGE_ID: i64 = 835;
pub const PUBLIC_VLAN_ID: i64 = 2_001;
pub const PRIVATE_VLAN_ID: i64 = 2_002;
pub const PUBLIC_SUBNET_ID: i64 = 3_001;

/// Price items a virtual server order always carries
const BASE_ITEMS: [&str; 7] = [
    "BANDWIDTH_0_GB_2",
    "1_IP_ADDRESS",
    "REBOOT_REMOTE_CONSOLE",
    "MONITORING_HOST_PING",
    "NOTIFICATION_EMAIL_AND_TICKET",
    "AUTOMATED_NOTIFICATION",
    "UNLIMITED_SSL_VPN_USERS_1_PPTP_VPN_USER_PER_ACCOUNT",
];

#[derive(Debug, Default)]
struct FakeState {
    account: Account,
    datacenters: Vec<Datacenter>,
    packages: Vec<ProductPackage>,
    items: Vec<ProductItem>,
    presets: Vec<Preset>,
    vlans: Vec<NetworkVlan>,
    subnets: Vec<Subnet>,
    guests: Vec<VirtualGuest>,
    security_groups: Vec<SecurityGroup>,
    ssh_keys: Vec<SshKey>,
    orders: Vec<ProductOrder>,
    file_storage: Vec<FileStorage>,

    provisioning: HashMap<i64, u32>,
    provision_reads: u32,
    /// Storage id to reads left in `pending`
    settling: HashMap<i64, u32>,
    storage_reads: u32,
    storage_state: Option<String>,
    failures: HashMap<String, SoftLayerError>,
    calls: Vec<String>,
    next_id: i64,
}

impl FakeState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn guest_mut(&mut self, id: i64) -> ApiResult<&mut VirtualGuest> {
        self.guests
            .iter_mut()
            .find(|g| g.id == Some(id))
            .ok_or_else(|| SoftLayerError::NotFound(format!("SoftLayer_Virtual_Guest {id}")))
    }

    fn group_mut(&mut self, id: i64) -> ApiResult<&mut SecurityGroup> {
        self.security_groups
            .iter_mut()
            .find(|g| g.id == Some(id))
            .ok_or_else(|| SoftLayerError::NotFound(format!("SoftLayer_Network_SecurityGroup {id}")))
    }

    fn storage_mut(&mut self, id: i64) -> ApiResult<&mut FileStorage> {
        self.file_storage
            .iter_mut()
            .find(|s| s.id == Some(id))
            .ok_or_else(|| SoftLayerError::NotFound(format!("SoftLayer_Network_Storage {id}")))
    }

    /// A volume still settling reads as `pending`.
    fn storage_view(&self, storage: &FileStorage) -> FileStorage {
        let mut view = storage.clone();
        if storage.id.is_some_and(|id| self.settling.get(&id).is_some_and(|left| *left > 0)) {
            view.lifecycle_state = Some(STORAGE_PENDING.into());
        }
        view
    }

    fn item_by_price(&self, price_id: i64) -> Option<&ProductItem> {
        self.items
            .iter()
            .find(|i| i.prices.iter().any(|p| p.id == Some(price_id)))
    }

    fn build_guest(&mut self, order: &ProductOrder, request: &OrderGuest) -> VirtualGuest {
        let id = 100 + self.next_id();
        let datacenter = self
            .datacenters
            .iter()
            .find(|d| d.id.map(|id| id.to_string()) == Some(order.location.clone()))
            .cloned();
        let preset = self.presets.iter().find(|p| p.id == order.preset_id).cloned();
        let os = order
            .prices
            .iter()
            .filter_map(|p| self.item_by_price(*p))
            .find(|i| category_of(i) == Some(CATEGORY_OS))
            .and_then(|i| i.software_description.clone());

        let public = request.primary_network_component.clone().unwrap_or_default();
        let public_vlan = public.network_vlan_id.or_else(|| {
            self.vlans
                .iter()
                .find(|v| v.network_space.as_deref() == Some(NETWORK_PUBLIC))
                .and_then(|v| v.id)
        });
        let public_subnet = match public.primary_subnet_id {
            Some(subnet_id) => self.subnets.iter().find(|s| s.id == Some(subnet_id)).cloned(),
            None => self
                .subnets
                .iter()
                .find(|s| s.network_vlan_id == public_vlan && s.subnet_type.as_deref() == Some(SUBNET_PRIMARY))
                .cloned(),
        };
        let bindings = public
            .security_group_ids
            .iter()
            .filter_map(|sg| self.security_groups.iter().find(|g| g.id == Some(*sg)))
            .map(|g| SecurityGroupBinding {
                security_group: Some(g.clone()),
            })
            .collect();
        let private_vlan = request
            .primary_backend_network_component
            .as_ref()
            .and_then(|c| c.network_vlan_id)
            .or(Some(PRIVATE_VLAN_ID));
        let ssh_keys = order
            .ssh_key_ids
            .iter()
            .filter_map(|k| self.ssh_keys.iter().find(|s| s.id == Some(*k)))
            .cloned()
            .collect();

        VirtualGuest {
            id: Some(id),
            hostname: Some(request.hostname.clone()),
            domain: Some(request.domain.clone()),
            datacenter,
            power_state: Some(power("Running")),
            status: Some(GuestStatus {
                key_name: Some(STATUS_ACTIVE.into()),
                name: Some("Active".into()),
            }),
            create_date: Some(CREATED.into()),
            max_cpu: Some(1),
            max_memory: Some(2048),
            primary_ip_address: Some(format!("169.45.0.{}", id % 250)),
            primary_backend_ip_address: Some(format!("10.0.0.{}", id % 250)),
            private_network_only_flag: Some(false),
            frontend_network_components: vec![NetworkComponent {
                id: Some(id * 10),
                name: Some("eth".into()),
                port: Some(1),
                mac_address: Some("06:aa:bb:cc:dd:01".into()),
                primary_ip_address: Some(format!("169.45.0.{}", id % 250)),
                network_vlan_id: public_vlan,
                primary_subnet: public_subnet,
                security_group_bindings: bindings,
            }],
            backend_network_components: vec![NetworkComponent {
                id: Some(id * 10 + 1),
                name: Some("eth".into()),
                port: Some(0),
                mac_address: Some("06:aa:bb:cc:dd:00".into()),
                primary_ip_address: Some(format!("10.0.0.{}", id % 250)),
                network_vlan_id: private_vlan,
                primary_subnet: None,
                security_group_bindings: Vec::new(),
            }],
            operating_system: Some(OperatingSystem {
                software_description: os,
                passwords: vec![Password {
                    username: Some("root".into()),
                    password: Some("s3cret".into()),
                }],
            }),
            billing_item: Some(BillingItem {
                id: Some(id * 100),
                order_item: Some(OrderItem { preset }),
            }),
            ssh_keys,
        }
    }
}

fn category_of(item: &ProductItem) -> Option<&str> {
    item.item_category.as_ref().and_then(|c| c.category_code.as_deref())
}

fn power(name: &str) -> PowerState {
    PowerState {
        key_name: Some(name.to_ascii_uppercase()),
        name: Some(name.into()),
    }
}

fn item(id: i64, key_name: &str, category: &str) -> ProductItem {
    ProductItem {
        id: Some(id),
        key_name: Some(key_name.into()),
        description: Some(key_name.replace('_', " ")),
        capacity: None,
        units: None,
        item_category: Some(ItemCategory {
            id: None,
            category_code: Some(category.into()),
            name: None,
        }),
        prices: vec![
            ItemPrice {
                id: Some(id * 10 + 1),
                location_group_id: Some(503),
            },
            ItemPrice {
                id: Some(id * 10),
                location_group_id: None,
            },
        ],
        software_description: None,
        active_usage_price_count: None,
        capacity_restricted_product_flag: None,
        private_network_only: false,
    }
}

fn sized_item(id: i64, key_name: &str, description: &str, capacity: u32, units: Option<&str>) -> ProductItem {
    ProductItem {
        description: Some(description.into()),
        capacity: Some(capacity.to_string()),
        units: units.map(Into::into),
        ..item(id, key_name, "preset")
    }
}

/// Scriptable SoftLayer stand-in
#[derive(Debug, Clone, Default)]
pub struct FakeSoftLayer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSoftLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fake with an account, the `dal10` datacenter, the public cloud
    /// server package with one OS image and one preset, and a public and a
    /// private VLAN.
    pub fn seeded() -> Self {
        let fake = Self::new();
        {
            let mut state = fake.lock();
            state.account = Account {
                id: Some(1),
                first_name: Some("Kim".into()),
                last_name: Some("Lee".into()),
                company_name: Some("cloudplug".into()),
            };
            state.datacenters.push(Datacenter {
                id: Some(DATACENTER_ID),
                name: Some(DATACENTER.into()),
                long_name: Some("Dallas 10".into()),
            });
            state.packages.push(ProductPackage {
                id: Some(PACKAGE_ID),
                key_name: Some(PUBLIC_CLOUD_SERVER.into()),
                name: Some("Public Virtual Server".into()),
            });
            state.items.extend(
                BASE_ITEMS
                    .iter()
                    .enumerate()
                    .map(|(n, key)| item(10 + n as i64, key, "misc")),
            );
            let mut port = item(30, "1_GBPS_PUBLIC_PRIVATE_NETWORK_UPLINKS", CATEGORY_PORT_SPEED);
            port.capacity = Some("1000".into());
            state.items.push(port);
            let mut port = item(31, "100_MBPS_PUBLIC_PRIVATE_NETWORK_UPLINKS", CATEGORY_PORT_SPEED);
            port.capacity = Some("100".into());
            state.items.push(port);
            let mut port = item(32, "100_MBPS_PRIVATE_NETWORK_UPLINK", CATEGORY_PORT_SPEED);
            port.capacity = Some("100".into());
            port.private_network_only = true;
            state.items.push(port);
            state.vlans.push(NetworkVlan {
                id: Some(PUBLIC_VLAN_ID),
                vlan_number: Some(1_234),
                name: None,
                network_space: Some(NETWORK_PUBLIC.into()),
                primary_router: Some(Router {
                    hostname: Some("fcr01a.dal10".into()),
                    datacenter: None,
                }),
            });
            state.vlans.push(NetworkVlan {
                id: Some(PRIVATE_VLAN_ID),
                vlan_number: Some(1_235),
                name: None,
                network_space: Some(NETWORK_PRIVATE.into()),
                primary_router: Some(Router {
                    hostname: Some("bcr01a.dal10".into()),
                    datacenter: None,
                }),
            });
            state.subnets.push(Subnet {
                id: Some(PUBLIC_SUBNET_ID),
                network_identifier: Some("169.45.0.0".into()),
                cidr: Some(26),
                gateway: Some("169.45.0.1".into()),
                subnet_type: Some(SUBNET_PRIMARY.into()),
                network_vlan_id: Some(PUBLIC_VLAN_ID),
                usable_ip_address_count: Some(61),
                virtual_guest_count: Some(3),
            });
        }
        fake.with_os_image(40, "OS_UBUNTU_22_04_LTS_JAMMY_JELLYFISH_64_BIT", "UBUNTU_22_64")
            .with_preset(900, "B1_1X2X25", 1, 2)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and returns the injected failure, if any.
    fn enter(&self, op: &str, arg: &str) -> ApiResult<MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        state.calls.push(format!("{op}:{arg}"));
        match state.failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(state),
        }
    }

    // ── Builder methods ──────────────────────────────────────────────

    /// Adds an orderable OS image item.
    pub fn with_os_image(self, id: i64, key_name: &str, reference_code: &str) -> Self {
        let mut os = item(id, key_name, CATEGORY_OS);
        os.description = Some(reference_code.replace('_', " "));
        os.software_description = Some(SoftwareDescription {
            name: Some(reference_code.into()),
            version: None,
            reference_code: Some(reference_code.into()),
            long_description: os.description.clone(),
        });
        os.active_usage_price_count = Some(1);
        os.capacity_restricted_product_flag = Some(false);
        self.lock().items.push(os);
        self
    }

    pub fn with_item(self, item: ProductItem) -> Self {
        self.lock().items.push(item);
        self
    }

    /// Adds a preset offered in every location, made of a 2.0 GHz core
    /// item and a RAM item.
    pub fn with_preset(self, id: i64, key_name: &str, cores: u32, ram_gb: u32) -> Self {
        let core = sized_item(
            id * 10 + 1,
            &format!("GUEST_CORE_{cores}"),
            &format!("{cores} x 2.0 GHz or higher Core"),
            cores,
            None,
        );
        let ram = sized_item(
            id * 10 + 2,
            &format!("RAM_{ram_gb}_GB"),
            &format!("{ram_gb} GB"),
            ram_gb,
            Some("GB"),
        );
        self.lock().presets.push(Preset {
            id: Some(id),
            key_name: Some(key_name.into()),
            name: Some(key_name.replace('_', ".")),
            description: Some(key_name.replace('_', " ")),
            prices: [core, ram]
                .into_iter()
                .map(|item| PresetPrice {
                    id: item.id.map(|i| i * 10),
                    item: Some(item),
                })
                .collect(),
            location_count: Some(0),
            locations: Vec::new(),
        });
        self
    }

    /// Adds `count` GPUs of `model` to a preset.
    pub fn with_preset_gpu(self, preset_id: i64, model: &str, count: u32) -> Self {
        let gpu = sized_item(
            preset_id * 10 + 3,
            &format!("GPU_NVIDIA_{model}_GPU"),
            &format!("{count} x NVIDIA {model}"),
            count,
            None,
        );
        if let Some(preset) = self.lock().presets.iter_mut().find(|p| p.id == Some(preset_id)) {
            preset.prices.push(PresetPrice {
                id: gpu.id.map(|i| i * 10),
                item: Some(gpu),
            });
        }
        self
    }

    /// Restricts a preset to the given datacenters.
    pub fn with_preset_locations(self, preset_id: i64, datacenters: &[&str]) -> Self {
        if let Some(preset) = self.lock().presets.iter_mut().find(|p| p.id == Some(preset_id)) {
            preset.location_count = Some(datacenters.len() as u32);
            preset.locations = datacenters
                .iter()
                .map(|name| Datacenter {
                    id: None,
                    name: Some((*name).into()),
                    long_name: None,
                })
                .collect();
        }
        self
    }

    pub fn with_guest(self, guest: VirtualGuest) -> Self {
        self.lock().guests.push(guest);
        self
    }

    /// A running guest named `hostname` in the seeded datacenter.
    pub fn with_running_guest(self, id: i64, hostname: &str) -> Self {
        self.with_guest(VirtualGuest {
            id: Some(id),
            hostname: Some(hostname.into()),
            domain: Some("example.cloud".into()),
            datacenter: Some(Datacenter {
                id: Some(DATACENTER_ID),
                name: Some(DATACENTER.into()),
                long_name: None,
            }),
            power_state: Some(power("Running")),
            status: Some(GuestStatus {
                key_name: Some(STATUS_ACTIVE.into()),
                name: Some("Active".into()),
            }),
            create_date: Some(CREATED.into()),
            ..Default::default()
        })
    }

    pub fn with_security_group(self, group: SecurityGroup) -> Self {
        self.lock().security_groups.push(group);
        self
    }

    pub fn with_ssh_key(self, id: i64, label: &str, key: &str) -> Self {
        self.lock().ssh_keys.push(SshKey {
            id: Some(id),
            label: Some(label.into()),
            key: Some(key.into()),
            fingerprint: Some(format!("fp:{id}")),
            create_date: Some(CREATED.into()),
        });
        self
    }

    pub fn with_vlan(self, vlan: NetworkVlan) -> Self {
        self.lock().vlans.push(vlan);
        self
    }

    pub fn with_subnet(self, subnet: Subnet) -> Self {
        self.lock().subnets.push(subnet);
        self
    }

    /// Ordered guests read as halted for this many reads before running.
    pub fn with_provision_reads(self, reads: u32) -> Self {
        self.lock().provision_reads = reads;
        self
    }

    /// Ordered file storage reads as `pending` for this many reads.
    pub fn with_storage_reads(self, reads: u32) -> Self {
        self.lock().storage_reads = reads;
        self
    }

    /// Lifecycle state ordered file storage settles in; `stable` by default.
    pub fn with_storage_state(self, state: &str) -> Self {
        self.lock().storage_state = Some(state.into());
        self
    }

    /// Every call to `op` fails with `error`.
    pub fn fail_on(self, op: &str, error: SoftLayerError) -> Self {
        self.lock().failures.insert(op.into(), error);
        self
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Every call as `operation:argument`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn guests(&self) -> Vec<VirtualGuest> {
        self.lock().guests.clone()
    }

    pub fn security_groups(&self) -> Vec<SecurityGroup> {
        self.lock().security_groups.clone()
    }

    pub fn ssh_keys(&self) -> Vec<SshKey> {
        self.lock().ssh_keys.clone()
    }

    pub fn orders(&self) -> Vec<ProductOrder> {
        self.lock().orders.clone()
    }

    pub fn file_storage(&self) -> Vec<FileStorage> {
        self.lock().file_storage.clone()
    }

    /// Changes the power state of a stored guest.
    pub fn set_power_state(&self, id: i64, name: &str) {
        if let Ok(guest) = self.lock().guest_mut(id) {
            guest.power_state = Some(power(name));
        }
    }
}

#[async_trait]
impl SoftLayerApi for FakeSoftLayer {
    async fn get_account(&self) -> ApiResult<Account> {
        let state = self.enter("getAccount", "")?;
        Ok(state.account.clone())
    }

    async fn list_virtual_guests(&self, filter: &GuestFilter) -> ApiResult<Vec<VirtualGuest>> {
        let state = self.enter("getVirtualGuests", filter.hostname.as_deref().unwrap_or(""))?;
        Ok(state
            .guests
            .iter()
            .filter(|g| match &filter.datacenter {
                Some(dc) => g.datacenter.as_ref().and_then(|d| d.name.as_deref()) == Some(dc.as_str()),
                None => true,
            })
            .filter(|g| match &filter.hostname {
                Some(h) => g.hostname.as_deref() == Some(h.as_str()),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_virtual_guest(&self, id: i64) -> ApiResult<VirtualGuest> {
        let mut state = self.enter("getObject", &id.to_string())?;
        let mut guest = state.guest_mut(id)?.clone();
        if let Some(left) = state.provisioning.get_mut(&id)
            && *left > 0
        {
            *left -= 1;
            guest.power_state = Some(power("Halted"));
        }
        Ok(guest)
    }

    async fn power_on(&self, id: i64) -> ApiResult<bool> {
        let mut state = self.enter("powerOn", &id.to_string())?;
        state.guest_mut(id)?.power_state = Some(power("Running"));
        Ok(true)
    }

    async fn power_off(&self, id: i64) -> ApiResult<bool> {
        let mut state = self.enter("powerOff", &id.to_string())?;
        state.guest_mut(id)?.power_state = Some(power("Halted"));
        Ok(true)
    }

    async fn power_cycle(&self, id: i64) -> ApiResult<bool> {
        let mut state = self.enter("powerCycle", &id.to_string())?;
        state.guest_mut(id)?.power_state = Some(power("Running"));
        Ok(true)
    }

    async fn resume(&self, id: i64) -> ApiResult<bool> {
        let mut state = self.enter("resume", &id.to_string())?;
        state.guest_mut(id)?.power_state = Some(power("Running"));
        Ok(true)
    }

    async fn delete_virtual_guest(&self, id: i64) -> ApiResult<bool> {
        let mut state = self.enter("deleteObject", &id.to_string())?;
        state.guest_mut(id)?;
        state.guests.retain(|g| g.id != Some(id));
        state.provisioning.remove(&id);
        Ok(true)
    }

    async fn list_product_packages(&self, key_name: &str) -> ApiResult<Vec<ProductPackage>> {
        let state = self.enter("getAllObjects", key_name)?;
        Ok(state
            .packages
            .iter()
            .filter(|p| p.key_name.as_deref() == Some(key_name))
            .cloned()
            .collect())
    }

    async fn list_items(&self, package_id: i64) -> ApiResult<Vec<ProductItem>> {
        let state = self.enter("getItems", &package_id.to_string())?;
        if !state.packages.iter().any(|p| p.id == Some(package_id)) {
            return Err(SoftLayerError::NotFound(format!("SoftLayer_Product_Package {package_id}")));
        }
        Ok(state.items.clone())
    }

    async fn list_active_presets(&self, package_id: i64) -> ApiResult<Vec<Preset>> {
        let state = self.enter("getActivePresets", &package_id.to_string())?;
        Ok(state.presets.clone())
    }

    async fn list_datacenters(&self, name: Option<&str>) -> ApiResult<Vec<Datacenter>> {
        let state = self.enter("getDatacenters", name.unwrap_or(""))?;
        Ok(state
            .datacenters
            .iter()
            .filter(|d| name.is_none() || d.name.as_deref() == name)
            .cloned()
            .collect())
    }

    async fn place_order(&self, order: &ProductOrder) -> ApiResult<OrderReceipt> {
        let hostname = order
            .virtual_guests
            .first()
            .map(|g| g.hostname.clone())
            .unwrap_or_default();
        let mut state = self.enter("placeOrder", &hostname)?;
        if order.prices.iter().any(|p| state.item_by_price(*p).is_none()) {
            return Err(SoftLayerError::api(
                "SoftLayer_Exception_Order_InvalidPrice",
                "unknown price id in order",
            ));
        }
        state.orders.push(order.clone());
        let order_id = state.next_id();
        let mut placed = Vec::new();
        for request in &order.virtual_guests {
            let guest = state.build_guest(order, request);
            let id = guest.id.unwrap_or_default();
            let reads = state.provision_reads;
            if reads > 0 {
                state.provisioning.insert(id, reads);
            }
            state.guests.push(guest);
            placed.push(id);
        }
        Ok(OrderReceipt {
            order_id: Some(order_id),
            placed_guest_ids: placed,
        })
    }

    async fn list_network_vlans(&self, datacenter: &str) -> ApiResult<Vec<NetworkVlan>> {
        let state = self.enter("getNetworkVlans", datacenter)?;
        Ok(state.vlans.clone())
    }

    async fn list_subnets(&self, vlan_id: i64) -> ApiResult<Vec<Subnet>> {
        let state = self.enter("getSubnets", &vlan_id.to_string())?;
        Ok(state
            .subnets
            .iter()
            .filter(|s| s.network_vlan_id == Some(vlan_id))
            .cloned()
            .collect())
    }

    async fn list_security_groups(&self) -> ApiResult<Vec<SecurityGroup>> {
        let state = self.enter("getSecurityGroups", "")?;
        Ok(state.security_groups.clone())
    }

    async fn create_security_group(&self, name: &str, description: &str) -> ApiResult<SecurityGroup> {
        let mut state = self.enter("createSecurityGroup", name)?;
        let id = 500 + state.next_id();
        let group = SecurityGroup {
            id: Some(id),
            name: Some(name.into()),
            description: Some(description.into()),
            create_date: Some(CREATED.into()),
            rules: Vec::new(),
        };
        state.security_groups.push(group.clone());
        Ok(group)
    }

    async fn delete_security_group(&self, id: i64) -> ApiResult<bool> {
        let mut state = self.enter("deleteSecurityGroup", &id.to_string())?;
        state.group_mut(id)?;
        state.security_groups.retain(|g| g.id != Some(id));
        Ok(true)
    }

    async fn add_security_group_rules(
        &self,
        id: i64,
        rules: &[SecurityGroupRule],
    ) -> ApiResult<Vec<SecurityGroupRule>> {
        let mut state = self.enter("addRules", &id.to_string())?;
        let mut added = Vec::with_capacity(rules.len());
        for rule in rules {
            let rule_id = 700 + state.next_id();
            added.push(SecurityGroupRule {
                id: Some(rule_id),
                ..rule.clone()
            });
        }
        state.group_mut(id)?.rules.extend(added.iter().cloned());
        Ok(added)
    }

    async fn remove_security_group_rules(&self, id: i64, rule_ids: &[i64]) -> ApiResult<bool> {
        let mut state = self.enter("removeRules", &id.to_string())?;
        let group = state.group_mut(id)?;
        group.rules.retain(|r| !r.id.is_some_and(|rid| rule_ids.contains(&rid)));
        Ok(true)
    }

    async fn list_ssh_keys(&self, label: Option<&str>) -> ApiResult<Vec<SshKey>> {
        let state = self.enter("getSshKeys", label.unwrap_or(""))?;
        Ok(state
            .ssh_keys
            .iter()
            .filter(|k| label.is_none() || k.label.as_deref() == label)
            .cloned()
            .collect())
    }

    async fn create_ssh_key(&self, label: &str, key: &str) -> ApiResult<SshKey> {
        let mut state = self.enter("createSshKey", label)?;
        let id = 800 + state.next_id();
        let created = SshKey {
            id: Some(id),
            label: Some(label.into()),
            key: Some(key.into()),
            fingerprint: Some(format!("fp:{id}")),
            create_date: Some(CREATED.into()),
        };
        state.ssh_keys.push(created.clone());
        Ok(created)
    }

    async fn delete_ssh_key(&self, id: i64) -> ApiResult<bool> {
        let mut state = self.enter("deleteSshKey", &id.to_string())?;
        if !state.ssh_keys.iter().any(|k| k.id == Some(id)) {
            return Err(SoftLayerError::NotFound(format!("SoftLayer_Security_Ssh_Key {id}")));
        }
        state.ssh_keys.retain(|k| k.id != Some(id));
        Ok(true)
    }

    async fn list_file_storage(&self) -> ApiResult<Vec<FileStorage>> {
        let state = self.enter("getNasNetworkStorage", "")?;
        Ok(state.file_storage.iter().map(|s| state.storage_view(s)).collect())
    }

    async fn get_file_storage(&self, id: i64) -> ApiResult<FileStorage> {
        let mut state = self.enter("getStorage", &id.to_string())?;
        let storage = state.storage_mut(id)?.clone();
        let view = state.storage_view(&storage);
        if let Some(left) = state.settling.get_mut(&id)
            && *left > 0
        {
            *left -= 1;
        }
        Ok(view)
    }

    async fn order_file_storage(&self, order: &FileStorageOrder) -> ApiResult<FileStorage> {
        let mut state = self.enter("placeStorageOrder", &order.name)?;
        let datacenter = state
            .datacenters
            .iter()
            .find(|d| d.name.as_deref() == Some(order.location.as_str()))
            .cloned()
            .ok_or_else(|| {
                SoftLayerError::api("SoftLayer_Exception_Order_InvalidLocation", "unknown datacenter")
            })?;
        let id = 4_000 + state.next_id();
        let account = state.account.id.unwrap_or_default();
        let username = format!("SL02SEV{account}_{id}");
        let storage = FileStorage {
            id: Some(id),
            username: Some(username.clone()),
            notes: Some(order.name.clone()),
            capacity_gb: Some(order.capacity_gb),
            provisioned_iops: Some(order.iops.to_string()),
            bytes_used: Some("0".into()),
            file_network_mount_address: Some(format!(
                "fsf-{}01a-fz.service.softlayer.com:/{}/data01",
                order.location, username
            )),
            service_resource_backend_ip_address: Some(format!("fsf-{}01a-fz.service.softlayer.com", order.location)),
            datacenter: Some(datacenter),
            lifecycle_state: Some(state.storage_state.clone().unwrap_or_else(|| STORAGE_STABLE.into())),
            create_date: Some(CREATED.into()),
            allowed_subnets: Vec::new(),
        };
        let reads = state.storage_reads;
        if reads > 0 {
            state.settling.insert(id, reads);
        }
        state.file_storage.push(storage.clone());
        Ok(state.storage_view(&storage))
    }

    async fn delete_file_storage(&self, id: i64) -> ApiResult<bool> {
        let mut state = self.enter("deleteStorage", &id.to_string())?;
        state.storage_mut(id)?;
        state.file_storage.retain(|s| s.id != Some(id));
        state.settling.remove(&id);
        Ok(true)
    }

    async fn allow_access_from_subnets(&self, id: i64, subnet_ids: &[i64]) -> ApiResult<bool> {
        let mut state = self.enter("allowAccessFromSubnetList", &id.to_string())?;
        let mut allowed = Vec::with_capacity(subnet_ids.len());
        for subnet_id in subnet_ids {
            let subnet = state
                .subnets
                .iter()
                .find(|s| s.id == Some(*subnet_id))
                .cloned()
                .ok_or_else(|| SoftLayerError::NotFound(format!("SoftLayer_Network_Subnet {subnet_id}")))?;
            allowed.push(subnet);
        }
        let storage = state.storage_mut(id)?;
        for subnet in allowed {
            if !storage.allowed_subnets.iter().any(|s| s.id == subnet.id) {
                storage.allowed_subnets.push(subnet);
            }
        }
        Ok(true)
    }

    async fn remove_access_from_subnets(&self, id: i64, subnet_ids: &[i64]) -> ApiResult<bool> {
        let mut state = self.enter("removeAccessFromSubnetList", &id.to_string())?;
        let storage = state.storage_mut(id)?;
        storage
            .allowed_subnets
            .retain(|s| !s.id.is_some_and(|sid| subnet_ids.contains(&sid)));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_provision_reads_count_down() {
        let fake = FakeSoftLayer::seeded().with_provision_reads(2);
        let receipt = fake
            .place_order(&ProductOrder {
                package_id: PACKAGE_ID,
                location: DATACENTER_ID.to_string(),
                quantity: 1,
                prices: vec![400],
                virtual_guests: vec![OrderGuest {
                    hostname: "web-1".into(),
                    domain: "example.cloud".into(),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .await
            .unwrap();
        let id = receipt.placed_guest_ids[0];

        let mut seen = Vec::new();
        for _ in 0..3 {
            let guest = fake.get_virtual_guest(id).await.unwrap();
            seen.push(guest.power_state.and_then(|p| p.name).unwrap_or_default());
        }
        assert_eq!(seen, ["Halted", "Halted", "Running"]);
    }

    #[tokio::test]
    async fn test_storage_settles_after_pending_reads() {
        let fake = FakeSoftLayer::seeded().with_storage_reads(1);
        let storage = fake
            .order_file_storage(&FileStorageOrder {
                name: "share-1".into(),
                location: DATACENTER.into(),
                capacity_gb: 20,
                iops: 100,
                nfs_version: "4.1".into(),
            })
            .await
            .unwrap();
        assert_eq!(storage.lifecycle_state.as_deref(), Some(STORAGE_PENDING));

        let id = storage.id.unwrap();
        let first = fake.get_file_storage(id).await.unwrap();
        let second = fake.get_file_storage(id).await.unwrap();
        assert_eq!(first.lifecycle_state.as_deref(), Some(STORAGE_PENDING));
        assert_eq!(second.lifecycle_state.as_deref(), Some(STORAGE_STABLE));
    }

    #[tokio::test]
    async fn test_unknown_price_is_rejected() {
        let fake = FakeSoftLayer::seeded();
        let err = fake
            .place_order(&ProductOrder {
                package_id: PACKAGE_ID,
                prices: vec![1],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SoftLayerError::Api { .. }));
        assert!(fake.guests().is_empty());
    }
}
