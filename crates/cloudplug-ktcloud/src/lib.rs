//! KT Cloud driver for cloudplug
//!
//! Implements the cloudplug handler traits on top of the KT Cloud
//! (CloudStack based) API.
//!
//! # Features
//!
//! - VMs with public IP, port forwarding and firewall rules set up on start
//! - Data volumes (HDD/SSD products), attach and detach
//! - SSH key pairs, with the private key kept in the resource registry
//! - Security groups, VPCs and subnets tracked locally
//! - Tags on VMs and volumes
//! - Network load balancers over VMs with a public IP
//! - VM spec catalog built from service and disk offerings
//!
//! # Example
//!
//! ```ignore
//! use cloudplug_core::{CloudDriver, Scope};
//! use cloudplug_ktcloud::KtCloudDriver;
//!
//! let driver = KtCloudDriver::connect(api, Scope::zone("KR", "kr-0"))?;
//! let vms = driver.vm_handler()?.list_vm().await?;
//! ```

pub mod api;
pub mod context;
pub mod disk;
pub mod driver;
pub mod error;
pub mod fake;
pub mod image;
pub mod keypair;
pub mod lookup;
pub mod mapper;
pub mod network;
pub mod nlb;
pub mod polling;
pub mod security;
pub mod spec;
pub mod tag;
pub mod vm;
pub mod vmspec;
pub mod vpc;

pub use api::KtCloudApi;
pub use context::KtContext;
pub use driver::KtCloudDriver;
pub use error::{ApiResult, KtApiError};
pub use fake::FakeKtCloud;
pub use keypair::{PublicKeyDeriver, SshKeygen};
pub use polling::KtPollPresets;
pub use spec::VmSpec;
