//! IBM Cloud (SoftLayer) driver for cloudplug
//!
//! Implements the cloudplug handler traits on top of the SoftLayer API.
//!
//! # Features
//!
//! - Virtual guests ordered from the public server package with a preset,
//!   rolled back when the guest never becomes active
//! - SSH keys generated locally, private half kept in the resource registry
//! - Account wide security groups and their rules
//! - PUBLIC VLANs and their PRIMARY subnets as read-only VPCs
//! - OS images from the product catalog
//! - Active presets of the server package as VM specs
//! - Performance NAS volumes as file systems, polled until stable and
//!   removed again when they never get there
//!
//! # Example
//!
//! ```ignore
//! use cloudplug_core::{CloudDriver, Scope};
//! use cloudplug_ibm::IbmDriver;
//!
//! let driver = IbmDriver::connect(api, Scope::region("dal10"))?;
//! let images = driver.image_handler()?.list_image().await?;
//! ```

pub mod api;
pub mod catalog;
pub mod context;
pub mod driver;
pub mod error;
pub mod fake;
pub mod filesystem;
pub mod image;
pub mod keypair;
pub mod lookup;
pub mod mapper;
pub mod security;
pub mod vm;
pub mod vmspec;
pub mod vpc;

pub use api::SoftLayerApi;
pub use context::IbmContext;
pub use driver::IbmDriver;
pub use error::{ApiResult, SoftLayerError};
pub use fake::FakeSoftLayer;
pub use keypair::{GeneratedKey, KeyGenerator, SshKeygenGenerator};
