//! cloudplug core
//!
//! Framework shared by the cloudplug drivers. A driver translates the
//! canonical resource model into calls against one provider's SDK; this
//! crate holds everything that is not provider specific.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │            caller (VmRequest, ResourceRef)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 cloudplug-core                   │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │  Gatherer    │─▶│  Resolver    │             │
//! │  └──────┬───────┘  └──────────────┘             │
//! │  ┌──────▼───────┐  ┌──────────────┐             │
//! │  │    Saga      │─▶│   Poller     │             │
//! │  └──────────────┘  └──────────────┘             │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │  Handlers    │  │  Registry    │             │
//! │  └──────────────┘  └──────────────┘             │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │    ktcloud    │ │      ibm      │
//! │    driver     │ │    driver     │
//! └───────────────┘ └───────────────┘
//! ```

pub mod call_log;
pub mod cancel;
pub mod error;
pub mod gatherer;
pub mod handler;
pub mod identity;
pub mod model;
pub mod poller;
pub mod registry;
pub mod resolver;
pub mod saga;

// Re-exports
pub use call_log::{CallContext, CallLogger, CallRecord, MemoryCallLogger, TracingCallLogger};
pub use cancel::CancellationToken;
pub use error::{CloudError, ProviderContext, Result, RollbackWarning};
pub use gatherer::{DependencyGatherer, DependencySource, GatherPolicy, GatheredDependencies};
pub use handler::{
    CloudDriver, DiskHandler, DriverCapabilities, FileSystemHandler, ImageHandler, KeyPairHandler,
    NlbHandler, SecurityHandler, TagHandler, VmHandler, VmSpecHandler, VpcHandler,
};
pub use identity::{Iid, ResourceKind, ResourceRef, Scope};
pub use poller::{Phase, PollConfig, PollableOperation, Poller};
pub use registry::{FileRegistry, MemoryRegistry, RegistryRecord, ResourceRegistry, TypedRegistry};
pub use resolver::{Lookup, NameMatching, Resolved, Resolver, ensure_absent};
pub use saga::{Compensation, Saga};
