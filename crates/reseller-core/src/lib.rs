// # reseller-core
//
// Order fulfillment and registry provisioning for the reseller back-office.
//
// ## Architecture Overview
//
// - **RegistryDirectory**: Maps a domain suffix to its provider and registry family
// - **RegistryConnector / RegistrySession**: Authenticated command channel to a registry
// - **ExtensionTable**: Registry-family protocol extensions for outgoing commands
// - **ContactResolver**: Creates or reuses registry contacts per role
// - **ProvisioningEngine**: Turns a paid invoice into a provisioned service
// - **RenewalSweep / RetrySweep**: Scheduled reconciliation jobs
// - **BackofficeStore**: Transactional persistence behind all of the above
//
// ## Design Principles
//
// 1. **One transaction per attempt**: Service and order rows commit together or not at all
// 2. **Plugin-based**: Connectors and extensions are looked up by registry family
// 3. **Library-first**: The daemon is a thin shell over this crate

pub mod config;
pub mod contacts;
pub mod directory;
pub mod engine;
pub mod error;
pub mod extension;
pub mod model;
pub mod registry;
pub mod store;
pub mod sweeps;
pub mod traits;

// Re-export core types for convenience
pub use config::{EngineConfig, RenewalConfig, RetryPolicy, SessionDefaults};
pub use directory::{RegistryDirectory, RegistryFamily, ResolvedProvider, SessionParams};
pub use engine::{DomainUpdate, ProvisionedAction, ProvisioningEngine, ProvisioningOutcome};
pub use error::{Error, ErrorKind, Result};
pub use extension::ExtensionTable;
pub use registry::ConnectorRegistry;
pub use store::MemoryStore;
pub use sweeps::{RenewalReport, RenewalSweep, RetryReport, RetrySweep};
pub use traits::{BackofficeStore, RegistryConnector, RegistrySession};
