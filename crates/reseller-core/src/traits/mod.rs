//! Core traits for the provisioning engine
//!
//! This module defines the abstract interfaces that implementations plug into.
//!
//! - [`RegistryConnector`] / [`RegistrySession`]: Talk to a registry
//! - [`BackofficeStore`]: Transactional persistence
//! - [`Notifier`] / [`ExpiryHook`]: Renewal sweep side effects

pub mod notify;
pub mod registry_connector;
pub mod store;

pub use notify::{ExpiryHook, Notifier};
pub use registry_connector::{
    CommandParams, ContactCreated, DomainCreated, DomainInfo, DomainRenewed, RegistryConnector,
    RegistrySession,
};
pub use store::{BackofficeStore, ClaimedOrder};
