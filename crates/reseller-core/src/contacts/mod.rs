//! Contact Deduplication Engine
//!
//! Decides, per contact role of a registration, whether an existing registry
//! contact can be reused or a new one has to be created. Roles that describe
//! the same party (same normalized fingerprint) share one registry object.

mod fingerprint;
mod payload;

pub use fingerprint::fingerprint;
pub use payload::{
    DEFAULT_NAME, PLACEHOLDER_SURNAME, contact_payload, generate_auth_info, generate_contact_id,
    split_name,
};

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::directory::RegistryFamily;
use crate::error::{Error, Result};
use crate::extension::{ExtensionTable, ObjectType};
use crate::model::{ContactRecord, Role, ServiceData};
use crate::traits::RegistrySession;

/// Role → registry contact id
pub type ResolvedContacts = BTreeMap<Role, String>;

/// Resolves registry contact ids for one provisioning attempt
pub struct ContactResolver<'a> {
    session: &'a mut dyn RegistrySession,
    family: &'a RegistryFamily,
    extensions: &'a ExtensionTable,
    order: &'a ServiceData,
    auth_info: &'a str,
}

impl<'a> ContactResolver<'a> {
    /// Create a resolver bound to an open session
    ///
    /// # Parameters
    ///
    /// - `session`: Session used for contact-create commands
    /// - `family`: Registry family, selects contact payload extensions
    /// - `extensions`: Extension table
    /// - `order`: Service data of the order, passed to extensions
    /// - `auth_info`: Authorization code set on created contacts
    pub fn new(
        session: &'a mut dyn RegistrySession,
        family: &'a RegistryFamily,
        extensions: &'a ExtensionTable,
        order: &'a ServiceData,
        auth_info: &'a str,
    ) -> Self {
        Self {
            session,
            family,
            extensions,
            order,
            auth_info,
        }
    }

    /// Map each role to a registry contact id
    ///
    /// Roles already carrying a `registry_id` keep it and seed the
    /// fingerprint table. Remaining roles reuse a seeded or freshly created
    /// id with the same fingerprint, or get a new registry contact. Roles
    /// without any contact data are left out; a registry that requires them
    /// rejects the domain command instead.
    ///
    /// # Returns
    ///
    /// - `Ok(ResolvedContacts)`: One id per resolved role
    /// - `Err(Error)`: The first failed contact-create; no further roles are tried
    pub async fn resolve(
        &mut self,
        roles: &[Role],
        contacts: &BTreeMap<String, ContactRecord>,
    ) -> Result<ResolvedContacts> {
        let mut resolved = ResolvedContacts::new();
        let mut by_fingerprint: HashMap<String, String> = HashMap::new();

        for role in roles {
            if let Some(contact) = contacts.get(role.as_str())
                && let Some(id) = contact.registry_id()
            {
                resolved.insert(*role, id.to_string());
                by_fingerprint
                    .entry(fingerprint(contact))
                    .or_insert_with(|| id.to_string());
            }
        }

        for role in roles {
            if resolved.contains_key(role) {
                continue;
            }
            let Some(contact) = contacts.get(role.as_str()).filter(|c| !c.is_empty()) else {
                debug!(role = %role, "No contact data for role, skipping");
                continue;
            };

            let key = fingerprint(contact);
            if let Some(id) = by_fingerprint.get(&key) {
                debug!(role = %role, contact_id = %id, "Reusing registry contact");
                resolved.insert(*role, id.clone());
                continue;
            }

            let payload = contact_payload(contact, &generate_contact_id(), self.auth_info);
            let payload =
                self.extensions
                    .extend(ObjectType::Contact, payload, self.family, self.order);

            let created = self
                .session
                .create_contact(&payload)
                .await
                .map_err(|e| with_role(e, *role))?;

            info!(role = %role, contact_id = %created.id, "Created registry contact");
            by_fingerprint.insert(key, created.id.clone());
            resolved.insert(*role, created.id);
        }

        Ok(resolved)
    }
}

fn with_role(err: Error, role: Role) -> Error {
    match err {
        Error::RegistryProtocol { command, message } => Error::RegistryProtocol {
            command: format!("{} ({})", command, role),
            message,
        },
        other => other,
    }
}
