//! Protocol Extension Resolver
//!
//! Reshapes generic command payloads into what a particular registry family
//! expects. Each family with quirks implements [`RegistryExtension`] once and
//! is registered in an [`ExtensionTable`]; families without an entry get the
//! payload back untouched. No I/O happens here.

mod fi;
mod jp;

pub use fi::FiExtension;
pub use jp::JpExtension;

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::directory::RegistryFamily;
use crate::model::ServiceData;
use crate::traits::CommandParams;

/// Registry object a payload describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Contact,
    Domain,
    Host,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Contact => "contact",
            ObjectType::Domain => "domain",
            ObjectType::Host => "host",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload transforms for one registry family
///
/// Every method defaults to returning the payload unchanged, so a family
/// only overrides the object types it actually needs to touch.
pub trait RegistryExtension: Send + Sync {
    /// Family this extension applies to
    fn family(&self) -> &'static str;

    /// Adjust a contact-create payload
    fn extend_contact(&self, params: CommandParams, _order: &ServiceData) -> CommandParams {
        params
    }

    /// Adjust a domain-create or domain-update payload
    fn extend_domain(&self, params: CommandParams, _order: &ServiceData) -> CommandParams {
        params
    }

    /// Adjust a host payload
    fn extend_host(&self, params: CommandParams, _order: &ServiceData) -> CommandParams {
        params
    }
}

/// Registry family → extension lookup
pub struct ExtensionTable {
    extensions: HashMap<RegistryFamily, Box<dyn RegistryExtension>>,
}

impl ExtensionTable {
    /// Table without any extensions: every family passes through
    pub fn empty() -> Self {
        Self {
            extensions: HashMap::new(),
        }
    }

    /// Table with the extensions shipped in this crate
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.register(Box::new(FiExtension));
        table.register(Box::new(JpExtension));
        table
    }

    /// Add or replace the extension for its family
    pub fn register(&mut self, extension: Box<dyn RegistryExtension>) {
        self.extensions
            .insert(RegistryFamily::new(extension.family()), extension);
    }

    /// Whether a family has a registered extension
    pub fn has_extension(&self, family: &RegistryFamily) -> bool {
        self.extensions.contains_key(family)
    }

    /// Shape `params` for `family`
    ///
    /// # Parameters
    ///
    /// - `object`: Registry object the payload describes
    /// - `params`: Generic payload
    /// - `family`: Registry family of the target suffix
    /// - `order`: Service data of the order being provisioned
    ///
    /// # Returns
    ///
    /// The adjusted payload; `params` itself when the family has no extension
    pub fn extend(
        &self,
        object: ObjectType,
        params: CommandParams,
        family: &RegistryFamily,
        order: &ServiceData,
    ) -> CommandParams {
        let Some(extension) = self.extensions.get(family) else {
            return params;
        };
        match object {
            ObjectType::Contact => extension.extend_contact(params, order),
            ObjectType::Domain => extension.extend_domain(params, order),
            ObjectType::Host => extension.extend_host(params, order),
        }
    }
}

impl Default for ExtensionTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Shape `params` for `family` using the built-in extension table
pub fn extend(
    object: ObjectType,
    params: CommandParams,
    family: &RegistryFamily,
    order: &ServiceData,
) -> CommandParams {
    static BUILTIN: OnceLock<ExtensionTable> = OnceLock::new();
    BUILTIN
        .get_or_init(ExtensionTable::builtin)
        .extend(object, params, family, order)
}
