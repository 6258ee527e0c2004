//! `.jp` registry extension

use serde_json::{Value, json};

use super::RegistryExtension;
use crate::model::ServiceData;
use crate::traits::CommandParams;

/// Japanese registry: the registry-specific contact field and the DNS hosting
/// flag on hosts
pub struct JpExtension;

impl RegistryExtension for JpExtension {
    fn family(&self) -> &'static str {
        "jp"
    }

    fn extend_contact(&self, mut params: CommandParams, order: &ServiceData) -> CommandParams {
        params.insert(
            "japanSpecificField".into(),
            json!(order.custom_str("jp_field").unwrap_or_default()),
        );
        params
    }

    fn extend_host(&self, mut params: CommandParams, order: &ServiceData) -> CommandParams {
        let hosting = order.custom.get("jp_dns").cloned().unwrap_or(Value::Bool(false));
        params.insert("jp_dns_hosting".into(), hosting);
        params
    }
}
