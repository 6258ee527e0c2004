//! `.fi` registry extension

use serde_json::{Value, json};

use super::RegistryExtension;
use crate::model::ServiceData;
use crate::traits::CommandParams;

/// Finnish registry: person/organisation identity on contacts, structured
/// nameservers and no contact block on domains
pub struct FiExtension;

impl RegistryExtension for FiExtension {
    fn family(&self) -> &'static str {
        "fi"
    }

    fn extend_contact(&self, mut params: CommandParams, order: &ServiceData) -> CommandParams {
        let finnish = params
            .get("country")
            .and_then(Value::as_str)
            .is_some_and(|cc| cc.eq_ignore_ascii_case("FI"));
        params.insert("isfinnish".into(), json!(if finnish { 1 } else { 0 }));
        params.insert("role".into(), json!(5));

        let id_number = order.custom_str("id_number").unwrap_or_default();
        if order.custom_str("org_name").is_some() {
            params.insert("type".into(), json!(1));
            params.insert("registernumber".into(), json!(id_number));
        } else {
            params.insert("type".into(), json!(0));
            params.insert("identity".into(), json!(id_number));
            params.insert(
                "birthDate".into(),
                json!(order.custom_str("birthDate").unwrap_or_default()),
            );
        }
        params
    }

    fn extend_domain(&self, mut params: CommandParams, _order: &ServiceData) -> CommandParams {
        if let Some(Value::Array(hosts)) = params.get("nss")
            && !hosts.is_empty()
        {
            let structured: Vec<Value> = hosts
                .iter()
                .map(|host| json!({ "hostName": host }))
                .collect();
            params.insert("nss".into(), Value::Array(structured));
        }
        params.remove("contacts");
        params
    }
}
