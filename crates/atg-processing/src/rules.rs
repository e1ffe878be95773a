//! Relationship rules: shape-driven edges beyond containment
//!
//! Each rule looks at a record and emits [`GenericLink`]s from the resource to
//! a target node. Targets that are containers (tags, regions, identities) are
//! upserted with the link; targets that are other resources must already
//! exist and the link is silently skipped otherwise.

use crate::record::ResourceRecord;
use crate::relationships::GenericLink;
use crate::{RESOURCE_LABEL, TAG_LABEL};
use atg_storage::NodeKey;
use serde_json::Value;

pub const REGION_LABEL: &str = "Region";
pub const MANAGED_IDENTITY_LABEL: &str = "ManagedIdentity";

pub const TAGGED_WITH: &str = "TAGGED_WITH";
pub const LOCATED_IN: &str = "LOCATED_IN";
pub const USES_IDENTITY: &str = "USES_IDENTITY";
pub const CONNECTED_TO: &str = "CONNECTED_TO";
pub const USES_NIC: &str = "USES_NIC";

const NETWORK_INTERFACE_TYPE: &str = "Microsoft.Network/networkInterfaces";
const VIRTUAL_MACHINE_TYPE: &str = "Microsoft.Compute/virtualMachines";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipRule {
    Tags,
    Region,
    Identity,
    Network,
}

impl RelationshipRule {
    pub const ALL: [RelationshipRule; 4] = [
        RelationshipRule::Tags,
        RelationshipRule::Region,
        RelationshipRule::Identity,
        RelationshipRule::Network,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RelationshipRule::Tags => "tags",
            RelationshipRule::Region => "region",
            RelationshipRule::Identity => "identity",
            RelationshipRule::Network => "network",
        }
    }

    pub fn applies(&self, record: &ResourceRecord) -> bool {
        match self {
            RelationshipRule::Tags => record
                .get("tags")
                .and_then(Value::as_object)
                .map_or(false, |tags| !tags.is_empty()),
            RelationshipRule::Region => record.location().is_some(),
            RelationshipRule::Identity => record.get("identity").map_or(false, Value::is_object),
            RelationshipRule::Network => {
                record.is_type(NETWORK_INTERFACE_TYPE) || record.is_type(VIRTUAL_MACHINE_TYPE)
            }
        }
    }

    pub fn emit(&self, record: &ResourceRecord) -> Vec<GenericLink> {
        if !self.applies(record) {
            return Vec::new();
        }
        match self {
            RelationshipRule::Tags => emit_tags(record),
            RelationshipRule::Region => emit_region(record),
            RelationshipRule::Identity => emit_identity(record),
            RelationshipRule::Network => emit_network(record),
        }
    }
}

fn tag_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn emit_tags(record: &ResourceRecord) -> Vec<GenericLink> {
    let Some(tags) = record.get("tags").and_then(Value::as_object) else {
        return Vec::new();
    };
    tags.iter()
        .map(|(key, value)| {
            let value = tag_text(value);
            GenericLink::upserting(
                record.id(),
                TAGGED_WITH,
                NodeKey::by_id(TAG_LABEL, format!("{key}:{value}")),
            )
            .with_target_prop("key", key.as_str())
            .with_target_prop("value", value)
        })
        .collect()
}

fn emit_region(record: &ResourceRecord) -> Vec<GenericLink> {
    let Some(location) = record.location() else {
        return Vec::new();
    };
    let region = location.to_ascii_lowercase();
    vec![GenericLink::upserting(
        record.id(),
        LOCATED_IN,
        NodeKey::by_id(REGION_LABEL, region.as_str()),
    )
    .with_target_prop("name", region)]
}

fn emit_identity(record: &ResourceRecord) -> Vec<GenericLink> {
    let Some(identity) = record.get("identity") else {
        return Vec::new();
    };
    let mut links = Vec::new();

    if let Some(principal) = identity.get("principalId").and_then(Value::as_str) {
        if !principal.is_empty() {
            links.push(
                GenericLink::upserting(
                    record.id(),
                    USES_IDENTITY,
                    NodeKey::by_id(MANAGED_IDENTITY_LABEL, principal.to_ascii_lowercase()),
                )
                .with_target_prop("identity_type", "SystemAssigned"),
            );
        }
    }

    if let Some(assigned) = identity
        .get("userAssignedIdentities")
        .and_then(Value::as_object)
    {
        for (identity_id, details) in assigned {
            let mut link = GenericLink::upserting(
                record.id(),
                USES_IDENTITY,
                NodeKey::by_id(MANAGED_IDENTITY_LABEL, identity_id.as_str()),
            )
            .with_target_prop("identity_type", "UserAssigned");
            if let Some(principal) = details.get("principalId").and_then(Value::as_str) {
                link = link.with_target_prop("principal_id", principal);
            }
            links.push(link);
        }
    }

    links
}

fn emit_network(record: &ResourceRecord) -> Vec<GenericLink> {
    let props = record.get("properties");
    let ids_at = |list: Option<&Value>, path: &[&str]| -> Vec<String> {
        list.and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        path.iter()
                            .try_fold(item, |v, segment| v.get(*segment))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    if record.is_type(NETWORK_INTERFACE_TYPE) {
        ids_at(
            props.and_then(|p| p.get("ipConfigurations")),
            &["properties", "subnet", "id"],
        )
        .into_iter()
        .map(|subnet| {
            GenericLink::matching(record.id(), CONNECTED_TO, NodeKey::by_id(RESOURCE_LABEL, subnet))
        })
        .collect()
    } else {
        ids_at(
            props
                .and_then(|p| p.get("networkProfile"))
                .and_then(|n| n.get("networkInterfaces")),
            &["id"],
        )
        .into_iter()
        .map(|nic| GenericLink::matching(record.id(), USES_NIC, NodeKey::by_id(RESOURCE_LABEL, nic)))
        .collect()
    }
}

/// All links every rule emits for a record
pub fn emit_all(record: &ResourceRecord) -> Vec<GenericLink> {
    RelationshipRule::ALL
        .iter()
        .flat_map(|rule| rule.emit(record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atg_storage::GraphValue;
    use serde_json::json;

    fn record(value: Value) -> ResourceRecord {
        ResourceRecord::from_value(value).unwrap()
    }

    fn prop_str<'a>(link: &'a GenericLink, name: &str) -> Option<&'a str> {
        link.target_props.get(name).and_then(GraphValue::as_str)
    }

    #[test]
    fn test_tags_rule() {
        let r = record(json!({"id": "r1", "tags": {"env": "prod", "cost": 42}}));
        let links = RelationshipRule::Tags.emit(&r);
        assert_eq!(links.len(), 2);
        let targets: Vec<_> = links.iter().map(|l| l.target.value.as_str()).collect();
        assert!(targets.contains(&"env:prod"));
        assert!(targets.contains(&"cost:42"));
        assert!(links.iter().all(|l| l.rel_type == TAGGED_WITH && l.create_target));
        assert!(prop_str(&links[0], "key").is_some());
    }

    #[test]
    fn test_region_rule_lowercases() {
        let r = record(json!({"id": "r1", "location": "EastUS"}));
        let links = RelationshipRule::Region.emit(&r);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, NodeKey::by_id(REGION_LABEL, "eastus"));
    }

    #[test]
    fn test_identity_rule_system_and_user_assigned() {
        let r = record(json!({
            "id": "r1",
            "identity": {
                "type": "SystemAssigned, UserAssigned",
                "principalId": "AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE",
                "userAssignedIdentities": {
                    "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ManagedIdentity/userAssignedIdentities/id1": {"principalId": "p1"}
                }
            }
        }));
        let links = RelationshipRule::Identity.emit(&r);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].target.value, "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");
        assert_eq!(prop_str(&links[1], "principal_id"), Some("p1"));
    }

    #[test]
    fn test_network_rule_for_nic_and_vm() {
        let nic = record(json!({
            "id": "nic1",
            "type": "Microsoft.Network/networkInterfaces",
            "properties": {"ipConfigurations": [
                {"properties": {"subnet": {"id": "subnet-a"}}},
                {"properties": {}}
            ]}
        }));
        let links = RelationshipRule::Network.emit(&nic);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].rel_type, CONNECTED_TO);
        assert!(!links[0].create_target);

        let vm = record(json!({
            "id": "vm1",
            "type": "Microsoft.Compute/virtualMachines",
            "properties": {"networkProfile": {"networkInterfaces": [{"id": "nic1"}]}}
        }));
        let links = RelationshipRule::Network.emit(&vm);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].rel_type, USES_NIC);
        assert_eq!(links[0].target, NodeKey::by_id(RESOURCE_LABEL, "nic1"));
    }

    #[test]
    fn test_rules_skip_unrelated_records() {
        let r = record(json!({"id": "r1", "type": "Microsoft.KeyVault/vaults"}));
        assert!(emit_all(&r).is_empty());
    }
}
