//! Input records: one enumerated cloud resource, as provider JSON

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resource types scoped to the tenant/subscription rather than a region or
/// resource group. Compared case-insensitively.
pub const GLOBAL_RESOURCE_TYPES: &[&str] = &[
    "Microsoft.Authorization/roleAssignments",
    "Microsoft.Authorization/roleDefinitions",
    "Microsoft.Authorization/policyAssignments",
    "Microsoft.Authorization/policyDefinitions",
];

pub const ROLE_ASSIGNMENT_TYPE: &str = "Microsoft.Authorization/roleAssignments";
pub const VIRTUAL_NETWORK_TYPE: &str = "Microsoft.Network/virtualNetworks";

const GLOBAL_REQUIRED: &[&str] = &["id", "name", "type", "subscriptionId"];
const REGIONAL_REQUIRED: &[&str] = &[
    "id",
    "name",
    "type",
    "subscriptionId",
    "location",
    "resourceGroup",
];

/// A provider resource record.
///
/// Kept as the raw JSON object so arbitrary provider properties survive
/// untouched; well-known fields are exposed through accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRecord(Map<String, Value>);

impl ResourceRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// `None` unless `value` is a JSON object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Real provider ID; empty when absent
    pub fn id(&self) -> &str {
        self.str_field("id").unwrap_or("")
    }

    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.str_field("type")
    }

    pub fn location(&self) -> Option<&str> {
        self.str_field("location")
    }

    pub fn resource_group(&self) -> Option<&str> {
        self.str_field("resourceGroup")
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.str_field("subscriptionId")
    }

    pub fn principal_id(&self) -> Option<&str> {
        self.str_field("principalId")
    }

    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type()
            .map_or(false, |t| t.eq_ignore_ascii_case(resource_type))
    }

    pub fn is_global_type(&self) -> bool {
        GLOBAL_RESOURCE_TYPES.iter().any(|t| self.is_type(t))
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        if self.is_global_type() {
            GLOBAL_REQUIRED
        } else {
            REGIONAL_REQUIRED
        }
    }

    /// Required fields that are absent, null, or empty strings
    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.required_fields()
            .iter()
            .copied()
            .filter(|field| match self.0.get(*field) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                resource_id: self.id().to_string(),
                missing: missing.into_iter().map(str::to_string).collect(),
            })
        }
    }

    /// Copy a GUID-shaped principal ID from `identity.principalId` to the top
    /// level, normalized to lowercase. Non-GUID values are left alone.
    pub fn normalize_principal(&mut self) {
        let candidate = self
            .principal_id()
            .map(str::to_string)
            .or_else(|| {
                self.0
                    .get("identity")
                    .and_then(|identity| identity.get("principalId"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });

        if let Some(principal) = candidate {
            if is_guid(&principal) {
                self.0.insert(
                    "principalId".to_string(),
                    Value::String(principal.to_ascii_lowercase()),
                );
            }
        }
    }
}

impl From<Map<String, Value>> for ResourceRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// `8-4-4-4-12` hex groups, either case
pub fn is_guid(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    bytes.iter().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => *b == b'-',
        _ => b.is_ascii_hexdigit(),
    })
}

/// The provider namespace segment of a resource ID, e.g. `Microsoft.Compute`
pub fn provider_namespace(resource_id: &str) -> Option<&str> {
    let mut segments = resource_id.split('/');
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("providers") {
            return segments.next().filter(|s| !s.is_empty());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> ResourceRecord {
        ResourceRecord::from_value(value).unwrap()
    }

    #[test]
    fn test_regional_type_requires_location_and_group() {
        let r = record(json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm",
            "name": "vm",
            "type": "Microsoft.Compute/virtualMachines",
            "subscriptionId": "s",
            "location": "",
        }));
        let err = r.validate().unwrap_err();
        assert_eq!(err.missing, vec!["location", "resourceGroup"]);
    }

    #[test]
    fn test_global_type_needs_only_core_fields() {
        let r = record(json!({
            "id": "/subscriptions/s/providers/Microsoft.Authorization/roleAssignments/ra",
            "name": "ra",
            "type": "microsoft.authorization/roleassignments",
            "subscriptionId": "s",
        }));
        assert!(r.is_global_type());
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_guid_shape() {
        assert!(is_guid("0a1b2c3d-4e5f-6789-abcd-ef0123456789"));
        assert!(is_guid("0A1B2C3D-4E5F-6789-ABCD-EF0123456789"));
        assert!(!is_guid("not-a-guid"));
        assert!(!is_guid("0a1b2c3d-4e5f-6789-abcd-ef012345678g"));
    }

    #[test]
    fn test_normalize_principal_from_identity() {
        let mut r = record(json!({
            "id": "x",
            "identity": {"principalId": "0A1B2C3D-4E5F-6789-ABCD-EF0123456789"},
        }));
        r.normalize_principal();
        assert_eq!(
            r.principal_id(),
            Some("0a1b2c3d-4e5f-6789-abcd-ef0123456789")
        );

        let mut r = record(json!({"id": "x", "identity": {"principalId": "svc-account"}}));
        r.normalize_principal();
        assert_eq!(r.principal_id(), None);
    }

    #[test]
    fn test_provider_namespace() {
        assert_eq!(
            provider_namespace("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/sa"),
            Some("Microsoft.Storage")
        );
        assert_eq!(provider_namespace("/subscriptions/s"), None);
    }
}
