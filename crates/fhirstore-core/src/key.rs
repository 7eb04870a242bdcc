//! Cache keys

use fhirstore_client::model::resource_identifiers;
use fhirstore_client::{Identifier, ResourceType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Key of a cached resource: its type plus one external identifier
///
/// String form is `<Type>/<system>|<code>|<value>`, shortened to
/// `<Type>/<system>|<value>` or `<Type>/<value>` when parts are absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: ResourceType,
    pub identifier: Identifier,
}

impl ResourceKey {
    pub fn new(resource_type: ResourceType, identifier: Identifier) -> Self {
        Self {
            resource_type,
            identifier,
        }
    }

    /// Derive a key from a resource's type and its first identifier
    pub fn of_resource(resource: &Value) -> Result<Self, CoreError> {
        let resource_type = ResourceType::of_resource(resource).ok_or_else(|| {
            CoreError::InvalidKey("resource has no known resourceType".to_string())
        })?;
        let identifier = resource_identifiers(resource)
            .first()
            .map(|i| i.to_identifier())
            .filter(|i| !i.value.is_empty())
            .ok_or_else(|| CoreError::InvalidKey(format!("{} has no identifier", resource_type)))?;

        Ok(Self::new(resource_type, identifier))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = &self.identifier;
        match (id.system(), id.type_code()) {
            (None, None) => write!(f, "{}/{}", self.resource_type, id.value),
            (Some(system), None) => write!(f, "{}/{}|{}", self.resource_type, system, id.value),
            (system, Some(code)) => write!(
                f,
                "{}/{}|{}|{}",
                self.resource_type,
                system.unwrap_or_default(),
                code,
                id.value
            ),
        }
    }
}

impl FromStr for ResourceKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_name, rest) = s
            .split_once('/')
            .ok_or_else(|| CoreError::InvalidKey(format!("missing resource type in '{}'", s)))?;

        let resource_type: ResourceType =
            type_name.parse().map_err(|e: fhirstore_client::ParseResourceTypeError| {
                CoreError::InvalidKey(e.to_string())
            })?;

        let parts: Vec<&str> = rest.split('|').collect();
        let identifier = match parts.as_slice() {
            [value] => Identifier::new(*value),
            [system, value] => Identifier::new(*value).with_system(*system),
            [system, code, value] => Identifier::new(*value)
                .with_system(*system)
                .with_type_code(*code),
            _ => {
                return Err(CoreError::InvalidKey(format!(
                    "too many '|' separators in '{}'",
                    s
                )));
            }
        };

        Ok(Self::new(resource_type, identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_shapes() {
        let key: ResourceKey = "Patient/123".parse().unwrap();
        assert_eq!(key.identifier, Identifier::new("123"));

        let key: ResourceKey = "Patient/http://ids.example/mrn|123".parse().unwrap();
        assert_eq!(key.identifier.system(), Some("http://ids.example/mrn"));
        assert_eq!(key.identifier.value, "123");

        let key: ResourceKey = "AuditEvent/sys|MR|9".parse().unwrap();
        assert_eq!(key.resource_type, ResourceType::AuditEvent);
        assert_eq!(key.identifier.type_code(), Some("MR"));
    }

    #[test]
    fn test_display_matches_parse() {
        for s in ["Patient/123", "Patient/sys|123", "Task/sys|MR|1", "Task/|MR|1"] {
            let key: ResourceKey = s.parse().unwrap();
            assert_eq!(key.to_string(), s);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!("123".parse::<ResourceKey>().is_err());
        assert!("Medication/1".parse::<ResourceKey>().is_err());
        assert!("Patient/a|b|c|d".parse::<ResourceKey>().is_err());
    }

    #[test]
    fn test_of_resource() {
        let patient = json!({
            "resourceType": "Patient",
            "identifier": [{"system": "sys", "value": "123"}, {"value": "other"}]
        });
        let key = ResourceKey::of_resource(&patient).unwrap();
        assert_eq!(key.to_string(), "Patient/sys|123");

        assert!(ResourceKey::of_resource(&json!({"resourceType": "Patient"})).is_err());
    }
}
