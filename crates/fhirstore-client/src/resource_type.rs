//! FHIR resource type tags

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Error type for parsing a resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResourceTypeError(String);

impl fmt::Display for ParseResourceTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid resource type: {}", self.0)
    }
}

impl std::error::Error for ParseResourceTypeError {}

/// Kind of clinical resource a store can persist
///
/// Used as the routing key between the store and its per-type clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    AuditEvent,
    Communication,
    CommunicationRequest,
    Consent,
    Device,
    DocumentReference,
    Encounter,
    Endpoint,
    Group,
    HealthcareService,
    Location,
    Observation,
    Organization,
    Patient,
    Practitioner,
    PractitionerRole,
    Task,
}

impl ResourceType {
    pub const ALL: [ResourceType; 17] = [
        ResourceType::AuditEvent,
        ResourceType::Communication,
        ResourceType::CommunicationRequest,
        ResourceType::Consent,
        ResourceType::Device,
        ResourceType::DocumentReference,
        ResourceType::Encounter,
        ResourceType::Endpoint,
        ResourceType::Group,
        ResourceType::HealthcareService,
        ResourceType::Location,
        ResourceType::Observation,
        ResourceType::Organization,
        ResourceType::Patient,
        ResourceType::Practitioner,
        ResourceType::PractitionerRole,
        ResourceType::Task,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::AuditEvent => "AuditEvent",
            ResourceType::Communication => "Communication",
            ResourceType::CommunicationRequest => "CommunicationRequest",
            ResourceType::Consent => "Consent",
            ResourceType::Device => "Device",
            ResourceType::DocumentReference => "DocumentReference",
            ResourceType::Encounter => "Encounter",
            ResourceType::Endpoint => "Endpoint",
            ResourceType::Group => "Group",
            ResourceType::HealthcareService => "HealthcareService",
            ResourceType::Location => "Location",
            ResourceType::Observation => "Observation",
            ResourceType::Organization => "Organization",
            ResourceType::Patient => "Patient",
            ResourceType::Practitioner => "Practitioner",
            ResourceType::PractitionerRole => "PractitionerRole",
            ResourceType::Task => "Task",
        }
    }

    /// Read the `resourceType` element of a FHIR JSON resource
    pub fn of_resource(resource: &serde_json::Value) -> Option<ResourceType> {
        resource
            .get("resourceType")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ParseResourceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ResourceType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(trimmed))
            .copied()
            .ok_or_else(|| ParseResourceTypeError(s.to_string()))
    }
}

/// Ordered set of resource types
///
/// Deserializes from either a list (`["Patient", "Task"]`) or a
/// comma-separated string (`"Patient,Task"`), the latter being the form
/// used in environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceTypeSet(BTreeSet<ResourceType>);

impl ResourceTypeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource_type: ResourceType) -> bool {
        self.0.insert(resource_type)
    }

    pub fn contains(&self, resource_type: ResourceType) -> bool {
        self.0.contains(&resource_type)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ResourceType> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ResourceType> for ResourceTypeSet {
    fn from_iter<I: IntoIterator<Item = ResourceType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromStr for ResourceTypeSet {
    type Err = ParseResourceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(ResourceType::from_str)
            .collect()
    }
}

impl fmt::Display for ResourceTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|t| t.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

impl<'de> Deserialize<'de> for ResourceTypeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            List(Vec<String>),
            Joined(String),
        }

        let parts = match Repr::deserialize(deserializer)? {
            Repr::List(items) => items,
            Repr::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        };

        parts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| p.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("Patient".parse::<ResourceType>().unwrap(), ResourceType::Patient);
        assert_eq!("auditevent".parse::<ResourceType>().unwrap(), ResourceType::AuditEvent);
        assert!("Medication".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_of_resource() {
        let patient = json!({"resourceType": "Patient", "id": "1"});
        assert_eq!(ResourceType::of_resource(&patient), Some(ResourceType::Patient));
        assert_eq!(ResourceType::of_resource(&json!({"id": "1"})), None);
    }

    #[test]
    fn test_set_from_comma_separated() {
        let set: ResourceTypeSet = "Patient, AuditEvent,,Task".parse().unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains(ResourceType::AuditEvent));
        assert_eq!(set.to_string(), "AuditEvent,Patient,Task");
    }

    #[test]
    fn test_set_deserializes_from_list_or_string() {
        let from_list: ResourceTypeSet =
            serde_json::from_value(json!(["Patient", "Task"])).unwrap();
        let from_string: ResourceTypeSet = serde_json::from_value(json!("Task,Patient")).unwrap();
        assert_eq!(from_list, from_string);

        let bad: Result<ResourceTypeSet, _> = serde_json::from_value(json!(["Nope"]));
        assert!(bad.is_err());
    }
}
