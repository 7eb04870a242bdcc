//! Identifier, reference and bundle shapes used by the client

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ResolveError;
use crate::resource_type::ResourceType;

/// External identifier of a resource as a (system, type code, value) triple
///
/// `value` is always present. `system` and `type_code` may each be absent;
/// empty strings are treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_code: Option<String>,
    pub value: String,
}

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            system: None,
            type_code: None,
            value: value.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = non_empty(Some(system.into()));
        self
    }

    pub fn with_type_code(mut self, code: impl Into<String>) -> Self {
        self.type_code = non_empty(Some(code.into()));
        self
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref().filter(|s| !s.is_empty())
    }

    pub fn type_code(&self) -> Option<&str> {
        self.type_code.as_deref().filter(|s| !s.is_empty())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.system().unwrap_or(""),
            self.type_code().unwrap_or(""),
            self.value
        )
    }
}

/// An identifier plus the resource type it identifies
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceReference {
    pub resource_type: ResourceType,
    pub identifier: Identifier,
}

impl ResourceReference {
    pub fn new(resource_type: ResourceType, identifier: Identifier) -> Self {
        Self {
            resource_type,
            identifier,
        }
    }
}

/// FHIR `Coding` element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// FHIR `CodeableConcept` element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// FHIR `Identifier` element as it appears in resource JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FhirIdentifier {
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<CodeableConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl FhirIdentifier {
    /// Extract the triple: identifier system, code of the first type coding, value
    pub fn to_identifier(&self) -> Identifier {
        let type_code = self
            .type_
            .as_ref()
            .and_then(|t| t.coding.first())
            .and_then(|c| c.code.clone());

        Identifier {
            system: non_empty(self.system.clone()),
            type_code: non_empty(type_code),
            value: self.value.clone().unwrap_or_default(),
        }
    }
}

impl From<&Identifier> for FhirIdentifier {
    fn from(identifier: &Identifier) -> Self {
        Self {
            use_: None,
            type_: identifier.type_code().map(|code| CodeableConcept {
                coding: vec![Coding {
                    system: None,
                    code: Some(code.to_string()),
                    display: None,
                }],
                text: None,
            }),
            system: identifier.system().map(str::to_string),
            value: Some(identifier.value.clone()),
        }
    }
}

/// FHIR `Reference` element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FhirReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<FhirIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl FhirReference {
    /// Convert to a typed reference. Requires both `type` and `identifier`.
    pub fn to_resource_reference(&self) -> Result<ResourceReference, ResolveError> {
        let type_name = self.type_.as_deref().unwrap_or_default();
        let resource_type: ResourceType = type_name
            .parse()
            .map_err(|_| ResolveError::UnknownResourceType(type_name.to_string()))?;
        let identifier = self
            .identifier
            .as_ref()
            .ok_or(ResolveError::MissingIdentifier)?
            .to_identifier();

        Ok(ResourceReference::new(resource_type, identifier))
    }
}

/// Read the identifiers declared on a FHIR JSON resource
pub fn resource_identifiers(resource: &Value) -> Vec<FhirIdentifier> {
    resource
        .get("identifier")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Read the logical id of a FHIR JSON resource
pub fn resource_id(resource: &Value) -> Option<&str> {
    resource.get("id").and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Search result bundle, reduced to what the store needs
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Bundle {
    #[serde(default, rename = "resourceType")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub link: Vec<BundleLink>,
    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BundleEntry {
    #[serde(default, rename = "fullUrl")]
    pub full_url: Option<String>,
    #[serde(default)]
    pub resource: Option<Value>,
}

impl Bundle {
    /// URL of the next page, if the server paginated the result
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == "next")
            .map(|l| l.url.as_str())
    }

    /// Resources in the bundle that are of the given type
    pub fn resources_of_type(&self, resource_type: ResourceType) -> impl Iterator<Item = &Value> {
        self.entry
            .iter()
            .filter_map(|e| e.resource.as_ref())
            .filter(move |r| ResourceType::of_resource(r) == Some(resource_type))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_builders_drop_empty_parts() {
        let id = Identifier::new("123").with_system("").with_type_code("MR");
        assert_eq!(id.system(), None);
        assert_eq!(id.type_code(), Some("MR"));
    }

    #[test]
    fn test_fhir_identifier_uses_first_coding() {
        let fhir: FhirIdentifier = serde_json::from_value(json!({
            "system": "urn:sys",
            "type": {"coding": [{"system": "http://terminology", "code": "MR"}, {"code": "XX"}]},
            "value": "123"
        }))
        .unwrap();

        let id = fhir.to_identifier();
        assert_eq!(id.system(), Some("urn:sys"));
        assert_eq!(id.type_code(), Some("MR"));
        assert_eq!(id.value, "123");
    }

    #[test]
    fn test_fhir_identifier_without_type() {
        let fhir: FhirIdentifier =
            serde_json::from_value(json!({"system": "urn:sys", "value": "123"})).unwrap();
        assert_eq!(fhir.to_identifier().type_code(), None);
    }

    #[test]
    fn test_reference_conversion() {
        let reference: FhirReference = serde_json::from_value(json!({
            "type": "Patient",
            "identifier": {"system": "urn:sys", "value": "42"}
        }))
        .unwrap();
        let typed = reference.to_resource_reference().unwrap();
        assert_eq!(typed.resource_type, ResourceType::Patient);
        assert_eq!(typed.identifier.value, "42");

        let untyped = FhirReference {
            identifier: reference.identifier.clone(),
            ..Default::default()
        };
        assert!(matches!(
            untyped.to_resource_reference(),
            Err(ResolveError::UnknownResourceType(_))
        ));
    }

    #[test]
    fn test_bundle_next_link_and_type_filter() {
        let bundle: Bundle = serde_json::from_value(json!({
            "resourceType": "Bundle",
            "link": [{"relation": "self", "url": "a"}, {"relation": "next", "url": "b"}],
            "entry": [
                {"resource": {"resourceType": "OperationOutcome"}},
                {"resource": {"resourceType": "Patient", "id": "p1"}},
                {"fullUrl": "x"}
            ]
        }))
        .unwrap();

        assert_eq!(bundle.next_link(), Some("b"));
        let patients: Vec<_> = bundle.resources_of_type(ResourceType::Patient).collect();
        assert_eq!(patients.len(), 1);
        assert_eq!(resource_id(patients[0]), Some("p1"));
    }
}
