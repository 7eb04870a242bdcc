//! Identifier-based resource resolution
//!
//! Turns an identifier triple into exactly one search query and picks the
//! first resource of the requested type out of the result bundle. No I/O
//! happens here; the client executes the query.
//!
//! The query shape is chosen by which parts of the identifier are present:
//!
//! | system | code | query |
//! |---|---|---|
//! | - | - | `identifier=<value>` |
//! | yes | - | `identifier=<system>\|<value>` |
//! | yes | yes | `identifier:of_type=<system>\|<code>\|<value>` |
//!
//! The joined string is form-url-encoded as a whole. Only one shape is
//! ever tried; an empty result from the typed search is not retried with
//! a looser one.

use serde_json::Value;
use std::fmt;

use crate::error::ResolveError;
use crate::model::{Bundle, Identifier};
use crate::resource_type::ResourceType;

/// Plain token search parameter
pub const IDENTIFIER_PARAM: &str = "identifier";

/// Typed token search parameter
pub const IDENTIFIER_OF_TYPE_PARAM: &str = "identifier:of_type";

/// Which parts of an identifier are populated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierShape {
    ValueOnly,
    SystemAndValue,
    SystemCodeAndValue,
}

impl IdentifierShape {
    pub fn of(identifier: &Identifier) -> Result<Self, ResolveError> {
        if identifier.value.is_empty() {
            return Err(ResolveError::EmptyValue);
        }

        match (identifier.system(), identifier.type_code()) {
            (None, None) => Ok(IdentifierShape::ValueOnly),
            (Some(_), None) => Ok(IdentifierShape::SystemAndValue),
            (Some(_), Some(_)) => Ok(IdentifierShape::SystemCodeAndValue),
            (None, Some(_)) => Err(ResolveError::CodeWithoutSystem),
        }
    }
}

/// A single identifier search against one resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    resource_type: ResourceType,
    parameter: &'static str,
    raw_value: String,
}

impl SearchQuery {
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn parameter(&self) -> &'static str {
        self.parameter
    }

    /// Unencoded parameter value, e.g. `urn:sys|123`
    pub fn raw_value(&self) -> &str {
        &self.raw_value
    }

    /// `<parameter>=<encoded value>`
    pub fn query_string(&self) -> String {
        format!("{}={}", self.parameter, form_encode(&self.raw_value))
    }

    /// `<ResourceType>?<parameter>=<encoded value>`, relative to the server base
    pub fn relative_url(&self) -> String {
        format!("{}?{}", self.resource_type, self.query_string())
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_url())
    }
}

/// Identifier resolution algorithm
pub struct IdentifierResolver;

impl IdentifierResolver {
    /// Build the search for `identifier` on `resource_type`
    pub fn search_query(
        resource_type: ResourceType,
        identifier: &Identifier,
    ) -> Result<SearchQuery, ResolveError> {
        let value = identifier.value.as_str();

        let (parameter, raw_value) = match IdentifierShape::of(identifier)? {
            IdentifierShape::ValueOnly => (IDENTIFIER_PARAM, value.to_string()),
            IdentifierShape::SystemAndValue => (
                IDENTIFIER_PARAM,
                format!("{}|{}", identifier.system().unwrap_or_default(), value),
            ),
            IdentifierShape::SystemCodeAndValue => (
                IDENTIFIER_OF_TYPE_PARAM,
                format!(
                    "{}|{}|{}",
                    identifier.system().unwrap_or_default(),
                    identifier.type_code().unwrap_or_default(),
                    value
                ),
            ),
        };

        Ok(SearchQuery {
            resource_type,
            parameter,
            raw_value,
        })
    }

    /// First resource of `resource_type` in the bundle, ignoring other types
    pub fn first_of_type(bundle: Option<&Bundle>, resource_type: ResourceType) -> Option<Value> {
        bundle?.resources_of_type(resource_type).next().cloned()
    }
}

fn form_encode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}
