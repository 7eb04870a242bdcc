//! FHIR Store Backend Client
//!
//! This crate provides the per-resource-type client used to talk to a
//! FHIR server, along with the identifier resolution that turns a
//! partial identifier into a single search query.

pub mod client;
pub mod error;
pub mod model;
pub mod resolver;
pub mod resource_type;

pub use client::{
    API_KEY_HEADER_NAME, ClientSettings, DEFAULT_API_KEY_PROPERTY_NAME, DeleteOutcome,
    FoundResource, MethodOutcome, ResourceClient,
};
pub use error::{ClientError, ResolveError};
pub use model::{
    Bundle, CodeableConcept, Coding, FhirIdentifier, FhirReference, Identifier, ResourceReference,
};
pub use resolver::{IdentifierResolver, IdentifierShape, SearchQuery};
pub use resource_type::{ParseResourceTypeError, ResourceType, ResourceTypeSet};
