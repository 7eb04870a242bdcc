//! Client error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Client for {0} is not initialised")]
    NotInitialised(String),

    #[error("Invalid client settings: {0}")]
    InvalidSettings(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] ResolveError),

    #[error("Client for {expected} cannot serve {actual}")]
    ResourceTypeMismatch { expected: String, actual: String },

    #[error("Backend returned error: {status} - {message}")]
    Backend { status: u16, message: String },

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Reasons an identifier cannot be turned into a search
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("identifier value is empty")]
    EmptyValue,

    #[error("identifier has a type code but no system")]
    CodeWithoutSystem,

    #[error("reference carries no identifier")]
    MissingIdentifier,

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
}
