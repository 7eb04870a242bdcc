//! Store error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store is not running")]
    NotRunning,

    #[error("Store already started")]
    AlreadyStarted,

    #[error("Resource type not supported by this store: {0}")]
    NotSupported(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Executor rejected task: {0}")]
    ExecutorClosed(String),

    #[error("Task aborted before completion: {0}")]
    TaskAborted(String),
}
