use thiserror::Error;

use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found")]
    NotFound,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("registry '{0}' is not configured")]
    UnknownRegistry(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),
}

pub type Result<T> = std::result::Result<T, Error>;
