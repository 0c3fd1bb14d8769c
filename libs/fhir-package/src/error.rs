//! Error types for package loading and metadata resolution

use thiserror::Error;

pub type PackageResult<T> = Result<T, PackageError>;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    #[error("Missing file: {0}")]
    MissingFile(String),

    #[error("Package not installed: {0}")]
    PackageNotInstalled(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),
}
