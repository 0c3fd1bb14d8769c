//! Error types for snapshot derivation
//!
//! Each variant maps to a stable error kind exposed through [`Error::kind`],
//! so callers and logs can dispatch without matching on message text.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not resolve '{identifier}': {attempts}")]
    NotFound { identifier: String, attempts: String },

    #[error("profile {url} has no baseDefinition")]
    NoBaseDefinition { url: String },

    #[error("no snapshot available for {what}")]
    NoSnapshot { what: String },

    #[error("profile {url} has an empty differential")]
    NoDifferential { url: String },

    #[error("cannot expand element {id}: {reason}")]
    CannotExpand { id: String, reason: String },

    #[error("parent of element {id} not found in tree")]
    ParentNotFound { id: String },

    #[error("'{segment}' is not a legal child of {parent}")]
    IllegalChild { parent: String, segment: String },

    #[error("merge invoked with mismatched ids: base {base}, diff {diff}")]
    IdMismatch { base: String, diff: String },

    #[error("differential id '{id}' does not share the root of its base ({root})")]
    RootMismatch { id: String, root: String },

    #[error("{url} has unsupported derivation '{derivation}'")]
    UnsupportedDerivation { url: String, derivation: String },

    #[error("unknown FHIR version '{0}'")]
    VersionUnknown(String),

    #[error("node {id} carries no definition on flatten")]
    MissingDefinition { id: String },

    #[error("cyclic snapshot dependency through {url}")]
    Cycle { url: String },

    #[error("package error: {0}")]
    Package(#[from] anvil_package::PackageError),

    #[error("cache error: {0}")]
    Cache(#[from] anvil_cache::CacheError),

    #[error("model error: {0}")]
    Model(#[from] anvil_models::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable identifier for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not-found",
            Error::NoBaseDefinition { .. } => "no-base-definition",
            Error::NoSnapshot { .. } => "no-snapshot",
            Error::NoDifferential { .. } => "no-differential",
            Error::CannotExpand { .. } => "cannot-expand",
            Error::ParentNotFound { .. } => "parent-not-found",
            Error::IllegalChild { .. } => "illegal-child",
            Error::IdMismatch { .. } => "id-mismatch",
            Error::RootMismatch { .. } => "root-mismatch",
            Error::UnsupportedDerivation { .. } => "unsupported-derivation",
            Error::VersionUnknown(_) => "version-unknown",
            Error::MissingDefinition { .. } => "missing-definition",
            Error::Cycle { .. } => "cycle",
            Error::Package(_) => "package",
            Error::Cache(_) => "cache",
            Error::Model(_) => "model",
            Error::Json(_) => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let e = Error::NotFound {
            identifier: "x".to_string(),
            attempts: "".to_string(),
        };
        assert_eq!(e.kind(), "not-found");

        let e = Error::VersionUnknown("9.9".to_string());
        assert_eq!(e.kind(), "version-unknown");
    }
}
