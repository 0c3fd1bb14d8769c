//! Canonical models for the FHIR NPM Package specification and the
//! package-explorer interface the snapshot engine consumes.
//!
//! Provides serde-friendly representations of `package.json` manifests and
//! `.index.json` files, package reference parsing (`id`, `id#version`,
//! `id@version`), and a directory-backed [`PackageExplorer`] over the on-disk
//! package cache layout (`<cache>/<id>#<version>/package/`).

pub mod error;
pub mod explorer;

pub use error::{PackageError, PackageResult};
pub use explorer::{
    DirectoryExplorer, MetaFilter, MetaKey, PackageExplorer, ResourceMeta,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

pub type PackageName = String;
pub type Version = String;
pub type VersionReference = String;

/// A package identified by id and version. `latest` stands in for an
/// unpinned reference until the explorer resolves it against the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    pub id: PackageName,
    pub version: Version,
}

pub const LATEST: &str = "latest";

impl PackageRef {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }

    /// Parse `id`, `id#version`, or `id@version`; a bare id means latest.
    pub fn parse(reference: &str) -> Self {
        match reference.split_once(['#', '@']) {
            Some((id, version)) if !version.is_empty() => Self::new(id, version),
            _ => Self::new(reference, LATEST),
        }
    }

    /// Directory name in the package cache (`id#version`).
    pub fn dir_name(&self) -> String {
        format!("{}#{}", self.id, self.version)
    }

    pub fn is_latest(&self) -> bool {
        self.version == LATEST
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Compare versions numerically if both start with digits, otherwise
/// lexicographically. Pre-release labels are ignored.
pub fn compare_versions(v1: &str, v2: &str) -> std::cmp::Ordering {
    let base1 = v1.split('-').next().unwrap_or(v1);
    let base2 = v2.split('-').next().unwrap_or(v2);

    let is_numeric = |s: &str| s.chars().next().is_some_and(|c| c.is_ascii_digit());

    if is_numeric(base1) && is_numeric(base2) {
        compare_numeric_versions(base1, base2)
    } else {
        base1.cmp(base2)
    }
}

fn compare_numeric_versions(v1: &str, v2: &str) -> std::cmp::Ordering {
    let parts1: Vec<u32> = v1.split('.').filter_map(|p| p.parse().ok()).collect();
    let parts2: Vec<u32> = v2.split('.').filter_map(|p| p.parse().ok()).collect();

    let max_len = parts1.len().max(parts2.len());
    for i in 0..max_len {
        let p1 = parts1.get(i).copied().unwrap_or(0);
        let p2 = parts2.get(i).copied().unwrap_or(0);
        match p1.cmp(&p2) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }

    std::cmp::Ordering::Equal
}

/// Check if a version satisfies a reference (exact match, patch wildcards
/// like `1.2.x`, and label variants).
pub fn version_matches(version: &str, reference: &str) -> bool {
    if version == reference || reference == LATEST || reference.is_empty() {
        return true;
    }

    if let Some(prefix) = reference.strip_suffix(".x") {
        if let Some(suffix) = version.strip_prefix(&format!("{}.", prefix)) {
            let patch = suffix.split('-').next().unwrap_or(suffix);
            return patch.parse::<u32>().is_ok();
        }
        return false;
    }

    let base_version = version.split('-').next().unwrap_or(version);
    let base_reference = reference.split('-').next().unwrap_or(reference);
    base_version == base_reference
}

/// FHIR NPM Package manifest (`package/package.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: PackageName,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fhir_versions: Vec<String>,
    #[serde(default)]
    pub dependencies: HashMap<PackageName, VersionReference>,
    #[serde(default)]
    pub author: String,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl PackageManifest {
    /// Check if the package declares a core FHIR package dependency.
    pub fn has_core_dependency(&self) -> bool {
        self.dependencies.keys().any(|name| {
            name == "hl7.fhir.core" || (name.starts_with("hl7.fhir.r") && name.ends_with(".core"))
        })
    }
}

/// Package index (`.index.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageIndex {
    #[serde(rename = "index-version")]
    pub index_version: u8,
    pub files: Vec<IndexedFile>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// File entry in a package index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedFile {
    pub filename: String,
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Strip the UTF-8 BOM and control characters some publishers leave in
/// package files before handing the bytes to the JSON parser.
pub fn clean_json_bytes(bytes: &[u8]) -> PackageResult<String> {
    let bytes = if bytes.len() >= 3 && &bytes[..3] == b"\xEF\xBB\xBF" {
        &bytes[3..]
    } else {
        bytes
    };

    let content = String::from_utf8(bytes.to_vec())
        .map_err(|e| PackageError::InvalidStructure(format!("Invalid UTF-8: {}", e)))?;

    Ok(content
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\x7F'))
        .collect::<String>()
        .trim()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_package_references() {
        assert_eq!(
            PackageRef::parse("hl7.fhir.r4.core#4.0.1"),
            PackageRef::new("hl7.fhir.r4.core", "4.0.1")
        );
        assert_eq!(
            PackageRef::parse("hl7.fhir.r4.core@4.0.1"),
            PackageRef::new("hl7.fhir.r4.core", "4.0.1")
        );
        assert_eq!(
            PackageRef::parse("hl7.fhir.r4.core"),
            PackageRef::new("hl7.fhir.r4.core", LATEST)
        );
    }

    #[test]
    fn displays_as_at_reference() {
        let reference = PackageRef::new("de.basisprofil.r4", "1.5.4");
        assert_eq!(reference.to_string(), "de.basisprofil.r4@1.5.4");
        assert_eq!(reference.dir_name(), "de.basisprofil.r4#1.5.4");
    }

    #[test]
    fn compares_versions() {
        use std::cmp::Ordering;
        assert_eq!(compare_versions("1.2.3", "1.2.4"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.2.3", "1.2.3-ballot"), Ordering::Equal);
    }

    #[test]
    fn matches_version_references() {
        assert!(version_matches("1.2.0", "1.2.x"));
        assert!(version_matches("1.2.99", "1.2.x"));
        assert!(!version_matches("1.3.0", "1.2.x"));
        assert!(version_matches("4.0.1", "4.0.1"));
        assert!(version_matches("4.0.1", "latest"));
    }

    #[test]
    fn manifest_parses_spec_example() {
        let manifest: PackageManifest = serde_json::from_value(json!({
            "name": "hl7.fhir.us.acme",
            "version": "0.1.0",
            "canonical": "http://hl7.org/fhir/us/acme",
            "description": "ACME project IG",
            "fhirVersions": ["4.0.1"],
            "dependencies": {
                "hl7.fhir.r4.core": "4.0.1"
            },
            "author": "hl7",
            "license": "CC0-1.0"
        }))
        .unwrap();

        assert_eq!(manifest.name, "hl7.fhir.us.acme");
        assert!(manifest.has_core_dependency());
        assert_eq!(manifest.fhir_versions, vec!["4.0.1".to_string()]);
        assert_eq!(manifest.extra.get("license"), Some(&json!("CC0-1.0")));
    }

    #[test]
    fn cleans_bom_and_control_characters() {
        let bytes = b"\xEF\xBB\xBF{\"name\": \"x\"}\x00";
        let cleaned = clean_json_bytes(bytes).unwrap();
        assert_eq!(cleaned, "{\"name\": \"x\"}");
    }
}
