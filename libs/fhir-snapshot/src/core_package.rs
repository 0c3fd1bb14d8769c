//! Base-library package resolution
//!
//! Picks the core type library a profile's package resolves its types
//! against: the package itself if it is a base library, else a unique base
//! library among its direct dependencies, else the release declared in its
//! manifest, else the engine's configured default.

use crate::logging::Logger;
use crate::release::FhirRelease;
use anvil_package::{PackageExplorer, PackageRef};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

static BASE_LIBRARY_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^hl7\.fhir\.r\d+[a-z]?\.core$").expect("valid package id pattern"));

/// Whether a package id names a base type library.
pub fn is_base_library(id: &str) -> bool {
    id == "hl7.fhir.core" || BASE_LIBRARY_ID.is_match(id)
}

/// Correct the historical misnumbering of the R4 core package.
pub fn normalize_core_package(mut package: PackageRef) -> PackageRef {
    if package.id == "hl7.fhir.r4.core" && package.version == "4.0.0" {
        package.version = "4.0.1".to_string();
    }
    package
}

/// Per-engine resolver with its own memo map.
pub struct CorePackageResolver {
    default_release: FhirRelease,
    explorer: Arc<dyn PackageExplorer>,
    memo: Mutex<HashMap<PackageRef, PackageRef>>,
}

impl CorePackageResolver {
    pub fn new(default_release: FhirRelease, explorer: Arc<dyn PackageExplorer>) -> Self {
        Self {
            default_release,
            explorer,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// The base library to use for type lookups on behalf of `package`.
    pub fn resolve(&self, package: &PackageRef, logger: &dyn Logger) -> PackageRef {
        if let Some(hit) = self
            .memo
            .lock()
            .ok()
            .and_then(|memo| memo.get(package).cloned())
        {
            return hit;
        }

        let resolved = self.compute(package, logger);
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(package.clone(), resolved.clone());
        }
        resolved
    }

    fn compute(&self, package: &PackageRef, logger: &dyn Logger) -> PackageRef {
        if is_base_library(&package.id) {
            return normalize_core_package(package.clone());
        }

        let candidates: Vec<PackageRef> = self
            .explorer
            .direct_dependencies(package)
            .into_iter()
            .filter(|dep| is_base_library(&dep.id))
            .collect();

        match candidates.as_slice() {
            [only] => return normalize_core_package(only.clone()),
            [] => {}
            many => {
                logger.warn(&format!(
                    "package {} depends on {} base libraries; using the default {}",
                    package,
                    many.len(),
                    self.default_release.core_package()
                ));
                return self.default_release.core_package();
            }
        }

        if let Some(manifest) = self.explorer.package_manifest(package) {
            for version in &manifest.fhir_versions {
                if let Ok(release) = FhirRelease::parse(version) {
                    debug!(package = %package, release = release.short_name(), "core library from manifest fhirVersions");
                    return release.core_package();
                }
            }
        }

        debug!(package = %package, "no base library found; using engine default");
        self.default_release.core_package()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_base_library_ids() {
        assert!(is_base_library("hl7.fhir.r4.core"));
        assert!(is_base_library("hl7.fhir.r4b.core"));
        assert!(is_base_library("hl7.fhir.r5.core"));
        assert!(is_base_library("hl7.fhir.core"));
        assert!(!is_base_library("hl7.fhir.us.core"));
        assert!(!is_base_library("de.basisprofil.r4"));
    }

    #[test]
    fn normalizes_misnumbered_r4_core() {
        let normalized =
            normalize_core_package(PackageRef::new("hl7.fhir.r4.core", "4.0.0"));
        assert_eq!(normalized.version, "4.0.1");

        let untouched =
            normalize_core_package(PackageRef::new("hl7.fhir.r3.core", "3.0.2"));
        assert_eq!(untouched.version, "3.0.2");
    }
}
