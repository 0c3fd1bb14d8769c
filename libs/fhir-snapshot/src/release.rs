//! FHIR release identification
//!
//! Maps the accepted version identifiers to a canonical short form and the
//! base-library package that supplies type definitions for that release.

use crate::error::{Error, Result};
use anvil_package::PackageRef;

/// A supported FHIR release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FhirRelease {
    Stu3,
    R4,
    R4B,
    R5,
}

impl FhirRelease {
    /// Parse any accepted version identifier (`4.0.1`, `4.0`, `R4`, …).
    /// Unknown identifiers are a fatal configuration error.
    pub fn parse(input: &str) -> Result<Self> {
        match input.to_ascii_uppercase().as_str() {
            "3.0.2" | "3.0" | "R3" | "STU3" => Ok(FhirRelease::Stu3),
            "4.0.1" | "4.0" | "R4" => Ok(FhirRelease::R4),
            "4.3.0" | "4.3" | "R4B" => Ok(FhirRelease::R4B),
            "5.0.0" | "5.0" | "R5" => Ok(FhirRelease::R5),
            _ => Err(Error::VersionUnknown(input.to_string())),
        }
    }

    /// Canonical short form.
    pub fn short_name(&self) -> &'static str {
        match self {
            FhirRelease::Stu3 => "STU3",
            FhirRelease::R4 => "R4",
            FhirRelease::R4B => "R4B",
            FhirRelease::R5 => "R5",
        }
    }

    /// The base-library package for this release.
    pub fn core_package(&self) -> PackageRef {
        match self {
            FhirRelease::Stu3 => PackageRef::new("hl7.fhir.r3.core", "3.0.2"),
            FhirRelease::R4 => PackageRef::new("hl7.fhir.r4.core", "4.0.1"),
            FhirRelease::R4B => PackageRef::new("hl7.fhir.r4b.core", "4.3.0"),
            FhirRelease::R5 => PackageRef::new("hl7.fhir.r5.core", "5.0.0"),
        }
    }
}

impl Default for FhirRelease {
    fn default() -> Self {
        FhirRelease::R4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_accepted_identifiers() {
        for input in ["3.0.2", "3.0", "R3", "STU3", "stu3"] {
            assert_eq!(FhirRelease::parse(input).unwrap(), FhirRelease::Stu3);
        }
        for input in ["4.0.1", "4.0", "R4", "r4"] {
            assert_eq!(FhirRelease::parse(input).unwrap(), FhirRelease::R4);
        }
        assert_eq!(FhirRelease::parse("4.3.0").unwrap(), FhirRelease::R4B);
        assert_eq!(FhirRelease::parse("5.0.0").unwrap(), FhirRelease::R5);
    }

    #[test]
    fn unknown_version_is_fatal() {
        let err = FhirRelease::parse("4.0.0").unwrap_err();
        assert_eq!(err.kind(), "version-unknown");
        assert!(FhirRelease::parse("R6").is_err());
    }

    #[test]
    fn core_packages_match_releases() {
        assert_eq!(
            FhirRelease::R4.core_package(),
            PackageRef::new("hl7.fhir.r4.core", "4.0.1")
        );
        assert_eq!(FhirRelease::R4B.short_name(), "R4B");
    }
}
