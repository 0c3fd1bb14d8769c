//! StructureDefinition model
//!
//! A typed view over the fields the engine dispatches on; the remainder of the
//! resource is preserved in `extra` so generated snapshots are a deep copy of
//! the source profile with `snapshot.element` replaced.

use crate::element::Element;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DERIVATION_SPECIALIZATION: &str = "specialization";
pub const DERIVATION_CONSTRAINT: &str = "constraint";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinition {
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,

    /// `specialization` for base types, `constraint` for profiles. Kept as a
    /// plain string so unknown values survive until dispatch rejects them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub differential: Option<Differential>,

    /// Base-library package used for type resolution, attached by the engine.
    #[serde(rename = "__core_package", skip_serializing_if = "Option::is_none")]
    pub core_package: Option<CorePackage>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The fully-expanded element sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Snapshot {
    pub element: Vec<Element>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The ordered element deltas contributed by a profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Differential {
    pub element: Vec<Element>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Identifies the base-library package a snapshot was generated against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorePackage {
    pub id: String,
    pub version: String,
}

impl StructureDefinition {
    /// Parse from a JSON value, requiring `resourceType == "StructureDefinition"`.
    pub fn from_value(value: Value) -> Result<Self> {
        let sd: StructureDefinition = serde_json::from_value(value)?;
        if sd.resource_type != "StructureDefinition" {
            return Err(Error::InvalidResource(format!(
                "expected StructureDefinition, got {}",
                sd.resource_type
            )));
        }
        Ok(sd)
    }

    pub fn is_specialization(&self) -> bool {
        match self.derivation.as_deref() {
            None => true,
            Some(d) => d == DERIVATION_SPECIALIZATION,
        }
    }

    pub fn is_constraint(&self) -> bool {
        self.derivation.as_deref() == Some(DERIVATION_CONSTRAINT)
    }

    /// Elements of the stored snapshot, if any.
    pub fn snapshot_elements(&self) -> Option<&[Element]> {
        self.snapshot.as_ref().map(|s| s.element.as_slice())
    }
}

impl Snapshot {
    pub fn new(element: Vec<Element>) -> Self {
        Self {
            element,
            extra: Map::new(),
        }
    }

    /// Get an element by id (falling back to path when ids are absent)
    pub fn get_element(&self, id: &str) -> Option<&Element> {
        self.element.iter().find(|e| e.id_or_path() == id)
    }
}
