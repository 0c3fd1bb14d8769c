//! Data model for FHIR StructureDefinition snapshots and differentials.
//!
//! The engine interprets a fixed set of ElementDefinition fields (cardinality,
//! typing, slicing, constraints); everything else is carried opaquely in a
//! flattened map so resources round-trip without loss.

pub mod element;
pub mod error;
pub mod structure_definition;

pub use element::{
    Discriminator, DiscriminatorType, Element, ElementBase, ElementBinding, ElementConstraint,
    ElementMapping, ElementSlicing, ElementType, Extension, SlicingRules,
};
pub use error::{Error, Result};
pub use structure_definition::{
    CorePackage, Differential, Snapshot, StructureDefinition, DERIVATION_CONSTRAINT,
    DERIVATION_SPECIALIZATION,
};
