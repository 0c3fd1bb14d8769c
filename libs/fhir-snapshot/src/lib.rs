//! FHIR StructureDefinition snapshot derivation
//!
//! This crate computes the fully-expanded form of a profile (its snapshot)
//! from its compact differential, by materialising every element the profile
//! claims or inherits on top of its parent's snapshot.
//!
//! # Example
//!
//! ```rust,no_run
//! use anvil_snapshot::{EngineConfig, SnapshotEngine};
//! use anvil_package::PackageRef;
//!
//! # async fn example() -> anvil_snapshot::Result<()> {
//! let engine = SnapshotEngine::create(EngineConfig {
//!     context: vec![PackageRef::parse("de.basisprofil.r4#1.5.4")],
//!     cache_path: ".fhir/packages".into(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let snapshot = engine.get_snapshot("ext-hearing-loss", None).await?;
//! # let _ = snapshot;
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod choice;
pub mod core_package;
pub mod engine;
pub mod error;
pub mod expander;
pub mod fetcher;
pub mod generator;
pub mod inheritance;
pub mod logging;
pub mod merge;
pub mod normalization;
pub mod paths;
pub mod release;
pub mod tree;

pub use apply::apply_differential;
pub use engine::{EngineConfig, SnapshotEngine};
pub use error::{Error, Result};
pub use fetcher::{DefinitionFetcher, SnapshotFetchFn};
pub use generator::generate_profile_snapshot;
pub use logging::{Logger, TracingLogger};
pub use merge::merge_element;
pub use release::FhirRelease;
pub use tree::{classify, NodeKind, Tree};

pub use anvil_cache::CacheMode;
pub use anvil_models::{Element, Snapshot, StructureDefinition};
pub use anvil_package::{PackageExplorer, PackageRef};
