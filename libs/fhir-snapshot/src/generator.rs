//! Profile snapshot generation
//!
//! Fetches a profile's parent snapshot (migrated by the definition fetcher),
//! applies the profile's differential, and packages the result as a deep copy
//! of the profile with `snapshot.element` replaced and the resolved core
//! package recorded.

use crate::apply::apply_differential;
use crate::error::{Error, Result};
use crate::fetcher::DefinitionFetcher;
use crate::logging::Logger;
use crate::normalization::ensure_ids;
use anvil_models::{CorePackage, Snapshot, StructureDefinition};

pub async fn generate_profile_snapshot(
    profile: &StructureDefinition,
    fetcher: &DefinitionFetcher,
    logger: &dyn Logger,
) -> Result<StructureDefinition> {
    let url = profile
        .url
        .clone()
        .or_else(|| profile.id.clone())
        .unwrap_or_default();

    let differential = profile
        .differential
        .as_ref()
        .filter(|d| !d.element.is_empty())
        .ok_or_else(|| Error::NoDifferential { url: url.clone() })?;

    let base_url = profile
        .base_definition
        .as_ref()
        .ok_or_else(|| Error::NoBaseDefinition { url: url.clone() })?;

    let base_elements = (*fetcher.get_by_url(base_url).await?).clone();

    let mut diffs = differential.element.clone();
    ensure_ids(&mut diffs);

    let merged = apply_differential(base_elements, &diffs, fetcher, logger).await?;

    let mut out = profile.clone();
    out.snapshot = Some(Snapshot::new(merged));
    out.core_package = Some(CorePackage {
        id: fetcher.core_package().id.clone(),
        version: fetcher.core_package().version.clone(),
    });
    Ok(out)
}
