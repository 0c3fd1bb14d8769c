//! Differential application
//!
//! Applies a profile's differential entries, in source order, onto a migrated
//! base snapshot. Entries addressing ids that do not exist yet trigger branch
//! materialisation; aliases recorded by earlier entries rewrite later ones,
//! which makes entry order observable and deterministic.

use crate::error::{Error, Result};
use crate::expander::{ensure_branch, AliasMap};
use crate::fetcher::DefinitionFetcher;
use crate::logging::Logger;
use crate::merge::merge_element;
use anvil_models::Element;

/// Apply `diffs` onto `elements`, returning the new sequence.
pub async fn apply_differential(
    mut elements: Vec<Element>,
    diffs: &[Element],
    fetcher: &DefinitionFetcher,
    logger: &dyn Logger,
) -> Result<Vec<Element>> {
    // The root's extensions belong to the base resource, not the profile.
    if let Some(root) = elements.first_mut() {
        root.extension = None;
    }

    let mut aliases = AliasMap::new();
    for diff in diffs {
        let diff_id = diff.id_or_path().to_string();
        if !elements.iter().any(|e| e.id_or_path() == diff_id) {
            ensure_branch(&mut elements, &diff_id, fetcher, logger, &mut aliases).await?;
        }

        let mut entry = diff.clone();
        aliases.rewrite_entry(&mut entry);
        let target_id = entry.id_or_path().to_string();

        let target = elements
            .iter_mut()
            .find(|e| e.id_or_path() == target_id)
            .ok_or_else(|| Error::IllegalChild {
                parent: target_id.clone(),
                segment: diff_id.clone(),
            })?;
        merge_element(target, &entry)?;
    }

    Ok(elements)
}
