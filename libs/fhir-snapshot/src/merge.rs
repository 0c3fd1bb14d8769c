//! Single-element differential merge
//!
//! Merges one differential entry into its base element. Most fields follow
//! overwrite semantics; `constraint` accumulates, `condition` and `mapping`
//! take an ordered set union, and `id`/`path` always stay the base's.

use crate::error::{Error, Result};
use anvil_models::Element;

/// Merge `diff` into `base`. Pre-condition: both address the same element id.
pub fn merge_element(base: &mut Element, diff: &Element) -> Result<()> {
    if base.id_or_path() != diff.id_or_path() {
        return Err(Error::IdMismatch {
            base: base.id_or_path().to_string(),
            diff: diff.id_or_path().to_string(),
        });
    }

    // constraint: concatenation, base first.
    if let Some(diff_constraints) = &diff.constraint {
        let mut merged = base.constraint.take().unwrap_or_default();
        merged.extend(diff_constraints.iter().cloned());
        base.constraint = Some(merged);
    }

    // condition: ordered set union.
    if let Some(diff_conditions) = &diff.condition {
        let mut merged = base.condition.take().unwrap_or_default();
        for condition in diff_conditions {
            if !merged.contains(condition) {
                merged.push(condition.clone());
            }
        }
        base.condition = Some(merged);
    }

    // mapping: ordered set union with key-wise equality.
    if let Some(diff_mappings) = &diff.mapping {
        let mut merged = base.mapping.take().unwrap_or_default();
        for mapping in diff_mappings {
            if !merged.contains(mapping) {
                merged.push(mapping.clone());
            }
        }
        base.mapping = Some(merged);
    }

    // id and path are retained from the base; everything else overwrites
    // when the differential carries a value.
    if diff.slice_name.is_some() {
        base.slice_name = diff.slice_name.clone();
    }
    if diff.min.is_some() {
        base.min = diff.min;
    }
    if diff.max.is_some() {
        base.max = diff.max.clone();
    }
    if diff.base.is_some() {
        base.base = diff.base.clone();
    }
    if diff.content_reference.is_some() {
        base.content_reference = diff.content_reference.clone();
    }
    if diff.types.is_some() {
        base.types = diff.types.clone();
    }
    if diff.slicing.is_some() {
        base.slicing = diff.slicing.clone();
    }
    if diff.definition.is_some() {
        base.definition = diff.definition.clone();
    }
    if diff.comment.is_some() {
        base.comment = diff.comment.clone();
    }
    if diff.requirements.is_some() {
        base.requirements = diff.requirements.clone();
    }
    if diff.meaning_when_missing.is_some() {
        base.meaning_when_missing = diff.meaning_when_missing.clone();
    }
    if diff.must_support.is_some() {
        base.must_support = diff.must_support;
    }
    if diff.binding.is_some() {
        base.binding = diff.binding.clone();
    }
    if diff.extension.is_some() {
        base.extension = diff.extension.clone();
    }
    for (key, value) in &diff.extra {
        base.extra.insert(key.clone(), value.clone());
    }

    clear_stray_slice_name(base);
    Ok(())
}

/// A merged element may end up with a `sliceName` that its id does not carry
/// (a remnant of choice-shortcut rewriting); such names are cleared.
fn clear_stray_slice_name(element: &mut Element) {
    let Some(slice_name) = element.slice_name.clone() else {
        return;
    };
    let id = element.id_or_path();
    let keeps = match id.rfind(':') {
        Some(pos) => id[pos + 1..] == slice_name,
        None => false,
    };
    if !keeps {
        element.slice_name = None;
    }
}
