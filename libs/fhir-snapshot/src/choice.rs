//! Choice-type shortcut resolution
//!
//! A differential may address a choice element through a type-specific alias
//! (`Observation.valueQuantity` for `Observation.value[x]`). The shortcut is
//! resolved against the declared types of the choice element's head-slice;
//! the alias for a type is the choice base with the capitalised type code
//! appended.

use crate::paths::{capitalize_first, last_segment};
use crate::tree::{NodeId, NodeKind, Tree};
use anvil_models::ElementType;

/// A resolved type alias on a choice element.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceShortcut {
    /// The canonical segment (`value[x]`) the alias stands for.
    pub segment: String,
    /// Full id of the choice element.
    pub canonical_id: String,
    /// Full path of the choice element.
    pub canonical_path: String,
    /// The type the alias selects.
    pub type_code: String,
}

/// Scan `parent`'s children for a choice element one of whose type aliases
/// matches the missing segment name.
pub fn resolve_shortcut(tree: &Tree, parent: NodeId, missing: &str) -> Option<ChoiceShortcut> {
    for &child in &tree.node(parent).children {
        let node = tree.node(child);
        if node.kind != NodeKind::Poly {
            continue;
        }
        let Some(base) = last_segment(&node.id).strip_suffix("[x]") else {
            continue;
        };
        if !missing.starts_with(base) {
            continue;
        }
        let Some(head) = tree.head_slice_of(child) else {
            continue;
        };
        let Some(types) = tree
            .node(head)
            .definition
            .as_ref()
            .and_then(|d| d.types.as_ref())
        else {
            continue;
        };
        for declared in types {
            if type_alias(base, &declared.code) == missing {
                return Some(ChoiceShortcut {
                    segment: format!("{}[x]", base),
                    canonical_id: node.id.clone(),
                    canonical_path: node.path.clone(),
                    type_code: declared.code.clone(),
                });
            }
        }
    }
    None
}

/// The alias a choice element answers to when it declares exactly one type
/// (`value[x]` with only `Quantity` → `valueQuantity`).
pub fn single_type_alias(segment_name: &str, types: &[ElementType]) -> Option<String> {
    let [only] = types else {
        return None;
    };
    let base = segment_name.strip_suffix("[x]")?;
    Some(type_alias(base, &only.code))
}

fn type_alias(base: &str, type_code: &str) -> String {
    format!("{}{}", base, capitalize_first(type_code))
}
