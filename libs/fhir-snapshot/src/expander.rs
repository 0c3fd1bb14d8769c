//! On-demand branch materialisation
//!
//! The working element sequence is, at every step, a valid flatten of a legal
//! tree. `ensure_branch` walks a differential id segment by segment, and for
//! each segment `ensure_child` lifts the parent's slab into a tree, expands
//! the parent from its type definition if needed, resolves choice-type
//! aliases, synthesises slices from the head-slice template, and splices the
//! slab back.

use crate::choice::{resolve_shortcut, single_type_alias};
use crate::error::{Error, Result};
use crate::fetcher::DefinitionFetcher;
use crate::logging::Logger;
use crate::merge::merge_element;
use crate::paths::{self, is_under, strip_slice_names};
use crate::tree::{NodeId, NodeKind, RootMode, Tree};
use anvil_models::{Element, ElementType};
use tracing::debug;

/// Canonical target of an aliased id.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasTarget {
    pub id: String,
    pub path: String,
}

/// Insertion-ordered, append-only map from aliased id prefixes to their
/// canonical `{id, path}`. Scoped to one diff application.
#[derive(Debug, Default)]
pub struct AliasMap {
    entries: Vec<(String, AliasTarget)>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record an alias. Earlier entries win; re-recording is a no-op.
    pub fn insert(&mut self, from: String, to: AliasTarget) {
        if self.entries.iter().any(|(existing, _)| *existing == from) {
            return;
        }
        debug!(from = %from, to = %to.id, "recording alias");
        self.entries.push((from, to));
    }

    /// Transitively resolve an id through the recorded aliases.
    pub fn resolve_id(&self, id: &str) -> String {
        self.resolve(id, |target| &target.id, false)
    }

    /// Transitively resolve a path; alias prefixes are compared slice-free.
    pub fn resolve_path(&self, path: &str) -> String {
        self.resolve(path, |target| &target.path, true)
    }

    /// Rewrite a differential entry's id and path, independently.
    pub fn rewrite_entry(&self, entry: &mut Element) {
        if let Some(id) = &entry.id {
            entry.id = Some(self.resolve_id(id));
        }
        entry.path = self.resolve_path(&entry.path);
    }

    fn resolve(&self, value: &str, pick: fn(&AliasTarget) -> &String, strip: bool) -> String {
        let mut current = value.to_string();
        // Each pass applies at most one alias; passes are bounded so a
        // malformed chain cannot loop.
        for _ in 0..=self.entries.len() {
            let mut changed = false;
            for (from, target) in &self.entries {
                let from = if strip {
                    strip_slice_names(from)
                } else {
                    from.clone()
                };
                if let Some(next) = rewrite_via(&current, &from, pick(target)) {
                    if next != current {
                        current = next;
                        changed = true;
                        break;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        current
    }
}

/// Apply one alias to a value: exact match, or a `.`/`:` boundary descendant.
fn rewrite_via(value: &str, from: &str, to: &str) -> Option<String> {
    if value == from {
        return Some(to.to_string());
    }
    let rest = value.strip_prefix(from)?;
    if rest.starts_with('.') || rest.starts_with(':') {
        return Some(format!("{}{}", to, rest));
    }
    None
}

/// Materialise the children of a node from its type definition. Containers
/// are refused (the caller picks the head-slice or a slice); an already
/// expanded node is a no-op.
pub async fn expand_node(
    tree: &mut Tree,
    node_id: NodeId,
    fetcher: &DefinitionFetcher,
) -> Result<()> {
    let node = tree.node(node_id);
    if node.kind.is_sliceable() {
        return Err(Error::CannotExpand {
            id: node.id.clone(),
            reason: "sliceable container; expand its head-slice or a slice".to_string(),
        });
    }
    if !node.children.is_empty() {
        return Ok(());
    }
    let Some(definition) = node.definition.clone() else {
        return Err(Error::CannotExpand {
            id: node.id.clone(),
            reason: "no definition".to_string(),
        });
    };
    let target_id = node.id.clone();

    let source = if let Some(reference) = definition.content_reference.clone() {
        let elements = fetcher.get_content_reference(&reference).await?;
        if let Some(def) = tree.node_mut(node_id).definition.as_mut() {
            def.content_reference = None;
        }
        elements
    } else {
        match definition.types.as_deref().unwrap_or(&[]) {
            [] => {
                return Err(Error::CannotExpand {
                    id: target_id,
                    reason: "no type and no content reference".to_string(),
                })
            }
            [single] => match single.profile.as_ref().and_then(|p| p.first()) {
                // The first profile wins; additional profiles are informational.
                Some(profile) => fetcher.get_by_url(profile).await?,
                None => fetcher.get_base_type(&single.code).await?,
            },
            // Several admissible types: only the common Element children
            // are enumerable.
            _ => fetcher.get_base_type("Element").await?,
        }
    };

    if source.len() <= 1 {
        return Ok(());
    }

    let old_prefix = source[0].id_or_path().to_string();
    let rewritten = paths::rewrite_prefix(&source, &target_id, &old_prefix);
    let sub = Tree::build(&rewritten, RootMode::HeadSlice)?;
    tree.adopt_children(node_id, sub);
    Ok(())
}

/// Ensure `segment` exists under `parent_id` in the working sequence,
/// expanding the parent and synthesising slices as needed.
pub async fn ensure_child(
    elements: &mut Vec<Element>,
    parent_id: &str,
    segment: &str,
    fetcher: &DefinitionFetcher,
    logger: &dyn Logger,
    aliases: &mut AliasMap,
) -> Result<()> {
    let start = elements
        .iter()
        .position(|e| e.id_or_path() == parent_id)
        .ok_or_else(|| Error::ParentNotFound {
            id: parent_id.to_string(),
        })?;
    let mut end = start + 1;
    while end < elements.len() && is_under(elements[end].id_or_path(), parent_id) {
        end += 1;
    }

    let mut tree = Tree::build(&elements[start..end], RootMode::Classified)?;
    let root = tree.root();
    let target = if tree.node(root).kind.is_sliceable() {
        tree.head_slice_of(root).ok_or_else(|| Error::ParentNotFound {
            id: parent_id.to_string(),
        })?
    } else {
        root
    };

    expand_node(&mut tree, target, fetcher).await?;

    let (name, slice) = match segment.split_once(':') {
        Some((name, slice)) => (name, Some(slice)),
        None => (segment, None),
    };

    let expected_child_id = format!("{}.{}", parent_id, name);
    let child = tree
        .node(target)
        .children
        .iter()
        .copied()
        .find(|&c| tree.node(c).id == expected_child_id);

    let Some(child) = child else {
        // No such child: the segment may be a type alias on a choice element.
        let Some(shortcut) = resolve_shortcut(&tree, target, name) else {
            return Err(Error::IllegalChild {
                parent: parent_id.to_string(),
                segment: segment.to_string(),
            });
        };
        debug!(alias = %expected_child_id, canonical = %shortcut.canonical_id, "choice shortcut");
        aliases.insert(
            expected_child_id,
            AliasTarget {
                id: shortcut.canonical_id.clone(),
                path: shortcut.canonical_path.clone(),
            },
        );

        let container = tree.get(&shortcut.canonical_id).and_then(|c| tree.head_slice_of(c));
        let Some(head) = container else {
            return Err(Error::IllegalChild {
                parent: parent_id.to_string(),
                segment: segment.to_string(),
            });
        };
        let virtual_diff = Element {
            id: Some(shortcut.canonical_id.clone()),
            path: shortcut.canonical_path.clone(),
            types: Some(vec![ElementType {
                code: shortcut.type_code.clone(),
                profile: None,
                target_profile: None,
                extra: Default::default(),
            }]),
            ..Default::default()
        };
        if let Some(def) = tree.node_mut(head).definition.as_mut() {
            merge_element(def, &virtual_diff)?;
        }
        return splice_back(elements, start, end, &tree);
    };

    let Some(slice) = slice else {
        return splice_back(elements, start, end, &tree);
    };

    let child_id = tree.node(child).id.clone();
    let child_path = tree.node(child).path.clone();

    if !tree.node(child).kind.is_sliceable() {
        // Upstream authoring error (a slice name on a non-repeating
        // element): tolerate by aliasing the slice onto the element.
        logger.warn(&format!(
            "'{}' is not sliceable; treating slice '{}' as the element itself",
            child_id, slice
        ));
        aliases.insert(
            format!("{}:{}", child_id, slice),
            AliasTarget {
                id: child_id,
                path: child_path,
            },
        );
        return splice_back(elements, start, end, &tree);
    }

    let existing = tree
        .node(child)
        .children
        .iter()
        .any(|&c| tree.node(c).slice_name.as_deref() == Some(slice));
    if existing {
        return splice_back(elements, start, end, &tree);
    }

    // A slice name that is really the type alias of a single-typed choice
    // element addresses the element itself.
    if name.ends_with("[x]") {
        let head_types = tree
            .head_slice_of(child)
            .and_then(|h| tree.node(h).definition.as_ref())
            .and_then(|d| d.types.clone())
            .unwrap_or_default();
        if single_type_alias(name, &head_types).as_deref() == Some(slice) {
            aliases.insert(
                format!("{}:{}", child_id, slice),
                AliasTarget {
                    id: child_id,
                    path: child_path,
                },
            );
            return splice_back(elements, start, end, &tree);
        }
    }

    // Slicing and polymorphism colliding on one segment is malformed.
    if slice.ends_with("[x]") {
        logger.error(&format!(
            "cannot slice '{}' with choice suffix '{}'",
            child_id, slice
        ));
        return Err(Error::IllegalChild {
            parent: parent_id.to_string(),
            segment: segment.to_string(),
        });
    }

    // Synthesise the slice from the head-slice template.
    let head = tree.head_slice_of(child).ok_or_else(|| Error::ParentNotFound {
        id: child_id.clone(),
    })?;
    let slice_id = format!("{}:{}", child_id, slice);
    let mut sub = tree.rewrite_subtree(head, &slice_id, &child_id, RootMode::HeadSlice)?;
    let sub_root = sub.root();
    let root_node = sub.node_mut(sub_root);
    root_node.kind = NodeKind::Slice;
    root_node.slice_name = Some(slice.to_string());
    if let Some(def) = root_node.definition.as_mut() {
        def.slicing = None;
        def.must_support = None;
        def.slice_name = Some(slice.to_string());
    }
    tree.adopt_as_child(child, sub);

    splice_back(elements, start, end, &tree)
}

/// Walk a differential id from the root, ensuring every segment exists.
/// The cursor is rewritten through the alias map before each descent; the
/// raw segment is appended after, so the next iteration resolves it against
/// the concrete tree.
pub async fn ensure_branch(
    elements: &mut Vec<Element>,
    target_id: &str,
    fetcher: &DefinitionFetcher,
    logger: &dyn Logger,
    aliases: &mut AliasMap,
) -> Result<()> {
    let root_id = elements
        .first()
        .map(|e| e.id_or_path().to_string())
        .ok_or_else(|| Error::RootMismatch {
            id: target_id.to_string(),
            root: "<empty>".to_string(),
        })?;

    let segments: Vec<&str> = target_id.split('.').collect();
    if segments.first().copied() != Some(root_id.as_str()) {
        return Err(Error::RootMismatch {
            id: target_id.to_string(),
            root: root_id,
        });
    }

    let mut cursor = root_id;
    for segment in &segments[1..] {
        let canonical = aliases.resolve_id(&cursor);
        ensure_child(elements, &canonical, segment, fetcher, logger, aliases).await?;
        cursor = format!("{}.{}", canonical, segment);
    }
    Ok(())
}

fn splice_back(elements: &mut Vec<Element>, start: usize, end: usize, tree: &Tree) -> Result<()> {
    let slab = tree.flatten()?;
    elements.splice(start..end, slab);
    Ok(())
}
