//! Element tree transformer
//!
//! Builds a typed tree from a flattened element sequence and back. Sliceable
//! elements (repeating, choice, re-sliced) become container nodes whose first
//! child is a `HeadSlice` carrying the template definition; named slices
//! attach to the container after it. Only definition-bearing kinds emit an
//! element on flatten, so `from_tree(to_tree(e)) == e` for any legal sequence.
//!
//! The tree is an arena: nodes live in a flat vector and children are index
//! lists, which makes slice synthesis a subrange clone instead of a deep
//! graph copy.

use crate::error::{Error, Result};
use crate::paths;
use anvil_models::Element;
use std::collections::HashMap;

/// Kind of a tree node. Classification order is semantic: choice beats
/// re-slice beats slice beats array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Array,
    Poly,
    Slice,
    Resliced,
    HeadSlice,
}

impl NodeKind {
    /// Containers that hold a head-slice plus named slices.
    pub fn is_sliceable(&self) -> bool {
        matches!(self, NodeKind::Array | NodeKind::Poly | NodeKind::Resliced)
    }

    /// Kinds that contribute an element on flatten.
    pub fn emits_definition(&self) -> bool {
        matches!(self, NodeKind::Element | NodeKind::Slice | NodeKind::HeadSlice)
    }
}

/// Classify one element.
pub fn classify(element: &Element) -> NodeKind {
    if element.id_or_path().ends_with("[x]") {
        return NodeKind::Poly;
    }
    if element.slice_name.is_some() && element.slicing.is_some() {
        return NodeKind::Resliced;
    }
    if element.slice_name.is_some() {
        return NodeKind::Slice;
    }
    if base_max_is_multiple(element) {
        return NodeKind::Array;
    }
    NodeKind::Element
}

fn base_max_is_multiple(element: &Element) -> bool {
    element
        .base
        .as_ref()
        .and_then(|base| base.max.as_deref())
        .map(|max| max == "*" || max.parse::<u32>().map(|n| n > 1).unwrap_or(false))
        .unwrap_or(false)
}

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub path: String,
    pub kind: NodeKind,
    /// Present on `Element`, `Slice`, `HeadSlice`; absent on containers.
    pub definition: Option<Element>,
    pub slice_name: Option<String>,
    pub children: Vec<NodeId>,
}

/// How to treat the first element of a sequence when building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootMode {
    /// Profile root: forced kind `Element` regardless of classification.
    Element,
    /// Slab root: classified normally, containers synthesised as usual.
    Classified,
    /// Template root: the node itself holds the definition and children
    /// attach directly under it (expansion targets, slice synthesis).
    HeadSlice,
}

#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    index: HashMap<String, NodeId>,
}

impl Tree {
    /// Build a tree from a full snapshot sequence; the first element is the
    /// root. Fails with `parent-not-found` when an element references a
    /// parent id that has not been materialised yet.
    pub fn to_tree(elements: &[Element]) -> Result<Tree> {
        Tree::build(elements, RootMode::Element)
    }

    pub fn build(elements: &[Element], mode: RootMode) -> Result<Tree> {
        let first = elements.first().ok_or_else(|| {
            Error::Model(anvil_models::Error::InvalidResource(
                "cannot build a tree from an empty element sequence".to_string(),
            ))
        })?;

        let mut tree = Tree {
            nodes: Vec::with_capacity(elements.len()),
            root: 0,
            index: HashMap::new(),
        };

        tree.root = match mode {
            RootMode::Element => tree.add_plain(first.clone(), NodeKind::Element),
            RootMode::HeadSlice => tree.add_plain(first.clone(), NodeKind::HeadSlice),
            RootMode::Classified => {
                let kind = classify(first);
                tree.add_for_kind(first.clone(), kind)?
            }
        };

        for element in &elements[1..] {
            tree.attach(element.clone())?;
        }
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn get(&self, element_id: &str) -> Option<NodeId> {
        self.index.get(element_id).copied()
    }

    /// The head-slice child of a sliceable container.
    pub fn head_slice_of(&self, container: NodeId) -> Option<NodeId> {
        self.nodes[container]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].kind == NodeKind::HeadSlice)
    }

    /// Ordered flatten of the whole tree.
    pub fn flatten(&self) -> Result<Vec<Element>> {
        self.flatten_node(self.root)
    }

    /// Ordered flatten of one subtree.
    pub fn flatten_node(&self, node: NodeId) -> Result<Vec<Element>> {
        let mut out = Vec::new();
        self.collect(node, &mut out)?;
        Ok(out)
    }

    fn collect(&self, node_id: NodeId, out: &mut Vec<Element>) -> Result<()> {
        let node = &self.nodes[node_id];
        if node.kind.emits_definition() {
            let definition = node.definition.clone().ok_or_else(|| Error::MissingDefinition {
                id: node.id.clone(),
            })?;
            out.push(definition);
        }
        for &child in &node.children {
            self.collect(child, out)?;
        }
        Ok(())
    }

    /// Node-level prefix rewrite: flatten the subtree, retarget id and path
    /// prefixes, and rebuild it under the given root mode.
    pub fn rewrite_subtree(
        &self,
        node: NodeId,
        new_prefix: &str,
        old_prefix: &str,
        mode: RootMode,
    ) -> Result<Tree> {
        let flat = self.flatten_node(node)?;
        let rewritten = paths::rewrite_prefix(&flat, new_prefix, old_prefix);
        Tree::build(&rewritten, mode)
    }

    /// Merge another tree's arena into this one and hand the sub-root's
    /// children to `target` (expansion).
    pub fn adopt_children(&mut self, target: NodeId, sub: Tree) {
        let sub_root = self.adopt(sub);
        let children = std::mem::take(&mut self.nodes[sub_root].children);
        self.nodes[target].children = children;
    }

    /// Merge another tree's arena into this one and append its root as a new
    /// child of `target` (slice synthesis).
    pub fn adopt_as_child(&mut self, target: NodeId, sub: Tree) -> NodeId {
        let sub_root = self.adopt(sub);
        self.nodes[target].children.push(sub_root);
        sub_root
    }

    fn adopt(&mut self, sub: Tree) -> NodeId {
        let offset = self.nodes.len();
        let sub_root = sub.root + offset;
        for mut node in sub.nodes {
            for child in &mut node.children {
                *child += offset;
            }
            self.nodes.push(node);
        }
        for (id, node_id) in sub.index {
            self.index.entry(id).or_insert(node_id + offset);
        }
        sub_root
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    fn add_plain(&mut self, element: Element, kind: NodeKind) -> NodeId {
        let id = element.id_or_path().to_string();
        let path = element.path.clone();
        let slice_name = element.slice_name.clone();
        let node = self.push(Node {
            id: id.clone(),
            path,
            kind,
            definition: Some(element),
            slice_name,
            children: Vec::new(),
        });
        self.index.insert(id, node);
        node
    }

    /// Create node(s) for an element: sliceable kinds become a container with
    /// a head-slice child carrying the definition; the container is the
    /// addressable node.
    fn add_for_kind(&mut self, element: Element, kind: NodeKind) -> Result<NodeId> {
        if !kind.is_sliceable() {
            return Ok(self.add_plain(element, kind));
        }

        let id = element.id_or_path().to_string();
        let path = element.path.clone();
        let slice_name = element.slice_name.clone();
        let head = self.push(Node {
            id: id.clone(),
            path: path.clone(),
            kind: NodeKind::HeadSlice,
            definition: Some(element),
            slice_name: None,
            children: Vec::new(),
        });
        let container = self.push(Node {
            id: id.clone(),
            path,
            kind,
            definition: None,
            slice_name,
            children: vec![head],
        });
        self.index.insert(id, container);
        Ok(container)
    }

    fn attach(&mut self, element: Element) -> Result<()> {
        let id = element.id_or_path().to_string();
        let Some((parent_key, slice_attach)) = paths::parent_id(&id) else {
            return Err(Error::ParentNotFound { id });
        };
        let parent = *self
            .index
            .get(&parent_key)
            .ok_or_else(|| Error::ParentNotFound { id: id.clone() })?;

        if slice_attach {
            // Slicing and polymorphism colliding on one segment is malformed.
            if id.ends_with("[x]") {
                return Err(Error::IllegalChild {
                    parent: parent_key,
                    segment: paths::last_segment(&id).to_string(),
                });
            }
            if !self.nodes[parent].kind.is_sliceable() {
                return Err(Error::ParentNotFound { id });
            }
            let mut element = element;
            if element.slice_name.is_none() {
                element.slice_name = paths::last_segment(&id)
                    .rsplit(':')
                    .next()
                    .map(str::to_string);
            }
            let kind = if element.slicing.is_some() {
                NodeKind::Resliced
            } else {
                NodeKind::Slice
            };
            let child = self.add_for_kind(element, kind)?;
            self.nodes[parent].children.push(child);
        } else {
            let target = if self.nodes[parent].kind.is_sliceable() {
                self.head_slice_of(parent)
                    .ok_or_else(|| Error::ParentNotFound { id: id.clone() })?
            } else {
                parent
            };
            let kind = classify(&element);
            let child = self.add_for_kind(element, kind)?;
            self.nodes[target].children.push(child);
        }
        Ok(())
    }
}
