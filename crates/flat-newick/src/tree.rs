use std::str::FromStr;

use crate::{Error, Result, parser};

/// A node of a [`FlatTree`]: an optional label, an optional length of the branch above it,
/// annotations and arena links.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatNode {
    pub(crate) label: Option<String>,
    pub(crate) length: Option<f64>,
    pub(crate) annotations: Vec<(String, String)>,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
}

impl FlatNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_length(mut self, length: f64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.push((key.into(), value.into()));
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn length(&self) -> Option<f64> {
        self.length
    }

    pub fn annotations(&self) -> &[(String, String)] {
        &self.annotations
    }

    /// Value of the first annotation named `key`.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A rooted tree of [`FlatNode`]s stored in an arena.
///
/// The root is always at index 0 and a node is always stored after its parent, so iterating the
/// arena in index order visits parents before children.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatTree {
    nodes: Vec<FlatNode>,
}

impl FlatTree {
    /// Create a tree containing only `root`.
    ///
    /// Any links already set on `root` are discarded.
    pub fn new(mut root: FlatNode) -> Self {
        root.parent = None;
        root.children.clear();
        Self { nodes: vec![root] }
    }

    /// Parse a single tree terminated by `;`.
    pub fn parse(input: &str) -> Result<Self> {
        parser::parse(input)
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false, a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &FlatNode {
        &self.nodes[index]
    }

    pub(crate) fn node_mut(&mut self, index: usize) -> &mut FlatNode {
        &mut self.nodes[index]
    }

    pub fn nodes(&self) -> &[FlatNode] {
        &self.nodes
    }

    /// Append `node` as the last child of `parent` and return its index.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is out of bounds.
    pub fn add_child(&mut self, parent: usize, mut node: FlatNode) -> usize {
        assert!(parent < self.nodes.len(), "Parent {parent} is not in the tree");
        let index = self.nodes.len();
        node.parent = Some(parent);
        node.children.clear();
        self.nodes.push(node);
        self.nodes[parent].children.push(index);
        index
    }

    /// Indices of all leaves in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_leaf())
            .map(|(i, _)| i)
    }

    /// Distance of every node from the root, missing lengths counting as zero.
    ///
    /// The length of the root itself is ignored.
    pub fn depths(&self) -> Vec<f64> {
        let mut depths = vec![0.0; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate().skip(1) {
            // Parents are stored before their children
            if let Some(parent) = node.parent {
                depths[i] = depths[parent] + node.length.unwrap_or(0.0);
            }
        }
        depths
    }

    pub fn to_newick(&self) -> String {
        self.to_string()
    }
}

impl FromStr for FlatTree {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
