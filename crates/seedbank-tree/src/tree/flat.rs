//! Conversion from and to flattened trees, where each change of deme is written as a node with a
//! single child.

use flat_newick::{FlatNode, FlatTree};

use super::{
    NodeId, SeedbankTree,
    node::{SeedbankNode, TypeChange},
};
use crate::{
    Deme,
    error::{Error, Result},
};

impl SeedbankTree {
    /// Parse a Newick string whose nodes carry their deme in the `type_key` annotation.
    pub fn from_newick(newick: &str, type_key: &str) -> Result<Self> {
        let flat = FlatTree::parse(newick)?;
        Self::from_flat(&flat, type_key)
    }

    /// Build a tree from its flattened form.
    ///
    /// Heights are measured back from the deepest node. Leaves get ids in the order they are
    /// met, internal nodes are numbered in post-order after them. A single-child node at height
    /// `h` annotated with deme `X` becomes the change `(X, h)` on the branch of the first binary
    /// node or leaf below it. Changes above the root are dropped.
    pub fn from_flat(flat: &FlatTree, type_key: &str) -> Result<Self> {
        let depths = flat.depths();
        let max_depth = depths.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let leaf_count = flat.leaves().count();

        let mut builder = Builder {
            flat,
            type_key,
            heights: depths.iter().map(|d| max_depth - d).collect(),
            nodes: vec![SeedbankNode::new(0.0, Deme::Active); 2 * leaf_count - 1],
            next_leaf: 0,
            next_internal: leaf_count,
        };
        let root = builder.build(flat.root())?;
        let mut nodes = builder.nodes;
        nodes[root].clear_changes();

        Ok(Self::from_arena(nodes, root, leaf_count))
    }

    /// Write the tree in flattened form, each change becoming a single-child node annotated with
    /// the deme entered.
    pub fn to_flat(&self, type_key: &str) -> FlatTree {
        let root = self.root_node();
        let mut flat = FlatTree::new(flat_node(root, type_key).with_length(0.0));
        for child in self.children(self.root) {
            self.write_branch(&mut flat, 0, child, type_key);
        }
        flat
    }

    pub fn to_newick(&self, type_key: &str) -> String {
        self.to_flat(type_key).to_newick()
    }

    fn write_branch(&self, flat: &mut FlatTree, mut parent: usize, id: NodeId, type_key: &str) {
        let node = &self.nodes[id];
        let mut top = self.parent_height(id).unwrap_or(node.height);

        for change in node.changes.iter().rev() {
            let wrapper = FlatNode::new()
                .with_annotation(type_key, change.deme.to_string())
                .with_length(top - change.time);
            parent = flat.add_child(parent, wrapper);
            top = change.time;
        }

        let index = flat.add_child(
            parent,
            flat_node(node, type_key).with_length(top - node.height),
        );
        for child in node.children() {
            self.write_branch(flat, index, child, type_key);
        }
    }
}

fn flat_node(node: &SeedbankNode, type_key: &str) -> FlatNode {
    let flat = match node.label() {
        Some(label) => FlatNode::new().with_label(label),
        None => FlatNode::new(),
    };
    flat.with_annotation(type_key, node.node_type.to_string())
}

struct Builder<'a> {
    flat: &'a FlatTree,
    type_key: &'a str,
    heights: Vec<f64>,
    nodes: Vec<SeedbankNode>,
    next_leaf: NodeId,
    next_internal: NodeId,
}

impl Builder<'_> {
    /// Build the subtree below `index` and return the id of its top binary node or leaf.
    fn build(&mut self, index: usize) -> Result<NodeId> {
        let tree = self.flat;
        let flat = tree.node(index);
        let height = self.heights[index];

        match flat.children() {
            [] => {
                let id = self.next_leaf;
                self.next_leaf += 1;
                let mut node = SeedbankNode::new(height, self.deme(index)?);
                node.label = flat.label().map(str::to_owned);
                self.nodes[id] = node;
                Ok(id)
            }
            &[child] => {
                let id = self.build(child)?;
                let deme = self.deme(index)?;
                self.nodes[id].changes.push(TypeChange::new(deme, height));
                Ok(id)
            }
            &[left, right] => {
                let left = self.build(left)?;
                let right = self.build(right)?;
                let id = self.next_internal;
                self.next_internal += 1;

                let mut node = SeedbankNode::new(height, self.deme(index)?);
                node.label = flat.label().map(str::to_owned);
                node.children.add_child(left);
                node.children.add_child(right);
                self.nodes[id] = node;
                self.nodes[left].parent = Some(id);
                self.nodes[right].parent = Some(id);
                Ok(id)
            }
            children => Err(Error::NonBinaryNode {
                node: self.name(index),
                children: children.len(),
            }),
        }
    }

    fn deme(&self, index: usize) -> Result<Deme> {
        match self.flat.node(index).annotation(self.type_key) {
            Some(value) => value.parse(),
            None => Err(Error::MissingAnnotation {
                node: self.name(index),
                key: self.type_key.to_owned(),
            }),
        }
    }

    fn name(&self, index: usize) -> String {
        match self.flat.node(index).label() {
            Some(label) => label.to_owned(),
            None => format!("#{index}"),
        }
    }
}
