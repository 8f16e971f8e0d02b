//! The seedbank tree arena.
//!
//! Nodes are addressed by stable [`NodeId`]s: leaves occupy `0..leaf_count` and internal nodes
//! `leaf_count..2 * leaf_count - 1`. Topology edits only rewire parent and child indices, so ids
//! survive any number of proposals.

use std::ops::Range;

use crate::Deme;

mod flat;
pub mod node;
mod simulate;

pub use node::NodeId;
pub use simulate::{LeafSample, Simulator};

use node::{SeedbankNode, TypeLengths};

/// A binary genealogy whose branches carry their history of deme changes.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "bitcode", derive(bitcode::Decode, bitcode::Encode))]
pub struct SeedbankTree {
    nodes: Vec<SeedbankNode>,
    root: NodeId,
    leaf_count: usize,
    dirty: bool,
}

/// The first rule broken by an invalid tree.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum Violation {
    #[error("Node {node} is above its parent")]
    NegativeBranchLength { node: NodeId },

    #[error("Change {index} of node {node} lies outside its branch")]
    ChangeOutsideBranch { node: NodeId, index: usize },

    #[error("Change {index} of node {node} is not later than the previous one")]
    UnorderedChange { node: NodeId, index: usize },

    #[error("Change {index} of node {node} does not switch deme")]
    RedundantChange { node: NodeId, index: usize },

    #[error("Branch above node {node} ends in a different deme than its parent")]
    TypeMismatch { node: NodeId },

    #[error("Internal node {node} is dormant")]
    DormantCoalescence { node: NodeId },
}

impl SeedbankTree {
    /// Wrap an arena whose links are already consistent.
    pub(crate) fn from_arena(nodes: Vec<SeedbankNode>, root: NodeId, leaf_count: usize) -> Self {
        debug_assert_eq!(nodes.len(), 2 * leaf_count - 1);
        debug_assert!(nodes[root].parent.is_none());
        Self {
            nodes,
            root,
            leaf_count,
            dirty: true,
        }
    }

    pub fn node(&self, id: NodeId) -> &SeedbankNode {
        &self.nodes[id]
    }

    /// Mutable access to a node, marking the tree dirty.
    pub fn node_mut(&mut self, id: NodeId) -> &mut SeedbankNode {
        self.dirty = true;
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> &[SeedbankNode] {
        &self.nodes
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_node(&self) -> &SeedbankNode {
        &self.nodes[self.root]
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn internal_count(&self) -> usize {
        self.nodes.len() - self.leaf_count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaves(&self) -> Range<NodeId> {
        0..self.leaf_count
    }

    pub fn internal_nodes(&self) -> Range<NodeId> {
        self.leaf_count..self.nodes.len()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id].children()
    }

    /// The other child of the parent of `id`.
    pub fn sister(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes[id].parent?;
        self.nodes[parent].children().find(|&c| c != id)
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        id == self.root
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].is_leaf()
    }

    /// Height of the parent of `id`, `None` for the root.
    pub fn parent_height(&self, id: NodeId) -> Option<f64> {
        self.nodes[id].parent.map(|p| self.nodes[p].height)
    }

    /// Length of the branch above `id`, zero for the root.
    pub fn branch_length(&self, id: NodeId) -> f64 {
        self.parent_height(id)
            .map_or(0.0, |h| h - self.nodes[id].height)
    }

    /// Whether the tree was modified since the last [`mark_clean`](Self::mark_clean).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Overwrite this tree with `other`, reusing allocations.
    pub fn assign_from(&mut self, other: &Self) {
        self.nodes.clone_from(&other.nodes);
        self.root = other.root;
        self.leaf_count = other.leaf_count;
        self.dirty = true;
    }

    /// Detach the branch above `node` from the tree.
    ///
    /// The sister of `node` takes the place of their parent under the grandparent and inherits the
    /// changes of the parent branch. The parent is left detached holding `node` as its only child
    /// and without changes, ready for [`connect_branch`](Self::connect_branch).
    ///
    /// # Panics
    ///
    /// If `node` or its parent is the root.
    pub fn disconnect_branch(&mut self, node: NodeId) {
        let Some(parent) = self.nodes[node].parent else {
            panic!("Cannot disconnect the root {node}");
        };
        let Some(grandparent) = self.nodes[parent].parent else {
            panic!("Cannot disconnect node {node}, its parent is the root");
        };
        let Some(sister) = self.sister(node) else {
            panic!("Node {parent} has a single child");
        };

        let parent_changes = std::mem::take(&mut self.nodes[parent].changes);
        self.nodes[sister].changes.extend(parent_changes);

        self.nodes[grandparent]
            .children
            .replace_child(parent, sister);
        self.nodes[sister].parent = Some(grandparent);
        self.nodes[parent].children.remove_child(sister);
        self.nodes[parent].parent = None;
        self.dirty = true;
    }

    /// Attach the detached parent of `node` on the branch above `dest` at `time`.
    ///
    /// Changes of `dest` later than `time` move to the new parent branch, and the parent takes the
    /// deme `dest` is in at `time`.
    ///
    /// # Panics
    ///
    /// If `dest` is the root, or if the parent of `node` is not detached.
    pub fn connect_branch(&mut self, node: NodeId, dest: NodeId, time: f64) {
        let Some(parent) = self.nodes[node].parent else {
            panic!("Node {node} has no parent to connect");
        };
        assert!(
            self.nodes[parent].parent.is_none() && self.nodes[parent].children.len() == 1,
            "Parent {parent} of node {node} is not detached"
        );
        let Some(dest_parent) = self.nodes[dest].parent else {
            panic!("Cannot connect above the root {dest}");
        };

        let split = self.nodes[dest].changes.partition_point(|c| c.time <= time);
        let moved = self.nodes[dest].changes.split_off(split);
        let deme = self.nodes[dest].final_type();

        let p = &mut self.nodes[parent];
        p.changes = moved;
        p.node_type = deme;
        p.height = time;
        p.parent = Some(dest_parent);
        p.children.add_child(dest);

        self.nodes[dest_parent].children.replace_child(dest, parent);
        self.nodes[dest].parent = Some(parent);
        self.dirty = true;
    }

    /// Swap the parents of `a` and `b`, each node keeping the changes on its own branch.
    ///
    /// # Panics
    ///
    /// If either node is the root.
    pub fn exchange_subtrees(&mut self, a: NodeId, b: NodeId) {
        let (Some(a_parent), Some(b_parent)) = (self.nodes[a].parent, self.nodes[b].parent) else {
            panic!("Cannot exchange {a} and {b}, one of them is the root");
        };
        if a_parent == b_parent {
            return;
        }

        self.nodes[a_parent].children.replace_child(a, b);
        self.nodes[b_parent].children.replace_child(b, a);
        self.nodes[a].parent = Some(b_parent);
        self.nodes[b].parent = Some(a_parent);
        self.dirty = true;
    }

    /// Check the tree, returning the first broken rule found.
    ///
    /// For every node other than the root: the node is not above its parent, its changes are
    /// strictly increasing and strictly inside the branch, every change switches deme, and the
    /// branch ends in the deme of the parent. Internal nodes must be active.
    pub fn first_violation(&self) -> Option<Violation> {
        for (id, node) in self.nodes.iter().enumerate() {
            if !node.is_leaf() && node.node_type != Deme::Active {
                return Some(Violation::DormantCoalescence { node: id });
            }
            let Some(parent) = node.parent else {
                continue;
            };
            let parent = &self.nodes[parent];

            if node.height > parent.height {
                return Some(Violation::NegativeBranchLength { node: id });
            }

            let mut last_time = node.height;
            let mut last_deme = node.node_type;
            for (index, change) in node.changes.iter().enumerate() {
                if change.time <= node.height || change.time >= parent.height {
                    return Some(Violation::ChangeOutsideBranch { node: id, index });
                }
                if index > 0 && change.time <= last_time {
                    return Some(Violation::UnorderedChange { node: id, index });
                }
                if change.deme == last_deme {
                    return Some(Violation::RedundantChange { node: id, index });
                }
                last_time = change.time;
                last_deme = change.deme;
            }

            if last_deme != parent.node_type {
                return Some(Violation::TypeMismatch { node: id });
            }
        }
        None
    }

    pub fn is_valid(&self) -> bool {
        self.first_violation().is_none()
    }

    pub fn total_change_count(&self) -> usize {
        self.nodes.iter().map(|n| n.change_count()).sum()
    }

    pub fn root_height(&self) -> f64 {
        self.nodes[self.root].height
    }

    /// Sum of all branch lengths.
    pub fn tree_length(&self) -> f64 {
        (0..self.nodes.len()).map(|id| self.branch_length(id)).sum()
    }

    /// Time spent in each deme, summed over all branches.
    pub fn type_lengths(&self) -> TypeLengths {
        let mut lengths = TypeLengths::default();
        for node in &self.nodes {
            if let Some(parent) = node.parent {
                lengths += node.type_lengths(self.nodes[parent].height);
            }
        }
        lengths
    }

    /// Number of nodes in each deme once changes are written out as single-child nodes.
    ///
    /// Every node counts once for its own deme and every change once for the deme it enters.
    pub fn node_type_counts(&self) -> [usize; 2] {
        let mut counts = [0; 2];
        for node in &self.nodes {
            counts[node.node_type.index()] += 1;
            for change in &node.changes {
                counts[change.deme.index()] += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn tree(newick: &str) -> SeedbankTree {
        SeedbankTree::from_newick(newick, "state").unwrap()
    }

    // Heights: A 0, B 0, C 0, changes on A at 2 (dormant) and 3 (active), AB at 4, root at 6
    const SMALL: &str = "((((A[&state=1]:2)[&state=0]:1)[&state=1]:1,B[&state=1]:4)[&state=1]:2,\
                         C[&state=1]:6)[&state=1]:0;";

    #[test]
    fn test_layout() {
        let tree = tree(SMALL);
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.internal_count(), 2);
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.leaves(), 0..3);
        assert_eq!(tree.internal_nodes(), 3..5);

        let a = 0;
        let ab = tree.parent(a).unwrap();
        assert_eq!(tree.node(a).label(), Some("A"));
        assert_eq!(tree.node(ab).height(), 4.0);
        assert_eq!(tree.sister(a), Some(1));
        assert_eq!(tree.parent(ab), Some(tree.root()));
        assert_eq!(tree.root_height(), 6.0);
        assert_eq!(tree.branch_length(tree.root()), 0.0);
        assert_eq!(tree.sister(tree.root()), None);
        assert!(tree.is_valid());
    }

    #[test]
    fn test_statistics() {
        let tree = tree(SMALL);
        assert_eq!(tree.total_change_count(), 2);
        assert_eq!(tree.tree_length(), 4.0 + 4.0 + 2.0 + 6.0);

        let lengths = tree.type_lengths();
        assert_eq!(lengths.dormant, 1.0);
        assert_eq!(lengths.active, 15.0);

        // Five nodes all active, plus one dormant and one active change
        assert_eq!(tree.node_type_counts(), [1, 6]);
    }

    #[test]
    fn test_dirty_flag_and_assign() {
        let mut tree = tree(SMALL);
        assert!(tree.is_dirty());
        tree.mark_clean();
        assert!(!tree.is_dirty());
        assert_eq!(tree.node(0).height(), 0.0);
        assert!(!tree.is_dirty());
        tree.node_mut(0).set_height(0.5);
        assert!(tree.is_dirty());

        let mut other = SeedbankTree::from_newick(SMALL, "state").unwrap();
        other.mark_clean();
        other.assign_from(&tree);
        assert!(other.is_dirty());
        assert_eq!(other.node(0).height(), 0.5);
        assert_eq!(other, tree);
    }

    #[test]
    fn test_disconnect_and_connect() {
        let mut tree = tree(SMALL);
        let (a, b, c) = (0, 1, 2);
        let ab = tree.parent(a).unwrap();
        let root = tree.root();

        // Prune B, A is left directly under the root with its own changes
        tree.disconnect_branch(b);
        assert_eq!(tree.parent(a), Some(root));
        assert_eq!(tree.children(root).collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(tree.children(ab).collect::<Vec<_>>(), vec![b]);
        assert_eq!(tree.parent(ab), None);
        assert_eq!(tree.node(a).change_count(), 2);

        // Regraft B on A between its two changes, taking the later one along
        tree.connect_branch(b, a, 2.5);
        assert_eq!(tree.parent(ab), Some(root));
        assert_eq!(tree.parent(a), Some(ab));
        assert_eq!(tree.children(ab).collect::<Vec<_>>(), vec![b, a]);
        assert_eq!(tree.node(ab).height(), 2.5);
        assert_eq!(tree.node(ab).node_type(), Deme::Dormant);
        assert_eq!(tree.node(ab).change_count(), 1);
        assert_eq!(tree.node(ab).change(0).time, 3.0);
        assert_eq!(tree.node(a).change_count(), 1);

        // Regrafting inside a dormant segment leaves B ending in the wrong deme
        assert_eq!(
            tree.first_violation(),
            Some(Violation::TypeMismatch { node: b })
        );
        tree.node_mut(b).add_change(Deme::Dormant, 1.0);
        assert_eq!(
            tree.first_violation(),
            Some(Violation::DormantCoalescence { node: ab })
        );
    }

    #[test]
    fn test_disconnect_moves_parent_changes() {
        let mut tree = tree(
            "((((A[&state=1]:1,B[&state=1]:1)[&state=1]:1)[&state=0]:1)[&state=1]:1,C[&state=1]:4)\
             [&state=1]:0;",
        );
        let ab = tree.parent(0).unwrap();
        assert_eq!(tree.node(ab).change_count(), 2);
        tree.disconnect_branch(0);
        assert_eq!(tree.node(1).change_count(), 2);
        assert_eq!(tree.node(ab).change_count(), 0);
        assert_eq!(tree.parent(1), Some(tree.root()));
    }

    #[test]
    #[should_panic(expected = "its parent is the root")]
    fn test_disconnect_below_root() {
        let mut tree = tree(SMALL);
        tree.disconnect_branch(2);
    }

    #[test]
    #[should_panic(expected = "is not detached")]
    fn test_connect_attached() {
        let mut tree = tree(SMALL);
        tree.connect_branch(0, 2, 1.0);
    }

    #[test]
    fn test_exchange_subtrees() {
        let mut tree = tree(SMALL);
        let (ab, root) = (3, 4);
        tree.mark_clean();

        tree.exchange_subtrees(0, 2);
        assert!(tree.is_dirty());
        assert_eq!(tree.parent(0), Some(root));
        assert_eq!(tree.parent(2), Some(ab));
        assert_eq!(tree.sister(2), Some(1));
        assert_eq!(tree.node(0).change_count(), 2);
        assert!(tree.is_valid());

        // Siblings swap in place
        tree.exchange_subtrees(1, 2);
        assert_eq!(tree.parent(1), Some(ab));
        assert_eq!(tree.parent(2), Some(ab));
    }

    #[test]
    fn test_violations() {
        let mut tree = tree(SMALL);

        tree.node_mut(0).set_change_time(0, 3.5);
        assert_eq!(
            tree.first_violation(),
            Some(Violation::UnorderedChange { node: 0, index: 1 })
        );
        tree.node_mut(0).set_change_time(0, 2.0);

        tree.node_mut(0).set_change_time(1, 4.0);
        assert_eq!(
            tree.first_violation(),
            Some(Violation::ChangeOutsideBranch { node: 0, index: 1 })
        );
        tree.node_mut(0).set_change_time(1, 3.0);

        tree.node_mut(0).set_change_deme(1, Deme::Dormant);
        assert_eq!(
            tree.first_violation(),
            Some(Violation::RedundantChange { node: 0, index: 1 })
        );
        tree.node_mut(0).truncate_changes(1);
        assert_eq!(
            tree.first_violation(),
            Some(Violation::TypeMismatch { node: 0 })
        );
        tree.node_mut(0).clear_changes();
        assert!(tree.is_valid());

        tree.node_mut(1).set_height(5.0);
        assert_eq!(
            tree.first_violation(),
            Some(Violation::NegativeBranchLength { node: 1 })
        );
    }
}
