use std::ops::AddAssign;

use crate::Deme;

/// Stable index of a node in a [`SeedbankTree`](super::SeedbankTree).
pub type NodeId = usize;

/// A switch of deme along a branch, at `time` the lineage enters `deme`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "bitcode", derive(bitcode::Decode, bitcode::Encode))]
pub struct TypeChange {
    pub deme: Deme,
    pub time: f64,
}

impl TypeChange {
    pub fn new(deme: Deme, time: f64) -> Self {
        Self { deme, time }
    }
}

/// Time a branch, or a whole tree, spends in each deme.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TypeLengths {
    pub dormant: f64,
    pub active: f64,
}

impl TypeLengths {
    pub fn get(&self, deme: Deme) -> f64 {
        match deme {
            Deme::Dormant => self.dormant,
            Deme::Active => self.active,
        }
    }

    fn add(&mut self, deme: Deme, length: f64) {
        match deme {
            Deme::Dormant => self.dormant += length,
            Deme::Active => self.active += length,
        }
    }

    pub fn total(&self) -> f64 {
        self.dormant + self.active
    }
}

impl AddAssign for TypeLengths {
    fn add_assign(&mut self, rhs: Self) {
        self.dormant += rhs.dormant;
        self.active += rhs.active;
    }
}

/// Up to two child slots, filled in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "bitcode", derive(bitcode::Decode, bitcode::Encode))]
pub(crate) struct Children([Option<NodeId>; 2]);

impl Children {
    /// Add a child to the first free slot.
    ///
    /// # Panics
    ///
    /// If trying to add child when the children is full (2 children).
    ///
    /// # Return
    ///
    /// Return true if the child is inserted successfully.
    /// Return false if the child is already in the children.
    pub(crate) fn add_child(&mut self, child: NodeId) -> bool {
        for c in self.0.iter_mut() {
            if c == &Some(child) {
                return false;
            } else if c.is_none() {
                *c = Some(child);
                return true;
            }
        }
        panic!("Children is full");
    }

    /// Remove `child`, moving the remaining child to the first slot.
    ///
    /// Return false if `child` is not in the children.
    pub(crate) fn remove_child(&mut self, child: NodeId) -> bool {
        match self.0 {
            [Some(first), second] if first == child => {
                self.0 = [second, None];
                true
            }
            [first, Some(second)] if second == child => {
                self.0 = [first, None];
                true
            }
            _ => false,
        }
    }

    /// Put `new` in the slot held by `old`.
    ///
    /// # Panics
    ///
    /// If `old` is not in the children.
    pub(crate) fn replace_child(&mut self, old: NodeId, new: NodeId) {
        match self.0.iter_mut().find(|c| **c == Some(old)) {
            Some(slot) => *slot = Some(new),
            None => panic!("Node {old} is not a child"),
        }
    }

    pub(crate) fn get(&self, index: usize) -> Option<NodeId> {
        self.0.get(index).copied().flatten()
    }

    pub(crate) fn len(&self) -> usize {
        self.iter().count()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().map_while(|c| *c)
    }
}

/// A node of a seedbank tree together with the branch above it.
///
/// `node_type` is the deme at the node itself, the bottom of the branch. `changes` records every
/// switch of deme along the branch, ordered by increasing time. The branch above the root is
/// degenerate and carries no changes.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "bitcode", derive(bitcode::Decode, bitcode::Encode))]
pub struct SeedbankNode {
    pub(crate) height: f64,
    pub(crate) node_type: Deme,
    pub(crate) label: Option<String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Children,
    pub(crate) changes: Vec<TypeChange>,
}

impl SeedbankNode {
    pub fn new(height: f64, node_type: Deme) -> Self {
        Self {
            height,
            node_type,
            label: None,
            parent: None,
            children: Children::default(),
            changes: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn set_height(&mut self, height: f64) {
        self.height = height;
    }

    pub fn node_type(&self) -> Deme {
        self.node_type
    }

    pub fn set_node_type(&mut self, node_type: Deme) {
        self.node_type = node_type;
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter()
    }

    /// The `index`-th child, in slot order.
    pub fn child(&self, index: usize) -> Option<NodeId> {
        self.children.get(index)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.get(0).is_none()
    }

    pub fn changes(&self) -> &[TypeChange] {
        &self.changes
    }

    pub fn change(&self, index: usize) -> TypeChange {
        self.changes[index]
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Deme at the top of the branch.
    pub fn final_type(&self) -> Deme {
        self.changes.last().map_or(self.node_type, |c| c.deme)
    }

    /// Time of the last change, or the node height if the branch has none.
    pub fn final_change_time(&self) -> f64 {
        self.changes.last().map_or(self.height, |c| c.time)
    }

    /// Append a change, which must be later than all existing ones.
    pub fn add_change(&mut self, deme: Deme, time: f64) {
        self.changes.push(TypeChange { deme, time });
    }

    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }

    /// Keep only the first `len` changes.
    pub fn truncate_changes(&mut self, len: usize) {
        self.changes.truncate(len);
    }

    pub fn insert_change(&mut self, index: usize, change: TypeChange) {
        self.changes.insert(index, change);
    }

    pub fn remove_change(&mut self, index: usize) -> TypeChange {
        self.changes.remove(index)
    }

    pub fn set_change_time(&mut self, index: usize, time: f64) {
        self.changes[index].time = time;
    }

    pub fn set_change_deme(&mut self, index: usize, deme: Deme) {
        self.changes[index].deme = deme;
    }

    /// Replace all changes at once.
    pub fn set_changes(&mut self, changes: Vec<TypeChange>) {
        self.changes = changes;
    }

    /// Iterate the segments of the branch as `(deme, start, end)`, ending at `parent_height`.
    pub fn segments(&self, parent_height: f64) -> impl Iterator<Item = (Deme, f64, f64)> + '_ {
        let starts = std::iter::once((self.node_type, self.height))
            .chain(self.changes.iter().map(|c| (c.deme, c.time)));
        let ends = self
            .changes
            .iter()
            .map(|c| c.time)
            .chain(std::iter::once(parent_height));
        starts
            .zip(ends)
            .map(|((deme, start), end)| (deme, start, end))
    }

    /// Length of the branch spent in each deme, the branch ending at `parent_height`.
    pub fn type_lengths(&self, parent_height: f64) -> TypeLengths {
        let mut lengths = TypeLengths::default();
        for (deme, start, end) in self.segments(parent_height) {
            lengths.add(deme, end - start);
        }
        lengths
    }
}
