//! Proposals moving node heights and change times.

use rand::Rng;

use super::{NodeSelection, OperatorContext, children_of};
use crate::{error::RejectReason, tree::NodeId};

impl<R: Rng + ?Sized> OperatorContext<'_, R> {
    pub(super) fn node_shift_retype(
        &mut self,
        selection: NodeSelection,
        root_scale_factor: f64,
    ) -> Result<f64, RejectReason> {
        let tree = &*self.tree;
        let root = tree.root();
        let internal = tree.internal_count();
        if internal == 0 {
            return Err(RejectReason::NotApplicable);
        }
        let node = match selection {
            NodeSelection::RootOnly => root,
            NodeSelection::Any => tree.leaf_count() + self.rng.random_range(0..internal),
            NodeSelection::NoRoot => {
                let candidates = tree.internal_nodes().filter(|&id| id != root).collect::<Vec<_>>();
                self.choose(&candidates)?
            }
        };
        let [left, right] = children_of(&*self.tree, node)?;
        let lower = self.tree.node(left).height().max(self.tree.node(right).height());

        if node == root {
            let mut log_hr = self.type_prob(left)? + self.type_prob(right)?;
            let f = self.scale_factor(root_scale_factor);
            let height = self.tree.node(root).height();
            self.tree
                .node_mut(root)
                .set_height(lower + f * (height - lower));
            log_hr -= f.ln();
            log_hr -= self.retype(left)? + self.retype(right)?;
            Ok(log_hr)
        } else {
            let mut log_hr =
                self.type_prob(node)? + self.type_prob(left)? + self.type_prob(right)?;
            let upper = self.tree.parent_height(node).unwrap_or(lower);
            let height = lower + (upper - lower) * self.rng.random::<f64>();
            self.tree.node_mut(node).set_height(height);
            log_hr -= self.retype(node)? + self.retype(left)? + self.retype(right)?;
            Ok(log_hr)
        }
    }

    /// Internal heights and all change times are multiplied by the same factor, leaves stay put.
    pub(super) fn tree_scale(&mut self, scale_factor: f64) -> Result<f64, RejectReason> {
        let f = self.scale_factor(scale_factor);

        // Dimension of the scaled state, less the two the ratio of densities accounts for
        let mut scaled = -2i64;
        for id in 0..self.tree.node_count() {
            let node = self.tree.node_mut(id);
            if !node.is_leaf() {
                node.set_height(node.height() * f);
                scaled += 1;
            }
            for index in 0..node.change_count() {
                node.set_change_time(index, node.change(index).time * f);
                scaled += 1;
            }
        }

        if !self.tree.is_valid() {
            return Err(RejectReason::InvalidTree);
        }
        Ok(scaled as f64 * f.ln())
    }

    /// Events are internal nodes and changes, chosen uniformly. A node moves between the last
    /// changes below it and its first change, a change between its neighbours. The root is
    /// scaled above the last changes of its children.
    pub(super) fn uniform_node(
        &mut self,
        include_root: bool,
        root_scale_factor: f64,
    ) -> Result<f64, RejectReason> {
        let internal = self.tree.internal_count();
        let events = internal + self.tree.total_change_count();
        if events == 0 {
            return Err(RejectReason::NotApplicable);
        }
        let event = self.rng.random_range(0..events);

        if event < internal {
            let node = self.tree.leaf_count() + event;
            let [left, right] = children_of(&*self.tree, node)?;
            let lower = self
                .tree
                .node(left)
                .final_change_time()
                .max(self.tree.node(right).final_change_time());

            if self.tree.is_root(node) {
                if !include_root {
                    return Err(RejectReason::NotApplicable);
                }
                let f = self.scale_factor(root_scale_factor);
                let height = self.tree.node(node).height();
                self.tree
                    .node_mut(node)
                    .set_height(lower + f * (height - lower));
                return Ok(-f.ln());
            }

            let branch = self.tree.node(node);
            let upper = match branch.changes().first() {
                Some(change) => change.time,
                None => self.tree.parent_height(node).unwrap_or(lower),
            };
            let u = self.rng.random::<f64>();
            self.tree
                .node_mut(node)
                .set_height(u * lower + (1.0 - u) * upper);
            return Ok(0.0);
        }

        let (node, index) = self
            .locate_change(event - internal)
            .ok_or(RejectReason::NotApplicable)?;
        let branch = self.tree.node(node);
        let lower = match index {
            0 => branch.height(),
            _ => branch.change(index - 1).time,
        };
        let upper = if index + 1 < branch.change_count() {
            branch.change(index + 1).time
        } else {
            self.tree.parent_height(node).unwrap_or(lower)
        };
        let u = self.rng.random::<f64>();
        self.tree
            .node_mut(node)
            .set_change_time(index, u * lower + (1.0 - u) * upper);
        Ok(0.0)
    }

    /// Node and index of the `k`-th change, counting branches in id order.
    fn locate_change(&self, mut k: usize) -> Option<(NodeId, usize)> {
        for id in 0..self.tree.node_count() {
            let count = self.tree.node(id).change_count();
            if k < count {
                return Some((id, k));
            }
            k -= count;
        }
        None
    }
}
