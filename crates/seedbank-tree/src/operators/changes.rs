//! Proposals acting on the changes of a single branch.

use rand::Rng;

use super::OperatorContext;
use crate::{
    Deme,
    error::RejectReason,
    tree::{NodeId, SeedbankTree, node::TypeChange},
};

impl<R: Rng + ?Sized> OperatorContext<'_, R> {
    pub(super) fn recolor_branch(&mut self) -> Result<f64, RejectReason> {
        let node = self.random_non_root()?;
        let old = self.type_prob(node)?;
        let new = self.retype(node)?;
        Ok(old - new)
    }

    /// Sub-edges are the segments between consecutive events on a branch, `2n - 2 + m` of them on
    /// a tree with `n` leaves and `m` changes. A pair is born inside a random sub-edge or the two
    /// changes bounding it die.
    pub(super) fn pair_birth_death(&mut self) -> Result<f64, RejectReason> {
        let n = self.tree.leaf_count() as f64;
        let m = self.tree.total_change_count();
        let sub_edges = 2 * self.tree.leaf_count() + m - 2;
        if sub_edges == 0 {
            return Err(RejectReason::NotApplicable);
        }
        let mut edge = self.rng.random_range(0..sub_edges);

        let mut selected = None;
        for id in 0..self.tree.node_count() {
            if self.tree.is_root(id) {
                continue;
            }
            let count = self.tree.node(id).change_count() + 1;
            if edge < count {
                selected = Some(id);
                break;
            }
            edge -= count;
        }
        let node = selected.ok_or(RejectReason::NotApplicable)?;
        let m = m as f64;

        if self.rng.random::<f64>() < 0.5 {
            let (ts, tr) = self.sub_edge_bounds(node, edge);
            let old_deme = match edge {
                0 => self.tree.node(node).node_type(),
                _ => self.tree.node(node).change(edge - 1).deme,
            };
            let tau1 = ts + self.rng.random::<f64>() * (tr - ts);
            let tau2 = ts + self.rng.random::<f64>() * (tr - ts);
            let (tau_min, tau_max) = (tau1.min(tau2), tau1.max(tau2));
            if tau_min <= ts || tau_min == tau_max || tau_max >= tr {
                return Err(RejectReason::InvalidTree);
            }

            let node = self.tree.node_mut(node);
            node.insert_change(edge, TypeChange::new(old_deme, tau_max));
            node.insert_change(edge, TypeChange::new(old_deme.other(), tau_min));
            Ok(((m + 2.0 * n - 2.0) * (tr - ts) * (tr - ts)).ln() - (2.0 * (m + 2.0 * n)).ln())
        } else {
            let count = self.tree.node(node).change_count();
            if edge == 0 || edge >= count {
                return Err(RejectReason::NotApplicable);
            }
            let index = edge - 1;
            let (ts, _) = self.sub_edge_bounds(node, index);
            let (_, tr) = self.sub_edge_bounds(node, index + 2);

            let node = self.tree.node_mut(node);
            node.remove_change(index);
            node.remove_change(index);
            Ok((2.0 * (m + 2.0 * n - 2.0)).ln() - ((m + 2.0 * n - 4.0) * (tr - ts) * (tr - ts)).ln())
        }
    }

    /// The dormant segments of all branches are numbered and one of them gets new bounding change
    /// times, drawn uniformly between the surrounding events. A dormant leaf only moves the end
    /// of its first segment.
    pub(super) fn dormant_shift(&mut self) -> Result<f64, RejectReason> {
        let dormant_count = |tree: &SeedbankTree, id: NodeId| {
            let node = tree.node(id);
            let starts_dormant = usize::from(node.node_type() == Deme::Dormant);
            (node.change_count() + starts_dormant) / 2
        };

        let tree = &*self.tree;
        let total = (0..tree.node_count())
            .filter(|&id| !tree.is_root(id))
            .map(|id| dormant_count(tree, id))
            .sum::<usize>();
        if total == 0 {
            return Err(RejectReason::NotApplicable);
        }
        let mut segment = self.rng.random_range(0..total);

        let mut selected = None;
        for id in 0..self.tree.node_count() {
            if self.tree.is_root(id) {
                continue;
            }
            let count = dormant_count(&*self.tree, id);
            if segment < count {
                selected = Some(id);
                break;
            }
            segment -= count;
        }
        let node = selected.ok_or(RejectReason::NotApplicable)?;

        let starts_dormant = self.tree.node(node).node_type() == Deme::Dormant;
        if starts_dormant && segment == 0 {
            let (lower, _) = self.sub_edge_bounds(node, 0);
            let (_, upper) = self.sub_edge_bounds(node, 1);
            let time = lower + self.rng.random::<f64>() * (upper - lower);
            if time <= lower {
                return Err(RejectReason::InvalidTree);
            }
            self.tree.node_mut(node).set_change_time(0, time);
        } else {
            let base = 2 * segment - usize::from(starts_dormant);
            let (lower, _) = self.sub_edge_bounds(node, base);
            let (_, upper) = self.sub_edge_bounds(node, base + 2);
            let t1 = lower + self.rng.random::<f64>() * (upper - lower);
            let t2 = lower + self.rng.random::<f64>() * (upper - lower);
            if t1 <= lower || t2 <= lower || t1 == t2 {
                return Err(RejectReason::InvalidTree);
            }
            let node = self.tree.node_mut(node);
            node.set_change_time(base, t1.min(t2));
            node.set_change_time(base + 1, t1.max(t2));
        }
        Ok(0.0)
    }

    /// Start and end of sub-edge `index` on the branch above `node`, the sub-edge ending at
    /// change `index` or at the parent.
    fn sub_edge_bounds(&self, node: NodeId, index: usize) -> (f64, f64) {
        let branch = self.tree.node(node);
        let start = match index {
            0 => branch.height(),
            _ => branch.change(index - 1).time,
        };
        let end = if index < branch.change_count() {
            branch.change(index).time
        } else {
            self.tree.parent_height(node).unwrap_or(start)
        };
        (start, end)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use rand::{SeedableRng, rngs::SmallRng};

    use super::*;
    use crate::{
        model::transition::TransitionModel,
        operators::{Operator, tests::simulated},
    };

    // A dormant over (1, 2) on a branch of length 4, B dormant sample active from 1.5
    const TREE: &str = "((((A[&state=1]:1)[&state=0]:1)[&state=1]:2,(B[&state=0]:1.5)[&state=1]:2.5)\
                        [&state=1]:1,C[&state=1]:5)[&state=1]:0;";

    fn tree() -> SeedbankTree {
        SeedbankTree::from_newick(TREE, "state").unwrap()
    }

    #[test]
    fn test_sub_edge_bounds() {
        let mut tree = tree();
        let mut model = TransitionModel::new(1.0, 1.0, 10.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        let ctx = OperatorContext::new(&mut tree, &mut model, &mut rng);
        assert_eq!(ctx.sub_edge_bounds(0, 0), (0.0, 1.0));
        assert_eq!(ctx.sub_edge_bounds(0, 1), (1.0, 2.0));
        assert_eq!(ctx.sub_edge_bounds(0, 2), (2.0, 4.0));
        assert_eq!(ctx.sub_edge_bounds(1, 1), (1.5, 4.0));
    }

    #[test]
    fn test_recolor_branch() {
        let (mut tree, mut model) = simulated(8, 4);
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..200 {
            let mut ctx = OperatorContext::new(&mut tree, &mut model, &mut rng);
            let log_hr = Operator::RecolorBranch.propose(&mut ctx).unwrap();
            assert!(log_hr.is_finite());
            assert!(tree.is_valid(), "{:?}", tree.first_violation());
        }
    }

    #[test]
    fn test_pair_birth_death() {
        let mut model = TransitionModel::new(1.0, 1.0, 10.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(9);
        let mut births = 0;
        let mut deaths = 0;
        for _ in 0..400 {
            let mut tree = tree();
            let before = tree.total_change_count();
            let mut ctx = OperatorContext::new(&mut tree, &mut model, &mut rng);
            let Ok(log_hr) = Operator::PairBirthDeath.propose(&mut ctx) else {
                assert_eq!(tree.total_change_count(), before);
                continue;
            };
            assert!(log_hr.is_finite());
            assert!(tree.is_valid(), "{:?}", tree.first_violation());
            match tree.total_change_count() {
                count if count == before + 2 => births += 1,
                count if count == before - 2 => deaths += 1,
                count => panic!("unexpected change count {count}"),
            }
        }
        assert!(births > 0 && deaths > 0);
    }

    #[test]
    fn test_pair_death_ratio() {
        // Only the pair on A can die: n = 3, m = 3, bounds 0 and 4
        let mut model = TransitionModel::new(1.0, 1.0, 10.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        let expected = (2.0f64 * 7.0).ln() - (5.0f64 * 16.0).ln();
        let mut seen = false;
        for _ in 0..200 {
            let mut tree = tree();
            let mut ctx = OperatorContext::new(&mut tree, &mut model, &mut rng);
            if let Ok(log_hr) = ctx.pair_birth_death() {
                if tree.total_change_count() == 1 {
                    assert!((log_hr - expected).abs() < 1e-12);
                    assert_eq!(tree.node(0).change_count(), 0);
                    seen = true;
                }
            }
        }
        assert!(seen);
    }

    #[test]
    fn test_dormant_shift() {
        let mut model = TransitionModel::new(1.0, 1.0, 10.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let mut tree = tree();
        for _ in 0..200 {
            let mut ctx = OperatorContext::new(&mut tree, &mut model, &mut rng);
            assert_eq!(Operator::DormantShift.propose(&mut ctx), Ok(0.0));
            assert!(tree.is_valid(), "{:?}", tree.first_violation());
            assert_eq!(tree.node(0).change_count(), 2);
            assert_eq!(tree.node(1).change_count(), 1);
            assert!(tree.node(1).change(0).time < 4.0);
        }

        let mut plain = SeedbankTree::from_newick("(A[&state=1]:1,B[&state=1]:1)[&state=1]:0;", "state")
            .unwrap();
        let mut ctx = OperatorContext::new(&mut plain, &mut model, &mut rng);
        assert_eq!(ctx.dormant_shift(), Err(RejectReason::NotApplicable));
    }
}
