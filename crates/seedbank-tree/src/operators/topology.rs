//! Proposals changing the topology of the tree.

use rand::Rng;

use super::OperatorContext;
use crate::{
    Deme,
    error::RejectReason,
    tree::{NodeId, SeedbankTree},
};

impl<R: Rng + ?Sized> OperatorContext<'_, R> {
    /// Regraft the subtree below a node whose parent is not the root onto an active segment of
    /// another branch, older than the subtree.
    ///
    /// The attachment time is uniform over the active time available on the destination branch,
    /// the reverse move over the active time on the old sister and parent branches. Moves to or
    /// from the root are not proposed.
    pub(super) fn wilson_balding(&mut self) -> Result<f64, RejectReason> {
        let tree = &*self.tree;
        let sources = (0..tree.node_count())
            .filter(|&id| tree.parent(id).is_some_and(|p| !tree.is_root(p)))
            .collect::<Vec<_>>();
        let src = self.choose(&sources)?;

        let tree = &*self.tree;
        let (Some(src_parent), Some(sister)) = (tree.parent(src), tree.sister(src)) else {
            return Err(RejectReason::NotApplicable);
        };
        let t_src = tree.node(src).height();
        let dests = (0..tree.node_count())
            .filter(|&dest| {
                dest != src
                    && dest != src_parent
                    && tree.parent(dest) != Some(src_parent)
                    && tree.parent_height(dest).is_some_and(|h| h > t_src)
            })
            .collect::<Vec<_>>();
        let dest = self.choose(&dests)?;

        let tree = &*self.tree;
        let new_min = t_src.max(tree.node(dest).height());
        let new_range = active_segments(tree, dest, new_min)
            .map(|(start, end)| end - start)
            .sum::<f64>();
        let old_min = t_src.max(tree.node(sister).height());
        let old_range = active_segments(tree, sister, old_min)
            .chain(active_segments(tree, src_parent, f64::NEG_INFINITY))
            .map(|(start, end)| end - start)
            .sum::<f64>();
        if old_range <= 0.0 || new_range <= 0.0 {
            return Err(RejectReason::NotApplicable);
        }

        let mut offset = self.rng.random::<f64>() * new_range;
        let mut time = None;
        for (start, end) in active_segments(&*self.tree, dest, new_min) {
            let length = end - start;
            if offset == length || offset == 0.0 {
                return Err(RejectReason::NotApplicable);
            }
            if offset < length {
                time = Some(start + offset);
                break;
            }
            offset -= length;
        }
        let time = time.ok_or(RejectReason::NotApplicable)?;

        let old = self.type_prob(src)?;
        self.tree.disconnect_branch(src);
        self.tree.connect_branch(src, dest, time);
        let new = self.retype(src)?;
        Ok(old - new + new_range.ln() - old_range.ln())
    }

    /// Swap a node with the sister of its parent (narrow) or with any node outside its lineage
    /// (wide), then retype both moved branches.
    pub(super) fn subtree_exchange(&mut self, narrow: bool) -> Result<f64, RejectReason> {
        let tree = &*self.tree;
        let (src, dest) = if narrow {
            let sources = (0..tree.node_count())
                .filter(|&id| tree.parent(id).is_some_and(|p| !tree.is_root(p)))
                .collect::<Vec<_>>();
            let src = self.choose(&sources)?;
            let uncle = self.tree.parent(src).and_then(|p| self.tree.sister(p));
            (src, uncle.ok_or(RejectReason::NotApplicable)?)
        } else {
            let src = self.random_non_root()?;
            let tree = &*self.tree;
            let src_parent = tree.parent(src);
            let dests = (0..tree.node_count())
                .filter(|&dest| {
                    dest != src && !tree.is_root(dest) && tree.parent(dest) != src_parent
                })
                .collect::<Vec<_>>();
            (src, self.choose(&dests)?)
        };

        let tree = &*self.tree;
        let (Some(src_parent), Some(dest_parent)) = (tree.parent(src), tree.parent(dest)) else {
            return Err(RejectReason::NotApplicable);
        };
        if tree.node(dest).height() >= tree.node(src_parent).height()
            || tree.node(src).height() >= tree.node(dest_parent).height()
        {
            return Err(RejectReason::InvalidTree);
        }

        let old = self.type_prob(src)? + self.type_prob(dest)?;
        self.tree.exchange_subtrees(src, dest);
        let new = self.retype(src)? + self.retype(dest)?;
        Ok(old - new)
    }
}

/// Active segments of the branch above `node` ending after `min_time`, clipped to start no
/// earlier than it.
fn active_segments(
    tree: &SeedbankTree,
    node: NodeId,
    min_time: f64,
) -> impl Iterator<Item = (f64, f64)> + '_ {
    let top = tree.parent_height(node).unwrap_or(f64::NEG_INFINITY);
    tree.node(node)
        .segments(top)
        .filter(move |&(deme, _, end)| deme == Deme::Active && end >= min_time)
        .map(move |(_, start, end)| (start.max(min_time), end))
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

    // Heights: A, B, C, D at 0, AB at 2 with a dormant spell on B over (0.5, 1), ABC at 4 with a
    // dormant spell on C over (1, 3), root at 6
    const TREE: &str = "(((A[&state=1]:2,((B[&state=1]:0.5)[&state=0]:0.5)[&state=1]:1)[&state=1]:2,\
                        ((C[&state=1]:1)[&state=0]:2)[&state=1]:1)[&state=1]:2,D[&state=1]:6)[&state=1]:0;";

    fn tree() -> SeedbankTree {
        SeedbankTree::from_newick(TREE, "state").unwrap()
    }

    #[test]
    fn test_active_segments() {
        let tree = tree();
        let (b, c) = (1, 2);
        assert_eq!(
            active_segments(&tree, c, 0.0).collect::<Vec<_>>(),
            vec![(0.0, 1.0), (3.0, 4.0)]
        );
        assert_eq!(
            active_segments(&tree, c, 2.0).collect::<Vec<_>>(),
            vec![(3.0, 4.0)]
        );
        assert_eq!(
            active_segments(&tree, b, 0.75).collect::<Vec<_>>(),
            vec![(1.0, 2.0)]
        );
        assert_eq!(active_segments(&tree, tree.root(), 0.0).count(), 0);
    }

    #[test]
    fn test_wilson_balding_keeps_tree_valid() {
        let (mut tree, mut model) = simulated(8, 12);
        let mut rng = SmallRng::seed_from_u64(4);
        let mut accepted = 0;
        for _ in 0..300 {
            let mut proposal = tree.clone();
            let mut ctx = OperatorContext::new(&mut proposal, &mut model, &mut rng);
            if let Ok(log_hr) = Operator::TypedWilsonBalding.propose(&mut ctx) {
                assert!(log_hr.is_finite());
                assert!(proposal.is_valid(), "{:?}", proposal.first_violation());
                assert_eq!(proposal.root(), tree.root());
                tree.assign_from(&proposal);
                accepted += 1;
            }
        }
        assert!(accepted > 0);
    }

    #[test]
    fn test_wilson_balding_small_trees() {
        let mut model = TransitionModel::new(1.0, 1.0, 10.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        let mut cherry =
            SeedbankTree::from_newick("(A[&state=1]:1,B[&state=1]:1)[&state=1]:0;", "state").unwrap();
        let mut ctx = OperatorContext::new(&mut cherry, &mut model, &mut rng);
        assert_eq!(ctx.wilson_balding(), Err(RejectReason::NotApplicable));
    }

    #[test]
    fn test_wilson_balding_regrafts_on_active_time() {
        let mut model = TransitionModel::new(1.0, 1.0, 10.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(8);
        let mut moved = 0;
        for _ in 0..200 {
            let mut tree = tree();
            let mut ctx = OperatorContext::new(&mut tree, &mut model, &mut rng);
            if ctx.wilson_balding().is_err() {
                continue;
            }
            moved += 1;
            assert!(tree.is_valid(), "{:?}", tree.first_violation());
            assert_eq!(tree.root(), 6);
            for id in tree.internal_nodes() {
                assert_eq!(tree.node(id).node_type(), Deme::Active);
            }
        }
        assert!(moved > 0);
    }

    #[test]
    fn test_subtree_exchange() {
        for narrow in [true, false] {
            let (mut tree, mut model) = simulated(8, 13);
            let mut rng = SmallRng::seed_from_u64(5);
            let op = Operator::TypedSubtreeExchange { narrow };
            let mut accepted = 0;
            for _ in 0..300 {
                let mut proposal = tree.clone();
                let mut ctx = OperatorContext::new(&mut proposal, &mut model, &mut rng);
                match op.propose(&mut ctx) {
                    Ok(log_hr) => {
                        assert!(log_hr.is_finite());
                        assert!(proposal.is_valid(), "{:?}", proposal.first_violation());
                        tree.assign_from(&proposal);
                        accepted += 1;
                    }
                    Err(reason) => assert!(matches!(
                        reason,
                        RejectReason::InvalidTree | RejectReason::NotApplicable
                    )),
                }
            }
            assert!(accepted > 0, "narrow = {narrow}");
        }
    }

    #[test]
    fn test_narrow_exchange_swaps_with_uncle() {
        let tree = tree();
        let mut model = TransitionModel::new(1.0, 1.0, 10.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        let (a, b, c, ab, abc) = (0, 1, 2, 4, 5);
        let mut seen = false;
        for _ in 0..100 {
            let mut proposal = tree.clone();
            let mut ctx = OperatorContext::new(&mut proposal, &mut model, &mut rng);
            if ctx.subtree_exchange(true).is_ok() {
                let swapped = [a, b]
                    .into_iter()
                    .any(|x| proposal.parent(x) == Some(abc) && proposal.parent(c) == Some(ab));
                if swapped {
                    seen = true;
                }
            }
        }
        assert!(seen);
    }
}
