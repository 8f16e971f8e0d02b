//! Metropolis-Hastings proposals on typed seedbank trees.
//!
//! Every operator modifies the tree in place and returns its log Hastings ratio. A rejected
//! proposal may leave the tree partially modified: the caller is expected to keep a copy of the
//! state and restore it with [`SeedbankTree::assign_from`] whenever a move is not accepted.

mod changes;
mod heights;
pub mod retype;
mod topology;

use log::debug;
use rand::{Rng, seq::IndexedRandom};

use crate::{
    error::{Error, RejectReason, Result},
    model::transition::TransitionModel,
    tree::{NodeId, SeedbankTree},
};

/// Mutable state a proposal works on.
pub struct OperatorContext<'a, R: Rng + ?Sized> {
    pub tree: &'a mut SeedbankTree,
    pub model: &'a mut TransitionModel,
    pub rng: &'a mut R,
}

impl<'a, R: Rng + ?Sized> OperatorContext<'a, R> {
    pub fn new(tree: &'a mut SeedbankTree, model: &'a mut TransitionModel, rng: &'a mut R) -> Self {
        Self { tree, model, rng }
    }

    fn retype(&mut self, node: NodeId) -> Result<f64, RejectReason> {
        retype::retype_branch(self.tree, self.model, node, self.rng)
    }

    fn type_prob(&mut self, node: NodeId) -> Result<f64, RejectReason> {
        retype::branch_type_prob(self.tree, self.model, node)
    }

    /// Scale factor drawn between `s` and `1 / s`, with density proportional to `1 / f`.
    fn scale_factor(&mut self, s: f64) -> f64 {
        let u = self.rng.random::<f64>();
        u * s + (1.0 - u) / s
    }

    fn choose(&mut self, candidates: &[NodeId]) -> Result<NodeId, RejectReason> {
        candidates
            .choose(self.rng)
            .copied()
            .ok_or(RejectReason::NotApplicable)
    }

    /// A node other than the root, uniformly.
    fn random_non_root(&mut self) -> Result<NodeId, RejectReason> {
        let count = self.tree.node_count();
        if count < 2 {
            return Err(RejectReason::NotApplicable);
        }
        let node = self.rng.random_range(0..count - 1);
        Ok(if node >= self.tree.root() { node + 1 } else { node })
    }
}

/// Which internal nodes [`Operator::NodeShiftRetype`] may move.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeSelection {
    #[default]
    Any,
    RootOnly,
    NoRoot,
}

impl NodeSelection {
    /// Selection from a pair of exclusive flags.
    pub fn from_flags(root_only: bool, no_root: bool) -> Result<Self> {
        match (root_only, no_root) {
            (true, true) => Err(Error::InvalidOperator(
                "`root_only` and `no_root` cannot both be set",
            )),
            (true, false) => Ok(Self::RootOnly),
            (false, true) => Ok(Self::NoRoot),
            (false, false) => Ok(Self::Any),
        }
    }
}

/// A proposal kind and its tuning parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operator {
    /// Retype the branch above a random non-root node.
    RecolorBranch,
    /// Move an internal node between its oldest child and its parent (the root is scaled above
    /// its oldest child instead) and retype the branches touching it.
    NodeShiftRetype {
        selection: NodeSelection,
        root_scale_factor: f64,
    },
    /// Prune a subtree and regraft it on an active segment elsewhere.
    TypedWilsonBalding,
    /// Swap two subtrees, restricted to the sister of the parent when `narrow`.
    TypedSubtreeExchange { narrow: bool },
    /// Scale all internal heights and change times.
    TreeScale { scale_factor: f64 },
    /// Move one internal node or one change between its neighbouring events.
    UniformNode {
        include_root: bool,
        root_scale_factor: f64,
    },
    /// Insert or remove a pair of consecutive changes.
    PairBirthDeath,
    /// Redraw the times of the changes bounding a dormant segment.
    DormantShift,
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RecolorBranch => "RecolorBranch",
            Self::NodeShiftRetype { .. } => "NodeShiftRetype",
            Self::TypedWilsonBalding => "TypedWilsonBalding",
            Self::TypedSubtreeExchange { .. } => "TypedSubtreeExchange",
            Self::TreeScale { .. } => "TreeScale",
            Self::UniformNode { .. } => "UniformNode",
            Self::PairBirthDeath => "PairBirthDeath",
            Self::DormantShift => "DormantShift",
        }
    }

    /// Check the tuning parameters.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::NodeShiftRetype {
                root_scale_factor: s,
                ..
            }
            | Self::UniformNode {
                root_scale_factor: s,
                ..
            }
            | Self::TreeScale { scale_factor: s } => {
                if !s.is_finite() || s <= 0.0 || s == 1.0 {
                    return Err(Error::InvalidOperator(
                        "scale factors must be finite, positive and different from 1",
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Apply the proposal to the context and return its log Hastings ratio.
    pub fn propose<R: Rng + ?Sized>(
        &self,
        ctx: &mut OperatorContext<'_, R>,
    ) -> Result<f64, RejectReason> {
        match *self {
            Self::RecolorBranch => ctx.recolor_branch(),
            Self::NodeShiftRetype {
                selection,
                root_scale_factor,
            } => ctx.node_shift_retype(selection, root_scale_factor),
            Self::TypedWilsonBalding => ctx.wilson_balding(),
            Self::TypedSubtreeExchange { narrow } => ctx.subtree_exchange(narrow),
            Self::TreeScale { scale_factor } => ctx.tree_scale(scale_factor),
            Self::UniformNode {
                include_root,
                root_scale_factor,
            } => ctx.uniform_node(include_root, root_scale_factor),
            Self::PairBirthDeath => ctx.pair_birth_death(),
            Self::DormantShift => ctx.dormant_shift(),
        }
    }

    /// Like [`propose`](Self::propose), with rejections mapped to negative infinity.
    pub fn log_hastings_ratio<R: Rng + ?Sized>(&self, ctx: &mut OperatorContext<'_, R>) -> f64 {
        match self.propose(ctx) {
            Ok(log_hr) => log_hr,
            Err(reason) => {
                debug!("{} rejected: {reason}", self.name());
                f64::NEG_INFINITY
            }
        }
    }
}

/// Both children of an internal node.
fn children_of(tree: &SeedbankTree, node: NodeId) -> Result<[NodeId; 2], RejectReason> {
    let mut children = tree.children(node);
    match (children.next(), children.next()) {
        (Some(left), Some(right)) => Ok([left, right]),
        _ => Err(RejectReason::NotApplicable),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use rand::{SeedableRng, rngs::SmallRng};

    use super::*;
    use crate::{Deme, tree::LeafSample};

    pub(super) fn simulated(leaves: usize, seed: u64) -> (SeedbankTree, TransitionModel) {
        let model = TransitionModel::new(1.0, 1.0, 2.0).unwrap();
        let samples = (0..leaves)
            .map(|i| LeafSample::new(format!("t{i}"), Deme::Active, 0.0))
            .collect();
        let tree = SeedbankTree::simulator(samples)
            .simulate(&model, &mut SmallRng::seed_from_u64(seed))
            .unwrap();
        (tree, model)
    }

    #[test]
    fn test_node_selection_flags() {
        assert_eq!(
            NodeSelection::from_flags(false, false).unwrap(),
            NodeSelection::Any
        );
        assert_eq!(
            NodeSelection::from_flags(true, false).unwrap(),
            NodeSelection::RootOnly
        );
        assert_eq!(
            NodeSelection::from_flags(false, true).unwrap(),
            NodeSelection::NoRoot
        );
        assert!(matches!(
            NodeSelection::from_flags(true, true),
            Err(Error::InvalidOperator(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(Operator::TreeScale { scale_factor: 0.8 }.validate().is_ok());
        assert!(Operator::TreeScale { scale_factor: 1.25 }.validate().is_ok());
        assert!(Operator::PairBirthDeath.validate().is_ok());
        for s in [0.0, -0.5, 1.0, f64::NAN, f64::INFINITY] {
            assert!(Operator::TreeScale { scale_factor: s }.validate().is_err());
            assert!(
                Operator::UniformNode {
                    include_root: true,
                    root_scale_factor: s
                }
                .validate()
                .is_err()
            );
            assert!(
                Operator::NodeShiftRetype {
                    selection: NodeSelection::Any,
                    root_scale_factor: s
                }
                .validate()
                .is_err()
            );
        }
    }

    #[test]
    fn test_rejection_is_negative_infinity() {
        // A single leaf leaves nothing to propose
        let mut tree = SeedbankTree::from_newick("A[&state=1]:0;", "state").unwrap();
        let mut model = TransitionModel::new(1.0, 1.0, 10.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        let mut ctx = OperatorContext::new(&mut tree, &mut model, &mut rng);

        assert_eq!(
            Operator::RecolorBranch.propose(&mut ctx),
            Err(RejectReason::NotApplicable)
        );
        assert_eq!(
            Operator::PairBirthDeath.log_hastings_ratio(&mut ctx),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_random_non_root() {
        let (mut tree, mut model) = simulated(5, 1);
        let root = tree.root();
        let mut rng = SmallRng::seed_from_u64(2);
        let mut ctx = OperatorContext::new(&mut tree, &mut model, &mut rng);
        let mut seen = [false; 9];
        for _ in 0..500 {
            let node = ctx.random_non_root().unwrap();
            assert_ne!(node, root);
            seen[node] = true;
        }
        assert_eq!(seen.iter().filter(|&&s| s).count(), 8);
    }
}
