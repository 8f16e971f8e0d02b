//! Strict clock with a separate substitution rate for the seedbank.

use crate::{
    Deme,
    error::Result,
    model::transition::checked,
    tree::{NodeId, SeedbankTree},
};

/// Branch rates averaging an active and a dormant rate over the time spent in each deme.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeedbankClock {
    active_rate: f64,
    dormant_rate: f64,
}

impl SeedbankClock {
    /// Negative rates are clamped to zero, non-finite ones rejected.
    pub fn new(active_rate: f64, dormant_rate: f64) -> Result<Self> {
        Ok(Self {
            active_rate: checked("active_rate", active_rate)?,
            dormant_rate: checked("dormant_rate", dormant_rate)?,
        })
    }

    pub fn rate(&self, deme: Deme) -> f64 {
        match deme {
            Deme::Active => self.active_rate,
            Deme::Dormant => self.dormant_rate,
        }
    }

    /// Rate of the branch above `node`, 1 for the root.
    pub fn branch_rate(&self, tree: &SeedbankTree, node: NodeId) -> f64 {
        let Some(parent_height) = tree.parent_height(node) else {
            return 1.0;
        };
        let branch = tree.node(node);
        let length = parent_height - branch.height();
        if length <= 0.0 {
            return self.rate(branch.node_type());
        }
        let lengths = branch.type_lengths(parent_height);
        (lengths.dormant * self.dormant_rate + lengths.active * self.active_rate) / length
    }

    /// Rates of all branches, indexed by node id.
    pub fn branch_rates(&self, tree: &SeedbankTree) -> Vec<f64> {
        (0..tree.node_count())
            .map(|id| self.branch_rate(tree, id))
            .collect()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::Error;

    // Heights: sample0 2, sample1 0 dormant over (1, 2), sample2 1 dormant over (2, 3), their
    // parents at 3 and 4
    const TREE: &str = "((sample0[&state=1]:1.0,((sample1[&state=1]:1.0)[&state=0]:1.0)[&state=1]:1.0)\
                        [&state=1]:1.0,((sample2[&state=1]:1.0)[&state=0]:1.0)[&state=1]:1.0)[&state=1]:0.0;";

    #[test]
    fn test_branch_rates() {
        let tree = SeedbankTree::from_newick(TREE, "state").unwrap();
        let clock = SeedbankClock::new(1.0, 0.5).unwrap();
        let rates = clock.branch_rates(&tree);
        let expected = [1.0, 5.0 / 6.0, 5.0 / 6.0, 1.0, 1.0];
        for (rate, expected) in rates.iter().zip(expected) {
            assert!((rate - expected).abs() < 1e-12, "{rates:?}");
        }

        // Equal rates make the deme irrelevant
        let flat = SeedbankClock::new(0.7, 0.7).unwrap();
        for id in tree.leaves() {
            assert!((flat.branch_rate(&tree, id) - 0.7).abs() < 1e-12);
        }
        assert_eq!(flat.branch_rate(&tree, tree.root()), 1.0);
    }

    #[test]
    fn test_zero_length_branch() {
        let tree =
            SeedbankTree::from_newick("(A[&state=0]:0,B[&state=1]:1)[&state=1]:0;", "state").unwrap();
        let clock = SeedbankClock::new(2.0, 0.25).unwrap();
        assert_eq!(clock.branch_rate(&tree, 0), 0.25);
        assert_eq!(clock.branch_rate(&tree, 1), 2.0);
    }

    #[test]
    fn test_rate_validation() {
        let clock = SeedbankClock::new(1.0, -0.5).unwrap();
        assert_eq!(clock.rate(Deme::Dormant), 0.0);
        assert!(matches!(
            SeedbankClock::new(f64::NAN, 1.0),
            Err(Error::InvalidParameter {
                name: "active_rate",
                ..
            })
        ));
        assert!(matches!(
            SeedbankClock::new(1.0, f64::INFINITY),
            Err(Error::InvalidParameter {
                name: "dormant_rate",
                ..
            })
        ));
        let clock = SeedbankClock::new(-2.0, 0.5).unwrap();
        assert_eq!(clock.rate(Deme::Active), 0.0);
        assert_eq!(clock.rate(Deme::Dormant), 0.5);
    }
}
