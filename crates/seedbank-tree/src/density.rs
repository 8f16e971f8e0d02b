//! Density of a typed tree under the seedbank coalescent.
//!
//! The tree is cut into intervals at every sample, coalescence and change of deme. Within an
//! interval `k_a` active and `k_d` dormant lineages are present: active pairs coalesce at rate
//! `1 / theta_a`, active lineages become dormant at rate `c` and dormant ones wake up at rate
//! `c K`. The log density sums the survival term of every interval and the log rate of every
//! event.

use log::{Level, log_enabled, trace};
use nohash_hasher::IntMap;

use crate::{
    Deme,
    model::transition::TransitionModel,
    tree::{NodeId, SeedbankTree},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A leaf enters the process.
    Sample(Deme),
    /// Two lineages merge in the given deme.
    Coalesce(Deme),
    /// A lineage switches deme, in the backward direction of time.
    Migrate { from: Deme, to: Deme },
}

/// An event of the tree and the lineage counts of the interval ending at it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeEvent {
    pub time: f64,
    pub node: NodeId,
    pub kind: EventKind,
    /// Lineages in each deme just before the event, indexed by [`Deme::index`].
    pub lineages: [usize; 2],
}

impl TreeEvent {
    pub fn lineages_in(&self, deme: Deme) -> usize {
        self.lineages[deme.index()]
    }
}

/// Log density of a seedbank tree given a [`TransitionModel`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SeedbankTreeDensity {
    check_validity: bool,
}

impl SeedbankTreeDensity {
    /// With `check_validity`, trees modified since they were last marked clean are checked first
    /// and invalid ones get a density of zero.
    pub fn new(check_validity: bool) -> Self {
        Self { check_validity }
    }

    pub fn check_validity(&self) -> bool {
        self.check_validity
    }

    /// All events of the tree ordered from the tips to the root.
    ///
    /// The tree is walked from the root down, always taking the latest pending event among the
    /// open branches. Simultaneous events are taken in order of node id, so they end up in
    /// decreasing id order once reversed.
    pub fn event_sequence(tree: &SeedbankTree) -> Vec<TreeEvent> {
        let mut events = Vec::with_capacity(tree.node_count() + tree.total_change_count());

        // Open branches and the number of their changes not processed yet
        let mut open = IntMap::<NodeId, usize>::default();
        open.insert(tree.root(), 0);

        let mut lineages: [usize; 2] = [0; 2];
        lineages[tree.root_node().node_type().index()] = 1;

        while let Some((id, remaining, time)) = next_event(tree, &open) {
            let node = tree.node(id);
            let kind = if remaining > 0 {
                let index = remaining - 1;
                let to = node.change(index).deme;
                let from = match index {
                    0 => node.node_type(),
                    _ => node.change(index - 1).deme,
                };
                lineages[to.index()] = lineages[to.index()].saturating_sub(1);
                lineages[from.index()] += 1;
                open.insert(id, index);
                EventKind::Migrate { from, to }
            } else if node.is_leaf() {
                let deme = node.node_type();
                lineages[deme.index()] = lineages[deme.index()].saturating_sub(1);
                open.remove(&id);
                EventKind::Sample(deme)
            } else {
                let deme = node.node_type();
                lineages[deme.index()] += 1;
                open.remove(&id);
                for child in node.children() {
                    open.insert(child, tree.node(child).change_count());
                }
                EventKind::Coalesce(deme)
            };

            events.push(TreeEvent {
                time,
                node: id,
                kind,
                lineages,
            });
        }

        events.reverse();
        events
    }

    /// Log density of `tree`, recomputed from scratch.
    pub fn log_likelihood(&self, tree: &SeedbankTree, model: &TransitionModel) -> f64 {
        if self.check_validity && tree.is_dirty() && !tree.is_valid() {
            return f64::NEG_INFINITY;
        }

        let theta = Deme::ALL.map(|deme| model.theta(deme));
        let to_dormant = model.backward_rate(Deme::Active, Deme::Dormant);
        let to_active = model.backward_rate(Deme::Dormant, Deme::Active);

        let events = Self::event_sequence(tree);
        let mut log_p = 0.0;
        let mut last_time = events.first().map_or(0.0, |e| e.time);

        for event in &events {
            let dt = event.time - last_time;
            if dt > 0.0 {
                let k_a = event.lineages_in(Deme::Active) as f64;
                let k_d = event.lineages_in(Deme::Dormant) as f64;
                let mut rate = k_a * to_dormant + k_d * to_active;
                if k_a >= 2.0 {
                    rate += k_a * (k_a - 1.0) / (2.0 * theta[Deme::Active.index()]);
                }
                log_p -= dt * rate;
                if log_enabled!(Level::Trace) {
                    trace!("Interval of {dt} with {k_a} active and {k_d} dormant: {}", -dt * rate);
                }
            }

            let contribution = match event.kind {
                EventKind::Sample(_) => 0.0,
                // No coalescence without individuals
                EventKind::Coalesce(deme) if theta[deme.index()] <= 0.0 => {
                    return f64::NEG_INFINITY;
                }
                EventKind::Coalesce(deme) => -theta[deme.index()].ln(),
                EventKind::Migrate { from, to } => model.backward_rate(from, to).ln(),
            };
            log_p += contribution;
            if log_enabled!(Level::Trace) {
                trace!(
                    "{:?} of node {} at {}: {contribution}",
                    event.kind, event.node, event.time
                );
            }
            last_time = event.time;
        }

        log_p
    }
}

/// The open branch holding the latest pending event, with its remaining changes and the time.
fn next_event(tree: &SeedbankTree, open: &IntMap<NodeId, usize>) -> Option<(NodeId, usize, f64)> {
    open.iter()
        .map(|(&id, &remaining)| {
            let node = tree.node(id);
            let time = match remaining {
                0 => node.height(),
                _ => node.change(remaining - 1).time,
            };
            (id, remaining, time)
        })
        .max_by(|a, b| a.2.total_cmp(&b.2).then(b.0.cmp(&a.0)))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    // Heights: A 0, B 2, AB 4 with A dormant over (1, 3), root 6
    const TREE: &str = "((((A[&state=1]:1)[&state=0]:2)[&state=1]:1,B[&state=1]:2)[&state=1]:2,\
                        C[&state=1]:6)[&state=1]:0;";

    #[test]
    fn test_event_sequence() {
        let tree = SeedbankTree::from_newick(TREE, "state").unwrap();
        let events = SeedbankTreeDensity::event_sequence(&tree);

        let summary = events
            .iter()
            .map(|e| (e.time, e.node, e.kind, e.lineages))
            .collect::<Vec<_>>();
        let (a, d) = (Deme::Active, Deme::Dormant);
        assert_eq!(
            summary,
            vec![
                (0.0, 2, EventKind::Sample(a), [0, 0]),
                (0.0, 0, EventKind::Sample(a), [0, 1]),
                (1.0, 0, EventKind::Migrate { from: a, to: d }, [0, 2]),
                (2.0, 1, EventKind::Sample(a), [1, 1]),
                (3.0, 0, EventKind::Migrate { from: d, to: a }, [1, 2]),
                (4.0, 3, EventKind::Coalesce(a), [0, 3]),
                (6.0, 4, EventKind::Coalesce(a), [0, 2]),
            ]
        );
    }

    #[test]
    fn test_log_likelihood_by_hand() {
        let tree = SeedbankTree::from_newick(TREE, "state").unwrap();
        let model = TransitionModel::new(0.5, 2.0, 10.0).unwrap();
        let density = SeedbankTreeDensity::new(true);

        // theta_a = 20, theta_d = 10, active to dormant at 0.5, dormant to active at 1
        let intervals = [
            (1.0, 2.0, 0.0),
            (1.0, 1.0, 1.0),
            (1.0, 2.0, 1.0),
            (1.0, 3.0, 0.0),
            (2.0, 2.0, 0.0),
        ];
        let mut expected = 0.0;
        for (dt, k_a, k_d) in intervals {
            expected -= dt * (k_a * (k_a - 1.0) / 40.0 + k_a * 0.5 + k_d * 1.0);
        }
        expected += 0.5f64.ln() + 1.0f64.ln() + 2.0 * (1.0f64 / 20.0).ln();

        let log_p = density.log_likelihood(&tree, &model);
        assert!((log_p - expected).abs() < 1e-12, "{log_p} != {expected}");
        assert_eq!(log_p.to_bits(), density.log_likelihood(&tree, &model).to_bits());
    }

    #[test]
    fn test_invalid_tree() {
        let mut tree = SeedbankTree::from_newick(TREE, "state").unwrap();
        let model = TransitionModel::new(0.5, 2.0, 10.0).unwrap();
        tree.node_mut(1).set_height(5.0);

        let checked = SeedbankTreeDensity::new(true);
        assert_eq!(checked.log_likelihood(&tree, &model), f64::NEG_INFINITY);

        // A clean tree is trusted
        tree.mark_clean();
        assert!(checked.log_likelihood(&tree, &model).is_finite());

        tree.mark_dirty();
        let unchecked = SeedbankTreeDensity::new(false);
        assert!(unchecked.log_likelihood(&tree, &model) > f64::NEG_INFINITY);
    }

    #[test]
    fn test_single_leaf() {
        let tree = SeedbankTree::from_newick("A[&state=0]:0;", "state").unwrap();
        let model = TransitionModel::new(1.0, 1.0, 10.0).unwrap();
        let events = SeedbankTreeDensity::event_sequence(&tree);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Sample(Deme::Dormant));
        assert_eq!(
            SeedbankTreeDensity::new(true).log_likelihood(&tree, &model),
            0.0
        );
    }
}
