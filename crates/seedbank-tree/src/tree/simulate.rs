use std::collections::VecDeque;

use rand::{Rng, distr::Distribution};
use rand_distr::Exp1;

use super::{NodeId, SeedbankTree, node::SeedbankNode};
use crate::{
    Deme,
    error::{Error, Result},
    model::transition::TransitionModel,
};

/// A sampled lineage, the leaf it becomes enters the process at `height` in `deme`.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafSample {
    pub label: String,
    pub deme: Deme,
    pub height: f64,
}

impl LeafSample {
    pub fn new(label: impl Into<String>, deme: Deme, height: f64) -> Self {
        Self {
            label: label.into(),
            deme,
            height,
        }
    }
}

/// Draws trees from the seedbank coalescent, see [`SeedbankTree::simulator`].
#[derive(Clone, Debug)]
pub struct Simulator {
    samples: Vec<LeafSample>,
}

impl SeedbankTree {
    /// Prepare a simulator for trees with the given leaves, in this order.
    pub fn simulator(samples: Vec<LeafSample>) -> Simulator {
        Simulator { samples }
    }
}

impl Simulator {
    pub fn samples(&self) -> &[LeafSample] {
        &self.samples
    }

    /// Simulate a typed tree backwards in time.
    ///
    /// Active lineages coalesce pairwise at rate `1 / theta` and switch deme at the backward
    /// rates of `model`. Samples join the process at their height. Leaves keep the order of the
    /// samples and internal nodes are numbered in order of creation.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        model: &TransitionModel,
        rng: &mut R,
    ) -> Result<SeedbankTree> {
        if self.samples.is_empty() {
            return Err(Error::NoSamples);
        }
        if let Some(sample) = self
            .samples
            .iter()
            .find(|s| !s.height.is_finite() || s.height < 0.0)
        {
            return Err(Error::InvalidSampleHeight {
                label: sample.label.clone(),
                height: sample.height,
            });
        }
        let theta = model.theta(Deme::Active);
        if theta <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "active_pop_size",
                value: model.active_pop_size(),
            });
        }
        let to_dormant = model.backward_rate(Deme::Active, Deme::Dormant);
        let to_active = model.backward_rate(Deme::Dormant, Deme::Active);

        let leaf_count = self.samples.len();
        let mut nodes = Vec::with_capacity(2 * leaf_count - 1);
        let mut waiting = [Vec::new(), Vec::new()];
        for (id, sample) in self.samples.iter().enumerate() {
            nodes.push(SeedbankNode::new(sample.height, sample.deme).with_label(&sample.label));
            waiting[sample.deme.index()].push(id);
        }
        let mut waiting = waiting.map(|mut ids| {
            ids.sort_by(|&a, &b| nodes[a].height.total_cmp(&nodes[b].height));
            VecDeque::from(ids)
        });
        let mut live: [Vec<NodeId>; 2] = [Vec::new(), Vec::new()];

        let mut t = 0.0;
        while live[0].len() + live[1].len() > 1 || waiting.iter().any(|w| !w.is_empty()) {
            let k_active = live[Deme::Active.index()].len();
            let k_dormant = live[Deme::Dormant.index()].len();
            let coalesce = if k_active > 1 {
                (k_active * (k_active - 1)) as f64 / (2.0 * theta)
            } else {
                0.0
            };
            let activate = k_dormant as f64 * to_active;
            let deactivate = k_active as f64 * to_dormant;
            let total = coalesce + activate + deactivate;

            let event_time = if total > 0.0 {
                let draw: f64 = Exp1.sample(rng);
                t + draw / total
            } else {
                f64::INFINITY
            };

            // Samples joining before the next event
            let next_sample = Deme::ALL
                .into_iter()
                .filter_map(|deme| {
                    let id = *waiting[deme.index()].front()?;
                    Some((deme, nodes[id].height))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((deme, height)) = next_sample {
                if height < event_time {
                    if let Some(id) = waiting[deme.index()].pop_front() {
                        live[deme.index()].push(id);
                    }
                    t = height;
                    continue;
                }
            }
            if total <= 0.0 {
                return Err(Error::SimulationStalled {
                    live: k_active + k_dormant,
                });
            }

            let mut u = rng.random::<f64>() * total;
            if u < coalesce {
                let active = &mut live[Deme::Active.index()];
                let i = rng.random_range(0..k_active);
                let mut j = rng.random_range(0..k_active - 1);
                if j >= i {
                    j += 1;
                }
                let (daughter, son) = (active[i], active[j]);

                let parent = nodes.len();
                let mut node = SeedbankNode::new(event_time, Deme::Active);
                node.children.add_child(daughter);
                node.children.add_child(son);
                nodes.push(node);
                nodes[daughter].parent = Some(parent);
                nodes[son].parent = Some(parent);

                active[i] = parent;
                active.swap_remove(j);
            } else {
                u -= coalesce;
                let (from, to) = if u < activate || deactivate <= 0.0 {
                    (Deme::Dormant, Deme::Active)
                } else {
                    (Deme::Active, Deme::Dormant)
                };
                let lineages = &mut live[from.index()];
                let k = rng.random_range(0..lineages.len());
                let id = lineages.swap_remove(k);
                nodes[id].add_change(to, event_time);
                live[to.index()].push(id);
            }
            t = event_time;
        }

        let Some(root) = live.iter().flatten().next().copied() else {
            return Err(Error::NoSamples);
        };
        nodes[root].clear_changes();
        Ok(SeedbankTree::from_arena(nodes, root, leaf_count))
    }
}
