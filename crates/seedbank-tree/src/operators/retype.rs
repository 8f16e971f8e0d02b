//! Resampling the deme history of a branch conditional on both of its ends.
//!
//! Uniformization turns the two-state process into a Poisson stream of virtual events at rate
//! `mu`, each one a jump drawn from `R = I + Q / mu` that may keep the current deme. The number of
//! virtual events is drawn conditional on the end deme, their demes are filled in by
//! forward-backward sampling, and virtual events that keep the deme are dropped.

use log::warn;
use rand::{Rng, distr::Distribution};

use crate::{
    Deme,
    error::RejectReason,
    model::transition::TransitionModel,
    tree::{NodeId, SeedbankTree, node::TypeChange},
    util::distributions::EventCount,
};

/// Terms of the conditional event count distribution evaluated before falling back to rejection
/// sampling when the powers of `R` never settle.
const MAX_EXACT_TERMS: usize = 10_000;

/// Poisson draws attempted by the rejection sampler before the move is abandoned.
const MAX_REJECTION_DRAWS: usize = 10_000;

/// Resample the changes on the branch above `node`, keeping the demes at both ends.
///
/// Returns the log density of the new history conditional on its ends.
pub fn retype_branch<R: Rng + ?Sized>(
    tree: &mut SeedbankTree,
    model: &mut TransitionModel,
    node: NodeId,
    rng: &mut R,
) -> Result<f64, RejectReason> {
    let branch = Branch::of(tree, node)?;
    let p_ba = branch.end_probability(model)?;
    let mu_l = model.mu() * branch.length();

    let n = draw_event_count(model, branch.start, branch.end, mu_l, p_ba, rng)?;

    let mut times = (0..n)
        .map(|_| branch.bottom + rng.random::<f64>() * branch.length())
        .collect::<Vec<_>>();
    times.sort_by(f64::total_cmp);

    let r = model.r();
    let mut prev = branch.start;
    let mut demes = Vec::with_capacity(n);
    for i in 1..=n {
        let total = model.rpow_n(n - i + 1).get(prev, branch.end);
        let mut u = rng.random::<f64>() * total;
        let mut next = None;
        for deme in Deme::ALL {
            u -= r.get(prev, deme) * model.rpow_n(n - i).get(deme, branch.end);
            if u < 0.0 {
                next = Some(deme);
                break;
            }
        }
        let Some(deme) = next else {
            let sum = Deme::ALL
                .into_iter()
                .map(|deme| r.get(prev, deme) * model.rpow_n(n - i).get(deme, branch.end))
                .sum::<f64>();
            warn!("Forward-backward sampling fell through ({total} against {sum}), move aborted");
            return Err(RejectReason::FallThrough);
        };
        demes.push(deme);
        prev = deme;
    }

    // Only virtual events changing the deme are real
    let mut changes = Vec::new();
    let mut prev = branch.start;
    for (deme, time) in demes.into_iter().zip(times) {
        if deme != prev {
            changes.push(TypeChange::new(deme, time));
            prev = deme;
        }
    }

    let log_prob = branch.path_log_density(model, &changes) - p_ba.ln();
    tree.node_mut(node).set_changes(changes);
    Ok(log_prob)
}

/// Log density of the current history above `node` conditional on its ends, the quantity
/// returned by [`retype_branch`] when it drew this history.
pub fn branch_type_prob(
    tree: &SeedbankTree,
    model: &mut TransitionModel,
    node: NodeId,
) -> Result<f64, RejectReason> {
    let branch = Branch::of(tree, node)?;
    let p_ba = branch.end_probability(model)?;
    Ok(branch.path_log_density(model, tree.node(node).changes()) - p_ba.ln())
}

/// Draw the number of virtual events on a branch conditional on its end deme.
///
/// The cumulative distribution is summed term by term until it passes a uniform draw. Once the
/// powers of `R` are steady the remaining terms are proportional to a Poisson tail, which is
/// sampled by rejection instead.
fn draw_event_count<R: Rng + ?Sized>(
    model: &mut TransitionModel,
    start: Deme,
    end: Deme,
    mu_l: f64,
    p_ba: f64,
    rng: &mut R,
) -> Result<usize, RejectReason> {
    let u = rng.random::<f64>();
    let log_mu_l = mu_l.ln();

    // log of exp(-mu L) (mu L)^n / n! / P(b | a)
    let mut log_weight = -mu_l - p_ba.ln();
    let mut cumulative = 0.0;
    let mut n = 0;
    loop {
        cumulative += (model.rpow_n(n).get(start, end).ln() + log_weight).exp();
        if cumulative > u {
            return Ok(n);
        }
        n += 1;
        log_weight += log_mu_l - (n as f64).ln();

        let steady = model.rpow_steady_index().is_some_and(|steady| n >= steady);
        if steady || n >= MAX_EXACT_TERMS {
            break;
        }
    }

    let threshold = n;
    let Some(poisson) = EventCount::new(mu_l) else {
        warn!("Cannot draw virtual events with mean {mu_l}, move aborted");
        return Err(RejectReason::Numerical);
    };
    for _ in 0..MAX_REJECTION_DRAWS {
        let n = poisson.sample(rng);
        if n >= threshold {
            return Ok(n);
        }
    }
    Err(RejectReason::IterationCap)
}

/// The ends of the branch above a node.
struct Branch {
    bottom: f64,
    top: f64,
    start: Deme,
    end: Deme,
}

impl Branch {
    fn of(tree: &SeedbankTree, node: NodeId) -> Result<Self, RejectReason> {
        let Some(parent) = tree.parent(node) else {
            return Err(RejectReason::NotApplicable);
        };
        let (node, parent) = (tree.node(node), tree.node(parent));
        Ok(Self {
            bottom: node.height(),
            top: parent.height(),
            start: node.node_type(),
            end: parent.node_type(),
        })
    }

    fn length(&self) -> f64 {
        self.top - self.bottom
    }

    /// `P(b | a)` over the branch, rejected when zero or out of range.
    fn end_probability(&self, model: &mut TransitionModel) -> Result<f64, RejectReason> {
        let p_ba = model
            .transition_probabilities(self.length())
            .get(self.start, self.end);
        if !(0.0..=1.0).contains(&p_ba) {
            warn!("Transition probability {p_ba} out of range, move aborted");
            return Err(RejectReason::Numerical);
        }
        if p_ba == 0.0 {
            return Err(RejectReason::NoValidPath);
        }
        Ok(p_ba)
    }

    /// Log density of a history given its start deme, without conditioning on the end.
    fn path_log_density(&self, model: &mut TransitionModel, changes: &[TypeChange]) -> f64 {
        let q = model.q();
        let mut log_p = 0.0;
        let mut prev = self.start;
        let mut prev_time = self.bottom;
        for change in changes {
            log_p += q.get(prev, prev) * (change.time - prev_time) + q.get(prev, change.deme).ln();
            prev = change.deme;
            prev_time = change.time;
        }
        log_p + q.get(prev, prev) * (self.top - prev_time)
    }
}
