use super::matrix::Mat2;
use crate::{
    Deme,
    error::{Error, Result},
};

/// Powers of the uniformized matrix are compared for convergence every this many steps.
const STEADY_CHECK_INTERVAL: usize = 10;

/// Transition model between the active and the dormant deme.
///
/// Parameterised by the transition rate `c`, the relative seedbank size `K` (active to dormant
/// ratio) and the active population size `N`. In backward time, an active lineage becomes
/// dormant at rate `c` and a dormant lineage becomes active at rate `c K`.
///
/// The generator `Q`, the uniformization constant `mu`, the uniformized matrix `R = I + Q / mu`
/// and the cache of its powers are derived lazily: changing a parameter only marks the model
/// dirty, and the matrices are rebuilt on the next access.
#[derive(Clone, Debug)]
pub struct TransitionModel {
    transition_rate: f64,
    relative_seedbank_size: f64,
    active_pop_size: f64,
    ploidy: f64,

    dirty: bool,
    q: Mat2,
    r: Mat2,
    mu: f64,
    rpow: Vec<Mat2>,
    rpow_steady: Option<usize>,
}

impl TransitionModel {
    /// Create a model with ploidy 2.
    ///
    /// Negative values are clamped to zero, non-finite values are rejected.
    pub fn new(
        transition_rate: f64,
        relative_seedbank_size: f64,
        active_pop_size: f64,
    ) -> Result<Self> {
        Ok(Self {
            transition_rate: checked("transition_rate", transition_rate)?,
            relative_seedbank_size: checked("relative_seedbank_size", relative_seedbank_size)?,
            active_pop_size: checked("active_pop_size", active_pop_size)?,
            ploidy: 2.0,
            dirty: true,
            q: Mat2::default(),
            r: Mat2::IDENTITY,
            mu: 0.0,
            rpow: Vec::new(),
            rpow_steady: None,
        })
    }

    /// Set the ploidy used to scale population sizes into coalescent time.
    pub fn with_ploidy(mut self, ploidy: f64) -> Result<Self> {
        self.ploidy = checked("ploidy", ploidy)?;
        Ok(self)
    }

    pub fn transition_rate(&self) -> f64 {
        self.transition_rate
    }

    pub fn relative_seedbank_size(&self) -> f64 {
        self.relative_seedbank_size
    }

    pub fn active_pop_size(&self) -> f64 {
        self.active_pop_size
    }

    pub fn ploidy(&self) -> f64 {
        self.ploidy
    }

    pub fn set_transition_rate(&mut self, value: f64) -> Result<()> {
        self.transition_rate = checked("transition_rate", value)?;
        self.dirty = true;
        Ok(())
    }

    pub fn set_relative_seedbank_size(&mut self, value: f64) -> Result<()> {
        self.relative_seedbank_size = checked("relative_seedbank_size", value)?;
        self.dirty = true;
        Ok(())
    }

    /// The active size does not enter the matrices, so the cache is kept.
    pub fn set_active_pop_size(&mut self, value: f64) -> Result<()> {
        self.active_pop_size = checked("active_pop_size", value)?;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Backward-time rate of a lineage in `from` switching to `to`.
    pub fn backward_rate(&self, from: Deme, to: Deme) -> f64 {
        match (from, to) {
            (Deme::Active, Deme::Dormant) => self.transition_rate,
            (Deme::Dormant, Deme::Active) => self.transition_rate * self.relative_seedbank_size,
            _ => 0.0,
        }
    }

    /// Effective population size of a deme, the dormant one being `K` times smaller.
    pub fn pop_size(&self, deme: Deme) -> f64 {
        match deme {
            Deme::Active => self.active_pop_size,
            Deme::Dormant => self.active_pop_size / self.relative_seedbank_size,
        }
    }

    /// Population size scaled by ploidy, i.e. the pair coalescence time scale.
    pub fn theta(&self, deme: Deme) -> f64 {
        self.ploidy * self.pop_size(deme)
    }

    /// Rebuild `Q`, `mu`, `R` and reset the power cache if any rate has changed.
    pub fn update_matrices(&mut self) {
        if !self.dirty {
            return;
        }

        let to_active = self.backward_rate(Deme::Dormant, Deme::Active);
        let to_dormant = self.backward_rate(Deme::Active, Deme::Dormant);
        self.q = Mat2([[-to_active, to_active], [to_dormant, -to_dormant]]);
        self.mu = to_active.max(to_dormant);
        self.r = if self.mu > 0.0 {
            let scaled = self.q.scale(1.0 / self.mu);
            Mat2([
                [1.0 + scaled[0][0], scaled[0][1]],
                [scaled[1][0], 1.0 + scaled[1][1]],
            ])
        } else {
            Mat2::IDENTITY
        };

        self.rpow.clear();
        self.rpow.push(Mat2::IDENTITY);
        self.rpow_steady = None;
        self.dirty = false;
    }

    /// Instantaneous rate matrix, rows indexed by the starting deme.
    pub fn q(&mut self) -> Mat2 {
        self.update_matrices();
        self.q
    }

    /// Uniformized transition matrix `I + Q / mu`.
    pub fn r(&mut self) -> Mat2 {
        self.update_matrices();
        self.r
    }

    /// Uniformization rate, the largest total outflow rate of any deme.
    pub fn mu(&mut self) -> f64 {
        self.update_matrices();
        self.mu
    }

    /// `R^n`, extending the cache as needed.
    ///
    /// Powers converge for most parameters. Once two consecutive powers are identical at machine
    /// precision the index is latched, and all larger powers return the latched matrix.
    pub fn rpow_n(&mut self, n: usize) -> Mat2 {
        self.update_matrices();

        if let Some(steady) = self.rpow_steady {
            return self.rpow[n.min(steady)];
        }

        while self.rpow.len() <= n {
            let i = self.rpow.len();
            let next = self.rpow[i - 1] * self.r;
            self.rpow.push(next);

            if i % STEADY_CHECK_INTERVAL == 0
                && next.max_abs_diff(&self.rpow[i - 1]) < f64::MIN_POSITIVE
            {
                self.rpow_steady = Some(i);
                return self.rpow[n.min(i)];
            }
        }

        self.rpow[n]
    }

    /// Index beyond which `R^n` no longer changes, if detected yet.
    pub fn rpow_steady_index(&self) -> Option<usize> {
        self.rpow_steady
    }

    /// Number of cached powers of `R`, including the identity.
    pub fn cached_powers(&self) -> usize {
        self.rpow.len()
    }

    /// `exp(Q t)`, the probability of ending in each deme after time `t`.
    pub fn transition_probabilities(&mut self, t: f64) -> Mat2 {
        self.q().generator_exp(t)
    }
}

/// Reject non-finite parameters and clamp negative ones to zero.
pub(crate) fn checked(name: &'static str, value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(Error::InvalidParameter { name, value });
    }
    if value < 0.0 {
        log::warn!("Parameter `{name}` is negative ({value}), clamped to zero");
        return Ok(0.0);
    }
    Ok(value)
}
