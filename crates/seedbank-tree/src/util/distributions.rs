use rand::{Rng, distr::Distribution};

/// A Poisson distribution sampler using Knuth's algorithm.
///
/// This is only suitable for small lambda values (lambda < 30.0).
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PoissonKnuth {
    exp_lambda: f64,
}

impl PoissonKnuth {
    /// Returns None if lambda is not positive or too large (lambda >= 30.0).
    pub(crate) fn new(lambda: f64) -> Option<Self> {
        if 0.0 < lambda && lambda < 30.0 {
            let exp_lambda = (-lambda).exp();
            Some(Self { exp_lambda })
        } else {
            None
        }
    }
}

impl Distribution<usize> for PoissonKnuth {
    fn sample<G: Rng + ?Sized>(&self, rng: &mut G) -> usize {
        let mut k = 0;
        let mut p = 1.0;
        while p > self.exp_lambda {
            k += 1;
            p *= rng.random::<f64>();
        }
        k - 1
    }
}

/// Number of virtual events on a branch, `Poisson(mu L)`.
///
/// Branches are usually short compared to the transition rates, so the Knuth sampler covers most
/// draws and `rand_distr` takes over for long branches.
#[derive(Clone, Debug)]
pub(crate) enum EventCount {
    Knuth(PoissonKnuth),
    Large(rand_distr::Poisson<f64>),
}

impl EventCount {
    /// Returns None if lambda is not positive and finite.
    pub(crate) fn new(lambda: f64) -> Option<Self> {
        match PoissonKnuth::new(lambda) {
            Some(knuth) => Some(Self::Knuth(knuth)),
            None => rand_distr::Poisson::new(lambda).ok().map(Self::Large),
        }
    }
}

impl Distribution<usize> for EventCount {
    fn sample<G: Rng + ?Sized>(&self, rng: &mut G) -> usize {
        match self {
            Self::Knuth(knuth) => knuth.sample(rng),
            Self::Large(poisson) => poisson.sample(rng) as usize,
        }
    }
}
