/// Errors raised while setting up models and trees.
///
/// These are configuration failures, reported before any sampling starts.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Parameter `{name}` must be finite, got {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Invalid deme `{0}`, expected 0, 1, dormant or active")]
    InvalidDeme(String),

    #[error("Invalid operator configuration: {0}")]
    InvalidOperator(&'static str),

    #[error("At least one sample is needed to build a tree")]
    NoSamples,

    #[error("Sample `{label}` has invalid height {height}")]
    InvalidSampleHeight { label: String, height: f64 },

    #[error("Simulation stalled with {live} live lineages and no possible event")]
    SimulationStalled { live: usize },

    #[error("Newick error")]
    Newick(#[from] flat_newick::Error),

    #[error("Node `{node}` has no `{key}` annotation")]
    MissingAnnotation { node: String, key: String },

    #[error("Node `{node}` has {children} children, at most 2 are supported")]
    NonBinaryNode { node: String, children: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a proposal was rejected.
///
/// All of these are ordinary outcomes of a stochastic search and are handled by the caller as a
/// rejected move. The variants only exist for diagnostics.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("No valid type path exists between the branch endpoints")]
    NoValidPath,

    #[error("Transition probability out of range")]
    Numerical,

    #[error("Forward-backward sampling fell through all candidates")]
    FallThrough,

    #[error("Iteration cap exceeded while drawing virtual events")]
    IterationCap,

    #[error("Proposal produced an invalid tree")]
    InvalidTree,

    #[error("Proposal is not applicable to the current state")]
    NotApplicable,
}
