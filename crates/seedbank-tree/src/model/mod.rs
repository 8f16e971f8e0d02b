//! The two-state continuous-time Markov model of activity and dormancy.

pub mod matrix;

pub mod transition;
