#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Seedbank coalescent trees.
//!
//! A genealogy whose lineages switch between an active deme, where they may coalesce, and a
//! dormant deme (the seedbank), where they may not. This crate provides the typed tree, the
//! two-state transition model, the seedbank coalescent density of a typed tree and the
//! Metropolis-Hastings proposals that resample branch typings by uniformization.

use std::{fmt, str::FromStr};

mod util;

pub mod clock;
pub mod density;
pub mod error;
pub mod model;
pub mod operators;
pub mod tree;

pub mod prelude {
    pub use super::{
        Deme,
        clock::SeedbankClock,
        density::{EventKind, SeedbankTreeDensity, TreeEvent},
        error::{Error, RejectReason, Result},
        model::{matrix::Mat2, transition::TransitionModel},
        operators::{
            NodeSelection, Operator, OperatorContext,
            retype::{branch_type_prob, retype_branch},
        },
        tree::{
            LeafSample, NodeId, SeedbankTree, Violation,
            node::{SeedbankNode, TypeChange, TypeLengths},
        },
    };
}

/// The deme a lineage lives in.
///
/// The discriminants are the indices used for matrices and lineage counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "bitcode", derive(bitcode::Decode, bitcode::Encode))]
pub enum Deme {
    Dormant = 0,
    Active = 1,
}

impl Deme {
    pub const ALL: [Deme; 2] = [Deme::Dormant, Deme::Active];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Deme::Dormant),
            1 => Some(Deme::Active),
            _ => None,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Deme::Dormant => Deme::Active,
            Deme::Active => Deme::Dormant,
        }
    }
}

impl fmt::Display for Deme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

impl FromStr for Deme {
    type Err = error::Error;

    /// Accepts the index (`0`, `1`) or the name (`dormant`, `active`) in any case.
    fn from_str(s: &str) -> error::Result<Self> {
        let s = s.trim();
        if s == "0" || s.eq_ignore_ascii_case("dormant") {
            Ok(Deme::Dormant)
        } else if s == "1" || s.eq_ignore_ascii_case("active") {
            Ok(Deme::Active)
        } else {
            Err(error::Error::InvalidDeme(s.to_owned()))
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_deme_index() {
        for deme in Deme::ALL {
            assert_eq!(Deme::from_index(deme.index()), Some(deme));
            assert_ne!(deme.other(), deme);
            assert_eq!(deme.other().other(), deme);
        }
        assert_eq!(Deme::from_index(2), None);
    }

    #[test]
    fn test_deme_parse() {
        assert_eq!("0".parse::<Deme>().unwrap(), Deme::Dormant);
        assert_eq!("Active".parse::<Deme>().unwrap(), Deme::Active);
        assert_eq!(" DORMANT ".parse::<Deme>().unwrap(), Deme::Dormant);
        assert!(matches!(
            "2".parse::<Deme>(),
            Err(error::Error::InvalidDeme(s)) if s == "2"
        ));
        assert_eq!(Deme::Active.to_string(), "1");
    }
}
