#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Newick trees with `[&key=value]` annotations.
//!
//! Unlike most Newick readers, nodes with a single child are kept as they are. Typed tree
//! formats use such nodes to mark points along a branch (e.g. a change of state), so the tree is
//! stored "flat": one arena node per pair of parentheses or leaf, without any collapsing.

mod error;
mod parser;
mod tree;
mod writer;

pub use error::{Error, Result};
pub use tree::{FlatNode, FlatTree};

/// Bytes ending an unquoted label or a branch length.
pub(crate) const DELIMITERS: &[u8] = b"()[],:;";

pub mod prelude {
    pub use super::{FlatNode, FlatTree};
}
