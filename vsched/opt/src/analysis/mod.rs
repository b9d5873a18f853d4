//! Analyses over schedule graphs.
//!
//! The analyses construct data-structures that the scheduling passes query:
//! the difference-constraint system they solve and the initiation-interval
//! bounds of loop blocks.

mod constraints;
mod mii;

pub use constraints::{ConstraintSystem, Term};
pub use mii::MiiAnalysis;
