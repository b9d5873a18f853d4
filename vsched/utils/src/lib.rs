//! Shared utilities for the VSched scheduler crates.
mod errors;
mod idx;
mod opts;

pub use errors::{Contract, SchedError, SchedResult};
pub use idx::{IndexRef, IndexedMap};
pub use opts::{Named, ParseVal, PassOpt, SchedOptions};
