//! # VSched
//!
//! Instruction scheduling for a hardware-synthesis backend. Given the
//! operations of a basic block and a latency oracle, VSched assigns every
//! operation a clock-cycle slot, decides which data-path values need a
//! register, and pipelines self-looping blocks with the smallest initiation
//! interval it can find.
//!
//! This crate plumbs the scheduler crates together: [`vsched_ir`] holds the
//! dependency graph, [`vsched_opt`] the scheduling passes and
//! [`vsched_utils`] the shared error and option types.
//!
//! ```rust
//! use vsched::{ir, schedule_block};
//! use vsched_utils::{SchedOptions, SchedResult};
//!
//! fn main() -> SchedResult<()> {
//!     let b0 = ir::BlockId(0);
//!     let mut ops = ir::OpTable::new();
//!     let mult = ir::FuncUnitId::new(ir::FuKind::Mult, 0);
//!     let mul =
//!         ops.push(ir::Operation::control("mul", b0, mult).with_steps(2));
//!     let br = ops.push(ir::Operation::branch(b0, ir::BlockId(1)));
//!     let mut info = ir::DetailLatencyInfo::from_ops(&ops);
//!     info.add_dep(mul, ir::DepInfo::live_in());
//!     info.add_dep(br, ir::DepInfo::value(mul, 2));
//!
//!     let block = ir::BasicBlock::new(b0, vec![mul, br]);
//!     let (_, schedule) =
//!         schedule_block(&ops, &info, &block, 1, &SchedOptions::default())?;
//!     assert_eq!(schedule.slot(br), Some(3));
//!     Ok(())
//! }
//! ```
mod driver;

pub use driver::{RegionScheduler, schedule_block, schedule_graph};
pub use vsched_ir as ir;
pub use vsched_opt as opt;
pub use vsched_utils as utils;
