//! # VSched scheduling passes
//!
//! The passes in this crate assign slots to the units of a
//! [vsched_ir::ScheduleGraph]. Each pass builds a system of difference
//! constraints ([analysis::ConstraintSystem]) and solves it for the earliest
//! or latest assignment:
//!
//! * [passes::ControlPathScheduling] places control units as soon as
//!   possible, honoring function-unit conflicts.
//! * [passes::DataPathScheduling] places data-path units, by default as late
//!   as possible, and decides which results need a register.
//! * [passes::IterativeModuloScheduling] pipelines self-looping blocks by
//!   searching for the smallest feasible initiation interval.
//!
//! [passes::Strategy] selects among them.
pub mod analysis;
pub mod passes;
