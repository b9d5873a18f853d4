//! Dependency-graph representation for the VSched operation scheduler.
//!
//! The front end hands over [Operation]s grouped into [BasicBlock]s, plus a
//! [LatencyOracle] describing how operations feed each other. The
//! [GraphBuilder] lowers them into a [ScheduleGraph]: an arena of
//! [ScheduleUnit]s linked by bundled [DepEdge]s, which the passes in
//! `vsched-opt` assign slots to.

// Modules defining internal structures.
mod builder;
mod compose;
mod edge;
mod graph;
mod op;
mod printer;
mod schedule;
mod unit;

pub use builder::GraphBuilder;
pub use edge::{DepEdge, EdgeBundle, EdgeKind};
pub use graph::ScheduleGraph;
pub use op::{
    BasicBlock, BlockId, DepInfo, DetailLatencyInfo, FuKind, FuncUnitId,
    InstPtr, LatencyOracle, OpRef, OpTable, Operation,
};
pub use printer::Printer;
pub use schedule::Schedule;
pub use unit::{ScheduleUnit, UnitIdx, ValueClass};
