//! Dependency edges between schedule units.
use std::fmt;
use vsched_utils::{Contract, SchedError, SchedResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The destination consumes a value produced by the source.
    ValueDep,
    /// The destination is ordered after the source through memory.
    MemoryDep,
    /// The distance between source and destination is already decided.
    FixedTiming,
    /// The source belongs to an earlier loop iteration.
    LoopCarried,
}

/// A typed dependency carrying a latency and a loop distance.
///
/// A fixed-timing edge of latency `L` pins `slot(dst) - slot(src)` to exactly
/// `L`; every other kind only requires `slot(dst) - slot(src) >= L - D * II`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepEdge {
    kind: EdgeKind,
    latency: u32,
    distance: u32,
}

impl DepEdge {
    pub fn value(latency: u32) -> Self {
        Self {
            kind: EdgeKind::ValueDep,
            latency,
            distance: 0,
        }
    }

    pub fn memory(latency: u32, distance: u32) -> Self {
        Self {
            kind: EdgeKind::MemoryDep,
            latency,
            distance,
        }
    }

    pub fn fixed_timing(latency: u32) -> Self {
        Self {
            kind: EdgeKind::FixedTiming,
            latency,
            distance: 0,
        }
    }

    pub fn loop_carried(latency: u32, distance: u32) -> Self {
        Self {
            kind: EdgeKind::LoopCarried,
            latency,
            distance,
        }
    }

    pub fn kind(&self) -> EdgeKind {
        self.kind
    }

    pub fn latency(&self) -> u32 {
        self.latency
    }

    pub fn distance(&self) -> u32 {
        self.distance
    }

    pub fn set_latency(&mut self, latency: u32) {
        self.latency = latency;
    }

    pub fn is_fixed_timing(&self) -> bool {
        self.kind == EdgeKind::FixedTiming
    }

    /// Does the edge span loop iterations?
    pub fn is_loop_carried(&self) -> bool {
        self.distance > 0
    }

    /// The smallest legal `slot(dst) - slot(src)` once the loop repeats every
    /// `ii` cycles.
    pub fn min_offset(&self, ii: u32) -> i64 {
        self.latency as i64 - self.distance as i64 * ii as i64
    }
}

impl fmt::Display for DepEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            EdgeKind::ValueDep => "val",
            EdgeKind::MemoryDep => "mem",
            EdgeKind::FixedTiming => "fixed",
            EdgeKind::LoopCarried => "carried",
        };
        write!(f, "{kind}({}", self.latency)?;
        if self.distance > 0 {
            write!(f, ", d={}", self.distance)?;
        }
        write!(f, ")")
    }
}

/// All edges between one ordered pair of units, collapsed into the single
/// tightest one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeBundle {
    edge: DepEdge,
    cross_block: bool,
}

impl EdgeBundle {
    pub fn new(edge: DepEdge, cross_block: bool) -> Self {
        Self { edge, cross_block }
    }

    pub fn edge(&self) -> &DepEdge {
        &self.edge
    }

    pub fn edge_mut(&mut self) -> &mut DepEdge {
        &mut self.edge
    }

    pub fn is_cross_block(&self) -> bool {
        self.cross_block
    }

    /// Merge `new` into the bundle. A fixed-timing edge can never be combined
    /// with a different edge, and a pair carries at most one recurrence
    /// distance. Otherwise the edge with the larger latency wins, provided
    /// its distance is no larger than the current one.
    pub fn add_edge(&mut self, new: DepEdge) -> SchedResult<()> {
        let cur = self.edge;
        if cur == new {
            return Ok(());
        }

        if cur.is_fixed_timing() || new.is_fixed_timing() {
            return Err(SchedError::invariant(
                Contract::FixedTimingOverride,
                format!("cannot merge {new} into {cur}"),
            ));
        }

        if cur.distance != 0
            && new.distance != 0
            && cur.distance != new.distance
        {
            return Err(SchedError::invariant(
                Contract::ConflictingDistance,
                format!("cannot merge {new} into {cur}"),
            ));
        }

        if new.distance <= cur.distance && new.latency > cur.latency {
            self.edge = new;
        }
        Ok(())
    }
}
