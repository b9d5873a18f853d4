use super::control_path::{CpBounds, apply, build_system, fatal};
use super::linear_order::LinearOrder;
use crate::analysis::MiiAnalysis;
use vsched_ir::ScheduleGraph;
use vsched_utils::{Contract, Named, SchedError, SchedResult};

/// Pipelines a self-looping block.
///
/// The search keeps two monotone bounds: the initiation interval `mii` and
/// `critical_path_end`, the number of slots the block may span. Whenever a
/// schedule is infeasible one of them grows, until the search passes a
/// ceiling derived from the size of the graph.
pub struct IterativeModuloScheduling<'g> {
    graph: &'g mut ScheduleGraph,
    mii: u32,
    critical_path_end: u32,
    ceiling: u32,
}

impl Named for IterativeModuloScheduling<'_> {
    fn name() -> &'static str {
        "modulo"
    }

    fn description() -> &'static str {
        "Iterative modulo scheduling of self-looping blocks"
    }
}

impl<'g> IterativeModuloScheduling<'g> {
    /// Prepare the search, starting from the unconstrained critical path.
    pub fn new(graph: &'g mut ScheduleGraph) -> SchedResult<Self> {
        let block = graph.entry_block();
        if !graph.enable_pipeline() {
            return Err(SchedError::invariant(
                Contract::MissingTerminator,
                format!("block#{block} does not loop back on itself"),
            ));
        }
        let Some(exit) = graph.exit_root() else {
            return Err(SchedError::invariant(
                Contract::IndexMismatch,
                format!("graph of block#{block} has no exit root"),
            ));
        };
        graph.reset_cp_schedule(0)?;
        let bounds = CpBounds {
            pipelining: true,
            ..Default::default()
        };
        let slots = build_system(graph, &bounds).solve_asap().map_err(fatal)?;
        let entry_slot = graph.entry_slot();
        let exit_slot = slots
            .iter()
            .find(|(u, _)| *u == exit)
            .map_or(entry_slot, |(_, s)| *s);
        let critical_path_end = exit_slot.saturating_sub(entry_slot);

        let latencies = graph
            .units()
            .flat_map(|u| u.deps())
            .map(|(_, b)| b.edge().latency())
            .sum::<u32>();
        let ceiling =
            critical_path_end + latencies + graph.num_cps() as u32 + 1;
        log::debug!(
            "{}: block#{block} critical path {critical_path_end}, \
             ceiling {ceiling}",
            Self::name()
        );
        Ok(Self {
            graph,
            mii: 0,
            critical_path_end,
            ceiling,
        })
    }

    pub fn mii(&self) -> u32 {
        self.mii
    }

    pub fn critical_path_end(&self) -> u32 {
        self.critical_path_end
    }

    pub fn compute_mii(&mut self) {
        let block = self.graph.entry_block();
        self.mii = MiiAnalysis::compute(self.graph, block).mii();
        log::debug!("MII: {}", self.mii);
    }

    pub fn increase_mii(&mut self) {
        self.mii += 1;
        log::debug!("increase II to {}", self.mii);
    }

    pub fn lengthen_critical_path(&mut self) -> SchedResult<()> {
        self.critical_path_end += 1;
        if self.critical_path_end > self.ceiling {
            return Err(SchedError::SearchExhausted {
                block: self.graph.entry_block().0,
                ii: self.mii,
                critical_path: self.critical_path_end,
            });
        }
        log::debug!("lengthen critical path to {}", self.critical_path_end);
        Ok(())
    }

    fn try_schedule(&mut self, bounds: &CpBounds) -> SchedResult<bool> {
        match build_system(self.graph, bounds).solve_asap() {
            Ok(slots) => {
                apply(self.graph, &slots);
                Ok(true)
            }
            Err(err) if err.is_recoverable() => {
                log::trace!(
                    "II {} critical path {}: {err}",
                    self.mii,
                    self.critical_path_end
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Schedule under dependency constraints only, with the loop terminator
    /// pinned to `entry + mii` once an II is known.
    pub fn schedule_critical_path(&mut self) -> SchedResult<bool> {
        self.graph.reset_cp_schedule(self.mii)?;
        let bounds = CpBounds {
            pipelining: true,
            loop_ii: (self.mii > 0).then_some(self.mii),
            critical_path_end: Some(self.critical_path_end),
            ..Default::default()
        };
        self.try_schedule(&bounds)
    }

    /// Schedule with function units shared modulo the II.
    pub fn schedule_state(&mut self) -> SchedResult<bool> {
        if !self.schedule_critical_path()? {
            return Ok(false);
        }
        let order = LinearOrder::build(self.graph);
        self.graph.reset_cp_schedule(self.mii)?;
        let bounds = CpBounds {
            pipelining: true,
            loop_ii: Some(self.mii),
            critical_path_end: Some(self.critical_path_end),
            order: Some(&order),
            modulo_window: true,
        };
        self.try_schedule(&bounds)
    }

    /// Run the whole search and return the II the block was pipelined with.
    pub fn run(graph: &'g mut ScheduleGraph) -> SchedResult<u32> {
        let mut sched = Self::new(graph)?;
        while !sched.schedule_critical_path()? {
            sched.lengthen_critical_path()?;
        }

        sched.compute_mii();
        loop {
            while !sched.schedule_critical_path()? {
                // Keep the II well below the critical path length.
                if 2 * sched.mii < sched.critical_path_end {
                    sched.increase_mii();
                } else {
                    sched.lengthen_critical_path()?;
                }
            }
            if sched.schedule_state()? {
                break;
            }
            if sched.mii < sched.critical_path_end {
                sched.increase_mii();
            } else {
                sched.lengthen_critical_path()?;
            }
        }
        sched.finish()
    }

    fn finish(self) -> SchedResult<u32> {
        let graph = self.graph;
        let block = graph.entry_block();
        let expected = graph.entry_slot() + self.mii;
        let slot = graph.loop_op().and_then(|u| graph.unit(u).slot());
        let end = graph.end_slot(block).unwrap_or(0);
        if slot != Some(expected) || expected > end {
            return Err(SchedError::invariant(
                Contract::LoopOpSlot,
                format!(
                    "loop terminator of block#{block} at {slot:?}, \
                     expected {expected} within {end}"
                ),
            ));
        }
        graph.set_ii(block, self.mii);
        graph.fix_phi_schedules()?;
        log::info!(
            "block#{block} pipelined: II {}, {} slots",
            self.mii,
            graph.total_slot(block).unwrap_or(0)
        );
        Ok(self.mii)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsched_ir::{
        BlockId, DepEdge, FuKind, FuncUnitId, InstPtr, OpRef, UnitIdx,
    };
    use vsched_utils::IndexRef;

    fn op(i: usize) -> InstPtr {
        InstPtr::Op(OpRef::new(i))
    }

    /// a -> b with `lat`, b -> a carried over one iteration, terminator last.
    fn recurrence(
        lat: u32,
        back: u32,
        fu: FuncUnitId,
    ) -> (ScheduleGraph, UnitIdx, UnitIdx) {
        let b0 = BlockId(0);
        let mut g = ScheduleGraph::new(b0, 1);
        let a = g.create_unit(op(0), b0, fu, true, 1);
        let b = g.create_unit(op(1), b0, fu, true, 1);
        let br = g.create_unit(op(2), b0, FuncUnitId::TRIVIAL, true, 0);
        g.set_terminator(b0, br);
        assert!(g.try_set_loop_op(br, Some(b0)));
        g.add_dep(a, g.entry_root(), DepEdge::value(0)).unwrap();
        g.add_dep(b, a, DepEdge::value(lat)).unwrap();
        g.add_dep(a, b, DepEdge::loop_carried(back, 1)).unwrap();
        g.add_dep(br, b, DepEdge::value(1)).unwrap();
        let exit = g.create_exit_root(b0);
        g.add_dep(exit, br, DepEdge::value(0)).unwrap();
        (g, a, b)
    }

    #[test]
    fn recurrence_sets_ii() {
        let (mut g, a, b) = recurrence(3, 2, FuncUnitId::TRIVIAL);
        let ii = IterativeModuloScheduling::run(&mut g).unwrap();
        assert_eq!(ii, 5);
        assert_eq!(g.ii(BlockId(0)), Some(5));
        let (sa, sb) = (g.unit(a).slot().unwrap(), g.unit(b).slot().unwrap());
        assert!(sb >= sa + 3);
        assert!(sa + 5 >= sb + 2);
        assert_eq!(g.unit(g.loop_op().unwrap()).slot(), Some(6));
        assert!(ii <= g.total_slot(BlockId(0)).unwrap());
    }

    #[test]
    fn shared_unit_fits_one_window() {
        let mult = FuncUnitId::new(FuKind::Mult, 0);
        let (mut g, a, b) = recurrence(1, 0, mult);
        let ii = IterativeModuloScheduling::run(&mut g).unwrap();
        assert!(ii >= 2);
        let (sa, sb) = (g.unit(a).slot().unwrap(), g.unit(b).slot().unwrap());
        assert_ne!(sa % ii, sb % ii);
    }

    #[test]
    fn straight_line_block_is_rejected() {
        let b0 = BlockId(0);
        let mut g = ScheduleGraph::new(b0, 1);
        let err = IterativeModuloScheduling::new(&mut g).err().unwrap();
        assert_eq!(err.contract(), Some(Contract::MissingTerminator));
    }

    #[test]
    fn ceiling_raises_search_exhausted() {
        let (mut g, ..) = recurrence(1, 0, FuncUnitId::TRIVIAL);
        let mut sched = IterativeModuloScheduling::new(&mut g).unwrap();
        let err = loop {
            if let Err(err) = sched.lengthen_critical_path() {
                break err;
            }
        };
        assert!(matches!(err, SchedError::SearchExhausted { block: 0, .. }));
        assert!(err.is_recoverable());
    }
}
