//! Driver for the VSched scheduler.
use itertools::Itertools;
use vsched_ir::{
    BasicBlock, GraphBuilder, LatencyOracle, OpTable, Schedule, ScheduleGraph,
};
use vsched_opt::passes::Strategy;
use vsched_utils::{Contract, SchedError, SchedOptions, SchedResult};

/// Bring a freshly built graph to a complete schedule.
///
/// Self-looping blocks are pipelined first. When the modulo search gives up,
/// the loop is scheduled as straight-line code instead.
pub fn schedule_graph(
    graph: &mut ScheduleGraph,
    opts: &SchedOptions,
) -> SchedResult<()> {
    graph.verify()?;
    for strategy in Strategy::plan(graph) {
        match strategy {
            Strategy::Modulo => match strategy.run(graph, opts) {
                Ok(()) => {}
                Err(err @ SchedError::SearchExhausted { .. }) => {
                    log::warn!("{err}; scheduling the loop without pipelining");
                    graph.disable_pipeline();
                    graph.reset_cp_schedule(0)?;
                    Strategy::ControlPath.run(graph, opts)?;
                }
                Err(err) => return Err(err),
            },
            Strategy::ControlPath => {
                graph.reset_cp_schedule(0)?;
                strategy.run(graph, opts)?;
            }
            Strategy::DataPath => strategy.run(graph, opts)?,
        }
    }
    Ok(())
}

/// Lower, schedule and report a single basic block.
pub fn schedule_block(
    ops: &OpTable,
    oracle: &dyn LatencyOracle,
    block: &BasicBlock,
    entry_slot: u32,
    opts: &SchedOptions,
) -> SchedResult<(ScheduleGraph, Schedule)> {
    let mut graph = GraphBuilder::build_block(ops, oracle, block, entry_slot)?;
    schedule_graph(&mut graph, opts)?;
    let schedule = Schedule::from_graph(&graph)?;
    Ok((graph, schedule))
}

/// Schedules a sequence of blocks as one region.
///
/// Straight-line blocks are lowered into the region graph directly. A block
/// that loops back on itself is scheduled, and possibly pipelined, in a
/// graph of its own first; its schedule is then frozen into the region
/// graph.
pub struct RegionScheduler<'a> {
    ops: &'a OpTable,
    oracle: &'a dyn LatencyOracle,
    opts: SchedOptions,
    entry_slot: u32,
}

impl<'a> RegionScheduler<'a> {
    pub fn new(
        ops: &'a OpTable,
        oracle: &'a dyn LatencyOracle,
        opts: SchedOptions,
    ) -> Self {
        Self {
            ops,
            oracle,
            opts,
            entry_slot: 1,
        }
    }

    pub fn with_entry_slot(mut self, entry_slot: u32) -> Self {
        self.entry_slot = entry_slot;
        self
    }

    fn is_self_loop(&self, block: &BasicBlock) -> bool {
        block.ops.iter().any(|op| {
            let op = &self.ops[*op];
            op.terminator && op.branch_target == Some(block.id)
        })
    }

    pub fn schedule(
        &self,
        blocks: &[BasicBlock],
    ) -> SchedResult<(ScheduleGraph, Schedule)> {
        let Some(first) = blocks.first() else {
            return Err(SchedError::invariant(
                Contract::UnknownUnit,
                "cannot schedule an empty region",
            ));
        };
        let mut builder =
            GraphBuilder::new(self.ops, self.oracle, first.id, self.entry_slot);
        for block in blocks {
            if self.is_self_loop(block) {
                let mut sub = GraphBuilder::build_block(
                    self.ops,
                    self.oracle,
                    block,
                    self.entry_slot,
                )?;
                schedule_graph(&mut sub, &self.opts)?;
                builder.merge_subgraph(sub)?;
            } else {
                builder.lower_block(block)?;
            }
        }
        let mut graph = builder.finish()?;
        schedule_graph(&mut graph, &self.opts)?;
        let schedule = Schedule::from_graph(&graph)?;
        log::info!(
            "scheduled region {} in {} slots",
            blocks.iter().map(|b| format!("block#{}", b.id)).join(", "),
            graph
                .exit_root()
                .and_then(|e| graph.unit(e).slot())
                .map_or(0, |s| s.saturating_sub(self.entry_slot))
        );
        Ok((graph, schedule))
    }
}
