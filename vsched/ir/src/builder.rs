//! Lowering of basic blocks into a [ScheduleGraph].
use crate::edge::DepEdge;
use crate::graph::ScheduleGraph;
use crate::op::{BasicBlock, BlockId, DepInfo, InstPtr, LatencyOracle, OpTable};
use crate::unit::UnitIdx;
use itertools::Itertools;
use vsched_utils::{Contract, SchedError, SchedResult};

/// Builds a [ScheduleGraph] from blocks of operations, one block at a time.
///
/// Blocks are chained in the order they are lowered or merged: the entry of
/// every block after the first depends on the terminator of the one before.
pub struct GraphBuilder<'a> {
    ops: &'a OpTable,
    oracle: &'a dyn LatencyOracle,
    graph: ScheduleGraph,
    /// Terminator of the block lowered last.
    last_terminator: Option<UnitIdx>,
    last_block: BlockId,
    /// Has the entry root already been claimed by a block?
    entry_used: bool,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        ops: &'a OpTable,
        oracle: &'a dyn LatencyOracle,
        entry_block: BlockId,
        entry_slot: u32,
    ) -> Self {
        Self {
            ops,
            oracle,
            graph: ScheduleGraph::new(entry_block, entry_slot),
            last_terminator: None,
            last_block: entry_block,
            entry_used: false,
        }
    }

    /// Lower a single block and complete its graph.
    pub fn build_block(
        ops: &'a OpTable,
        oracle: &'a dyn LatencyOracle,
        block: &BasicBlock,
        entry_slot: u32,
    ) -> SchedResult<ScheduleGraph> {
        let mut builder = Self::new(ops, oracle, block.id, entry_slot);
        builder.lower_block(block)?;
        builder.finish()
    }

    pub fn graph(&self) -> &ScheduleGraph {
        &self.graph
    }

    /// The unit standing for the start of `block`, chained after the
    /// previously lowered block.
    fn enter_block(&mut self, block: BlockId) -> SchedResult<UnitIdx> {
        if !self.entry_used && block == self.graph.entry_block() {
            self.entry_used = true;
            return Ok(self.graph.entry_root());
        }
        self.entry_used = true;
        let entry = self.graph.create_block_entry(block);
        self.chain(entry)?;
        Ok(entry)
    }

    fn chain(&mut self, entry: UnitIdx) -> SchedResult<()> {
        if let Some(prev) = self.last_terminator {
            self.graph.add_dep(entry, prev, DepEdge::value(0))?;
        }
        Ok(())
    }

    fn lower_edge(dep: &DepInfo) -> DepEdge {
        if dep.memory {
            DepEdge::memory(dep.latency, dep.distance)
        } else if dep.distance > 0 {
            DepEdge::loop_carried(dep.latency, dep.distance)
        } else {
            DepEdge::value(dep.latency)
        }
    }

    /// Create the units of `block` and attach their dependencies.
    pub fn lower_block(&mut self, block: &BasicBlock) -> SchedResult<()> {
        let (ops, oracle) = (self.ops, self.oracle);
        let entry = self.enter_block(block.id)?;

        let (body, terms): (Vec<_>, Vec<_>) = block
            .ops
            .iter()
            .copied()
            .partition(|op| !ops[*op].terminator);

        let mut created = Vec::with_capacity(block.ops.len());
        for op in body.into_iter().chain(terms) {
            let info = &ops[op];
            let control = !info.datapath || info.terminator || info.phi;
            let unit = self.graph.create_unit(
                InstPtr::Op(op),
                block.id,
                info.fu,
                control,
                oracle.steps_to_finish(op),
            );
            if info.phi {
                self.graph.set_phi(unit);
            }
            if info.write_until_finish {
                self.graph.unit_mut(unit).set_write_until_finish();
            }
            if info.terminator {
                self.graph.set_terminator(block.id, unit);
                if self.graph.try_set_loop_op(unit, info.branch_target) {
                    log::debug!("block#{} loops back on itself", block.id);
                }
            }
            created.push((op, unit));
        }

        for (op, unit) in &created {
            let deps = oracle.deps(*op).ok_or_else(|| {
                SchedError::invariant(
                    Contract::MissingLatencyInfo,
                    format!("no dependencies recorded for {op:?}"),
                )
            })?;
            for dep in deps {
                let src = dep.src.and_then(|s| self.graph.lookup_op(s));
                match src {
                    Some(src) => {
                        self.graph.add_dep(*unit, src, Self::lower_edge(dep))?
                    }
                    // Produced outside of the graph: available at block entry.
                    None => {
                        self.graph.add_dep(*unit, entry, DepEdge::value(0))?
                    }
                }
            }
        }

        // Loop-carried edges do not order units within one iteration.
        for (_, unit) in &created {
            let has_local_dep =
                self.graph.unit(*unit).deps().any(|(src, bundle)| {
                    self.graph.unit(src).block() == block.id
                        && !bundle.edge().is_loop_carried()
                });
            if !has_local_dep {
                self.graph.add_dep(*unit, entry, DepEdge::value(0))?;
            }
        }

        log::trace!(
            "lowered block#{}: {}",
            block.id,
            created.iter().map(|(_, u)| u).join(", ")
        );
        self.last_terminator = self.graph.terminator(block.id);
        self.last_block = block.id;
        Ok(())
    }

    /// Fold the already scheduled graph of a block into the graph being
    /// built and chain it after the previous block.
    ///
    /// A sub-graph of the entry block takes over the entry root.
    pub fn merge_subgraph(&mut self, sub: ScheduleGraph) -> SchedResult<()> {
        let block = sub.entry_block();
        if !self.entry_used && block == self.graph.entry_block() {
            let root = self.graph.entry_root();
            self.graph.merge_subgraph_onto(sub, root)?;
        } else {
            let entry = self.graph.merge_subgraph(sub)?;
            self.chain(entry)?;
        }
        self.entry_used = true;
        self.last_terminator = self.graph.terminator(block);
        self.last_block = block;
        Ok(())
    }

    /// Create the exit root and check the finished graph.
    ///
    /// The exit root waits for every control unit nothing else waits for,
    /// and for every PHI unit.
    pub fn finish(mut self) -> SchedResult<ScheduleGraph> {
        let sinks = self
            .graph
            .cp_units()
            .iter()
            .copied()
            .filter(|u| {
                let unit = self.graph.unit(*u);
                unit.num_uses() == 0 || unit.is_phi()
            })
            .collect::<Vec<_>>();
        let exit = self.graph.create_exit_root(self.last_block);
        for sink in sinks {
            let unit = self.graph.unit(sink);
            let latency = if unit.num_uses() == 0 {
                unit.latency()
            } else {
                0
            };
            self.graph.add_dep(exit, sink, DepEdge::value(latency))?;
        }
        self.graph.verify()?;
        Ok(self.graph)
    }
}
