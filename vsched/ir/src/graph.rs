use crate::edge::{DepEdge, EdgeKind};
use crate::op::{BlockId, FuncUnitId, InstPtr, OpRef};
use crate::unit::{ScheduleUnit, UnitIdx};
use linked_hash_map::LinkedHashMap;
use std::collections::HashMap;
use vsched_utils::{Contract, IndexRef, IndexedMap, SchedError, SchedResult};

/// The dependency graph of one basic block, or of a region composed of
/// several blocks.
///
/// Units live in an arena and name each other by [UnitIdx]. The first unit
/// is always the entry root of the entry block; once the graph is complete,
/// the last one is the virtual exit root.
#[derive(Debug, Clone)]
pub struct ScheduleGraph {
    entry_block: BlockId,
    entry_slot: u32,
    pub(crate) units: IndexedMap<UnitIdx, ScheduleUnit>,
    pub(crate) cp_units: Vec<UnitIdx>,
    pub(crate) dp_units: Vec<UnitIdx>,
    pub(crate) inst_to_unit: HashMap<InstPtr, UnitIdx>,
    /// Initiation interval of every pipelined block.
    pub(crate) ii_map: LinkedHashMap<BlockId, u32>,
    pub(crate) terminators: LinkedHashMap<BlockId, UnitIdx>,
    /// Terminator branching back to the entry block, if the block loops.
    loop_op: Option<UnitIdx>,
    pub(crate) exit_root: Option<UnitIdx>,
}

impl ScheduleGraph {
    pub fn new(entry_block: BlockId, entry_slot: u32) -> Self {
        let mut graph = Self {
            entry_block,
            entry_slot,
            units: IndexedMap::new(),
            cp_units: vec![],
            dp_units: vec![],
            inst_to_unit: HashMap::new(),
            ii_map: LinkedHashMap::new(),
            terminators: LinkedHashMap::new(),
            loop_op: None,
            exit_root: None,
        };
        graph.create_block_entry(entry_block);
        graph
    }

    pub fn entry_block(&self) -> BlockId {
        self.entry_block
    }

    pub fn entry_slot(&self) -> u32 {
        self.entry_slot
    }

    pub fn entry_root(&self) -> UnitIdx {
        UnitIdx::new(0)
    }

    pub fn exit_root(&self) -> Option<UnitIdx> {
        self.exit_root
    }

    /// Index the next created unit will receive.
    pub fn next_idx(&self) -> UnitIdx {
        self.units.peek_next_idx()
    }

    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    pub fn num_cps(&self) -> usize {
        self.cp_units.len()
    }

    pub fn num_dps(&self) -> usize {
        self.dp_units.len()
    }

    pub fn cp_units(&self) -> &[UnitIdx] {
        &self.cp_units
    }

    pub fn dp_units(&self) -> &[UnitIdx] {
        &self.dp_units
    }

    pub fn units(&self) -> impl Iterator<Item = &ScheduleUnit> {
        self.units.values()
    }

    pub fn get(&self, idx: UnitIdx) -> Option<&ScheduleUnit> {
        self.units.get(idx)
    }

    pub fn unit(&self, idx: UnitIdx) -> &ScheduleUnit {
        &self.units[idx]
    }

    pub fn unit_mut(&mut self, idx: UnitIdx) -> &mut ScheduleUnit {
        &mut self.units[idx]
    }

    pub fn lookup(&self, ptr: InstPtr) -> Option<UnitIdx> {
        self.inst_to_unit.get(&ptr).copied()
    }

    pub fn lookup_op(&self, op: OpRef) -> Option<UnitIdx> {
        self.lookup(InstPtr::Op(op))
    }

    fn check_unit(&self, idx: UnitIdx) -> SchedResult<()> {
        if self.units.contains(idx) {
            Ok(())
        } else {
            Err(SchedError::invariant(
                Contract::UnknownUnit,
                format!("[{idx}] is not part of the graph"),
            ))
        }
    }

    ///////////////// Construction //////////////////

    /// Create a unit for `ptr` and register it in the instruction map.
    pub fn create_unit(
        &mut self,
        ptr: InstPtr,
        block: BlockId,
        fu: FuncUnitId,
        control: bool,
        latency: u32,
    ) -> UnitIdx {
        let idx = self.units.peek_next_idx();
        self.units
            .push(ScheduleUnit::new(idx, ptr, block, fu, control, latency));
        self.inst_to_unit.insert(ptr, idx);
        if control {
            self.cp_units.push(idx);
        } else {
            self.dp_units.push(idx);
        }
        idx
    }

    /// Create the unit standing for the start of `block`.
    pub fn create_block_entry(&mut self, block: BlockId) -> UnitIdx {
        self.create_unit(
            InstPtr::Block(block),
            block,
            FuncUnitId::TRIVIAL,
            true,
            0,
        )
    }

    /// Create the virtual exit root. It is the last unit of the graph.
    pub fn create_exit_root(&mut self, block: BlockId) -> UnitIdx {
        let exit = self.create_unit(
            InstPtr::Exit(block),
            block,
            FuncUnitId::TRIVIAL,
            true,
            0,
        );
        self.exit_root = Some(exit);
        exit
    }

    /// Fuse `op` into `unit`, issuing `offset` cycles after the unit.
    pub fn fuse_instr(
        &mut self,
        unit: UnitIdx,
        op: OpRef,
        offset: u32,
    ) -> SchedResult<()> {
        self.check_unit(unit)?;
        self.units[unit].push_instr(InstPtr::Op(op), offset);
        self.inst_to_unit.insert(InstPtr::Op(op), unit);
        Ok(())
    }

    /// Make `dst` depend on `src` through `edge`, bundling it with any
    /// edge already present between the pair.
    pub fn add_dep(
        &mut self,
        dst: UnitIdx,
        src: UnitIdx,
        edge: DepEdge,
    ) -> SchedResult<()> {
        self.check_unit(dst)?;
        self.check_unit(src)?;
        let src_block = self.units[src].block();
        if self.units[dst].add_dep(src, src_block, edge)? {
            self.units[src].uses.insert(dst);
        }
        Ok(())
    }

    /// Drop the dependency of `dst` on `src`, keeping the use lists in sync.
    pub fn remove_dep(&mut self, dst: UnitIdx, src: UnitIdx) {
        if self.units[dst].remove_dep(src).is_some() {
            self.units[src].uses.remove(&dst);
        }
    }

    /// Detach `idx` from every unit it depends on or is used by.
    pub fn clean_dep_and_use(&mut self, idx: UnitIdx) {
        let deps = self.units[idx].deps().map(|(s, _)| s).collect::<Vec<_>>();
        for src in deps {
            self.units[src].uses.remove(&idx);
        }
        let uses = self.units[idx].uses().collect::<Vec<_>>();
        for user in uses {
            self.units[user].remove_dep(idx);
        }
        self.units[idx].clean_dep_and_use();
    }

    pub fn set_terminator(&mut self, block: BlockId, unit: UnitIdx) {
        self.units[unit].set_terminator();
        self.terminators.insert(block, unit);
    }

    pub fn terminator(&self, block: BlockId) -> Option<UnitIdx> {
        self.terminators.get(&block).copied()
    }

    pub fn terminators(&self) -> impl Iterator<Item = (BlockId, UnitIdx)> + '_ {
        self.terminators.iter().map(|(b, u)| (*b, *u))
    }

    pub fn set_phi(&mut self, unit: UnitIdx) {
        self.units[unit].set_phi();
    }

    /// Remember `unit` as the loop operation if it is a terminator branching
    /// back to the entry block.
    pub fn try_set_loop_op(
        &mut self,
        unit: UnitIdx,
        target: Option<BlockId>,
    ) -> bool {
        if !self.units[unit].is_terminator()
            || self.units[unit].block() != self.entry_block
            || target != Some(self.entry_block)
        {
            return false;
        }
        self.loop_op = Some(unit);
        true
    }

    pub fn loop_op(&self) -> Option<UnitIdx> {
        self.loop_op
    }

    /// Is the entry block a self loop that we try to pipeline?
    pub fn enable_pipeline(&self) -> bool {
        self.loop_op.is_some()
    }

    /// Schedule the loop as straight-line code from now on.
    pub fn disable_pipeline(&mut self) {
        self.loop_op = None;
    }

    pub fn ii(&self, block: BlockId) -> Option<u32> {
        self.ii_map.get(&block).copied()
    }

    /// Record the II of `block`; returns the previously recorded value.
    pub fn set_ii(&mut self, block: BlockId, ii: u32) -> Option<u32> {
        self.ii_map.insert(block, ii)
    }

    pub fn initiation_intervals(
        &self,
    ) -> impl Iterator<Item = (BlockId, u32)> + '_ {
        self.ii_map.iter().map(|(b, ii)| (*b, *ii))
    }

    ///////////////// Slots //////////////////

    /// The slot of the unit entering `block`.
    pub fn start_slot(&self, block: BlockId) -> Option<u32> {
        self.lookup(InstPtr::Block(block))
            .and_then(|u| self.units[u].slot())
    }

    /// The last slot any control unit of `block` occupies.
    pub fn end_slot(&self, block: BlockId) -> Option<u32> {
        self.cp_units
            .iter()
            .map(|u| &self.units[*u])
            .filter(|u| u.block() == block)
            .filter_map(|u| u.slot())
            .max()
    }

    /// Number of slots `block` spans.
    pub fn total_slot(&self, block: BlockId) -> Option<u32> {
        Some(self.end_slot(block)? - self.start_slot(block)?)
    }

    /// Clear the control-path schedule and pin the roots: the entry root to
    /// the entry slot and, when `mii` is given, the loop operation to
    /// `entry + mii`. PHI copies have to happen `mii` cycles before the block
    /// is left.
    pub fn reset_cp_schedule(&mut self, mii: u32) -> SchedResult<()> {
        for idx in self.cp_units.clone() {
            self.units[idx].reset_schedule();
        }
        let entry_slot = self.entry_slot;
        let entry = self.entry_root();
        self.units[entry].scheduled_to(entry_slot);

        if mii > 0 {
            let Some(loop_op) = self.loop_op else {
                return Err(SchedError::invariant(
                    Contract::MissingTerminator,
                    format!(
                        "II {mii} given but block#{} has no loop operation",
                        self.entry_block
                    ),
                ));
            };
            self.units[loop_op].scheduled_to(entry_slot + mii);
        }

        if let Some(exit) = self.exit_root {
            let phis = self.units[exit]
                .deps()
                .map(|(src, _)| src)
                .filter(|src| self.units[*src].is_phi())
                .collect::<Vec<_>>();
            for phi in phis {
                if let Some(bundle) = self.units[exit].dep_on_mut(phi) {
                    bundle.edge_mut().set_latency(mii);
                }
            }
        }
        Ok(())
    }

    /// Clear the data-path schedule together with everything derived from
    /// it.
    pub fn reset_dp_schedule(&mut self) {
        for idx in self.dp_units.clone() {
            let unit = &mut self.units[idx];
            unit.reset_schedule();
            unit.set_dangling(true);
        }
    }

    /// Clear the dangling flag of every unit of `root`'s block that `root`
    /// reaches through its dependencies.
    pub fn clear_dangling_flag_for_tree(&mut self, root: UnitIdx) {
        let root_block = self.units[root].block();
        self.units[root].set_dangling(false);
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            let children = self.units[idx]
                .deps()
                .map(|(src, _)| src)
                .collect::<Vec<_>>();
            for child in children {
                let unit = &mut self.units[child];
                if !unit.is_dangling() || unit.block() != root_block {
                    continue;
                }
                unit.set_dangling(false);
                stack.push(child);
            }
        }
    }

    /// Move every PHI unit of a pipelined block one II later, so that the
    /// incoming copy is read by the next iteration. The moved copy may not
    /// land past the end the block had before any PHI moved.
    pub fn fix_phi_schedules(&mut self) -> SchedResult<()> {
        let ends = self
            .ii_map
            .keys()
            .map(|b| (*b, self.end_slot(*b)))
            .collect::<HashMap<_, _>>();
        for idx in self.cp_units.clone() {
            let unit = &self.units[idx];
            if !unit.is_phi() {
                continue;
            }
            let block = unit.block();
            let Some(ii) = self.ii(block) else {
                continue;
            };
            let Some(slot) = unit.slot() else {
                return Err(SchedError::invariant(
                    Contract::UnscheduledUnit,
                    format!("PHI [{idx}] is not scheduled"),
                ));
            };
            let end = ends.get(&block).copied().flatten().unwrap_or(0);
            if slot + ii > end {
                return Err(SchedError::invariant(
                    Contract::PhiSlot,
                    format!(
                        "PHI [{idx}] would move to {} past the end of \
                         block#{block} ({end})",
                        slot + ii
                    ),
                ));
            }
            self.units[idx].scheduled_to(slot + ii);
        }
        Ok(())
    }

    ///////////////// Verification //////////////////

    /// Check the structural invariants of the graph.
    pub fn verify(&self) -> SchedResult<()> {
        let entry = self.entry_root();
        if self.units[entry].num_deps() != 0 {
            return Err(SchedError::invariant(
                Contract::EntryRootHasDeps,
                format!(
                    "[{entry}] depends on {} units",
                    self.units[entry].num_deps()
                ),
            ));
        }
        if let Some(exit) = self.exit_root {
            if self.units[exit].num_uses() != 0 {
                return Err(SchedError::invariant(
                    Contract::ExitRootHasUses,
                    format!(
                        "[{exit}] is used by {} units",
                        self.units[exit].num_uses()
                    ),
                ));
            }
        }

        for (idx, unit) in self.units.iter() {
            if unit.idx() != idx {
                return Err(SchedError::invariant(
                    Contract::IndexMismatch,
                    format!("unit [{}] stored at position {idx}", unit.idx()),
                ));
            }
        }

        for idx in &self.cp_units {
            self.verify_su(*idx)?;
        }
        Ok(())
    }

    fn verify_su(&self, idx: UnitIdx) -> SchedResult<()> {
        let unit = &self.units[idx];
        let is_block_entry = matches!(unit.representative(), InstPtr::Block(_));
        let mut any_dep_from_same_block = is_block_entry;

        for (src, bundle) in unit.deps() {
            let edge = bundle.edge();
            if edge.kind() == EdgeKind::ValueDep
                && !bundle.is_cross_block()
                && src >= idx
            {
                return Err(SchedError::invariant(
                    Contract::BadValueEdge,
                    format!("[{src}] -> [{idx}] {edge}"),
                ));
            }
            if is_block_entry
                && (!self.units[src].is_terminator() || edge.latency() != 0)
            {
                return Err(SchedError::invariant(
                    Contract::BadInterBlockEdge,
                    format!("[{src}] -> [{idx}] {edge}"),
                ));
            }
            any_dep_from_same_block |= self.units[src].block() == unit.block();
        }

        if !unit.is_scheduled()
            && unit.num_uses() == 0
            && Some(idx) != self.exit_root
        {
            return Err(SchedError::invariant(
                Contract::DetachedUnit,
                format!("[{idx}] has no uses"),
            ));
        }

        if !unit.is_scheduled()
            && !unit.has_fixed_timing()
            && !any_dep_from_same_block
        {
            return Err(SchedError::invariant(
                Contract::FloatingUnit,
                format!("[{idx}] is not constrained by block#{}", unit.block()),
            ));
        }
        Ok(())
    }
}
