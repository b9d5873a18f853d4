use crate::edge::{DepEdge, EdgeBundle};
use crate::op::{BlockId, FuncUnitId, InstPtr, OpRef};
use linked_hash_map::LinkedHashMap;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use vsched_utils::{Contract, SchedError, SchedResult, impl_index};

#[cfg(feature = "serialize")]
use serde::Serialize;

/// Index of a unit inside its [ScheduleGraph](crate::ScheduleGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitIdx(u32);
impl_index!(UnitIdx);

impl std::fmt::Display for UnitIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a data-path result is latched or passed on combinationally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub enum ValueClass {
    Register,
    Wire,
}

/// The atom of scheduling: one or more fused operations that issue together.
#[derive(Debug, Clone)]
pub struct ScheduleUnit {
    pub(crate) idx: UnitIdx,
    fu: FuncUnitId,
    control: bool,
    block: BlockId,
    /// Fused instructions with their latency relative to the first one.
    instrs: SmallVec<[(InstPtr, u32); 2]>,
    /// Steps the representative operation needs to finish.
    latency: u32,
    terminator: bool,
    phi: bool,
    /// The function unit holds the result only until the operation is done.
    write_until_finish: bool,
    pub(crate) deps: LinkedHashMap<UnitIdx, EdgeBundle>,
    pub(crate) uses: BTreeSet<UnitIdx>,
    slot: Option<u32>,
    dangling: bool,
    fixed_timing: bool,
    value_class: Option<ValueClass>,
}

impl ScheduleUnit {
    pub(crate) fn new(
        idx: UnitIdx,
        ptr: InstPtr,
        block: BlockId,
        fu: FuncUnitId,
        control: bool,
        latency: u32,
    ) -> Self {
        let mut instrs = SmallVec::new();
        instrs.push((ptr, 0));
        Self {
            idx,
            fu,
            control,
            block,
            instrs,
            latency,
            terminator: false,
            phi: false,
            write_until_finish: false,
            deps: LinkedHashMap::new(),
            uses: BTreeSet::new(),
            slot: None,
            dangling: true,
            fixed_timing: false,
            value_class: None,
        }
    }

    pub fn idx(&self) -> UnitIdx {
        self.idx
    }

    pub fn fu(&self) -> FuncUnitId {
        self.fu
    }

    pub fn is_control(&self) -> bool {
        self.control
    }

    pub fn is_datapath(&self) -> bool {
        !self.control
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn latency(&self) -> u32 {
        self.latency
    }

    pub fn is_terminator(&self) -> bool {
        self.terminator
    }

    pub fn is_phi(&self) -> bool {
        self.phi
    }

    pub(crate) fn set_terminator(&mut self) {
        self.terminator = true;
    }

    pub(crate) fn set_phi(&mut self) {
        self.phi = true;
    }

    pub fn write_until_finish(&self) -> bool {
        self.write_until_finish
    }

    pub(crate) fn set_write_until_finish(&mut self) {
        self.write_until_finish = true;
    }

    /// The instruction the unit was created for.
    pub fn representative(&self) -> InstPtr {
        self.instrs[0].0
    }

    /// The representative operation, unless this is a virtual root.
    pub fn op(&self) -> Option<OpRef> {
        self.representative().op()
    }

    pub fn instrs(&self) -> impl Iterator<Item = &(InstPtr, u32)> {
        self.instrs.iter()
    }

    pub fn num_instrs(&self) -> usize {
        self.instrs.len()
    }

    /// Fuse `ptr` into this unit, issuing `offset` cycles after the
    /// representative.
    pub(crate) fn push_instr(&mut self, ptr: InstPtr, offset: u32) {
        self.instrs.push((ptr, offset));
    }

    pub fn deps(&self) -> impl Iterator<Item = (UnitIdx, &EdgeBundle)> {
        self.deps.iter().map(|(k, v)| (*k, v))
    }

    pub fn num_deps(&self) -> usize {
        self.deps.len()
    }

    pub fn dep_on(&self, src: UnitIdx) -> Option<&EdgeBundle> {
        self.deps.get(&src)
    }

    pub(crate) fn dep_on_mut(
        &mut self,
        src: UnitIdx,
    ) -> Option<&mut EdgeBundle> {
        self.deps.get_mut(&src)
    }

    pub fn uses(&self) -> impl Iterator<Item = UnitIdx> + '_ {
        self.uses.iter().copied()
    }

    pub fn num_uses(&self) -> usize {
        self.uses.len()
    }

    /// Record `edge` from `src` on this unit. Returns whether a new bundle
    /// was created, in which case the caller has to register this unit as a
    /// use of `src`.
    pub(crate) fn add_dep(
        &mut self,
        src: UnitIdx,
        src_block: BlockId,
        edge: DepEdge,
    ) -> SchedResult<bool> {
        if src == self.idx {
            return Err(SchedError::invariant(
                Contract::SelfDependency,
                format!("[{}] cannot depend on itself", self.idx),
            ));
        }
        if let Some(bundle) = self.deps.get_mut(&src) {
            bundle.add_edge(edge).map_err(|e| match e {
                SchedError::Invariant { contract, msg } => {
                    SchedError::invariant(
                        contract,
                        format!("[{}] -> [{}]: {msg}", src, self.idx),
                    )
                }
                e => e,
            })?;
            return Ok(false);
        }
        let cross_block = src_block != self.block;
        self.deps.insert(src, EdgeBundle::new(edge, cross_block));
        Ok(true)
    }

    pub(crate) fn remove_dep(&mut self, src: UnitIdx) -> Option<EdgeBundle> {
        self.deps.remove(&src)
    }

    pub(crate) fn clean_dep_and_use(&mut self) {
        self.deps.clear();
        self.uses.clear();
    }

    pub fn slot(&self) -> Option<u32> {
        self.slot
    }

    pub fn is_scheduled(&self) -> bool {
        self.slot.is_some()
    }

    /// The slot in which the representative operation's result is final.
    pub fn fin_slot(&self) -> Option<u32> {
        self.slot.map(|s| s + self.latency)
    }

    pub fn scheduled_to(&mut self, slot: u32) {
        self.slot = Some(slot);
    }

    pub fn reset_schedule(&mut self) {
        self.slot = None;
    }

    pub fn is_dangling(&self) -> bool {
        self.dangling
    }

    pub fn set_dangling(&mut self, dangling: bool) {
        self.dangling = dangling;
    }

    pub fn has_fixed_timing(&self) -> bool {
        self.fixed_timing
    }

    pub(crate) fn set_fixed_timing(&mut self) {
        self.fixed_timing = true;
    }

    pub fn value_class(&self) -> Option<ValueClass> {
        self.value_class
    }

    pub fn set_value_class(&mut self, class: ValueClass) {
        self.value_class = Some(class);
    }

    /// Rename this unit and every unit it refers to through `map`.
    pub(crate) fn remap(&mut self, map: impl Fn(UnitIdx) -> UnitIdx) {
        self.idx = map(self.idx);
        self.deps = self
            .deps
            .iter()
            .map(|(k, v)| (map(*k), v.clone()))
            .collect();
        self.uses = self.uses.iter().map(|u| map(*u)).collect();
    }
}
