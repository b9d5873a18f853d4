//! The result handed to code emission.
use crate::graph::ScheduleGraph;
use crate::op::{BlockId, InstPtr, OpRef};
use crate::unit::ValueClass;
use std::collections::BTreeMap;
use vsched_utils::{Contract, SchedError, SchedResult};

#[cfg(feature = "serialize")]
use serde::Serialize;

/// Final slots, initiation intervals and register/wire decisions of a
/// scheduled graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct Schedule {
    pub slots: BTreeMap<OpRef, u32>,
    pub initiation_intervals: BTreeMap<BlockId, u32>,
    pub value_classes: BTreeMap<OpRef, ValueClass>,
}

impl Schedule {
    /// Collect the schedule of `graph`. Every unit must carry a slot.
    pub fn from_graph(graph: &ScheduleGraph) -> SchedResult<Self> {
        let mut schedule = Schedule::default();
        for unit in graph.units() {
            let Some(slot) = unit.slot() else {
                return Err(SchedError::invariant(
                    Contract::UnscheduledUnit,
                    format!("[{}] of block#{}", unit.idx(), unit.block()),
                ));
            };
            for (ptr, offset) in unit.instrs() {
                let InstPtr::Op(op) = ptr else {
                    continue;
                };
                schedule.slots.insert(*op, slot + offset);
                if let Some(class) = unit.value_class() {
                    schedule.value_classes.insert(*op, class);
                }
            }
        }
        schedule.initiation_intervals = graph.initiation_intervals().collect();
        Ok(schedule)
    }

    pub fn slot(&self, op: OpRef) -> Option<u32> {
        self.slots.get(&op).copied()
    }

    pub fn ii(&self, block: BlockId) -> Option<u32> {
        self.initiation_intervals.get(&block).copied()
    }

    pub fn value_class(&self, op: OpRef) -> Option<ValueClass> {
        self.value_classes.get(&op).copied()
    }
}
