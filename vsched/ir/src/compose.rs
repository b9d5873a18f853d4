//! Folding a scheduled sub-graph into the graph of its enclosing region.
//!
//! Once a block has been scheduled on its own (typically a pipelined loop),
//! its schedule is frozen: every unit gets a fixed-timing edge to the block
//! terminator that encodes the slot distance between the two, and data-path
//! units keep their register or wire class. The enclosing graph may then
//! move the block as a whole, but can no longer change its internal timing.
use crate::edge::DepEdge;
use crate::graph::ScheduleGraph;
use crate::op::InstPtr;
use crate::unit::UnitIdx;
use vsched_utils::{Contract, IndexRef, SchedError, SchedResult};

impl ScheduleGraph {
    /// Move every unit of `sub` except its exit root into this graph and
    /// return the new index of the sub-graph's entry unit.
    ///
    /// `sub` must be a completed, fully scheduled graph. Its entry unit
    /// keeps no dependencies; the caller is expected to chain it to
    /// whatever precedes the block.
    pub fn merge_subgraph(
        &mut self,
        sub: ScheduleGraph,
    ) -> SchedResult<UnitIdx> {
        self.merge(sub, None)
    }

    /// Like [ScheduleGraph::merge_subgraph], but the sub-graph's entry unit
    /// is folded into `entry`, the existing entry unit of the same block.
    pub fn merge_subgraph_onto(
        &mut self,
        sub: ScheduleGraph,
        entry: UnitIdx,
    ) -> SchedResult<UnitIdx> {
        let block = sub.entry_block();
        if self.lookup(InstPtr::Block(block)) != Some(entry)
            || self.units[entry].num_deps() != 0
        {
            return Err(SchedError::invariant(
                Contract::IndexMismatch,
                format!("[{entry}] is not a free entry of block#{block}"),
            ));
        }
        self.merge(sub, Some(entry))
    }

    fn merge(
        &mut self,
        sub: ScheduleGraph,
        anchor: Option<UnitIdx>,
    ) -> SchedResult<UnitIdx> {
        let block = sub.entry_block();
        let Some(exit) = sub.exit_root() else {
            return Err(SchedError::invariant(
                Contract::IndexMismatch,
                format!("sub-graph of block#{block} has no exit root"),
            ));
        };
        let Some(term) = sub.terminator(block) else {
            return Err(SchedError::invariant(
                Contract::MissingTerminator,
                format!("sub-graph of block#{block}"),
            ));
        };
        if exit.index() + 1 != sub.num_units()
            || term.index() + 1 != exit.index()
        {
            return Err(SchedError::invariant(
                Contract::IndexMismatch,
                format!(
                    "sub-graph of block#{block} must end with its terminator \
                     and exit, found [{term}] and [{exit}] out of {}",
                    sub.num_units()
                ),
            ));
        }
        for unit in sub.units() {
            if unit.idx() != exit && !unit.is_scheduled() {
                return Err(SchedError::invariant(
                    Contract::UnscheduledUnit,
                    format!(
                        "[{}] of block#{block} cannot be frozen",
                        unit.idx()
                    ),
                ));
            }
        }

        let base = self.next_idx().index();
        let sub_entry = sub.entry_root();
        let ScheduleGraph {
            units,
            mut inst_to_unit,
            ii_map,
            terminators,
            ..
        } = sub;
        inst_to_unit.remove(&InstPtr::Exit(block));
        let mut migrated = units.into_values().collect::<Vec<_>>();
        migrated.pop();

        let slots = migrated.iter().map(|u| u.slot()).collect::<Vec<_>>();
        let term_slot = slots[term.index()].unwrap_or_default();

        for unit in migrated.iter_mut() {
            unit.deps.clear();
            unit.uses.clear();
            unit.reset_schedule();
            unit.set_dangling(false);
            unit.set_fixed_timing();
        }

        // Anchor every unit on the terminator. Units issued after the
        // terminator hang off it instead of feeding it.
        let mut num_fixed = 0;
        for (pos, slot) in slots.iter().enumerate() {
            let idx = UnitIdx::new(pos);
            if idx == term {
                continue;
            }
            let slot = slot.unwrap_or_default();
            let (dst, src, offset) = if slot <= term_slot {
                (term, idx, term_slot - slot)
            } else {
                (idx, term, slot - term_slot)
            };
            let src_block = migrated[src.index()].block();
            migrated[dst.index()].add_dep(
                src,
                src_block,
                DepEdge::fixed_timing(offset),
            )?;
            num_fixed += 1;
        }

        // The folded entry unit gives up its index to `anchor`.
        let shift = anchor.is_some() as usize;
        let remap = |u: UnitIdx| match anchor {
            Some(a) if u == sub_entry => a,
            _ => UnitIdx::new(u.index() + base - shift),
        };
        if anchor.is_some() {
            migrated.remove(sub_entry.index());
            inst_to_unit.remove(&InstPtr::Block(block));
        }
        for unit in migrated.iter_mut() {
            unit.remap(remap);
        }
        for unit in migrated {
            let idx = unit.idx();
            let control = unit.is_control();
            let pushed = self.units.push(unit);
            debug_assert_eq!(pushed, idx);
            if control {
                self.cp_units.push(idx);
            } else {
                self.dp_units.push(idx);
            }
        }
        for idx in (base..self.units.len()).map(UnitIdx::new) {
            let deps = self.units[idx]
                .deps()
                .map(|(src, _)| src)
                .collect::<Vec<_>>();
            for src in deps {
                self.units[src].uses.insert(idx);
            }
        }
        for (ptr, idx) in inst_to_unit {
            self.inst_to_unit.insert(ptr, remap(idx));
        }
        for (b, ii) in ii_map {
            self.ii_map.insert(b, ii);
        }
        for (b, t) in terminators {
            self.terminators.insert(b, remap(t));
        }

        let new_term = remap(term);
        if self.next_idx().index() != new_term.index() + 1 {
            return Err(SchedError::invariant(
                Contract::IndexMismatch,
                format!(
                    "terminator of block#{block} landed on [{new_term}], \
                     next index is {}",
                    self.next_idx()
                ),
            ));
        }
        let entry = remap(sub_entry);
        log::debug!(
            "merged block#{block} at [{entry}] with {num_fixed} fixed-timing \
             edges"
        );
        Ok(entry)
    }
}
