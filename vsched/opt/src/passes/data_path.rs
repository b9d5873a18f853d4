use super::control_path::{apply, fatal};
use crate::analysis::ConstraintSystem;
use vsched_ir::{BlockId, InstPtr, ScheduleGraph, UnitIdx, ValueClass};
use vsched_utils::{Contract, Named, SchedError, SchedOptions, SchedResult};

/// Schedules data-path units around an already scheduled control path and
/// decides which of their results need a register.
///
/// Data-path units that no control unit of their block consumes are
/// dangling: they are pinned to the last slot of their block. The others are
/// placed as late as possible by default, so that they chain directly into
/// their consumer.
#[derive(Default)]
pub struct DataPathScheduling;

impl Named for DataPathScheduling {
    fn name() -> &'static str {
        "data-path"
    }

    fn description() -> &'static str {
        "Timing-only scheduling of data-path units and register/wire selection"
    }
}

impl DataPathScheduling {
    pub fn schedule(
        graph: &mut ScheduleGraph,
        opts: &SchedOptions,
    ) -> SchedResult<()> {
        graph.reset_dp_schedule();
        for root in graph.cp_units().to_vec() {
            graph.clear_dangling_flag_for_tree(root);
        }

        // Dangling units first, so that they act as constants below.
        let mut num_dangling = 0;
        for idx in graph.dp_units().to_vec() {
            // Frozen units are placed by their fixed-timing edge.
            if graph.unit(idx).has_fixed_timing() {
                graph.unit_mut(idx).set_dangling(false);
            }
            if !graph.unit(idx).is_dangling() {
                continue;
            }
            let block = graph.unit(idx).block();
            let end = Self::end_slot(graph, idx, block)?;
            graph.unit_mut(idx).scheduled_to(end);
            num_dangling += 1;
        }

        let sys = Self::build_system(graph, opts)?;
        log::debug!(
            "{}: block#{} with {} free units, {num_dangling} dangling",
            Self::name(),
            graph.entry_block(),
            sys.num_vars(),
        );
        if sys.num_vars() > 0 {
            let solved = if opts.schedule_datapath_alap {
                sys.solve_alap()
            } else {
                sys.solve_asap()
            };
            apply(graph, &solved.map_err(fatal)?);
        }

        for idx in graph.dp_units().to_vec() {
            Self::fix_chained_datapath_rc(graph, idx, opts);
        }
        Ok(())
    }

    fn end_slot(
        graph: &ScheduleGraph,
        idx: UnitIdx,
        block: BlockId,
    ) -> SchedResult<u32> {
        graph.end_slot(block).ok_or_else(|| {
            SchedError::invariant(
                Contract::UnscheduledUnit,
                format!(
                    "[{idx}] needs the end of block#{block}, whose control \
                     path is not scheduled"
                ),
            )
        })
    }

    fn build_system(
        graph: &ScheduleGraph,
        opts: &SchedOptions,
    ) -> SchedResult<ConstraintSystem> {
        let mut sys = ConstraintSystem::new();
        for idx in graph.dp_units() {
            if !graph.unit(*idx).is_scheduled() {
                sys.add_var(*idx);
            }
        }

        for idx in graph.dp_units() {
            let unit = graph.unit(*idx);
            let Some(var) = sys.term(graph, *idx) else {
                continue;
            };
            if unit.is_scheduled() {
                continue;
            }
            let block = unit.block();
            if !unit.has_fixed_timing() {
                let start =
                    graph.start_slot(block).unwrap_or(graph.entry_slot());
                sys.lower_bound(var, start as i64);
                if opts.schedule_datapath_alap {
                    let end = Self::end_slot(graph, *idx, block)?;
                    sys.upper_bound(var, end as i64);
                }
            }
            let ii = graph.ii(block);

            for (src, bundle) in unit.deps() {
                let edge = bundle.edge();
                let w = match (edge.is_loop_carried(), ii) {
                    (false, _) => edge.latency() as i64,
                    (true, Some(ii)) => edge.min_offset(ii),
                    (true, None) => continue,
                };
                if let Some(s) = sys.term(graph, src) {
                    if edge.is_fixed_timing() {
                        sys.add_eq(var, s, w);
                    } else {
                        sys.add_geq(var, s, w);
                    }
                }
            }
            // Consumers that are already placed bound this unit from above.
            for user in unit.uses() {
                let consumer = graph.unit(user);
                if !consumer.is_scheduled() {
                    continue;
                }
                let Some(bundle) = consumer.dep_on(*idx) else {
                    continue;
                };
                let edge = bundle.edge();
                let ii = graph.ii(consumer.block());
                let w = match (edge.is_loop_carried(), ii) {
                    (false, _) => edge.latency() as i64,
                    (true, Some(ii)) => edge.min_offset(ii),
                    (true, None) => continue,
                };
                if let Some(c) = sys.term(graph, user) {
                    if edge.is_fixed_timing() {
                        sys.add_eq(c, var, w);
                    } else {
                        sys.add_geq(c, var, w);
                    }
                }
            }
        }
        Ok(sys)
    }

    /// Decide whether the result of `idx` may stay a wire. It needs a
    /// register when a same-block producer on a real function unit finishes
    /// after the unit is scheduled, or when chaining is disabled. Frozen
    /// units keep the class they were scheduled with.
    pub fn fix_chained_datapath_rc(
        graph: &mut ScheduleGraph,
        idx: UnitIdx,
        opts: &SchedOptions,
    ) {
        let unit = graph.unit(idx);
        if unit.has_fixed_timing() && unit.value_class().is_some() {
            return;
        }
        let (Some(slot), 1) = (unit.slot(), unit.num_instrs()) else {
            graph.unit_mut(idx).set_value_class(ValueClass::Register);
            return;
        };
        let mut need_copy = opts.disable_multi_cycles_chain;
        for (src, _) in unit.deps() {
            let producer = graph.unit(src);
            if producer.block() != unit.block()
                || producer.fu().is_trivial()
                || !matches!(producer.representative(), InstPtr::Op(_))
            {
                continue;
            }
            let copy_slot = producer
                .fin_slot()
                .map(|s| s + producer.write_until_finish() as u32);
            if copy_slot.is_some_and(|c| c > slot) {
                need_copy = true;
                break;
            }
        }
        let class = if need_copy {
            ValueClass::Register
        } else {
            ValueClass::Wire
        };
        graph.unit_mut(idx).set_value_class(class);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::ControlPathScheduling;
    use vsched_ir::{DepEdge, FuKind, FuncUnitId, OpRef};
    use vsched_utils::IndexRef;

    fn op(i: usize) -> InstPtr {
        InstPtr::Op(OpRef::new(i))
    }

    /// p (mult, `steps`) -> d -> c, plus a dangling `z`.
    fn chain(steps: u32) -> (ScheduleGraph, UnitIdx, UnitIdx, UnitIdx) {
        let b0 = BlockId(0);
        let mut g = ScheduleGraph::new(b0, 1);
        let mult = FuncUnitId::new(FuKind::Mult, 0);
        let p = g.create_unit(op(0), b0, mult, true, steps);
        let d = g.create_unit(op(1), b0, FuncUnitId::TRIVIAL, false, 0);
        let z = g.create_unit(op(2), b0, FuncUnitId::TRIVIAL, false, 0);
        let c = g.create_unit(op(3), b0, FuncUnitId::TRIVIAL, true, 0);
        g.add_dep(p, g.entry_root(), DepEdge::value(0)).unwrap();
        g.add_dep(d, p, DepEdge::value(1)).unwrap();
        g.add_dep(z, g.entry_root(), DepEdge::value(0)).unwrap();
        g.add_dep(c, d, DepEdge::value(0)).unwrap();
        let exit = g.create_exit_root(b0);
        g.add_dep(exit, c, DepEdge::value(1)).unwrap();
        g.reset_cp_schedule(0).unwrap();
        ControlPathScheduling::schedule(&mut g).unwrap();
        (g, d, z, c)
    }

    #[test]
    fn alap_places_late_and_pins_dangling() {
        let (mut g, d, z, c) = chain(1);
        DataPathScheduling::schedule(&mut g, &SchedOptions::default()).unwrap();
        assert_eq!(g.unit(c).slot(), Some(2));
        assert_eq!(g.unit(d).slot(), Some(2));
        assert!(!g.unit(d).is_dangling());
        assert!(g.unit(z).is_dangling());
        assert_eq!(g.unit(z).slot(), g.end_slot(BlockId(0)));
        assert_eq!(g.unit(z).slot(), Some(3));
        assert_eq!(g.unit(d).value_class(), Some(ValueClass::Wire));
    }

    #[test]
    fn frozen_units_keep_their_timing() {
        let (mut sub, d, z, c) = chain(2);
        let opts = SchedOptions::default();
        DataPathScheduling::schedule(&mut sub, &opts).unwrap();
        sub.set_terminator(BlockId(0), c);
        let (d_slot, z_slot) = (sub.unit(d).slot(), sub.unit(z).slot());
        assert_eq!((d_slot, z_slot), (Some(2), Some(3)));

        let mut g = ScheduleGraph::new(BlockId(0), 1);
        let root = g.entry_root();
        g.merge_subgraph_onto(sub, root).unwrap();
        let d = g.lookup_op(OpRef::new(1)).unwrap();
        let z = g.lookup_op(OpRef::new(2)).unwrap();
        g.reset_cp_schedule(0).unwrap();
        ControlPathScheduling::schedule(&mut g).unwrap();
        DataPathScheduling::schedule(&mut g, &opts).unwrap();

        assert_eq!(g.unit(d).slot(), d_slot);
        assert_eq!(g.unit(z).slot(), z_slot);
        assert!(!g.unit(z).is_dangling());
        assert_eq!(g.unit(d).value_class(), Some(ValueClass::Register));
    }

    #[test]
    fn asap_places_early() {
        let (mut g, d, _, _) = chain(1);
        let opts = SchedOptions {
            schedule_datapath_alap: false,
            ..Default::default()
        };
        DataPathScheduling::schedule(&mut g, &opts).unwrap();
        assert_eq!(g.unit(d).slot(), Some(2));
    }

    #[test]
    fn late_producer_needs_register() {
        let (mut g, d, _, _) = chain(2);
        DataPathScheduling::schedule(&mut g, &SchedOptions::default()).unwrap();
        assert_eq!(g.unit(d).slot(), Some(2));
        assert_eq!(g.unit(d).value_class(), Some(ValueClass::Register));
    }

    #[test]
    fn disabled_chaining_forces_register() {
        let (mut g, d, _, _) = chain(1);
        let opts = SchedOptions {
            disable_multi_cycles_chain: true,
            ..Default::default()
        };
        DataPathScheduling::schedule(&mut g, &opts).unwrap();
        assert_eq!(g.unit(d).value_class(), Some(ValueClass::Register));
    }

    #[test]
    fn rerun_is_idempotent() {
        let (mut g, ..) = chain(2);
        let opts = SchedOptions::default();
        DataPathScheduling::schedule(&mut g, &opts).unwrap();
        let placed = |g: &ScheduleGraph| {
            g.units()
                .map(|u| (u.slot(), u.value_class()))
                .collect::<Vec<_>>()
        };
        let first = placed(&g);
        DataPathScheduling::schedule(&mut g, &opts).unwrap();
        let second = placed(&g);
        assert_eq!(first, second);
    }
}
