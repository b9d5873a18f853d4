use super::linear_order::LinearOrder;
use crate::analysis::{ConstraintSystem, Term};
use std::collections::{HashMap, HashSet};
use vsched_ir::{BlockId, DepEdge, ScheduleGraph, UnitIdx};
use vsched_utils::{Contract, Named, SchedError, SchedResult};

/// Bounds under which a control-path constraint system is built.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CpBounds<'a> {
    /// Pipelining the entry block: its loop-carried edges use `loop_ii`
    /// instead of the recorded II table.
    pub pipelining: bool,
    pub loop_ii: Option<u32>,
    /// Upper bound on `exit - entry`.
    pub critical_path_end: Option<u32>,
    pub order: Option<&'a LinearOrder>,
    /// Fit every linear-order chain of a pipelined block into one II.
    pub modulo_window: bool,
}

impl CpBounds<'_> {
    fn ii(&self, graph: &ScheduleGraph, block: BlockId) -> Option<u32> {
        if self.pipelining && block == graph.entry_block() {
            self.loop_ii
        } else {
            graph.ii(block)
        }
    }

    /// The minimal slot distance `edge` asks for, or `None` when the edge
    /// spans iterations of a block whose II is unknown.
    fn offset(
        &self,
        graph: &ScheduleGraph,
        block: BlockId,
        edge: &DepEdge,
    ) -> Option<i64> {
        if edge.is_loop_carried() {
            self.ii(graph, block).map(|ii| edge.min_offset(ii))
        } else {
            Some(edge.latency() as i64)
        }
    }
}

/// Control units feeding each data-path unit through data-path units only,
/// with the longest accumulated offset to each.
///
/// Every data-path unit is resolved once per constraint system. The walk
/// keeps its own stack so that long data-path chains cannot overflow the
/// call stack.
struct LookThrough<'g, 'b> {
    graph: &'g ScheduleGraph,
    bounds: &'b CpBounds<'b>,
    cache: HashMap<UnitIdx, HashMap<UnitIdx, i64>>,
}

impl<'g, 'b> LookThrough<'g, 'b> {
    fn new(graph: &'g ScheduleGraph, bounds: &'b CpBounds<'b>) -> Self {
        Self {
            graph,
            bounds,
            cache: HashMap::new(),
        }
    }

    /// The control sources of `dp` and the offset from each to `dp`.
    fn sources(&mut self, dp: UnitIdx) -> &HashMap<UnitIdx, i64> {
        self.resolve(dp);
        &self.cache[&dp]
    }

    /// Post-order walk over the data-path units `root` depends on. A unit
    /// reached again while it is still open closes a cycle; that edge is
    /// ignored.
    fn resolve(&mut self, root: UnitIdx) {
        let mut open = HashSet::new();
        let mut stack = vec![(root, false)];
        while let Some((dp, expanded)) = stack.pop() {
            if self.cache.contains_key(&dp) {
                continue;
            }
            if expanded {
                let found = self.combine(dp);
                open.remove(&dp);
                self.cache.insert(dp, found);
                continue;
            }
            if !open.insert(dp) {
                continue;
            }
            stack.push((dp, true));
            for (src, _) in self.graph.unit(dp).deps() {
                if self.graph.unit(src).is_datapath()
                    && !self.cache.contains_key(&src)
                    && !open.contains(&src)
                {
                    stack.push((src, false));
                }
            }
        }
    }

    /// Merge the resolved sources of the operands of `dp`.
    fn combine(&self, dp: UnitIdx) -> HashMap<UnitIdx, i64> {
        let (graph, bounds) = (self.graph, self.bounds);
        let unit = graph.unit(dp);
        let mut found: HashMap<UnitIdx, i64> = HashMap::new();
        let mut add = |ctrl: UnitIdx, w: i64| {
            let best = found.entry(ctrl).or_insert(w);
            *best = (*best).max(w);
        };
        for (src, bundle) in unit.deps() {
            let Some(w) = bounds.offset(graph, unit.block(), bundle.edge())
            else {
                continue;
            };
            if graph.unit(src).is_control() {
                add(src, w);
            } else if let Some(inner) = self.cache.get(&src) {
                for (ctrl, v) in inner {
                    add(*ctrl, v + w);
                }
            }
        }
        // A frozen unit issuing before its anchor sits a fixed distance
        // ahead of it.
        if unit.has_fixed_timing() {
            for user in unit.uses() {
                let consumer = graph.unit(user);
                let Some(bundle) = consumer.dep_on(dp) else {
                    continue;
                };
                if consumer.is_control() && bundle.edge().is_fixed_timing() {
                    add(user, -(bundle.edge().latency() as i64));
                }
            }
        }
        found
    }
}

/// Build the constraint system over every unscheduled control unit.
pub(crate) fn build_system(
    graph: &ScheduleGraph,
    bounds: &CpBounds,
) -> ConstraintSystem {
    let mut sys = ConstraintSystem::new();
    for idx in graph.cp_units() {
        if !graph.unit(*idx).is_scheduled() {
            sys.add_var(*idx);
        }
    }
    let entry_slot = graph.entry_slot() as i64;
    let mut look = LookThrough::new(graph, bounds);

    for idx in graph.cp_units() {
        let unit = graph.unit(*idx);
        let Some(dst) = sys.term(graph, *idx) else {
            continue;
        };
        if matches!(dst, Term::Var(_)) {
            sys.lower_bound(dst, entry_slot);
        }
        for (src, bundle) in unit.deps() {
            let edge = bundle.edge();
            if graph.unit(src).is_datapath() {
                let Some(w) = bounds.offset(graph, unit.block(), edge) else {
                    continue;
                };
                for (ctrl, off) in look.sources(src) {
                    if let Some(s) = sys.term(graph, *ctrl) {
                        sys.add_geq(dst, s, off + w);
                    }
                }
                continue;
            }
            let (Some(w), Some(s)) = (
                bounds.offset(graph, unit.block(), edge),
                sys.term(graph, src),
            ) else {
                continue;
            };
            if edge.is_fixed_timing() {
                sys.add_eq(dst, s, w);
            } else {
                sys.add_geq(dst, s, w);
            }
        }
    }

    if let (Some(cpe), Some(exit)) =
        (bounds.critical_path_end, graph.exit_root())
    {
        if let Some(t) = sys.term(graph, exit) {
            sys.upper_bound(t, entry_slot + cpe as i64);
        }
    }

    if let Some(order) = bounds.order {
        for (block, chain) in order.chains() {
            let terms = chain
                .iter()
                .filter_map(|u| sys.term(graph, *u))
                .collect::<Vec<_>>();
            for pair in terms.windows(2) {
                sys.add_geq(pair[1], pair[0], 1);
            }
            let ii = bounds.ii(graph, block);
            if let (true, Some(ii), Some(first), Some(last)) =
                (bounds.modulo_window, ii, terms.first(), terms.last())
            {
                sys.add_geq(*first, *last, 1 - ii as i64);
            }
        }
    }
    sys
}

pub(crate) fn apply(graph: &mut ScheduleGraph, slots: &[(UnitIdx, u32)]) {
    for (unit, slot) in slots {
        graph.unit_mut(*unit).scheduled_to(*slot);
    }
}

/// Schedules control units as soon as possible under dependency and
/// function-unit constraints.
///
/// Only units without a slot are placed; scheduled units act as constants.
/// Resource conflicts are resolved with a [LinearOrder] built from a first,
/// dependency-only solution.
#[derive(Default)]
pub struct ControlPathScheduling;

impl Named for ControlPathScheduling {
    fn name() -> &'static str {
        "control-path"
    }

    fn description() -> &'static str {
        "ASAP scheduling of control units under dependency and resource \
         constraints"
    }
}

impl ControlPathScheduling {
    pub fn schedule(graph: &mut ScheduleGraph) -> SchedResult<()> {
        let entry = graph.entry_root();
        if !graph.unit(entry).is_scheduled() {
            let slot = graph.entry_slot();
            graph.unit_mut(entry).scheduled_to(slot);
        }

        let sys = build_system(graph, &CpBounds::default());
        log::debug!(
            "{}: block#{} with {} free units, {} constraints",
            Self::name(),
            graph.entry_block(),
            sys.num_vars(),
            sys.num_constraints()
        );
        if sys.num_vars() == 0 {
            return Ok(());
        }
        let asap = sys.solve_asap().map_err(fatal)?;
        apply(graph, &asap);

        let order = LinearOrder::build(graph);
        if !order.is_empty() {
            for (unit, _) in &asap {
                graph.unit_mut(*unit).reset_schedule();
            }
            let bounds = CpBounds {
                order: Some(&order),
                ..Default::default()
            };
            let slots = build_system(graph, &bounds)
                .solve_asap()
                .map_err(fatal)?;
            log::trace!("linear order added {} edges", order.num_edges());
            apply(graph, &slots);
        }

        fix_inter_block_latency(graph)
    }
}

/// Outside of the modulo search, a system without solution means the graph
/// itself is malformed.
pub(crate) fn fatal(err: SchedError) -> SchedError {
    match err {
        SchedError::Infeasible { what } => {
            SchedError::invariant(Contract::InfeasibleSystem, what)
        }
        err => err,
    }
}

/// Re-anchor every cross-block dependency on the terminator of the source
/// block, keeping the slot distance it enforces.
pub fn fix_inter_block_latency(graph: &mut ScheduleGraph) -> SchedResult<()> {
    let mut fixes = vec![];
    for unit in graph.units() {
        let Some(slot) = unit.slot() else {
            continue;
        };
        for (src, bundle) in unit.deps() {
            if !bundle.is_cross_block() || bundle.edge().is_fixed_timing() {
                continue;
            }
            let src_unit = graph.unit(src);
            let Some(term) = graph.terminator(src_unit.block()) else {
                continue;
            };
            let (Some(src_slot), Some(term_slot)) =
                (src_unit.slot(), graph.unit(term).slot())
            else {
                continue;
            };
            if term == src || term == unit.idx() || slot < term_slot {
                continue;
            }
            let latency = (src_slot + bundle.edge().latency())
                .saturating_sub(term_slot);
            fixes.push((unit.idx(), src, term, latency));
        }
    }
    for (dst, src, term, latency) in fixes {
        log::trace!("[{src}] -> [{dst}] re-anchored on [{term}] +{latency}");
        graph.remove_dep(dst, src);
        graph.add_dep(dst, term, DepEdge::value(latency))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsched_ir::{EdgeKind, FuKind, FuncUnitId, InstPtr, OpRef};
    use vsched_utils::IndexRef;

    fn op(i: usize) -> InstPtr {
        InstPtr::Op(OpRef::new(i))
    }

    #[test]
    fn shared_unit_serializes_independent_ops() {
        let b0 = BlockId(0);
        let mult = FuncUnitId::new(FuKind::Mult, 0);
        let mut g = ScheduleGraph::new(b0, 1);
        let a = g.create_unit(op(0), b0, mult, true, 1);
        let b = g.create_unit(op(1), b0, mult, true, 1);
        g.add_dep(a, g.entry_root(), DepEdge::value(0)).unwrap();
        g.add_dep(b, g.entry_root(), DepEdge::value(0)).unwrap();
        let exit = g.create_exit_root(b0);
        g.add_dep(exit, a, DepEdge::value(1)).unwrap();
        g.add_dep(exit, b, DepEdge::value(1)).unwrap();

        g.reset_cp_schedule(0).unwrap();
        ControlPathScheduling::schedule(&mut g).unwrap();
        assert_eq!(g.unit(a).slot(), Some(1));
        assert_eq!(g.unit(b).slot(), Some(2));
        assert_eq!(g.unit(exit).slot(), Some(3));
    }

    #[test]
    fn control_unit_looks_through_data_path() {
        let b0 = BlockId(0);
        let mut g = ScheduleGraph::new(b0, 1);
        let p = g.create_unit(op(0), b0, FuncUnitId::TRIVIAL, true, 2);
        let d0 = g.create_unit(op(1), b0, FuncUnitId::TRIVIAL, false, 0);
        let d1 = g.create_unit(op(2), b0, FuncUnitId::TRIVIAL, false, 0);
        let c = g.create_unit(op(3), b0, FuncUnitId::TRIVIAL, true, 0);
        g.add_dep(p, g.entry_root(), DepEdge::value(0)).unwrap();
        g.add_dep(d0, p, DepEdge::value(2)).unwrap();
        g.add_dep(d1, d0, DepEdge::value(1)).unwrap();
        g.add_dep(c, d1, DepEdge::value(0)).unwrap();
        g.add_dep(c, p, DepEdge::value(1)).unwrap();

        g.reset_cp_schedule(0).unwrap();
        ControlPathScheduling::schedule(&mut g).unwrap();
        assert_eq!(g.unit(c).slot(), Some(4));
        assert!(!g.unit(d0).is_scheduled());
    }

    /// load -> (add, xor) -> and -> ... -> store, every edge one cycle.
    #[test]
    fn wide_data_path_ladder_is_resolved_once() {
        let b0 = BlockId(0);
        let mut g = ScheduleGraph::new(b0, 1);
        let load = g.create_unit(op(0), b0, FuncUnitId::TRIVIAL, true, 1);
        g.add_dep(load, g.entry_root(), DepEdge::value(0)).unwrap();
        let mut join = load;
        for layer in 0..48 {
            let base = 1 + 3 * layer;
            let l = g.create_unit(op(base), b0, FuncUnitId::TRIVIAL, false, 0);
            let r =
                g.create_unit(op(base + 1), b0, FuncUnitId::TRIVIAL, false, 0);
            let j =
                g.create_unit(op(base + 2), b0, FuncUnitId::TRIVIAL, false, 0);
            g.add_dep(l, join, DepEdge::value(1)).unwrap();
            g.add_dep(r, join, DepEdge::value(1)).unwrap();
            g.add_dep(j, l, DepEdge::value(1)).unwrap();
            g.add_dep(j, r, DepEdge::value(0)).unwrap();
            join = j;
        }
        let store = g.create_unit(op(1000), b0, FuncUnitId::TRIVIAL, true, 0);
        g.add_dep(store, join, DepEdge::value(0)).unwrap();

        g.reset_cp_schedule(0).unwrap();
        ControlPathScheduling::schedule(&mut g).unwrap();
        assert_eq!(g.unit(store).slot(), Some(1 + 2 * 48));
    }

    #[test]
    fn fixed_timing_is_an_equality() {
        let b0 = BlockId(0);
        let mut g = ScheduleGraph::new(b0, 1);
        let a = g.create_unit(op(0), b0, FuncUnitId::TRIVIAL, true, 0);
        let t = g.create_unit(op(1), b0, FuncUnitId::TRIVIAL, true, 0);
        let late = g.create_unit(op(2), b0, FuncUnitId::TRIVIAL, true, 0);
        g.add_dep(a, g.entry_root(), DepEdge::value(0)).unwrap();
        g.add_dep(late, g.entry_root(), DepEdge::value(5)).unwrap();
        g.add_dep(t, a, DepEdge::fixed_timing(2)).unwrap();
        g.add_dep(a, late, DepEdge::memory(0, 0)).unwrap();

        g.reset_cp_schedule(0).unwrap();
        ControlPathScheduling::schedule(&mut g).unwrap();
        assert_eq!(g.unit(a).slot(), Some(6));
        assert_eq!(g.unit(t).slot(), Some(8));
    }

    #[test]
    fn contradiction_is_fatal() {
        let b0 = BlockId(0);
        let mut g = ScheduleGraph::new(b0, 1);
        let a = g.create_unit(op(0), b0, FuncUnitId::TRIVIAL, true, 0);
        let b = g.create_unit(op(1), b0, FuncUnitId::TRIVIAL, true, 0);
        g.add_dep(b, a, DepEdge::value(1)).unwrap();
        g.add_dep(a, b, DepEdge::memory(0, 0)).unwrap();
        g.reset_cp_schedule(0).unwrap();
        let err = ControlPathScheduling::schedule(&mut g).unwrap_err();
        assert_eq!(err.contract(), Some(Contract::InfeasibleSystem));
    }

    #[test]
    fn cross_block_edges_move_to_terminator() {
        let (b0, b1) = (BlockId(0), BlockId(1));
        let mut g = ScheduleGraph::new(b0, 1);
        let a = g.create_unit(op(0), b0, FuncUnitId::TRIVIAL, true, 3);
        let t0 = g.create_unit(op(1), b0, FuncUnitId::TRIVIAL, true, 0);
        g.set_terminator(b0, t0);
        let e1 = g.create_block_entry(b1);
        let c = g.create_unit(op(2), b1, FuncUnitId::TRIVIAL, true, 0);
        g.add_dep(a, g.entry_root(), DepEdge::value(0)).unwrap();
        g.add_dep(t0, a, DepEdge::value(1)).unwrap();
        g.add_dep(e1, t0, DepEdge::value(0)).unwrap();
        g.add_dep(c, e1, DepEdge::value(0)).unwrap();
        g.add_dep(c, a, DepEdge::value(3)).unwrap();

        g.reset_cp_schedule(0).unwrap();
        ControlPathScheduling::schedule(&mut g).unwrap();
        // a@1, t0@2, e1@2, c@4
        assert_eq!(g.unit(c).slot(), Some(4));
        assert!(g.unit(c).dep_on(a).is_none());
        let anchored = g.unit(c).dep_on(t0).unwrap();
        assert_eq!(anchored.edge().latency(), 2);
        assert_eq!(anchored.edge().kind(), EdgeKind::ValueDep);
        assert!(g.unit(a).uses().all(|u| u != c));

        let before = g.units().map(|u| u.slot()).collect::<Vec<_>>();
        g.reset_cp_schedule(0).unwrap();
        ControlPathScheduling::schedule(&mut g).unwrap();
        assert_eq!(g.units().map(|u| u.slot()).collect::<Vec<_>>(), before);
    }
}
