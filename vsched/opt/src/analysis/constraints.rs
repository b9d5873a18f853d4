use linked_hash_map::LinkedHashMap;
use petgraph::algo::bellman_ford;
use petgraph::graph::{DiGraph, NodeIndex};
use vsched_ir::{ScheduleGraph, UnitIdx};
use vsched_utils::{SchedError, SchedResult};

/// One side of a difference constraint: either the slot variable of a unit
/// or a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    Var(usize),
    Const(i64),
}

/// A system of difference constraints `x_dst - x_src >= w` over the slots of
/// schedule units.
///
/// The system is a constraint graph with a virtual source `S = 0` carrying
/// every constant. ASAP slots are the longest paths from `S`; ALAP slots are
/// the negated longest paths back to `S`. A positive cycle means the system
/// has no solution.
#[derive(Debug, Default)]
pub struct ConstraintSystem {
    vars: LinkedHashMap<UnitIdx, usize>,
    /// `(src, dst, w)` over nodes, node 0 is the virtual source.
    edges: Vec<(usize, usize, i64)>,
    /// A constraint between two constants that can never hold.
    violated: Option<String>,
}

impl ConstraintSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the slot of `unit` a variable of the system.
    pub fn add_var(&mut self, unit: UnitIdx) -> usize {
        let next = self.vars.len();
        *self.vars.entry(unit).or_insert(next)
    }

    pub fn var(&self, unit: UnitIdx) -> Option<usize> {
        self.vars.get(&unit).copied()
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.edges.len()
    }

    /// The term standing for `unit`: its variable, or its slot if the unit
    /// is not a variable but already scheduled.
    pub fn term(&self, graph: &ScheduleGraph, unit: UnitIdx) -> Option<Term> {
        match self.var(unit) {
            Some(v) => Some(Term::Var(v)),
            None => graph.unit(unit).slot().map(|s| Term::Const(s as i64)),
        }
    }

    fn node(t: Term) -> (usize, i64) {
        match t {
            Term::Var(v) => (v + 1, 0),
            Term::Const(c) => (0, c),
        }
    }

    /// `dst - src >= w`
    pub fn add_geq(&mut self, dst: Term, src: Term, w: i64) {
        let (dn, dc) = Self::node(dst);
        let (sn, sc) = Self::node(src);
        let w = w + sc - dc;
        if dn == sn {
            if w > 0 && self.violated.is_none() {
                self.violated = Some(format!("{dst:?} - {src:?} >= {w}"));
            }
            return;
        }
        self.edges.push((sn, dn, w));
    }

    /// `dst - src == w`
    pub fn add_eq(&mut self, dst: Term, src: Term, w: i64) {
        self.add_geq(dst, src, w);
        self.add_geq(src, dst, -w);
    }

    pub fn lower_bound(&mut self, t: Term, lb: i64) {
        self.add_geq(t, Term::Const(0), lb);
    }

    pub fn upper_bound(&mut self, t: Term, ub: i64) {
        self.add_geq(Term::Const(0), t, -ub);
    }

    /// Longest paths from the virtual source over the (possibly reversed)
    /// constraint graph.
    fn longest_paths(&self, reverse: bool) -> SchedResult<Vec<Option<i64>>> {
        if let Some(what) = &self.violated {
            return Err(SchedError::infeasible(what.clone()));
        }
        let mut g: DiGraph<(), f64> =
            DiGraph::with_capacity(self.vars.len() + 1, self.edges.len());
        for _ in 0..=self.vars.len() {
            g.add_node(());
        }
        for (src, dst, w) in &self.edges {
            let (a, b) = if reverse { (dst, src) } else { (src, dst) };
            // Shortest paths over negated weights are longest paths.
            g.add_edge(NodeIndex::new(*a), NodeIndex::new(*b), -(*w as f64));
        }
        let paths = bellman_ford(&g, NodeIndex::new(0)).map_err(|_| {
            SchedError::infeasible(format!(
                "positive cycle among {} constraints",
                self.edges.len()
            ))
        })?;
        Ok(paths
            .distances
            .into_iter()
            .map(|d| d.is_finite().then(|| (-d).round() as i64))
            .collect())
    }

    fn collect(
        &self,
        dist: Vec<Option<i64>>,
        negate: bool,
    ) -> SchedResult<Vec<(UnitIdx, u32)>> {
        self.vars
            .iter()
            .map(|(unit, v)| {
                let slot = dist[v + 1]
                    .map(|d| if negate { -d } else { d })
                    .and_then(|d| u32::try_from(d).ok());
                match slot {
                    Some(slot) => Ok((*unit, slot)),
                    None => Err(SchedError::infeasible(format!(
                        "no valid slot for [{unit}]"
                    ))),
                }
            })
            .collect()
    }

    /// The earliest solution. Every variable needs a lower bound.
    pub fn solve_asap(&self) -> SchedResult<Vec<(UnitIdx, u32)>> {
        let dist = self.longest_paths(false)?;
        self.collect(dist, false)
    }

    /// The latest solution. Every variable needs an upper bound.
    pub fn solve_alap(&self) -> SchedResult<Vec<(UnitIdx, u32)>> {
        let dist = self.longest_paths(true)?;
        self.collect(dist, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsched_utils::IndexRef;

    fn u(i: usize) -> UnitIdx {
        UnitIdx::new(i)
    }

    #[test]
    fn asap_and_alap_bracket_the_solution() {
        let mut sys = ConstraintSystem::new();
        let a = Term::Var(sys.add_var(u(1)));
        let b = Term::Var(sys.add_var(u(2)));
        sys.lower_bound(a, 1);
        sys.lower_bound(b, 1);
        sys.add_geq(b, a, 2);
        sys.upper_bound(a, 6);
        sys.upper_bound(b, 6);

        assert_eq!(sys.solve_asap().unwrap(), vec![(u(1), 1), (u(2), 3)]);
        assert_eq!(sys.solve_alap().unwrap(), vec![(u(1), 4), (u(2), 6)]);
    }

    #[test]
    fn constants_fold_into_the_source() {
        let mut sys = ConstraintSystem::new();
        let a = Term::Var(sys.add_var(u(3)));
        sys.add_geq(a, Term::Const(5), 2);
        sys.add_eq(Term::Const(10), a, 3);
        assert_eq!(sys.solve_asap().unwrap(), vec![(u(3), 7)]);
    }

    #[test]
    fn positive_cycle_is_infeasible() {
        let mut sys = ConstraintSystem::new();
        let a = Term::Var(sys.add_var(u(1)));
        let b = Term::Var(sys.add_var(u(2)));
        sys.lower_bound(a, 0);
        sys.add_geq(b, a, 2);
        sys.add_geq(a, b, -1);
        let err = sys.solve_asap().unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn violated_constant_constraint_is_infeasible() {
        let mut sys = ConstraintSystem::new();
        sys.add_geq(Term::Const(1), Term::Const(3), 0);
        assert!(sys.solve_asap().is_err());
        let mut ok = ConstraintSystem::new();
        ok.add_geq(Term::Const(3), Term::Const(1), 2);
        assert!(ok.solve_asap().unwrap().is_empty());
    }

    #[test]
    fn bound_conflict_is_infeasible() {
        let mut sys = ConstraintSystem::new();
        let a = Term::Var(sys.add_var(u(1)));
        sys.lower_bound(a, 4);
        sys.upper_bound(a, 3);
        assert!(sys.solve_alap().is_err());
        assert!(sys.solve_asap().is_err());
    }
}
