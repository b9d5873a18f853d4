use itertools::Itertools;
use petgraph::algo::{bellman_ford, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use vsched_ir::{BlockId, FuncUnitId, ScheduleGraph, UnitIdx};

/// Lower bounds on the initiation interval of a loop block.
///
/// ResMII comes from function-unit throughput: `n` control units bound to
/// one instance need `n` cycles per iteration. RecMII comes from recurrence
/// cycles: a cycle with total latency `L` and total distance `D` needs
/// `II >= ceil(L / D)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiiAnalysis {
    pub res_mii: u32,
    pub rec_mii: u32,
}

impl MiiAnalysis {
    pub fn compute(graph: &ScheduleGraph, block: BlockId) -> Self {
        let analysis = Self {
            res_mii: Self::res_mii(graph, block),
            rec_mii: Self::rec_mii(graph, block),
        };
        log::debug!(
            "block#{block}: ResMII {} RecMII {}",
            analysis.res_mii,
            analysis.rec_mii
        );
        analysis
    }

    pub fn mii(&self) -> u32 {
        self.res_mii.max(self.rec_mii).max(1)
    }

    fn res_mii(graph: &ScheduleGraph, block: BlockId) -> u32 {
        let mut usage: HashMap<FuncUnitId, u32> = HashMap::new();
        for idx in graph.cp_units() {
            let unit = graph.unit(*idx);
            if unit.block() == block && !unit.fu().is_trivial() {
                *usage.entry(unit.fu()).or_default() += 1;
            }
        }
        usage.into_values().max().unwrap_or(0)
    }

    fn rec_mii(graph: &ScheduleGraph, block: BlockId) -> u32 {
        let mut dep_graph: DiGraph<UnitIdx, (u32, u32)> = DiGraph::new();
        let mut nodes: HashMap<UnitIdx, NodeIndex> = HashMap::new();
        for unit in graph.units().filter(|u| u.block() == block) {
            nodes.insert(unit.idx(), dep_graph.add_node(unit.idx()));
        }
        for unit in graph.units().filter(|u| u.block() == block) {
            for (src, bundle) in unit.deps() {
                let Some(src) = nodes.get(&src) else {
                    continue;
                };
                let edge = bundle.edge();
                dep_graph.add_edge(
                    *src,
                    nodes[&unit.idx()],
                    (edge.latency(), edge.distance()),
                );
            }
        }

        let mut rec_mii = 0;
        for scc in tarjan_scc(&dep_graph) {
            let members = scc.iter().copied().collect::<HashSet<_>>();
            let edges = dep_graph
                .edge_indices()
                .filter_map(|e| {
                    let (a, b) = dep_graph.edge_endpoints(e)?;
                    (members.contains(&a) && members.contains(&b))
                        .then(|| (a, b, dep_graph[e]))
                })
                .collect_vec();
            if !edges.iter().any(|(_, _, (_, d))| *d > 0) {
                continue;
            }
            let bound =
                edges.iter().map(|(_, _, (l, _))| *l).sum::<u32>().max(1);
            let ii = (1..=bound)
                .find(|ii| !Self::has_positive_cycle(&scc, &edges, *ii))
                .unwrap_or_else(|| {
                    log::warn!(
                        "recurrence through {} units has no feasible II",
                        scc.len()
                    );
                    bound
                });
            rec_mii = rec_mii.max(ii);
        }
        rec_mii
    }

    /// Does the recurrence weighted `latency - distance * ii` have a cycle
    /// of positive weight?
    fn has_positive_cycle(
        scc: &[NodeIndex],
        edges: &[(NodeIndex, NodeIndex, (u32, u32))],
        ii: u32,
    ) -> bool {
        let mut g: DiGraph<(), f64> = DiGraph::new();
        let source = g.add_node(());
        let local: HashMap<NodeIndex, NodeIndex> =
            scc.iter().map(|n| (*n, g.add_node(()))).collect();
        for n in local.values() {
            g.add_edge(source, *n, 0.0);
        }
        for (a, b, (l, d)) in edges {
            let w = *l as i64 - (*d as i64) * ii as i64;
            g.add_edge(local[a], local[b], -(w as f64));
        }
        bellman_ford(&g, source).is_err()
    }
}
