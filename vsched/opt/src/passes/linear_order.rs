use itertools::Itertools;
use linked_hash_map::LinkedHashMap;
use vsched_ir::{BlockId, FuncUnitId, ScheduleGraph, UnitIdx};

/// Chains of control units that compete for one function-unit instance.
///
/// Units of the same block bound to the same non-trivial instance are
/// ordered by their current slot, ties broken by index. Consecutive units of
/// a chain must issue in distinct cycles.
#[derive(Debug, Default)]
pub struct LinearOrder {
    chains: Vec<(BlockId, Vec<UnitIdx>)>,
}

impl LinearOrder {
    /// Build the chains from the slots currently assigned in `graph`.
    pub fn build(graph: &ScheduleGraph) -> Self {
        let mut groups: LinkedHashMap<(BlockId, FuncUnitId), Vec<UnitIdx>> =
            LinkedHashMap::new();
        for idx in graph.cp_units() {
            let unit = graph.unit(*idx);
            if unit.fu().is_trivial() {
                continue;
            }
            groups
                .entry((unit.block(), unit.fu()))
                .or_insert_with(Vec::new)
                .push(*idx);
        }

        let chains = groups
            .into_iter()
            .filter(|(_, units)| units.len() > 1)
            .map(|((block, _), units)| {
                let chain = units
                    .into_iter()
                    .sorted_by_key(|u| (graph.unit(*u).slot().unwrap_or(0), *u))
                    .collect_vec();
                (block, chain)
            })
            .collect_vec();
        Self { chains }
    }

    pub fn chains(&self) -> impl Iterator<Item = (BlockId, &[UnitIdx])> {
        self.chains.iter().map(|(b, c)| (*b, c.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Number of ordering edges the chains stand for.
    pub fn num_edges(&self) -> usize {
        self.chains.iter().map(|(_, c)| c.len() - 1).sum()
    }
}
