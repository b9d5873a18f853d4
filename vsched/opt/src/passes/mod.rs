//! Scheduling passes over a [ScheduleGraph].
mod control_path;
mod data_path;
mod linear_order;
mod modulo;

pub use control_path::{ControlPathScheduling, fix_inter_block_latency};
pub use data_path::DataPathScheduling;
pub use linear_order::LinearOrder;
pub use modulo::IterativeModuloScheduling;

use vsched_ir::ScheduleGraph;
use vsched_utils::{Named, SchedOptions, SchedResult};

/// The closed set of scheduling strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// ASAP placement of control units with resource constraints.
    ControlPath,
    /// ALAP or ASAP placement of data-path units, then register/wire
    /// selection.
    DataPath,
    /// Iterative modulo scheduling of a self-looping block.
    Modulo,
}

impl Strategy {
    pub const ALL: [Strategy; 3] =
        [Strategy::ControlPath, Strategy::DataPath, Strategy::Modulo];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::ControlPath => ControlPathScheduling::name(),
            Strategy::DataPath => DataPathScheduling::name(),
            Strategy::Modulo => IterativeModuloScheduling::name(),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Strategy::ControlPath => ControlPathScheduling::description(),
            Strategy::DataPath => DataPathScheduling::description(),
            Strategy::Modulo => IterativeModuloScheduling::description(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// The strategies that take a freshly built graph to a full schedule.
    pub fn plan(graph: &ScheduleGraph) -> [Strategy; 2] {
        if graph.enable_pipeline() {
            [Strategy::Modulo, Strategy::DataPath]
        } else {
            [Strategy::ControlPath, Strategy::DataPath]
        }
    }

    pub fn run(
        &self,
        graph: &mut ScheduleGraph,
        opts: &SchedOptions,
    ) -> SchedResult<()> {
        log::debug!("running {}", self.name());
        match self {
            Strategy::ControlPath => ControlPathScheduling::schedule(graph),
            Strategy::DataPath => DataPathScheduling::schedule(graph, opts),
            Strategy::Modulo => {
                IterativeModuloScheduling::run(graph).map(|_| ())
            }
        }
    }
}
