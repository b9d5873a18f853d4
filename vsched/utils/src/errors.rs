//! Errors generated by the scheduler.
use thiserror::Error;

/// Convenience wrapper to represent success or a scheduling error.
pub type SchedResult<T> = std::result::Result<T, SchedError>;

/// The structural contract a dependency graph failed to uphold.
///
/// Every contract violation is a bug in whoever built the graph; none of them
/// can be repaired by the scheduler itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Contract {
    /// A unit was made to depend on itself.
    SelfDependency,
    /// A fixed-timing edge would have been merged with another edge.
    FixedTimingOverride,
    /// Two loop-carried edges with different distances share one bundle.
    ConflictingDistance,
    /// The entry root has dependencies.
    EntryRootHasDeps,
    /// The exit root has uses.
    ExitRootHasUses,
    /// An unscheduled control unit is not constrained by its block.
    FloatingUnit,
    /// An unscheduled unit has no uses and is not the exit root.
    DetachedUnit,
    /// A value edge points backwards in index order within one block.
    BadValueEdge,
    /// A block entry depends on something other than a terminator.
    BadInterBlockEdge,
    /// Unit indices no longer line up with their position in the graph.
    IndexMismatch,
    /// A unit expected to carry a slot does not.
    UnscheduledUnit,
    /// The constraint system the scheduler built has no solution.
    InfeasibleSystem,
    /// A block has no registered terminator.
    MissingTerminator,
    /// The loop terminator did not land on `entry + II`.
    LoopOpSlot,
    /// A PHI unit was pushed past the end of its block.
    PhiSlot,
    /// An index or operation does not name a unit of the graph.
    UnknownUnit,
    /// The latency oracle has no record for an operation.
    MissingLatencyInfo,
}

impl std::fmt::Display for Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Contract::SelfDependency => "self dependency",
            Contract::FixedTimingOverride => "fixed timing override",
            Contract::ConflictingDistance => "conflicting loop distance",
            Contract::EntryRootHasDeps => "entry root has dependencies",
            Contract::ExitRootHasUses => "exit root has uses",
            Contract::FloatingUnit => "unconstrained unit",
            Contract::DetachedUnit => "detached unit",
            Contract::BadValueEdge => "bad value dependency",
            Contract::BadInterBlockEdge => "bad inter-block dependency",
            Contract::IndexMismatch => "index mismatch",
            Contract::UnscheduledUnit => "unscheduled unit",
            Contract::InfeasibleSystem => "infeasible constraint system",
            Contract::MissingTerminator => "missing terminator",
            Contract::LoopOpSlot => "loop terminator slot",
            Contract::PhiSlot => "PHI slot",
            Contract::UnknownUnit => "unknown unit",
            Contract::MissingLatencyInfo => "missing latency information",
        };
        write!(f, "{s}")
    }
}

/// Errors raised while building or scheduling a dependency graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Fatal: the graph violates a structural contract.
    #[error("[{contract}] {msg}")]
    Invariant { contract: Contract, msg: String },

    /// Recoverable: the constraint system has no solution under the current
    /// bounds.
    #[error("infeasible: {what}")]
    Infeasible { what: String },

    /// The modulo-scheduling search ran past its sanity ceiling.
    #[error(
        "no feasible pipelined schedule found for block#{block} \
         (II {ii}, critical path {critical_path})"
    )]
    SearchExhausted {
        block: u32,
        ii: u32,
        critical_path: u32,
    },
}

impl SchedError {
    pub fn invariant<S: ToString>(contract: Contract, msg: S) -> Self {
        Self::Invariant {
            contract,
            msg: msg.to_string(),
        }
    }

    pub fn infeasible<S: ToString>(what: S) -> Self {
        Self::Infeasible {
            what: what.to_string(),
        }
    }

    /// The contract this error reports, if it is an invariant violation.
    pub fn contract(&self) -> Option<Contract> {
        match self {
            SchedError::Invariant { contract, .. } => Some(*contract),
            _ => None,
        }
    }

    /// Can a caller recover from this error by relaxing a bound?
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SchedError::Invariant { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_message_names_contract() {
        let err = SchedError::invariant(Contract::SelfDependency, "[3]");
        assert_eq!(err.to_string(), "[self dependency] [3]");
        assert_eq!(err.contract(), Some(Contract::SelfDependency));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn search_exhaustion_is_recoverable() {
        let err = SchedError::SearchExhausted {
            block: 2,
            ii: 9,
            critical_path: 12,
        };
        assert!(err.is_recoverable());
        assert_eq!(err.contract(), None);
        assert!(err.to_string().contains("block#2"));
    }
}
