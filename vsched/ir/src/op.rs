//! Operations handed to the scheduler by the front end, and the latency
//! information describing how they feed each other.
use std::collections::HashMap;
use std::fmt;
use vsched_utils::{IndexedMap, impl_index};

#[cfg(feature = "serialize")]
use serde::Serialize;

/// Handle to one primitive hardware operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct OpRef(u32);
impl_index!(OpRef);

/// Identity of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of function units an operation can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FuKind {
    /// Wires, constants, moves: never a resource bottleneck.
    Trivial,
    MemoryBus,
    BRam,
    AddSub,
    Shift,
    Mult,
    ICmp,
    Mux,
    CalleeFn,
}

impl FuKind {
    fn short_name(&self) -> &'static str {
        match self {
            FuKind::Trivial => "trivial",
            FuKind::MemoryBus => "membus",
            FuKind::BRam => "bram",
            FuKind::AddSub => "addsub",
            FuKind::Shift => "shift",
            FuKind::Mult => "mult",
            FuKind::ICmp => "icmp",
            FuKind::Mux => "mux",
            FuKind::CalleeFn => "callee",
        }
    }
}

/// A concrete function unit instance. Two operations bound to the same
/// non-trivial instance can never issue in the same cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncUnitId {
    pub kind: FuKind,
    pub num: u16,
}

impl FuncUnitId {
    pub const TRIVIAL: FuncUnitId = FuncUnitId {
        kind: FuKind::Trivial,
        num: 0,
    };

    pub fn new(kind: FuKind, num: u16) -> Self {
        Self { kind, num }
    }

    pub fn is_trivial(&self) -> bool {
        self.kind == FuKind::Trivial
    }
}

impl fmt::Display for FuncUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_trivial() {
            write!(f, "{}", self.kind.short_name())
        } else {
            write!(f, "{}#{}", self.kind.short_name(), self.num)
        }
    }
}

/// One primitive hardware action, as lowered by the front end.
#[derive(Debug, Clone)]
pub struct Operation {
    pub opcode: String,
    /// Operand shown in diagnostic dumps.
    pub operand: Option<String>,
    pub block: BlockId,
    pub fu: FuncUnitId,
    /// Purely combinational and free to chain.
    pub datapath: bool,
    pub terminator: bool,
    /// For branches, the block control transfers to.
    pub branch_target: Option<BlockId>,
    /// Loop PHI move whose copy has to be emitted one II later.
    pub phi: bool,
    /// The function unit keeps its output only until the operation finishes.
    pub write_until_finish: bool,
    pub steps_to_finish: u32,
}

impl Operation {
    /// A control-path operation with the given function unit.
    pub fn control(opcode: &str, block: BlockId, fu: FuncUnitId) -> Self {
        Self {
            opcode: opcode.to_string(),
            operand: None,
            block,
            fu,
            datapath: false,
            terminator: false,
            branch_target: None,
            phi: false,
            write_until_finish: false,
            steps_to_finish: 0,
        }
    }

    /// A data-path operation with the given function unit.
    pub fn datapath(opcode: &str, block: BlockId, fu: FuncUnitId) -> Self {
        Self {
            datapath: true,
            ..Self::control(opcode, block, fu)
        }
    }

    /// A branch terminating `block` and jumping to `target`.
    pub fn branch(block: BlockId, target: BlockId) -> Self {
        Self {
            terminator: true,
            branch_target: Some(target),
            ..Self::control("brcnd", block, FuncUnitId::TRIVIAL)
        }
    }

    pub fn with_operand(mut self, operand: &str) -> Self {
        self.operand = Some(operand.to_string());
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps_to_finish = steps;
        self
    }

    pub fn with_phi(mut self) -> Self {
        self.phi = true;
        self
    }

    pub fn with_write_until_finish(mut self) -> Self {
        self.write_until_finish = true;
        self
    }
}

/// All operations of a function, owned by the front end.
pub type OpTable = IndexedMap<OpRef, Operation>;

/// The operations of one basic block, in program order.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub ops: Vec<OpRef>,
}

impl BasicBlock {
    pub fn new(id: BlockId, ops: Vec<OpRef>) -> Self {
        Self { id, ops }
    }
}

/// What a schedule unit stands for: a block entry, an operation, or the
/// virtual exit of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstPtr {
    Block(BlockId),
    Op(OpRef),
    Exit(BlockId),
}

impl InstPtr {
    pub fn op(&self) -> Option<OpRef> {
        match self {
            InstPtr::Op(op) => Some(*op),
            _ => None,
        }
    }
}

/// One operand dependency of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepInfo {
    /// The producer; `None` stands for a value live-in at block entry.
    pub src: Option<OpRef>,
    /// Cycles between production and consumption.
    pub latency: u32,
    /// Loop iterations the dependency spans.
    pub distance: u32,
    /// Ordering through memory rather than through a value.
    pub memory: bool,
}

impl DepInfo {
    pub fn value(src: OpRef, latency: u32) -> Self {
        Self {
            src: Some(src),
            latency,
            distance: 0,
            memory: false,
        }
    }

    pub fn live_in() -> Self {
        Self {
            src: None,
            latency: 0,
            distance: 0,
            memory: false,
        }
    }

    pub fn memory(src: OpRef, latency: u32) -> Self {
        Self {
            memory: true,
            ..Self::value(src, latency)
        }
    }

    pub fn loop_carried(src: OpRef, latency: u32, distance: u32) -> Self {
        Self {
            distance,
            ..Self::value(src, latency)
        }
    }
}

/// Source of detailed latency information for the operations of a function.
pub trait LatencyOracle {
    /// Every operand dependency of `op`, or `None` when nothing is known
    /// about the operation.
    fn deps(&self, op: OpRef) -> Option<&[DepInfo]>;

    /// Cycles `op` needs before its result is final.
    fn steps_to_finish(&self, op: OpRef) -> u32;
}

/// Table-backed [LatencyOracle].
#[derive(Debug, Default, Clone)]
pub struct DetailLatencyInfo {
    deps: HashMap<OpRef, Vec<DepInfo>>,
    steps: HashMap<OpRef, u32>,
}

impl DetailLatencyInfo {
    /// Seed the table with every operation's steps to finish.
    pub fn from_ops(ops: &OpTable) -> Self {
        Self {
            deps: ops.keys().map(|op| (op, vec![])).collect(),
            steps: ops.iter().map(|(k, o)| (k, o.steps_to_finish)).collect(),
        }
    }

    pub fn add_dep(&mut self, op: OpRef, dep: DepInfo) {
        self.deps.entry(op).or_default().push(dep);
    }

    pub fn set_steps(&mut self, op: OpRef, steps: u32) {
        self.steps.insert(op, steps);
    }
}

impl LatencyOracle for DetailLatencyInfo {
    fn deps(&self, op: OpRef) -> Option<&[DepInfo]> {
        self.deps.get(&op).map(|d| d.as_slice())
    }

    fn steps_to_finish(&self, op: OpRef) -> u32 {
        self.steps.get(&op).copied().unwrap_or(0)
    }
}
