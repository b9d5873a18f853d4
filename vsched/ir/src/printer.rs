//! Diagnostic dump of a [ScheduleGraph].
use crate::graph::ScheduleGraph;
use crate::op::{InstPtr, OpTable};
use crate::unit::ScheduleUnit;
use std::io;

/// Printer for the dependency graph. One line per unit:
/// `[idx] block#N opcode operand [offset] ... fu @slot <Dangling>`.
pub struct Printer;

impl Printer {
    /// Format the instructions of a unit, fused ones with their offset.
    fn write_instrs<F: io::Write>(
        unit: &ScheduleUnit,
        ops: &OpTable,
        f: &mut F,
    ) -> io::Result<()> {
        for (pos, (ptr, offset)) in unit.instrs().enumerate() {
            match ptr {
                InstPtr::Block(_) => write!(f, " entry")?,
                InstPtr::Exit(_) => write!(f, " exit")?,
                InstPtr::Op(op) => match ops.get(*op) {
                    Some(o) => {
                        write!(f, " {}", o.opcode)?;
                        if let Some(operand) = &o.operand {
                            write!(f, " {operand}")?;
                        }
                    }
                    None => write!(f, " <unknown>")?,
                },
            }
            if pos > 0 {
                write!(f, " {offset}")?;
            }
        }
        Ok(())
    }

    pub fn write_unit<F: io::Write>(
        unit: &ScheduleUnit,
        ops: &OpTable,
        f: &mut F,
    ) -> io::Result<()> {
        write!(f, "[{}] block#{}", unit.idx(), unit.block())?;
        Self::write_instrs(unit, ops, f)?;
        write!(f, " {}", unit.fu())?;
        match unit.slot() {
            Some(slot) => write!(f, " @{slot}")?,
            None => write!(f, " @-")?,
        }
        if unit.is_datapath() && unit.is_dangling() {
            write!(f, " <Dangling>")?;
        }
        writeln!(f)
    }

    pub fn write_graph<F: io::Write>(
        graph: &ScheduleGraph,
        ops: &OpTable,
        f: &mut F,
    ) -> io::Result<()> {
        for unit in graph.units() {
            Self::write_unit(unit, ops, f)?;
        }
        Ok(())
    }

    pub fn graph_to_string(graph: &ScheduleGraph, ops: &OpTable) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = Self::write_graph(graph, ops, &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}
