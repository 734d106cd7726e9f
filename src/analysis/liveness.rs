//! Live-locals instantiation of the local analysis.
//!
//! A backward analysis: a local is live at a point if it may be read
//! before being overwritten. The value recorded at every instruction is
//! the live set *before* that instruction executes.

use rustc_hash::FxHashSet;

use crate::analysis::local::LocalAnalysis;
use crate::ir::instruction::Instruction;
use crate::ir::local::LocalId;

/// The lattice of the liveness analysis: the set of live locals.
pub type LiveLocals = FxHashSet<LocalId>;

/// The transfer function of the liveness analysis.
///
/// An unconditional write kills its local; a conditional write does not,
/// since the previous value survives on unselected lanes. Reads make
/// their locals live.
fn transfer(instr: &Instruction, after: &LiveLocals) -> LiveLocals {
    let mut live = after.clone();
    if !instr.condition().is_conditional() {
        if let Some(written) = instr.output_local() {
            live.remove(&written);
        }
    }
    live.extend(instr.read_locals());
    live
}

/// Creates a liveness analysis seeded with the locals assumed live at the
/// block exit.
#[must_use]
pub fn liveness(
    live_out: LiveLocals,
) -> LocalAnalysis<LiveLocals, impl Fn(&Instruction, &LiveLocals) -> LiveLocals> {
    LocalAnalysis::backward(transfer, live_out)
}
