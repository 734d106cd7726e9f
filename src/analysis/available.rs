//! Available-expressions instantiation of the local analysis.
//!
//! A forward analysis tracking which pure expressions have already been
//! computed in the block and which local holds each result. The value
//! recorded at every instruction is the map *after* that instruction
//! executes; common-subexpression elimination consults the map recorded
//! at an instruction's predecessor to find reusable results.

use rustc_hash::FxHashMap;

use crate::analysis::local::LocalAnalysis;
use crate::ir::instruction::{Instruction, OpCode};
use crate::ir::local::LocalId;
use crate::ir::value::{Value, ValueKind};

/// A structural key identifying a pure computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression {
    /// The operation.
    pub op: OpCode,
    /// The operands, sorted for commutative operations.
    pub args: Vec<Value>,
}

impl Expression {
    /// Builds the key for an instruction, or `None` if the instruction is
    /// not a reusable pure computation.
    #[must_use]
    pub fn of(instr: &Instruction) -> Option<Self> {
        if !instr.op().is_alu() || instr.op() == OpCode::Move {
            return None;
        }
        if instr.condition().is_conditional() {
            return None;
        }
        instr.output_local()?;
        let mut args = instr.args().to_vec();
        if instr.op().is_commutative() {
            args.sort_by_key(sort_key);
        }
        Some(Self {
            op: instr.op(),
            args,
        })
    }

    /// Returns `true` if the expression reads `local`.
    #[must_use]
    pub fn reads(&self, local: LocalId) -> bool {
        self.args.iter().any(|arg| arg.has_local(local))
    }
}

// deterministic operand ordering for commutative operations
fn sort_key(value: &Value) -> (u8, u64) {
    match &value.kind {
        ValueKind::Literal(l) => (0, u64::from(l.unsigned())),
        ValueKind::Vector(v) => {
            let mixed = v
                .lanes()
                .iter()
                .fold(0u64, |acc, l| acc.rotate_left(7) ^ u64::from(l.unsigned()));
            (1, mixed)
        }
        ValueKind::Local(id) => (2, id.index() as u64),
        ValueKind::Register(r) => (3, *r as u64),
        ValueKind::Undefined => (4, 0),
    }
}

/// The lattice: available expressions mapped to the value holding them.
pub type AvailableValues = FxHashMap<Expression, Value>;

fn transfer(instr: &Instruction, before: &AvailableValues) -> AvailableValues {
    let mut available = before.clone();
    // a write invalidates every expression mentioning the local, and the
    // binding of any expression held in it
    if let Some(written) = instr.output_local() {
        available.retain(|expr, value| !expr.reads(written) && !value.has_local(written));
    }
    if let Some(expr) = Expression::of(instr) {
        if let Some(output) = instr.output() {
            available.entry(expr).or_insert_with(|| output.clone());
        }
    }
    available
}

/// Creates an available-expressions analysis with an empty initial map.
#[must_use]
pub fn available_expressions(
) -> LocalAnalysis<AvailableValues, impl Fn(&Instruction, &AvailableValues) -> AvailableValues> {
    LocalAnalysis::forward(transfer, AvailableValues::default())
}
