//! IR instructions and their decorations.
//!
//! An [`Instruction`] is a tagged record: an operation code, a list of
//! operand [`Value`]s, an optional output value, a bitset of
//! [`Decorations`], a condition code for predicated execution and a
//! flag-setting bit. Branches additionally carry a target block.
//!
//! Instructions execute conditionally on the accelerator: an instruction
//! with a condition other than [`ConditionCode::Always`] only commits its
//! result on lanes where the current flags match.

use std::fmt;

use bitflags::bitflags;

use crate::ir::block::BlockId;
use crate::ir::local::LocalId;
use crate::ir::value::{Literal, SimdVector, Value, ValueKind};

bitflags! {
    /// Semantic properties attached to an instruction.
    ///
    /// Decorations form a small, closed set of flags. They compose with
    /// the crate's `&` (intersection) and `|` (union) operators; the
    /// address combiner intersects decorations so that only properties
    /// holding of both operands survive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Decorations: u32 {
        /// The result is known to be non-negative.
        const UNSIGNED_RESULT = 1 << 0;
        /// The instruction inserts a single element into a vector.
        const ELEMENT_INSERTION = 1 << 1;
        /// The value is identical for all work-items of the work-group.
        const WORK_GROUP_UNIFORM = 1 << 2;
        /// The instruction materializes a constant.
        const CONSTANT_LOAD = 1 << 3;
        /// The instruction was produced by the loop vectorizer.
        const AUTO_VECTORIZED = 1 << 4;
    }
}

impl Decorations {
    /// Keeps only the properties that hold of both operands.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        self & other
    }
}

/// The operation an instruction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// No operation.
    Nop,
    /// Copies the single operand to the output.
    Move,
    /// 32-bit wrapping addition.
    Add,
    /// 32-bit wrapping subtraction.
    Sub,
    /// Full 32-bit multiplication (lowered later by the intrinsifier).
    Mul,
    /// Hardware 24-bit multiplication.
    Mul24,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Bitwise complement of the single operand.
    Not,
    /// Logical shift left.
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Asr,
    /// Bitwise rotate right.
    Ror,
    /// Signed minimum.
    Min,
    /// Signed maximum.
    Max,
    /// Full-vector lane rotation by the second operand.
    Rotate,
    /// Transfer of control to the target block.
    Branch,
    /// DMA-backed memory load through the address operand.
    Load,
    /// DMA-backed memory store through the output address.
    Store,
}

impl OpCode {
    /// Returns `true` for plain ALU computations (no control flow, no
    /// memory access).
    #[must_use]
    pub fn is_alu(self) -> bool {
        !matches!(self, Self::Branch | Self::Load | Self::Store | Self::Nop)
    }

    /// Returns `true` if operand order does not matter.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::Mul24 | Self::And | Self::Or | Self::Xor | Self::Min | Self::Max
        )
    }

    /// Evaluates the operation on literal operands.
    ///
    /// Returns `None` for operations that are not statically computable.
    /// Shift distances are taken modulo 32 like the hardware does.
    #[must_use]
    pub fn evaluate(self, args: &[Literal]) -> Option<Literal> {
        let unary = || args.first().copied();
        let binary = || match args {
            [a, b] => Some((a.unsigned(), b.unsigned())),
            _ => None,
        };
        let result = match self {
            Self::Move => return unary(),
            Self::Not => unary()?.unsigned() ^ u32::MAX,
            Self::Add => {
                let (a, b) = binary()?;
                a.wrapping_add(b)
            }
            Self::Sub => {
                let (a, b) = binary()?;
                a.wrapping_sub(b)
            }
            Self::Mul => {
                let (a, b) = binary()?;
                a.wrapping_mul(b)
            }
            Self::Mul24 => {
                let (a, b) = binary()?;
                (a & 0x00FF_FFFF).wrapping_mul(b & 0x00FF_FFFF)
            }
            Self::And => {
                let (a, b) = binary()?;
                a & b
            }
            Self::Or => {
                let (a, b) = binary()?;
                a | b
            }
            Self::Xor => {
                let (a, b) = binary()?;
                a ^ b
            }
            Self::Shl => {
                let (a, b) = binary()?;
                a << (b & 31)
            }
            Self::Shr => {
                let (a, b) = binary()?;
                a >> (b & 31)
            }
            Self::Asr => {
                let (a, b) = binary()?;
                ((a as i32) >> (b & 31)) as u32
            }
            Self::Ror => {
                let (a, b) = binary()?;
                a.rotate_right(b & 31)
            }
            Self::Min => {
                let (a, b) = binary()?;
                (a as i32).min(b as i32) as u32
            }
            Self::Max => {
                let (a, b) = binary()?;
                (a as i32).max(b as i32) as u32
            }
            Self::Nop | Self::Rotate | Self::Branch | Self::Load | Self::Store => return None,
        };
        Some(Literal::new(result))
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nop => "nop",
            Self::Move => "mov",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Mul24 => "mul24",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Not => "not",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Asr => "asr",
            Self::Ror => "ror",
            Self::Min => "min",
            Self::Max => "max",
            Self::Rotate => "rotate",
            Self::Branch => "br",
            Self::Load => "load",
            Self::Store => "store",
        };
        write!(f, "{name}")
    }
}

/// The condition under which an instruction commits its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConditionCode {
    /// Executes unconditionally.
    #[default]
    Always,
    /// Never executes.
    Never,
    /// Executes on lanes with the zero flag set.
    ZeroSet,
    /// Executes on lanes with the zero flag clear.
    ZeroClear,
    /// Executes on lanes with the negative flag set.
    NegativeSet,
    /// Executes on lanes with the negative flag clear.
    NegativeClear,
}

impl ConditionCode {
    /// The condition selecting exactly the complementary lanes.
    #[must_use]
    pub fn invert(self) -> Self {
        match self {
            Self::Always => Self::Never,
            Self::Never => Self::Always,
            Self::ZeroSet => Self::ZeroClear,
            Self::ZeroClear => Self::ZeroSet,
            Self::NegativeSet => Self::NegativeClear,
            Self::NegativeClear => Self::NegativeSet,
        }
    }

    /// Returns `true` if execution depends on the current flags.
    #[must_use]
    pub fn is_conditional(self) -> bool {
        !matches!(self, Self::Always)
    }
}

impl fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
            Self::ZeroSet => write!(f, "ifz"),
            Self::ZeroClear => write!(f, "ifnz"),
            Self::NegativeSet => write!(f, "ifn"),
            Self::NegativeClear => write!(f, "ifnn"),
        }
    }
}

/// A single IR instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    op: OpCode,
    args: Vec<Value>,
    output: Option<Value>,
    decorations: Decorations,
    condition: ConditionCode,
    set_flags: bool,
    target: Option<BlockId>,
}

impl Instruction {
    /// Creates an unconditional, non-flag-setting instruction.
    #[must_use]
    pub fn new(op: OpCode, args: Vec<Value>, output: Option<Value>) -> Self {
        Self {
            op,
            args,
            output,
            decorations: Decorations::empty(),
            condition: ConditionCode::Always,
            set_flags: false,
            target: None,
        }
    }

    /// Creates a move of `src` into `output`.
    #[must_use]
    pub fn mov(output: Value, src: Value) -> Self {
        Self::new(OpCode::Move, vec![src], Some(output))
    }

    /// Creates a branch to `target` taken under `condition`.
    #[must_use]
    pub fn branch(target: BlockId, condition: ConditionCode) -> Self {
        let mut instr = Self::new(OpCode::Branch, Vec::new(), None);
        instr.target = Some(target);
        instr.condition = condition;
        instr
    }

    /// Adds decorations, builder style.
    #[must_use]
    pub fn with_decorations(mut self, decorations: Decorations) -> Self {
        self.decorations |= decorations;
        self
    }

    /// Sets the condition code, builder style.
    #[must_use]
    pub fn with_condition(mut self, condition: ConditionCode) -> Self {
        self.condition = condition;
        self
    }

    /// Makes the instruction update the flags, builder style.
    #[must_use]
    pub fn with_set_flags(mut self) -> Self {
        self.set_flags = true;
        self
    }

    /// The operation code.
    #[must_use]
    pub fn op(&self) -> OpCode {
        self.op
    }

    /// The operand values.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The operand at `index`.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// The first operand.
    #[must_use]
    pub fn first_arg(&self) -> Option<&Value> {
        self.args.first()
    }

    /// The second operand.
    #[must_use]
    pub fn second_arg(&self) -> Option<&Value> {
        self.args.get(1)
    }

    pub(crate) fn args_mut(&mut self) -> &mut Vec<Value> {
        &mut self.args
    }

    /// The output value, if the instruction produces one.
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// The local written by this instruction, if any.
    #[must_use]
    pub fn output_local(&self) -> Option<LocalId> {
        self.output.as_ref().and_then(Value::check_local)
    }

    pub(crate) fn set_output(&mut self, output: Option<Value>) {
        self.output = output;
    }

    /// The decoration bitset.
    #[must_use]
    pub fn decorations(&self) -> Decorations {
        self.decorations
    }

    /// Returns `true` if the instruction carries the given decoration.
    #[must_use]
    pub fn has_decoration(&self, decoration: Decorations) -> bool {
        self.decorations.contains(decoration)
    }

    /// Adds decorations in place.
    pub fn add_decorations(&mut self, decorations: Decorations) {
        self.decorations |= decorations;
    }

    /// The condition under which the instruction commits.
    #[must_use]
    pub fn condition(&self) -> ConditionCode {
        self.condition
    }

    pub(crate) fn set_condition(&mut self, condition: ConditionCode) {
        self.condition = condition;
    }

    /// Returns `true` if the instruction updates the flags.
    #[must_use]
    pub fn sets_flags(&self) -> bool {
        self.set_flags
    }

    pub(crate) fn set_flag_setting(&mut self, set_flags: bool) {
        self.set_flags = set_flags;
    }

    /// The branch target, for branch instructions.
    #[must_use]
    pub fn branch_target(&self) -> Option<BlockId> {
        self.target
    }

    pub(crate) fn set_branch_target(&mut self, target: BlockId) {
        self.target = Some(target);
    }

    /// Returns `true` if removing the instruction could change observable
    /// behavior beyond its output local: control flow, memory traffic,
    /// register or flag state.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        if matches!(self.op, OpCode::Branch | OpCode::Load | OpCode::Store) {
            return true;
        }
        if self.set_flags {
            return true;
        }
        matches!(
            self.output.as_ref().map(|o| &o.kind),
            Some(ValueKind::Register(_))
        )
    }

    /// Returns `true` for an unconditional, non-flag-setting move.
    #[must_use]
    pub fn is_simple_move(&self) -> bool {
        self.op == OpCode::Move && self.condition == ConditionCode::Always && !self.set_flags
    }

    /// The locals read by the operands.
    pub fn read_locals(&self) -> impl Iterator<Item = LocalId> + '_ {
        self.args.iter().filter_map(Value::check_local)
    }

    /// Evaluates the instruction if all operands are literal.
    ///
    /// Scalar operands fold to a scalar literal; if any operand is a
    /// vector, the operation folds lane-wise with scalar operands
    /// broadcast. Returns `None` if any operand is symbolic or the
    /// operation is not computable.
    #[must_use]
    pub fn precalculate(&self) -> Option<Value> {
        let output_ty = self.output.as_ref()?.ty.clone();
        let mut width = None;
        for arg in &self.args {
            match &arg.kind {
                ValueKind::Literal(_) => {}
                ValueKind::Vector(v) => {
                    if *width.get_or_insert(v.width()) != v.width() {
                        return None;
                    }
                }
                _ => return None,
            }
        }
        match width {
            None => {
                let literals: Vec<Literal> =
                    self.args.iter().filter_map(Value::literal_value).collect();
                let result = self.op.evaluate(&literals)?;
                Some(Value::literal(result, output_ty))
            }
            Some(width) => {
                let mut lanes = Vec::with_capacity(width);
                for lane in 0..width {
                    let literals: Vec<Literal> = self
                        .args
                        .iter()
                        .map(|arg| match &arg.kind {
                            ValueKind::Literal(l) => *l,
                            ValueKind::Vector(v) => v.lanes()[lane],
                            _ => unreachable!("checked above"),
                        })
                        .collect();
                    lanes.push(self.op.evaluate(&literals)?);
                }
                Some(Value::vector(SimdVector::new(lanes), output_ty))
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(output) = &self.output {
            write!(f, "{output} = ")?;
        }
        write!(f, "{}", self.op)?;
        if self.set_flags {
            write!(f, ".setf")?;
        }
        if self.condition.is_conditional() {
            write!(f, ".{}", self.condition)?;
        }
        if let Some(target) = self.target {
            write!(f, " ->B{}", target.index())?;
        }
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
