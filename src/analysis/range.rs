//! Pre-analyzed memory access ranges.
//!
//! A [`MemoryAccessRange`] summarizes how the address of a memory access
//! decomposes into a constant part and work-item dependent dynamic parts.
//! The address lowering recombines the dynamic parts into a concrete
//! offset (see [`crate::lowering`]).

use std::fmt;

use crate::ir::instruction::Decorations;
use crate::ir::value::Value;

/// Decomposition of a memory address into constant and dynamic parts.
///
/// The dynamic parts are kept in insertion order so that recombining them
/// is deterministic run-to-run.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessRange {
    /// The constant byte offset common to all work-items, if any.
    pub constant_offset: Option<Value>,
    /// The work-item dependent address parts with the decorations of
    /// their producing instructions.
    pub dynamic_address_parts: Vec<(Value, Decorations)>,
    /// The shift count scaling element indices to byte offsets, if the
    /// access was strength-reduced to a shift.
    pub type_size_shift: Option<Value>,
}

impl MemoryAccessRange {
    /// Creates an empty range.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dynamic address part.
    pub fn add_dynamic_part(&mut self, value: Value, decorations: Decorations) {
        self.dynamic_address_parts.push((value, decorations));
    }
}

impl fmt::Display for MemoryAccessRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "range(")?;
        if let Some(constant) = &self.constant_offset {
            write!(f, "constant {constant}, ")?;
        }
        write!(f, "{} dynamic parts", self.dynamic_address_parts.len())?;
        if self.type_size_shift.is_some() {
            write!(f, ", shifted")?;
        }
        write!(f, ")")
    }
}
