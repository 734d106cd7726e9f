//! The intermediate representation substrate.
//!
//! This module provides the IR the optimization core operates on:
//!
//! - [`types`] - the structural type system with widths and alignment
//! - [`value`] - symbolic operands (literals, vectors, locals, registers)
//! - [`local`] - the named storage locations of a method
//! - [`instruction`] - instructions, condition codes and decorations
//! - [`block`] - basic blocks with mutation-stable instruction storage
//! - [`walker`] - copyable bidirectional instruction cursors
//! - [`method`] - methods: blocks, the local table and the mutation API
//! - [`module`] - the per-compilation container of kernels

pub mod block;
pub mod instruction;
pub mod local;
pub mod method;
pub mod module;
pub mod types;
pub mod value;
pub mod walker;

pub use block::{BasicBlock, BlockId, InstrRef};
pub use instruction::{ConditionCode, Decorations, Instruction, OpCode};
pub use local::{Local, LocalId, ANY_ELEMENT};
pub use method::Method;
pub use module::Module;
pub use types::{AddressSpace, DataType, StructType, NATIVE_VECTOR_WIDTH};
pub use value::{Literal, Register, SimdVector, Value, ValueKind};
pub use walker::Walker;
