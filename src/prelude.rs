//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use lanec::prelude::*;
//!
//! let mut module = Module::new("program");
//! module.add_kernel(Method::new("kernel"));
//!
//! let optimizer = Optimizer::new(Configuration::default());
//! optimizer.optimize(&mut module, &NullProfiler)?;
//! # Ok::<(), lanec::Error>(())
//! ```

pub use crate::config::{AdditionalOptions, Configuration, OptimizationLevel};
pub use crate::error::{CompilationStage, Error, Result};
pub use crate::ir::{
    AddressSpace, BasicBlock, BlockId, ConditionCode, DataType, Decorations, InstrRef,
    Instruction, Literal, Local, LocalId, Method, Module, OpCode, Register, SimdVector,
    StructType, Value, ValueKind, Walker, ANY_ELEMENT, NATIVE_VECTOR_WIDTH,
};
pub use crate::optimizer::{enabled_passes, OptimizationPass, Optimizer, PassPhase, ALL_PASSES};
pub use crate::profiling::{CollectingProfiler, NullProfiler, Profiler};
