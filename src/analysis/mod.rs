//! The dataflow analysis framework.
//!
//! Two generic shapes cover the analyses the optimizer needs:
//!
//! - [`LocalAnalysis`] - intra-block, direction-parameterized, one value
//!   per instruction
//! - [`GlobalAnalysis`] - per-block summaries over the whole method
//!
//! Both are parameterized by a transfer function and a lattice value
//! type. Neither iterates to a fixed point on its own; drivers needing
//! fixed points compose instances themselves.
//!
//! The concrete instantiations shipped here ([`liveness`],
//! [`available_expressions`]) are the ones the cataloged passes consume.

pub mod available;
pub mod global;
pub mod liveness;
pub mod local;
pub mod range;

pub use available::{available_expressions, AvailableValues, Expression};
pub use global::GlobalAnalysis;
pub use liveness::{liveness, LiveLocals};
pub use local::{Direction, LocalAnalysis};
pub use range::MemoryAccessRange;
