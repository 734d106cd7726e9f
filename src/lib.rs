// Copyright 2025-2026 The lanec authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! # lanec
//!
//! The optimization and analysis core of a compiler back-end that lowers
//! a vendor-neutral intermediate representation of compute kernels for a
//! 16-lane SIMD accelerator with an explicit on-chip scratchpad (VPM) and
//! DMA-backed main memory.
//!
//! # Architecture
//!
//! The crate is organized in layers, leaves first:
//!
//! - **IR substrate** ([`ir`]): values, types, locals, instructions,
//!   basic blocks with mutation-stable cursors, methods and modules
//! - **Analysis framework** ([`analysis`]): direction-parameterized
//!   intra-block analyses and per-block global analyses, each driven by a
//!   transfer function over a lattice value
//! - **Transformation kit** ([`transform`]): composable rewrite helpers
//!   (sign normalization and restoration, multi-level index calculation,
//!   byte swapping) that mutate the IR in place through a cursor
//! - **Address lowering** ([`lowering`]): bridges symbolic pointer
//!   arithmetic to concrete scratchpad offsets
//! - **Pass manager** ([`optimizer`]): the static pass catalog, the
//!   optimization-level presets and the per-kernel fixed-point driver
//!
//! # Usage
//!
//! ```rust
//! use lanec::prelude::*;
//!
//! // build a trivial kernel
//! let mut method = Method::new("copy");
//! let block = method.add_block("%entry");
//! let x = method.add_new_local(DataType::INT32, "%x");
//! method.append(
//!     block,
//!     Instruction::new(
//!         OpCode::Add,
//!         vec![Value::int(20), Value::int(22)],
//!         Some(x),
//!     ),
//! );
//!
//! let mut module = Module::new("program");
//! module.add_kernel(method);
//!
//! // run the full pass pipeline
//! let config = Configuration::with_level(OptimizationLevel::Medium);
//! Optimizer::new(config).optimize(&mut module, &NullProfiler)?;
//! # Ok::<(), lanec::Error>(())
//! ```
//!
//! # Concurrency
//!
//! Kernels are optimized concurrently, one worker task per kernel. The
//! module is shared read-only, each method is owned exclusively by its
//! task, and the pass catalog and level presets are immutable program-
//! lifetime constants. The [`profiling::Profiler`] sink must be
//! internally thread-safe.

pub mod analysis;
pub mod config;
pub mod error;
pub mod ir;
pub mod lowering;
pub mod optimizer;
pub mod pool;
pub mod prelude;
pub mod profiling;
pub mod transform;

pub use config::{Configuration, OptimizationLevel};
pub use error::{CompilationStage, Error, Result};
