//! Error and result types shared across the crate.

use std::fmt;

use thiserror::Error;

/// The compilation stage an error was raised in.
///
/// Errors carry their originating stage so that a front-end driver can
/// report where in the pipeline a kernel failed without inspecting the
/// error kind itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompilationStage {
    /// Normalization of front-end IR into accelerator-compatible form,
    /// including address-calculation lowering.
    Normalizer,
    /// The optimization pass driver and all cataloged passes.
    Optimizer,
    /// Lowering of symbolic constructs to scratchpad and DMA primitives.
    Lowering,
}

impl fmt::Display for CompilationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normalizer => write!(f, "normalizer"),
            Self::Optimizer => write!(f, "optimizer"),
            Self::Lowering => write!(f, "lowering"),
        }
    }
}

/// The generic error type covering all failures this library can signal.
///
/// Transformations fail fast: they signal one of these kinds and do not
/// attempt recovery. A failure during a pass aborts that pass and
/// propagates to the pass driver, which aborts the method.
///
/// # Error Categories
///
/// ## Transformation errors
/// - [`Error::InvalidOperand`] - a value a transformation cannot lower
/// - [`Error::InvalidContainerType`] - index calculation on a non-aggregate
/// - [`Error::NonLiteralStructIndex`] - dynamic struct field selector
/// - [`Error::TypeMismatch`] - computed pointer type disagrees with the destination
/// - [`Error::UnsupportedWidth`] - byte-swap on an unsupported bit width
///
/// ## Driver and lowering errors
/// - [`Error::UnknownPassPhase`] - a phase tag outside the closed set
/// - [`Error::Unimplemented`] - an explicitly unsupported lowering input
/// - [`Error::UnknownKey`] - analysis lookup for a non-analyzed key
#[derive(Error, Debug)]
pub enum Error {
    /// A transformation received a value it cannot lower.
    ///
    /// Raised e.g. for undefined operands or operands without a scalar
    /// bit width where one is required.
    #[error("{stage}: invalid operand - {detail}")]
    InvalidOperand {
        /// Stage the error was raised in.
        stage: CompilationStage,
        /// Human-readable detail including the offending value.
        detail: String,
    },

    /// Index calculation was applied to a type that has no elements.
    #[error("{stage}: invalid container type to retrieve element via index - {detail}")]
    InvalidContainerType {
        /// Stage the error was raised in.
        stage: CompilationStage,
        /// Human-readable detail including the offending type.
        detail: String,
    },

    /// A struct field was selected with a non-literal index.
    ///
    /// Struct field offsets are resolved at compile time, so the selector
    /// must be a literal.
    #[error("{stage}: can't access struct element with non-literal index - {detail}")]
    NonLiteralStructIndex {
        /// Stage the error was raised in.
        stage: CompilationStage,
        /// Human-readable detail including the offending index value.
        detail: String,
    },

    /// The computed pointer type disagrees with the declared destination type.
    #[error("{stage}: types of retrieving indices do not match - {detail}")]
    TypeMismatch {
        /// Stage the error was raised in.
        stage: CompilationStage,
        /// Human-readable detail including both types.
        detail: String,
    },

    /// Byte-swap was requested for a width other than 16 or 32 bits.
    #[error("{stage}: invalid width for byte-swap - {width} bits")]
    UnsupportedWidth {
        /// Stage the error was raised in.
        stage: CompilationStage,
        /// The offending bit width.
        width: u8,
    },

    /// A pass catalog entry carried a phase tag outside the closed set.
    #[error("unhandled optimization phase - {name}")]
    UnknownPassPhase {
        /// The unrecognized phase name.
        name: String,
    },

    /// A lowering path reached an input case that is explicitly unsupported.
    #[error("{stage}: not yet implemented - {detail}")]
    Unimplemented {
        /// Stage the error was raised in.
        stage: CompilationStage,
        /// Human-readable detail of the unsupported input.
        detail: String,
    },

    /// An analysis result was requested for a key that was never analyzed.
    #[error("no analysis result recorded for {detail}")]
    UnknownKey {
        /// Description of the missing key.
        detail: String,
    },
}

/// Convenience `Result` alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
