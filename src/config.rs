//! Compilation configuration consumed by the optimization core.

use rustc_hash::FxHashSet;
use strum::{Display, EnumIter, EnumString};

/// How aggressively to optimize.
///
/// Levels are ordered: every pass enabled by a level is also enabled by
/// all higher levels. Even [`OptimizationLevel::None`] keeps the
/// normalization-only passes enabled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display, EnumIter, EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum OptimizationLevel {
    /// Only normalization steps required for correct code.
    None,
    /// Cheap optimizations with good cost/benefit.
    Basic,
    /// The default set.
    #[default]
    Medium,
    /// Everything, including slow and experimental passes.
    Full,
}

/// Tuning knobs that do not select passes.
#[derive(Debug, Clone)]
pub struct AdditionalOptions {
    /// Upper bound on iterations of the repeat-phase fixed-point loop.
    ///
    /// Reaching the cap is not an error; it logs a warning and the
    /// compilation completes normally.
    pub max_optimization_iterations: u32,
}

impl Default for AdditionalOptions {
    fn default() -> Self {
        Self {
            max_optimization_iterations: 1000,
        }
    }
}

/// The configuration fields consumed by the optimization core.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    /// The optimization level preset.
    pub optimization_level: OptimizationLevel,
    /// Pass parameter names to enable regardless of the level.
    pub additional_enabled_optimizations: FxHashSet<String>,
    /// Pass parameter names to disable regardless of the level.
    pub additional_disabled_optimizations: FxHashSet<String>,
    /// Further tuning options.
    pub additional_options: AdditionalOptions,
}

impl Configuration {
    /// Creates a configuration with the given level and defaults
    /// otherwise.
    #[must_use]
    pub fn with_level(level: OptimizationLevel) -> Self {
        Self {
            optimization_level: level,
            ..Self::default()
        }
    }
}
