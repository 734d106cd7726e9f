//! The pass manager: catalog, level presets and the fixed-point driver.
//!
//! The catalog is a program-lifetime constant enumerating every pass with
//! its stable user-facing parameter name, its phase and its action. The
//! driver runs the three phases in order per kernel method:
//!
//! 1. *initial* passes once, in catalog order - the only phase allowed to
//!    change the CFG,
//! 2. *repeat* passes in a fixed-point loop with early exit and an
//!    iteration cap,
//! 3. *final* passes once, in catalog order.
//!
//! Kernels are dispatched to a worker pool with one task per kernel; the
//! module is shared read-only.

pub mod passes;
pub mod steps;

use log::{debug, info, log_enabled, warn, Level};
use rustc_hash::FxHashSet;
use std::sync::LazyLock;
use strum::{Display, EnumIter};

use crate::config::{Configuration, OptimizationLevel};
use crate::error::{Error, Result};
use crate::ir::method::Method;
use crate::ir::module::Module;
use crate::ir::walker::Walker;
use crate::pool::ThreadPool;
use crate::profiling::{Profiler, COUNTER_OPTIMIZATION};

/// The phase a pass belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum PassPhase {
    /// Runs once before everything else; may restructure the CFG.
    Initial,
    /// Runs in the fixed-point loop; intra-block only.
    Repeat,
    /// Runs once after the fixed point; intra-block only.
    Final,
}

impl PassPhase {
    /// Parses a phase tag.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownPassPhase`] for tags outside the closed set.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "initial" => Ok(Self::Initial),
            "repeat" => Ok(Self::Repeat),
            "final" => Ok(Self::Final),
            _ => Err(Error::UnknownPassPhase {
                name: name.to_string(),
            }),
        }
    }
}

/// The callable behind a pass: returns whether the method changed.
pub type PassAction = fn(&Module, &mut Method, &Configuration) -> Result<bool>;

/// The callable behind a step: returns the continuation cursor and
/// whether the step changed the method.
pub type StepAction = fn(&Module, &mut Method, Walker, &Configuration) -> Result<(Walker, bool)>;

/// A cataloged method-level transformation.
#[derive(Debug)]
pub struct OptimizationPass {
    /// Human-readable name used in logs.
    pub name: &'static str,
    /// Stable user-facing identifier used in configuration sets.
    pub parameter_name: &'static str,
    /// One-line description of what the pass does.
    pub description: &'static str,
    /// The phase the pass runs in.
    pub phase: PassPhase,
    action: PassAction,
}

impl OptimizationPass {
    /// Creates a pass record; used by the catalog and by tests that
    /// exercise the driver with synthetic passes.
    #[must_use]
    pub const fn new(
        name: &'static str,
        parameter_name: &'static str,
        action: PassAction,
        description: &'static str,
        phase: PassPhase,
    ) -> Self {
        Self {
            name,
            parameter_name,
            description,
            phase,
            action,
        }
    }

    /// Runs the pass on `method`.
    ///
    /// # Errors
    ///
    /// Whatever the pass action signals; the driver aborts the method.
    pub fn run(
        &self,
        module: &Module,
        method: &mut Method,
        config: &Configuration,
    ) -> Result<bool> {
        (self.action)(module, method, config)
    }
}

/// A finer-grained rewrite composed inside the `single-steps` pass.
#[derive(Debug)]
pub struct OptimizationStep {
    /// Name of the step, for logs.
    pub name: &'static str,
    action: StepAction,
}

impl OptimizationStep {
    pub(crate) const fn new(name: &'static str, action: StepAction) -> Self {
        Self { name, action }
    }

    /// Runs the step at the cursor.
    ///
    /// # Errors
    ///
    /// Whatever the step action signals.
    pub fn run(
        &self,
        module: &Module,
        method: &mut Method,
        it: Walker,
        config: &Configuration,
    ) -> Result<(Walker, bool)> {
        (self.action)(module, method, it, config)
    }
}

/// The static catalog of every optimization pass.
///
/// The first block of passes modifies the control flow of the method;
/// once it has run, the CFG is stable. The second block works within
/// single basic blocks and is iterated until quiescent. The third block
/// runs once at the end and may introduce constructs the repeated passes
/// do not handle.
pub static ALL_PASSES: &[OptimizationPass] = &[
    OptimizationPass::new(
        "AddWorkGroupLoops",
        "loop-work-groups",
        passes::loops::add_work_group_loop,
        "merges all work-group executions into a single kernel execution",
        PassPhase::Initial,
    ),
    OptimizationPass::new(
        "ReorderBasicBlocks",
        "reorder-blocks",
        passes::blocks::reorder_basic_blocks,
        "reorders basic blocks to eliminate as many explicit branches as possible",
        PassPhase::Initial,
    ),
    OptimizationPass::new(
        "SimplifyConditionalBlocks",
        "simplify-conditionals",
        passes::blocks::simplify_conditional_blocks,
        "replaces selected if-else blocks with conditionally executed instructions",
        PassPhase::Initial,
    ),
    OptimizationPass::new(
        "SimplifyBranches",
        "simplify-branches",
        passes::blocks::simplify_branches,
        "combines successive branches to the same label and replaces unnecessary branches with fall-through",
        PassPhase::Initial,
    ),
    OptimizationPass::new(
        "MergeBasicBlocks",
        "merge-blocks",
        passes::blocks::merge_adjacent_basic_blocks,
        "merges adjacent basic blocks if there are no other conflicting transitions",
        PassPhase::Initial,
    ),
    OptimizationPass::new(
        "VectorizeLoops",
        "vectorize-loops",
        passes::loops::vectorize_loops,
        "vectorizes supported types of loops",
        PassPhase::Initial,
    ),
    OptimizationPass::new(
        "SingleSteps",
        "single-steps",
        steps::run_single_steps,
        "runs all the single-step optimizations in one walk over the instructions",
        PassPhase::Repeat,
    ),
    OptimizationPass::new(
        "CombineRotations",
        "combine-rotations",
        passes::combine::combine_vector_rotations,
        "combines chained rotations into a single rotation",
        PassPhase::Repeat,
    ),
    OptimizationPass::new(
        "EliminateMoves",
        "eliminate-moves",
        passes::cleanup::eliminate_redundant_moves,
        "replaces moves with the operation producing their source",
        PassPhase::Repeat,
    ),
    OptimizationPass::new(
        "CommonSubexpressionElimination",
        "eliminate-common-subexpressions",
        passes::cleanup::eliminate_common_subexpressions,
        "eliminates repeated calculations of common expressions by re-using previous results",
        PassPhase::Repeat,
    ),
    OptimizationPass::new(
        "EliminateBitOperations",
        "eliminate-bit-operations",
        passes::cleanup::eliminate_redundant_bit_op,
        "rewrites redundant bit operations",
        PassPhase::Repeat,
    ),
    OptimizationPass::new(
        "PropagateMoves",
        "copy-propagation",
        passes::cleanup::propagate_moves,
        "replaces operands with their moved-from value",
        PassPhase::Repeat,
    ),
    OptimizationPass::new(
        "RemoveFlags",
        "remove-unused-flags",
        passes::cleanup::remove_useless_flags,
        "rewrites and removes flag updates without conditional consumers",
        PassPhase::Repeat,
    ),
    OptimizationPass::new(
        "EliminateDeadCode",
        "eliminate-dead-code",
        passes::cleanup::eliminate_dead_code,
        "eliminates dead code (moves to self, unread results, ...)",
        PassPhase::Repeat,
    ),
    OptimizationPass::new(
        "CompressWorkGroupInfo",
        "compress-work-group-info",
        passes::workgroup::compress_work_group_locals,
        "compresses work-group info into a single local",
        PassPhase::Final,
    ),
    OptimizationPass::new(
        "SplitReadAfterWrites",
        "split-read-write",
        passes::cleanup::split_read_after_writes,
        "splits read-after-writes (except if the local is used only very locally), so the reordering and register-allocation have an easier job",
        PassPhase::Final,
    ),
    OptimizationPass::new(
        "CombineConstantLoads",
        "combine-loads",
        passes::combine::combine_loading_constants,
        "combines loadings of the same constant value within a small range of a basic block",
        PassPhase::Final,
    ),
    OptimizationPass::new(
        "RemoveConstantLoadInLoops",
        "extract-loads-from-loops",
        passes::loops::remove_constant_load_in_loops,
        "moves constant loads in (nested) loops outside the loops",
        PassPhase::Final,
    ),
    OptimizationPass::new(
        "CacheAcrossWorkGroup",
        "work-group-cache",
        passes::workgroup::cache_work_group_dma_access,
        "finds memory access across the work-group which can be cached in the scratchpad to combine the DMA operations",
        PassPhase::Final,
    ),
    OptimizationPass::new(
        "InstructionScheduler",
        "schedule-instructions",
        passes::schedule::reorder_instructions,
        "schedules instructions according to their dependencies within basic blocks",
        PassPhase::Final,
    ),
    OptimizationPass::new(
        "ReorderInstructions",
        "reorder",
        passes::schedule::reorder_within_basic_blocks,
        "re-orders instructions to eliminate more NOPs and stall cycles",
        PassPhase::Final,
    ),
    OptimizationPass::new(
        "CombineOperations",
        "combine",
        passes::combine::combine_operations,
        "runs peep-hole optimization to combine ALU-operations",
        PassPhase::Final,
    ),
];

// the inclusive per-level preset sets, computed once
static LEVEL_PASSES: LazyLock<[(OptimizationLevel, FxHashSet<&'static str>); 4]> =
    LazyLock::new(|| {
        let mut sets: [(OptimizationLevel, FxHashSet<&'static str>); 4] = [
            (OptimizationLevel::None, FxHashSet::default()),
            (OptimizationLevel::Basic, FxHashSet::default()),
            (OptimizationLevel::Medium, FxHashSet::default()),
            (OptimizationLevel::Full, FxHashSet::default()),
        ];
        let mut accumulated: FxHashSet<&'static str> = FxHashSet::default();
        // normalization-only steps stay enabled even without optimization
        accumulated.insert("split-read-write");
        sets[0].1 = accumulated.clone();
        accumulated.extend([
            "reorder-blocks",
            "simplify-branches",
            "eliminate-dead-code",
            "single-steps",
            "reorder",
            "combine",
            "remove-unused-flags",
            "loop-work-groups",
        ]);
        sets[1].1 = accumulated.clone();
        accumulated.extend([
            "merge-blocks",
            "combine-rotations",
            "eliminate-moves",
            "eliminate-bit-operations",
            "copy-propagation",
            "combine-loads",
        ]);
        sets[2].1 = accumulated.clone();
        accumulated.extend([
            "vectorize-loops",
            "extract-loads-from-loops",
            "schedule-instructions",
            "work-group-cache",
            "eliminate-common-subexpressions",
            "simplify-conditionals",
        ]);
        sets[3].1 = accumulated;
        sets
    });

/// The parameter names of the passes a level enables (inclusive of all
/// lower levels).
#[must_use]
pub fn enabled_passes(level: OptimizationLevel) -> &'static FxHashSet<&'static str> {
    &LEVEL_PASSES
        .iter()
        .find(|(set_level, _)| *set_level == level)
        .expect("every level has a preset")
        .1
}

/// The per-module pass driver.
///
/// Construction selects the enabled passes from the catalog and
/// partitions them into the three phase vectors; both are immutable
/// afterwards, so the driver can be shared across worker threads.
pub struct Optimizer {
    config: Configuration,
    initial_passes: Vec<&'static OptimizationPass>,
    repeating_passes: Vec<&'static OptimizationPass>,
    final_passes: Vec<&'static OptimizationPass>,
}

impl Optimizer {
    /// Selects the enabled passes for `config`.
    ///
    /// A pass is enabled if it is in the `additional_enabled` set or in
    /// the level preset, and not in the `additional_disabled` set; the
    /// disabled set wins. Catalog order is preserved.
    #[must_use]
    pub fn new(config: Configuration) -> Self {
        let level_set = enabled_passes(config.optimization_level);
        let mut optimizer = Self {
            config,
            initial_passes: Vec::new(),
            repeating_passes: Vec::new(),
            final_passes: Vec::new(),
        };
        for pass in ALL_PASSES {
            if optimizer
                .config
                .additional_disabled_optimizations
                .contains(pass.parameter_name)
            {
                continue;
            }
            let force_enabled = optimizer
                .config
                .additional_enabled_optimizations
                .contains(pass.parameter_name);
            if force_enabled || level_set.contains(pass.parameter_name) {
                optimizer.add_to_phase(pass);
            }
        }
        optimizer
    }

    /// Builds a driver over an explicit pass selection, bypassing the
    /// level presets. The passes are partitioned by their phase tags in
    /// the order given.
    #[must_use]
    pub fn with_passes(
        config: Configuration,
        selected: &[&'static OptimizationPass],
    ) -> Self {
        let mut optimizer = Self {
            config,
            initial_passes: Vec::new(),
            repeating_passes: Vec::new(),
            final_passes: Vec::new(),
        };
        for pass in selected {
            optimizer.add_to_phase(pass);
        }
        optimizer
    }

    fn add_to_phase(&mut self, pass: &'static OptimizationPass) {
        match pass.phase {
            PassPhase::Initial => self.initial_passes.push(pass),
            PassPhase::Repeat => self.repeating_passes.push(pass),
            PassPhase::Final => self.final_passes.push(pass),
        }
    }

    /// The enabled initial-phase passes, in execution order.
    #[must_use]
    pub fn initial_passes(&self) -> &[&'static OptimizationPass] {
        &self.initial_passes
    }

    /// The enabled repeat-phase passes, in execution order.
    #[must_use]
    pub fn repeating_passes(&self) -> &[&'static OptimizationPass] {
        &self.repeating_passes
    }

    /// The enabled final-phase passes, in execution order.
    #[must_use]
    pub fn final_passes(&self) -> &[&'static OptimizationPass] {
        &self.final_passes
    }

    /// All enabled parameter names, for inspection and tests.
    #[must_use]
    pub fn enabled_parameter_names(&self) -> FxHashSet<&'static str> {
        self.initial_passes
            .iter()
            .chain(&self.repeating_passes)
            .chain(&self.final_passes)
            .map(|pass| pass.parameter_name)
            .collect()
    }

    /// Optimizes every kernel of the module, one worker task per kernel.
    ///
    /// # Errors
    ///
    /// The first error any pass signals; the affected method is aborted,
    /// no retry is attempted.
    pub fn optimize(&self, module: &mut Module, profiler: &dyn Profiler) -> Result<()> {
        let mut kernels = module.take_kernels();
        let shared: &Module = module;
        let result = ThreadPool::new("Optimizer").schedule_all(&mut kernels, |method| {
            self.run_method(shared, method, profiler)
        });
        module.put_kernels(kernels);
        result
    }

    /// Runs all phases on a single method.
    fn run_method(
        &self,
        module: &Module,
        method: &mut Method,
        profiler: &dyn Profiler,
    ) -> Result<()> {
        debug!("-----");
        info!("Running optimization passes for: {}", method.name());
        let num_instructions = method.count_instructions();

        let mut index = 0;
        for pass in &self.initial_passes {
            Self::run_pass(pass, index, module, method, &self.config, profiler)?;
            index += 100;
        }

        let start_index = index;
        let max_iterations = self.config.additional_options.max_optimization_iterations;
        let mut iterations_used: u32 = 0;
        let mut last_changing: Option<usize> = None;
        let mut quiescent = self.repeating_passes.is_empty();
        while !quiescent && iterations_used < max_iterations {
            debug!("Running optimization iteration {iterations_used}...");
            index = start_index;
            for (position, pass) in self.repeating_passes.iter().enumerate() {
                let changed =
                    Self::run_pass(pass, index, module, method, &self.config, profiler)?;
                if changed {
                    last_changing = Some(position);
                } else if last_changing == Some(position) {
                    // a full sweep produced no change since this pass last
                    // changed anything
                    quiescent = true;
                    break;
                }
                index += 100;
            }
            iterations_used += 1;
        }
        if !quiescent
            && iterations_used >= max_iterations
            && max_iterations > 0
            && self.config.optimization_level != OptimizationLevel::None
        {
            warn!(
                "Stopped optimizing, because the iteration limit was reached. This indicates \
                 either an error in the optimizations or that there is more optimization to be done!"
            );
        }

        index = start_index + self.repeating_passes.len() * 100;
        for pass in &self.final_passes {
            Self::run_pass(pass, index, module, method, &self.config, profiler)?;
            index += 100;
        }

        if log_enabled!(Level::Info) {
            let now = method.count_instructions();
            if now == num_instructions {
                info!("Optimizations done in {iterations_used} iterations");
            } else {
                info!(
                    "Optimizations done in {iterations_used} iterations, changed number of instructions from {num_instructions} to {now}"
                );
            }
        }
        profiler.counter(
            COUNTER_OPTIMIZATION + index,
            "OptimizationIterations",
            iterations_used as usize,
        );
        debug!("-----");
        Ok(())
    }

    fn run_pass(
        pass: &OptimizationPass,
        index: usize,
        module: &Module,
        method: &mut Method,
        config: &Configuration,
        profiler: &dyn Profiler,
    ) -> Result<bool> {
        debug!("Running pass: {}", pass.name);
        profiler.counter(
            COUNTER_OPTIMIZATION + index,
            &format!("{} (before)", pass.name),
            method.count_instructions(),
        );
        profiler.start(pass.name);
        let changed = pass.run(module, method, config)?;
        profiler.end(pass.name);
        profiler.counter_with_prev(
            COUNTER_OPTIMIZATION + index + 10,
            &format!("{} (after)", pass.name),
            method.count_instructions(),
            COUNTER_OPTIMIZATION + index,
        );
        Ok(changed)
    }
}
