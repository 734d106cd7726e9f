//! End-to-end tests of the pass manager: level presets, driver
//! semantics, determinism and CFG stability.

use lanec::prelude::*;

fn simple_kernel() -> Method {
    let mut method = Method::new("kernel");
    let block = method.add_block("%entry");
    let x = method.add_new_local(DataType::INT32, "%x");
    let y = method.add_new_local(DataType::INT32, "%y");
    method.append(
        block,
        Instruction::new(
            OpCode::Add,
            vec![Value::int(7), Value::int(35)],
            Some(x.clone()),
        ),
    );
    method.append(
        block,
        Instruction::new(OpCode::Add, vec![x, Value::zero()], Some(y.clone())),
    );
    let sink = method.add_new_local(DataType::void_pointer(), "%out");
    method.append(block, Instruction::new(OpCode::Store, vec![y], Some(sink)));
    method
}

// ---------------------------------------------------------------------
// level presets
// ---------------------------------------------------------------------

#[test]
fn full_level_enables_every_pass_except_info_compression() {
    let optimizer = Optimizer::new(Configuration::with_level(OptimizationLevel::Full));
    let enabled = optimizer.enabled_parameter_names();

    let expected = [
        "loop-work-groups",
        "reorder-blocks",
        "simplify-conditionals",
        "simplify-branches",
        "merge-blocks",
        "vectorize-loops",
        "single-steps",
        "combine-rotations",
        "eliminate-moves",
        "eliminate-common-subexpressions",
        "eliminate-bit-operations",
        "copy-propagation",
        "remove-unused-flags",
        "eliminate-dead-code",
        "split-read-write",
        "combine-loads",
        "extract-loads-from-loops",
        "work-group-cache",
        "schedule-instructions",
        "reorder",
        "combine",
    ];
    for name in expected {
        assert!(enabled.contains(name), "full level must enable {name}");
    }
    assert!(!enabled.contains("compress-work-group-info"));
    assert_eq!(enabled.len(), expected.len());
}

#[test]
fn disabled_set_overrides_full_level() {
    let mut config = Configuration::with_level(OptimizationLevel::Full);
    config
        .additional_disabled_optimizations
        .insert("schedule-instructions".to_string());
    let optimizer = Optimizer::new(config);
    assert!(!optimizer
        .enabled_parameter_names()
        .contains("schedule-instructions"));
}

#[test]
fn levels_cascade_inclusively() {
    let none = enabled_passes(OptimizationLevel::None);
    let basic = enabled_passes(OptimizationLevel::Basic);
    let medium = enabled_passes(OptimizationLevel::Medium);
    let full = enabled_passes(OptimizationLevel::Full);
    assert!(none.is_subset(basic));
    assert!(basic.is_subset(medium));
    assert!(medium.is_subset(full));
}

// ---------------------------------------------------------------------
// driver semantics with synthetic passes
// ---------------------------------------------------------------------

// changes exactly as long as the method still has instructions: erases
// the first one per run
fn erase_one_instruction(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> lanec::Result<bool> {
    let walker = method.walk_all_instructions();
    if walker.is_end_of_method(method) {
        return Ok(false);
    }
    method.erase(walker);
    Ok(true)
}

fn never_changes(
    _module: &Module,
    _method: &mut Method,
    _config: &Configuration,
) -> lanec::Result<bool> {
    Ok(false)
}

fn always_changes(
    _module: &Module,
    method: &mut Method,
    _config: &Configuration,
) -> lanec::Result<bool> {
    let Some(entry) = method.entry() else {
        return Ok(false);
    };
    method.append(entry, Instruction::new(OpCode::Nop, vec![], None));
    Ok(true)
}

static PASS_A: OptimizationPass = OptimizationPass::new(
    "TestEraser",
    "test-eraser",
    erase_one_instruction,
    "erases one instruction per invocation",
    PassPhase::Repeat,
);
static PASS_B: OptimizationPass = OptimizationPass::new(
    "TestNoop",
    "test-noop",
    never_changes,
    "never changes anything",
    PassPhase::Repeat,
);
static PASS_GROWING: OptimizationPass = OptimizationPass::new(
    "TestGrower",
    "test-grower",
    always_changes,
    "always changes the method",
    PassPhase::Repeat,
);

#[test]
fn fixed_point_short_circuits_after_quiescence() {
    // method with exactly one instruction: A changes on its first run only
    let mut method = Method::new("kernel");
    let block = method.add_block("%entry");
    method.append(block, Instruction::new(OpCode::Nop, vec![], None));
    let mut module = Module::new("prog");
    module.add_kernel(method);

    let optimizer = Optimizer::with_passes(Configuration::default(), &[&PASS_A, &PASS_B]);
    let profiler = CollectingProfiler::new();
    optimizer.optimize(&mut module, &profiler).unwrap();

    // iteration 1: A=true, B=false; iteration 2: A=false -> stop before B
    assert_eq!(profiler.bracket_count("TestEraser"), 2);
    assert_eq!(profiler.bracket_count("TestNoop"), 1);
}

#[test]
fn iteration_cap_bounds_always_changing_pass() {
    let mut module = Module::new("prog");
    let mut method = Method::new("kernel");
    method.add_block("%entry");
    module.add_kernel(method);

    let mut config = Configuration::with_level(OptimizationLevel::Basic);
    config.additional_options.max_optimization_iterations = 3;
    let optimizer = Optimizer::with_passes(config, &[&PASS_GROWING]);
    let profiler = CollectingProfiler::new();

    // completes normally despite never reaching a fixed point
    optimizer.optimize(&mut module, &profiler).unwrap();
    assert_eq!(profiler.bracket_count("TestGrower"), 3);
    assert_eq!(module.kernels()[0].count_instructions(), 3);
}

#[test]
fn zero_iteration_cap_skips_repeat_phase() {
    let mut module = Module::new("prog");
    let mut method = Method::new("kernel");
    method.add_block("%entry");
    module.add_kernel(method);

    let mut config = Configuration::default();
    config.additional_options.max_optimization_iterations = 0;
    let optimizer = Optimizer::with_passes(config, &[&PASS_GROWING]);
    let profiler = CollectingProfiler::new();
    optimizer.optimize(&mut module, &profiler).unwrap();
    assert_eq!(profiler.bracket_count("TestGrower"), 0);
}

// ---------------------------------------------------------------------
// phase ordering and CFG stability
// ---------------------------------------------------------------------

#[test]
fn initial_passes_run_before_repeat_before_final() {
    let mut module = Module::new("prog");
    module.add_kernel(simple_kernel());

    let optimizer = Optimizer::new(Configuration::with_level(OptimizationLevel::Full));
    let profiler = CollectingProfiler::new();
    optimizer.optimize(&mut module, &profiler).unwrap();

    let phase_of = |name: &str| {
        ALL_PASSES
            .iter()
            .find(|pass| pass.name == name)
            .map(|pass| pass.phase)
            .expect("only cataloged passes run")
    };
    let sequence = profiler.pass_sequence();
    assert!(!sequence.is_empty());
    let mut seen_repeat = false;
    let mut seen_final = false;
    for name in &sequence {
        match phase_of(name) {
            PassPhase::Initial => {
                assert!(!seen_repeat && !seen_final, "{name} ran after a later phase");
            }
            PassPhase::Repeat => {
                assert!(!seen_final, "{name} ran after the final phase");
                seen_repeat = true;
            }
            PassPhase::Final => seen_final = true,
        }
    }
    assert!(seen_final);
}

fn branchy_kernel() -> Method {
    let mut method = Method::new("kernel");
    let entry = method.add_block("%entry");
    let left = method.add_block("%left");
    let right = method.add_block("%right");
    let exit = method.add_block("%exit");

    let x = method.add_new_local(DataType::INT32, "%x");
    let sink = method.add_new_local(DataType::void_pointer(), "%out");
    method.append(
        entry,
        Instruction::new(OpCode::Move, vec![Value::int(1)], None).with_set_flags(),
    );
    method.append(entry, Instruction::branch(right, ConditionCode::ZeroSet));
    method.append(left, Instruction::mov(x.clone(), Value::int(1)));
    method.append(left, Instruction::branch(exit, ConditionCode::Always));
    method.append(right, Instruction::mov(x.clone(), Value::int(2)));
    method.append(exit, Instruction::new(OpCode::Store, vec![x], Some(sink)));
    method
}

#[test]
fn repeat_and_final_phases_never_change_the_cfg() {
    let mut module = Module::new("prog");
    module.add_kernel(branchy_kernel());

    // freeze the CFG the way the driver does: run the initial phase once
    let initial: Vec<&'static OptimizationPass> = ALL_PASSES
        .iter()
        .filter(|pass| pass.phase == PassPhase::Initial)
        .collect();
    let frozen = Optimizer::with_passes(
        Configuration::with_level(OptimizationLevel::Full),
        &initial,
    );
    frozen.optimize(&mut module, &NullProfiler).unwrap();
    let edges_after_initial = module.kernels()[0].cfg_edges();

    // now run every repeat and final pass; the CFG must not move
    let later: Vec<&'static OptimizationPass> = ALL_PASSES
        .iter()
        .filter(|pass| pass.phase != PassPhase::Initial)
        .collect();
    let rest = Optimizer::with_passes(
        Configuration::with_level(OptimizationLevel::Full),
        &later,
    );
    rest.optimize(&mut module, &NullProfiler).unwrap();
    assert_eq!(module.kernels()[0].cfg_edges(), edges_after_initial);
}

// ---------------------------------------------------------------------
// determinism and whole-pipeline behavior
// ---------------------------------------------------------------------

#[test]
fn optimization_is_deterministic() {
    let run = || {
        let mut module = Module::new("prog");
        module.add_kernel(simple_kernel());
        module.add_kernel(branchy_kernel());
        let optimizer = Optimizer::new(Configuration::with_level(OptimizationLevel::Full));
        optimizer.optimize(&mut module, &NullProfiler).unwrap();
        module
            .kernels()
            .iter()
            .map(|method| method.to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn pipeline_folds_and_cleans_simple_kernel() {
    let mut module = Module::new("prog");
    module.add_kernel(simple_kernel());

    // without the work-group wrapping the arithmetic is all that remains
    let mut config = Configuration::with_level(OptimizationLevel::Medium);
    config
        .additional_disabled_optimizations
        .insert("loop-work-groups".to_string());
    let optimizer = Optimizer::new(config);
    optimizer.optimize(&mut module, &NullProfiler).unwrap();

    // 42 is computed at compile time and stored; the intermediate
    // computations collapse
    let method = &module.kernels()[0];
    assert!(method.count_instructions() <= 3);
    let has_store = method
        .blocks()
        .iter()
        .flat_map(|block| block.iter())
        .any(|(_, instr)| instr.op() == OpCode::Store);
    assert!(has_store);
}

#[test]
fn many_kernels_optimize_concurrently() {
    let mut module = Module::new("prog");
    for _ in 0..32 {
        module.add_kernel(simple_kernel());
    }
    let mut config = Configuration::with_level(OptimizationLevel::Medium);
    config
        .additional_disabled_optimizations
        .insert("loop-work-groups".to_string());
    let optimizer = Optimizer::new(config);
    optimizer.optimize(&mut module, &NullProfiler).unwrap();
    assert_eq!(module.kernels().len(), 32);
    for method in module.kernels() {
        assert!(method.count_instructions() <= 3);
    }
}

#[test]
fn none_level_runs_only_normalization() {
    let optimizer = Optimizer::new(Configuration::with_level(OptimizationLevel::None));
    assert_eq!(optimizer.enabled_parameter_names().len(), 1);

    let mut module = Module::new("prog");
    module.add_kernel(simple_kernel());
    let profiler = CollectingProfiler::new();
    optimizer.optimize(&mut module, &profiler).unwrap();
    assert_eq!(profiler.bracketed_passes(), vec!["SplitReadAfterWrites"]);
}
