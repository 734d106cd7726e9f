//! Benchmarks of the optimization pass driver.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use lanec::prelude::*;

// a straight-line kernel with foldable arithmetic and dead results
fn arithmetic_kernel(length: i32) -> Method {
    let mut method = Method::new("bench");
    let block = method.add_block("%entry");
    let mut previous = Value::int(1);
    for index in 0..length {
        let out = method.add_new_local(DataType::INT32, "%t");
        method.append(
            block,
            Instruction::new(
                OpCode::Add,
                vec![previous.clone(), Value::int(index)],
                Some(out.clone()),
            ),
        );
        previous = out;
    }
    let sink = method.add_new_local(DataType::void_pointer(), "%out");
    method.append(
        block,
        Instruction::new(OpCode::Store, vec![previous], Some(sink)),
    );
    method
}

fn bench_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize");
    for level in [
        OptimizationLevel::None,
        OptimizationLevel::Basic,
        OptimizationLevel::Medium,
        OptimizationLevel::Full,
    ] {
        group.bench_function(level.to_string(), |b| {
            let optimizer = Optimizer::new(Configuration::with_level(level));
            b.iter_batched(
                || {
                    let mut module = Module::new("bench");
                    module.add_kernel(arithmetic_kernel(128));
                    module
                },
                |mut module| {
                    optimizer.optimize(&mut module, &NullProfiler).unwrap();
                    module
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_single_steps_walk(c: &mut Criterion) {
    c.bench_function("single_steps_walk", |b| {
        let mut config = Configuration::with_level(OptimizationLevel::None);
        config
            .additional_enabled_optimizations
            .insert("single-steps".to_string());
        config
            .additional_disabled_optimizations
            .insert("split-read-write".to_string());
        let optimizer = Optimizer::new(config);
        b.iter_batched(
            || {
                let mut module = Module::new("bench");
                module.add_kernel(arithmetic_kernel(256));
                module
            },
            |mut module| {
                optimizer.optimize(&mut module, &NullProfiler).unwrap();
                module
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_levels, bench_single_steps_walk);
criterion_main!(benches);
