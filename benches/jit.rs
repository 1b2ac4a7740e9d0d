mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use xlang::{JitEngine, Options};

fn bench_jit(c: &mut Criterion) {
    for (label, path, dialect) in common::workloads() {
        let program = common::load_program(path, dialect);

        c.bench_function(&format!("jit_compile_only_{label}"), |b| {
            let engine = JitEngine::new(Options::new(dialect));
            b.iter(|| {
                let compiled = engine.compile(black_box(&program)).expect("compile");
                black_box(compiled);
            })
        });

        c.bench_function(&format!("jit_execute_compiled_{label}"), |b| {
            let compiled = JitEngine::new(Options::new(dialect))
                .compile(&program)
                .expect("compile");
            b.iter(|| {
                let execution = compiled.run_captured(black_box(""));
                black_box(execution);
            })
        });

        c.bench_function(&format!("jit_total_{label}"), |b| {
            let engine = JitEngine::new(Options::new(dialect));
            b.iter(|| {
                let execution = engine
                    .compile(black_box(&program))
                    .expect("compile")
                    .run_captured("");
                black_box(execution);
            })
        });
    }
}

criterion_group!(benches, bench_jit);
criterion_main!(benches);
