mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use xlang::{lexer, parser};

fn bench_frontend(c: &mut Criterion) {
    for (label, path, dialect) in common::workloads() {
        let source = common::load_source(path);
        let tokens = lexer::tokenize(&source, dialect).expect("tokenize");

        c.bench_function(&format!("frontend_tokenize_{label}"), |b| {
            b.iter(|| {
                let out = lexer::tokenize(black_box(&source), dialect).expect("tokenize");
                black_box(out);
            })
        });

        c.bench_function(&format!("frontend_parse_only_{label}"), |b| {
            b.iter(|| {
                let out = parser::parse(black_box(tokens.clone()), dialect).expect("parse");
                black_box(out);
            })
        });

        c.bench_function(&format!("frontend_tokenize_parse_{label}"), |b| {
            b.iter(|| {
                let tokens = lexer::tokenize(black_box(&source), dialect).expect("tokenize");
                let out = parser::parse(tokens, dialect).expect("parse");
                black_box(out);
            })
        });
    }
}

criterion_group!(benches, bench_frontend);
criterion_main!(benches);
