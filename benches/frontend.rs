mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use minilang::pipeline::{CompileOptions, compile};
use minilang::{lexer, parser};

fn bench_frontend(c: &mut Criterion) {
    for (label, source, _) in common::workloads() {
        let tokens = lexer::tokenize(&source).expect("tokenize");

        c.bench_function(&format!("frontend_tokenize_{label}"), |b| {
            b.iter(|| {
                let out = lexer::tokenize(black_box(&source)).expect("tokenize");
                black_box(out);
            })
        });

        c.bench_function(&format!("frontend_parse_only_{label}"), |b| {
            b.iter(|| {
                let out = parser::parse_tokens(black_box(tokens.clone())).expect("parse");
                black_box(out);
            })
        });

        c.bench_function(&format!("frontend_compile_{label}"), |b| {
            let options = CompileOptions::default();
            b.iter(|| {
                let out = compile(black_box(&source), &options).expect("compile");
                black_box(out.machine);
            })
        });
    }
}

criterion_group!(benches, bench_frontend);
criterion_main!(benches);
