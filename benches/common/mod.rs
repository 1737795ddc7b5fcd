#![allow(dead_code)]
use std::path::Path;

use minilang::assembler::MachineInstruction;
use minilang::pipeline::{CompileOptions, compile};
use test_support::{Case, bench_cases};

pub const PROGRAMS_DIR: &str = "tests/programs";

/// Fixture programs flagged for benchmarking, as (name, source, stdin).
pub fn workloads() -> Vec<(String, String, String)> {
    let cases = bench_cases(Path::new(PROGRAMS_DIR), None)
        .unwrap_or_else(|err| panic!("load bench cases: {err:#}"));
    cases.iter().map(load_workload).collect()
}

fn load_workload(case: &Case) -> (String, String, String) {
    let source = case
        .source()
        .unwrap_or_else(|err| panic!("read {}: {err:#}", case.name));
    let input = case
        .stdin()
        .unwrap_or_else(|err| panic!("read stdin for {}: {err:#}", case.name));
    (case.name.clone(), source, input)
}

pub fn assemble(source: &str) -> Vec<MachineInstruction> {
    compile(source, &CompileOptions::default())
        .unwrap_or_else(|err| panic!("compile: {err}"))
        .machine
}
