use anyhow::{Context, Result, bail, ensure};
use std::path::Path;

use minilang::pipeline::{CompileOptions, compile, run_source};
use test_support::{Case, CaseClass, load_cases, normalize_output};

const PROGRAMS_DIR: &str = "tests/programs";

fn run_case(case: &Case, options: &CompileOptions) -> Result<String> {
    let source = case.source()?;
    let input = case.stdin()?;
    run_source(&source, &input, options)
        .with_context(|| format!("Running {} (optimize={})", case.name, options.optimize))
}

fn check_runtime_success(case: &Case) -> Result<()> {
    ensure!(
        case.spec.expected.exit_code == 0,
        "Case {} expected exit code must be 0 for runtime_success",
        case.name
    );
    let stdout_file = case
        .spec
        .expected
        .stdout_file
        .as_deref()
        .with_context(|| format!("Missing stdout_file in {}", case.name))?;
    let expected = normalize_output(&case.read_text(stdout_file)?);

    let actual = normalize_output(&run_case(case, &CompileOptions::default())?);
    assert_eq!(actual, expected, "Output mismatch for {}", case.name);

    if case.spec.check_unoptimized {
        let unoptimized = normalize_output(&run_case(case, &CompileOptions { optimize: false })?);
        assert_eq!(
            unoptimized, expected,
            "Unoptimized output mismatch for {}",
            case.name
        );
    }
    Ok(())
}

fn check_compile_error(case: &Case) -> Result<()> {
    ensure!(
        case.spec.expected.exit_code == 1,
        "Case {} expected exit code must be 1 for compile_error",
        case.name
    );
    let expected_file = case
        .spec
        .expected
        .stderr_contains_file
        .as_deref()
        .with_context(|| format!("Missing stderr expectation file in {}", case.name))?;
    let expected_error = case.read_text(expected_file)?;
    let expected_error = expected_error.trim();

    let source = case.source()?;
    let error = match compile(&source, &CompileOptions::default()) {
        Ok(_) => bail!("Expected compile error in {}, but compilation succeeded", case.name),
        Err(error) => error,
    };
    let actual = format!("{} error: {error}", error.stage());
    ensure!(
        actual.contains(expected_error),
        "Expected compile error containing '{expected_error}' in {}, got '{actual}'",
        case.name
    );
    if let Some(stage) = &case.spec.expected.stage {
        ensure!(
            error.stage().eq_ignore_ascii_case(stage),
            "Case {} failed in stage {}, expected {stage}",
            case.name,
            error.stage()
        );
    }
    Ok(())
}

#[test]
fn runs_program_fixtures() -> Result<()> {
    let cases = load_cases(Path::new(PROGRAMS_DIR))?;

    for case in &cases {
        if case.spec.bench.enabled {
            ensure!(
                !case.spec.bench.tags.is_empty(),
                "Case {} has bench enabled but no tags",
                case.name
            );
        }
        match case.spec.class {
            CaseClass::RuntimeSuccess => check_runtime_success(case)?,
            CaseClass::CompileError => check_compile_error(case)?,
        }
    }

    Ok(())
}
