//! Sequences the compiler stages and keeps every intermediate artifact.

use anyhow::Result;
use tracing::info_span;

use crate::assembler::{self, MachineInstruction};
use crate::ast::Program;
use crate::error::CompileError;
use crate::ir::{self, Instruction};
use crate::token::Token;
use crate::{asm, lexer, optimizer, parser, semantic, vm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub optimize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { optimize: true }
    }
}

#[derive(Debug, Clone)]
pub struct Compilation<'a> {
    pub tokens: Vec<Token<'a>>,
    pub program: Program,
    pub tac: Vec<Instruction>,
    /// Equal to `tac` when optimization is off.
    pub optimized: Vec<Instruction>,
    pub asm: Vec<String>,
    pub machine: Vec<MachineInstruction>,
}

pub fn compile<'a>(
    source: &'a str,
    options: &CompileOptions,
) -> Result<Compilation<'a>, CompileError> {
    let _span = info_span!("compile", optimize = options.optimize).entered();

    let tokens = lexer::tokenize(source)?;
    let program = parser::parse_tokens(tokens.clone())?;
    semantic::analyze(&program)?;

    let tac = ir::generate(&program);
    let optimized = if options.optimize {
        optimizer::fold_constants(&tac)
    } else {
        tac.clone()
    };
    let asm = asm::generate(&optimized);
    let machine = assembler::assemble(&asm);

    Ok(Compilation {
        tokens,
        program,
        tac,
        optimized,
        asm,
        machine,
    })
}

/// Compiles and runs `source`, feeding `input` to `read` and returning what
/// the program printed.
pub fn run_source(source: &str, input: &str, options: &CompileOptions) -> Result<String> {
    let compilation = compile(source, options)?;
    Ok(vm::run_with_input(&compilation.machine, input)?)
}
