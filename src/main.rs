use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use minilang::assembler;
use minilang::pipeline::{Compilation, CompileOptions, compile};
use minilang::vm::VM;

/// Compile MiniLang programs down to stack-machine code and optionally run them
#[derive(Parser, Debug)]
#[command(name = "minilang")]
#[command(about = "MiniLang compiler and virtual machine", long_about = None)]
struct Args {
    /// Source file (reads stdin when omitted)
    path: Option<PathBuf>,

    /// Execute the assembled program on the VM; `read` takes lines from stdin,
    /// so the source must come from a file
    #[arg(long, requires = "path")]
    run: bool,

    /// Skip constant folding
    #[arg(long)]
    no_optimize: bool,

    /// Print an intermediate artifact to stdout (repeatable)
    #[arg(long, value_enum)]
    emit: Vec<Emit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    Tokens,
    Ast,
    Tac,
    Asm,
    Machine,
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_source(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))
        }
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Reading stdin")?;
            Ok(buffer)
        }
    }
}

fn emit(compilation: &Compilation<'_>, stage: Emit) {
    match stage {
        Emit::Tokens => {
            println!("== tokens ==");
            for token in &compilation.tokens {
                println!("{token}");
            }
        }
        Emit::Ast => {
            println!("== ast ==");
            println!("{:#?}", compilation.program);
        }
        Emit::Tac => {
            println!("== tac ==");
            for instruction in &compilation.tac {
                println!("{instruction}");
            }
            if compilation.optimized != compilation.tac {
                println!("== tac (folded) ==");
                for instruction in &compilation.optimized {
                    println!("{instruction}");
                }
            }
        }
        Emit::Asm => {
            println!("== asm ==");
            for line in &compilation.asm {
                println!("{line}");
            }
        }
        Emit::Machine => {
            println!("== machine ==");
            print!("{}", assembler::render(&compilation.machine));
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging();

    let source = read_source(args.path.as_ref())?;
    let options = CompileOptions {
        optimize: !args.no_optimize,
    };

    let compilation = match compile(&source, &options) {
        Ok(compilation) => compilation,
        Err(err) => {
            eprintln!("{} error: {err}", err.stage());
            return Ok(ExitCode::FAILURE);
        }
    };

    for stage in &args.emit {
        emit(&compilation, *stage);
    }

    if args.run {
        let stdin = io::stdin();
        let stdout = io::stdout();
        VM::new(&compilation.machine)
            .run(&mut stdin.lock(), &mut stdout.lock())
            .context("Running program")?;
    }

    Ok(ExitCode::SUCCESS)
}
