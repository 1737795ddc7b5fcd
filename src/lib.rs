pub mod asm;
pub mod assembler;
pub mod ast;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod pipeline;
pub mod semantic;
pub mod token;
pub mod vm;

pub use error::CompileError;
pub use pipeline::{Compilation, CompileOptions, compile, run_source};
