use tracing::debug;

use crate::ast::BinaryOperator;
use crate::ir::{Instruction, Operand, function_label};

/// Prefix of the comment line that carries a function's parameter names.
pub const PARAMS_DIRECTIVE: &str = "; PARAMS";

pub fn mnemonic(op: BinaryOperator) -> &'static str {
    match op {
        BinaryOperator::Add => "ADD",
        BinaryOperator::Sub => "SUB",
        BinaryOperator::Mul => "MUL",
        BinaryOperator::Div => "DIV",
        BinaryOperator::Mod => "MOD",
        BinaryOperator::Less => "LT",
        BinaryOperator::Greater => "GT",
        BinaryOperator::LessEqual => "LE",
        BinaryOperator::GreaterEqual => "GE",
        BinaryOperator::Equal => "EQ",
        BinaryOperator::NotEqual => "NE",
        BinaryOperator::And => "AND",
        BinaryOperator::Or => "OR",
    }
}

pub fn operator_for(mnemonic: &str) -> Option<BinaryOperator> {
    let op = match mnemonic {
        "ADD" => BinaryOperator::Add,
        "SUB" => BinaryOperator::Sub,
        "MUL" => BinaryOperator::Mul,
        "DIV" => BinaryOperator::Div,
        "MOD" => BinaryOperator::Mod,
        "LT" => BinaryOperator::Less,
        "GT" => BinaryOperator::Greater,
        "LE" => BinaryOperator::LessEqual,
        "GE" => BinaryOperator::GreaterEqual,
        "EQ" => BinaryOperator::Equal,
        "NE" => BinaryOperator::NotEqual,
        "AND" => BinaryOperator::And,
        "OR" => BinaryOperator::Or,
        _ => return None,
    };
    Some(op)
}

/// Translates three-address code into symbolic stack-machine assembly, one
/// line per entry.
pub fn generate(code: &[Instruction]) -> Vec<String> {
    let mut lines = Vec::with_capacity(code.len() * 2);
    for instruction in code {
        emit_instruction(&mut lines, instruction);
    }
    debug!(lines = lines.len(), "generated assembly");
    lines
}

fn emit_instruction(lines: &mut Vec<String>, instruction: &Instruction) {
    match instruction {
        Instruction::Label(name) => lines.push(format!("{name}:")),
        Instruction::Goto(target) => lines.push(format!("JMP {target}")),
        Instruction::IfGoto {
            left,
            op,
            right,
            target,
        } => {
            load(lines, left);
            load(lines, right);
            lines.push(mnemonic(*op).to_string());
            lines.push(format!("JNZ {target}"));
        }
        Instruction::Assign { target, source } => {
            load(lines, source);
            lines.push(format!("STORE {target}"));
        }
        Instruction::BinOp {
            target,
            op,
            left,
            right,
        } => {
            load(lines, left);
            load(lines, right);
            lines.push(mnemonic(*op).to_string());
            lines.push(format!("STORE {target}"));
        }
        Instruction::Read(name) => lines.push(format!("IN {name}")),
        Instruction::Print(value) => {
            load(lines, value);
            lines.push("OUT".to_string());
        }
        Instruction::Param(value) => {
            load(lines, value);
            lines.push("PARAM".to_string());
        }
        Instruction::Call {
            function,
            argc,
            result,
        } => {
            lines.push(format!("CALL {} {argc}", function_label(function)));
            if let Some(result) = result {
                lines.push(format!("STORE {result}"));
            }
        }
        Instruction::Return(value) => {
            load(lines, value);
            lines.push("RET".to_string());
        }
        Instruction::FuncStart { name, params } => {
            lines.push(format!("{}:", function_label(name)));
            let directive = format!("{PARAMS_DIRECTIVE} {}", params.join(","));
            lines.push(directive.trim_end().to_string());
        }
        // Falling off the end of a body returns 0.
        Instruction::FuncEnd { .. } => {
            lines.push("PUSH 0".to_string());
            lines.push("RET".to_string());
        }
    }
}

fn load(lines: &mut Vec<String>, operand: &Operand) {
    match operand {
        Operand::Var(name) => lines.push(format!("LOAD {name}")),
        Operand::Int(_) | Operand::Str(_) => lines.push(format!("PUSH {operand}")),
    }
}
