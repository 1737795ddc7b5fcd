use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::mem;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::asm::operator_for;
use crate::assembler::MachineInstruction;
use crate::ast::BinaryOperator;

/// Runtime faults inside a program never stop the VM; only the host streams
/// can fail.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("Failed to read program input")]
    Input(#[source] io::Error),
    #[error("Failed to write program output")]
    Output(#[source] io::Error),
}

pub type VmResult<T> = Result<T, VmError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    /// Strings read as 0 in arithmetic.
    fn as_int(&self) -> i64 {
        match self {
            Value::Int(value) => *value,
            Value::Str(_) => 0,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Str(text) => f.write_str(text),
        }
    }
}

type Frame = HashMap<String, Value>;

#[derive(Debug)]
struct CallFrame {
    return_ip: usize,
    locals: Frame,
}

pub struct VM<'p> {
    program: &'p [MachineInstruction],
    labels: HashMap<&'p str, usize>,
    params: HashMap<&'p str, &'p [String]>,
    stack: Vec<Value>,
    frame: Frame,
    call_stack: Vec<CallFrame>,
    staged: Vec<Value>,
    ip: usize,
}

impl<'p> VM<'p> {
    pub fn new(program: &'p [MachineInstruction]) -> Self {
        let mut labels = HashMap::new();
        let mut params = HashMap::new();
        for (index, instruction) in program.iter().enumerate() {
            match instruction {
                MachineInstruction::Label(name) => {
                    labels.insert(name.as_str(), index);
                }
                MachineInstruction::Params { label, names } => {
                    params.insert(label.as_str(), names.as_slice());
                }
                MachineInstruction::Op { .. } => {}
            }
        }
        debug!(
            entries = program.len(),
            labels = labels.len(),
            "loaded program"
        );

        Self {
            program,
            labels,
            params,
            stack: Vec::new(),
            frame: Frame::new(),
            call_stack: Vec::new(),
            staged: Vec::new(),
            ip: 0,
        }
    }

    /// Runs until the instruction pointer leaves the program or a `RET`
    /// happens with no caller to return to.
    pub fn run<R: BufRead, W: Write>(&mut self, input: &mut R, output: &mut W) -> VmResult<()> {
        let program = self.program;
        while let Some(instruction) = program.get(self.ip) {
            self.ip += 1;
            let MachineInstruction::Op { mnemonic, args } = instruction else {
                continue;
            };
            trace!(ip = self.ip - 1, %mnemonic, ?args, "execute");
            if !self.execute(mnemonic, args, input, output)? {
                debug!("top-level return");
                break;
            }
        }
        output.flush().map_err(VmError::Output)?;
        Ok(())
    }

    /// Returns `false` when execution should stop.
    fn execute<R: BufRead, W: Write>(
        &mut self,
        mnemonic: &str,
        args: &[String],
        input: &mut R,
        output: &mut W,
    ) -> VmResult<bool> {
        let arg = args.first().map(String::as_str);
        match mnemonic {
            "PUSH" => {
                let value = match arg {
                    Some(text) => self.immediate(text),
                    None => {
                        warn!("PUSH without operand");
                        Value::default()
                    }
                };
                self.stack.push(value);
            }
            "LOAD" => {
                let value = arg.map(|name| self.load(name)).unwrap_or_default();
                self.stack.push(value);
            }
            "STORE" => {
                let value = self.pop();
                if let Some(name) = arg {
                    self.frame.insert(name.to_string(), value);
                }
            }
            "NOT" => {
                let value = self.pop();
                self.stack.push(Value::Int(i64::from(value.as_int() == 0)));
            }
            "JMP" => self.jump(arg),
            "JZ" | "JNZ" => {
                let condition = self.pop().as_int() != 0;
                if condition == (mnemonic == "JNZ") {
                    self.jump(arg);
                }
            }
            "IN" => {
                let value = Self::read_int(input)?;
                if let Some(name) = arg {
                    self.frame.insert(name.to_string(), Value::Int(value));
                }
            }
            "OUT" => {
                let value = self.pop();
                writeln!(output, "{value}").map_err(VmError::Output)?;
            }
            "PARAM" => {
                let value = self.pop();
                self.staged.push(value);
            }
            "CALL" => {
                let argc = args
                    .get(1)
                    .and_then(|count| count.parse::<usize>().ok())
                    .unwrap_or(0);
                self.call(arg, argc);
            }
            "RET" => {
                let value = self.pop();
                let Some(caller) = self.call_stack.pop() else {
                    return Ok(false);
                };
                self.ip = caller.return_ip;
                self.frame = caller.locals;
                self.stack.push(value);
            }
            other => match operator_for(other) {
                Some(op) => {
                    let right = self.pop();
                    let left = self.pop();
                    self.stack.push(Value::Int(Self::binary(op, &left, &right)));
                }
                None => warn!(mnemonic = other, "skipping unknown instruction"),
            },
        }
        Ok(true)
    }

    fn binary(op: BinaryOperator, left: &Value, right: &Value) -> i64 {
        match (op, left, right) {
            (BinaryOperator::Equal, Value::Str(_), _)
            | (BinaryOperator::Equal, _, Value::Str(_)) => i64::from(left == right),
            (BinaryOperator::NotEqual, Value::Str(_), _)
            | (BinaryOperator::NotEqual, _, Value::Str(_)) => i64::from(left != right),
            _ => {
                if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                    warn!(%op, "string operand reads as 0");
                }
                if matches!(op, BinaryOperator::Div | BinaryOperator::Mod) && right.as_int() == 0 {
                    warn!(%op, "division by zero yields 0");
                }
                op.apply(left.as_int(), right.as_int())
            }
        }
    }

    /// `"text"` is a string, a numeral an integer, anything else a variable.
    fn immediate(&self, text: &str) -> Value {
        if let Some(quoted) = text.strip_prefix('"') {
            let inner = quoted.strip_suffix('"').unwrap_or(quoted);
            return Value::Str(unescape(inner));
        }
        match text.parse::<i64>() {
            Ok(value) => Value::Int(value),
            Err(_) => self.load(text),
        }
    }

    fn load(&self, name: &str) -> Value {
        match self.frame.get(name) {
            Some(value) => value.clone(),
            None => {
                debug!(name, "read of unset variable yields 0");
                Value::default()
            }
        }
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_else(|| {
            warn!(ip = self.ip - 1, "operand stack underflow, using 0");
            Value::default()
        })
    }

    fn jump(&mut self, label: Option<&str>) {
        match label.and_then(|label| self.labels.get(label)) {
            Some(&target) => self.ip = target,
            None => warn!(label, "unresolved jump target ignored"),
        }
    }

    /// Saves the caller, binds the most recently staged values to the
    /// callee's parameters in a fresh frame and jumps to its label.
    fn call(&mut self, label: Option<&str>, argc: usize) {
        let Some((name, target)) = label.and_then(|label| {
            self.labels
                .get_key_value(label)
                .map(|(name, target)| (*name, *target))
        }) else {
            warn!(label, "call to unresolved label ignored");
            return;
        };

        let start = self.staged.len().saturating_sub(argc);
        let args = self.staged.split_off(start);
        let names = self.params.get(name).copied().unwrap_or_default();
        let locals: Frame = names.iter().cloned().zip(args).collect();

        self.call_stack.push(CallFrame {
            return_ip: self.ip,
            locals: mem::replace(&mut self.frame, locals),
        });
        trace!(function = name, depth = self.call_stack.len(), "call");
        self.ip = target;
    }

    /// Malformed or missing input reads as 0.
    fn read_int<R: BufRead>(input: &mut R) -> VmResult<i64> {
        let mut line = String::new();
        input.read_line(&mut line).map_err(VmError::Input)?;
        Ok(line.trim().parse::<i64>().unwrap_or_else(|_| {
            warn!(input = line.trim(), "malformed integer input, using 0");
            0
        }))
    }
}

fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('"') => result.push('"'),
            Some('\\') => result.push('\\'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    result
}

/// Runs `program` against in-memory input and returns everything it printed.
pub fn run_with_input(program: &[MachineInstruction], input: &str) -> VmResult<String> {
    let mut reader = input.as_bytes();
    let mut output = Vec::new();
    VM::new(program).run(&mut reader, &mut output)?;
    Ok(String::from_utf8_lossy(&output).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn run(text: &str, input: &str) -> String {
        let lines: Vec<&str> = text.lines().collect();
        run_with_input(&assemble(&lines), input).expect("vm run should succeed")
    }

    #[test]
    fn arithmetic_and_output() {
        let text = indoc! {"
            PUSH 7
            PUSH 2
            SUB
            PUSH 3
            MUL
            OUT
            PUSH -7
            PUSH 2
            DIV
            OUT
            PUSH -7
            PUSH 2
            MOD
            OUT
        "};
        assert_eq!(run(text, ""), "15\n-4\n1\n");
    }

    #[test]
    fn division_by_zero_pushes_zero() {
        assert_eq!(run("PUSH 4\nPUSH 0\nDIV\nOUT\nPUSH 4\nPUSH 0\nMOD\nOUT", ""), "0\n0\n");
    }

    #[test]
    fn comparisons_and_logic_are_canonical() {
        let text = indoc! {"
            PUSH 3
            PUSH 5
            LT
            OUT
            PUSH 2
            PUSH 0
            OR
            OUT
            PUSH 2
            PUSH 0
            AND
            OUT
            PUSH 9
            NOT
            OUT
        "};
        assert_eq!(run(text, ""), "1\n1\n0\n0\n");
    }

    #[test]
    fn strings_print_verbatim_and_compare_by_value() {
        let text = indoc! {r#"
            PUSH "a \"b\"\nc"
            OUT
            PUSH "x"
            PUSH "x"
            EQ
            OUT
            PUSH "x"
            PUSH "y"
            NE
            OUT
            PUSH "x"
            PUSH 4
            ADD
            OUT
        "#};
        assert_eq!(run(text, ""), "a \"b\"\nc\n1\n1\n4\n");
    }

    #[test]
    fn missing_variables_and_underflow_default_to_zero() {
        assert_eq!(run("LOAD nope\nOUT\nADD\nOUT\nOUT", ""), "0\n0\n0\n");
    }

    #[test]
    fn push_of_identifier_loads_variable() {
        assert_eq!(run("PUSH 8\nSTORE v\nPUSH v\nOUT", ""), "8\n");
    }

    #[test]
    fn conditional_jumps() {
        let text = indoc! {"
            PUSH 0
            JZ skip
            PUSH 1
            OUT
            skip:
            PUSH 1
            JNZ done
            PUSH 2
            OUT
            done:
            PUSH 3
            OUT
        "};
        assert_eq!(run(text, ""), "3\n");
    }

    #[test]
    fn unresolved_labels_and_unknown_mnemonics_are_skipped() {
        assert_eq!(run("JMP nowhere\nFROB\nPUSH 5\nOUT", ""), "5\n");
    }

    #[test]
    fn input_reads_lines_and_defaults_malformed_to_zero() {
        let text = "IN a\nIN b\nIN c\nLOAD a\nOUT\nLOAD b\nOUT\nLOAD c\nOUT";
        assert_eq!(run(text, "  42 \nabc\n"), "42\n0\n0\n");
    }

    #[test]
    fn call_gets_isolated_frame_and_restores_caller() {
        let text = indoc! {"
            JMP MAIN
            FUNC_f:
            ; PARAMS a,b
            LOAD x
            OUT
            LOAD a
            LOAD b
            SUB
            STORE x
            LOAD x
            RET
            MAIN:
            PUSH 99
            STORE x
            PUSH 10
            PARAM
            PUSH 3
            PARAM
            CALL FUNC_f 2
            OUT
            LOAD x
            OUT
        "};
        assert_eq!(run(text, ""), "0\n7\n99\n");
    }

    #[test]
    fn top_level_return_stops_execution() {
        assert_eq!(run("PUSH 1\nOUT\nPUSH 0\nRET\nPUSH 2\nOUT", ""), "1\n");
    }

    #[test]
    fn call_drains_only_requested_params() {
        let text = indoc! {"
            JMP MAIN
            FUNC_id:
            ; PARAMS v
            LOAD v
            RET
            MAIN:
            PUSH 1
            PARAM
            PUSH 2
            PARAM
            CALL FUNC_id 1
            OUT
            CALL FUNC_id 1
            OUT
        "};
        assert_eq!(run(text, ""), "2\n1\n");
    }
}
