use std::fmt;

use tracing::debug;

use crate::asm::PARAMS_DIRECTIVE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineInstruction {
    Label(String),
    /// Parameter names of the function whose label precedes this entry.
    Params {
        label: String,
        names: Vec<String>,
    },
    Op {
        mnemonic: String,
        args: Vec<String>,
    },
}

impl fmt::Display for MachineInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineInstruction::Label(name) => write!(f, "{name}:"),
            MachineInstruction::Params { label, names } => {
                write!(f, "  .params {label} [{}]", names.join(", "))
            }
            MachineInstruction::Op { mnemonic, args } if args.is_empty() => {
                write!(f, "  {mnemonic}")
            }
            MachineInstruction::Op { mnemonic, args } => {
                write!(f, "  {mnemonic} {}", args.join(" "))
            }
        }
    }
}

/// Turns assembly text lines into machine entries.
///
/// Mnemonics are upper-cased but not validated; the VM skips the ones it
/// does not know.
pub fn assemble<S: AsRef<str>>(lines: &[S]) -> Vec<MachineInstruction> {
    let mut program = Vec::with_capacity(lines.len());
    let mut last_label: Option<String> = None;

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(PARAMS_DIRECTIVE) {
            // A directive with no label before it has nothing to attach to.
            if let Some(label) = &last_label {
                let names = rest
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect();
                program.push(MachineInstruction::Params {
                    label: label.clone(),
                    names,
                });
            }
            continue;
        }
        if line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_suffix(':') {
            let name = name.trim().to_string();
            last_label = Some(name.clone());
            program.push(MachineInstruction::Label(name));
            continue;
        }

        let mut fields = split_fields(line).into_iter();
        let Some(mnemonic) = fields.next() else {
            continue;
        };
        program.push(MachineInstruction::Op {
            mnemonic: mnemonic.to_uppercase(),
            args: fields.collect(),
        });
    }

    debug!(entries = program.len(), "assembled program");
    program
}

/// Splits on whitespace, keeping a quoted string (quotes and escapes
/// included) as one field.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    let mut in_string = false;

    while let Some(ch) = chars.next() {
        if in_string {
            current.push(ch);
            match ch {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                current.push(ch);
            }
            ch if ch.is_whitespace() => {
                if !current.is_empty() {
                    fields.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}

/// Numbered listing of an assembled program.
pub fn render(program: &[MachineInstruction]) -> String {
    program
        .iter()
        .enumerate()
        .map(|(index, instruction)| format!("{index:>4} {instruction}\n"))
        .collect()
}
