//! Three-address code.
//!
//! Lowering runs after semantic analysis, so it cannot fail: every variable
//! is initialized and every call has the right number of arguments.

use std::fmt;

use tracing::debug;

use crate::ast::{
    Assignment, BinaryOperator, ElifClause, Expression, FunctionDef, Program, Statement,
    UnaryOperator,
};

pub const MAIN_LABEL: &str = "MAIN";

pub fn function_label(name: &str) -> String {
    format!("FUNC_{name}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Var(String),
    Int(i64),
    Str(String),
}

impl Operand {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Operand::Int(value) => Some(*value),
            Operand::Var(_) | Operand::Str(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Var(name) => f.write_str(name),
            Operand::Int(value) => write!(f, "{value}"),
            Operand::Str(text) => write!(f, "\"{}\"", escape(text)),
        }
    }
}

/// Re-escapes a string literal so it can be quoted again in a listing.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Label(String),
    Goto(String),
    IfGoto {
        left: Operand,
        op: BinaryOperator,
        right: Operand,
        target: String,
    },
    Assign {
        target: String,
        source: Operand,
    },
    BinOp {
        target: String,
        op: BinaryOperator,
        left: Operand,
        right: Operand,
    },
    Read(String),
    Print(Operand),
    Param(Operand),
    Call {
        function: String,
        argc: usize,
        result: Option<String>,
    },
    Return(Operand),
    FuncStart {
        name: String,
        params: Vec<String>,
    },
    FuncEnd {
        name: String,
    },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Label(name) => write!(f, "{name}:"),
            Instruction::Goto(target) => write!(f, "    goto {target}"),
            Instruction::IfGoto {
                left,
                op,
                right,
                target,
            } => write!(f, "    if {left} {op} {right} goto {target}"),
            Instruction::Assign { target, source } => write!(f, "    {target} = {source}"),
            Instruction::BinOp {
                target,
                op,
                left,
                right,
            } => write!(f, "    {target} = {left} {op} {right}"),
            Instruction::Read(name) => write!(f, "    read {name}"),
            Instruction::Print(value) => write!(f, "    print {value}"),
            Instruction::Param(value) => write!(f, "    param {value}"),
            Instruction::Call {
                function,
                argc,
                result: Some(result),
            } => write!(f, "    {result} = call {function}, {argc}"),
            Instruction::Call {
                function,
                argc,
                result: None,
            } => write!(f, "    call {function}, {argc}"),
            Instruction::Return(value) => write!(f, "    return {value}"),
            Instruction::FuncStart { name, params } => {
                write!(f, "func {name}({})", params.join(", "))
            }
            Instruction::FuncEnd { name } => write!(f, "endfunc {name}"),
        }
    }
}

/// Owns the temporary and label counters for one compilation.
#[derive(Debug, Default)]
pub struct Generator {
    code: Vec<Instruction>,
    temp_counter: usize,
    label_counter: usize,
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(mut self, program: &Program) -> Vec<Instruction> {
        self.emit(Instruction::Goto(MAIN_LABEL.to_string()));
        for function in &program.functions {
            self.lower_function(function);
        }
        self.emit(Instruction::Label(MAIN_LABEL.to_string()));
        self.lower_block(&program.statements);

        debug!(
            instructions = self.code.len(),
            temps = self.temp_counter,
            labels = self.label_counter,
            "generated three-address code"
        );
        self.code
    }

    fn new_temp(&mut self) -> String {
        self.temp_counter += 1;
        format!("%t{}", self.temp_counter)
    }

    fn new_label(&mut self) -> String {
        self.label_counter += 1;
        format!("L{}", self.label_counter)
    }

    fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    fn lower_function(&mut self, function: &FunctionDef) {
        self.emit(Instruction::FuncStart {
            name: function.name.clone(),
            params: function.params.clone(),
        });
        self.lower_block(&function.body);
        self.emit(Instruction::FuncEnd {
            name: function.name.clone(),
        });
    }

    fn lower_block(&mut self, statements: &[Statement]) {
        for statement in statements {
            self.lower_statement(statement);
        }
    }

    fn lower_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Read(name) => self.emit(Instruction::Read(name.clone())),
            Statement::Print(expr) => {
                let value = self.lower_expression(expr);
                self.emit(Instruction::Print(value));
            }
            Statement::Return(expr) => {
                let value = self.lower_expression(expr);
                self.emit(Instruction::Return(value));
            }
            Statement::Assign(assignment) => self.lower_assignment(assignment),
            Statement::If {
                condition,
                then_body,
                elif_clauses,
                else_body,
            } => self.lower_if(condition, then_body, elif_clauses, else_body.as_deref()),
            Statement::While { condition, body } => self.lower_loop(condition, body, None),
            Statement::For {
                init,
                condition,
                update,
                body,
            } => {
                self.lower_assignment(init);
                self.lower_loop(condition, body, Some(update));
            }
        }
    }

    fn lower_assignment(&mut self, assignment: &Assignment) {
        let source = self.lower_expression(&assignment.value);
        self.emit(Instruction::Assign {
            target: assignment.target.clone(),
            source,
        });
    }

    /// Each clause gets its own true/next pair; the last "next" label is the
    /// else entry even when there is no else block.
    fn lower_if(
        &mut self,
        condition: &Expression,
        then_body: &[Statement],
        elif_clauses: &[ElifClause],
        else_body: Option<&[Statement]>,
    ) {
        let end = self.new_label();
        let clauses = std::iter::once((condition, then_body)).chain(
            elif_clauses
                .iter()
                .map(|clause| (&clause.condition, clause.body.as_slice())),
        );
        for (condition, body) in clauses {
            let on_true = self.new_label();
            let next = self.new_label();
            self.lower_condition(condition, &on_true, &next);
            self.emit(Instruction::Label(on_true));
            self.lower_block(body);
            self.emit(Instruction::Goto(end.clone()));
            self.emit(Instruction::Label(next));
        }
        if let Some(else_body) = else_body {
            self.lower_block(else_body);
        }
        self.emit(Instruction::Label(end));
    }

    /// `while` and `for` share this shape; `for` passes its update, which runs
    /// at the end of every iteration.
    fn lower_loop(
        &mut self,
        condition: &Expression,
        body: &[Statement],
        update: Option<&Assignment>,
    ) {
        let start = self.new_label();
        let body_label = self.new_label();
        let end = self.new_label();

        self.emit(Instruction::Label(start.clone()));
        self.lower_condition(condition, &body_label, &end);
        self.emit(Instruction::Label(body_label));
        self.lower_block(body);
        if let Some(update) = update {
            self.lower_assignment(update);
        }
        self.emit(Instruction::Goto(start));
        self.emit(Instruction::Label(end));
    }

    fn lower_condition(&mut self, condition: &Expression, on_true: &str, on_false: &str) {
        let (left, op, right) = match condition {
            Expression::BinaryOp { left, op, right } if op.is_relational() => {
                let left = self.lower_expression(left);
                let right = self.lower_expression(right);
                (left, *op, right)
            }
            other => (
                self.lower_expression(other),
                BinaryOperator::NotEqual,
                Operand::Int(0),
            ),
        };
        self.emit(Instruction::IfGoto {
            left,
            op,
            right,
            target: on_true.to_string(),
        });
        self.emit(Instruction::Goto(on_false.to_string()));
    }

    fn lower_expression(&mut self, expr: &Expression) -> Operand {
        match expr {
            Expression::Integer(value) => Operand::Int(*value),
            Expression::String(text) => Operand::Str(text.clone()),
            Expression::Variable(name) => Operand::Var(name.clone()),
            Expression::BinaryOp { left, op, right } => {
                let left = self.lower_expression(left);
                let right = self.lower_expression(right);
                self.binop(*op, left, right)
            }
            Expression::UnaryOp { op, operand } => {
                let operand = self.lower_expression(operand);
                match op {
                    UnaryOperator::Plus => operand,
                    UnaryOperator::Minus => {
                        self.binop(BinaryOperator::Sub, Operand::Int(0), operand)
                    }
                    UnaryOperator::Not => {
                        self.binop(BinaryOperator::Equal, operand, Operand::Int(0))
                    }
                }
            }
            Expression::Call { name, args } => {
                let values: Vec<Operand> =
                    args.iter().map(|arg| self.lower_expression(arg)).collect();
                let argc = values.len();
                for value in values {
                    self.emit(Instruction::Param(value));
                }
                let result = self.new_temp();
                self.emit(Instruction::Call {
                    function: name.clone(),
                    argc,
                    result: Some(result.clone()),
                });
                Operand::Var(result)
            }
        }
    }

    fn binop(&mut self, op: BinaryOperator, left: Operand, right: Operand) -> Operand {
        let target = self.new_temp();
        self.emit(Instruction::BinOp {
            target: target.clone(),
            op,
            left,
            right,
        });
        Operand::Var(target)
    }
}

pub fn generate(program: &Program) -> Vec<Instruction> {
    Generator::new().generate(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn lower(source: &str) -> Vec<Instruction> {
        generate(&parse(source).expect("parse should succeed"))
    }

    fn var(name: &str) -> Operand {
        Operand::Var(name.to_string())
    }

    fn label(name: &str) -> Instruction {
        Instruction::Label(name.to_string())
    }

    fn goto(name: &str) -> Instruction {
        Instruction::Goto(name.to_string())
    }

    #[test]
    fn main_program_is_preceded_by_jump_to_main() {
        let code = lower("x = 5 + 3 * 2; end;");
        assert_eq!(
            code,
            vec![
                goto("MAIN"),
                label("MAIN"),
                Instruction::BinOp {
                    target: "%t1".to_string(),
                    op: BinaryOperator::Mul,
                    left: Operand::Int(3),
                    right: Operand::Int(2),
                },
                Instruction::BinOp {
                    target: "%t2".to_string(),
                    op: BinaryOperator::Add,
                    left: Operand::Int(5),
                    right: var("%t1"),
                },
                Instruction::Assign {
                    target: "x".to_string(),
                    source: var("%t2"),
                },
            ]
        );
    }

    #[test]
    fn while_loop_shape() {
        let code = lower("x = 0; while x < 3 { x = x + 1; } end;");
        assert_eq!(
            code[3..].to_vec(),
            vec![
                label("L1"),
                Instruction::IfGoto {
                    left: var("x"),
                    op: BinaryOperator::Less,
                    right: Operand::Int(3),
                    target: "L2".to_string(),
                },
                goto("L3"),
                label("L2"),
                Instruction::BinOp {
                    target: "%t1".to_string(),
                    op: BinaryOperator::Add,
                    left: var("x"),
                    right: Operand::Int(1),
                },
                Instruction::Assign {
                    target: "x".to_string(),
                    source: var("%t1"),
                },
                goto("L1"),
                label("L3"),
            ]
        );
    }

    #[test]
    fn if_chain_allocates_next_label_per_clause() {
        let code = lower("x = 1; if x { print 1; } elif x > 2 { print 2; } end;");
        let rendered: Vec<String> = code[3..].iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "    if x != 0 goto L2",
                "    goto L3",
                "L2:",
                "    print 1",
                "    goto L1",
                "L3:",
                "    if x > 2 goto L4",
                "    goto L5",
                "L4:",
                "    print 2",
                "    goto L1",
                "L5:",
                "L1:",
            ]
        );
    }

    #[test]
    fn for_loop_runs_update_before_jumping_back() {
        let code = lower("for i = 0; i < 2; i = i + 1 { print i; } end;");
        let position = |needle: &Instruction| {
            code.iter()
                .position(|instruction| instruction == needle)
                .expect("instruction present")
        };
        let print = position(&Instruction::Print(var("i")));
        let update = position(&Instruction::Assign {
            target: "i".to_string(),
            source: var("%t1"),
        });
        let back = position(&goto("L1"));
        assert!(print < update && update < back);
    }

    #[test]
    fn unary_operators_lower_to_binops() {
        let code = lower("x = 4; y = -x; z = +x; w = not x; end;");
        assert!(code.contains(&Instruction::BinOp {
            target: "%t1".to_string(),
            op: BinaryOperator::Sub,
            left: Operand::Int(0),
            right: var("x"),
        }));
        assert!(code.contains(&Instruction::Assign {
            target: "z".to_string(),
            source: var("x"),
        }));
        assert!(code.contains(&Instruction::BinOp {
            target: "%t2".to_string(),
            op: BinaryOperator::Equal,
            left: var("x"),
            right: Operand::Int(0),
        }));
    }

    #[test]
    fn functions_come_before_main_with_params_after_args() {
        let source = "def suma(a, b) { return a + b; } y = suma(10, 2 * 3); end;";
        let rendered: Vec<String> = lower(source).iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "    goto MAIN",
                "func suma(a, b)",
                "    %t1 = a + b",
                "    return %t1",
                "endfunc suma",
                "MAIN:",
                "    %t2 = 2 * 3",
                "    param 10",
                "    param %t2",
                "    %t3 = call suma, 2",
                "    y = %t3",
            ]
        );
    }

    #[test]
    fn counters_are_not_reset_between_functions() {
        let source = indoc::indoc! {"
            def f(a) { if a { return 1; } return 0; }
            def g(b) { if b { return 2; } return 3; }
            end;
        "};
        let instructions = lower(source);
        let labels: Vec<&str> = instructions
            .iter()
            .filter_map(|instruction| match instruction {
                Instruction::Label(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["L2", "L3", "L1", "L5", "L6", "L4", "MAIN"]);
    }

    #[test]
    fn string_operands_are_escaped_when_rendered() {
        let code = lower(r#"print "say \"hi\""; end;"#);
        assert_eq!(code[2].to_string(), r#"    print "say \"hi\"""#);
    }
}
