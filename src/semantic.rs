use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::ast::{Assignment, Expression, Program, Statement};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SemanticError {
    #[error("Use of uninitialized variable '{name}'")]
    UninitializedVariable { name: String },
    #[error("Undefined function '{name}'")]
    UndefinedFunction { name: String },
    #[error("Function '{name}' expects {expected} arguments, got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Duplicate function definition '{name}'")]
    DuplicateFunction { name: String },
    #[error("String literal \"{text}\" cannot be an operand of '{operator}'")]
    StringOperand { text: String, operator: String },
}

pub type SemanticResult<T> = Result<T, SemanticError>;

/// Validates a parsed program without modifying it.
///
/// Functions are registered in source order, each one just before its body
/// is checked: a body may call itself or any earlier function, but not one
/// defined further down. Each body is checked in its own scope holding only
/// its parameters; the main program gets a fresh global scope.
pub fn analyze(program: &Program) -> SemanticResult<()> {
    let mut functions = HashMap::new();
    for function in &program.functions {
        if functions
            .insert(function.name.as_str(), function.params.len())
            .is_some()
        {
            return Err(SemanticError::DuplicateFunction {
                name: function.name.clone(),
            });
        }

        let mut scope = Scope::new(&functions);
        for param in &function.params {
            scope.mark(param);
        }
        scope.check_block(&function.body)?;
        debug!(function = %function.name, "function body checked");
    }

    let mut scope = Scope::new(&functions);
    scope.check_block(&program.statements)?;
    debug!(
        functions = functions.len(),
        globals = scope.initialized.len(),
        "semantic analysis passed"
    );
    Ok(())
}

struct Scope<'f, 'p> {
    functions: &'f HashMap<&'p str, usize>,
    initialized: HashSet<String>,
}

impl<'f, 'p> Scope<'f, 'p> {
    fn new(functions: &'f HashMap<&'p str, usize>) -> Self {
        Self {
            functions,
            initialized: HashSet::new(),
        }
    }

    fn mark(&mut self, name: &str) {
        self.initialized.insert(name.to_string());
    }

    fn check_block(&mut self, statements: &[Statement]) -> SemanticResult<()> {
        for statement in statements {
            self.check_statement(statement)?;
        }
        Ok(())
    }

    fn check_statement(&mut self, statement: &Statement) -> SemanticResult<()> {
        match statement {
            Statement::Read(name) => self.mark(name),
            Statement::Print(expr) | Statement::Return(expr) => self.check_expression(expr)?,
            Statement::Assign(assignment) => self.check_assignment(assignment)?,
            Statement::If {
                condition,
                then_body,
                elif_clauses,
                else_body,
            } => {
                self.check_expression(condition)?;
                self.check_block(then_body)?;
                for clause in elif_clauses {
                    self.check_expression(&clause.condition)?;
                    self.check_block(&clause.body)?;
                }
                if let Some(else_body) = else_body {
                    self.check_block(else_body)?;
                }
            }
            Statement::While { condition, body } => {
                self.check_expression(condition)?;
                self.check_block(body)?;
            }
            Statement::For {
                init,
                condition,
                update,
                body,
            } => {
                self.check_assignment(init)?;
                self.check_expression(condition)?;
                // The update runs after the body, so its target is only
                // marked once the body has been checked.
                self.check_expression(&update.value)?;
                self.check_block(body)?;
                self.mark(&update.target);
            }
        }
        Ok(())
    }

    /// The value is checked before the target is marked, so `x = x + 1`
    /// with `x` unset is rejected.
    fn check_assignment(&mut self, assignment: &Assignment) -> SemanticResult<()> {
        self.check_expression(&assignment.value)?;
        self.mark(&assignment.target);
        Ok(())
    }

    fn check_expression(&self, expr: &Expression) -> SemanticResult<()> {
        match expr {
            Expression::Integer(_) | Expression::String(_) => Ok(()),
            Expression::Variable(name) => {
                if self.initialized.contains(name) {
                    Ok(())
                } else {
                    Err(SemanticError::UninitializedVariable { name: name.clone() })
                }
            }
            Expression::BinaryOp { left, op, right } => {
                if !op.is_equality() {
                    reject_string_operand(left, &op.to_string())?;
                    reject_string_operand(right, &op.to_string())?;
                }
                self.check_expression(left)?;
                self.check_expression(right)
            }
            Expression::UnaryOp { op, operand } => {
                reject_string_operand(operand, &op.to_string())?;
                self.check_expression(operand)
            }
            Expression::Call { name, args } => {
                let expected = self
                    .functions
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| SemanticError::UndefinedFunction { name: name.clone() })?;
                if expected != args.len() {
                    return Err(SemanticError::ArityMismatch {
                        name: name.clone(),
                        expected,
                        found: args.len(),
                    });
                }
                for arg in args {
                    self.check_expression(arg)?;
                }
                Ok(())
            }
        }
    }
}

fn reject_string_operand(operand: &Expression, operator: &str) -> SemanticResult<()> {
    if let Expression::String(text) = operand {
        return Err(SemanticError::StringOperand {
            text: text.clone(),
            operator: operator.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn check(source: &str) -> SemanticResult<()> {
        let program = parse(source).expect("parse should succeed");
        analyze(&program)
    }

    #[test]
    fn accepts_well_formed_program() {
        let source = indoc! {"
            def factorial(n) {
                if n <= 1 { return 1; } else { return n * factorial(n - 1); }
            }
            read k;
            x = factorial(k);
            print x;
            end;
        "};
        assert_eq!(check(source), Ok(()));
    }

    #[test]
    fn rejects_uninitialized_variable() {
        assert_eq!(
            check("x = y + 5; end;"),
            Err(SemanticError::UninitializedVariable {
                name: "y".to_string()
            })
        );
    }

    #[test]
    fn self_referencing_assignment_is_uninitialized() {
        let err = check("x = x + 1; end;").expect_err("expected failure");
        assert_eq!(err.to_string(), "Use of uninitialized variable 'x'");
    }

    #[test]
    fn function_scope_does_not_see_globals() {
        let source = indoc! {"
            def f(a) { return a + g; }
            g = 1;
            print f(2);
            end;
        "};
        assert_eq!(
            check(source),
            Err(SemanticError::UninitializedVariable {
                name: "g".to_string()
            })
        );
    }

    #[test]
    fn function_locals_do_not_leak_into_main() {
        let source = indoc! {"
            def f(a) { b = a; return b; }
            print b;
            end;
        "};
        assert_eq!(
            check(source),
            Err(SemanticError::UninitializedVariable {
                name: "b".to_string()
            })
        );
    }

    #[test]
    fn calls_to_later_functions_are_undefined() {
        let source = indoc! {"
            def even(n) { if n == 0 { return 1; } return odd(n - 1); }
            def odd(n) { if n == 0 { return 0; } return even(n - 1); }
            print even(4);
            end;
        "};
        assert_eq!(
            check(source),
            Err(SemanticError::UndefinedFunction {
                name: "odd".to_string()
            })
        );
    }

    #[test]
    fn self_recursion_and_earlier_functions_are_accepted() {
        let source = indoc! {"
            def inc(b) { return b + 1; }
            def count(n) { if n <= 0 { return 0; } return inc(count(n - 1)); }
            print count(3);
            end;
        "};
        assert_eq!(check(source), Ok(()));
    }

    #[test]
    fn rejects_undefined_function() {
        assert_eq!(
            check("print nope(1); end;"),
            Err(SemanticError::UndefinedFunction {
                name: "nope".to_string()
            })
        );
    }

    #[test]
    fn rejects_arity_mismatch_for_every_count() {
        let params = ["a", "b", "c", "d", "e"];
        for declared in 0..=5 {
            for supplied in 0..=5 {
                if declared == supplied {
                    continue;
                }
                let args = vec!["1"; supplied].join(", ");
                let source = format!(
                    "def f({}) {{ return 0; }} print f({args}); end;",
                    params[..declared].join(", ")
                );
                assert_eq!(
                    check(&source),
                    Err(SemanticError::ArityMismatch {
                        name: "f".to_string(),
                        expected: declared,
                        found: supplied,
                    }),
                    "declared {declared}, supplied {supplied}"
                );
            }
        }
    }

    #[test]
    fn rejects_duplicate_function() {
        let source = "def f() { return 1; } def f(a) { return a; } end;";
        assert_eq!(
            check(source),
            Err(SemanticError::DuplicateFunction {
                name: "f".to_string()
            })
        );
    }

    #[test]
    fn rejects_string_operands() {
        assert_eq!(
            check(r#"x = "a" + 1; end;"#),
            Err(SemanticError::StringOperand {
                text: "a".to_string(),
                operator: "+".to_string(),
            })
        );
        assert!(matches!(
            check(r#"x = not "a"; end;"#),
            Err(SemanticError::StringOperand { .. })
        ));
    }

    #[test]
    fn strings_may_be_compared_for_equality() {
        assert_eq!(
            check(r#"s = "a"; if s == "a" { print 1; } elif "b" != s { print 2; } end;"#),
            Ok(())
        );
        assert_eq!(
            check(r#"s = "a"; print s < "b"; end;"#),
            Err(SemanticError::StringOperand {
                text: "b".to_string(),
                operator: "<".to_string(),
            })
        );
    }

    #[test]
    fn strings_may_be_printed_and_assigned() {
        assert_eq!(check(r#"s = "hola"; print s; print "x"; end;"#), Ok(()));
    }

    #[test]
    fn for_header_initializes_loop_variable() {
        assert_eq!(
            check("for i = 0; i < 3; i = i + 1 { print i; } end;"),
            Ok(())
        );
    }

    #[test]
    fn for_update_target_is_not_initialized_inside_body() {
        assert_eq!(
            check("for i = 0; i < 2; j = i + 1 { print j; i = i + 1; } end;"),
            Err(SemanticError::UninitializedVariable {
                name: "j".to_string()
            })
        );
    }

    #[test]
    fn read_initializes_its_target() {
        assert_eq!(check("read n; print n * 2; end;"), Ok(()));
    }
}
