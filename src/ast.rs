//! Syntax tree produced by the parser.
//!
//! The tree is built once and only read afterwards: the semantic analyzer
//! validates it and the IR generator lowers it into three-address code.

use std::fmt;

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Integer(i64),
    String(String),
    Variable(String),
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Call {
        name: String,
        args: Vec<Expression>,
    },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOperator {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinaryOperator::Less
                | BinaryOperator::Greater
                | BinaryOperator::LessEqual
                | BinaryOperator::GreaterEqual
                | BinaryOperator::Equal
                | BinaryOperator::NotEqual
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinaryOperator::Equal | BinaryOperator::NotEqual)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Less => "<",
            BinaryOperator::Greater => ">",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
        }
    }

    /// Integer semantics shared by constant folding and the VM.
    ///
    /// Arithmetic wraps on overflow, `/` and `%` round toward negative
    /// infinity, and a zero divisor yields 0. Comparisons and logical
    /// operators produce 1 or 0.
    pub fn apply(self, left: i64, right: i64) -> i64 {
        match self {
            BinaryOperator::Add => left.wrapping_add(right),
            BinaryOperator::Sub => left.wrapping_sub(right),
            BinaryOperator::Mul => left.wrapping_mul(right),
            BinaryOperator::Div => floor_div(left, right),
            BinaryOperator::Mod => floor_mod(left, right),
            BinaryOperator::Less => i64::from(left < right),
            BinaryOperator::Greater => i64::from(left > right),
            BinaryOperator::LessEqual => i64::from(left <= right),
            BinaryOperator::GreaterEqual => i64::from(left >= right),
            BinaryOperator::Equal => i64::from(left == right),
            BinaryOperator::NotEqual => i64::from(left != right),
            BinaryOperator::And => i64::from(left != 0 && right != 0),
            BinaryOperator::Or => i64::from(left != 0 || right != 0),
        }
    }
}

fn floor_div(left: i64, right: i64) -> i64 {
    if right == 0 {
        return 0;
    }
    let quotient = left.wrapping_div(right);
    if left.wrapping_rem(right) != 0 && ((left < 0) != (right < 0)) {
        quotient - 1
    } else {
        quotient
    }
}

fn floor_mod(left: i64, right: i64) -> i64 {
    if right == 0 {
        return 0;
    }
    let remainder = left.wrapping_rem(right);
    if remainder != 0 && ((remainder < 0) != (right < 0)) {
        remainder + right
    } else {
        remainder
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UnaryOperator {
    Plus,
    Minus,
    Not,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOperator::Plus => "+",
            UnaryOperator::Minus => "-",
            UnaryOperator::Not => "not",
        })
    }
}

/// `target = value`, shared by plain assignments and the `for` header.
#[derive(Debug, PartialEq, Clone)]
pub struct Assignment {
    pub target: String,
    pub value: Expression,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ElifClause {
    pub condition: Expression,
    pub body: Vec<Statement>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Statement {
    Read(String),
    Print(Expression),
    Return(Expression),
    Assign(Assignment),
    If {
        condition: Expression,
        then_body: Vec<Statement>,
        elif_clauses: Vec<ElifClause>,
        else_body: Option<Vec<Statement>>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    For {
        init: Assignment,
        condition: Expression,
        update: Assignment,
        body: Vec<Statement>,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Program {
    pub functions: Vec<FunctionDef>,
    pub statements: Vec<Statement>,
}
