use std::mem;

use tracing::debug;

use crate::ast::{
    Assignment, BinaryOperator, ElifClause, Expression, FunctionDef, Program, Statement,
    UnaryOperator,
};
use crate::lexer;
use crate::token::{Span, Token, TokenKind};

pub mod error;

pub use error::{ParseError, ParseResult};

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(mut tokens: Vec<Token<'a>>) -> Self {
        if !matches!(tokens.last(), Some(token) if token.kind == TokenKind::EOF) {
            let span = tokens.last().map(|token| token.span).unwrap_or_default();
            tokens.push(Token::new(TokenKind::EOF, span));
        }
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> ParseResult<Program> {
        let mut functions = Vec::new();
        while self.check(&TokenKind::Def) {
            functions.push(self.parse_function_def()?);
        }

        let mut statements = Vec::new();
        while !self.check(&TokenKind::End) && !self.check(&TokenKind::EOF) {
            statements.push(self.parse_statement()?);
        }
        // Anything after `end` is ignored.
        self.expect(TokenKind::End)?;

        debug!(
            functions = functions.len(),
            statements = statements.len(),
            "parsed program"
        );
        Ok(Program {
            functions,
            statements,
        })
    }

    fn parse_function_def(&mut self) -> ParseResult<FunctionDef> {
        self.expect(TokenKind::Def)?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            params.push(self.expect_identifier()?);
            while self.check(&TokenKind::Comma) {
                self.advance();
                params.push(self.expect_identifier()?);
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(FunctionDef { name, params, body })
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Statement>> {
        self.expect(TokenKind::LBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check(&TokenKind::EOF) {
            body.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(body)
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        match self.current().kind {
            TokenKind::Read => {
                self.advance();
                let name = self.expect_identifier()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Statement::Read(name))
            }
            TokenKind::Print => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Statement::Print(expr))
            }
            TokenKind::Return => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Statement::Return(expr))
            }
            TokenKind::Identifier(_) => {
                let assignment = self.parse_assignment()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Statement::Assign(assignment))
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.advance();
                let condition = self.parse_expression()?;
                let body = self.parse_block()?;
                Ok(Statement::While { condition, body })
            }
            TokenKind::For => self.parse_for(),
            _ => Err(self.error("statement")),
        }
    }

    fn parse_assignment(&mut self) -> ParseResult<Assignment> {
        let target = self.expect_identifier()?;
        self.expect(TokenKind::Assign)?;
        let value = self.parse_expression()?;
        Ok(Assignment { target, value })
    }

    fn parse_if(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::If)?;
        let condition = self.parse_expression()?;
        let then_body = self.parse_block()?;

        let mut elif_clauses = Vec::new();
        while self.check(&TokenKind::Elif) {
            self.advance();
            let condition = self.parse_expression()?;
            let body = self.parse_block()?;
            elif_clauses.push(ElifClause { condition, body });
        }

        let else_body = if self.check(&TokenKind::Else) {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Statement::If {
            condition,
            then_body,
            elif_clauses,
            else_body,
        })
    }

    /// `for i = a; cond; i = b { ... }`
    fn parse_for(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::For)?;
        let init = self.parse_assignment()?;
        self.expect(TokenKind::Semicolon)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::Semicolon)?;
        let update = self.parse_assignment()?;
        let body = self.parse_block()?;
        Ok(Statement::For {
            init,
            condition,
            update,
            body,
        })
    }

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            expr = binary(expr, BinaryOperator::Or, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_not()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.parse_not()?;
            expr = binary(expr, BinaryOperator::And, right);
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Not) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expression::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_relational()
    }

    /// Relational operators do not chain: `a < b < c` stops after `a < b`.
    fn parse_relational(&mut self) -> ParseResult<Expression> {
        let left = self.parse_additive()?;
        let op = match self.current().kind {
            TokenKind::Less => BinaryOperator::Less,
            TokenKind::Greater => BinaryOperator::Greater,
            TokenKind::LessEqual => BinaryOperator::LessEqual,
            TokenKind::GreaterEqual => BinaryOperator::GreaterEqual,
            TokenKind::EqualEqual => BinaryOperator::Equal,
            TokenKind::NotEqual => BinaryOperator::NotEqual,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(binary(left, op, right))
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOperator::Mul,
                TokenKind::Slash => BinaryOperator::Div,
                TokenKind::Percent => BinaryOperator::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let op = match self.current().kind {
            TokenKind::Plus => UnaryOperator::Plus,
            TokenKind::Minus => UnaryOperator::Minus,
            _ => return self.parse_primary(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expression::UnaryOp {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        match &self.current().kind {
            TokenKind::Integer(value) => {
                let value = *value;
                self.advance();
                Ok(Expression::Integer(value))
            }
            TokenKind::String(text) => {
                let text = text.clone();
                self.advance();
                Ok(Expression::String(text))
            }
            TokenKind::Identifier(name) => {
                let name = name.to_string();
                self.advance();
                if !self.check(&TokenKind::LParen) {
                    return Ok(Expression::Variable(name));
                }
                self.advance();
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    args.push(self.parse_expression()?);
                    while self.check(&TokenKind::Comma) {
                        self.advance();
                        args.push(self.parse_expression()?);
                    }
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expression::Call { name, args })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(self.error("expression")),
        }
    }

    fn current(&self) -> &Token<'a> {
        // `new` guarantees a trailing EOF, so clamping keeps us on it.
        let index = self.pos.min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn check(&self, kind: &TokenKind<'_>) -> bool {
        mem::discriminant(&self.current().kind) == mem::discriminant(kind)
    }

    fn advance(&mut self) -> Span {
        let span = self.current().span;
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        span
    }

    fn expect(&mut self, expected: TokenKind<'static>) -> ParseResult<Span> {
        if self.check(&expected) {
            Ok(self.advance())
        } else {
            Err(self.error(&expected.to_string()))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = self.current().kind {
            let name = name.to_string();
            self.advance();
            Ok(name)
        } else {
            Err(self.error("identifier"))
        }
    }

    fn error(&self, expected: &str) -> ParseError {
        let token = self.current();
        ParseError {
            expected: expected.to_string(),
            found: token.kind.to_string(),
            line: token.span.line,
            column: token.span.column,
        }
    }
}

fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
    Expression::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

pub fn parse_tokens(tokens: Vec<Token<'_>>) -> ParseResult<Program> {
    Parser::new(tokens).parse_program()
}

/// Convenience entry point for callers that only care about the parse step.
pub fn parse(input: &str) -> anyhow::Result<Program> {
    let tokens = lexer::tokenize(input)?;
    Ok(parse_tokens(tokens)?)
}
