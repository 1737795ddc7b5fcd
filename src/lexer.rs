use std::{iter::Peekable, str::CharIndices};

use tracing::debug;

use crate::token::{Span, Token, TokenKind};

pub mod error;

pub use error::{LexError, LexResult};

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    eof_reached: bool,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            eof_reached: false,
            line: 1,
            column: 1,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        if !self.eof_reached {
            self.skip_trivia()?;
        }

        let (start_idx, ch) = match self.chars.peek() {
            Some(&(idx, c)) => (idx, c),
            None => {
                self.eof_reached = true;
                let index = self.input.len();
                return Ok(Token::new(
                    TokenKind::EOF,
                    Span {
                        start: index,
                        end: index,
                        line: self.line,
                        column: self.column,
                    },
                ));
            }
        };

        let start_line = self.line;
        let start_column = self.column;

        if ch == '"' {
            return self.read_string(start_idx, start_line, start_column);
        }
        if ch.is_alphabetic() || ch == '_' {
            return Ok(self.read_identifier(start_idx, start_line, start_column));
        }
        if ch.is_ascii_digit() {
            return self.read_integer(start_idx, start_line, start_column);
        }

        self.advance_char();
        let kind = match (ch, self.peek_char()) {
            ('<', Some('=')) => self.two_char(TokenKind::LessEqual),
            ('>', Some('=')) => self.two_char(TokenKind::GreaterEqual),
            ('=', Some('=')) => self.two_char(TokenKind::EqualEqual),
            ('!', Some('=')) => self.two_char(TokenKind::NotEqual),
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('%', _) => TokenKind::Percent,
            ('=', _) => TokenKind::Assign,
            ('<', _) => TokenKind::Less,
            ('>', _) => TokenKind::Greater,
            (';', _) => TokenKind::Semicolon,
            (',', _) => TokenKind::Comma,
            ('(', _) => TokenKind::LParen,
            (')', _) => TokenKind::RParen,
            ('{', _) => TokenKind::LBrace,
            ('}', _) => TokenKind::RBrace,
            _ => {
                return Err(LexError::UnexpectedCharacter {
                    character: ch,
                    line: start_line,
                    column: start_column,
                });
            }
        };

        Ok(Token::new(
            kind,
            Span {
                start: start_idx,
                end: self.current_index(),
                line: start_line,
                column: start_column,
            },
        ))
    }

    fn two_char(&mut self, kind: TokenKind<'a>) -> TokenKind<'a> {
        self.advance_char();
        kind
    }

    /// Skips whitespace, `//` line comments and `/* */` block comments.
    fn skip_trivia(&mut self) -> LexResult<()> {
        loop {
            match (self.peek_char(), self.peek_second()) {
                (Some(c), _) if c.is_whitespace() => {
                    self.advance_char();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance_char();
                    }
                }
                (Some('/'), Some('*')) => {
                    let (line, column) = (self.line, self.column);
                    self.advance_char();
                    self.advance_char();
                    loop {
                        match (self.peek_char(), self.peek_second()) {
                            (Some('*'), Some('/')) => {
                                self.advance_char();
                                self.advance_char();
                                break;
                            }
                            (Some(_), _) => {
                                self.advance_char();
                            }
                            (None, _) => {
                                return Err(LexError::UnterminatedComment { line, column });
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_identifier(&mut self, start: usize, line: usize, column: usize) -> Token<'a> {
        self.advance_char(); // Consume first char
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let ident = &self.input[start..end_idx];
        let kind = TokenKind::keyword(ident).unwrap_or(TokenKind::Identifier(ident));
        Token::new(
            kind,
            Span {
                start,
                end: end_idx,
                line,
                column,
            },
        )
    }

    fn read_integer(&mut self, start: usize, line: usize, column: usize) -> LexResult<Token<'a>> {
        self.advance_char(); // Consume first digit
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let num_str = &self.input[start..end_idx];
        let num = num_str
            .parse::<i64>()
            .map_err(|_| LexError::InvalidIntegerLiteral {
                literal: num_str.to_string(),
                line,
                column,
            })?;
        Ok(Token::new(
            TokenKind::Integer(num),
            Span {
                start,
                end: end_idx,
                line,
                column,
            },
        ))
    }

    fn read_string(&mut self, start: usize, line: usize, column: usize) -> LexResult<Token<'a>> {
        self.advance_char(); // Consume opening quote
        let mut text = String::new();
        while let Some(c) = self.peek_char() {
            match c {
                '"' => {
                    self.advance_char();
                    return Ok(Token::new(
                        TokenKind::String(text),
                        Span {
                            start,
                            end: self.current_index(),
                            line,
                            column,
                        },
                    ));
                }
                '\\' => {
                    let escaped = match self.peek_second() {
                        Some('"') => Some('"'),
                        Some('n') => Some('\n'),
                        Some('\\') => Some('\\'),
                        _ => None,
                    };
                    self.advance_char();
                    match escaped {
                        Some(resolved) => {
                            self.advance_char();
                            text.push(resolved);
                        }
                        None => text.push('\\'),
                    }
                }
                other => {
                    self.advance_char();
                    text.push(other);
                }
            }
        }
        Err(LexError::UnterminatedString { line, column })
    }

    fn advance_char(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn peek_second(&self) -> Option<char> {
        let mut lookahead = self.chars.clone();
        lookahead.next();
        lookahead.next().map(|(_, c)| c)
    }

    fn current_index(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }
}

/// Tokenizes the whole input; the result always ends with an `EOF` token.
pub fn tokenize(input: &str) -> LexResult<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::EOF);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    debug!(count = tokens.len(), "tokenized source");
    Ok(tokens)
}
