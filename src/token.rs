use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    Identifier(&'a str),
    Integer(i64),
    /// String literal with escapes already resolved.
    String(String),

    // Keywords
    Read,
    Print,
    If,
    Elif,
    Else,
    While,
    For,
    Def,
    Return,
    End,
    And,
    Or,
    Not,

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Percent,      // %
    Assign,       // =
    Less,         // <
    Greater,      // >
    LessEqual,    // <=
    GreaterEqual, // >=
    EqualEqual,   // ==
    NotEqual,     // !=

    // Delimiters
    Semicolon, // ;
    Comma,     // ,
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }

    EOF,
}

impl<'a> TokenKind<'a> {
    pub fn keyword(word: &str) -> Option<Self> {
        let kind = match word {
            "read" => TokenKind::Read,
            "print" => TokenKind::Print,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "end" => TokenKind::End,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            _ => return None,
        };
        Some(kind)
    }

    /// Source spelling for fixed tokens, `None` for tokens that carry a value.
    pub fn lexeme(&self) -> Option<&'static str> {
        let text = match self {
            TokenKind::Identifier(_) | TokenKind::Integer(_) | TokenKind::String(_) => {
                return None;
            }
            TokenKind::EOF => return None,
            TokenKind::Read => "read",
            TokenKind::Print => "print",
            TokenKind::If => "if",
            TokenKind::Elif => "elif",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::Def => "def",
            TokenKind::Return => "return",
            TokenKind::End => "end",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Assign => "=",
            TokenKind::Less => "<",
            TokenKind::Greater => ">",
            TokenKind::LessEqual => "<=",
            TokenKind::GreaterEqual => ">=",
            TokenKind::EqualEqual => "==",
            TokenKind::NotEqual => "!=",
            TokenKind::Semicolon => ";",
            TokenKind::Comma => ",",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
        };
        Some(text)
    }
}

impl fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier(name) => write!(f, "identifier '{name}'"),
            TokenKind::Integer(value) => write!(f, "integer {value}"),
            TokenKind::String(text) => write!(f, "string {text:?}"),
            TokenKind::EOF => write!(f, "end of input"),
            other => match other.lexeme() {
                Some(text) => write!(f, "'{text}'"),
                None => write!(f, "{other:?}"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind<'a>, span: Span) -> Self {
        Self { kind, span }
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>4}:{:<3} {}", self.span.line, self.span.column, self.kind)
    }
}
