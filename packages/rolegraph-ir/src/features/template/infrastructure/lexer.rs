//! Expression lexer
//!
//! Tokenizes the contents of one `{{ }}` / `{% %}` chunk (or a bare
//! conditional expression). Keywords (`and`, `or`, `not`, `is`, `in`, `if`,
//! `else`, ...) are lexed as names and interpreted by the parser.

use core::iter::Peekable;
use core::str::CharIndices;

use crate::errors::{Result, RolegraphError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Str(String),
    Int(i64),
    Float(f64),

    Pipe,
    Dot,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,

    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Tilde,

    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Name(n) => format!("name '{n}'"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Int(_) | TokenKind::Float(_) => "number".to_string(),
            TokenKind::Eof => "end of expression".to_string(),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

/// Char-walking lexer over one expression chunk.
///
/// `line`/`column` seed the positions so errors point into the enclosing
/// template string, not into the chunk.
pub struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, line: u32, column: u32) -> Self {
        Self {
            chars: src.char_indices().peekable(),
            line,
            column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn error(&self, message: impl Into<String>) -> RolegraphError {
        RolegraphError::template_syntax(message, self.line, self.column)
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            while matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.bump();
            }
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };

            let kind = match c {
                '\'' | '"' => self.lex_string()?,
                c if c.is_ascii_digit() => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => self.lex_name(),
                _ => self.lex_operator()?,
            };
            tokens.push(Token { kind, line, column });
        }
    }

    fn lex_string(&mut self) -> Result<TokenKind> {
        let quote = self.bump().unwrap_or('"');
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal")),
                Some('\\') => match self.bump() {
                    None => return Err(self.error("unterminated string escape")),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                },
                Some(c) if c == quote => return Ok(TokenKind::Str(out)),
                Some(c) => out.push(c),
            }
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind> {
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            text.push(self.bump().unwrap_or_default());
        }
        let mut is_float = false;
        if self.peek() == Some('.') {
            // Lookahead: `1.0` is a float, `1.items` is attribute access.
            let mut ahead = self.chars.clone();
            ahead.next();
            if matches!(ahead.peek(), Some(&(_, c)) if c.is_ascii_digit()) {
                is_float = true;
                text.push(self.bump().unwrap_or_default());
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    text.push(self.bump().unwrap_or_default());
                }
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| self.error(format!("invalid float literal '{text}'")))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.error(format!("invalid integer literal '{text}'")))
        }
    }

    fn lex_name(&mut self) -> TokenKind {
        let mut name = String::new();
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            name.push(self.bump().unwrap_or_default());
        }
        TokenKind::Name(name)
    }

    fn lex_operator(&mut self) -> Result<TokenKind> {
        let c = self.bump().unwrap_or_default();
        let kind = match c {
            '|' => TokenKind::Pipe,
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '~' => TokenKind::Tilde,
            '%' => TokenKind::Percent,
            '*' => {
                if self.peek() == Some('*') {
                    self.bump();
                    TokenKind::DoubleStar
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.peek() == Some('/') {
                    self.bump();
                    TokenKind::DoubleSlash
                } else {
                    TokenKind::Slash
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Ne
                } else {
                    return Err(self.error("unexpected '!'"));
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            other => return Err(self.error(format!("unexpected character '{other}'"))),
        };
        Ok(kind)
    }
}
