//! Template parser
//!
//! Splits a templated string into raw text, `{{ expr }}` outputs,
//! `{% ... %}` statements and `{# ... #}` comments, then recursive-descent
//! parses each expression chunk. Statement support covers the forms that
//! occur in templated values: `if`/`elif`/`else`/`endif`,
//! `for ... in .../endfor` and `set name = expr`. Anything else is a syntax
//! error rather than silent recovery.
//!
//! The parser is an explicit stateless value: construct one per call or
//! share one immutable instance.

use crate::errors::{Result, RolegraphError};
use crate::features::template::domain::ast::{BinOp, Expr, Template, TemplateNode, UnaryOp};

use super::lexer::{Lexer, Token, TokenKind};

/// Stateless template parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateParser;

impl TemplateParser {
    pub fn new() -> Self {
        TemplateParser
    }

    /// Whether `text` contains any templating delimiter.
    pub fn has_delimiters(text: &str) -> bool {
        text.contains("{{") || text.contains("{%") || text.contains("{#")
    }

    /// Parse a full templated string.
    pub fn parse(&self, source: &str) -> Result<Template> {
        let chunks = scan(source)?;
        build_template(chunks)
    }

    /// Parse a bare expression with no delimiters (conditional context).
    pub fn parse_expression(&self, source: &str) -> Result<Expr> {
        let tokens = Lexer::new(source, 0, 0).tokenize()?;
        let mut parser = ExprParser::new(tokens);
        let expr = parser.parse_expr()?;
        parser.expect_eof()?;
        Ok(expr)
    }
}

// ---------------------------------------------------------------------------
// Template-level scanning
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Chunk {
    Text(String),
    /// `{{ ... }}` contents with the position of its first character.
    Output(String, u32, u32),
    /// `{% ... %}` contents with the position of its first character.
    Statement(String, u32, u32),
}

/// Split template source into raw chunks, tracking line/column.
fn scan(source: &str) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    let mut text = String::new();
    let mut line: u32 = 0;
    let mut column: u32 = 0;
    let mut iter = source.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        let next = iter.peek().map(|&(_, c)| c);
        if c == '{' && matches!(next, Some('{') | Some('%') | Some('#')) {
            let (_, open) = iter.next().unwrap_or((i, '{'));
            let close = match open {
                '{' => "}}",
                '%' => "%}",
                _ => "#}",
            };
            if !text.is_empty() {
                chunks.push(Chunk::Text(std::mem::take(&mut text)));
            }
            column += 2;

            let start = i + 2;
            // Comments have no quoting rules; expression chunks may carry
            // the closer sequence inside a string literal.
            let found = if open == '#' {
                source[start..].find(close)
            } else {
                find_unquoted(&source[start..], close)
            };
            let Some(end) = found.map(|p| start + p) else {
                return Err(RolegraphError::template_syntax(
                    format!("unterminated '{{{open}' delimiter"),
                    line,
                    column,
                ));
            };
            let mut inner = &source[start..end];
            // Whitespace-control markers are irrelevant to analysis.
            inner = inner.strip_prefix('-').unwrap_or(inner);
            inner = inner.strip_suffix('-').unwrap_or(inner);

            let (inner_line, inner_column) = (line, column);
            match open {
                '{' => chunks.push(Chunk::Output(inner.to_string(), inner_line, inner_column)),
                '%' => chunks.push(Chunk::Statement(inner.to_string(), inner_line, inner_column)),
                _ => {} // comments carry no analysis content
            }

            // Advance the iterator (and positions) past the chunk and closer.
            while let Some(&(j, cc)) = iter.peek() {
                if j >= end + 2 {
                    break;
                }
                iter.next();
                if cc == '\n' {
                    line += 1;
                    column = 0;
                } else {
                    column += 1;
                }
            }
        } else {
            text.push(c);
            if c == '\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }
        }
    }
    if !text.is_empty() {
        chunks.push(Chunk::Text(text));
    }
    Ok(chunks)
}

/// First byte offset of `needle` outside single/double-quoted regions.
fn find_unquoted(haystack: &str, needle: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let needle = needle.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if bytes[i..].starts_with(needle) => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

// ---------------------------------------------------------------------------
// Statement nesting
// ---------------------------------------------------------------------------

enum OpenBlock {
    If {
        branches: Vec<(Expr, Vec<TemplateNode>)>,
        else_taken: bool,
        line: u32,
        column: u32,
    },
    For {
        targets: Vec<String>,
        iter: Expr,
        line: u32,
        column: u32,
    },
}

/// Assemble scanned chunks into a nested template tree.
fn build_template(chunks: Vec<Chunk>) -> Result<Template> {
    // Body stack: one Vec per open block plus the root.
    let mut bodies: Vec<Vec<TemplateNode>> = vec![Vec::new()];
    let mut open: Vec<OpenBlock> = Vec::new();

    for chunk in chunks {
        match chunk {
            Chunk::Text(t) => current(&mut bodies).push(TemplateNode::Text(t)),
            Chunk::Output(src, line, column) => {
                let expr = parse_chunk_expr(&src, line, column)?;
                current(&mut bodies).push(TemplateNode::Output(expr));
            }
            Chunk::Statement(src, line, column) => {
                handle_statement(&src, line, column, &mut bodies, &mut open)?;
            }
        }
    }

    if let Some(block) = open.pop() {
        let (what, line, column) = match block {
            OpenBlock::If { line, column, .. } => ("if", line, column),
            OpenBlock::For { line, column, .. } => ("for", line, column),
        };
        return Err(RolegraphError::template_syntax(
            format!("unclosed '{what}' block"),
            line,
            column,
        ));
    }
    Ok(Template {
        nodes: bodies.pop().unwrap_or_default(),
    })
}

fn current(bodies: &mut [Vec<TemplateNode>]) -> &mut Vec<TemplateNode> {
    bodies.last_mut().expect("body stack is never empty")
}

fn handle_statement(
    src: &str,
    line: u32,
    column: u32,
    bodies: &mut Vec<Vec<TemplateNode>>,
    open: &mut Vec<OpenBlock>,
) -> Result<()> {
    let tokens = Lexer::new(src, line, column).tokenize()?;
    let mut parser = ExprParser::new(tokens);
    let keyword = match parser.peek_kind() {
        TokenKind::Name(n) => n.clone(),
        other => {
            return Err(RolegraphError::template_syntax(
                format!("expected statement keyword, found {}", other.describe()),
                line,
                column,
            ))
        }
    };
    parser.advance();

    match keyword.as_str() {
        "if" => {
            let cond = parser.parse_expr()?;
            parser.expect_eof()?;
            open.push(OpenBlock::If {
                branches: vec![(cond, Vec::new())],
                else_taken: false,
                line,
                column,
            });
            bodies.push(Vec::new());
        }
        "elif" => {
            let cond = parser.parse_expr()?;
            parser.expect_eof()?;
            let body = bodies.pop().unwrap_or_default();
            match open.last_mut() {
                Some(OpenBlock::If {
                    branches,
                    else_taken: false,
                    ..
                }) => {
                    if let Some(last) = branches.last_mut() {
                        last.1 = body;
                    }
                    branches.push((cond, Vec::new()));
                    bodies.push(Vec::new());
                }
                _ => {
                    return Err(RolegraphError::template_syntax(
                        "'elif' outside 'if' block",
                        line,
                        column,
                    ))
                }
            }
        }
        "else" => {
            parser.expect_eof()?;
            let body = bodies.pop().unwrap_or_default();
            match open.last_mut() {
                Some(OpenBlock::If {
                    branches,
                    else_taken,
                    ..
                }) if !*else_taken => {
                    if let Some(last) = branches.last_mut() {
                        last.1 = body;
                    }
                    *else_taken = true;
                    bodies.push(Vec::new());
                }
                _ => {
                    return Err(RolegraphError::template_syntax(
                        "'else' outside 'if' block",
                        line,
                        column,
                    ))
                }
            }
        }
        "endif" => {
            parser.expect_eof()?;
            let body = bodies.pop().unwrap_or_default();
            match open.pop() {
                Some(OpenBlock::If {
                    mut branches,
                    else_taken,
                    ..
                }) => {
                    let else_body = if else_taken {
                        Some(body)
                    } else {
                        if let Some(last) = branches.last_mut() {
                            last.1 = body;
                        }
                        None
                    };
                    current(bodies).push(TemplateNode::If {
                        branches,
                        else_body,
                    });
                }
                _ => {
                    return Err(RolegraphError::template_syntax(
                        "'endif' without 'if'",
                        line,
                        column,
                    ))
                }
            }
        }
        "for" => {
            let targets = parser.parse_for_targets()?;
            parser.expect_name("in")?;
            let iter = parser.parse_expr()?;
            parser.expect_eof()?;
            open.push(OpenBlock::For {
                targets,
                iter,
                line,
                column,
            });
            bodies.push(Vec::new());
        }
        "endfor" => {
            parser.expect_eof()?;
            let body = bodies.pop().unwrap_or_default();
            match open.pop() {
                Some(OpenBlock::For { targets, iter, .. }) => {
                    current(bodies).push(TemplateNode::For {
                        targets,
                        iter,
                        body,
                    });
                }
                _ => {
                    return Err(RolegraphError::template_syntax(
                        "'endfor' without 'for'",
                        line,
                        column,
                    ))
                }
            }
        }
        "set" => {
            let target = parser.expect_any_name()?;
            parser.expect(TokenKind::Assign)?;
            let value = parser.parse_expr()?;
            parser.expect_eof()?;
            current(bodies).push(TemplateNode::Set { target, value });
        }
        other => {
            return Err(RolegraphError::template_syntax(
                format!("unsupported statement '{other}'"),
                line,
                column,
            ))
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Expression parsing
// ---------------------------------------------------------------------------

fn parse_chunk_expr(src: &str, line: u32, column: u32) -> Result<Expr> {
    let tokens = Lexer::new(src, line, column).tokenize()?;
    let mut parser = ExprParser::new(tokens);
    let expr = parser.parse_expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn here(&self) -> (u32, u32) {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|t| (t.line, t.column))
            .unwrap_or((0, 0))
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn error(&self, message: impl Into<String>) -> RolegraphError {
        let (line, column) = self.here();
        RolegraphError::template_syntax(message, line, column)
    }

    fn at_name(&self, name: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Name(n) if n == name)
    }

    fn eat_name(&mut self, name: &str) -> bool {
        if self.at_name(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                kind.describe(),
                self.peek_kind().describe()
            )))
        }
    }

    fn expect_name(&mut self, name: &str) -> Result<()> {
        if self.eat_name(name) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected '{name}', found {}",
                self.peek_kind().describe()
            )))
        }
    }

    fn expect_any_name(&mut self) -> Result<String> {
        match self.peek_kind() {
            TokenKind::Name(n) => {
                let n = n.clone();
                self.advance();
                Ok(n)
            }
            other => Err(self.error(format!("expected name, found {}", other.describe()))),
        }
    }

    fn expect_eof(&mut self) -> Result<()> {
        match self.peek_kind() {
            TokenKind::Eof => Ok(()),
            other => Err(self.error(format!(
                "trailing input: found {}",
                other.describe()
            ))),
        }
    }

    fn parse_for_targets(&mut self) -> Result<Vec<String>> {
        let mut targets = vec![self.expect_any_name()?];
        while self.eat(&TokenKind::Comma) {
            targets.push(self.expect_any_name()?);
        }
        Ok(targets)
    }

    /// expr := or ('if' or ('else' expr)?)?
    fn parse_expr(&mut self) -> Result<Expr> {
        let value = self.parse_or()?;
        if self.eat_name("if") {
            let test = self.parse_or()?;
            let otherwise = if self.eat_name("else") {
                Some(Box::new(self.parse_expr()?))
            } else {
                None
            };
            return Ok(Expr::Cond {
                test: Box::new(test),
                then: Box::new(value),
                otherwise,
            });
        }
        Ok(value)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_name("or") {
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_name("and") {
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_name("not") {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_filtered()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => Some(BinOp::Eq),
                TokenKind::Ne => Some(BinOp::Ne),
                TokenKind::Lt => Some(BinOp::Lt),
                TokenKind::Le => Some(BinOp::Le),
                TokenKind::Gt => Some(BinOp::Gt),
                TokenKind::Ge => Some(BinOp::Ge),
                TokenKind::Name(n) if n == "in" => Some(BinOp::In),
                TokenKind::Name(n) if n == "not" => {
                    // `not in` is the only comparison starting with 'not'.
                    self.advance();
                    self.expect_name("in")?;
                    let right = self.parse_filtered()?;
                    left = Expr::Binary {
                        op: BinOp::NotIn,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue;
                }
                TokenKind::Name(n) if n == "is" => {
                    self.advance();
                    let negated = self.eat_name("not");
                    let name = self.expect_any_name()?;
                    let args = self.parse_test_args()?;
                    left = Expr::Test {
                        value: Box::new(left),
                        name,
                        negated,
                        args,
                    };
                    continue;
                }
                _ => None,
            };
            let Some(op) = op else { return Ok(left) };
            self.advance();
            let right = self.parse_filtered()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    /// Test arguments: parenthesized list, or one bare literal
    /// (`x is divisibleby 3`). Bare names are not consumed to keep
    /// `x is defined and y` unambiguous.
    fn parse_test_args(&mut self) -> Result<Vec<Expr>> {
        if self.eat(&TokenKind::LParen) {
            let mut args = Vec::new();
            if !self.eat(&TokenKind::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if self.eat(&TokenKind::RParen) {
                        break;
                    }
                    self.expect(TokenKind::Comma)?;
                }
            }
            return Ok(args);
        }
        match self.peek_kind() {
            TokenKind::Int(v) => {
                let v = *v;
                self.advance();
                Ok(vec![Expr::Int(v)])
            }
            TokenKind::Float(v) => {
                let v = *v;
                self.advance();
                Ok(vec![Expr::Float(v)])
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                Ok(vec![Expr::Str(s)])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn parse_filtered(&mut self) -> Result<Expr> {
        let mut value = self.parse_concat()?;
        while self.eat(&TokenKind::Pipe) {
            let name = self.expect_any_name()?;
            let (args, kwargs) = if self.eat(&TokenKind::LParen) {
                self.parse_call_args()?
            } else {
                (Vec::new(), Vec::new())
            };
            value = Expr::Filter {
                value: Box::new(value),
                name,
                args,
                kwargs,
            };
        }
        Ok(value)
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        while self.eat(&TokenKind::Tilde) {
            let right = self.parse_additive()?;
            left = Expr::Binary {
                op: BinOp::Concat,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_power()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let left = self.parse_unary()?;
        if self.eat(&TokenKind::DoubleStar) {
            let right = self.parse_power()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        if self.eat(&TokenKind::Plus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Pos,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let attr = self.expect_any_name()?;
                expr = Expr::Attr {
                    base: Box::new(expr),
                    attr,
                };
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket)?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat(&TokenKind::LParen) {
                let (args, kwargs) = self.parse_call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Call arguments after the opening paren; consumes the closing paren.
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            // `name=value` is a keyword argument; plain `name` is positional.
            let is_kwarg = matches!(self.peek_kind(), TokenKind::Name(_))
                && matches!(
                    self.tokens.get(self.pos + 1).map(|t| &t.kind),
                    Some(TokenKind::Assign)
                );
            if is_kwarg {
                let name = self.expect_any_name()?;
                self.expect(TokenKind::Assign)?;
                let value = self.parse_expr()?;
                kwargs.push((name, value));
            } else {
                args.push(self.parse_expr()?);
            }
            if self.eat(&TokenKind::RParen) {
                return Ok((args, kwargs));
            }
            self.expect(TokenKind::Comma)?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek_kind().clone() {
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::Float(v))
            }
            TokenKind::Name(n) => {
                self.advance();
                match n.as_str() {
                    "true" | "True" => Ok(Expr::Bool(true)),
                    "false" | "False" => Ok(Expr::Bool(false)),
                    "none" | "None" | "null" => Ok(Expr::Null),
                    _ => Ok(Expr::Name(n)),
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.eat(&TokenKind::RBracket) {
                            break;
                        }
                        self.expect(TokenKind::Comma)?;
                    }
                }
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                if !self.eat(&TokenKind::RBrace) {
                    loop {
                        let key = self.parse_expr()?;
                        self.expect(TokenKind::Colon)?;
                        let value = self.parse_expr()?;
                        entries.push((key, value));
                        if self.eat(&TokenKind::RBrace) {
                            break;
                        }
                        self.expect(TokenKind::Comma)?;
                    }
                }
                Ok(Expr::Dict(entries))
            }
            other => Err(self.error(format!(
                "expected expression, found {}",
                other.describe()
            ))),
        }
    }
}
