//! Gauge parser — tokenizer, AST types, and recursive descent parser
//!
//! Converts script text into a [`Program`]. The parser accepts slightly more
//! than the sandbox will run: imports and forbidden statement forms are kept
//! as nodes so the verifier can report every policy violation at once,
//! instead of failing on the first one with a bare syntax error.
//!
//! Nesting of expressions and blocks is capped at [`MAX_NESTING_DEPTH`] so a
//! hostile script cannot exhaust the host stack while being parsed, verified
//! or evaluated.

pub mod ast;
pub mod tokenizer;

use std::rc::Rc;

use crate::error::CompileError;
use ast::*;
use tokenizer::{Span, SpannedToken, Token, Tokenizer};

/// Deepest expression/block nesting a script may use
pub const MAX_NESTING_DEPTH: usize = 64;

/// Parse script text into a Program
///
/// # Errors
/// Returns `CompileError` with line:column for syntax violations.
pub fn parse(source: &str) -> Result<Program, CompileError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

/// Recursive descent parser over a token stream
pub struct Parser {
    tokens: Vec<SpannedToken>,
    position: usize,
    depth: usize,
}

type ParseResult<T> = Result<T, CompileError>;

impl Parser {
    pub fn new(mut tokens: Vec<SpannedToken>) -> Self {
        if !matches!(tokens.last(), Some(SpannedToken { token: Token::Eof, .. })) {
            let span = tokens
                .last()
                .map(|t| t.span.clone())
                .unwrap_or(Span { line: 1, column: 1, offset: 0 });
            tokens.push(SpannedToken { token: Token::Eof, span });
        }
        Parser {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    pub fn parse_program(mut self) -> ParseResult<Program> {
        let mut body = Vec::new();
        while !self.check(&Token::Eof) {
            if self.eat(&Token::Newline) {
                continue;
            }
            if self.check(&Token::Indent) {
                return Err(self.error_here("unexpected indent"));
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    // ── Token helpers ──────────────────────────────────────

    fn current(&self) -> &SpannedToken {
        let index = self.position.min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.position + offset).min(self.tokens.len() - 1);
        &self.tokens[index].token
    }

    fn span(&self) -> Span {
        self.current().span.clone()
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> ParseResult<Span> {
        if self.check(token) {
            let span = self.span();
            self.advance();
            Ok(span)
        } else {
            Err(self.error_here(&format!("expected {}, found {}", what, describe(self.peek()))))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> ParseResult<String> {
        match self.peek() {
            Token::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(self.error_here(&format!("expected {}, found {}", what, describe(other)))),
        }
    }

    fn error_here(&self, message: &str) -> CompileError {
        CompileError::syntax(message, &self.current().span)
    }

    fn unexpected(&self) -> CompileError {
        self.error_here(&format!("invalid syntax: unexpected {}", describe(self.peek())))
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Token::Newline | Token::Semicolon | Token::Eof)
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.error_here(&format!(
                "nesting exceeds the maximum depth of {}",
                MAX_NESTING_DEPTH
            )));
        }
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    // ── Statements ─────────────────────────────────────────

    fn parse_statement(&mut self) -> ParseResult<Vec<Stmt>> {
        match self.peek() {
            Token::If => Ok(vec![self.parse_if()?]),
            Token::While => Ok(vec![self.parse_while()?]),
            Token::For => Ok(vec![self.parse_for()?]),
            Token::Def => Ok(vec![self.parse_def()?]),
            Token::Try => Ok(vec![self.parse_try()?]),
            Token::Reserved(_) | Token::At => Ok(vec![self.parse_forbidden()]),
            Token::Elif | Token::Else | Token::Except | Token::Dedent | Token::Indent => {
                Err(self.unexpected())
            }
            _ => self.parse_simple_line(),
        }
    }

    /// One or more small statements separated by `;`, ending the line
    fn parse_simple_line(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            stmts.push(self.parse_small_statement()?);
            if self.eat(&Token::Semicolon) {
                if matches!(self.peek(), Token::Newline | Token::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        match self.peek() {
            Token::Newline => {
                self.advance();
                Ok(stmts)
            }
            Token::Eof => Ok(stmts),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_small_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        let kind = match self.peek() {
            Token::Pass => {
                self.advance();
                StmtKind::Pass
            }
            Token::Break => {
                self.advance();
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                StmtKind::Continue
            }
            Token::Return => {
                self.advance();
                if self.at_line_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_expr_list()?))
                }
            }
            Token::Import => {
                self.advance();
                let module = self.parse_dotted_name()?;
                self.skip_to_line_end();
                StmtKind::Import { module }
            }
            Token::From => {
                self.advance();
                let module = self.parse_dotted_name()?;
                self.expect(&Token::Import, "'import'")?;
                self.skip_to_line_end();
                StmtKind::Import { module }
            }
            _ => return self.parse_expr_statement(),
        };
        Ok(Stmt { kind, span })
    }

    fn parse_dotted_name(&mut self) -> ParseResult<String> {
        let mut name = String::new();
        while self.eat(&Token::Dot) {
            name.push('.');
        }
        if matches!(self.peek(), Token::Identifier(_)) {
            name.push_str(&self.expect_identifier("module name")?);
            while self.eat(&Token::Dot) {
                name.push('.');
                name.push_str(&self.expect_identifier("module name")?);
            }
        }
        if name.is_empty() {
            return Err(self.error_here("expected module name"));
        }
        Ok(name)
    }

    fn skip_to_line_end(&mut self) {
        while !self.at_line_end() {
            self.advance();
        }
    }

    fn parse_expr_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        let first = self.parse_expr_list()?;

        let aug = match self.peek() {
            Token::PlusAssign => Some(BinOp::Add),
            Token::MinusAssign => Some(BinOp::Sub),
            Token::StarAssign => Some(BinOp::Mul),
            Token::SlashAssign => Some(BinOp::Div),
            Token::DoubleSlashAssign => Some(BinOp::FloorDiv),
            Token::PercentAssign => Some(BinOp::Mod),
            _ => None,
        };

        if let Some(op) = aug {
            self.advance();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Subscript { .. } | ExprKind::Attribute { .. }
            ) {
                return Err(CompileError::syntax(
                    format!("'{}' is an illegal expression for augmented assignment", describe_expr(&first)),
                    &first.span,
                ));
            }
            let value = self.parse_expr_list()?;
            return Ok(Stmt {
                kind: StmtKind::AugAssign { target: first, op, value },
                span,
            });
        }

        if !self.check(&Token::Assign) {
            return Ok(Stmt { kind: StmtKind::Expr(first), span });
        }

        let mut targets = vec![first];
        let value = loop {
            self.advance();
            let next = self.parse_expr_list()?;
            if self.check(&Token::Assign) {
                targets.push(next);
            } else {
                break next;
            }
        };
        for target in &targets {
            check_target(target)?;
        }
        Ok(Stmt {
            kind: StmtKind::Assign { targets, value },
            span,
        })
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance(); // `if` or `elif`
        let test = self.parse_expr()?;
        self.expect(&Token::Colon, "':'")?;
        let body = self.parse_block()?;
        let orelse = if self.check(&Token::Elif) {
            vec![self.parse_if()?]
        } else if self.eat(&Token::Else) {
            self.expect(&Token::Colon, "':'")?;
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            span,
        })
    }

    fn parse_while(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance();
        let test = self.parse_expr()?;
        self.expect(&Token::Colon, "':'")?;
        let body = self.parse_block()?;
        if self.check(&Token::Else) {
            return Err(self.error_here("'else' after a loop is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::While { test, body },
            span,
        })
    }

    fn parse_for(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance();
        let target = self.parse_target_list()?;
        self.expect(&Token::In, "'in'")?;
        let iter = self.parse_expr_list()?;
        self.expect(&Token::Colon, "':'")?;
        let body = self.parse_block()?;
        if self.check(&Token::Else) {
            return Err(self.error_here("'else' after a loop is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            span,
        })
    }

    fn parse_def(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance();
        let name = self.expect_identifier("function name")?;
        self.expect(&Token::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            if matches!(self.peek(), Token::Star | Token::DoubleStar) {
                return Err(self.error_here("variable arguments are not supported"));
            }
            params.push(self.expect_identifier("parameter name")?);
            if self.check(&Token::Assign) {
                return Err(self.error_here("default parameter values are not supported"));
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "')'")?;
        self.expect(&Token::Colon, "':'")?;
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(FunctionDef {
                name,
                params,
                body,
                span: span.clone(),
            })),
            span,
        })
    }

    fn parse_try(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.advance();
        self.expect(&Token::Colon, "':'")?;
        let body = self.parse_block()?;

        let mut handlers = Vec::new();
        while self.check(&Token::Except) {
            let handler_span = self.span();
            self.advance();
            let mut class = None;
            let mut binding = None;
            if !self.check(&Token::Colon) {
                class = Some(self.expect_identifier("exception class")?);
                if self.eat(&Token::As) {
                    binding = Some(self.expect_identifier("name after 'as'")?);
                }
            }
            self.expect(&Token::Colon, "':'")?;
            let handler_body = self.parse_block()?;
            handlers.push(ExceptHandler {
                class,
                binding,
                body: handler_body,
                span: handler_span,
            });
        }

        match self.peek() {
            Token::Reserved(word) if word == "finally" => {
                return Err(self.error_here("'finally' clauses are not supported"));
            }
            Token::Else => return Err(self.error_here("'else' after 'try' is not supported")),
            _ => {}
        }
        if handlers.is_empty() {
            return Err(self.error_here("expected 'except' block"));
        }
        Ok(Stmt {
            kind: StmtKind::Try { body, handlers },
            span,
        })
    }

    /// Record a statement form outside the grammar and skip over it,
    /// including its indented block if it opens one.
    fn parse_forbidden(&mut self) -> Stmt {
        let span = self.span();
        let construct = match self.peek() {
            Token::Reserved(word) => word.clone(),
            _ => "decorator".to_string(),
        };

        let mut opens_block = false;
        while !matches!(self.peek(), Token::Newline | Token::Eof) {
            opens_block = self.check(&Token::Colon);
            self.advance();
        }
        self.eat(&Token::Newline);

        if opens_block && self.check(&Token::Indent) {
            let mut depth = 0usize;
            loop {
                match self.peek() {
                    Token::Indent => depth += 1,
                    Token::Dedent => depth = depth.saturating_sub(1),
                    Token::Eof => break,
                    _ => {}
                }
                self.advance();
                if depth == 0 {
                    break;
                }
            }
        }

        Stmt {
            kind: StmtKind::Forbidden { construct },
            span,
        }
    }

    /// Indented block after `:`, or the rest of the line for `if x: y`
    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        if !self.eat(&Token::Newline) {
            return self.parse_simple_line();
        }
        if !self.check(&Token::Indent) {
            return Err(self.error_here("expected an indented block"));
        }
        self.advance();
        self.enter()?;

        let mut stmts = Vec::new();
        while !matches!(self.peek(), Token::Dedent | Token::Eof) {
            if self.eat(&Token::Newline) {
                continue;
            }
            stmts.extend(self.parse_statement()?);
        }
        self.eat(&Token::Dedent);
        self.leave(1);
        Ok(stmts)
    }

    // ── Expressions ────────────────────────────────────────

    /// Comma-separated expressions; more than one (or a trailing comma)
    /// makes a tuple.
    fn parse_expr_list(&mut self) -> ParseResult<Expr> {
        let first = self.parse_expr()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let span = first.span.clone();
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if !starts_expression(self.peek()) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    /// Loop targets: `x`, `k, v`, `(a, b)`
    fn parse_target_list(&mut self) -> ParseResult<Expr> {
        let first = self.parse_postfix()?;
        let target = if self.check(&Token::Comma) {
            let span = first.span.clone();
            let mut items = vec![first];
            while self.eat(&Token::Comma) {
                if self.check(&Token::In) {
                    break;
                }
                items.push(self.parse_postfix()?);
            }
            Expr::new(ExprKind::Tuple(items), span)
        } else {
            first
        };
        check_target(&target)?;
        Ok(target)
    }

    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let result = self.parse_ternary();
        self.leave(1);
        result
    }

    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            Token::Lambda => return Err(self.error_here("lambda expressions are not allowed")),
            Token::Reserved(word) => {
                return Err(self.error_here(&format!("'{}' is not allowed here", word)))
            }
            _ => {}
        }
        let body = self.parse_or()?;
        if !self.check(&Token::If) {
            return Ok(body);
        }
        self.advance();
        let test = self.parse_or()?;
        self.expect(&Token::Else, "'else' in conditional expression")?;
        let orelse = self.parse_expr()?;
        let span = body.span.clone();
        Ok(Expr::new(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            span,
        ))
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        let mut levels = 0;
        while self.eat(&Token::Or) {
            self.enter()?;
            levels += 1;
            let right = self.parse_and()?;
            left = bool_op(BoolOp::Or, left, right);
        }
        self.leave(levels);
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not()?;
        let mut levels = 0;
        while self.eat(&Token::And) {
            self.enter()?;
            levels += 1;
            let right = self.parse_not()?;
            left = bool_op(BoolOp::And, left, right);
        }
        self.leave(levels);
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if !self.check(&Token::Not) {
            return self.parse_comparison();
        }
        let span = self.span();
        self.advance();
        self.enter()?;
        let operand = self.parse_not();
        self.leave(1);
        Ok(Expr::new(
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            },
            span,
        ))
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let left = self.parse_arith()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Token::EqEq => CmpOp::Eq,
                Token::NotEq => CmpOp::NotEq,
                Token::Less => CmpOp::Lt,
                Token::LessEq => CmpOp::LtE,
                Token::Greater => CmpOp::Gt,
                Token::GreaterEq => CmpOp::GtE,
                Token::In => CmpOp::In,
                Token::Not if self.peek_at(1) == &Token::In => {
                    self.advance();
                    CmpOp::NotIn
                }
                Token::Is if self.peek_at(1) == &Token::Not => {
                    self.advance();
                    CmpOp::IsNot
                }
                Token::Is => CmpOp::Is,
                _ => break,
            };
            self.advance();
            ops.push((op, self.parse_arith()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let span = left.span.clone();
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
            span,
        ))
    }

    fn parse_arith(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_term()?;
        let mut levels = 0;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.enter()?;
            levels += 1;
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }
        self.leave(levels);
        Ok(left)
    }

    fn parse_term(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        let mut levels = 0;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::DoubleSlash => BinOp::FloorDiv,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            self.enter()?;
            levels += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.leave(levels);
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            _ => return self.parse_power(),
        };
        let span = self.span();
        self.advance();
        self.enter()?;
        let operand = self.parse_unary();
        self.leave(1);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand?),
            },
            span,
        ))
    }

    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_postfix()?;
        if !self.eat(&Token::DoubleStar) {
            return Ok(base);
        }
        self.enter()?;
        let exponent = self.parse_unary();
        self.leave(1);
        Ok(binary(BinOp::Pow, base, exponent?))
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_atom()?;
        let mut levels = 0;
        loop {
            match self.peek() {
                Token::LParen | Token::LBracket | Token::Dot => {
                    self.enter()?;
                    levels += 1;
                }
                _ => break,
            }
            expr = match self.peek() {
                Token::LParen => self.parse_call(expr)?,
                Token::LBracket => self.parse_subscript(expr)?,
                _ => {
                    self.advance();
                    let name = self.expect_identifier("attribute name")?;
                    let span = expr.span.clone();
                    Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            name,
                        },
                        span,
                    )
                }
            };
        }
        self.leave(levels);
        Ok(expr)
    }

    fn parse_call(&mut self, func: Expr) -> ParseResult<Expr> {
        self.advance(); // (
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.check(&Token::RParen) {
            if matches!(self.peek(), Token::Star | Token::DoubleStar) {
                return Err(self.error_here("argument unpacking is not supported"));
            }
            if matches!(self.peek(), Token::Identifier(_)) && self.peek_at(1) == &Token::Assign {
                let name = self.expect_identifier("keyword")?;
                self.advance(); // =
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error_here(&format!("keyword argument repeated: {}", name)));
                }
                let value = self.parse_expr()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error_here("positional argument follows keyword argument"));
                }
                args.push(self.parse_expr()?);
                if self.check(&Token::For) {
                    return Err(self.error_here("generator expressions are not supported"));
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "')'")?;
        let span = func.span.clone();
        Ok(Expr::new(
            ExprKind::Call {
                func: Box::new(func),
                args,
                kwargs,
            },
            span,
        ))
    }

    fn parse_subscript(&mut self, value: Expr) -> ParseResult<Expr> {
        self.advance(); // [
        let span = value.span.clone();
        let lower = if self.check(&Token::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };

        if !self.eat(&Token::Colon) {
            self.expect(&Token::RBracket, "']'")?;
            let index = lower.ok_or_else(|| self.error_here("expected subscript"))?;
            return Ok(Expr::new(
                ExprKind::Subscript {
                    value: Box::new(value),
                    index,
                },
                span,
            ));
        }

        let upper = if matches!(self.peek(), Token::RBracket | Token::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        if self.check(&Token::Colon) {
            return Err(self.error_here("slice steps are not supported"));
        }
        self.expect(&Token::RBracket, "']'")?;
        Ok(Expr::new(
            ExprKind::Slice {
                value: Box::new(value),
                lower,
                upper,
            },
            span,
        ))
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let kind = match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            Token::IntegerLiteral(i) => {
                self.advance();
                ExprKind::Int(i)
            }
            Token::FloatLiteral(f) => {
                self.advance();
                ExprKind::Float(f)
            }
            Token::StringLiteral(s) => {
                self.advance();
                let mut value = s;
                while let Token::StringLiteral(next) = self.peek() {
                    value.push_str(next);
                    self.advance();
                }
                ExprKind::Str(value)
            }
            Token::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            Token::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            Token::None => {
                self.advance();
                ExprKind::None
            }
            Token::LParen => return self.parse_paren(),
            Token::LBracket => return self.parse_list(),
            Token::LBrace => return self.parse_dict(),
            Token::Lambda => return Err(self.error_here("lambda expressions are not allowed")),
            Token::Reserved(word) => {
                return Err(self.error_here(&format!("'{}' is not allowed here", word)))
            }
            _ => return Err(self.unexpected()),
        };
        Ok(Expr::new(kind, span))
    }

    fn parse_paren(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        self.advance(); // (
        if self.eat(&Token::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), span));
        }
        let first = self.parse_expr()?;
        if self.check(&Token::For) {
            return Err(self.error_here("generator expressions are not supported"));
        }
        if !self.check(&Token::Comma) {
            self.expect(&Token::RParen, "')'")?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::RParen) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    fn parse_list(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        self.advance(); // [
        if self.eat(&Token::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), span));
        }
        let first = self.parse_expr()?;

        if self.eat(&Token::For) {
            let target = self.parse_target_list()?;
            self.expect(&Token::In, "'in'")?;
            let iter = self.parse_or()?;
            let mut conditions = Vec::new();
            while self.eat(&Token::If) {
                conditions.push(self.parse_or()?);
            }
            if self.check(&Token::For) {
                return Err(self.error_here("nested comprehension clauses are not supported"));
            }
            self.expect(&Token::RBracket, "']'")?;
            return Ok(Expr::new(
                ExprKind::ListComp {
                    element: Box::new(first),
                    target: Box::new(target),
                    iter: Box::new(iter),
                    conditions,
                },
                span,
            ));
        }

        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::RBracket) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        self.expect(&Token::RBracket, "']'")?;
        Ok(Expr::new(ExprKind::List(items), span))
    }

    fn parse_dict(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        self.advance(); // {
        let mut pairs = Vec::new();
        while !self.check(&Token::RBrace) {
            let key = self.parse_expr()?;
            if !self.check(&Token::Colon) {
                return Err(self.error_here("set displays are not supported"));
            }
            self.advance();
            let value = self.parse_expr()?;
            if self.check(&Token::For) {
                return Err(self.error_here("dict comprehensions are not supported"));
            }
            pairs.push((key, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace, "'}'")?;
        Ok(Expr::new(ExprKind::Dict(pairs), span))
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.clone();
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn bool_op(op: BoolOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.clone();
    Expr::new(
        ExprKind::BoolOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span,
    )
}

fn starts_expression(token: &Token) -> bool {
    matches!(
        token,
        Token::Identifier(_)
            | Token::IntegerLiteral(_)
            | Token::FloatLiteral(_)
            | Token::StringLiteral(_)
            | Token::True
            | Token::False
            | Token::None
            | Token::LParen
            | Token::LBracket
            | Token::LBrace
            | Token::Minus
            | Token::Plus
            | Token::Not
            | Token::Lambda
    )
}

/// Reject assignment targets that can never be bound
fn check_target(target: &Expr) -> ParseResult<()> {
    match &target.kind {
        ExprKind::Name(_) | ExprKind::Subscript { .. } | ExprKind::Attribute { .. } => Ok(()),
        ExprKind::Tuple(items) | ExprKind::List(items) if !items.is_empty() => {
            items.iter().try_for_each(check_target)
        }
        ExprKind::Slice { .. } => Err(CompileError::syntax(
            "slice assignment is not supported",
            &target.span,
        )),
        _ => Err(CompileError::syntax(
            format!("cannot assign to {}", describe_expr(target)),
            &target.span,
        )),
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Newline => "end of line".into(),
        Token::Eof => "end of input".into(),
        Token::Indent => "indent".into(),
        Token::Dedent => "unindent".into(),
        other => format!("'{}'", other.canonical()),
    }
}

fn describe_expr(expr: &Expr) -> &'static str {
    match expr.kind {
        ExprKind::None
        | ExprKind::Bool(_)
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_) => "literal",
        ExprKind::Call { .. } => "function call",
        ExprKind::Tuple(_) => "tuple",
        ExprKind::List(_) | ExprKind::ListComp { .. } => "list",
        ExprKind::Dict(_) => "dict",
        ExprKind::Compare { .. } => "comparison",
        _ => "expression",
    }
}
