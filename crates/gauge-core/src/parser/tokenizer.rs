//! Gauge tokenizer — converts script text into a token stream
//!
//! Handles: keywords, identifiers, string literals (single, double and
//! triple quoted), integer/float literals, operators, and the layout tokens
//! NEWLINE / INDENT / DEDENT derived from leading whitespace.
//! Comments (#) are discarded. Newlines inside brackets are ignored and a
//! trailing backslash joins physical lines.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Every error carries line:column

use crate::error::CompileError;

/// Tab stops for indentation measurement
const TAB_WIDTH: usize = 8;

/// Token types for Gauge script syntax
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    False,
    None,
    True,
    And,
    As,
    Break,
    Continue,
    Def,
    Elif,
    Else,
    Except,
    For,
    From,
    If,
    Import,
    In,
    Is,
    Lambda,
    Not,
    Or,
    Pass,
    Return,
    Try,
    While,
    /// Keywords that only exist to be rejected (class, global, yield, ...)
    Reserved(String),

    // Literals
    StringLiteral(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),

    // Operators
    Plus,          // +
    Minus,         // -
    Star,          // *
    DoubleStar,    // **
    Slash,         // /
    DoubleSlash,   // //
    Percent,       // %
    EqEq,          // ==
    NotEq,         // !=
    Less,          // <
    LessEq,        // <=
    Greater,       // >
    GreaterEq,     // >=
    Assign,        // =
    PlusAssign,    // +=
    MinusAssign,   // -=
    StarAssign,    // *=
    SlashAssign,   // /=
    DoubleSlashAssign, // //=
    PercentAssign, // %=

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Semicolon,
    At,

    // Layout
    Newline,
    Indent,
    Dedent,

    // Other
    Identifier(String),
    Eof,
}

impl Token {
    /// Canonical text of the token, used for fingerprints and messages
    pub fn canonical(&self) -> String {
        match self {
            Token::False => "False".into(),
            Token::None => "None".into(),
            Token::True => "True".into(),
            Token::And => "and".into(),
            Token::As => "as".into(),
            Token::Break => "break".into(),
            Token::Continue => "continue".into(),
            Token::Def => "def".into(),
            Token::Elif => "elif".into(),
            Token::Else => "else".into(),
            Token::Except => "except".into(),
            Token::For => "for".into(),
            Token::From => "from".into(),
            Token::If => "if".into(),
            Token::Import => "import".into(),
            Token::In => "in".into(),
            Token::Is => "is".into(),
            Token::Lambda => "lambda".into(),
            Token::Not => "not".into(),
            Token::Or => "or".into(),
            Token::Pass => "pass".into(),
            Token::Return => "return".into(),
            Token::Try => "try".into(),
            Token::While => "while".into(),
            Token::Reserved(word) => word.clone(),
            Token::StringLiteral(s) => format!("{:?}", s),
            Token::IntegerLiteral(i) => i.to_string(),
            Token::FloatLiteral(f) => format!("{:?}", f),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::DoubleStar => "**".into(),
            Token::Slash => "/".into(),
            Token::DoubleSlash => "//".into(),
            Token::Percent => "%".into(),
            Token::EqEq => "==".into(),
            Token::NotEq => "!=".into(),
            Token::Less => "<".into(),
            Token::LessEq => "<=".into(),
            Token::Greater => ">".into(),
            Token::GreaterEq => ">=".into(),
            Token::Assign => "=".into(),
            Token::PlusAssign => "+=".into(),
            Token::MinusAssign => "-=".into(),
            Token::StarAssign => "*=".into(),
            Token::SlashAssign => "/=".into(),
            Token::DoubleSlashAssign => "//=".into(),
            Token::PercentAssign => "%=".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::LBracket => "[".into(),
            Token::RBracket => "]".into(),
            Token::LBrace => "{".into(),
            Token::RBrace => "}".into(),
            Token::Comma => ",".into(),
            Token::Colon => ":".into(),
            Token::Dot => ".".into(),
            Token::Semicolon => ";".into(),
            Token::At => "@".into(),
            Token::Newline => "NEWLINE".into(),
            Token::Indent => "INDENT".into(),
            Token::Dedent => "DEDENT".into(),
            Token::Identifier(name) => name.clone(),
            Token::Eof => "EOF".into(),
        }
    }
}

/// Position in source text for error reporting
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token with source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenizer for Gauge script text
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    indents: Vec<usize>,
    bracket_depth: usize,
    at_line_start: bool,
}

impl Tokenizer {
    /// Create a new tokenizer for the given input text
    pub fn new(text: &str) -> Self {
        Tokenizer {
            input: text.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            indents: vec![0],
            bracket_depth: 0,
            at_line_start: true,
        }
    }

    /// Tokenize the entire input into a stream of spanned tokens
    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, CompileError> {
        let mut tokens: Vec<SpannedToken> = Vec::new();

        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                if !self.read_indentation(&mut tokens)? {
                    break;
                }
            }

            self.skip_inline_whitespace()?;

            if self.is_at_end() {
                break;
            }

            if self.peek() == Some('\n') {
                let span = self.current_span();
                self.advance();
                if self.bracket_depth == 0 {
                    tokens.push(SpannedToken { token: Token::Newline, span });
                    self.at_line_start = true;
                }
                continue;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        let span = self.current_span();
        if self.bracket_depth > 0 {
            return Err(CompileError::syntax("unexpected end of input inside brackets", &span));
        }
        if let Some(last) = tokens.last() {
            if !matches!(last.token, Token::Newline | Token::Dedent) {
                tokens.push(SpannedToken { token: Token::Newline, span: span.clone() });
            }
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            tokens.push(SpannedToken { token: Token::Dedent, span: span.clone() });
        }
        tokens.push(SpannedToken { token: Token::Eof, span });

        Ok(tokens)
    }

    // ── Character helpers ──────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied();
        if let Some(c) = ch {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    // ── Layout ─────────────────────────────────────────────

    /// Measure the indentation of the next non-blank line and emit
    /// INDENT/DEDENT tokens. Returns false at end of input.
    fn read_indentation(&mut self, tokens: &mut Vec<SpannedToken>) -> Result<bool, CompileError> {
        loop {
            let mut width = 0;
            while let Some(ch) = self.peek() {
                match ch {
                    ' ' => width += 1,
                    '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                    '\r' | '\x0c' => {}
                    _ => break,
                }
                self.advance();
            }

            match self.peek() {
                None => return Ok(false),
                Some('\n') => {
                    self.advance();
                    continue;
                }
                Some('#') => {
                    self.skip_comment();
                    continue;
                }
                Some(_) => {}
            }

            let span = self.current_span();
            let current = *self.indents.last().unwrap_or(&0);
            if width > current {
                self.indents.push(width);
                tokens.push(SpannedToken { token: Token::Indent, span });
            } else {
                while width < *self.indents.last().unwrap_or(&0) {
                    self.indents.pop();
                    tokens.push(SpannedToken { token: Token::Dedent, span: span.clone() });
                }
                if width != *self.indents.last().unwrap_or(&0) {
                    return Err(CompileError::syntax(
                        "unindent does not match any outer indentation level",
                        &span,
                    ));
                }
            }
            self.at_line_start = false;
            return Ok(true);
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Skip spaces, tabs, comments and backslash continuations (not newlines)
    fn skip_inline_whitespace(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\x0c') => {
                    self.advance();
                }
                Some('\n') if self.bracket_depth > 0 => {
                    self.advance();
                }
                Some('#') => self.skip_comment(),
                Some('\\') => {
                    let span = self.current_span();
                    let next = match self.peek_ahead(1) {
                        Some('\r') => self.peek_ahead(2),
                        other => other,
                    };
                    if next != Some('\n') {
                        return Err(CompileError::syntax(
                            "unexpected character after line continuation character",
                            &span,
                        ));
                    }
                    while self.peek() != Some('\n') {
                        self.advance();
                    }
                    self.advance();
                }
                _ => return Ok(()),
            }
        }
    }

    // ── Main dispatch ──────────────────────────────────────

    fn next_token(&mut self) -> Result<SpannedToken, CompileError> {
        let span = self.current_span();
        let ch = match self.peek() {
            Some(c) => c,
            None => return Err(CompileError::syntax("unexpected end of input", &span)),
        };

        let token = match ch {
            '"' | '\'' => return self.read_string(span),
            c if c.is_ascii_digit() => return self.read_number(span),
            '.' if self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit()) => {
                return self.read_number(span)
            }
            c if c.is_alphabetic() || c == '_' => return self.read_identifier_or_keyword(span),
            '(' | '[' | '{' => {
                self.bracket_depth += 1;
                self.advance();
                match ch {
                    '(' => Token::LParen,
                    '[' => Token::LBracket,
                    _ => Token::LBrace,
                }
            }
            ')' | ']' | '}' => {
                if self.bracket_depth == 0 {
                    return Err(CompileError::syntax(format!("unmatched '{}'", ch), &span));
                }
                self.bracket_depth -= 1;
                self.advance();
                match ch {
                    ')' => Token::RParen,
                    ']' => Token::RBracket,
                    _ => Token::RBrace,
                }
            }
            ',' => { self.advance(); Token::Comma }
            ':' => { self.advance(); Token::Colon }
            '.' => { self.advance(); Token::Dot }
            ';' => { self.advance(); Token::Semicolon }
            '@' => { self.advance(); Token::At }
            '+' => self.operator(Token::Plus, Token::PlusAssign),
            '-' => self.operator(Token::Minus, Token::MinusAssign),
            '%' => self.operator(Token::Percent, Token::PercentAssign),
            '*' => {
                self.advance();
                if self.peek() == Some('*') {
                    self.advance();
                    Token::DoubleStar
                } else if self.peek() == Some('=') {
                    self.advance();
                    Token::StarAssign
                } else {
                    Token::Star
                }
            }
            '/' => {
                self.advance();
                if self.peek() == Some('/') {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        Token::DoubleSlashAssign
                    } else {
                        Token::DoubleSlash
                    }
                } else if self.peek() == Some('=') {
                    self.advance();
                    Token::SlashAssign
                } else {
                    Token::Slash
                }
            }
            '=' => self.operator(Token::Assign, Token::EqEq),
            '<' => self.operator(Token::Less, Token::LessEq),
            '>' => self.operator(Token::Greater, Token::GreaterEq),
            '!' => {
                if self.peek_ahead(1) == Some('=') {
                    self.advance();
                    self.advance();
                    Token::NotEq
                } else {
                    return Err(CompileError::syntax("unexpected character '!'", &span));
                }
            }
            _ => {
                return Err(CompileError::syntax(
                    format!("unexpected character '{}'", ch),
                    &span,
                ))
            }
        };

        Ok(SpannedToken { token, span })
    }

    /// One-character operator, or its `=`-suffixed form
    fn operator(&mut self, plain: Token, with_equals: Token) -> Token {
        self.advance();
        if self.peek() == Some('=') {
            self.advance();
            with_equals
        } else {
            plain
        }
    }

    // ── String literals ────────────────────────────────────

    fn read_string(&mut self, span: Span) -> Result<SpannedToken, CompileError> {
        let quote = self.advance().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_ahead(1) == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }
        let mut value = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(CompileError::syntax("unterminated string literal", &span));
                }
                Some('\n') if !triple => {
                    return Err(CompileError::syntax("unterminated string literal", &span));
                }
                Some(c) if c == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek_ahead(1) == Some(quote) {
                        self.advance();
                        self.advance();
                        break;
                    }
                    value.push(c);
                }
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('\\') => value.push('\\'),
                    Some('\'') => value.push('\''),
                    Some('"') => value.push('"'),
                    Some('\n') => {}
                    Some(c) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => {
                        return Err(CompileError::syntax("unterminated string literal", &span));
                    }
                },
                Some(c) => value.push(c),
            }
        }

        Ok(SpannedToken {
            token: Token::StringLiteral(value),
            span,
        })
    }

    // ── Numbers ────────────────────────────────────────────

    fn read_number(&mut self, span: Span) -> Result<SpannedToken, CompileError> {
        let mut text = String::new();
        let mut is_float = false;

        self.read_digits(&mut text);

        if self.peek() == Some('.')
            && !self.peek_ahead(1).is_some_and(|c| c.is_alphabetic() || c == '_')
        {
            is_float = true;
            text.push('.');
            self.advance();
            self.read_digits(&mut text);
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = self.peek_ahead(1);
            let digit_at = if matches!(sign, Some('+') | Some('-')) { 2 } else { 1 };
            if self.peek_ahead(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.advance();
                if digit_at == 2 {
                    if let Some(s) = self.advance() {
                        text.push(s);
                    }
                }
                self.read_digits(&mut text);
            }
        }

        if self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            return Err(CompileError::syntax("invalid decimal literal", &span));
        }

        if is_float {
            let val: f64 = text.parse().map_err(|_| {
                CompileError::syntax(format!("invalid float literal '{}'", text), &span)
            })?;
            Ok(SpannedToken {
                token: Token::FloatLiteral(val),
                span,
            })
        } else {
            let val: i64 = text.parse().map_err(|_| {
                CompileError::syntax(format!("integer literal '{}' is too large", text), &span)
            })?;
            Ok(SpannedToken {
                token: Token::IntegerLiteral(val),
                span,
            })
        }
    }

    fn read_digits(&mut self, text: &mut String) {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else if ch == '_' && self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            } else {
                break;
            }
        }
    }

    // ── Identifiers & Keywords ─────────────────────────────

    fn read_identifier_or_keyword(&mut self, span: Span) -> Result<SpannedToken, CompileError> {
        let start = self.position;

        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        if matches!(self.peek(), Some('"') | Some('\''))
            && matches!(
                text.to_ascii_lowercase().as_str(),
                "r" | "f" | "b" | "u" | "rb" | "br" | "fr" | "rf"
            )
        {
            return Err(CompileError::syntax(
                format!("string prefix '{}' is not supported", text),
                &span,
            ));
        }

        let token = match text.as_str() {
            "False" => Token::False,
            "None" => Token::None,
            "True" => Token::True,
            "and" => Token::And,
            "as" => Token::As,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "def" => Token::Def,
            "elif" => Token::Elif,
            "else" => Token::Else,
            "except" => Token::Except,
            "for" => Token::For,
            "from" => Token::From,
            "if" => Token::If,
            "import" => Token::Import,
            "in" => Token::In,
            "is" => Token::Is,
            "lambda" => Token::Lambda,
            "not" => Token::Not,
            "or" => Token::Or,
            "pass" => Token::Pass,
            "return" => Token::Return,
            "try" => Token::Try,
            "while" => Token::While,
            "assert" | "async" | "await" | "class" | "del" | "finally" | "global"
            | "nonlocal" | "raise" | "with" | "yield" => Token::Reserved(text),
            _ => Token::Identifier(text),
        };

        Ok(SpannedToken { token, span })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        Tokenizer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|st| st.token)
            .collect()
    }

    fn tokenize_err(input: &str) -> String {
        Tokenizer::new(input)
            .tokenize()
            .unwrap_err()
            .to_string()
    }

    fn ident(name: &str) -> Token {
        Token::Identifier(name.into())
    }

    #[test]
    fn test_tokenize_simple_assignment() {
        assert_eq!(
            tokenize("decision = True"),
            vec![ident("decision"), Token::Assign, Token::True, Token::Newline, Token::Eof]
        );
    }

    #[test]
    fn test_tokenize_keywords_and_reserved() {
        let tokens = tokenize("if x is not None and y in z: pass");
        assert_eq!(
            tokens,
            vec![
                Token::If,
                ident("x"),
                Token::Is,
                Token::Not,
                Token::None,
                Token::And,
                ident("y"),
                Token::In,
                ident("z"),
                Token::Colon,
                Token::Pass,
                Token::Newline,
                Token::Eof,
            ]
        );
        assert_eq!(tokenize("class")[0], Token::Reserved("class".into()));
        assert_eq!(tokenize("yield")[0], Token::Reserved("yield".into()));
    }

    #[test]
    fn test_tokenize_indentation() {
        let tokens = tokenize("if a:\n    b = 1\n    c = 2\nd = 3\n");
        assert_eq!(
            tokens,
            vec![
                Token::If,
                ident("a"),
                Token::Colon,
                Token::Newline,
                Token::Indent,
                ident("b"),
                Token::Assign,
                Token::IntegerLiteral(1),
                Token::Newline,
                ident("c"),
                Token::Assign,
                Token::IntegerLiteral(2),
                Token::Newline,
                Token::Dedent,
                ident("d"),
                Token::Assign,
                Token::IntegerLiteral(3),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_dedent_at_end_of_input() {
        let tokens = tokenize("while x:\n  if y:\n    z = 1");
        let dedents = tokens.iter().filter(|t| **t == Token::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(tokens.last(), Some(&Token::Eof));
    }

    #[test]
    fn test_inconsistent_dedent() {
        let err = tokenize_err("if a:\n    b = 1\n  c = 2\n");
        assert!(err.contains("unindent does not match"), "{}", err);
        assert!(err.contains("3:3"), "{}", err);
    }

    #[test]
    fn test_blank_lines_and_comments_are_ignored() {
        let tokens = tokenize("# header\n\nx = 1  # trailing\n\n   # indented comment\ny = 2\n");
        assert_eq!(
            tokens,
            vec![
                ident("x"),
                Token::Assign,
                Token::IntegerLiteral(1),
                Token::Newline,
                ident("y"),
                Token::Assign,
                Token::IntegerLiteral(2),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_joined() {
        let tokens = tokenize("x = [1,\n     2]\n");
        assert_eq!(
            tokens,
            vec![
                ident("x"),
                Token::Assign,
                Token::LBracket,
                Token::IntegerLiteral(1),
                Token::Comma,
                Token::IntegerLiteral(2),
                Token::RBracket,
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_backslash_continuation() {
        let tokens = tokenize("x = 1 + \\\n    2\n");
        assert_eq!(
            tokens,
            vec![
                ident("x"),
                Token::Assign,
                Token::IntegerLiteral(1),
                Token::Plus,
                Token::IntegerLiteral(2),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_strings() {
        assert_eq!(tokenize("'abc'")[0], Token::StringLiteral("abc".into()));
        assert_eq!(tokenize("\"a\\nb\"")[0], Token::StringLiteral("a\nb".into()));
        assert_eq!(tokenize("'it\\'s'")[0], Token::StringLiteral("it's".into()));
        assert_eq!(tokenize("\"\"")[0], Token::StringLiteral(String::new()));
        assert_eq!(
            tokenize("\"\"\"two\nlines\"\"\"")[0],
            Token::StringLiteral("two\nlines".into())
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize_err("'abc").contains("unterminated string literal"));
        assert!(tokenize_err("'abc\n'").contains("unterminated string literal"));
    }

    #[test]
    fn test_string_prefix_rejected() {
        let err = tokenize_err("x = f'{y}'");
        assert!(err.contains("string prefix 'f' is not supported"), "{}", err);
    }

    #[test]
    fn test_tokenize_numbers() {
        assert_eq!(tokenize("42")[0], Token::IntegerLiteral(42));
        assert_eq!(tokenize("1_000")[0], Token::IntegerLiteral(1000));
        assert_eq!(tokenize("2.5")[0], Token::FloatLiteral(2.5));
        assert_eq!(tokenize(".5")[0], Token::FloatLiteral(0.5));
        assert_eq!(tokenize("1e3")[0], Token::FloatLiteral(1000.0));
        assert_eq!(tokenize("2.")[0], Token::FloatLiteral(2.0));
    }

    #[test]
    fn test_integer_too_large() {
        assert!(tokenize_err("99999999999999999999").contains("too large"));
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("a ** b // c != d <= e >= f == g += 1");
        assert!(tokens.contains(&Token::DoubleStar));
        assert!(tokens.contains(&Token::DoubleSlash));
        assert!(tokens.contains(&Token::NotEq));
        assert!(tokens.contains(&Token::LessEq));
        assert!(tokens.contains(&Token::GreaterEq));
        assert!(tokens.contains(&Token::EqEq));
        assert!(tokens.contains(&Token::PlusAssign));
    }

    #[test]
    fn test_unmatched_bracket() {
        assert!(tokenize_err("x = 1)").contains("unmatched ')'"));
        assert!(tokenize_err("x = (1").contains("inside brackets"));
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize_err("x = $");
        assert!(err.contains("unexpected character '$'"), "{}", err);
    }

    #[test]
    fn test_span_tracking() {
        let tokens = Tokenizer::new("a = 1\nbb = 2").tokenize().unwrap();
        let bb = tokens
            .iter()
            .find(|t| t.token == ident("bb"))
            .unwrap();
        assert_eq!(bb.span.line, 2);
        assert_eq!(bb.span.column, 1);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(tokenize(""), vec![Token::Eof]);
        assert_eq!(tokenize("   \n\n  # only comment\n"), vec![Token::Eof]);
    }

    #[test]
    fn test_tokenize_determinism_100_iterations() {
        let input = "for m in get_measurements_by_category_name('Biceps'):\n    results.append({'value': m.value})\n";
        let first = tokenize(input);
        for i in 0..100 {
            assert_eq!(first, tokenize(input), "Non-determinism at iteration {}", i);
        }
    }
}
