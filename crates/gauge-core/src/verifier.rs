//! Script verifier — enforces the sandbox policy on a parsed program
//!
//! The verifier runs between the parser and the compiler. It accumulates all
//! diagnostics rather than stopping at the first error, so an author sees
//! every violation in one pass.
//!
//! # Verification Phases
//!
//! 1. **Policy** — no imports, no forbidden statements, no underscore names,
//!    no reflection primitives, no attribute assignment
//! 2. **Structure** — `break`/`continue` inside loops, `return` inside
//!    functions, flat function definitions, known exception classes
//! 3. **Names** — warnings for names that are read but never bound

use std::collections::BTreeSet;

use crate::compiler::Mode;
use crate::error::EXCEPTION_CLASSES;
use crate::parser::ast::*;
use crate::parser::tokenizer::Span;

/// Host primitives a script must never name, whether or not they exist
pub const REFLECTION_NAMES: &[&str] = &[
    "getattr",
    "setattr",
    "delattr",
    "eval",
    "exec",
    "compile",
    "open",
    "globals",
    "locals",
    "vars",
    "dir",
    "type",
    "__import__",
    "input",
    "breakpoint",
    "help",
    "memoryview",
    "object",
    "super",
];

// ── Verification Result Types ─────────────────────────────

/// Result of script verification — accumulates all diagnostics
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    pub diagnostics: Vec<Diagnostic>,
    /// Every name the script reads
    pub referenced: BTreeSet<String>,
}

impl VerificationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no errors were found (warnings are OK)
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    /// Returns only error-level diagnostics
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    /// Returns only warning-level diagnostics
    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect()
    }

    fn add_error(&mut self, kind: DiagnosticKind, message: String, span: &Span) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            kind,
            message,
            span: Some(span.clone()),
        });
    }

    fn add_warning(&mut self, kind: DiagnosticKind, message: String, span: &Span) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            message,
            span: Some(span.clone()),
        });
    }
}

/// A single verification diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<Span>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if let Some(ref span) = self.span {
            write!(f, "{} [{}] at {}: {}", prefix, self.kind, span, self.message)
        } else {
            write!(f, "{} [{}]: {}", prefix, self.kind, self.message)
        }
    }
}

/// Severity level for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Category of verification issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    PolicyViolation,
    StructureError,
    UndefinedName,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DiagnosticKind::PolicyViolation => write!(f, "policy"),
            DiagnosticKind::StructureError => write!(f, "structure"),
            DiagnosticKind::UndefinedName => write!(f, "name"),
        }
    }
}

// ── Public API ────────────────────────────────────────────

/// Verify a parsed program against the sandbox policy for `mode`.
///
/// Runs all verification phases and returns accumulated diagnostics.
pub fn verify(program: &Program, mode: Mode) -> VerificationResult {
    let mut result = VerificationResult::new();

    // Phases 1 and 2 share one walk
    let mut checker = StatementChecker {
        result: &mut result,
        loop_depth: 0,
        function_depth: 0,
    };
    checker.check_block(&program.body);

    // Phase 3
    verify_names(program, mode, &mut result);

    result
}

// ── Phases 1 & 2: Policy and Structure ────────────────────

struct StatementChecker<'r> {
    result: &'r mut VerificationResult,
    loop_depth: usize,
    function_depth: usize,
}

impl StatementChecker<'_> {
    fn check_block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(expr) => self.check_expr(expr),
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.check_target(target);
                }
                self.check_expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.check_target(target);
                self.check_expr(value);
            }
            StmtKind::If { test, body, orelse } => {
                self.check_expr(test);
                self.check_block(body);
                self.check_block(orelse);
            }
            StmtKind::For { target, iter, body } => {
                self.check_target(target);
                self.check_expr(iter);
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            StmtKind::While { test, body } => {
                self.check_expr(test);
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            StmtKind::FunctionDef(def) => self.check_function(def),
            StmtKind::Return(value) => {
                if self.function_depth == 0 {
                    self.result.add_error(
                        DiagnosticKind::StructureError,
                        "'return' outside function".to_string(),
                        &stmt.span,
                    );
                }
                if let Some(value) = value {
                    self.check_expr(value);
                }
            }
            StmtKind::Try { body, handlers } => {
                self.check_block(body);
                for handler in handlers {
                    if let Some(ref class) = handler.class {
                        if !EXCEPTION_CLASSES.contains(&class.as_str()) {
                            self.result.add_error(
                                DiagnosticKind::StructureError,
                                format!("unknown exception class '{}'", class),
                                &handler.span,
                            );
                        }
                    }
                    if let Some(ref binding) = handler.binding {
                        self.check_name(binding, &handler.span);
                    }
                    self.check_block(&handler.body);
                }
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    let word = if stmt.kind == StmtKind::Break { "break" } else { "continue" };
                    self.result.add_error(
                        DiagnosticKind::StructureError,
                        format!("'{}' outside loop", word),
                        &stmt.span,
                    );
                }
            }
            StmtKind::Pass => {}
            StmtKind::Import { module } => {
                self.result.add_error(
                    DiagnosticKind::PolicyViolation,
                    format!("import of '{}' is not allowed", module),
                    &stmt.span,
                );
            }
            StmtKind::Forbidden { construct } => {
                let message = if construct == "decorator" {
                    "decorators are not allowed".to_string()
                } else {
                    format!("'{}' statements are not allowed", construct)
                };
                self.result
                    .add_error(DiagnosticKind::PolicyViolation, message, &stmt.span);
            }
        }
    }

    fn check_function(&mut self, def: &FunctionDef) {
        if self.function_depth > 0 {
            self.result.add_error(
                DiagnosticKind::StructureError,
                format!("nested function '{}' is not supported", def.name),
                &def.span,
            );
        }
        self.check_name(&def.name, &def.span);

        let mut seen = BTreeSet::new();
        for param in &def.params {
            if !seen.insert(param) {
                self.result.add_error(
                    DiagnosticKind::StructureError,
                    format!("duplicate argument '{}' in function definition", param),
                    &def.span,
                );
            }
            self.check_name(param, &def.span);
        }

        let outer_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        self.check_block(&def.body);
        self.function_depth -= 1;
        self.loop_depth = outer_loops;
    }

    fn check_target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => self.check_name(name, &target.span),
            ExprKind::Attribute { value, name } => {
                self.result.add_error(
                    DiagnosticKind::PolicyViolation,
                    format!("assignment to attribute '{}' is not allowed", name),
                    &target.span,
                );
                self.check_expr(value);
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.check_target(item);
                }
            }
            _ => self.check_expr(target),
        }
    }

    fn check_name(&mut self, name: &str, span: &Span) {
        if name.starts_with('_') && name != "_" {
            self.result.add_error(
                DiagnosticKind::PolicyViolation,
                format!(
                    "\"{}\" is an invalid variable name because it starts with \"_\"",
                    name
                ),
                span,
            );
        } else if REFLECTION_NAMES.contains(&name) {
            self.result.add_error(
                DiagnosticKind::PolicyViolation,
                format!("\"{}\" is a restricted name", name),
                span,
            );
        }
    }

    fn check_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::None
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_) => {}
            ExprKind::Name(name) => self.check_name(name, &expr.span),
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for item in items {
                    self.check_expr(item);
                }
            }
            ExprKind::Dict(pairs) => {
                for (key, value) in pairs {
                    self.check_expr(key);
                    self.check_expr(value);
                }
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                conditions,
            } => {
                self.check_target(target);
                self.check_expr(iter);
                for condition in conditions {
                    self.check_expr(condition);
                }
                self.check_expr(element);
            }
            ExprKind::Attribute { value, name } => {
                if name.starts_with('_') {
                    self.result.add_error(
                        DiagnosticKind::PolicyViolation,
                        format!(
                            "\"{}\" is an invalid attribute name because it starts with \"_\"",
                            name
                        ),
                        &expr.span,
                    );
                }
                self.check_expr(value);
            }
            ExprKind::Subscript { value, index } => {
                self.check_expr(value);
                self.check_expr(index);
            }
            ExprKind::Slice { value, lower, upper } => {
                self.check_expr(value);
                if let Some(lower) = lower {
                    self.check_expr(lower);
                }
                if let Some(upper) = upper {
                    self.check_expr(upper);
                }
            }
            ExprKind::Call { func, args, kwargs } => {
                self.check_expr(func);
                for arg in args {
                    self.check_expr(arg);
                }
                for (name, value) in kwargs {
                    if name.starts_with('_') {
                        self.result.add_error(
                            DiagnosticKind::PolicyViolation,
                            format!("keyword argument \"{}\" starts with \"_\"", name),
                            &value.span,
                        );
                    }
                    self.check_expr(value);
                }
            }
            ExprKind::Unary { operand, .. } => self.check_expr(operand),
            ExprKind::Binary { left, right, .. } | ExprKind::BoolOp { left, right, .. } => {
                self.check_expr(left);
                self.check_expr(right);
            }
            ExprKind::Compare { left, ops } => {
                self.check_expr(left);
                for (_, operand) in ops {
                    self.check_expr(operand);
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.check_expr(test);
                self.check_expr(body);
                self.check_expr(orelse);
            }
        }
    }
}

// ── Phase 3: Names ────────────────────────────────────────

/// Warn about names that are read but neither bound by the script nor
/// predefined for the mode. Flow-insensitive: binding a name anywhere
/// counts as defining it.
fn verify_names(program: &Program, mode: Mode, result: &mut VerificationResult) {
    let mut names = NameCollector::default();
    names.block(&program.body);

    let mut warned = BTreeSet::new();
    for (name, span) in &names.reads {
        result.referenced.insert(name.clone());
        if names.bound.contains(name) || mode.defines(name) || !warned.insert(name.clone()) {
            continue;
        }
        result.add_warning(
            DiagnosticKind::UndefinedName,
            format!("name '{}' is not defined", name),
            span,
        );
    }
}

#[derive(Default)]
struct NameCollector {
    bound: BTreeSet<String>,
    /// Reads in source order
    reads: Vec<(String, Span)>,
}

impl NameCollector {
    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::Assign { targets, value } => {
                self.expr(value);
                for target in targets {
                    self.bind(target);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
                self.bind(target);
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test);
                self.block(body);
                self.block(orelse);
            }
            StmtKind::For { target, iter, body } => {
                self.expr(iter);
                self.bind(target);
                self.block(body);
            }
            StmtKind::While { test, body } => {
                self.expr(test);
                self.block(body);
            }
            StmtKind::FunctionDef(def) => {
                self.bound.insert(def.name.clone());
                self.bound.extend(def.params.iter().cloned());
                self.block(&def.body);
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            StmtKind::Try { body, handlers } => {
                self.block(body);
                for handler in handlers {
                    if let Some(ref binding) = handler.binding {
                        self.bound.insert(binding.clone());
                    }
                    self.block(&handler.body);
                }
            }
            StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass
            | StmtKind::Import { .. }
            | StmtKind::Forbidden { .. } => {}
        }
    }

    /// Record the names an assignment target binds; subscripts and
    /// attributes read their container instead.
    fn bind(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Name(name) => {
                self.bound.insert(name.clone());
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.bind(item);
                }
            }
            _ => self.expr(target),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::None
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_) => {}
            ExprKind::Name(name) => self.reads.push((name.clone(), expr.span.clone())),
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::Dict(pairs) => {
                for (key, value) in pairs {
                    self.expr(key);
                    self.expr(value);
                }
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                conditions,
            } => {
                self.expr(iter);
                self.bind(target);
                for condition in conditions {
                    self.expr(condition);
                }
                self.expr(element);
            }
            ExprKind::Attribute { value, .. } => self.expr(value),
            ExprKind::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            ExprKind::Slice { value, lower, upper } => {
                self.expr(value);
                for bound in [lower, upper].into_iter().flatten() {
                    self.expr(bound);
                }
            }
            ExprKind::Call { func, args, kwargs } => {
                self.expr(func);
                for arg in args {
                    self.expr(arg);
                }
                for (_, value) in kwargs {
                    self.expr(value);
                }
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { left, right, .. } | ExprKind::BoolOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Compare { left, ops } => {
                self.expr(left);
                for (_, operand) in ops {
                    self.expr(operand);
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
        }
    }
}
