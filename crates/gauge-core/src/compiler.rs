//! Restricted compiler — turns script text into a [`CompiledUnit`]
//!
//! Pipeline: tokenize → fingerprint → parse → verify. The compiler is
//! stateless and side-effect free; compiling the same text twice yields
//! identical fingerprints and equal programs.

use sha2::{Digest, Sha256};

use crate::builtins::Builtin;
use crate::capability::CapabilityFn;
use crate::error::CompileError;
use crate::parser::ast::Program;
use crate::parser::tokenizer::{SpannedToken, Tokenizer};
use crate::parser::Parser;
use crate::verifier::{self, Diagnostic};

/// Which kind of outcome a script produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Boolean workout-day selection (`decision`)
    Decision,
    /// Derived measurement rows (`results`)
    Results,
}

impl Mode {
    /// Name of the variable the script must leave its outcome in
    pub fn output_variable(self) -> &'static str {
        match self {
            Mode::Decision => "decision",
            Mode::Results => "results",
        }
    }

    /// Whether `name` is available to a script before it runs
    pub fn defines(self, name: &str) -> bool {
        let seeded = match self {
            Mode::Decision => matches!(name, "decision" | "today"),
            Mode::Results => name == "results",
        };
        seeded || Builtin::lookup(name).is_some() || CapabilityFn::lookup(name).is_some()
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Mode::Decision => write!(f, "decision"),
            Mode::Results => write!(f, "results"),
        }
    }
}

/// A verified, executable script.
///
/// Only [`compile`] constructs one. Units are consumed by value when
/// executed and cannot be cloned, so one compilation backs one run.
#[derive(Debug)]
pub struct CompiledUnit {
    mode: Mode,
    program: Program,
    fingerprint: String,
    warnings: Vec<Diagnostic>,
    uses_print: bool,
}

impl CompiledUnit {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// SHA-256 over the canonical token stream, hex encoded
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// Whether the script references `print` anywhere
    pub fn uses_print(&self) -> bool {
        self.uses_print
    }

    pub(crate) fn program(&self) -> &Program {
        &self.program
    }
}

/// Compile script text for `mode`.
///
/// # Errors
/// Returns `CompileError` for syntax errors and policy violations. The
/// message is the first error; every diagnostic is attached.
pub fn compile(source: &str, mode: Mode) -> Result<CompiledUnit, CompileError> {
    let tokens = Tokenizer::new(source).tokenize().map_err(|e| {
        tracing::warn!(%mode, error = %e, "script failed to tokenize");
        e
    })?;
    let fingerprint = fingerprint_tokens(&tokens);

    let program = Parser::new(tokens).parse_program().map_err(|e| {
        tracing::warn!(%mode, %fingerprint, error = %e, "script failed to parse");
        e
    })?;

    let verification = verifier::verify(&program, mode);
    if !verification.is_valid() {
        let message = verification
            .errors()
            .first()
            .map(|d| match d.span {
                Some(ref span) => format!("{} at {}", d.message, span),
                None => d.message.clone(),
            })
            .unwrap_or_default();
        tracing::warn!(
            %mode,
            %fingerprint,
            errors = verification.errors().len(),
            "script rejected by policy"
        );
        return Err(CompileError {
            message,
            diagnostics: verification.diagnostics,
        });
    }

    let uses_print = verification.referenced.contains("print");
    let warnings = verification.warnings().into_iter().cloned().collect();
    tracing::debug!(%mode, %fingerprint, uses_print, "script compiled");

    Ok(CompiledUnit {
        mode,
        program,
        fingerprint,
        warnings,
        uses_print,
    })
}

/// Fingerprint script text without verifying it
///
/// # Errors
/// Returns `CompileError` if the text does not tokenize.
pub fn fingerprint(source: &str) -> Result<String, CompileError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    Ok(fingerprint_tokens(&tokens))
}

fn fingerprint_tokens(tokens: &[SpannedToken]) -> String {
    let mut hasher = Sha256::new();
    for token in tokens {
        hasher.update(token.token.canonical().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
