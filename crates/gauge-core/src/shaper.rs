//! Result shapers — turn an [`Execution`] into the value a caller receives
//!
//! Decision mode yields a [`DecisionOutcome`]; results mode yields a
//! [`ResultsPayload`] with the same shape as the measurement listing
//! response, so a client cannot tell scripted rows from stored ones.

use serde::{Deserialize, Serialize};

use crate::capability::CategoryId;
use crate::compiler::Mode;
use crate::error::CompileError;
use crate::executor::Execution;
use crate::value::Value;

/// Debug text line breaks are rendered for HTML display
pub const LINE_BREAK_MARKER: &str = "<br>";

/// `count` of a scripted payload; scripted rows are not paginated
pub const SCRIPTED_RESULTS_COUNT: u64 = 0;

/// One result row
pub type Row = serde_json::Map<String, serde_json::Value>;

// ── Decision ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub decision: bool,
    /// Printed output (or the failure message), `\n` replaced by `<br>`
    pub debug: String,
}

impl DecisionOutcome {
    /// A failed evaluation: never selects the day
    pub fn faulted(message: &str) -> Self {
        DecisionOutcome {
            decision: false,
            debug: message.replace('\n', LINE_BREAK_MARKER),
        }
    }

    pub fn from_compile_error(err: &CompileError) -> Self {
        Self::faulted(&err.message)
    }

    pub fn into_tuple(self) -> (bool, String) {
        (self.decision, self.debug)
    }
}

/// `decision` is true only when the script left it bound to `True`
pub fn shape_decision(execution: &Execution) -> DecisionOutcome {
    debug_assert_eq!(execution.mode(), Mode::Decision);
    if let Some(fault) = execution.fault() {
        return DecisionOutcome::faulted(&fault.message);
    }
    let decision = matches!(execution.get("decision"), Some(Value::Bool(true)));
    DecisionOutcome {
        decision,
        debug: execution.output().replace('\n', LINE_BREAK_MARKER),
    }
}

// ── Results ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsPayload {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<Row>,
    /// Printed output; `None` unless the script references `print`
    pub print: Option<String>,
    /// Present only when the script failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultsPayload {
    /// The error shape: no rows, just the message
    pub fn faulted(message: impl Into<String>) -> Self {
        ResultsPayload {
            count: SCRIPTED_RESULTS_COUNT,
            next: None,
            previous: None,
            results: Vec::new(),
            print: None,
            error: Some(message.into()),
        }
    }

    pub fn from_compile_error(err: &CompileError) -> Self {
        Self::faulted(err.message.clone())
    }

    pub fn rows(&self) -> &[Row] {
        &self.results
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Convert the script's `results` into rows.
///
/// Each row gets `category` (the invocation's category) and `id` (its
/// 1-based position), overriding whatever the script put there. A
/// non-list `results` produces no rows; a row that is not a dict, or a
/// value with no JSON form, turns the whole payload into an error. Output
/// printed before a failure is kept. Conversion is charged to the run's
/// budget, so rows that share subtrees cannot expand without bound.
pub fn shape_results(execution: &Execution, category: CategoryId) -> ResultsPayload {
    debug_assert_eq!(execution.mode(), Mode::Results);
    let print = execution.uses_print().then(|| execution.output().to_string());
    let failed = |message: String| ResultsPayload {
        print: print.clone(),
        ..ResultsPayload::faulted(message)
    };
    if let Some(fault) = execution.fault() {
        return failed(fault.message.clone());
    }

    let items = match execution.get("results") {
        Some(Value::List(items)) => items.borrow().clone(),
        _ => Vec::new(),
    };

    let mut rows = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if !matches!(item, Value::Dict(_)) {
            return failed(format!(
                "'{}' object does not support item assignment",
                item.type_name()
            ));
        }
        let mut row = match item.to_json(execution.budget()) {
            Ok(serde_json::Value::Object(row)) => row,
            Ok(_) => Row::new(),
            Err(fault) => return failed(fault.message),
        };
        row.insert("category".into(), serde_json::json!(category.0));
        row.insert("id".into(), serde_json::json!(i + 1));
        rows.push(row);
    }

    ResultsPayload {
        count: SCRIPTED_RESULTS_COUNT,
        next: None,
        previous: None,
        results: rows,
        print,
        error: None,
    }
}
