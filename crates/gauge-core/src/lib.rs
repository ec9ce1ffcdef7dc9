//! Gauge Core - restricted script engine for workout and measurement rules
//!
//! Users attach small scripts to their data: a workout day carries decision
//! code ("should I train this day today?"), a measurement category carries
//! code that derives rows from stored measurements. Gauge compiles those
//! scripts under a strict policy and runs them in a budgeted sandbox that
//! can only read the invoking user's records.
//!
//! # Architecture
//!
//! ```text
//! Script Text → Tokenizer → Parser → AST → Verifier → CompiledUnit
//!                                                       ↓
//!            ExecutionContext (user, store, today) → Sandbox → Execution
//!                                                       ↓
//!                                   Shaper → DecisionOutcome | ResultsPayload
//! ```
//!
//! # Guarantees
//!
//! - **Contained**: no imports, no reflection, no underscore names; attribute
//!   access and iteration go through allowlisted wrappers
//! - **Scoped**: every data lookup is bound to one user before the script runs
//! - **Bounded**: steps, wall-clock time, value walks, allocation, call depth,
//!   sizes and output are capped; cycles a script builds are freed at teardown
//! - **Deterministic**: same script, data and date produce identical outcomes
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use gauge_core::{Engine, InMemoryStore, UserId};
//!
//! let today = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
//! let store = InMemoryStore::new().with_weight(UserId(1), today, 84.5);
//! let code = "w = get_weight_by_date(today)\nprint('weight', w)\ndecision = w is not None and w > 80\n";
//!
//! let outcome = Engine::default().evaluate_decision(code, &store, UserId(1), today);
//! assert!(outcome.decision);
//! assert_eq!(outcome.debug, "weight 84.5<br>");
//! ```

pub mod autoselect;
pub mod budget;
pub mod builtins;
pub mod capability;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod guards;
pub mod ops;
pub mod output;
pub mod parser;
pub mod shaper;
pub mod store;
pub mod value;
pub mod verifier;

pub use autoselect::{autoselect_day, Day, DaySelection};
pub use budget::Budget;
pub use capability::{
    Capabilities, Category, CategoryId, DataSource, LookupPolicy, Measurement, UserId, WeightEntry,
};
pub use compiler::{compile, fingerprint, CompiledUnit, Mode};
pub use config::{EngineConfig, ExecutionLimits};
pub use engine::Engine;
pub use error::{CompileError, Error, FaultKind, Result, RuntimeFault, StoreError};
pub use executor::{Execution, ExecutionContext, Namespace, Sandbox};
pub use shaper::{
    shape_decision, shape_results, DecisionOutcome, ResultsPayload, Row, LINE_BREAK_MARKER,
    SCRIPTED_RESULTS_COUNT,
};
pub use store::InMemoryStore;
pub use value::Value;
pub use verifier::{Diagnostic, DiagnosticKind, Severity, VerificationResult};
