//! Engine facade — compile, execute and shape in one call
//!
//! Evaluation methods never return script failures as errors: a compile
//! error or runtime fault becomes a value (`(false, message)` or an error
//! payload). The engine holds only configuration, so one instance can be
//! shared across request threads.

use chrono::NaiveDate;

use crate::capability::{CategoryId, DataSource, UserId};
use crate::compiler::{compile, CompiledUnit, Mode};
use crate::config::EngineConfig;
use crate::error::CompileError;
use crate::executor::{ExecutionContext, Sandbox};
use crate::shaper::{shape_decision, shape_results, DecisionOutcome, ResultsPayload};

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
    sandbox: Sandbox,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let sandbox = Sandbox::new(config.limits.clone());
        Engine { config, sandbox }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile without running
    pub fn check(&self, source: &str, mode: Mode) -> Result<CompiledUnit, CompileError> {
        compile(source, mode)
    }

    /// Run a day's decision code for `user` as of `today`
    pub fn evaluate_decision(
        &self,
        code: &str,
        store: &dyn DataSource,
        user: UserId,
        today: NaiveDate,
    ) -> DecisionOutcome {
        let unit = match compile(code, Mode::Decision) {
            Ok(unit) => unit,
            Err(err) => return DecisionOutcome::from_compile_error(&err),
        };
        let ctx = ExecutionContext::decision(store, user, today);
        match self.sandbox.execute(unit, ctx) {
            Ok(execution) => shape_decision(&execution),
            Err(err) => DecisionOutcome::faulted(&err.to_string()),
        }
    }

    /// Run a category's code and shape its rows
    pub fn compute_results(
        &self,
        code: &str,
        category: CategoryId,
        store: &dyn DataSource,
        user: UserId,
    ) -> ResultsPayload {
        let unit = match compile(code, Mode::Results) {
            Ok(unit) => unit,
            Err(err) => return ResultsPayload::from_compile_error(&err),
        };
        let ctx = ExecutionContext::results(store, user);
        match self.sandbox.execute(unit, ctx) {
            Ok(execution) => shape_results(&execution, category),
            Err(err) => ResultsPayload::faulted(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionLimits;
    use crate::store::InMemoryStore;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
    }

    fn store() -> InMemoryStore {
        InMemoryStore::new()
            .with_category(UserId(1), CategoryId(3), "Waist", "cm")
            .with_measurement(UserId(1), CategoryId(3), today(), 81.0)
            .with_weight(UserId(1), today(), 84.5)
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_empty_source_is_neutral() {
        let engine = Engine::default();
        let store = store();
        assert_eq!(
            engine.evaluate_decision("", &store, UserId(1), today()).into_tuple(),
            (false, String::new())
        );
        let payload = engine.compute_results("", CategoryId(3), &store, UserId(1));
        assert!(!payload.is_error());
        assert!(payload.rows().is_empty());
    }

    #[test]
    fn test_compile_error_becomes_decision_false() {
        let engine = Engine::default();
        let outcome = engine.evaluate_decision("import os", &store(), UserId(1), today());
        assert!(!outcome.decision);
        assert!(outcome.debug.contains("import of 'os' is not allowed"));
    }

    #[test]
    fn test_compile_error_becomes_error_payload() {
        let engine = Engine::default();
        let payload = engine.compute_results("x = (", CategoryId(3), &store(), UserId(1));
        assert!(payload.is_error());
        assert!(payload.rows().is_empty());
    }

    #[test]
    fn test_rejected_script_never_touches_store() {
        let engine = Engine::default();
        let store = store();
        engine.evaluate_decision(
            "w = get_weight_by_date(today)\nx = eval('1')\n",
            &store,
            UserId(1),
            today(),
        );
        assert_eq!(store.lookup_count(), 0);
    }

    #[test]
    fn test_decision_end_to_end() {
        let engine = Engine::default();
        let code = "waist = get_measurement_by_name_and_date('Waist', today)\nprint('waist', waist)\ndecision = waist is not None and waist > 80\n";
        let outcome = engine.evaluate_decision(code, &store(), UserId(1), today());
        assert_eq!(outcome.into_tuple(), (true, "waist 81.0<br>".to_string()));
    }

    #[test]
    fn test_other_user_sees_nothing() {
        let engine = Engine::default();
        let code = "decision = get_weight_by_date(today) is not None";
        assert!(engine.evaluate_decision(code, &store(), UserId(1), today()).decision);
        assert!(!engine.evaluate_decision(code, &store(), UserId(2), today()).decision);
    }

    #[test]
    fn test_results_end_to_end() {
        let engine = Engine::default();
        let code = "for m in get_measurements_by_category_name('Waist'):\n    results.append({'date': m.date, 'value': m.value * 2})\n";
        let payload = engine.compute_results(code, CategoryId(3), &store(), UserId(1));
        assert_eq!(
            serde_json::to_value(&payload.results).unwrap(),
            serde_json::json!([{"date": "2024-03-08", "value": 162.0, "category": 3, "id": 1}])
        );
    }

    #[test]
    fn test_configured_limits_apply() {
        let engine = Engine::new(EngineConfig::with_limits(
            ExecutionLimits::default().with_max_steps(50),
        ));
        let outcome = engine.evaluate_decision("while True:\n    pass\n", &store(), UserId(1), today());
        assert_eq!(outcome.into_tuple(), (false, "step limit of 50 exceeded".to_string()));
    }

    #[test]
    fn test_determinism_100_iterations() {
        let engine = Engine::default();
        let store = store();
        let code = "for m in get_measurements_by_category_name('Waist'):\n    results.append({'v': round(m.value / 3, 2)})\nprint(results)\n";
        let first = engine.compute_results(code, CategoryId(3), &store, UserId(1));
        for _ in 0..100 {
            assert_eq!(engine.compute_results(code, CategoryId(3), &store, UserId(1)), first);
        }
    }
}
