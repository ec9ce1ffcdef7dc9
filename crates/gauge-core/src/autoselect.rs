//! Day auto-selection for a workout
//!
//! Days are tried in priority order (highest first). The first day whose
//! decision code decides `True` wins and later days are never evaluated.
//! If none does, the lowest-priority day is the fallback.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::capability::{DataSource, UserId};
use crate::engine::Engine;

/// A workout day with its selection script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Day {
    pub id: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub decision_code: String,
}

/// The chosen day and how it was chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySelection<'d> {
    pub day: &'d Day,
    /// Debug text of the last evaluated script, line breaks as `<br>`
    pub debug: String,
    /// No script decided `True`; the lowest-priority day was taken
    pub fallback: bool,
    /// How many decision scripts ran
    pub evaluated: usize,
}

/// Pick the day to perform `today`. `None` only when `days` is empty.
pub fn autoselect_day<'d>(
    engine: &Engine,
    days: &'d [Day],
    store: &dyn DataSource,
    user: UserId,
    today: NaiveDate,
) -> Option<DaySelection<'d>> {
    let mut ordered: Vec<&Day> = days.iter().collect();
    // Stable: equal priorities keep their given order
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut debug = String::new();
    for (index, &day) in ordered.iter().enumerate() {
        let outcome = engine.evaluate_decision(&day.decision_code, store, user, today);
        debug = outcome.debug;
        if outcome.decision {
            tracing::debug!(day = day.id, evaluated = index + 1, "day selected");
            return Some(DaySelection {
                day,
                debug,
                fallback: false,
                evaluated: index + 1,
            });
        }
    }

    let day = *ordered.last()?;
    tracing::debug!(day = day.id, evaluated = ordered.len(), "no day decided, using fallback");
    Some(DaySelection {
        day,
        debug,
        fallback: true,
        evaluated: ordered.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn day(id: u64, priority: i64, code: &str) -> Day {
        Day {
            id,
            description: format!("Day {}", id),
            priority,
            decision_code: code.to_string(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
    }

    fn select<'d>(days: &'d [Day], store: &InMemoryStore) -> Option<DaySelection<'d>> {
        autoselect_day(&Engine::default(), days, store, UserId(1), today())
    }

    #[test]
    fn test_empty_days_yield_none() {
        assert!(select(&[], &InMemoryStore::new()).is_none());
    }

    #[test]
    fn test_highest_priority_true_wins() {
        let days = vec![
            day(1, 1, "decision = True"),
            day(2, 5, "decision = True"),
            day(3, 3, "decision = True"),
        ];
        let selection = select(&days, &InMemoryStore::new()).unwrap();
        assert_eq!(selection.day.id, 2);
        assert!(!selection.fallback);
        assert_eq!(selection.evaluated, 1);
    }

    #[test]
    fn test_fallback_is_lowest_priority() {
        let days = vec![
            day(1, 2, "print('no')"),
            day(2, 9, ""),
            day(3, 1, "x = 1 / 0"),
        ];
        let selection = select(&days, &InMemoryStore::new()).unwrap();
        assert_eq!(selection.day.id, 3);
        assert!(selection.fallback);
        assert_eq!(selection.evaluated, 3);
        assert_eq!(selection.debug, "division by zero");
    }

    #[test]
    fn test_equal_priorities_keep_order() {
        let days = vec![day(1, 0, ""), day(2, 0, "")];
        assert_eq!(select(&days, &InMemoryStore::new()).unwrap().day.id, 2);
        let days = vec![day(1, 0, "decision = True"), day(2, 0, "decision = True")];
        assert_eq!(select(&days, &InMemoryStore::new()).unwrap().day.id, 1);
    }

    #[test]
    fn test_later_days_are_not_evaluated() {
        let store = InMemoryStore::new().with_weight(UserId(1), today(), 80.0);
        let days = vec![
            day(1, 10, "decision = True"),
            day(2, 1, "decision = get_weight_by_date(today) > 0"),
        ];
        let selection = select(&days, &store).unwrap();
        assert_eq!(selection.day.id, 1);
        assert_eq!(store.lookup_count(), 0);
    }

    #[test]
    fn test_debug_comes_from_selected_day() {
        let days = vec![
            day(1, 2, "print('first')"),
            day(2, 1, "print('second')\ndecision = True"),
        ];
        let selection = select(&days, &InMemoryStore::new()).unwrap();
        assert_eq!(selection.day.id, 2);
        assert_eq!(selection.debug, "second<br>");
    }

    #[test]
    fn test_days_from_json() {
        let days: Vec<Day> = serde_json::from_str(
            r#"[{"id": 4, "priority": 2, "decision_code": "decision = True"}, {"id": 5}]"#,
        )
        .unwrap();
        assert_eq!(days[1].priority, 0);
        assert_eq!(select(&days, &InMemoryStore::new()).unwrap().day.id, 4);
    }
}
