//! In-memory reference implementation of [`DataSource`]
//!
//! Used by the CLI (loaded from a JSON data file) and by tests. The JSON
//! layout groups records by owner:
//!
//! ```json
//! { "users": [ { "id": 1,
//!                "categories":   [ { "id": 7, "name": "Biceps", "unit": "cm" } ],
//!                "measurements": [ { "id": 1, "category": 7, "date": "2024-01-05", "value": 31.5 } ],
//!                "weights":      [ { "id": 1, "date": "2024-01-05", "weight": 84.0 } ] } ] }
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::capability::{Category, CategoryId, DataSource, Measurement, UserId, WeightEntry};
use crate::error::{Error, Result, StoreError};

/// Records owned by one user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub id: UserId,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
    #[serde(default)]
    pub weights: Vec<WeightEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InMemoryStore {
    #[serde(default)]
    users: Vec<UserData>,
    /// Number of `DataSource` calls served
    #[serde(skip)]
    lookups: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON data document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Store(StoreError(format!("invalid data file: {}", e))))
    }

    /// Read a JSON data file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Store(StoreError(format!("cannot read {}: {}", path.display(), e)))
        })?;
        let store = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), users = store.users.len(), "loaded data file");
        Ok(store)
    }

    /// How many lookups this store has served
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn category(&self, user: UserId, id: CategoryId) -> Option<&Category> {
        self.user(user)?.categories.iter().find(|c| c.id == id)
    }

    pub fn with_category(mut self, user: UserId, id: CategoryId, name: &str, unit: &str) -> Self {
        self.user_mut(user).categories.push(Category {
            id,
            name: name.to_string(),
            unit: unit.to_string(),
            description: None,
            code: None,
        });
        self
    }

    pub fn with_measurement(
        mut self,
        user: UserId,
        category: CategoryId,
        date: NaiveDate,
        value: f64,
    ) -> Self {
        let id = self.next_id(|u| u.measurements.len());
        self.user_mut(user).measurements.push(Measurement {
            id,
            category,
            date,
            value,
            notes: String::new(),
        });
        self
    }

    pub fn with_weight(mut self, user: UserId, date: NaiveDate, weight: f64) -> Self {
        let id = self.next_id(|u| u.weights.len());
        self.user_mut(user).weights.push(WeightEntry { id, date, weight });
        self
    }

    fn next_id(&self, count: impl Fn(&UserData) -> usize) -> u64 {
        self.users.iter().map(count).sum::<usize>() as u64 + 1
    }

    fn user(&self, id: UserId) -> Option<&UserData> {
        self.users.iter().find(|u| u.id == id)
    }

    fn user_mut(&mut self, id: UserId) -> &mut UserData {
        let position = match self.users.iter().position(|u| u.id == id) {
            Some(position) => position,
            None => {
                self.users.push(UserData {
                    id,
                    ..UserData::default()
                });
                self.users.len() - 1
            }
        };
        &mut self.users[position]
    }

    fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }
}

impl DataSource for InMemoryStore {
    fn category_by_name(&self, user: UserId, name: &str) -> std::result::Result<Option<Category>, StoreError> {
        self.record_lookup();
        Ok(self
            .user(user)
            .and_then(|u| u.categories.iter().find(|c| c.name == name))
            .cloned())
    }

    fn measurements_for_category(
        &self,
        user: UserId,
        category: CategoryId,
    ) -> std::result::Result<Vec<Measurement>, StoreError> {
        self.record_lookup();
        let mut measurements: Vec<Measurement> = self
            .user(user)
            .map(|u| {
                u.measurements
                    .iter()
                    .filter(|m| m.category == category)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        measurements.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        Ok(measurements)
    }

    fn measurement_on(
        &self,
        user: UserId,
        category: CategoryId,
        date: NaiveDate,
    ) -> std::result::Result<Option<Measurement>, StoreError> {
        self.record_lookup();
        Ok(self
            .user(user)
            .and_then(|u| {
                u.measurements
                    .iter()
                    .find(|m| m.category == category && m.date == date)
            })
            .cloned())
    }

    fn weight_on(&self, user: UserId, date: NaiveDate) -> std::result::Result<Option<WeightEntry>, StoreError> {
        self.record_lookup();
        Ok(self
            .user(user)
            .and_then(|u| u.weights.iter().find(|w| w.date == date))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    const DATA: &str = r#"{
        "users": [
            {
                "id": 1,
                "categories": [{"id": 7, "name": "Biceps", "unit": "cm", "code": "results.append({'value': 1})"}],
                "measurements": [
                    {"id": 1, "category": 7, "date": "2024-01-01", "value": 30.0},
                    {"id": 2, "category": 7, "date": "2024-03-01", "value": 32.0},
                    {"id": 3, "category": 7, "date": "2024-02-01", "value": 31.0, "notes": "pumped"}
                ],
                "weights": [{"id": 1, "date": "2024-03-01", "weight": 84.5}]
            },
            {"id": 2}
        ]
    }"#;

    #[test]
    fn test_from_json() {
        let store = InMemoryStore::from_json(DATA).unwrap();
        let category = store.category(UserId(1), CategoryId(7)).unwrap();
        assert_eq!(category.name, "Biceps");
        assert!(category.code.is_some());
        assert!(store.category(UserId(2), CategoryId(7)).is_none());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(InMemoryStore::from_json("{\"users\": 3}"), Err(Error::Store(_))));
    }

    #[test]
    fn test_measurements_sorted_newest_first() {
        let store = InMemoryStore::from_json(DATA).unwrap();
        let values: Vec<f64> = store
            .measurements_for_category(UserId(1), CategoryId(7))
            .unwrap()
            .iter()
            .map(|m| m.value)
            .collect();
        assert_eq!(values, vec![32.0, 31.0, 30.0]);
    }

    #[test]
    fn test_lookups_scoped_by_user() {
        let store = InMemoryStore::from_json(DATA).unwrap();
        assert!(store.category_by_name(UserId(1), "Biceps").unwrap().is_some());
        assert!(store.category_by_name(UserId(2), "Biceps").unwrap().is_none());
        assert!(store.weight_on(UserId(2), date("2024-03-01")).unwrap().is_none());
        assert_eq!(
            store.weight_on(UserId(1), date("2024-03-01")).unwrap().map(|w| w.weight),
            Some(84.5)
        );
    }

    #[test]
    fn test_lookup_count() {
        let store = InMemoryStore::new().with_weight(UserId(1), date("2024-01-01"), 80.0);
        assert_eq!(store.lookup_count(), 0);
        store.weight_on(UserId(1), date("2024-01-01")).unwrap();
        store.category_by_name(UserId(1), "x").unwrap();
        assert_eq!(store.lookup_count(), 2);
    }

    #[test]
    fn test_builder_assigns_ids() {
        let store = InMemoryStore::new()
            .with_category(UserId(1), CategoryId(3), "Waist", "cm")
            .with_measurement(UserId(1), CategoryId(3), date("2024-01-01"), 80.0)
            .with_measurement(UserId(1), CategoryId(3), date("2024-01-02"), 79.0);
        let found = store
            .measurement_on(UserId(1), CategoryId(3), date("2024-01-02"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, 2);
    }
}
