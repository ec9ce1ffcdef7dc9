//! Capability functions — the only way a script reaches stored data
//!
//! Scripts call four lookup functions. None of them takes a user: each
//! invocation binds its [`Capabilities`] to one [`UserId`] up front, and
//! every [`DataSource`] method receives that id explicitly, so a script can
//! never read another user's records.
//!
//! Not-found handling depends on the [`LookupPolicy`]: decision scripts get
//! `None` (or an empty list), results scripts get a `LookupError` fault.

use std::rc::Rc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::builtins::bind_arguments;
use crate::error::{FaultKind, RuntimeFault, StoreError};
use crate::value::Value;

// ── Records ───────────────────────────────────────────────

/// Owner of categories, measurements and weight entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub u64);

impl std::fmt::Display for CategoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A measurement category (e.g. "Biceps", unit "cm")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub unit: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Results-mode script deriving this category's rows
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: u64,
    pub category: CategoryId,
    pub date: NaiveDate,
    pub value: f64,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub id: u64,
    pub date: NaiveDate,
    pub weight: f64,
}

/// A measurement as scripts see it, joined with its category
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub measurement: Measurement,
    pub category: Rc<Category>,
}

// ── Persistence boundary ──────────────────────────────────

/// Read-only access to stored records, always scoped by user
pub trait DataSource {
    fn category_by_name(&self, user: UserId, name: &str) -> Result<Option<Category>, StoreError>;

    /// Measurements of one category, newest first
    fn measurements_for_category(
        &self,
        user: UserId,
        category: CategoryId,
    ) -> Result<Vec<Measurement>, StoreError>;

    fn measurement_on(
        &self,
        user: UserId,
        category: CategoryId,
        date: NaiveDate,
    ) -> Result<Option<Measurement>, StoreError>;

    fn weight_on(&self, user: UserId, date: NaiveDate) -> Result<Option<WeightEntry>, StoreError>;
}

/// What a lookup returns when nothing matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPolicy {
    /// `None` or an empty list
    Lenient,
    /// A `LookupError` fault
    Strict,
}

// ── Script-visible functions ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityFn {
    CategoryByName,
    MeasurementsByCategoryName,
    MeasurementByNameAndDate,
    WeightByDate,
}

impl CapabilityFn {
    pub const ALL: [CapabilityFn; 4] = [
        CapabilityFn::CategoryByName,
        CapabilityFn::MeasurementsByCategoryName,
        CapabilityFn::MeasurementByNameAndDate,
        CapabilityFn::WeightByDate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CapabilityFn::CategoryByName => "get_category_by_name",
            CapabilityFn::MeasurementsByCategoryName => "get_measurements_by_category_name",
            CapabilityFn::MeasurementByNameAndDate => "get_measurement_by_name_and_date",
            CapabilityFn::WeightByDate => "get_weight_by_date",
        }
    }

    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    fn params(self) -> &'static [&'static str] {
        match self {
            CapabilityFn::CategoryByName => &["name"],
            CapabilityFn::MeasurementsByCategoryName => &["category_name"],
            CapabilityFn::MeasurementByNameAndDate => &["category_name", "date"],
            CapabilityFn::WeightByDate => &["date"],
        }
    }
}

/// The four lookups, bound to one user and one data source
pub struct Capabilities<'a> {
    user: UserId,
    store: &'a dyn DataSource,
    policy: LookupPolicy,
}

impl<'a> Capabilities<'a> {
    pub fn new(user: UserId, store: &'a dyn DataSource, policy: LookupPolicy) -> Self {
        Capabilities {
            user,
            store,
            policy,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn policy(&self) -> LookupPolicy {
        self.policy
    }

    /// Run one lookup with script-supplied arguments
    pub fn invoke(
        &self,
        function: CapabilityFn,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, RuntimeFault> {
        let args = bind_arguments(function.name(), function.params(), args, kwargs)?;
        tracing::trace!(capability = function.name(), user = %self.user, "capability call");

        match function {
            CapabilityFn::CategoryByName => {
                let name = name_arg(&args[0])?;
                Ok(match self.category(name)? {
                    Some(category) => Value::Category(Rc::new(category)),
                    None => Value::None,
                })
            }
            CapabilityFn::MeasurementsByCategoryName => {
                let name = name_arg(&args[0])?;
                let Some(category) = self.category(name)? else {
                    return Ok(Value::list(Vec::new()));
                };
                let category = Rc::new(category);
                let measurements = self
                    .store
                    .measurements_for_category(self.user, category.id)
                    .map_err(storage_fault)?;
                Ok(Value::list(
                    measurements
                        .into_iter()
                        .map(|measurement| {
                            Value::Measurement(Rc::new(MeasurementRecord {
                                measurement,
                                category: Rc::clone(&category),
                            }))
                        })
                        .collect(),
                ))
            }
            CapabilityFn::MeasurementByNameAndDate => {
                let name = name_arg(&args[0])?;
                let date = date_arg(&args[1])?;
                let Some(category) = self.category(name)? else {
                    return Ok(Value::None);
                };
                match self
                    .store
                    .measurement_on(self.user, category.id, date)
                    .map_err(storage_fault)?
                {
                    Some(m) => Ok(Value::Float(m.value)),
                    None => self.not_found("Measurement"),
                }
            }
            CapabilityFn::WeightByDate => {
                let date = date_arg(&args[0])?;
                match self.store.weight_on(self.user, date).map_err(storage_fault)? {
                    Some(entry) => Ok(Value::Float(entry.weight)),
                    None => self.not_found("WeightEntry"),
                }
            }
        }
    }

    /// Category lookup; in lenient mode `Ok(None)` means "not found"
    fn category(&self, name: &str) -> Result<Option<Category>, RuntimeFault> {
        match self
            .store
            .category_by_name(self.user, name)
            .map_err(storage_fault)?
        {
            Some(category) => Ok(Some(category)),
            None => self.not_found("Category").map(|_| None),
        }
    }

    fn not_found(&self, record: &str) -> Result<Value, RuntimeFault> {
        match self.policy {
            LookupPolicy::Lenient => Ok(Value::None),
            LookupPolicy::Strict => Err(RuntimeFault::new(
                FaultKind::Lookup,
                format!("{} matching query does not exist.", record),
            )),
        }
    }
}

fn storage_fault(err: StoreError) -> RuntimeFault {
    RuntimeFault::new(FaultKind::Storage, format!("data store error: {}", err))
}

fn name_arg(value: &Value) -> Result<&str, RuntimeFault> {
    match value {
        Value::Str(s) => Ok(&**s),
        other => Err(RuntimeFault::type_error(format!(
            "category name must be str, not {}",
            other.type_name()
        ))),
    }
}

/// Dates may be passed as date values or `YYYY-MM-DD` strings
fn date_arg(value: &Value) -> Result<NaiveDate, RuntimeFault> {
    match value {
        Value::Date(d) => Ok(*d),
        Value::Str(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
            RuntimeFault::value_error(format!(
                "'{}' value has an invalid date format. It must be in YYYY-MM-DD format.",
                s
            ))
        }),
        other => Err(RuntimeFault::type_error(format!(
            "date must be a date or a 'YYYY-MM-DD' string, not {}",
            other.type_name()
        ))),
    }
}
