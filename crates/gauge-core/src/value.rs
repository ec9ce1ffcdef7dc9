//! Runtime values for the script sandbox
//!
//! Values follow the semantics script authors expect from a Python-like
//! language: lists and dicts are shared and mutable, tuples are immutable,
//! dicts keep insertion order, and `1 == 1.0 == True` for both equality and
//! dict keys.
//!
//! Every walk over nested values (repr, equality, JSON conversion) is bounded
//! by [`MAX_VALUE_DEPTH`], so self-referencing lists cannot hang the host.
//! Walks that are not bounded by an output length also charge each node to
//! the run's [`Budget`], so shared subtrees cannot multiply their cost.
//! Strings are reference counted; copying a value never copies its text.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{Datelike, Duration, NaiveDate};

use crate::budget::Budget;
use crate::builtins::Builtin;
use crate::capability::{CapabilityFn, Category, MeasurementRecord};
use crate::error::{FaultKind, RuntimeFault};
use crate::guards::Method;
use crate::parser::ast::FunctionDef;

/// Deepest container nesting walked by repr, equality and JSON conversion
pub const MAX_VALUE_DEPTH: usize = 64;

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

/// A script value
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Date(NaiveDate),
    Duration(Duration),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Range(Range),
    Category(Rc<Category>),
    Measurement(Rc<MeasurementRecord>),
    Function(Callable),
}

/// Anything a script can call
#[derive(Debug, Clone)]
pub enum Callable {
    Builtin(Builtin),
    Capability(CapabilityFn),
    /// Method bound to its receiver, e.g. `results.append`
    Method(Box<Value>, Method),
    User(Rc<FunctionDef>),
}

/// Lazy integer range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let count = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / (-step)
        } else {
            0
        };
        usize::try_from(count).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let value = self.start as i128 + self.step as i128 * index as i128;
        i64::try_from(value).ok()
    }
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    /// Check if value is "truthy" for condition evaluation
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Duration(d) => *d != Duration::zero(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Range(range) => !range.is_empty(),
            Value::Date(_) | Value::Category(_) | Value::Measurement(_) | Value::Function(_) => {
                true
            }
        }
    }

    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Date(_) => "date",
            Value::Duration(_) => "timedelta",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range(_) => "range",
            Value::Category(_) => "Category",
            Value::Measurement(_) => "Measurement",
            Value::Function(Callable::Builtin(_)) => "builtin_function_or_method",
            Value::Function(Callable::Method(..)) => "method",
            Value::Function(_) => "function",
        }
    }

    /// Integer view of ints and bools
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Float view of any number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Bool(_) | Value::Float(_))
    }

    // ── Text conversion ────────────────────────────────────

    /// `str(value)`, bounded to `limit` bytes
    pub fn to_str(&self, limit: usize) -> Result<String, RuntimeFault> {
        match self {
            Value::Str(s) => {
                if s.len() > limit {
                    return Err(length_fault(limit));
                }
                Ok(s.to_string())
            }
            Value::Date(d) => Ok(d.format("%Y-%m-%d").to_string()),
            Value::Duration(d) => Ok(format_duration(*d)),
            Value::Category(c) => Ok(c.name.clone()),
            _ => self.to_repr(limit),
        }
    }

    /// `repr(value)`, bounded to `limit` bytes
    pub fn to_repr(&self, limit: usize) -> Result<String, RuntimeFault> {
        let mut writer = Writer {
            out: String::new(),
            limit,
        };
        self.write_repr(&mut writer, 0)?;
        Ok(writer.out)
    }

    fn write_repr(&self, w: &mut Writer, depth: usize) -> Result<(), RuntimeFault> {
        if depth > MAX_VALUE_DEPTH {
            return w.push("...");
        }
        match self {
            Value::List(items) => {
                w.push("[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        w.push(", ")?;
                    }
                    item.write_repr(w, depth + 1)?;
                }
                w.push("]")
            }
            Value::Tuple(items) => {
                w.push("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        w.push(", ")?;
                    }
                    item.write_repr(w, depth + 1)?;
                }
                if items.len() == 1 {
                    w.push(",")?;
                }
                w.push(")")
            }
            Value::Dict(dict) => {
                w.push("{")?;
                for (i, (key, value)) in dict.borrow().entries().iter().enumerate() {
                    if i > 0 {
                        w.push(", ")?;
                    }
                    key.write_repr(w, depth + 1)?;
                    w.push(": ")?;
                    value.write_repr(w, depth + 1)?;
                }
                w.push("}")
            }
            other => w.push(&other.leaf_repr()),
        }
    }

    fn leaf_repr(&self) -> String {
        match self {
            Value::None => "None".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote(s),
            Value::Date(d) => format!("datetime.date({}, {}, {})", d.year(), d.month(), d.day()),
            Value::Duration(d) => duration_repr(*d),
            Value::Range(r) if r.step == 1 => format!("range({}, {})", r.start, r.stop),
            Value::Range(r) => format!("range({}, {}, {})", r.start, r.stop, r.step),
            Value::Category(c) => format!("<Category: {}>", c.name),
            Value::Measurement(m) => format!(
                "<Measurement: {} {} {}>",
                m.category.name,
                m.measurement.date.format("%Y-%m-%d"),
                format_float(m.measurement.value)
            ),
            Value::Function(Callable::Builtin(b)) => format!("<built-in function {}>", b.name()),
            Value::Function(Callable::Capability(c)) => format!("<function {}>", c.name()),
            Value::Function(Callable::User(def)) => format!("<function {}>", def.name),
            Value::Function(Callable::Method(receiver, method)) => format!(
                "<bound method {}.{}>",
                receiver.type_name(),
                method.name()
            ),
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) => String::new(),
        }
    }

    // ── JSON conversion ────────────────────────────────────

    /// Convert to JSON for result payloads.
    ///
    /// Dates become ISO strings and durations their `str` form. Functions,
    /// ranges and records have no JSON form. Each node is charged to
    /// `budget`.
    pub fn to_json(&self, budget: &Budget) -> Result<serde_json::Value, RuntimeFault> {
        self.to_json_at(0, budget)
    }

    fn to_json_at(&self, depth: usize, budget: &Budget) -> Result<serde_json::Value, RuntimeFault> {
        if depth > MAX_VALUE_DEPTH {
            return Err(RuntimeFault::value_error("Circular reference detected"));
        }
        budget.visit()?;
        Ok(match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    RuntimeFault::value_error("Out of range float values are not JSON compliant")
                })?,
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Duration(d) => serde_json::Value::String(format_duration(*d)),
            Value::List(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| v.to_json_at(depth + 1, budget))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Tuple(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| v.to_json_at(depth + 1, budget))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Dict(dict) => {
                let dict = dict.borrow();
                let mut map = serde_json::Map::new();
                for (key, value) in dict.entries() {
                    map.insert(json_key(key)?, value.to_json_at(depth + 1, budget)?);
                }
                serde_json::Value::Object(map)
            }
            other => {
                return Err(RuntimeFault::type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                )))
            }
        })
    }
}

fn json_key(key: &Value) -> Result<String, RuntimeFault> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(format_float(*f)),
        Value::Bool(b) => Ok(b.to_string()),
        Value::None => Ok("null".into()),
        other => Err(RuntimeFault::type_error(format!(
            "keys must be str, int, float, bool or None, not {}",
            other.type_name()
        ))),
    }
}

struct Writer {
    out: String,
    limit: usize,
}

impl Writer {
    fn push(&mut self, s: &str) -> Result<(), RuntimeFault> {
        if self.out.len() + s.len() > self.limit {
            return Err(length_fault(self.limit));
        }
        self.out.push_str(s);
        Ok(())
    }
}

pub(crate) fn length_fault(limit: usize) -> RuntimeFault {
    RuntimeFault::limit(format!("string exceeds the maximum length of {} bytes", limit))
}

// ── Formatting ────────────────────────────────────────────

/// Shortest round-trip float text, switching to exponent form outside
/// `1e-4 <= |f| < 1e16`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0".into() } else { "0.0".into() };
    }
    let magnitude = f.abs();
    if (1e-4..1e16).contains(&magnitude) {
        let text = f.to_string();
        if text.contains('.') {
            text
        } else {
            format!("{}.0", text)
        }
    } else {
        let text = format!("{:e}", f);
        match text.split_once('e') {
            Some((mantissa, exponent)) => {
                let exponent: i32 = exponent.parse().unwrap_or(0);
                let sign = if exponent < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exponent.abs())
            }
            None => text,
        }
    }
}

fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

/// Split a duration into (days, seconds, microseconds) with
/// `0 <= seconds < 86400`, the normalised form scripts see.
pub fn duration_parts(d: Duration) -> (i64, i64, i64) {
    let micros = d
        .num_microseconds()
        .unwrap_or_else(|| d.num_milliseconds().saturating_mul(1_000));
    let days = micros.div_euclid(MICROS_PER_DAY);
    let rest = micros.rem_euclid(MICROS_PER_DAY);
    (days, rest / MICROS_PER_SECOND, rest % MICROS_PER_SECOND)
}

/// `str(timedelta)`: `"2 days, 3:04:05"`
pub fn format_duration(d: Duration) -> String {
    let (days, seconds, micros) = duration_parts(d);
    let mut out = String::new();
    if days != 0 {
        let plural = if days.abs() == 1 { "" } else { "s" };
        out.push_str(&format!("{} day{}, ", days, plural));
    }
    out.push_str(&format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    ));
    if micros != 0 {
        out.push_str(&format!(".{:06}", micros));
    }
    out
}

fn duration_repr(d: Duration) -> String {
    let (days, seconds, micros) = duration_parts(d);
    let mut parts = Vec::new();
    if days != 0 {
        parts.push(format!("days={}", days));
    }
    if seconds != 0 {
        parts.push(format!("seconds={}", seconds));
    }
    if micros != 0 {
        parts.push(format!("microseconds={}", micros));
    }
    if parts.is_empty() {
        "datetime.timedelta(0)".into()
    } else {
        format!("datetime.timedelta({})", parts.join(", "))
    }
}

// ── Equality & Ordering ───────────────────────────────────

/// `a == b`, charging each visited node to `budget`
pub fn values_equal(a: &Value, b: &Value, budget: &Budget) -> Result<bool, RuntimeFault> {
    equal_at(a, b, 0, budget)
}

fn equal_at(a: &Value, b: &Value, depth: usize, budget: &Budget) -> Result<bool, RuntimeFault> {
    budget.visit()?;
    Ok(match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Duration(x), Value::Duration(y)) => x == y,
        (Value::Range(x), Value::Range(y)) => {
            (x.is_empty() && y.is_empty()) || (x.len() == y.len() && x.get(0) == y.get(0) && x.get(1) == y.get(1))
        }
        (Value::Category(x), Value::Category(y)) => x.id == y.id,
        (Value::Measurement(x), Value::Measurement(y)) => x.measurement.id == y.measurement.id,
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            depth < MAX_VALUE_DEPTH && sequences_equal(&x.borrow(), &y.borrow(), depth, budget)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            Rc::ptr_eq(x, y) || (depth < MAX_VALUE_DEPTH && sequences_equal(x, y, depth, budget)?)
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            if depth >= MAX_VALUE_DEPTH {
                return Ok(false);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (key, value) in x.entries() {
                let Some(other) = y.get(key, budget)? else {
                    return Ok(false);
                };
                if !equal_at(value, &other, depth + 1, budget)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Function(x), Value::Function(y)) => match (x, y) {
            (Callable::Builtin(p), Callable::Builtin(q)) => p == q,
            (Callable::Capability(p), Callable::Capability(q)) => p == q,
            (Callable::User(p), Callable::User(q)) => Rc::ptr_eq(p, q),
            _ => false,
        },
        (x, y) if x.is_number() && y.is_number() => match (x.as_int(), y.as_int()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => false,
    })
}

fn sequences_equal(x: &[Value], y: &[Value], depth: usize, budget: &Budget) -> Result<bool, RuntimeFault> {
    if x.len() != y.len() {
        return Ok(false);
    }
    for (a, b) in x.iter().zip(y) {
        if !equal_at(a, b, depth + 1, budget)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Order two values for `<`, `<=`, `>`, `>=`, `sorted`, `min` and `max`.
///
/// `Ok(None)` means the values are unordered (a NaN is involved) and every
/// ordering comparison is false.
pub fn compare(a: &Value, b: &Value, op: &str, budget: &Budget) -> Result<Option<Ordering>, RuntimeFault> {
    compare_at(a, b, op, 0, budget)
}

fn compare_at(
    a: &Value,
    b: &Value,
    op: &str,
    depth: usize,
    budget: &Budget,
) -> Result<Option<Ordering>, RuntimeFault> {
    if depth > MAX_VALUE_DEPTH {
        return Err(RuntimeFault::limit("maximum recursion depth exceeded in comparison"));
    }
    budget.visit()?;
    match (a, b) {
        (x, y) if x.is_number() && y.is_number() => Ok(match (x.as_int(), y.as_int()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64().zip(y.as_f64()).and_then(|(p, q)| p.partial_cmp(&q)),
        }),
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::Date(x), Value::Date(y)) => Ok(Some(x.cmp(y))),
        (Value::Duration(x), Value::Duration(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) => compare_sequences(&x.borrow(), &y.borrow(), op, depth, budget),
        (Value::Tuple(x), Value::Tuple(y)) => compare_sequences(x, y, op, depth, budget),
        _ => Err(RuntimeFault::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn compare_sequences(
    x: &[Value],
    y: &[Value],
    op: &str,
    depth: usize,
    budget: &Budget,
) -> Result<Option<Ordering>, RuntimeFault> {
    for (a, b) in x.iter().zip(y) {
        if !equal_at(a, b, depth + 1, budget)? {
            return compare_at(a, b, op, depth + 1, budget);
        }
    }
    Ok(Some(x.len().cmp(&y.len())))
}

// ── Dict ──────────────────────────────────────────────────

/// Hashable projection of a value used to index dict entries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Date(NaiveDate),
    Duration(i64),
    Tuple(Vec<DictKey>),
}

impl DictKey {
    /// Project a key, charging each component to `budget`.
    ///
    /// # Errors
    /// `TypeError` for mutable or otherwise unhashable values.
    pub fn from_value(value: &Value, budget: &Budget) -> Result<Self, RuntimeFault> {
        Self::from_value_at(value, 0, budget)
    }

    fn from_value_at(value: &Value, depth: usize, budget: &Budget) -> Result<Self, RuntimeFault> {
        if depth > MAX_VALUE_DEPTH {
            return Err(RuntimeFault::limit("dict key is nested too deeply"));
        }
        budget.visit()?;
        Ok(match value {
            Value::None => DictKey::None,
            Value::Bool(b) => DictKey::Int(*b as i64),
            Value::Int(i) => DictKey::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    DictKey::Int(*f as i64)
                } else {
                    DictKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => DictKey::Str(s.clone()),
            Value::Date(d) => DictKey::Date(*d),
            Value::Duration(d) => {
                let (days, seconds, micros) = duration_parts(*d);
                DictKey::Duration(
                    days.saturating_mul(MICROS_PER_DAY)
                        .saturating_add(seconds * MICROS_PER_SECOND + micros),
                )
            }
            Value::Tuple(items) => DictKey::Tuple(
                items
                    .iter()
                    .map(|item| Self::from_value_at(item, depth + 1, budget))
                    .collect::<Result<_, _>>()?,
            ),
            other => {
                return Err(RuntimeFault::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }
}

/// Insertion-ordered dictionary
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: HashMap<DictKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn get(&self, key: &Value, budget: &Budget) -> Result<Option<Value>, RuntimeFault> {
        let key = DictKey::from_value(key, budget)?;
        Ok(self.index.get(&key).map(|&i| self.entries[i].1.clone()))
    }

    pub fn contains(&self, key: &Value, budget: &Budget) -> Result<bool, RuntimeFault> {
        Ok(self.index.contains_key(&DictKey::from_value(key, budget)?))
    }

    /// Insert or replace; a replaced entry keeps its original key and position
    pub fn insert(&mut self, key: Value, value: Value, budget: &Budget) -> Result<(), RuntimeFault> {
        let hashed = DictKey::from_value(&key, budget)?;
        match self.index.get(&hashed) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(hashed, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value, budget: &Budget) -> Result<Option<Value>, RuntimeFault> {
        let hashed = DictKey::from_value(key, budget)?;
        let Some(position) = self.index.remove(&hashed) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Ok(Some(value))
    }
}

/// `KeyError` carrying the key's repr, the way scripts expect to read it
pub fn key_error(key: &Value) -> RuntimeFault {
    let text = key.to_repr(256).unwrap_or_else(|_| key.type_name().to_string());
    RuntimeFault::new(FaultKind::Key, text)
}
