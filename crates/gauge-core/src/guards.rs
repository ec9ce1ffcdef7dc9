//! Safe wrappers — the only paths from a script to attributes, items and
//! iteration
//!
//! `safe_getattr` resolves attributes against a fixed allowlist per value
//! type; everything else is an `AttributeError`. `safe_getiter` is the one
//! iteration protocol. Subscript reads and writes, slicing and membership
//! tests live here too so every container access shares the same bounds
//! checks and error messages.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::Datelike;

use crate::budget::{Budget, SLOT_BYTES};
use crate::error::{FaultKind, RuntimeFault};
use crate::value::{duration_parts, key_error, length_fault, values_equal, Callable, Dict, Range, Value};

/// Allowlisted methods, bound to a receiver via `Callable::Method`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    // date
    Weekday,
    IsoWeekday,
    IsoFormat,
    // list
    Append,
    Extend,
    Insert,
    Pop,
    Index,
    Count,
    Copy,
    // dict
    Get,
    Keys,
    Values,
    Items,
    Update,
    // str
    Upper,
    Lower,
    Strip,
    Split,
    Join,
    StartsWith,
    EndsWith,
    Replace,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::Weekday => "weekday",
            Method::IsoWeekday => "isoweekday",
            Method::IsoFormat => "isoformat",
            Method::Append => "append",
            Method::Extend => "extend",
            Method::Insert => "insert",
            Method::Pop => "pop",
            Method::Index => "index",
            Method::Count => "count",
            Method::Copy => "copy",
            Method::Get => "get",
            Method::Keys => "keys",
            Method::Values => "values",
            Method::Items => "items",
            Method::Update => "update",
            Method::Upper => "upper",
            Method::Lower => "lower",
            Method::Strip => "strip",
            Method::Split => "split",
            Method::Join => "join",
            Method::StartsWith => "startswith",
            Method::EndsWith => "endswith",
            Method::Replace => "replace",
        }
    }
}

const DATE_METHODS: &[Method] = &[Method::Weekday, Method::IsoWeekday, Method::IsoFormat];
const LIST_METHODS: &[Method] = &[
    Method::Append,
    Method::Extend,
    Method::Insert,
    Method::Pop,
    Method::Index,
    Method::Count,
    Method::Copy,
];
const DICT_METHODS: &[Method] = &[
    Method::Get,
    Method::Keys,
    Method::Values,
    Method::Items,
    Method::Pop,
    Method::Update,
];
const STR_METHODS: &[Method] = &[
    Method::Upper,
    Method::Lower,
    Method::Strip,
    Method::Split,
    Method::Join,
    Method::StartsWith,
    Method::EndsWith,
    Method::Replace,
];

// ── Attributes ────────────────────────────────────────────

/// Resolve `value.name` against the allowlist
pub fn safe_getattr(value: &Value, name: &str) -> Result<Value, RuntimeFault> {
    let found = if name.starts_with('_') {
        None
    } else {
        match value {
            Value::Date(d) => match name {
                "year" => Some(Value::Int(d.year() as i64)),
                "month" => Some(Value::Int(d.month() as i64)),
                "day" => Some(Value::Int(d.day() as i64)),
                _ => bind(value, DATE_METHODS, name),
            },
            Value::Duration(d) => match name {
                "days" => Some(Value::Int(duration_parts(*d).0)),
                _ => None,
            },
            Value::Category(c) => match name {
                "id" => Some(Value::Int(c.id.0 as i64)),
                "name" => Some(Value::str(c.name.clone())),
                "unit" => Some(Value::str(c.unit.clone())),
                "description" => Some(
                    c.description
                        .clone()
                        .map(Value::str)
                        .unwrap_or(Value::None),
                ),
                _ => None,
            },
            Value::Measurement(m) => match name {
                "id" => Some(Value::Int(m.measurement.id as i64)),
                "category" => Some(Value::Category(m.category.clone())),
                "date" => Some(Value::Date(m.measurement.date)),
                "value" => Some(Value::Float(m.measurement.value)),
                "notes" => Some(Value::str(m.measurement.notes.clone())),
                _ => None,
            },
            Value::List(_) => bind(value, LIST_METHODS, name),
            Value::Dict(_) => bind(value, DICT_METHODS, name),
            Value::Str(_) => bind(value, STR_METHODS, name),
            _ => None,
        }
    };

    found.ok_or_else(|| {
        RuntimeFault::new(
            FaultKind::Attribute,
            format!("'{}' object has no attribute '{}'", value.type_name(), name),
        )
    })
}

fn bind(receiver: &Value, methods: &[Method], name: &str) -> Option<Value> {
    methods
        .iter()
        .find(|m| m.name() == name)
        .map(|&m| Value::Function(Callable::Method(Box::new(receiver.clone()), m)))
}

// ── Method calls ──────────────────────────────────────────

fn arity(method: Method, args: &[Value], min: usize, max: usize) -> Result<(), RuntimeFault> {
    let n = args.len();
    if (min..=max).contains(&n) {
        return Ok(());
    }
    let message = if min == max {
        let plural = if min == 1 { "" } else { "s" };
        format!("{}() takes exactly {} argument{} ({} given)", method.name(), min, plural, n)
    } else if n < min {
        format!("{}() expected at least {} arguments, got {}", method.name(), min, n)
    } else {
        format!("{}() expected at most {} arguments, got {}", method.name(), max, n)
    };
    Err(RuntimeFault::type_error(message))
}

fn str_arg<'v>(method: Method, value: &'v Value) -> Result<&'v str, RuntimeFault> {
    match value {
        Value::Str(s) => Ok(&**s),
        other => Err(RuntimeFault::type_error(format!(
            "{}() argument must be str, not {}",
            method.name(),
            other.type_name()
        ))),
    }
}

fn int_arg(value: &Value) -> Result<i64, RuntimeFault> {
    value.as_int().ok_or_else(|| {
        RuntimeFault::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

pub(crate) fn collection_fault(limit: usize) -> RuntimeFault {
    RuntimeFault::limit(format!("collection exceeds the maximum length of {}", limit))
}

/// Position of the first element equal to `item`
fn position_of(items: &[Value], item: &Value, budget: &Budget) -> Result<Option<usize>, RuntimeFault> {
    for (i, v) in items.iter().enumerate() {
        if values_equal(v, item, budget)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// Call a bound method
pub fn call_method(
    receiver: &Value,
    method: Method,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    if !kwargs.is_empty() {
        return Err(RuntimeFault::type_error(format!(
            "{}() takes no keyword arguments",
            method.name()
        )));
    }

    match receiver {
        Value::Date(d) => {
            arity(method, &args, 0, 0)?;
            Ok(match method {
                Method::Weekday => Value::Int(d.weekday().num_days_from_monday() as i64),
                Method::IsoWeekday => Value::Int(d.weekday().number_from_monday() as i64),
                _ => Value::str(d.format("%Y-%m-%d").to_string()),
            })
        }
        Value::List(items) => call_list_method(items, method, args, budget),
        Value::Dict(dict) => call_dict_method(dict, method, args, budget),
        Value::Str(s) => call_str_method(s, method, args, budget),
        other => Err(RuntimeFault::new(
            FaultKind::Attribute,
            format!("'{}' object has no attribute '{}'", other.type_name(), method.name()),
        )),
    }
}

fn call_list_method(
    items: &Rc<RefCell<Vec<Value>>>,
    method: Method,
    mut args: Vec<Value>,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    match method {
        Method::Append => {
            arity(method, &args, 1, 1)?;
            budget.track_list(items);
            let mut items = items.borrow_mut();
            if items.len() >= budget.max_collection_len {
                return Err(collection_fault(budget.max_collection_len));
            }
            budget.alloc(SLOT_BYTES)?;
            items.extend(args.pop());
            Ok(Value::None)
        }
        Method::Extend => {
            arity(method, &args, 1, 1)?;
            let extra = materialize(&args[0], budget)?;
            budget.track_list(items);
            let mut items = items.borrow_mut();
            if items.len() + extra.len() > budget.max_collection_len {
                return Err(collection_fault(budget.max_collection_len));
            }
            items.extend(extra);
            Ok(Value::None)
        }
        Method::Insert => {
            arity(method, &args, 2, 2)?;
            let index = int_arg(&args[0])?;
            budget.track_list(items);
            let mut items = items.borrow_mut();
            if items.len() >= budget.max_collection_len {
                return Err(collection_fault(budget.max_collection_len));
            }
            budget.alloc(SLOT_BYTES)?;
            let len = items.len() as i64;
            let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(position as usize, args.swap_remove(1));
            Ok(Value::None)
        }
        Method::Pop => {
            arity(method, &args, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(RuntimeFault::new(FaultKind::Index, "pop from empty list"));
            }
            let index = match args.first() {
                Some(v) => int_arg(v)?,
                None => -1,
            };
            let position = normalize_index(index, items.len())
                .ok_or_else(|| RuntimeFault::new(FaultKind::Index, "pop index out of range"))?;
            Ok(items.remove(position))
        }
        Method::Index => {
            arity(method, &args, 1, 1)?;
            let found = position_of(&items.borrow(), &args[0], budget)?;
            match found {
                Some(i) => Ok(Value::Int(i as i64)),
                None => Err(RuntimeFault::value_error(format!(
                    "{} is not in list",
                    args[0].to_repr(256)?
                ))),
            }
        }
        Method::Count => {
            arity(method, &args, 1, 1)?;
            let mut count = 0i64;
            for v in items.borrow().iter() {
                if values_equal(v, &args[0], budget)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        _ => {
            arity(method, &args, 0, 0)?;
            let items = items.borrow();
            budget.collection(items.len())?;
            Ok(Value::list(items.clone()))
        }
    }
}

fn call_dict_method(
    dict: &Rc<RefCell<Dict>>,
    method: Method,
    args: Vec<Value>,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    match method {
        Method::Get => {
            arity(method, &args, 1, 2)?;
            let found = dict.borrow().get(&args[0], budget)?;
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        Method::Keys => {
            arity(method, &args, 0, 0)?;
            let dict = dict.borrow();
            budget.collection(dict.len())?;
            Ok(Value::list(dict.keys()))
        }
        Method::Values => {
            arity(method, &args, 0, 0)?;
            let dict = dict.borrow();
            budget.collection(dict.len())?;
            Ok(Value::list(dict.values()))
        }
        Method::Items => {
            arity(method, &args, 0, 0)?;
            let dict = dict.borrow();
            // One slot per entry plus the two inside each pair
            budget.collection(dict.len())?;
            budget.alloc(dict.len().saturating_mul(2 * SLOT_BYTES))?;
            let items = dict
                .entries()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect();
            Ok(Value::list(items))
        }
        Method::Pop => {
            arity(method, &args, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args[0], budget)?;
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(key_error(&args[0])),
            }
        }
        _ => {
            arity(method, &args, 1, 1)?;
            let pairs = match &args[0] {
                Value::Dict(other) => other.borrow().entries().to_vec(),
                other => {
                    return Err(RuntimeFault::type_error(format!(
                        "'{}' object is not a mapping",
                        other.type_name()
                    )))
                }
            };
            budget.track_dict(dict);
            let mut dict = dict.borrow_mut();
            for (key, value) in pairs {
                insert_entry(&mut dict, key, value, budget)?;
            }
            Ok(Value::None)
        }
    }
}

/// Insert into a script-visible dict, charging growth
fn insert_entry(dict: &mut Dict, key: Value, value: Value, budget: &Budget) -> Result<(), RuntimeFault> {
    let before = dict.len();
    dict.insert(key, value, budget)?;
    if dict.len() > before {
        if dict.len() > budget.max_collection_len {
            return Err(collection_fault(budget.max_collection_len));
        }
        budget.alloc(SLOT_BYTES)?;
    }
    Ok(())
}

fn call_str_method(s: &str, method: Method, args: Vec<Value>, budget: &Budget) -> Result<Value, RuntimeFault> {
    match method {
        Method::Upper => {
            arity(method, &args, 0, 0)?;
            budget.string(s.to_uppercase())
        }
        Method::Lower => {
            arity(method, &args, 0, 0)?;
            budget.string(s.to_lowercase())
        }
        Method::Strip => {
            arity(method, &args, 0, 1)?;
            let stripped = match args.first() {
                None | Some(Value::None) => s.trim(),
                Some(chars) => {
                    let chars = str_arg(method, chars)?;
                    s.trim_matches(|c| chars.contains(c))
                }
            };
            budget.string(stripped.to_string())
        }
        Method::Split => {
            arity(method, &args, 0, 1)?;
            let bound = budget.max_collection_len.saturating_add(1);
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().take(bound).map(Value::str).collect(),
                Some(sep) => {
                    let sep = str_arg(method, sep)?;
                    if sep.is_empty() {
                        return Err(RuntimeFault::value_error("empty separator"));
                    }
                    s.split(sep).take(bound).map(Value::str).collect()
                }
            };
            budget.collection(parts.len())?;
            budget.alloc(s.len())?;
            Ok(Value::list(parts))
        }
        Method::Join => {
            arity(method, &args, 1, 1)?;
            let items = materialize(&args[0], budget)?;
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                let Value::Str(part) = item else {
                    return Err(RuntimeFault::type_error(format!(
                        "sequence item {}: expected str instance, {} found",
                        i,
                        item.type_name()
                    )));
                };
                if i > 0 {
                    out.push_str(s);
                }
                out.push_str(part);
                if out.len() > budget.max_string_len {
                    return Err(length_fault(budget.max_string_len));
                }
            }
            budget.string(out)
        }
        Method::StartsWith | Method::EndsWith => {
            arity(method, &args, 1, 1)?;
            let affix = str_arg(method, &args[0])?;
            Ok(Value::Bool(if method == Method::StartsWith {
                s.starts_with(affix)
            } else {
                s.ends_with(affix)
            }))
        }
        _ => {
            arity(method, &args, 2, 2)?;
            let old = str_arg(method, &args[0])?;
            let new = str_arg(method, &args[1])?;
            let occurrences = if old.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(old).count()
            };
            let projected = s.len() + occurrences.saturating_mul(new.len());
            if projected > budget.max_string_len {
                return Err(length_fault(budget.max_string_len));
            }
            budget.string(s.replace(old, new))
        }
    }
}

// ── Items & slices ────────────────────────────────────────

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn index_arg(container: &Value, index: &Value) -> Result<i64, RuntimeFault> {
    index.as_int().ok_or_else(|| {
        RuntimeFault::type_error(format!(
            "{} indices must be integers or slices, not {}",
            container.type_name(),
            index.type_name()
        ))
    })
}

/// `container[index]`
pub fn get_item(container: &Value, index: &Value, budget: &Budget) -> Result<Value, RuntimeFault> {
    let out_of_range =
        || RuntimeFault::new(FaultKind::Index, format!("{} index out of range", container.type_name()));
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let i = normalize_index(index_arg(container, index)?, items.len()).ok_or_else(out_of_range)?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = normalize_index(index_arg(container, index)?, items.len()).ok_or_else(out_of_range)?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let i = index_arg(container, index)?;
            let count = s.chars().count();
            let i = normalize_index(i, count)
                .ok_or_else(|| RuntimeFault::new(FaultKind::Index, "string index out of range"))?;
            Ok(s.chars().nth(i).map(|c| Value::str(c.to_string())).unwrap_or(Value::None))
        }
        Value::Range(range) => {
            let i = normalize_index(index_arg(container, index)?, range.len()).ok_or_else(|| {
                RuntimeFault::new(FaultKind::Index, "range object index out of range")
            })?;
            range.get(i).map(Value::Int).ok_or_else(RuntimeFault::overflow)
        }
        Value::Dict(dict) => dict.borrow().get(index, budget)?.ok_or_else(|| key_error(index)),
        other => Err(RuntimeFault::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `container[index] = value`
pub fn set_item(container: &Value, index: Value, value: Value, budget: &Budget) -> Result<(), RuntimeFault> {
    match container {
        Value::List(items) => {
            budget.track_list(items);
            let mut items = items.borrow_mut();
            let i = normalize_index(index_arg(container, &index)?, items.len()).ok_or_else(|| {
                RuntimeFault::new(FaultKind::Index, "list assignment index out of range")
            })?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            budget.track_dict(dict);
            insert_entry(&mut dict.borrow_mut(), index, value, budget)
        }
        other => Err(RuntimeFault::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn slice_bounds(
    lower: Option<&Value>,
    upper: Option<&Value>,
    len: usize,
) -> Result<(usize, usize), RuntimeFault> {
    let clamp = |bound: Option<&Value>, default: usize| -> Result<usize, RuntimeFault> {
        match bound {
            None | Some(Value::None) => Ok(default),
            Some(v) => {
                let i = v.as_int().ok_or_else(|| {
                    RuntimeFault::type_error(
                        "slice indices must be integers or None or have an __index__ method",
                    )
                })?;
                let len = len as i64;
                let i = if i < 0 { (i + len).max(0) } else { i.min(len) };
                Ok(i as usize)
            }
        }
    };
    let start = clamp(lower, 0)?;
    let stop = clamp(upper, len)?;
    Ok((start, stop.max(start)))
}

/// `container[lower:upper]`
pub fn get_slice(
    container: &Value,
    lower: Option<&Value>,
    upper: Option<&Value>,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let (start, stop) = slice_bounds(lower, upper, items.len())?;
            budget.collection(stop - start)?;
            Ok(Value::list(items[start..stop].to_vec()))
        }
        Value::Tuple(items) => {
            let (start, stop) = slice_bounds(lower, upper, items.len())?;
            budget.collection(stop - start)?;
            Ok(Value::tuple(items[start..stop].to_vec()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, stop) = slice_bounds(lower, upper, chars.len())?;
            budget.string(chars[start..stop].iter().collect())
        }
        Value::Range(range) => {
            let (start, stop) = slice_bounds(lower, upper, range.len())?;
            let at = |i: usize| {
                (range.start as i128 + range.step as i128 * i as i128)
                    .clamp(i64::MIN as i128, i64::MAX as i128) as i64
            };
            Ok(Value::Range(Range {
                start: at(start),
                stop: at(stop),
                step: range.step,
            }))
        }
        other => Err(RuntimeFault::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

// ── Iteration ─────────────────────────────────────────────

/// Iterator over a snapshot of a container, or lazily over a range or
/// the characters of a string
#[derive(Debug)]
pub enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { range: Range, next: usize },
    /// `next` is a byte offset into `text`
    Chars { text: Rc<str>, next: usize },
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Items(items) => items.next(),
            ValueIter::Range { range, next } => {
                let value = range.get(*next)?;
                *next += 1;
                Some(Value::Int(value))
            }
            ValueIter::Chars { text, next } => {
                let c = text.get(*next..)?.chars().next()?;
                *next += c.len_utf8();
                Some(Value::str(c.to_string()))
            }
        }
    }
}

/// The one iteration protocol: lists (snapshot), tuples, strings
/// (characters), dicts (keys) and ranges.
pub fn safe_getiter(value: &Value) -> Result<ValueIter, RuntimeFault> {
    let items = match value {
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Str(s) => {
            return Ok(ValueIter::Chars {
                text: Rc::clone(s),
                next: 0,
            })
        }
        Value::Dict(dict) => dict.borrow().keys(),
        Value::Range(range) => {
            return Ok(ValueIter::Range {
                range: *range,
                next: 0,
            })
        }
        other => {
            return Err(RuntimeFault::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    };
    Ok(ValueIter::Items(items.into_iter()))
}

/// Collect an iterable into a new vector, bounded by `max_collection_len`
/// and charged to the allocation budget. Never pulls more than one item
/// past the bound.
pub fn materialize(value: &Value, budget: &Budget) -> Result<Vec<Value>, RuntimeFault> {
    let items: Vec<Value> = safe_getiter(value)?
        .take(budget.max_collection_len.saturating_add(1))
        .collect();
    budget.collection(items.len())?;
    Ok(items)
}

/// `item in container`
pub fn contains(container: &Value, item: &Value, budget: &Budget) -> Result<bool, RuntimeFault> {
    match container {
        Value::List(items) => Ok(position_of(&items.borrow(), item, budget)?.is_some()),
        Value::Tuple(items) => Ok(position_of(items, item, budget)?.is_some()),
        Value::Dict(dict) => dict.borrow().contains(item, budget),
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(RuntimeFault::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Range(range) => {
            let Some(n) = item.as_int().or_else(|| match item {
                Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
                _ => None,
            }) else {
                return Ok(false);
            };
            if range.is_empty() {
                return Ok(false);
            }
            let offset = n as i128 - range.start as i128;
            let step = range.step as i128;
            let index = offset / step;
            Ok(offset % step == 0 && index >= 0 && (index as usize) < range.len())
        }
        other => Err(RuntimeFault::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionLimits;
    use chrono::NaiveDate;

    fn call(receiver: &Value, name: &str, args: Vec<Value>) -> Result<Value, RuntimeFault> {
        call_with(receiver, name, args, &Budget::default())
    }

    fn call_with(receiver: &Value, name: &str, args: Vec<Value>, budget: &Budget) -> Result<Value, RuntimeFault> {
        match safe_getattr(receiver, name)? {
            Value::Function(Callable::Method(recv, method)) => call_method(&recv, method, args, Vec::new(), budget),
            other => panic!("expected method, got {:?}", other),
        }
    }

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().map(|&i| Value::Int(i)).collect())
    }

    fn text(value: Value) -> String {
        match value {
            Value::Str(s) => s.to_string(),
            other => panic!("expected str, got {:?}", other),
        }
    }

    #[test]
    fn test_date_attributes() {
        let date = Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(safe_getattr(&date, "year").unwrap().as_int(), Some(2024));
        assert_eq!(safe_getattr(&date, "day").unwrap().as_int(), Some(29));
        // 2024-02-29 was a Thursday
        assert_eq!(call(&date, "weekday", vec![]).unwrap().as_int(), Some(3));
        assert_eq!(call(&date, "isoweekday", vec![]).unwrap().as_int(), Some(4));
        assert_eq!(text(call(&date, "isoformat", vec![]).unwrap()), "2024-02-29");
    }

    #[test]
    fn test_disallowed_attributes() {
        let date = Value::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let err = safe_getattr(&date, "replace").unwrap_err();
        assert_eq!(err.kind, FaultKind::Attribute);
        assert_eq!(err.message, "'date' object has no attribute 'replace'");
        assert!(safe_getattr(&Value::Int(1), "real").is_err());
        assert!(safe_getattr(&ints(&[]), "__class__").is_err());
        assert!(safe_getattr(&ints(&[]), "sort").is_err());
    }

    #[test]
    fn test_list_methods_mutate_shared_list() {
        let list = ints(&[1, 2]);
        call(&list, "append", vec![Value::Int(3)]).unwrap();
        call(&list, "insert", vec![Value::Int(0), Value::Int(0)]).unwrap();
        call(&list, "extend", vec![ints(&[4])]).unwrap();
        assert_eq!(list.to_repr(100).unwrap(), "[0, 1, 2, 3, 4]");
        assert_eq!(call(&list, "pop", vec![]).unwrap().as_int(), Some(4));
        assert_eq!(call(&list, "index", vec![Value::Int(2)]).unwrap().as_int(), Some(2));
        assert_eq!(call(&list, "count", vec![Value::Int(9)]).unwrap().as_int(), Some(0));
    }

    #[test]
    fn test_list_errors() {
        let empty = ints(&[]);
        assert_eq!(call(&empty, "pop", vec![]).unwrap_err().message, "pop from empty list");
        assert_eq!(
            call(&ints(&[1]), "index", vec![Value::Int(5)]).unwrap_err().message,
            "5 is not in list"
        );
        assert_eq!(
            call(&empty, "append", vec![]).unwrap_err().message,
            "append() takes exactly 1 argument (0 given)"
        );
    }

    #[test]
    fn test_append_respects_collection_limit() {
        let list = ints(&[1, 2]);
        let small = Budget::new(ExecutionLimits::default().with_max_collection_len(2));
        let err = call_method(&list, Method::Append, vec![Value::Int(3)], vec![], &small).unwrap_err();
        assert_eq!(err.kind, FaultKind::Limit);
    }

    #[test]
    fn test_mutated_containers_are_released() {
        let budget = Budget::default();
        let list = ints(&[]);
        call_with(&list, "append", vec![list.clone()], &budget).unwrap();
        let dict = Value::dict(Dict::new());
        set_item(&dict, Value::str("self"), dict.clone(), &budget).unwrap();
        let (Value::List(l), Value::Dict(d)) = (&list, &dict) else {
            unreachable!()
        };
        let (l, d) = (Rc::downgrade(l), Rc::downgrade(d));
        drop((list, dict));
        assert!(l.upgrade().is_some() && d.upgrade().is_some());
        budget.release();
        assert!(l.upgrade().is_none());
        assert!(d.upgrade().is_none());
    }

    #[test]
    fn test_dict_methods() {
        let budget = Budget::default();
        let dict = Value::dict(Dict::new());
        set_item(&dict, Value::str("a"), Value::Int(1), &budget).unwrap();
        assert_eq!(call(&dict, "get", vec![Value::str("a")]).unwrap().as_int(), Some(1));
        assert!(matches!(call(&dict, "get", vec![Value::str("z")]).unwrap(), Value::None));
        assert_eq!(
            call(&dict, "get", vec![Value::str("z"), Value::Int(0)]).unwrap().as_int(),
            Some(0)
        );
        assert_eq!(call(&dict, "items", vec![]).unwrap().to_repr(100).unwrap(), "[('a', 1)]");
        assert_eq!(call(&dict, "pop", vec![Value::str("z")]).unwrap_err().message, "'z'");
        assert_eq!(call(&dict, "pop", vec![Value::str("a")]).unwrap().as_int(), Some(1));
    }

    #[test]
    fn test_str_methods() {
        let s = Value::str("  Biceps left ");
        assert_eq!(text(call(&s, "strip", vec![]).unwrap()), "Biceps left");
        assert_eq!(call(&s, "split", vec![]).unwrap().to_repr(100).unwrap(), "['Biceps', 'left']");
        let sep = Value::str(", ");
        let joined = call(&sep, "join", vec![Value::list(vec![Value::str("a"), Value::str("b")])]).unwrap();
        assert_eq!(text(joined), "a, b");
        let err = call(&sep, "join", vec![ints(&[1])]).unwrap_err();
        assert_eq!(err.message, "sequence item 0: expected str instance, int found");
        assert!(matches!(call(&Value::str("abc"), "startswith", vec![Value::str("ab")]).unwrap(), Value::Bool(true)));
        let replaced = call(&Value::str("a-b"), "replace", vec![Value::str("-"), Value::str("+")]).unwrap();
        assert_eq!(text(replaced), "a+b");
    }

    #[test]
    fn test_str_methods_charge_allocation() {
        let budget = Budget::new(ExecutionLimits::default().with_max_memory_bytes(64));
        let s = Value::str("x".repeat(40));
        call_with(&s, "upper", vec![], &budget).unwrap();
        let err = call_with(&s, "upper", vec![], &budget).unwrap_err();
        assert_eq!(err.message, "allocation budget of 64 bytes exceeded");
    }

    #[test]
    fn test_get_item() {
        let budget = Budget::default();
        let list = ints(&[10, 20, 30]);
        assert_eq!(get_item(&list, &Value::Int(-1), &budget).unwrap().as_int(), Some(30));
        let err = get_item(&list, &Value::Int(3), &budget).unwrap_err();
        assert_eq!(err.kind, FaultKind::Index);
        assert_eq!(err.message, "list index out of range");
        let err = get_item(&list, &Value::str("a"), &budget).unwrap_err();
        assert_eq!(err.message, "list indices must be integers or slices, not str");
        let err = get_item(&Value::Int(1), &Value::Int(0), &budget).unwrap_err();
        assert_eq!(err.message, "'int' object is not subscriptable");
    }

    #[test]
    fn test_set_item_on_tuple_rejected() {
        let tuple = Value::tuple(vec![Value::Int(1)]);
        let err = set_item(&tuple, Value::Int(0), Value::Int(2), &Budget::default()).unwrap_err();
        assert_eq!(err.message, "'tuple' object does not support item assignment");
    }

    #[test]
    fn test_slices() {
        let budget = Budget::default();
        let slice = |v: &Value, lo: Option<i64>, hi: Option<i64>| {
            let (lo, hi) = (lo.map(Value::Int), hi.map(Value::Int));
            get_slice(v, lo.as_ref(), hi.as_ref(), &budget).unwrap()
        };
        let list = ints(&[1, 2, 3, 4]);
        assert_eq!(slice(&list, Some(1), None).to_repr(100).unwrap(), "[2, 3, 4]");
        assert_eq!(slice(&list, None, Some(-1)).to_repr(100).unwrap(), "[1, 2, 3]");
        assert_eq!(slice(&list, Some(9), None).to_repr(100).unwrap(), "[]");
        assert_eq!(text(slice(&Value::str("hello"), Some(1), Some(3))), "el");
    }

    #[test]
    fn test_safe_getiter() {
        let values: Vec<i64> = safe_getiter(&Value::Range(Range { start: 0, stop: 6, step: 2 }))
            .unwrap()
            .filter_map(|v| v.as_int())
            .collect();
        assert_eq!(values, vec![0, 2, 4]);
        let chars: Vec<String> = safe_getiter(&Value::str("añb")).unwrap().map(text).collect();
        assert_eq!(chars, vec!["a", "ñ", "b"]);
        let err = safe_getiter(&Value::Int(3)).unwrap_err();
        assert_eq!(err.message, "'int' object is not iterable");
    }

    #[test]
    fn test_iteration_is_over_a_snapshot() {
        let list = ints(&[1, 2]);
        let iter = safe_getiter(&list).unwrap();
        call(&list, "append", vec![Value::Int(3)]).unwrap();
        assert_eq!(iter.count(), 2);
    }

    #[test]
    fn test_materialize_bounds_lazy_iterables() {
        let budget = Budget::default();
        let huge = Value::Range(Range { start: 0, stop: i64::MAX, step: 1 });
        let err = materialize(&huge, &budget).unwrap_err();
        assert_eq!(err.kind, FaultKind::Limit);
        let small = Budget::new(ExecutionLimits::default().with_max_collection_len(3));
        let err = materialize(&Value::str("abcd"), &small).unwrap_err();
        assert_eq!(err.message, "collection exceeds the maximum length of 3");
        assert_eq!(materialize(&Value::str("abc"), &small).unwrap().len(), 3);
    }

    #[test]
    fn test_contains() {
        let budget = Budget::default();
        assert!(contains(&ints(&[1, 2]), &Value::Float(2.0), &budget).unwrap());
        assert!(contains(&Value::str("Biceps"), &Value::str("cep"), &budget).unwrap());
        let range = Value::Range(Range { start: 0, stop: 10, step: 3 });
        assert!(contains(&range, &Value::Int(9), &budget).unwrap());
        assert!(!contains(&range, &Value::Int(8), &budget).unwrap());
        assert!(contains(&Value::Int(1), &Value::Int(1), &budget).is_err());
    }
}
