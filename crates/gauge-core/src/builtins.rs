//! Builtin functions available in both modes
//!
//! The set is closed: anything not listed in [`Builtin`] does not exist in
//! a script namespace. Argument handling and error messages follow what
//! script authors know from Python, so debug output reads naturally.

use std::cmp::Ordering;

use chrono::{Duration, NaiveDate};

use crate::budget::{Budget, SLOT_BYTES};
use crate::error::{FaultKind, RuntimeFault};
use crate::guards::{materialize, safe_getiter, ValueIter};
use crate::ops::{binary_op, checked_duration};
use crate::output::OutputBuffer;
use crate::parser::ast::BinOp;
use crate::value::{compare, Dict, Range, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Min,
    Max,
    Sum,
    Abs,
    Round,
    Int,
    Float,
    Str,
    Bool,
    List,
    Dict,
    Sorted,
    Enumerate,
    Zip,
    Any,
    All,
    Date,
    Timedelta,
}

impl Builtin {
    pub const ALL: [Builtin; 21] = [
        Builtin::Print,
        Builtin::Len,
        Builtin::Range,
        Builtin::Min,
        Builtin::Max,
        Builtin::Sum,
        Builtin::Abs,
        Builtin::Round,
        Builtin::Int,
        Builtin::Float,
        Builtin::Str,
        Builtin::Bool,
        Builtin::List,
        Builtin::Dict,
        Builtin::Sorted,
        Builtin::Enumerate,
        Builtin::Zip,
        Builtin::Any,
        Builtin::All,
        Builtin::Date,
        Builtin::Timedelta,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Abs => "abs",
            Builtin::Round => "round",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Dict => "dict",
            Builtin::Sorted => "sorted",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Date => "date",
            Builtin::Timedelta => "timedelta",
        }
    }

    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

// ── Argument binding ──────────────────────────────────────

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Bind positional and keyword arguments to named parameters. The first
/// `required` parameters must be supplied; the rest come back as `None`
/// when absent.
pub(crate) fn bind_optional<S: AsRef<str>>(
    name: &str,
    params: &[S],
    required: usize,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Vec<Option<Value>>, RuntimeFault> {
    if args.len() > params.len() {
        let given = args.len();
        let takes = if required == params.len() {
            params.len().to_string()
        } else {
            format!("from {} to {}", required, params.len())
        };
        return Err(RuntimeFault::type_error(format!(
            "{}() takes {} positional argument{} but {} {} given",
            name,
            takes,
            plural(params.len()),
            given,
            if given == 1 { "was" } else { "were" }
        )));
    }

    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);

    for (key, value) in kwargs {
        match params.iter().position(|p| p.as_ref() == key) {
            None => {
                return Err(RuntimeFault::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, key
                )))
            }
            Some(i) if slots[i].is_some() => {
                return Err(RuntimeFault::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    name, key
                )))
            }
            Some(i) => slots[i] = Some(value),
        }
    }

    let missing: Vec<String> = params[..required]
        .iter()
        .zip(&slots)
        .filter(|(_, slot)| slot.is_none())
        .map(|(p, _)| format!("'{}'", p.as_ref()))
        .collect();
    if !missing.is_empty() {
        let names = match missing.as_slice() {
            [one] => one.clone(),
            [first, second] => format!("{} and {}", first, second),
            [init @ .., last] => format!("{}, and {}", init.join(", "), last),
            [] => String::new(),
        };
        return Err(RuntimeFault::type_error(format!(
            "{}() missing {} required positional argument{}: {}",
            name,
            missing.len(),
            plural(missing.len()),
            names
        )));
    }

    Ok(slots)
}

/// Bind arguments where every parameter is required
pub(crate) fn bind_arguments<S: AsRef<str>>(
    name: &str,
    params: &[S],
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Vec<Value>, RuntimeFault> {
    Ok(bind_optional(name, params, params.len(), args, kwargs)?
        .into_iter()
        .flatten()
        .collect())
}

fn no_kwargs(builtin: Builtin, kwargs: &[(String, Value)]) -> Result<(), RuntimeFault> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(RuntimeFault::type_error(format!(
            "{}() takes no keyword arguments",
            builtin.name()
        )))
    }
}

fn positional(builtin: Builtin, args: &[Value], min: usize, max: usize) -> Result<(), RuntimeFault> {
    let n = args.len();
    if (min..=max).contains(&n) {
        return Ok(());
    }
    let message = if min == max {
        format!("{}() takes exactly {} argument{} ({} given)", builtin.name(), min, plural(min), n)
    } else if n < min {
        format!("{} expected at least {} argument{}, got {}", builtin.name(), min, plural(min), n)
    } else {
        format!("{} expected at most {} argument{}, got {}", builtin.name(), max, plural(max), n)
    };
    Err(RuntimeFault::type_error(message))
}

fn integer(value: &Value) -> Result<i64, RuntimeFault> {
    value.as_int().ok_or_else(|| {
        RuntimeFault::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

// ── Dispatch ──────────────────────────────────────────────

/// Call a builtin. `output` receives whatever `print` writes.
pub fn call(
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    output: &mut OutputBuffer,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    match builtin {
        Builtin::Print => print(args, kwargs, output, budget),
        Builtin::Min | Builtin::Max => extreme(builtin, args, kwargs, budget),
        Builtin::Sum => sum(args, kwargs, budget),
        Builtin::Round => round(args, kwargs),
        Builtin::Sorted => sorted(args, kwargs, budget),
        Builtin::Enumerate => enumerate(args, kwargs, budget),
        Builtin::Dict => dict(args, kwargs, budget),
        Builtin::Date => {
            let args = bind_arguments("date", &["year", "month", "day"], args, kwargs)?;
            make_date(&args[0], &args[1], &args[2])
        }
        Builtin::Timedelta => timedelta(args, kwargs),
        _ => {
            no_kwargs(builtin, &kwargs)?;
            call_simple(builtin, args, budget)
        }
    }
}

/// Builtins without keyword arguments
fn call_simple(builtin: Builtin, args: Vec<Value>, budget: &Budget) -> Result<Value, RuntimeFault> {
    match builtin {
        Builtin::Len => {
            positional(builtin, &args, 1, 1)?;
            len(&args[0]).map(|n| Value::Int(n as i64))
        }
        Builtin::Range => {
            positional(builtin, &args, 1, 3)?;
            let bounds = args.iter().map(integer).collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => (0, 0, 1),
            };
            if step == 0 {
                return Err(RuntimeFault::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(Range { start, stop, step }))
        }
        Builtin::Abs => {
            positional(builtin, &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Duration(d) => checked_duration(d.abs()),
                v => match v.as_int() {
                    Some(i) => i.checked_abs().map(Value::Int).ok_or_else(RuntimeFault::overflow),
                    None => Err(RuntimeFault::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        v.type_name()
                    ))),
                },
            }
        }
        Builtin::Int => {
            positional(builtin, &args, 0, 1)?;
            args.first().map_or(Ok(Value::Int(0)), to_int)
        }
        Builtin::Float => {
            positional(builtin, &args, 0, 1)?;
            args.first().map_or(Ok(Value::Float(0.0)), to_float)
        }
        Builtin::Str => {
            positional(builtin, &args, 0, 1)?;
            match args.first() {
                Some(v @ Value::Str(_)) => Ok(v.clone()),
                Some(v) => budget.string(v.to_str(budget.max_string_len)?),
                None => Ok(Value::str("")),
            }
        }
        Builtin::Bool => {
            positional(builtin, &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
        }
        Builtin::List => {
            positional(builtin, &args, 0, 1)?;
            match args.first() {
                Some(v) => materialize(v, budget).map(Value::list),
                None => Ok(Value::list(Vec::new())),
            }
        }
        Builtin::Zip => {
            let columns = args
                .iter()
                .map(|v| materialize(v, budget))
                .collect::<Result<Vec<_>, _>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            budget.collection(rows)?;
            budget.alloc(rows.saturating_mul(columns.len() * SLOT_BYTES))?;
            Ok(Value::list(
                (0..rows)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        Builtin::Any | Builtin::All => {
            positional(builtin, &args, 1, 1)?;
            // any() stops at the first truthy item, all() at the first falsy one
            let stop_at = builtin == Builtin::Any;
            for item in safe_getiter(&args[0])? {
                budget.step(1)?;
                if item.is_truthy() == stop_at {
                    return Ok(Value::Bool(stop_at));
                }
            }
            Ok(Value::Bool(!stop_at))
        }
        other => Err(RuntimeFault::type_error(format!(
            "{}() cannot be called this way",
            other.name()
        ))),
    }
}

// ── Individual builtins ───────────────────────────────────

fn print(
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    output: &mut OutputBuffer,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    let mut sep = " ".to_string();
    let mut end = "\n".to_string();
    for (key, value) in kwargs {
        let slot = match key.as_str() {
            "sep" => &mut sep,
            "end" => &mut end,
            "file" => {
                return Err(RuntimeFault::type_error(
                    "print() argument 'file' is not supported",
                ))
            }
            other => {
                return Err(RuntimeFault::type_error(format!(
                    "'{}' is an invalid keyword argument for print()",
                    other
                )))
            }
        };
        match value {
            Value::Str(s) => *slot = s.to_string(),
            Value::None => {}
            other => {
                return Err(RuntimeFault::type_error(format!(
                    "{} must be None or a string, not {}",
                    key,
                    other.type_name()
                )))
            }
        }
    }

    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            output.write(&sep)?;
        }
        output.write(&arg.to_str(budget.max_string_len)?)?;
    }
    output.write(&end)?;
    Ok(Value::None)
}

/// `len(x)`
pub fn len(value: &Value) -> Result<usize, RuntimeFault> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Tuple(items) => Ok(items.len()),
        Value::Dict(dict) => Ok(dict.borrow().len()),
        Value::Range(range) => Ok(range.len()),
        other => Err(RuntimeFault::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

fn extreme(
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    let mut default = None;
    for (key, value) in kwargs {
        match key.as_str() {
            "default" => default = Some(value),
            "key" => {
                return Err(RuntimeFault::type_error(format!(
                    "{}() 'key' argument is not supported",
                    builtin.name()
                )))
            }
            other => {
                return Err(RuntimeFault::type_error(format!(
                    "'{}' is an invalid keyword argument for {}()",
                    other,
                    builtin.name()
                )))
            }
        }
    }

    let mut items = match args.len() {
        0 => {
            return Err(RuntimeFault::type_error(format!(
                "{} expected at least 1 argument, got 0",
                builtin.name()
            )))
        }
        1 => safe_getiter(&args[0])?,
        _ => ValueIter::Items(args.into_iter()),
    };

    let wanted = if builtin == Builtin::Min {
        Ordering::Less
    } else {
        Ordering::Greater
    };
    let symbol = if builtin == Builtin::Min { "<" } else { ">" };

    let Some(mut best) = items.next() else {
        return default.ok_or_else(|| {
            RuntimeFault::value_error(format!("{}() arg is an empty sequence", builtin.name()))
        });
    };
    for item in items {
        budget.step(1)?;
        if compare(&item, &best, symbol, budget)? == Some(wanted) {
            best = item;
        }
    }
    Ok(best)
}

fn sum(
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    let args = bind_optional("sum", &["iterable", "start"], 1, args, kwargs)?;
    let mut args = args.into_iter();
    let iterable = args.next().flatten().unwrap_or(Value::None);
    let mut total = args.next().flatten().unwrap_or(Value::Int(0));
    if let Value::Str(_) = total {
        return Err(RuntimeFault::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in safe_getiter(&iterable)? {
        budget.step(1)?;
        total = binary_op(BinOp::Add, &total, &item, budget)?;
    }
    Ok(total)
}

fn round(args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value, RuntimeFault> {
    let args = bind_optional("round", &["number", "ndigits"], 1, args, kwargs)?;
    let number = args[0].clone().unwrap_or(Value::None);
    let ndigits = match &args[1] {
        None | Some(Value::None) => None,
        Some(v) => Some(integer(v)?),
    };

    match (&number, ndigits) {
        (Value::Float(f), None) => float_to_int(f.round_ties_even()),
        (Value::Float(f), Some(n)) => {
            if !f.is_finite() {
                return Ok(Value::Float(*f));
            }
            let scale = 10f64.powi(n.clamp(-308, 308) as i32);
            let scaled = f * scale;
            if !scaled.is_finite() {
                return Ok(Value::Float(*f));
            }
            Ok(Value::Float(scaled.round_ties_even() / scale))
        }
        (v, digits) if v.as_int().is_some() => {
            let i = v.as_int().unwrap_or(0);
            match digits {
                Some(n) if n < 0 => {
                    let Some(unit) = u32::try_from(-n).ok().and_then(|e| 10i64.checked_pow(e)) else {
                        return Ok(Value::Int(0));
                    };
                    let (q, r) = (i.div_euclid(unit), i.rem_euclid(unit));
                    let half = unit / 2;
                    let q = if r > half || (r == half && q % 2 != 0) { q + 1 } else { q };
                    q.checked_mul(unit).map(Value::Int).ok_or_else(RuntimeFault::overflow)
                }
                _ => Ok(Value::Int(i)),
            }
        }
        (v, _) => Err(RuntimeFault::type_error(format!(
            "type {} doesn't define __round__ method",
            v.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> Result<Value, RuntimeFault> {
    if f.is_nan() {
        return Err(RuntimeFault::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(RuntimeFault::new(
            FaultKind::Overflow,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(RuntimeFault::overflow());
    }
    Ok(Value::Int(truncated as i64))
}

fn to_int(value: &Value) -> Result<Value, RuntimeFault> {
    match value {
        Value::Float(f) => float_to_int(*f),
        Value::Str(s) => {
            let cleaned = s.trim().replace('_', "");
            if s.trim().starts_with('_') || s.trim().ends_with('_') || s.contains("__") {
                return Err(invalid_int(s));
            }
            cleaned.parse::<i64>().map(Value::Int).map_err(|_| invalid_int(s))
        }
        v => v.as_int().map(Value::Int).ok_or_else(|| {
            RuntimeFault::type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn invalid_int(s: &str) -> RuntimeFault {
    RuntimeFault::value_error(format!(
        "invalid literal for int() with base 10: {}",
        Value::str(s).to_repr(256).unwrap_or_default()
    ))
}

fn to_float(value: &Value) -> Result<Value, RuntimeFault> {
    match value {
        Value::Str(s) => {
            let text = s.trim().to_ascii_lowercase();
            let parsed = match text.trim_start_matches(['+', '-']) {
                "inf" | "infinity" | "nan" => text.parse::<f64>().ok(),
                _ if text.contains(|c: char| c.is_ascii_alphabetic() && c != 'e') => None,
                _ => text.parse::<f64>().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                RuntimeFault::value_error(format!(
                    "could not convert string to float: {}",
                    Value::str(s.clone()).to_repr(256).unwrap_or_default()
                ))
            })
        }
        v => v.as_f64().map(Value::Float).ok_or_else(|| {
            RuntimeFault::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

/// Stable merge sort with a fallible comparison
fn merge_sort(items: Vec<Value>, reverse: bool, budget: &Budget) -> Result<Vec<Value>, RuntimeFault> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(left, reverse, budget)?;
    let right = merge_sort(right, reverse, budget)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        // Take from the right only when strictly before, keeping ties stable
        let take_right = if reverse {
            compare(b, a, ">", budget)? == Some(Ordering::Greater)
        } else {
            compare(b, a, "<", budget)? == Some(Ordering::Less)
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

fn sorted(
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    positional(Builtin::Sorted, &args, 1, 1)?;
    let mut reverse = false;
    for (key, value) in kwargs {
        match key.as_str() {
            "reverse" => reverse = value.is_truthy(),
            "key" => {
                return Err(RuntimeFault::type_error(
                    "sorted() 'key' argument is not supported",
                ))
            }
            other => {
                return Err(RuntimeFault::type_error(format!(
                    "sort() got an unexpected keyword argument '{}'",
                    other
                )))
            }
        }
    }
    let items = materialize(&args[0], budget)?;
    merge_sort(items, reverse, budget).map(Value::list)
}

fn enumerate(
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    let args = bind_optional("enumerate", &["iterable", "start"], 1, args, kwargs)?;
    let start = match &args[1] {
        Some(v) => integer(v)?,
        None => 0,
    };
    let items = materialize(args[0].as_ref().unwrap_or(&Value::None), budget)?;
    budget.alloc(items.len().saturating_mul(2 * SLOT_BYTES))?;
    let pairs = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            start
                .checked_add(i as i64)
                .map(|n| Value::tuple(vec![Value::Int(n), item]))
                .ok_or_else(RuntimeFault::overflow)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::list(pairs))
}

fn dict(
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    budget: &Budget,
) -> Result<Value, RuntimeFault> {
    positional(Builtin::Dict, &args, 0, 1)?;
    let mut out = Dict::new();
    match args.first() {
        None => {}
        Some(Value::Dict(source)) => {
            for (key, value) in source.borrow().entries() {
                out.insert(key.clone(), value.clone(), budget)?;
            }
        }
        Some(pairs) => {
            for (i, pair) in materialize(pairs, budget)?.into_iter().enumerate() {
                let entry = materialize(&pair, budget).map_err(|_| {
                    RuntimeFault::type_error(format!(
                        "cannot convert dictionary update sequence element #{} to a sequence",
                        i
                    ))
                })?;
                let [key, value] = <[Value; 2]>::try_from(entry).map_err(|entry| {
                    RuntimeFault::value_error(format!(
                        "dictionary update sequence element #{} has length {}; 2 is required",
                        i,
                        entry.len()
                    ))
                })?;
                out.insert(key, value, budget)?;
            }
        }
    }
    for (key, value) in kwargs {
        out.insert(Value::str(key), value, budget)?;
    }
    budget.collection(out.len())?;
    Ok(Value::dict(out))
}

fn make_date(year: &Value, month: &Value, day: &Value) -> Result<Value, RuntimeFault> {
    let (year, month, day) = (integer(year)?, integer(month)?, integer(day)?);
    if !(1..=9999).contains(&year) {
        return Err(RuntimeFault::value_error(format!("year {} is out of range", year)));
    }
    if !(1..=12).contains(&month) {
        return Err(RuntimeFault::value_error("month must be in 1..12"));
    }
    u32::try_from(day)
        .ok()
        .and_then(|d| NaiveDate::from_ymd_opt(year as i32, month as u32, d))
        .map(Value::Date)
        .ok_or_else(|| RuntimeFault::value_error("day is out of range for month"))
}

const TIMEDELTA_PARAMS: [&str; 7] = [
    "days",
    "seconds",
    "microseconds",
    "milliseconds",
    "minutes",
    "hours",
    "weeks",
];
const TIMEDELTA_MICROS: [f64; 7] = [
    86_400e6, 1e6, 1.0, 1e3, 60e6, 3_600e6, 604_800e6,
];

fn timedelta(args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value, RuntimeFault> {
    let args = bind_optional("timedelta", &TIMEDELTA_PARAMS, 0, args, kwargs)?;
    let mut exact: i128 = 0;
    let mut fractional = 0.0f64;
    for ((value, unit), name) in args.iter().zip(TIMEDELTA_MICROS).zip(TIMEDELTA_PARAMS) {
        match value {
            None => {}
            Some(Value::Float(f)) => fractional += f * unit,
            Some(v) => match v.as_int() {
                Some(i) => exact += i as i128 * unit as i128,
                None => {
                    return Err(RuntimeFault::type_error(format!(
                        "unsupported type for timedelta {} component: {}",
                        name,
                        v.type_name()
                    )))
                }
            },
        }
    }
    if !fractional.is_finite() {
        return Err(RuntimeFault::value_error("cannot convert float NaN to integer"));
    }
    let total = exact as f64 + fractional.round_ties_even();
    let total = if fractional == 0.0 {
        i64::try_from(exact).map_err(|_| RuntimeFault::overflow())?
    } else if total.abs() < i64::MAX as f64 {
        total as i64
    } else {
        return Err(RuntimeFault::overflow());
    };
    checked_duration(Duration::microseconds(total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionLimits;
    use crate::error::FaultKind;

    fn run(builtin: Builtin, args: Vec<Value>) -> Result<Value, RuntimeFault> {
        let mut out = OutputBuffer::default();
        call(builtin, args, Vec::new(), &mut out, &Budget::default())
    }

    fn repr(v: Result<Value, RuntimeFault>) -> String {
        v.unwrap().to_repr(10_000).unwrap()
    }

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().map(|&i| Value::Int(i)).collect())
    }

    #[test]
    fn test_lookup_covers_every_builtin() {
        for builtin in Builtin::ALL {
            assert_eq!(Builtin::lookup(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtin::lookup("eval"), None);
        assert_eq!(Builtin::lookup("open"), None);
    }

    #[test]
    fn test_print_writes_fragments() {
        let mut out = OutputBuffer::default();
        let kwargs = vec![("sep".to_string(), Value::str("-")), ("end".to_string(), Value::str("!"))];
        call(
            Builtin::Print,
            vec![Value::str("a"), Value::Int(1), Value::Float(2.0)],
            kwargs,
            &mut out,
            &Budget::default(),
        )
        .unwrap();
        assert_eq!(out.collect(), "a-1-2.0!");
    }

    #[test]
    fn test_print_refuses_file() {
        let mut out = OutputBuffer::default();
        let err = call(
            Builtin::Print,
            vec![Value::str("x")],
            vec![("file".to_string(), Value::None)],
            &mut out,
            &Budget::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, FaultKind::Type);
        assert!(out.is_empty());
    }

    #[test]
    fn test_print_respects_output_limit() {
        let mut out = OutputBuffer::new(4);
        let err = call(
            Builtin::Print,
            vec![Value::str("too long")],
            Vec::new(),
            &mut out,
            &Budget::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, FaultKind::Limit);
    }

    #[test]
    fn test_len() {
        assert_eq!(run(Builtin::Len, vec![Value::str("héllo")]).unwrap().as_int(), Some(5));
        assert_eq!(run(Builtin::Len, vec![ints(&[1, 2])]).unwrap().as_int(), Some(2));
        let err = run(Builtin::Len, vec![Value::Int(3)]).unwrap_err();
        assert_eq!(err.message, "object of type 'int' has no len()");
        let err = run(Builtin::Len, vec![]).unwrap_err();
        assert_eq!(err.message, "len() takes exactly 1 argument (0 given)");
    }

    #[test]
    fn test_range() {
        assert_eq!(repr(run(Builtin::Range, vec![Value::Int(3)])), "range(0, 3)");
        assert_eq!(
            repr(run(Builtin::Range, vec![Value::Int(5), Value::Int(0), Value::Int(-1)])),
            "range(5, 0, -1)"
        );
        let err = run(Builtin::Range, vec![Value::Int(0), Value::Int(5), Value::Int(0)]).unwrap_err();
        assert_eq!(err.message, "range() arg 3 must not be zero");
        assert!(run(Builtin::Range, vec![Value::Float(1.0)]).is_err());
    }

    #[test]
    fn test_min_max() {
        assert_eq!(run(Builtin::Min, vec![ints(&[3, 1, 2])]).unwrap().as_int(), Some(1));
        assert_eq!(run(Builtin::Max, vec![Value::Int(3), Value::Float(4.5)]).unwrap().as_f64(), Some(4.5));
        let err = run(Builtin::Max, vec![ints(&[])]).unwrap_err();
        assert_eq!(err.message, "max() arg is an empty sequence");
        let mut out = OutputBuffer::default();
        let fallback = call(
            Builtin::Min,
            vec![ints(&[])],
            vec![("default".to_string(), Value::None)],
            &mut out,
            &Budget::default(),
        )
        .unwrap();
        assert!(matches!(fallback, Value::None));
    }

    #[test]
    fn test_sum() {
        assert_eq!(run(Builtin::Sum, vec![ints(&[1, 2, 3])]).unwrap().as_int(), Some(6));
        let floats = Value::list(vec![Value::Float(0.5), Value::Int(1)]);
        assert_eq!(run(Builtin::Sum, vec![floats]).unwrap().as_f64(), Some(1.5));
        assert!(run(Builtin::Sum, vec![Value::list(vec![Value::str("a")])]).is_err());
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(run(Builtin::Round, vec![Value::Float(2.5)]).unwrap().as_int(), Some(2));
        assert_eq!(run(Builtin::Round, vec![Value::Float(3.5)]).unwrap().as_int(), Some(4));
        assert_eq!(
            run(Builtin::Round, vec![Value::Float(3.14159), Value::Int(2)]).unwrap().as_f64(),
            Some(3.14)
        );
        assert_eq!(run(Builtin::Round, vec![Value::Int(1250), Value::Int(-2)]).unwrap().as_int(), Some(1200));
        assert_eq!(run(Builtin::Round, vec![Value::Int(1350), Value::Int(-2)]).unwrap().as_int(), Some(1400));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(run(Builtin::Int, vec![Value::str(" 42 ")]).unwrap().as_int(), Some(42));
        assert_eq!(run(Builtin::Int, vec![Value::Float(-2.9)]).unwrap().as_int(), Some(-2));
        let err = run(Builtin::Int, vec![Value::str("4.5")]).unwrap_err();
        assert_eq!(err.message, "invalid literal for int() with base 10: '4.5'");
        assert_eq!(run(Builtin::Float, vec![Value::str("1e3")]).unwrap().as_f64(), Some(1000.0));
        let err = run(Builtin::Float, vec![Value::str("abc")]).unwrap_err();
        assert_eq!(err.message, "could not convert string to float: 'abc'");
        assert!(matches!(run(Builtin::Str, vec![Value::Float(84.0)]).unwrap(), Value::Str(ref s) if &**s == "84.0"));
        assert!(matches!(run(Builtin::Bool, vec![ints(&[])]).unwrap(), Value::Bool(false)));
    }

    #[test]
    fn test_sorted_is_stable_and_fallible() {
        let values = Value::list(vec![Value::Int(2), Value::Float(1.0), Value::Int(1), Value::Int(3)]);
        assert_eq!(repr(run(Builtin::Sorted, vec![values])), "[1.0, 1, 2, 3]");
        let mut out = OutputBuffer::default();
        let reversed = call(
            Builtin::Sorted,
            vec![ints(&[1, 3, 2])],
            vec![("reverse".to_string(), Value::Bool(true))],
            &mut out,
            &Budget::default(),
        );
        assert_eq!(repr(reversed), "[3, 2, 1]");
        let mixed = Value::list(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(run(Builtin::Sorted, vec![mixed]).unwrap_err().kind, FaultKind::Type);
    }

    #[test]
    fn test_enumerate_and_zip() {
        let letters = Value::list(vec![Value::str("a"), Value::str("b")]);
        assert_eq!(repr(run(Builtin::Enumerate, vec![letters.clone()])), "[(0, 'a'), (1, 'b')]");
        assert_eq!(
            repr(run(Builtin::Zip, vec![letters, ints(&[1, 2, 3])])),
            "[('a', 1), ('b', 2)]"
        );
    }

    #[test]
    fn test_any_all() {
        assert!(matches!(run(Builtin::Any, vec![ints(&[0, 0, 1])]).unwrap(), Value::Bool(true)));
        assert!(matches!(run(Builtin::All, vec![ints(&[1, 0])]).unwrap(), Value::Bool(false)));
        assert!(matches!(run(Builtin::All, vec![ints(&[])]).unwrap(), Value::Bool(true)));
    }

    fn run_strict(builtin: Builtin, args: Vec<Value>) -> Result<Value, RuntimeFault> {
        let mut out = OutputBuffer::default();
        call(builtin, args, Vec::new(), &mut out, &Budget::new(ExecutionLimits::strict()))
    }

    fn huge_range(start: i64) -> Value {
        Value::Range(Range { start, stop: 3_000_000_000, step: 1 })
    }

    #[test]
    fn test_consuming_builtins_charge_steps() {
        for builtin in [Builtin::All, Builtin::Sum, Builtin::Min, Builtin::Max] {
            let err = run_strict(builtin, vec![huge_range(1)]).unwrap_err();
            assert_eq!(err.kind, FaultKind::Limit, "{}", builtin.name());
            assert_eq!(err.message, "step limit of 10000 exceeded");
        }
        assert!(matches!(run_strict(Builtin::Any, vec![huge_range(1)]).unwrap(), Value::Bool(true)));
        assert!(matches!(run_strict(Builtin::All, vec![huge_range(0)]).unwrap(), Value::Bool(false)));
    }

    #[test]
    fn test_str_of_str_shares_storage() {
        let original = Value::str("x".repeat(100));
        let copy = run(Builtin::Str, vec![original.clone()]).unwrap();
        match (&original, &copy) {
            (Value::Str(a), Value::Str(b)) => assert!(std::rc::Rc::ptr_eq(a, b)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_dict_from_pairs() {
        let pairs = Value::list(vec![Value::tuple(vec![Value::str("a"), Value::Int(1)])]);
        assert_eq!(repr(run(Builtin::Dict, vec![pairs])), "{'a': 1}");
        let bad = Value::list(vec![ints(&[1, 2, 3])]);
        let err = run(Builtin::Dict, vec![bad]).unwrap_err();
        assert_eq!(err.message, "dictionary update sequence element #0 has length 3; 2 is required");
    }

    #[test]
    fn test_date_and_timedelta() {
        let d = run(Builtin::Date, vec![Value::Int(2024), Value::Int(2), Value::Int(29)]).unwrap();
        assert_eq!(d.to_str(100).unwrap(), "2024-02-29");
        let err = run(Builtin::Date, vec![Value::Int(2023), Value::Int(2), Value::Int(29)]).unwrap_err();
        assert_eq!(err.message, "day is out of range for month");

        let mut out = OutputBuffer::default();
        let delta = call(
            Builtin::Timedelta,
            Vec::new(),
            vec![("weeks".to_string(), Value::Int(1)), ("hours".to_string(), Value::Float(1.5))],
            &mut out,
            &Budget::default(),
        )
        .unwrap();
        assert_eq!(delta.to_str(100).unwrap(), "7 days, 1:30:00");
        assert_eq!(run(Builtin::Timedelta, vec![Value::Int(3)]).unwrap().to_str(100).unwrap(), "3 days, 0:00:00");
    }

    #[test]
    fn test_bind_arguments_messages() {
        let err = bind_arguments("get_weight_by_date", &["date"], vec![], vec![]).unwrap_err();
        assert_eq!(err.message, "get_weight_by_date() missing 1 required positional argument: 'date'");
        let err = bind_arguments("f", &["a"], vec![Value::Int(1), Value::Int(2)], vec![]).unwrap_err();
        assert_eq!(err.message, "f() takes 1 positional argument but 2 were given");
        let err = bind_arguments("f", &["a"], vec![], vec![("b".to_string(), Value::None)]).unwrap_err();
        assert_eq!(err.message, "f() got an unexpected keyword argument 'b'");
        let err = bind_arguments("f", &["a"], vec![Value::Int(1)], vec![("a".to_string(), Value::None)])
            .unwrap_err();
        assert_eq!(err.message, "f() got multiple values for argument 'a'");
        let err = bind_arguments("f", &["a", "b", "c"], vec![], vec![]).unwrap_err();
        assert_eq!(err.message, "f() missing 3 required positional arguments: 'a', 'b', and 'c'");
        let bound = bind_arguments("f", &["a", "b"], vec![Value::Int(1)], vec![("b".to_string(), Value::Int(2))])
            .unwrap();
        assert_eq!(bound.len(), 2);
    }
}
