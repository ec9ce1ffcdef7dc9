//! Operators — arithmetic with checked integers, dates and durations
//!
//! Integer overflow is an `OverflowError` fault, never a wrap. Results that
//! build strings or sequences are checked against the execution limits
//! before they are allocated, and their size is charged to the run's
//! allocation budget.

use chrono::Duration;

use crate::budget::Budget;
use crate::error::{FaultKind, RuntimeFault};
use crate::parser::ast::{BinOp, UnaryOp};
use crate::value::{length_fault, Value};

/// Largest duration magnitude, matching the ±999999999 days scripts expect
const MAX_DURATION_DAYS: i64 = 999_999_999;

fn unsupported(op: BinOp, left: &Value, right: &Value) -> RuntimeFault {
    RuntimeFault::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn zero_division(message: &str) -> RuntimeFault {
    RuntimeFault::new(FaultKind::ZeroDivision, message)
}

fn date_overflow() -> RuntimeFault {
    RuntimeFault::new(FaultKind::Overflow, "date value out of range")
}

/// Wrap a duration, rejecting magnitudes beyond the supported day range
pub fn checked_duration(d: Duration) -> Result<Value, RuntimeFault> {
    if d.num_days().abs() > MAX_DURATION_DAYS {
        return Err(RuntimeFault::new(
            FaultKind::Overflow,
            format!("days={}; must have magnitude <= {}", d.num_days(), MAX_DURATION_DAYS),
        ));
    }
    Ok(Value::Duration(d))
}

fn float_result(op: BinOp, a: f64, b: f64) -> Result<Value, RuntimeFault> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            let value = a.powf(b);
            if value.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(RuntimeFault::new(FaultKind::Overflow, "numerical result out of range"));
            }
            value
        }
    };
    Ok(Value::Float(value))
}

fn int_result(op: BinOp, a: i64, b: i64) -> Result<Value, RuntimeFault> {
    let value = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            // Round toward negative infinity
            a.checked_div(b).map(|q| {
                let r = a % b;
                if r != 0 && (r < 0) != (b < 0) {
                    q - 1
                } else {
                    q
                }
            })
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            a.checked_rem(b).map(|r| if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        }
        BinOp::Pow => {
            if b < 0 {
                return float_result(op, a as f64, b as f64);
            }
            u32::try_from(b).ok().and_then(|exp| a.checked_pow(exp))
        }
    };
    value.map(Value::Int).ok_or_else(RuntimeFault::overflow)
}

fn repeat(count: i64, len: usize, limit: usize) -> Result<usize, RuntimeFault> {
    let count = count.max(0) as usize;
    match len.checked_mul(count) {
        Some(total) if total <= limit => Ok(count),
        _ => Err(RuntimeFault::limit(format!(
            "repeated sequence exceeds the maximum length of {}",
            limit
        ))),
    }
}

/// Clone `items` end to end `count` times
fn repeat_items(items: &[Value], count: usize, budget: &Budget) -> Result<Vec<Value>, RuntimeFault> {
    if items.is_empty() || count == 0 {
        return Ok(Vec::new());
    }
    budget.collection(items.len() * count)?;
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

/// `left op right`
pub fn binary_op(op: BinOp, left: &Value, right: &Value, budget: &Budget) -> Result<Value, RuntimeFault> {
    match (left, right) {
        (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => int_result(op, x, y),
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => float_result(op, x, y),
                _ => Err(unsupported(op, left, right)),
            },
        },

        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => {
            if a.len() + b.len() > budget.max_string_len {
                return Err(length_fault(budget.max_string_len));
            }
            budget.string(format!("{}{}", a, b))
        }
        (Value::Str(s), n) | (n, Value::Str(s)) if op == BinOp::Mul && n.as_int().is_some() => {
            let count = repeat(n.as_int().unwrap_or(0), s.len(), budget.max_string_len)?;
            if s.is_empty() || count == 0 {
                return Ok(Value::str(""));
            }
            budget.string(s.repeat(count))
        }

        (Value::List(a), Value::List(b)) if op == BinOp::Add => {
            let (a, b) = (a.borrow(), b.borrow());
            budget.collection(a.len() + b.len())?;
            Ok(Value::list(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == BinOp::Add => {
            budget.collection(a.len() + b.len())?;
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Value::List(items), n) | (n, Value::List(items))
            if op == BinOp::Mul && n.as_int().is_some() =>
        {
            let items = items.borrow();
            let count = repeat(n.as_int().unwrap_or(0), items.len(), budget.max_collection_len)?;
            Ok(Value::list(repeat_items(&items, count, budget)?))
        }
        (Value::Tuple(items), n) | (n, Value::Tuple(items))
            if op == BinOp::Mul && n.as_int().is_some() =>
        {
            let count = repeat(n.as_int().unwrap_or(0), items.len(), budget.max_collection_len)?;
            Ok(Value::tuple(repeat_items(items, count, budget)?))
        }

        (Value::Date(d), Value::Duration(delta)) if matches!(op, BinOp::Add | BinOp::Sub) => {
            let shifted = if op == BinOp::Add {
                d.checked_add_signed(*delta)
            } else {
                d.checked_sub_signed(*delta)
            };
            // Dates carry no time of day; partial days are dropped
            shifted
                .map(Value::Date)
                .ok_or_else(date_overflow)
        }
        (Value::Duration(delta), Value::Date(d)) if op == BinOp::Add => d
            .checked_add_signed(*delta)
            .map(Value::Date)
            .ok_or_else(date_overflow),
        (Value::Date(a), Value::Date(b)) if op == BinOp::Sub => {
            checked_duration(a.signed_duration_since(*b))
        }

        (Value::Duration(a), Value::Duration(b)) => match op {
            BinOp::Add => a.checked_add(b).ok_or_else(RuntimeFault::overflow).and_then(checked_duration),
            BinOp::Sub => a.checked_sub(b).ok_or_else(RuntimeFault::overflow).and_then(checked_duration),
            BinOp::Div | BinOp::FloorDiv => {
                let (x, y) = (micros(a)?, micros(b)?);
                if y == 0 {
                    return Err(zero_division("division by zero"));
                }
                if op == BinOp::Div {
                    Ok(Value::Float(x as f64 / y as f64))
                } else {
                    int_result(BinOp::FloorDiv, x, y)
                }
            }
            _ => Err(unsupported(op, left, right)),
        },
        (Value::Duration(d), n) | (n, Value::Duration(d))
            if op == BinOp::Mul && n.as_int().is_some() =>
        {
            let factor = n.as_int().unwrap_or(0);
            let total = micros(d)?.checked_mul(factor).ok_or_else(RuntimeFault::overflow)?;
            checked_duration(Duration::microseconds(total))
        }
        (Value::Duration(d), n) if matches!(op, BinOp::Div | BinOp::FloorDiv) && n.as_int().is_some() => {
            let divisor = n.as_int().unwrap_or(0);
            if divisor == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let total = micros(d)?;
            checked_duration(Duration::microseconds(total.div_euclid(divisor)))
        }

        _ => Err(unsupported(op, left, right)),
    }
}

fn micros(d: &Duration) -> Result<i64, RuntimeFault> {
    d.num_microseconds().ok_or_else(RuntimeFault::overflow)
}

/// `-x` and `+x`; `not` is handled by the interpreter through truthiness
pub fn unary_op(op: UnaryOp, operand: &Value) -> Result<Value, RuntimeFault> {
    match (op, operand) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(RuntimeFault::overflow),
        (UnaryOp::Neg, Value::Duration(d)) => checked_duration(-*d),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(*b as i64)),
        (UnaryOp::Pos, v @ (Value::Int(_) | Value::Float(_) | Value::Duration(_))) => Ok(v.clone()),
        (op, v) => Err(RuntimeFault::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            v.type_name()
        ))),
    }
}
