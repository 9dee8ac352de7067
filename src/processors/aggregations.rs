//! Aggregation catalog for group/join operations.
//!
//! Each aggregation is a fold over the values sharing a group/join key,
//! plus a finalizer applied when the aggregate is emitted. Intermediate
//! state is stored as plain [`Value`]s so it survives the keyed store's
//! spill round-trip.

use crate::schema::FieldType;
use crate::value::Value;
use anyhow::{Result, bail};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A fold function (plus finalizer) combining row values under one key.
#[derive(Clone, Debug, PartialEq)]
pub enum Aggregation {
    Sum,
    Avg,
    Median,
    Max,
    Min,
    First,
    Last,
    Any,
    Count,
    /// Distinct values, in first-seen order.
    Set,
    /// All values, in arrival order.
    Array,
    /// Frequency counter; finalizes to `[value, count]` pairs, most
    /// frequent first.
    Counters,
    /// Concatenate string forms with a separator.
    JoinStrings(String),
    /// Emit a constant, ignoring incoming values.
    Const(Value),
    /// Printf-style `{field}` template expanded against each source row;
    /// last expansion wins.
    Format(String),
    /// Product of the incoming values.
    Product,
}

impl Aggregation {
    /// Fold one incoming value into the current state.
    pub fn step(&self, curr: Option<Value>, new: Value) -> Result<Value> {
        match self {
            Aggregation::Sum => fold_numeric(curr, new, false),
            Aggregation::Product => fold_numeric(curr, new, true),
            Aggregation::Avg => {
                let (count, sum) = match curr {
                    Some(Value::Array(state)) if state.len() == 2 => {
                        let c = state[0].as_f64().unwrap_or(0.0);
                        let s = state[1].as_f64().unwrap_or(0.0);
                        (c, s)
                    }
                    _ => (0.0, 0.0),
                };
                let Some(v) = new.as_f64() else {
                    bail!("avg aggregation over non-numeric value {new:?}");
                };
                Ok(Value::Array(vec![
                    Value::Number(count + 1.0),
                    Value::Number(sum + v),
                ]))
            }
            Aggregation::Median | Aggregation::Array => {
                let mut items = as_array_state(curr);
                items.push(new);
                Ok(Value::Array(items))
            }
            Aggregation::Set => {
                let mut items = as_array_state(curr);
                if !items.contains(&new) {
                    items.push(new);
                }
                Ok(Value::Array(items))
            }
            Aggregation::Max => Ok(pick(curr, new, Ordering::Greater)),
            Aggregation::Min => Ok(pick(curr, new, Ordering::Less)),
            Aggregation::First => Ok(curr.unwrap_or(new)),
            Aggregation::Last | Aggregation::Any | Aggregation::Const(_) | Aggregation::Format(_) => {
                Ok(new)
            }
            Aggregation::Count => {
                let n = match curr {
                    Some(Value::Integer(n)) => n,
                    _ => 0,
                };
                Ok(Value::Integer(n + 1))
            }
            Aggregation::Counters => {
                let mut counts = match curr {
                    Some(Value::Object(map)) => map,
                    _ => BTreeMap::new(),
                };
                // A single value counts once; an array updates per element.
                let increments: Vec<Value> = match new {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                for item in increments {
                    let key = item.to_string();
                    let slot = counts.entry(key).or_insert(Value::Integer(0));
                    if let Value::Integer(n) = slot {
                        *slot = Value::Integer(*n + 1);
                    }
                }
                Ok(Value::Object(counts))
            }
            Aggregation::JoinStrings(_) => {
                let mut items = as_array_state(curr);
                items.push(Value::String(new.to_string()));
                Ok(Value::Array(items))
            }
        }
    }

    /// Finalize the folded state into the emitted value.
    pub fn finalize(&self, state: Value) -> Value {
        match self {
            Aggregation::Avg => match &state {
                Value::Array(parts) if parts.len() == 2 => {
                    let count = parts[0].as_f64().unwrap_or(0.0);
                    let sum = parts[1].as_f64().unwrap_or(0.0);
                    if count == 0.0 {
                        Value::Null
                    } else {
                        Value::Number(sum / count)
                    }
                }
                _ => Value::Null,
            },
            Aggregation::Median => match state {
                Value::Array(mut items) if !items.is_empty() => {
                    items.sort_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal));
                    let mid = items.len() / 2;
                    if items.len() % 2 == 1 {
                        items[mid].clone()
                    } else {
                        let lo = items[mid - 1].as_f64();
                        let hi = items[mid].as_f64();
                        match (lo, hi) {
                            (Some(a), Some(b)) => Value::Number((a + b) / 2.0),
                            _ => items[mid - 1].clone(),
                        }
                    }
                }
                _ => Value::Null,
            },
            Aggregation::Set | Aggregation::Array => match state {
                v @ Value::Array(_) => v,
                _ => Value::Array(Vec::new()),
            },
            Aggregation::Counters => match state {
                Value::Object(counts) => {
                    let mut pairs: Vec<(String, i64)> = counts
                        .into_iter()
                        .map(|(k, v)| match v {
                            Value::Integer(n) => (k, n),
                            _ => (k, 0),
                        })
                        .collect();
                    // Most common first; ties by key for determinism.
                    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                    Value::Array(
                        pairs
                            .into_iter()
                            .map(|(k, n)| {
                                Value::Array(vec![Value::String(k), Value::Integer(n)])
                            })
                            .collect(),
                    )
                }
                _ => Value::Array(Vec::new()),
            },
            Aggregation::JoinStrings(sep) => match state {
                Value::Array(items) => Value::String(
                    items
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(sep),
                ),
                other => other,
            },
            _ => state,
        }
    }

    /// Declared type of the aggregated output field; `None` means the
    /// source field's type is copied.
    pub fn data_type(&self) -> Option<FieldType> {
        match self {
            Aggregation::Count => Some(FieldType::Integer),
            Aggregation::Set | Aggregation::Array | Aggregation::Counters => Some(FieldType::Array),
            Aggregation::JoinStrings(_) | Aggregation::Format(_) => Some(FieldType::String),
            Aggregation::Const(_) => Some(FieldType::Any),
            _ => None,
        }
    }

    /// Whether the source field's declaration (format etc.) carries over
    /// to the output field.
    pub fn copy_properties(&self) -> bool {
        matches!(
            self,
            Aggregation::Median | Aggregation::First | Aggregation::Last | Aggregation::Any
        )
    }
}

fn as_array_state(curr: Option<Value>) -> Vec<Value> {
    match curr {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn pick(curr: Option<Value>, new: Value, keep_new_when: Ordering) -> Value {
    match curr {
        None | Some(Value::Null) => new,
        Some(curr) => match new.compare(&curr) {
            Some(ord) if ord == keep_new_when => new,
            _ => curr,
        },
    }
}

fn fold_numeric(curr: Option<Value>, new: Value, multiply: bool) -> Result<Value> {
    let curr = match curr {
        None | Some(Value::Null) => return Ok(new),
        Some(c) => c,
    };
    match (&curr, &new) {
        (Value::Integer(a), Value::Integer(b)) => {
            let folded = if multiply {
                a.checked_mul(*b)
            } else {
                a.checked_add(*b)
            };
            Ok(match folded {
                Some(n) => Value::Integer(n),
                // Integer overflow widens to a float instead of wrapping.
                None => {
                    let (a, b) = (*a as f64, *b as f64);
                    Value::Number(if multiply { a * b } else { a + b })
                }
            })
        }
        _ => {
            let (Some(a), Some(b)) = (curr.as_f64(), new.as_f64()) else {
                bail!("numeric aggregation over non-numeric value {new:?}");
            };
            Ok(Value::Number(if multiply { a * b } else { a + b }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(agg: &Aggregation, values: Vec<Value>) -> Value {
        let mut state = None;
        for v in values {
            state = Some(agg.step(state, v).unwrap());
        }
        agg.finalize(state.unwrap())
    }

    #[test]
    fn sum_keeps_integers_integral() {
        let out = fold(&Aggregation::Sum, vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(out, Value::Integer(3));
        let out = fold(&Aggregation::Sum, vec![Value::Integer(1), Value::Number(0.5)]);
        assert_eq!(out, Value::Number(1.5));
    }

    #[test]
    fn avg_and_median() {
        let out = fold(
            &Aggregation::Avg,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)],
        );
        assert_eq!(out, Value::Number(2.0));

        let out = fold(
            &Aggregation::Median,
            vec![Value::Integer(9), Value::Integer(1), Value::Integer(5)],
        );
        assert_eq!(out, Value::Integer(5));

        let out = fold(
            &Aggregation::Median,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3), Value::Integer(4)],
        );
        assert_eq!(out, Value::Number(2.5));
    }

    #[test]
    fn count_ignores_values() {
        let out = fold(
            &Aggregation::Count,
            vec![Value::Null, Value::String("x".into()), Value::Integer(4)],
        );
        assert_eq!(out, Value::Integer(3));
    }

    #[test]
    fn set_deduplicates_in_first_seen_order() {
        let out = fold(
            &Aggregation::Set,
            vec![Value::Integer(2), Value::Integer(1), Value::Integer(2)],
        );
        assert_eq!(out, Value::Array(vec![Value::Integer(2), Value::Integer(1)]));
    }

    #[test]
    fn counters_order_by_frequency() {
        let out = fold(
            &Aggregation::Counters,
            vec!["b".into(), "a".into(), "b".into()],
        );
        assert_eq!(
            out,
            Value::Array(vec![
                Value::Array(vec!["b".into(), Value::Integer(2)]),
                Value::Array(vec!["a".into(), Value::Integer(1)]),
            ])
        );
    }

    #[test]
    fn join_strings() {
        let out = fold(
            &Aggregation::JoinStrings(", ".into()),
            vec!["a".into(), Value::Integer(2)],
        );
        assert_eq!(out, Value::String("a, 2".into()));
    }

    #[test]
    fn sum_widens_on_integer_overflow() {
        let out = fold(
            &Aggregation::Sum,
            vec![Value::Integer(i64::MAX), Value::Integer(1)],
        );
        assert_eq!(out, Value::Number(i64::MAX as f64 + 1.0));

        let out = fold(
            &Aggregation::Product,
            vec![Value::Integer(i64::MAX), Value::Integer(2)],
        );
        assert_eq!(out, Value::Number(i64::MAX as f64 * 2.0));
    }

    #[test]
    fn product() {
        let out = fold(
            &Aggregation::Product,
            vec![Value::Integer(3), Value::Integer(4)],
        );
        assert_eq!(out, Value::Integer(12));
    }
}
