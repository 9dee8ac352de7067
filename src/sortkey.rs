//! Order-preserving key encoding for the keyed store.
//!
//! Sort/group/join keys are strings compared byte-lexicographically, so
//! numbers and temporal values must be encoded such that byte order equals
//! value order:
//!
//! - integers: two's-complement bits with the sign bit flipped, as 16 hex
//!   digits, so `i64::MIN` sorts first and `i64::MAX` last;
//! - floats: the IEEE-754 total-order trick - negative values flip all
//!   bits, non-negative values flip just the sign bit - as 16 hex digits,
//!   which places negatives below zero and orders sub-unit magnitudes
//!   correctly;
//! - dates/times/datetimes: fixed-width ISO strings.
//!
//! A fixed-width, zero-padded original-row-index suffix makes computed keys
//! injective with respect to input order, giving deterministic stable
//! ordering on ties.

use crate::value::{Row, Value};
use anyhow::{Result, bail};

/// Encode a value so byte-lexicographic order matches value order.
pub fn sortable(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Integer(i) => format!("{:016x}", (*i as u64) ^ (1u64 << 63)),
        Value::Number(n) => {
            let bits = n.to_bits();
            let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1u64 << 63) };
            format!("{ordered:016x}")
        }
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => t.format("%H:%M:%S%.9f").to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.9f").to_string(),
        Value::String(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}

/// The fixed-width original-row-index suffix appended for stable ordering.
pub fn stable_suffix(index: usize) -> String {
    format!("{index:08x}")
}

#[derive(Clone, Debug)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A `{field}` template expanded against each row to produce a store key.
///
/// `key` encodes substitutions with [`sortable`]; `plain` uses the value's
/// display form (for printf-style formatting).
#[derive(Clone, Debug)]
pub struct KeyCalc {
    segments: Vec<Segment>,
}

impl KeyCalc {
    /// Parse a `{field}` template. Unbalanced braces are an error.
    pub fn new(spec: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = spec.chars();
        while let Some(c) = chars.next() {
            if c == '{' {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    bail!("unbalanced '{{' in key template {spec:?}");
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field(name));
            } else if c == '}' {
                bail!("unbalanced '}}' in key template {spec:?}");
            } else {
                literal.push(c);
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Build a template from a list of field names, joined with `:`.
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments = fields
            .into_iter()
            .enumerate()
            .flat_map(|(i, f)| {
                let field = Segment::Field(f.as_ref().to_string());
                if i == 0 {
                    vec![field]
                } else {
                    vec![Segment::Literal(":".to_string()), field]
                }
            })
            .collect();
        Self { segments }
    }

    fn expand(&self, row: &Row, encode: fn(&Value) -> String) -> Result<String> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Field(name) => match row.get(name) {
                    Some(v) => out.push_str(&encode(v)),
                    None => bail!("key template references missing field {name:?}"),
                },
            }
        }
        Ok(out)
    }

    /// Expand the template with order-preserving encoding.
    pub fn key(&self, row: &Row) -> Result<String> {
        self.expand(row, sortable)
    }

    /// Expand the template with plain display formatting.
    pub fn plain(&self, row: &Row) -> Result<String> {
        self.expand(row, |v| v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn enc(n: f64) -> String {
        sortable(&Value::Number(n))
    }

    #[test]
    fn float_encoding_orders_correctly() {
        let values = [-1_000_000.0, -0.1, 0.0, 0.1, 1_000_000.0];
        let mut encoded: Vec<String> = values.iter().map(|v| enc(*v)).collect();
        let sorted = encoded.clone();
        encoded.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn integer_encoding_orders_correctly() {
        let values = [i64::MIN, -5, -1, 0, 1, 42, i64::MAX];
        let encoded: Vec<String> = values
            .iter()
            .map(|v| sortable(&Value::Integer(*v)))
            .collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn temporal_encoding_is_fixed_width() {
        let a = sortable(&Value::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap()));
        let b = sortable(&Value::Date(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn template_expansion() {
        let kc = KeyCalc::new("{b}{a}").unwrap();
        let mut row = Row::new();
        row.insert("a".into(), Value::String("x".into()));
        row.insert("b".into(), Value::String("y".into()));
        assert_eq!(kc.key(&row).unwrap(), "yx");

        let kc = KeyCalc::from_fields(["a", "b"]);
        assert_eq!(kc.key(&row).unwrap(), "x:y");
    }

    #[test]
    fn missing_field_is_an_error() {
        let kc = KeyCalc::new("{nope}").unwrap();
        assert!(kc.key(&Row::new()).is_err());
    }

    #[test]
    fn unbalanced_braces_rejected() {
        assert!(KeyCalc::new("{open").is_err());
        assert!(KeyCalc::new("close}").is_err());
    }
}
