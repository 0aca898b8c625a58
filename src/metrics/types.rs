use std::collections::BTreeMap;

use rusqlite::types::ValueRef;
use serde::Serialize;

/// One SQL scalar as it leaves the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Datum {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl Datum {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int(i) => Some(*i as f64),
            Datum::Float(f) => Some(*f),
            Datum::Text(_) | Datum::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Numeric value with NULL read as zero.
    pub fn or_zero(&self) -> f64 {
        self.as_f64().unwrap_or(0.0)
    }
}

impl From<ValueRef<'_>> for Datum {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Datum::Null,
            ValueRef::Integer(i) => Datum::Int(i),
            ValueRef::Real(f) => Datum::Float(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Datum::Text(String::from_utf8_lossy(t).into_owned())
            }
        }
    }
}

impl From<i64> for Datum {
    fn from(i: i64) -> Self {
        Datum::Int(i)
    }
}

impl From<f64> for Datum {
    fn from(f: f64) -> Self {
        Datum::Float(f)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::Text(s.to_string())
    }
}

impl From<Option<f64>> for Datum {
    fn from(f: Option<f64>) -> Self {
        f.map(Datum::Float).unwrap_or(Datum::Null)
    }
}

impl std::fmt::Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Datum::Int(i) => write!(f, "{i}"),
            Datum::Float(x) => write!(f, "{x}"),
            Datum::Text(s) => f.write_str(s),
            Datum::Null => f.write_str("null"),
        }
    }
}

/// Value of one output field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(Datum),
    List(Vec<Datum>),
    /// One series per group key, index-aligned with the key list.
    Grouped(Vec<Vec<Datum>>),
}

/// Output of `get_agg`, `get_ts` and `get_list`: field name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricResult(BTreeMap<String, FieldValue>);

impl MetricResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn scalar(&self, field: &str) -> Option<&Datum> {
        match self.0.get(field) {
            Some(FieldValue::Scalar(d)) => Some(d),
            _ => None,
        }
    }

    pub fn list(&self, field: &str) -> Option<&[Datum]> {
        match self.0.get(field) {
            Some(FieldValue::List(v)) => Some(v),
            _ => None,
        }
    }

    pub fn grouped(&self, field: &str) -> Option<&[Vec<Datum>]> {
        match self.0.get(field) {
            Some(FieldValue::Grouped(v)) => Some(v),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `numerator / denominator`, or `None` when the denominator is zero.
///
/// This is the one divide-by-zero sentinel for every ratio in the crate
/// (BMI, percentage change); it serializes as JSON `null`.
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}
