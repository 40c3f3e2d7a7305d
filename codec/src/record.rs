//! The common intermediate form between input and output formats.

use std::borrow::Cow;
use std::sync::LazyLock;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[allow(clippy::unwrap_used)]
static NUMERIC_LITERAL: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"^-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?$").unwrap()
});

/// A scalar cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing or explicit null.
    Null,

    /// Boolean.
    Bool(bool),

    /// Integral number.
    Integer(i64),

    /// Floating point number.
    Float(f64),

    /// Text, including numbers read from untyped formats such as CSV.
    Text(String),
}

impl Value {
    /// Build a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Whether the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Render the value as plain text (nulls become empty).
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Null => Cow::Borrowed(""),
            Self::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            Self::Integer(i) => Cow::Owned(i.to_string()),
            Self::Float(f) => Cow::Owned(f.to_string()),
            Self::Text(s) => Cow::Borrowed(s),
        }
    }

    /// Convert to a JSON value. Text that looks like a numeric literal is
    /// emitted as a number.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => numeric_literal(s)
                .map_or_else(|| serde_json::Value::String(s.clone()), serde_json::Value::Number),
        }
    }

    /// Convert from a JSON value. Nested arrays and objects are kept as
    /// compact JSON text.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None if n.is_u64() => Self::Text(n.to_string()),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            serde_json::Value::String(s) => Self::Text(s),
            nested @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Self::Text(nested.to_string())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Parse `s` as a JSON number if it matches the numeric literal pattern
/// and the number represents it exactly. Anything that would lose digits
/// as an `f64` stays text.
fn numeric_literal(s: &str) -> Option<serde_json::Number> {
    if !NUMERIC_LITERAL.is_match(s) {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(i.into());
    }
    if let Ok(u) = s.parse::<u64>() {
        return Some(u.into());
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && decimal_parts(&f.to_string()) == decimal_parts(s))
        .and_then(serde_json::Number::from_f64)
}

/// Sign, significant digits and power of ten of a decimal literal, so
/// `1e3`, `1000` and `1000.0` compare equal.
fn decimal_parts(s: &str) -> (bool, String, i64) {
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (mantissa, mut exponent) = match s.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i64>().unwrap_or(0)),
        None => (s, 0),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    exponent -= frac.len() as i64;

    let mut digits = format!("{int}{frac}").trim_start_matches('0').to_string();
    while digits.ends_with('0') {
        digits.pop();
        exponent += 1;
    }
    if digits.is_empty() {
        return (false, digits, 0);
    }
    (negative, digits, exponent)
}

/// One row: column name to value, in column order.
pub type Row = IndexMap<String, Value>;

/// Ordered rows of column-keyed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    rows: Vec<Row>,
}

impl RecordSet {
    /// Create an empty record set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row.
    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Append all rows of another record set.
    pub fn extend(&mut self, other: RecordSet) {
        self.rows.extend(other.rows);
    }

    /// The rows in order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of column names across all rows, in first-seen order.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns: IndexMap<&str, ()> = IndexMap::new();
        for row in &self.rows {
            for key in row.keys() {
                columns.entry(key.as_str()).or_insert(());
            }
        }
        columns.into_keys().collect()
    }
}

impl FromIterator<Row> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

/// Build a [`Row`] from `(column, value)` pairs.
///
/// ```
/// use autoproc_codec::{Value, row};
///
/// let r = row! { "id" => 1_i64, "name" => "x" };
/// assert_eq!(r["name"], Value::text("x"));
/// ```
#[macro_export]
macro_rules! row {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut row = $crate::Row::new();
        $(row.insert(::std::string::String::from($key), $crate::Value::from($value));)*
        row
    }};
}
