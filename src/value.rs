//! Typed scalar values carried by rows.

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Layout used when a date is rendered to or parsed from text.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "String",
            DataType::Integer => "Integer",
            DataType::Number => "Number",
            DataType::Boolean => "Boolean",
            DataType::Date => "Date",
        }
    }

    /// Parse a type name as written in delimited-file headers.
    pub fn from_name(name: &str) -> Option<DataType> {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Some(DataType::String),
            "integer" | "int" => Some(DataType::Integer),
            "number" | "float" | "double" => Some(DataType::Number),
            "boolean" | "bool" => Some(DataType::Boolean),
            "date" => Some(DataType::Date),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value in a row. `Null` is valid for every field type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Date(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The natural type of this value, `None` for `Null`.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::String(_) => Some(DataType::String),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Number(_) => Some(DataType::Number),
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Date(_) => Some(DataType::Date),
        }
    }

    /// Text form of the value, `None` for `Null`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Boolean(b) => Some(if *b { "Y" } else { "N" }.to_string()),
            Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
        }
    }

    /// Convert to a `Value::String`, keeping `Null` as `Null`.
    ///
    /// This is the runtime conversion applied to fields widened to string
    /// during a schema merge.
    pub fn to_string_value(&self) -> Value {
        match self.as_text() {
            Some(text) => Value::String(text),
            None => Value::Null,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Parse text into a value of the requested type.
    ///
    /// An empty cell is `Null`. Returns a description of the problem when the
    /// text does not fit the type.
    pub fn parse(text: &str, data_type: DataType) -> Result<Value, String> {
        if text.is_empty() {
            return Ok(Value::Null);
        }
        let trimmed = text.trim();
        match data_type {
            DataType::String => Ok(Value::String(text.to_string())),
            DataType::Integer => trimmed
                .parse()
                .map(Value::Integer)
                .map_err(|_| format!("'{text}' is not an Integer")),
            DataType::Number => trimmed
                .parse()
                .map(Value::Number)
                .map_err(|_| format!("'{text}' is not a Number")),
            DataType::Boolean => match trimmed.to_ascii_uppercase().as_str() {
                "Y" | "YES" | "TRUE" | "1" => Ok(Value::Boolean(true)),
                "N" | "NO" | "FALSE" | "0" => Ok(Value::Boolean(false)),
                _ => Err(format!("'{text}' is not a Boolean")),
            },
            DataType::Date => NaiveDateTime::parse_from_str(trimmed, DATE_FORMAT)
                .or_else(|_| {
                    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                        .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
                })
                .map(Value::Date)
                .map_err(|_| format!("'{text}' is not a Date")),
        }
    }

    /// Compare two values.
    ///
    /// `Null` sorts before everything else. Integers and numbers compare
    /// numerically; other mixed-type pairs compare by their text form.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Integer(_) | Value::Number(_), Value::Integer(_) | Value::Number(_)) => {
                let a = self.as_f64().unwrap_or(f64::NAN);
                let b = other.as_f64().unwrap_or(f64::NAN);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            _ => self.as_text().cmp(&other.as_text()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str(""),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
