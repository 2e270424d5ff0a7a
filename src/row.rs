//! Row schemas and rows.
//!
//! A [`Row`] pairs a shared [`RowSchema`] with positionally aligned values.
//! Rows are treated as immutable once handed to a row set: the same row may
//! sit in a join cache and in a downstream buffer at the same time, so a
//! step that wants different values builds a new row.

use std::fmt;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::value::{DataType, Value};

/// Name, type and optional size hints of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    pub data_type: DataType,
    pub length: Option<u32>,
    pub precision: Option<u32>,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: None,
            precision: None,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Ordered list of fields, unique by case-insensitive name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowSchema {
    fields: Vec<FieldMeta>,
}

impl RowSchema {
    /// Build a schema, rejecting blank or duplicate field names.
    pub fn new(fields: Vec<FieldMeta>) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(PipelineError::Schema(format!(
                    "field #{} has a blank name",
                    i + 1
                )));
            }
            if fields[..i]
                .iter()
                .any(|f| f.name.eq_ignore_ascii_case(&field.name))
            {
                return Err(PipelineError::Schema(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Shorthand for tests and sources: `(name, type)` pairs.
    pub fn of(fields: &[(&str, DataType)]) -> Result<Self> {
        Self::new(
            fields
                .iter()
                .map(|(name, data_type)| FieldMeta::new(*name, *data_type))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldMeta> {
        self.fields.get(index)
    }

    /// Position of a field, matched case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// A copy of this schema with extra fields appended.
    pub fn extended(&self, extra: &[FieldMeta]) -> Result<RowSchema> {
        let mut fields = self.fields.clone();
        fields.extend_from_slice(extra);
        RowSchema::new(fields)
    }

    /// Same names and types in the same order; size hints are ignored.
    pub fn is_compatible_with(&self, other: &RowSchema) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.name.eq_ignore_ascii_case(&b.name) && a.data_type == b.data_type)
    }
}

impl fmt::Display for RowSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|field| format!("{}:{}", field.name, field.data_type))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// One tuple flowing through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: Arc<RowSchema>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row; the value count must match the schema.
    pub fn new(schema: Arc<RowSchema>, values: Vec<Value>) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(PipelineError::InvalidRow(format!(
                "{} values for schema {}",
                values.len(),
                schema
            )));
        }
        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of a named field (case-insensitive). Prefer positional access
    /// in per-row code; this does a linear search.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).and_then(|i| self.values.get(i))
    }

    /// A new row over the same schema with different values.
    pub fn with_values(&self, values: Vec<Value>) -> Result<Row> {
        Row::new(Arc::clone(&self.schema), values)
    }

    /// A new row over `schema` holding this row's values followed by `extra`.
    pub fn extended(&self, schema: Arc<RowSchema>, extra: Vec<Value>) -> Result<Row> {
        let mut values = self.values.clone();
        values.extend(extra);
        Row::new(schema, values)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}
