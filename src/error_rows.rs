//! Error-row redirection.
//!
//! When a step has an error hop, rows that fail its business rules leave
//! through that hop with four extra fields describing the failure, and the
//! step keeps going. Without an error hop the same failure is fatal; see
//! [`StepIo::handle_row_error`](crate::StepIo::handle_row_error).

use std::sync::Arc;

use crate::error::Result;
use crate::row::{FieldMeta, Row, RowSchema};
use crate::row_set::RowSet;
use crate::value::{DataType, Value};

/// Names of the appended error fields and the rejection limits.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorHandling {
    pub count_field: String,
    pub descriptions_field: String,
    pub fields_field: String,
    pub codes_field: String,
    /// Fatal once more than this many rows were rejected.
    pub max_errors: Option<u64>,
    /// Fatal once the rejected share of rows read exceeds this percentage.
    pub max_percent_errors: Option<u32>,
    /// Rows that must be read before the percentage limit applies.
    pub min_rows_for_percent: u64,
}

impl Default for ErrorHandling {
    fn default() -> Self {
        Self {
            count_field: "error_count".to_string(),
            descriptions_field: "error_descriptions".to_string(),
            fields_field: "error_fields".to_string(),
            codes_field: "error_codes".to_string(),
            max_errors: None,
            max_percent_errors: None,
            min_rows_for_percent: 0,
        }
    }
}

impl ErrorHandling {
    pub fn with_max_errors(mut self, max: u64) -> Self {
        self.max_errors = Some(max);
        self
    }

    pub fn with_max_percent_errors(mut self, percent: u32, min_rows: u64) -> Self {
        self.max_percent_errors = Some(percent);
        self.min_rows_for_percent = min_rows;
        self
    }

    fn error_fields(&self) -> [FieldMeta; 4] {
        [
            FieldMeta::new(self.count_field.clone(), DataType::Integer),
            FieldMeta::new(self.descriptions_field.clone(), DataType::String),
            FieldMeta::new(self.fields_field.clone(), DataType::String),
            FieldMeta::new(self.codes_field.clone(), DataType::String),
        ]
    }

    /// Layout of error rows produced from rows laid out as `input`.
    pub fn error_schema(&self, input: &RowSchema) -> Result<RowSchema> {
        input.extended(&self.error_fields())
    }
}

/// Description of why one row was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub count: u64,
    pub descriptions: String,
    pub fields: String,
    pub codes: String,
}

impl RowError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            count: 1,
            descriptions: description.into(),
            fields: String::new(),
            codes: String::new(),
        }
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.fields = field.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.codes = code.into();
        self
    }

    /// Fold several failures of one row into a single description.
    pub fn combine(errors: Vec<RowError>) -> Option<RowError> {
        if errors.is_empty() {
            return None;
        }
        Some(RowError {
            count: errors.iter().map(|e| e.count).sum(),
            descriptions: join_parts(&errors, |e| &e.descriptions),
            fields: join_parts(&errors, |e| &e.fields),
            codes: join_parts(&errors, |e| &e.codes),
        })
    }
}

fn join_parts(errors: &[RowError], part: impl Fn(&RowError) -> &String) -> String {
    errors
        .iter()
        .map(|e| part(e).as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The error hop of one step.
#[derive(Debug)]
pub struct ErrorRowSink {
    handling: ErrorHandling,
    row_set: RowSet,
    /// Last input layout seen and the error layout derived from it.
    layout: Option<(Arc<RowSchema>, Arc<RowSchema>)>,
}

impl ErrorRowSink {
    pub fn new(handling: ErrorHandling, row_set: RowSet) -> Self {
        Self {
            handling,
            row_set,
            layout: None,
        }
    }

    pub fn handling(&self) -> &ErrorHandling {
        &self.handling
    }

    pub fn row_set(&self) -> &RowSet {
        &self.row_set
    }

    /// The failing row with the error fields appended.
    pub fn error_row(&mut self, row: &Row, error: &RowError) -> Result<Row> {
        let schema = match &self.layout {
            Some((input, output)) if Arc::ptr_eq(input, row.schema()) => Arc::clone(output),
            _ => {
                let output = Arc::new(self.handling.error_schema(row.schema())?);
                self.layout = Some((Arc::clone(row.schema()), Arc::clone(&output)));
                output
            }
        };
        row.extended(
            schema,
            vec![
                Value::Integer(error.count as i64),
                Value::String(error.descriptions.clone()),
                Value::String(error.fields.clone()),
                Value::String(error.codes.clone()),
            ],
        )
    }
}
