//! Reconciles the layouts of several input streams into one.
//!
//! Two modes share the same result shape:
//!
//! - [`MergeMode::Union`]: fields with the same name collapse onto one
//!   position. When two streams disagree on the type, the unified field
//!   becomes a String and every contribution whose native type is not
//!   String is marked for conversion at runtime.
//! - [`MergeMode::Concat`]: every field of every stream gets its own
//!   position; repeated names receive a `_1`, `_2`, ... suffix.
//!
//! The result is a pure function of the inputs and their order.

use std::sync::Arc;

use log::debug;

use crate::error::{PipelineError, Result};
use crate::row::{FieldMeta, Row, RowSchema};
use crate::value::{DataType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Union,
    Concat,
}

/// Unified schema plus the per-stream placement of every source field.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSchema {
    schema: Arc<RowSchema>,
    /// `mapping[stream][field]` is the unified position of that field.
    /// Empty for absent streams.
    mapping: Vec<Vec<usize>>,
    /// `conversions[stream][field]` is true when values must be converted
    /// to string before they land in the unified row.
    conversions: Vec<Vec<bool>>,
}

impl MergedSchema {
    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    pub fn mapping(&self, stream: usize) -> &[usize] {
        self.mapping.get(stream).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn needs_conversion(&self, stream: usize, field: usize) -> bool {
        self.conversions
            .get(stream)
            .and_then(|c| c.get(field))
            .copied()
            .unwrap_or(false)
    }

    pub fn stream_count(&self) -> usize {
        self.mapping.len()
    }

    /// Place one row of `stream` into a unified row. Positions the stream
    /// does not cover are `Null`.
    pub fn apply(&self, stream: usize, row: &Row) -> Result<Row> {
        let mut values = vec![Value::Null; self.schema.len()];
        self.place(stream, row, &mut values)?;
        Row::new(Arc::clone(&self.schema), values)
    }

    /// Concatenate one row per stream (in stream order) into a unified row.
    pub fn combine(&self, rows: &[&Row]) -> Result<Row> {
        let mut values = vec![Value::Null; self.schema.len()];
        for (stream, row) in rows.iter().enumerate() {
            self.place(stream, row, &mut values)?;
        }
        Row::new(Arc::clone(&self.schema), values)
    }

    fn place(&self, stream: usize, row: &Row, values: &mut [Value]) -> Result<()> {
        let mapping = self.mapping(stream);
        if mapping.len() != row.len() {
            return Err(PipelineError::InvalidRow(format!(
                "stream {stream} row has {} values, merged layout expects {}",
                row.len(),
                mapping.len()
            )));
        }
        for (field, value) in row.values().iter().enumerate() {
            values[mapping[field]] = if self.conversions[stream][field] {
                value.to_string_value()
            } else {
                value.clone()
            };
        }
        Ok(())
    }
}

/// Builds [`MergedSchema`]s.
#[derive(Debug, Clone, Copy)]
pub struct SchemaMerger {
    mode: MergeMode,
}

impl SchemaMerger {
    pub fn new(mode: MergeMode) -> Self {
        Self { mode }
    }

    pub fn union() -> Self {
        Self::new(MergeMode::Union)
    }

    pub fn concat() -> Self {
        Self::new(MergeMode::Concat)
    }

    /// Merge the given input layouts. `None` marks a stream with no known
    /// layout this run; it maps nothing.
    pub fn merge(&self, inputs: &[Option<&RowSchema>]) -> Result<MergedSchema> {
        if inputs.iter().all(Option::is_none) {
            return Err(PipelineError::Schema(
                "cannot resolve output layout: no input stream has a layout".to_string(),
            ));
        }

        let mut unified: Vec<FieldMeta> = Vec::new();
        let mut mapping: Vec<Vec<usize>> = Vec::with_capacity(inputs.len());

        for input in inputs {
            let Some(schema) = input else {
                mapping.push(Vec::new());
                continue;
            };
            let mut positions = Vec::with_capacity(schema.len());
            for field in schema.fields() {
                let existing = unified
                    .iter()
                    .position(|f| f.name.eq_ignore_ascii_case(&field.name));
                let position = match (self.mode, existing) {
                    (MergeMode::Union, Some(pos)) => {
                        if unified[pos].data_type != field.data_type {
                            debug!(
                                "field '{}' is {} and {}; widening to String",
                                field.name, unified[pos].data_type, field.data_type
                            );
                            unified[pos] = FieldMeta::new(unified[pos].name.clone(), DataType::String);
                        }
                        pos
                    }
                    (MergeMode::Concat, Some(_)) => {
                        let mut renamed = field.clone();
                        renamed.name = unique_name(&unified, &field.name);
                        unified.push(renamed);
                        unified.len() - 1
                    }
                    (_, None) => {
                        unified.push(field.clone());
                        unified.len() - 1
                    }
                };
                positions.push(position);
            }
            mapping.push(positions);
        }

        // Conversions are decided after all promotions: a stream merged
        // early may feed a field that a later stream widened.
        let conversions = inputs
            .iter()
            .zip(&mapping)
            .map(|(input, positions)| match input {
                Some(schema) => schema
                    .fields()
                    .iter()
                    .zip(positions)
                    .map(|(field, &pos)| {
                        unified[pos].data_type == DataType::String
                            && field.data_type != DataType::String
                    })
                    .collect(),
                None => Vec::new(),
            })
            .collect();

        Ok(MergedSchema {
            schema: Arc::new(RowSchema::new(unified)?),
            mapping,
            conversions,
        })
    }
}

fn unique_name(fields: &[FieldMeta], base: &str) -> String {
    let taken = |name: &str| fields.iter().any(|f| f.name.eq_ignore_ascii_case(name));
    let mut n = 1;
    loop {
        let candidate = format!("{base}_{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(fields: &[(&str, DataType)]) -> RowSchema {
        RowSchema::of(fields).unwrap()
    }

    #[test]
    fn test_union_widens_conflicting_type() {
        let a = schema(&[("x", DataType::Integer), ("a", DataType::String)]);
        let b = schema(&[("x", DataType::String), ("b", DataType::Number)]);
        let merged = SchemaMerger::union().merge(&[Some(&a), Some(&b)]).unwrap();

        assert_eq!(merged.schema().names(), vec!["x", "a", "b"]);
        assert_eq!(merged.schema().field(0).unwrap().data_type, DataType::String);
        assert_eq!(merged.mapping(0), &[0, 1]);
        assert_eq!(merged.mapping(1), &[0, 2]);
        assert!(merged.needs_conversion(0, 0));
        assert!(!merged.needs_conversion(1, 0));
        assert!(!merged.needs_conversion(1, 1));
    }

    #[test]
    fn test_union_same_type_no_conversion() {
        let a = schema(&[("id", DataType::Integer)]);
        let b = schema(&[("ID", DataType::Integer), ("v", DataType::Boolean)]);
        let merged = SchemaMerger::union().merge(&[Some(&a), Some(&b)]).unwrap();
        assert_eq!(merged.schema().names(), vec!["id", "v"]);
        assert_eq!(merged.schema().field(0).unwrap().data_type, DataType::Integer);
        assert!(!merged.needs_conversion(1, 0));
    }

    #[test]
    fn test_union_is_deterministic() {
        let a = schema(&[("x", DataType::Integer)]);
        let b = schema(&[("x", DataType::Date), ("y", DataType::String)]);
        let merger = SchemaMerger::union();
        let first = merger.merge(&[Some(&a), None, Some(&b)]).unwrap();
        let second = merger.merge(&[Some(&a), None, Some(&b)]).unwrap();
        assert_eq!(first, second);
        assert!(first.mapping(1).is_empty());
    }

    #[test]
    fn test_absent_first_stream_seeds_from_next() {
        let b = schema(&[("y", DataType::String), ("x", DataType::Integer)]);
        let merged = SchemaMerger::union().merge(&[None, Some(&b)]).unwrap();
        assert_eq!(merged.schema().names(), vec!["y", "x"]);
    }

    #[test]
    fn test_all_absent_is_an_error() {
        let err = SchemaMerger::union().merge(&[None, None]);
        assert!(matches!(err, Err(PipelineError::Schema(_))));
        assert!(SchemaMerger::concat().merge(&[]).is_err());
    }

    #[test]
    fn test_concat_renames_duplicates() {
        let a = schema(&[("k", DataType::Integer), ("k_1", DataType::String)]);
        let b = schema(&[("k", DataType::String)]);
        let merged = SchemaMerger::concat().merge(&[Some(&a), Some(&b)]).unwrap();
        assert_eq!(merged.schema().names(), vec!["k", "k_1", "k_2"]);
        assert_eq!(merged.mapping(1), &[2]);
        assert!(!merged.needs_conversion(0, 0));
    }

    #[test]
    fn test_apply_converts_marked_values() {
        let a = schema(&[("x", DataType::Integer)]);
        let b = schema(&[("x", DataType::String), ("y", DataType::String)]);
        let merged = SchemaMerger::union().merge(&[Some(&a), Some(&b)]).unwrap();
        let row = Row::new(Arc::new(a), vec![Value::Integer(12)]).unwrap();
        let out = merged.apply(0, &row).unwrap();
        assert_eq!(out.values(), &[Value::from("12"), Value::Null]);
    }

    #[test]
    fn test_combine_concatenates_in_stream_order() {
        let a = schema(&[("k", DataType::Integer)]);
        let b = schema(&[("x", DataType::String)]);
        let merged = SchemaMerger::concat().merge(&[Some(&a), Some(&b)]).unwrap();
        let ra = Row::new(Arc::new(a), vec![Value::Integer(1)]).unwrap();
        let rb = Row::new(Arc::new(b), vec![Value::from("a")]).unwrap();
        let out = merged.combine(&[&ra, &rb]).unwrap();
        assert_eq!(out.values(), &[Value::Integer(1), Value::from("a")]);
    }

    #[test]
    fn test_apply_rejects_wrong_arity() {
        let a = schema(&[("x", DataType::Integer)]);
        let merged = SchemaMerger::union().merge(&[Some(&a)]).unwrap();
        let wide = schema(&[("x", DataType::Integer), ("y", DataType::Integer)]);
        let row = Row::new(Arc::new(wide), vec![Value::Integer(1), Value::Integer(2)]).unwrap();
        assert!(merged.apply(0, &row).is_err());
    }
}
