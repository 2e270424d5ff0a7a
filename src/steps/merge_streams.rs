//! Appends several streams into one over their union layout.

use std::sync::Arc;

use log::debug;

use crate::error::{PipelineError, Result};
use crate::row::RowSchema;
use crate::schema_merge::{MergedSchema, SchemaMerger};
use crate::step::{InitContext, InputLayout, Step, check_layout};
use crate::step_io::StepIo;

/// Reads every input round-robin and re-lays each row over the merged
/// layout. Fields two inputs disagree on become strings.
#[derive(Debug, Default)]
pub struct MergeStreams {
    /// Layout per input, in hop order.
    resolved: Vec<Option<Arc<RowSchema>>>,
    /// Inputs whose first row was checked against `resolved`.
    checked: Vec<bool>,
    merged: Option<MergedSchema>,
}

impl MergeStreams {
    pub fn new() -> Self {
        Self::default()
    }

    fn merge(inputs: &[InputLayout]) -> Result<MergedSchema> {
        let layouts: Vec<Option<&RowSchema>> =
            inputs.iter().map(|input| input.schema.as_deref()).collect();
        SchemaMerger::union().merge(&layouts)
    }
}

impl Step for MergeStreams {
    fn kind(&self) -> &'static str {
        "MergeStreams"
    }

    fn fields(&self, inputs: &[InputLayout]) -> Result<Option<Arc<RowSchema>>> {
        Ok(Some(Arc::clone(Self::merge(inputs)?.schema())))
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        if ctx.inputs.is_empty() {
            return Err(ctx.config_error("no input streams"));
        }
        let merged = Self::merge(ctx.inputs).map_err(|e| ctx.config_error(e.to_string()))?;
        debug!(
            "{}: merging {} streams into {}",
            ctx.step_name,
            ctx.inputs.len(),
            merged.schema()
        );
        self.resolved = ctx.inputs.iter().map(|input| input.schema.clone()).collect();
        self.checked = vec![false; ctx.inputs.len()];
        self.merged = Some(merged);
        Ok(())
    }

    fn process(&mut self, io: &mut StepIo) -> Result<bool> {
        let Some((input, row)) = io.get_row_with_input() else {
            return Ok(false);
        };
        let Some(merged) = &self.merged else {
            return Err(PipelineError::row(io.name(), "merge layout not resolved"));
        };
        if !self.checked.get(input).copied().unwrap_or(true) {
            let resolved = self.resolved.get(input).and_then(Option::as_deref);
            if resolved.is_none() {
                return Err(PipelineError::row(
                    io.name(),
                    format!("input #{} has no resolved layout", input + 1),
                ));
            }
            check_layout(io.name(), io.catalog().as_ref(), resolved, row.schema())?;
            self.checked[input] = true;
        }
        let out = merged.apply(input, &row)?;
        io.put_row(out);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{Harness, rows, schema};
    use crate::value::{DataType, Value};

    #[test]
    fn test_merges_and_widens() {
        let a = schema(&[("id", DataType::Integer), ("a", DataType::String)]);
        let b = schema(&[("id", DataType::String), ("b", DataType::Boolean)]);
        let out = Harness::new()
            .input("a", rows(&a, vec![vec![Value::Integer(1), Value::from("x")]]))
            .input("b", rows(&b, vec![vec![Value::from("k2"), Value::Boolean(true)]]))
            .run(&mut MergeStreams::new())
            .unwrap();
        let mut got: Vec<Vec<Value>> = out.outputs[0].iter().map(|r| r.values().to_vec()).collect();
        got.sort_by(|x, y| x[0].compare(&y[0]));
        assert_eq!(
            got,
            vec![
                vec![Value::from("1"), Value::from("x"), Value::Null],
                vec![Value::from("k2"), Value::Null, Value::Boolean(true)],
            ]
        );
        assert_eq!(out.outputs[0][0].schema().names(), vec!["id", "a", "b"]);
    }

    #[test]
    fn test_no_layout_is_config_error() {
        let harness = Harness::new().input("a", vec![]).input("b", vec![]);
        let err = harness.init(&mut MergeStreams::new()).unwrap_err();
        assert!(err.is_config());
    }
}
