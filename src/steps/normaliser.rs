//! Turns columns into rows.
//!
//! Given `(source field, type value, target field)` mappings, every input
//! row becomes one output row per distinct type value. Each output row
//! holds the fields that are not normalised, the type field carrying the
//! type value, then one column per distinct target field filled from the
//! source field mapped to that type and target (`Null` when none is).
//!
//! ```text
//! region | q1_sales | q2_sales      region | quarter | sales
//! north  | 10       | 20        =>  north  | Q1      | 10
//!                                   north  | Q2      | 20
//! ```

use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::messages::{self, MessageCatalog};
use crate::row::{FieldMeta, Row, RowSchema};
use crate::step::{Binding, InitContext, InputLayout, Step, check_layout};
use crate::step_io::StepIo;
use crate::value::{DataType, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormaliserField {
    pub source: String,
    pub type_value: String,
    pub target: String,
}

impl NormaliserField {
    pub fn new(
        source: impl Into<String>,
        type_value: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            type_value: type_value.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormaliserConfig {
    /// Name of the output field holding the type value.
    pub type_field: String,
    pub fields: Vec<NormaliserField>,
}

impl NormaliserConfig {
    pub fn new(type_field: impl Into<String>) -> Self {
        Self {
            type_field: type_field.into(),
            fields: Vec::new(),
        }
    }

    pub fn map(
        mut self,
        source: impl Into<String>,
        type_value: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.fields.push(NormaliserField::new(source, type_value, target));
        self
    }

    /// Distinct type values in first-mention order.
    fn type_values(&self) -> Vec<&str> {
        let mut values: Vec<&str> = Vec::new();
        for f in &self.fields {
            if !values.contains(&f.type_value.as_str()) {
                values.push(&f.type_value);
            }
        }
        values
    }

    /// Distinct target fields in first-mention order (case-insensitive).
    fn targets(&self) -> Vec<&NormaliserField> {
        let mut targets: Vec<&NormaliserField> = Vec::new();
        for f in &self.fields {
            if !targets.iter().any(|t| t.target.eq_ignore_ascii_case(&f.target)) {
                targets.push(f);
            }
        }
        targets
    }
}

/// Positions resolved against one input layout.
#[derive(Debug)]
struct Plan {
    output: Arc<RowSchema>,
    /// Input positions copied unchanged.
    kept: Vec<usize>,
    /// Per type value: the input position feeding each target, if any.
    groups: Vec<(Value, Vec<Option<usize>>)>,
}

impl Plan {
    fn build(config: &NormaliserConfig, input: &RowSchema) -> Result<Plan> {
        let mut sources = Vec::with_capacity(config.fields.len());
        for f in &config.fields {
            let index = input.index_of(&f.source).ok_or_else(|| {
                PipelineError::Schema(format!("normalised field '{}' not found in {input}", f.source))
            })?;
            sources.push(index);
        }

        let kept: Vec<usize> = (0..input.len()).filter(|i| !sources.contains(i)).collect();
        let targets = config.targets();

        let mut fields: Vec<FieldMeta> = kept
            .iter()
            .filter_map(|&i| input.field(i).cloned())
            .collect();
        fields.push(FieldMeta::new(config.type_field.clone(), DataType::String));
        for target in &targets {
            let data_type = input
                .index_of(&target.source)
                .and_then(|i| input.field(i))
                .map(|f| f.data_type)
                .unwrap_or(DataType::String);
            fields.push(FieldMeta::new(target.target.clone(), data_type));
        }

        let groups = config
            .type_values()
            .into_iter()
            .map(|type_value| {
                let positions = targets
                    .iter()
                    .map(|target| {
                        config
                            .fields
                            .iter()
                            .zip(&sources)
                            .find(|(f, _)| {
                                f.type_value == type_value
                                    && f.target.eq_ignore_ascii_case(&target.target)
                            })
                            .map(|(_, &index)| index)
                    })
                    .collect();
                (Value::from(type_value), positions)
            })
            .collect();

        Ok(Plan {
            output: Arc::new(RowSchema::new(fields)?),
            kept,
            groups,
        })
    }

    fn rows(&self, row: &Row) -> Result<Vec<Row>> {
        self.groups
            .iter()
            .map(|(type_value, positions)| {
                let mut values: Vec<Value> = self
                    .kept
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                    .collect();
                values.push(type_value.clone());
                values.extend(positions.iter().map(|p| {
                    p.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null)
                }));
                Row::new(Arc::clone(&self.output), values)
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct Normaliser {
    config: NormaliserConfig,
    resolved: Option<Arc<RowSchema>>,
    plan: Binding<Plan>,
}

impl Normaliser {
    pub fn new(config: NormaliserConfig) -> Self {
        Self {
            config,
            resolved: None,
            plan: Binding::Unbound,
        }
    }
}

fn bind_error(step: &str, catalog: &dyn MessageCatalog, error: PipelineError) -> PipelineError {
    match error {
        PipelineError::Schema(message) => PipelineError::row(
            step,
            catalog.message(messages::ROW_REJECTED, &[&message]),
        ),
        other => other,
    }
}

impl Step for Normaliser {
    fn kind(&self) -> &'static str {
        "Normaliser"
    }

    fn fields(&self, inputs: &[InputLayout]) -> Result<Option<Arc<RowSchema>>> {
        match inputs.iter().find_map(|input| input.schema.as_ref()) {
            Some(input) => Ok(Some(Arc::clone(&Plan::build(&self.config, input)?.output))),
            None => Ok(None),
        }
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_name("type field", &self.config.type_field)?;
        if self.config.fields.is_empty() {
            return Err(ctx.config_error("no fields to normalise"));
        }
        for f in &self.config.fields {
            ctx.require_name("target field", &f.target)?;
            ctx.require_field(&f.source)?;
        }
        if let Some(input) = ctx.input_schema() {
            Plan::build(&self.config, input).map_err(|e| ctx.config_error(e.to_string()))?;
        }
        self.resolved = ctx.input_schema().cloned();
        Ok(())
    }

    fn process(&mut self, io: &mut StepIo) -> Result<bool> {
        let Some(row) = io.get_row() else {
            return Ok(false);
        };
        let plan = self.plan.get_or_try_bind(|| {
            check_layout(
                io.name(),
                io.catalog().as_ref(),
                self.resolved.as_deref(),
                row.schema(),
            )?;
            Plan::build(&self.config, row.schema())
                .map_err(|e| bind_error(io.name(), io.catalog().as_ref(), e))
        })?;
        for out in plan.rows(&row)? {
            io.put_row(out);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{Harness, rows, schema};

    fn sales() -> Vec<Row> {
        let s = schema(&[
            ("region", DataType::String),
            ("q1_sales", DataType::Integer),
            ("q1_units", DataType::Integer),
            ("q2_sales", DataType::Integer),
        ]);
        rows(
            &s,
            vec![
                vec![
                    Value::from("north"),
                    Value::Integer(10),
                    Value::Integer(1),
                    Value::Integer(20),
                ],
                vec![
                    Value::from("south"),
                    Value::Integer(30),
                    Value::Integer(3),
                    Value::Null,
                ],
            ],
        )
    }

    fn config() -> NormaliserConfig {
        NormaliserConfig::new("quarter")
            .map("q1_sales", "Q1", "sales")
            .map("q1_units", "Q1", "units")
            .map("q2_sales", "Q2", "sales")
    }

    #[test]
    fn test_output_layout() {
        let input = sales();
        let layout = Normaliser::new(config())
            .fields(&[InputLayout::new("src", Some(Arc::clone(input[0].schema())))])
            .unwrap()
            .unwrap();
        assert_eq!(layout.names(), vec!["region", "quarter", "sales", "units"]);
        assert_eq!(layout.field(2).unwrap().data_type, DataType::Integer);
    }

    #[test]
    fn test_one_row_per_type_value() {
        let out = Harness::new()
            .input("src", sales())
            .run(&mut Normaliser::new(config()))
            .unwrap();
        let got: Vec<Vec<Value>> = out.outputs[0].iter().map(|r| r.values().to_vec()).collect();
        assert_eq!(
            got,
            vec![
                vec![Value::from("north"), Value::from("Q1"), Value::Integer(10), Value::Integer(1)],
                vec![Value::from("north"), Value::from("Q2"), Value::Integer(20), Value::Null],
                vec![Value::from("south"), Value::from("Q1"), Value::Integer(30), Value::Integer(3)],
                vec![Value::from("south"), Value::from("Q2"), Value::Null, Value::Null],
            ]
        );
    }

    #[test]
    fn test_init_requires_mappings() {
        let harness = Harness::new().input("src", sales());
        let err = harness
            .init(&mut Normaliser::new(NormaliserConfig::new("quarter")))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_init_rejects_unknown_source() {
        let harness = Harness::new().input("src", sales());
        let config = NormaliserConfig::new("quarter").map("q9_sales", "Q9", "sales");
        assert!(harness.init(&mut Normaliser::new(config)).is_err());
    }
}
