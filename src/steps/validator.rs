//! Per-field data validation.
//!
//! Each [`FieldValidation`] applies a list of [`Rule`]s to one field. A row
//! breaking a rule is a row-level error: it leaves through the error hop
//! when one is wired and otherwise stops the pipeline. Rules other than
//! [`Rule::NotNull`] accept `Null`.

use std::sync::Arc;

use regex::Regex;

use crate::error::{PipelineError, Result};
use crate::error_rows::RowError;
use crate::messages::{self, MessageCatalog};
use crate::row::{Row, RowSchema};
use crate::step::{Binding, InitContext, Step, check_layout};
use crate::step_io::StepIo;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    NotNull,
    /// Maximum length of the text form, in characters.
    MaxLength(usize),
    Min(f64),
    Max(f64),
    /// The text form must be one of these.
    AllowedValues(Vec<String>),
    /// The whole text form must match this regular expression.
    Pattern(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldValidation {
    pub field: String,
    pub rules: Vec<Rule>,
    /// Error code reported for violations of this field.
    pub code: Option<String>,
}

impl FieldValidation {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rules: Vec::new(),
            code: None,
        }
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatorConfig {
    pub validations: Vec<FieldValidation>,
    /// Report every violation of a row instead of the first one.
    pub concat_errors: bool,
}

impl ValidatorConfig {
    pub fn validate(mut self, validation: FieldValidation) -> Self {
        self.validations.push(validation);
        self
    }

    pub fn concat_errors(mut self, concat: bool) -> Self {
        self.concat_errors = concat;
        self
    }
}

#[derive(Debug)]
enum CompiledRule {
    NotNull,
    MaxLength(usize),
    Min(f64),
    Max(f64),
    AllowedValues(Vec<String>),
    Pattern(Regex),
}

#[derive(Debug)]
struct BoundValidation {
    index: usize,
    field: String,
    code: String,
    rules: Vec<CompiledRule>,
}

fn compile(rule: &Rule) -> std::result::Result<CompiledRule, regex::Error> {
    Ok(match rule {
        Rule::NotNull => CompiledRule::NotNull,
        Rule::MaxLength(max) => CompiledRule::MaxLength(*max),
        Rule::Min(min) => CompiledRule::Min(*min),
        Rule::Max(max) => CompiledRule::Max(*max),
        Rule::AllowedValues(values) => CompiledRule::AllowedValues(values.clone()),
        Rule::Pattern(pattern) => CompiledRule::Pattern(Regex::new(&format!("^(?:{pattern})$"))?),
    })
}

impl CompiledRule {
    /// `None` when `value` passes.
    fn check(&self, field: &str, value: &Value, catalog: &dyn MessageCatalog) -> Option<String> {
        if let CompiledRule::NotNull = self {
            return value
                .is_null()
                .then(|| catalog.message(messages::VALIDATION_NULL, &[field]));
        }
        let text = value.as_text()?;
        match self {
            CompiledRule::NotNull => None,
            CompiledRule::MaxLength(max) => (text.chars().count() > *max).then(|| {
                catalog.message(messages::VALIDATION_MAX_LENGTH, &[field, &max.to_string()])
            }),
            CompiledRule::Min(min) => match value.as_f64() {
                Some(n) if n >= *min => None,
                _ => Some(catalog.message(messages::VALIDATION_MIN_VALUE, &[field, &min.to_string()])),
            },
            CompiledRule::Max(max) => match value.as_f64() {
                Some(n) if n <= *max => None,
                _ => Some(catalog.message(messages::VALIDATION_MAX_VALUE, &[field, &max.to_string()])),
            },
            CompiledRule::AllowedValues(allowed) => (!allowed.contains(&text))
                .then(|| catalog.message(messages::VALIDATION_NOT_ALLOWED, &[field])),
            CompiledRule::Pattern(regex) => (!regex.is_match(&text)).then(|| {
                catalog.message(messages::VALIDATION_PATTERN, &[field, regex.as_str()])
            }),
        }
    }
}

#[derive(Debug)]
pub struct Validator {
    config: ValidatorConfig,
    resolved: Option<Arc<RowSchema>>,
    bound: Binding<Vec<BoundValidation>>,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            resolved: None,
            bound: Binding::Unbound,
        }
    }

    fn bind(
        &self,
        schema: &RowSchema,
        catalog: &dyn MessageCatalog,
        step: &str,
    ) -> Result<Vec<BoundValidation>> {
        self.config
            .validations
            .iter()
            .map(|v| {
                let index = schema.index_of(&v.field).ok_or_else(|| {
                    PipelineError::row(
                        step,
                        catalog.message(messages::FIELD_NOT_FOUND, &[&v.field]),
                    )
                })?;
                let rules = v
                    .rules
                    .iter()
                    .map(compile)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| PipelineError::Schema(e.to_string()))?;
                Ok(BoundValidation {
                    index,
                    field: v.field.clone(),
                    code: v.code.clone().unwrap_or_default(),
                    rules,
                })
            })
            .collect()
    }
}

fn violations(
    validations: &[BoundValidation],
    row: &Row,
    catalog: &dyn MessageCatalog,
    all: bool,
) -> Vec<RowError> {
    let mut found = Vec::new();
    for validation in validations {
        let value = row.get(validation.index).unwrap_or(&Value::Null);
        for rule in &validation.rules {
            if let Some(description) = rule.check(&validation.field, value, catalog) {
                found.push(
                    RowError::new(description)
                        .on_field(validation.field.clone())
                        .with_code(validation.code.clone()),
                );
                if !all {
                    return found;
                }
            }
        }
    }
    found
}

impl Step for Validator {
    fn kind(&self) -> &'static str {
        "Validator"
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        for validation in &self.config.validations {
            ctx.require_name("validated field", &validation.field)?;
            ctx.require_field(&validation.field)?;
            for rule in &validation.rules {
                compile(rule).map_err(|e| {
                    ctx.config_error(format!("field '{}': {e}", validation.field))
                })?;
            }
        }
        self.resolved = ctx.input_schema().cloned();
        Ok(())
    }

    fn process(&mut self, io: &mut StepIo) -> Result<bool> {
        let Some(row) = io.get_row() else {
            return Ok(false);
        };
        if !self.bound.is_bound() {
            check_layout(
                io.name(),
                io.catalog().as_ref(),
                self.resolved.as_deref(),
                row.schema(),
            )?;
            let bound = self.bind(row.schema(), io.catalog().as_ref(), io.name())?;
            self.bound = Binding::Bound(bound);
        }
        let found = match self.bound.get() {
            Some(validations) => violations(
                validations,
                &row,
                io.catalog().as_ref(),
                self.config.concat_errors,
            ),
            None => Vec::new(),
        };
        match RowError::combine(found) {
            None => io.put_row(row),
            Some(error) => io.handle_row_error(&row, error)?,
        }
        Ok(true)
    }
}
