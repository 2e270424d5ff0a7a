//! The step contract.
//!
//! Every unit of work in a pipeline implements [`Step`]. The engine drives
//! it through `init`, repeated `process` calls and `dispose`, each step on
//! its own thread. A step owns its state outright; the only things it shares
//! are the row sets behind its [`StepIo`].

use std::fmt;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{PipelineError, Result};
use crate::messages::{self, MessageCatalog};
use crate::row::RowSchema;
use crate::step_io::StepIo;

/// Lifecycle state of a step instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Created,
    Initialized,
    Running,
    Done,
    /// Stopped because another step failed.
    Stopped,
    Error,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepState::Created => "created",
            StepState::Initialized => "initialized",
            StepState::Running => "running",
            StepState::Done => "done",
            StepState::Stopped => "stopped",
            StepState::Error => "error",
        };
        f.write_str(name)
    }
}

/// One input of a step as known before the run.
#[derive(Debug, Clone, PartialEq)]
pub struct InputLayout {
    /// Upstream step name.
    pub step: String,
    /// Resolved layout, `None` when it is only known at runtime.
    pub schema: Option<Arc<RowSchema>>,
}

impl InputLayout {
    pub fn new(step: impl Into<String>, schema: Option<Arc<RowSchema>>) -> Self {
        Self {
            step: step.into(),
            schema,
        }
    }
}

/// What a step can see about its wiring while it initializes.
pub struct InitContext<'a> {
    pub step_name: &'a str,
    /// One entry per input row set, in hop order.
    pub inputs: &'a [InputLayout],
    /// Downstream step names of the plain (non-error) hops.
    pub output_steps: &'a [String],
    /// An error hop is wired from this step.
    pub has_error_output: bool,
    pub config: &'a EngineConfig,
    pub catalog: &'a dyn MessageCatalog,
}

impl InitContext<'_> {
    pub fn config_error(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::config(self.step_name, message)
    }

    /// The first resolved input layout, if any.
    pub fn input_schema(&self) -> Option<&Arc<RowSchema>> {
        self.inputs.iter().find_map(|input| input.schema.as_ref())
    }

    /// Position of `input_step` among this step's inputs.
    pub fn input_index(&self, input_step: &str) -> Option<usize> {
        self.inputs.iter().position(|input| input.step == input_step)
    }

    /// Fails when `name` is blank.
    pub fn require_name(&self, what: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(self.config_error(format!("{what} is not set")));
        }
        Ok(())
    }

    /// Fails when a resolved input layout exists and lacks `field`.
    /// Without a resolved layout the check moves to first-row binding.
    pub fn require_field(&self, field: &str) -> Result<()> {
        match self.input_schema() {
            Some(schema) if !schema.contains(field) => Err(self.config_error(
                self.catalog.message(messages::FIELD_NOT_FOUND, &[field]),
            )),
            _ => Ok(()),
        }
    }

    /// Fails when `target` is not one of this step's outputs.
    pub fn require_target(&self, target: &str) -> Result<()> {
        if self.output_steps.iter().any(|s| s == target) {
            Ok(())
        } else {
            Err(self.config_error(self.catalog.message(messages::TARGET_NOT_WIRED, &[target])))
        }
    }
}

/// A pipeline stage.
pub trait Step: Send {
    /// Short name of the step kind, used in logs.
    fn kind(&self) -> &'static str;

    /// Output layout for the given input layouts.
    ///
    /// The default passes the first known input layout through.
    fn fields(&self, inputs: &[InputLayout]) -> Result<Option<Arc<RowSchema>>> {
        Ok(inputs.iter().find_map(|input| input.schema.clone()))
    }

    /// Validate declared configuration against the wiring. An error aborts
    /// pipeline startup before any row moves.
    fn init(&mut self, _ctx: &InitContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Run one iteration. Returns `Ok(false)` once, at end of stream.
    /// An `Err` is fatal for the step and stops the whole pipeline.
    fn process(&mut self, io: &mut StepIo) -> Result<bool>;

    /// Release resources. Called on every exit path; must be idempotent.
    fn dispose(&mut self) {}
}

/// First-row binding: `Unbound` until the first row shows the runtime
/// layout, then `Bound` with values that never change for the rest of the
/// run.
#[derive(Debug, Default)]
pub enum Binding<T> {
    #[default]
    Unbound,
    Bound(T),
}

impl<T> Binding<T> {
    pub fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Binding::Bound(value) => Some(value),
            Binding::Unbound => None,
        }
    }

    /// Bind with `build` on first use; later calls return the bound value.
    pub fn get_or_try_bind(&mut self, build: impl FnOnce() -> Result<T>) -> Result<&T> {
        if let Binding::Unbound = self {
            *self = Binding::Bound(build()?);
        }
        match self {
            Binding::Bound(value) => Ok(value),
            Binding::Unbound => unreachable!("bound above"),
        }
    }
}

/// Compare a runtime layout with the layout resolved before the run.
pub fn check_layout(
    step: &str,
    catalog: &dyn MessageCatalog,
    resolved: Option<&RowSchema>,
    actual: &RowSchema,
) -> Result<()> {
    match resolved {
        Some(expected) if !expected.is_compatible_with(actual) => Err(PipelineError::row(
            step,
            catalog.message(
                messages::SCHEMA_MISMATCH,
                &[&actual.to_string(), &expected.to_string()],
            ),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::DefaultCatalog;
    use crate::value::DataType;

    #[test]
    fn test_binding_builds_once() {
        let mut binding: Binding<usize> = Binding::Unbound;
        let mut calls = 0;
        for _ in 0..3 {
            let v = binding
                .get_or_try_bind(|| {
                    calls += 1;
                    Ok(7)
                })
                .unwrap();
            assert_eq!(*v, 7);
        }
        assert_eq!(calls, 1);
        assert!(binding.is_bound());
    }

    #[test]
    fn test_binding_failure_stays_unbound() {
        let mut binding: Binding<usize> = Binding::default();
        assert!(
            binding
                .get_or_try_bind(|| Err(PipelineError::Schema("bad".into())))
                .is_err()
        );
        assert!(!binding.is_bound());
    }

    #[test]
    fn test_init_context_checks() {
        let schema = Arc::new(RowSchema::of(&[("k", DataType::Integer)]).unwrap());
        let catalog = DefaultCatalog::default();
        let config = EngineConfig::default();
        let inputs = vec![InputLayout::new("src", Some(schema))];
        let outputs = vec!["out".to_string()];
        let ctx = InitContext {
            step_name: "filter",
            inputs: &inputs,
            output_steps: &outputs,
            has_error_output: false,
            config: &config,
            catalog: &catalog,
        };
        assert!(ctx.require_field("K").is_ok());
        assert!(ctx.require_field("missing").unwrap_err().is_config());
        assert!(ctx.require_target("out").is_ok());
        assert!(ctx.require_target("elsewhere").is_err());
        assert!(ctx.require_name("field", "  ").is_err());
        assert_eq!(ctx.input_index("src"), Some(0));
    }

    #[test]
    fn test_check_layout() {
        let catalog = DefaultCatalog::default();
        let a = RowSchema::of(&[("k", DataType::Integer)]).unwrap();
        let b = RowSchema::of(&[("k", DataType::String)]).unwrap();
        assert!(check_layout("s", &catalog, Some(&a), &a).is_ok());
        assert!(check_layout("s", &catalog, None, &b).is_ok());
        assert!(check_layout("s", &catalog, Some(&a), &b).is_err());
    }
}
