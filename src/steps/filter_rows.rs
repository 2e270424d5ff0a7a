//! Routes rows by a condition.

use std::sync::Arc;

use log::debug;

use crate::condition::{BoundCondition, Condition};
use crate::error::Result;
use crate::row::RowSchema;
use crate::step::{Binding, InitContext, Step, check_layout};
use crate::step_io::StepIo;

#[derive(Debug, Clone, PartialEq)]
pub struct FilterRowsConfig {
    pub condition: Condition,
    /// Step receiving rows for which the condition holds.
    pub send_true_to: Option<String>,
    /// Step receiving the other rows. Unset drops them.
    pub send_false_to: Option<String>,
}

impl FilterRowsConfig {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            send_true_to: None,
            send_false_to: None,
        }
    }

    pub fn send_true_to(mut self, step: impl Into<String>) -> Self {
        self.send_true_to = Some(step.into());
        self
    }

    pub fn send_false_to(mut self, step: impl Into<String>) -> Self {
        self.send_false_to = Some(step.into());
        self
    }
}

/// Evaluates a condition per row. With no targets set, matching rows go to
/// every output through the normal distribution and the rest are dropped.
#[derive(Debug)]
pub struct FilterRows {
    config: FilterRowsConfig,
    resolved: Option<Arc<RowSchema>>,
    bound: Binding<BoundCondition>,
}

impl FilterRows {
    pub fn new(config: FilterRowsConfig) -> Self {
        Self {
            config,
            resolved: None,
            bound: Binding::Unbound,
        }
    }
}

impl Step for FilterRows {
    fn kind(&self) -> &'static str {
        "FilterRows"
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        for target in [&self.config.send_true_to, &self.config.send_false_to]
            .into_iter()
            .flatten()
        {
            ctx.require_target(target)?;
        }
        for field in self.config.condition.referenced_fields() {
            ctx.require_field(field)?;
        }
        self.resolved = ctx.input_schema().cloned();
        Ok(())
    }

    fn process(&mut self, io: &mut StepIo) -> Result<bool> {
        let Some(row) = io.get_row() else {
            return Ok(false);
        };
        let condition = self.bound.get_or_try_bind(|| {
            check_layout(
                io.name(),
                io.catalog().as_ref(),
                self.resolved.as_deref(),
                row.schema(),
            )?;
            debug!("{}: binding condition to {}", io.name(), row.schema());
            self.config.condition.bind(row.schema())
        })?;
        let keep = condition.evaluate(&row);
        let target = if keep {
            &self.config.send_true_to
        } else {
            &self.config.send_false_to
        };
        match (target, &self.config.send_true_to, &self.config.send_false_to) {
            (Some(step), _, _) => io.put_row_to(step, row)?,
            (None, None, None) if keep => io.put_row(row),
            _ => {}
        }
        Ok(true)
    }
}
