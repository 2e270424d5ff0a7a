//! Pipeline assembly and execution.
//!
//! A [`Pipeline`] is a set of named steps connected by hops. `run` checks
//! the wiring, creates one [`RowSet`] per hop, resolves every step's input
//! layouts in topological order, initializes all steps and then runs each
//! one on its own thread until all of them have finished.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use rowpipes_rs::steps::{CartesianJoin, CartesianJoinConfig, Collector, RowsSource};
//! use rowpipes_rs::{DataType, Pipeline, RowSchema, Value};
//!
//! let keys = Arc::new(RowSchema::of(&[("k", DataType::Integer)]).unwrap());
//! let letters = Arc::new(RowSchema::of(&[("x", DataType::String)]).unwrap());
//! let collector = Collector::new();
//! let rows = collector.handle();
//!
//! let mut pipeline = Pipeline::new();
//! pipeline
//!     .add_step("a", RowsSource::from_values(keys, vec![vec![Value::Integer(1)]]).unwrap())
//!     .add_step("b", RowsSource::from_values(letters, vec![vec![Value::from("a")]]).unwrap())
//!     .add_step("join", CartesianJoin::new(CartesianJoinConfig::new("a")))
//!     .add_step("out", collector)
//!     .add_hop("a", "join")
//!     .add_hop("b", "join")
//!     .add_hop("join", "out");
//!
//! let result = pipeline.run().unwrap();
//! assert!(result.is_success());
//! assert_eq!(rows.rows()[0].to_string(), "(1, a)");
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{PipelineError, Result};
use crate::error_rows::{ErrorHandling, ErrorRowSink};
use crate::messages::{SharedCatalog, default_catalog};
use crate::row::RowSchema;
use crate::row_set::RowSet;
use crate::step::{InitContext, InputLayout, Step, StepState};
use crate::step_io::{StepIo, StepMetrics};

struct StepEntry {
    name: String,
    step: Box<dyn Step>,
    copy_rows: bool,
}

#[derive(Debug, Clone)]
struct Hop {
    from: String,
    to: String,
    /// Set for error hops.
    error: Option<ErrorHandling>,
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepStatus {
    pub name: String,
    pub kind: &'static str,
    pub state: StepState,
    pub metrics: StepMetrics,
    /// Message of the error that ended the step, if any.
    pub error: Option<String>,
}

/// Outcome of a pipeline run, steps in the order they were added.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub steps: Vec<StepStatus>,
}

impl PipelineResult {
    /// Errors summed over all steps.
    pub fn errors(&self) -> u64 {
        self.steps.iter().map(|s| s.metrics.errors).sum()
    }

    pub fn is_success(&self) -> bool {
        self.errors() == 0
    }

    pub fn step(&self, name: &str) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.name == name)
    }
}

pub struct Pipeline {
    steps: Vec<StepEntry>,
    hops: Vec<Hop>,
    config: EngineConfig,
    catalog: SharedCatalog,
    cancel: CancellationToken,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            hops: Vec::new(),
            config: EngineConfig::default(),
            catalog: default_catalog(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_catalog(mut self, catalog: SharedCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token that stops the running pipeline from outside.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn add_step(&mut self, name: impl Into<String>, step: impl Step + 'static) -> &mut Self {
        self.steps.push(StepEntry {
            name: name.into(),
            step: Box::new(step),
            copy_rows: false,
        });
        self
    }

    /// Connect `from`'s output to `to`'s input. A step's inputs are
    /// numbered in the order their hops are added.
    pub fn add_hop(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.hops.push(Hop {
            from: from.into(),
            to: to.into(),
            error: None,
        });
        self
    }

    /// Route `from`'s rejected rows to `to`.
    pub fn add_error_hop(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        handling: ErrorHandling,
    ) -> &mut Self {
        self.hops.push(Hop {
            from: from.into(),
            to: to.into(),
            error: Some(handling),
        });
        self
    }

    /// Send every row of `step` to all its outputs instead of distributing
    /// rows round-robin. Unknown names are ignored.
    pub fn set_copy_rows(&mut self, step: &str, copy: bool) -> &mut Self {
        if let Some(entry) = self.steps.iter_mut().find(|e| e.name == step) {
            entry.copy_rows = copy;
        }
        self
    }

    // -----------------------------------------------------------------------
    // Wiring checks
    // -----------------------------------------------------------------------

    /// Step indexes in topological order; fails on unknown names,
    /// duplicates and cycles.
    fn topological_order(&self) -> Result<Vec<usize>> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, entry) in self.steps.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(PipelineError::Topology(format!("step #{} has no name", i + 1)));
            }
            if index.insert(entry.name.as_str(), i).is_some() {
                return Err(PipelineError::Topology(format!(
                    "duplicate step name '{}'",
                    entry.name
                )));
            }
        }

        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let mut error_sources: HashSet<&str> = HashSet::new();
        let mut incoming = vec![0usize; self.steps.len()];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for hop in &self.hops {
            let (Some(&from), Some(&to)) = (index.get(hop.from.as_str()), index.get(hop.to.as_str()))
            else {
                return Err(PipelineError::Topology(format!(
                    "hop {} -> {} references an unknown step",
                    hop.from, hop.to
                )));
            };
            if !seen.insert((hop.from.as_str(), hop.to.as_str())) {
                return Err(PipelineError::Topology(format!(
                    "duplicate hop {} -> {}",
                    hop.from, hop.to
                )));
            }
            if hop.error.is_some() && !error_sources.insert(hop.from.as_str()) {
                return Err(PipelineError::Topology(format!(
                    "step '{}' has more than one error hop",
                    hop.from
                )));
            }
            incoming[to] += 1;
            outgoing[from].push(to);
        }

        let mut ready: VecDeque<usize> = (0..self.steps.len()).filter(|&i| incoming[i] == 0).collect();
        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &next in &outgoing[i] {
                incoming[next] -= 1;
                if incoming[next] == 0 {
                    ready.push_back(next);
                }
            }
        }
        if order.len() != self.steps.len() {
            let stuck: Vec<&str> = (0..self.steps.len())
                .filter(|i| !order.contains(i))
                .map(|i| self.steps[i].name.as_str())
                .collect();
            return Err(PipelineError::Topology(format!(
                "hops form a cycle through {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Input layouts of every step, by step index.
    fn resolve_layouts(&self, order: &[usize]) -> Result<Vec<Vec<InputLayout>>> {
        let mut outputs: HashMap<&str, Option<Arc<RowSchema>>> = HashMap::new();
        let mut layouts: Vec<Vec<InputLayout>> = vec![Vec::new(); self.steps.len()];
        for &i in order {
            let entry = &self.steps[i];
            let mut inputs = Vec::new();
            for hop in self.hops.iter().filter(|h| h.to == entry.name) {
                let upstream = outputs.get(hop.from.as_str()).cloned().flatten();
                let schema = match (&hop.error, upstream) {
                    (Some(handling), Some(schema)) => Some(Arc::new(
                        handling
                            .error_schema(&schema)
                            .map_err(|e| into_config(&hop.from, e))?,
                    )),
                    (_, schema) => schema,
                };
                inputs.push(InputLayout::new(hop.from.as_str(), schema));
            }
            let output = entry
                .step
                .fields(&inputs)
                .map_err(|e| into_config(&entry.name, e))?;
            debug!(
                "{}: output layout {}",
                entry.name,
                output
                    .as_ref()
                    .map_or_else(|| "unknown".to_string(), |s| s.to_string())
            );
            outputs.insert(entry.name.as_str(), output);
            layouts[i] = inputs;
        }
        Ok(layouts)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run the pipeline to completion.
    ///
    /// Wiring and initialization problems are returned as errors before any
    /// row moves. Failures while rows flow stop every step and show up in
    /// the result's error count.
    pub fn run(mut self) -> Result<PipelineResult> {
        let order = self.topological_order()?;
        let layouts = self.resolve_layouts(&order)?;

        let row_sets: Vec<RowSet> = self
            .hops
            .iter()
            .map(|hop| RowSet::new(hop.from.as_str(), hop.to.as_str(), self.config.row_set_capacity))
            .collect();

        if let Err(e) = self.init_steps(&order, &layouts) {
            for entry in &mut self.steps {
                entry.step.dispose();
            }
            return Err(e);
        }

        let mut handles = Vec::with_capacity(self.steps.len());
        let steps = std::mem::take(&mut self.steps);
        for entry in steps {
            let io = self.step_io(&entry, &row_sets);
            let name = entry.name.clone();
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_step(entry.name, entry.step, io));
            match spawned {
                Ok(handle) => handles.push((name, handle)),
                Err(e) => {
                    error!("{name}: could not start thread: {e}");
                    self.cancel.stop_all();
                    for rs in &row_sets {
                        rs.abort();
                    }
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    return Err(PipelineError::Io(e));
                }
            }
        }

        let steps = handles
            .into_iter()
            .map(|(name, handle)| {
                handle.join().unwrap_or_else(|_| StepStatus {
                    name,
                    kind: "unknown",
                    state: StepState::Error,
                    metrics: StepMetrics {
                        errors: 1,
                        ..StepMetrics::default()
                    },
                    error: Some("step thread panicked".to_string()),
                })
            })
            .collect::<Vec<_>>();
        let result = PipelineResult { steps };
        if result.is_success() {
            info!("pipeline finished");
        } else {
            error!("pipeline finished with {} error(s)", result.errors());
        }
        Ok(result)
    }

    fn init_steps(&mut self, order: &[usize], layouts: &[Vec<InputLayout>]) -> Result<()> {
        for &i in order {
            let name = self.steps[i].name.clone();
            let output_steps: Vec<String> = self
                .hops
                .iter()
                .filter(|h| h.from == name && h.error.is_none())
                .map(|h| h.to.clone())
                .collect();
            let has_error_output = self.hops.iter().any(|h| h.from == name && h.error.is_some());
            let ctx = InitContext {
                step_name: &name,
                inputs: &layouts[i],
                output_steps: &output_steps,
                has_error_output,
                config: &self.config,
                catalog: self.catalog.as_ref(),
            };
            let entry = &mut self.steps[i];
            debug!("{name}: init {}", entry.step.kind());
            entry.step.init(&ctx).map_err(|e| {
                error!("{name}: {e}");
                into_config(&name, e)
            })?;
        }
        Ok(())
    }

    fn step_io(&self, entry: &StepEntry, row_sets: &[RowSet]) -> StepIo {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut error_sink = None;
        for (hop, rs) in self.hops.iter().zip(row_sets) {
            if hop.to == entry.name {
                inputs.push(rs.clone());
            }
            if hop.from == entry.name {
                match &hop.error {
                    Some(handling) => {
                        error_sink = Some(ErrorRowSink::new(handling.clone(), rs.clone()));
                    }
                    None => outputs.push(rs.clone()),
                }
            }
        }
        let mut io = StepIo::new(
            entry.name.as_str(),
            inputs,
            outputs,
            self.cancel.clone(),
            Arc::clone(&self.catalog),
        )
        .with_copy_rows(entry.copy_rows)
        .with_poll_interval(self.config.poll_interval);
        if let Some(sink) = error_sink {
            io = io.with_error_sink(sink);
        }
        io
    }
}

fn into_config(step: &str, error: PipelineError) -> PipelineError {
    match error {
        PipelineError::Config { .. } => error,
        other => PipelineError::config(step, other.to_string()),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Body of one step thread.
fn run_step(name: String, mut step: Box<dyn Step>, mut io: StepIo) -> StepStatus {
    let kind = step.kind();
    info!("{name} ({kind}): started");
    let mut failure = None;
    let mut state = loop {
        if io.is_stopped() {
            warn!("{name}: stopping on request");
            break StepState::Stopped;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| step.process(&mut io))) {
            Ok(Ok(true)) => continue,
            Ok(Ok(false)) => break StepState::Done,
            Ok(Err(e)) => failure = Some(e.to_string()),
            Err(payload) => failure = Some(format!("panicked: {}", panic_message(payload.as_ref()))),
        }
        if let Some(message) = &failure {
            error!("{name}: {message}");
            io.metrics_mut().errors += 1;
            io.stop_all();
            break StepState::Error;
        }
    };
    // Reads come back empty once the stop flag is up; such a step did not
    // really reach the end of its input.
    if state == StepState::Done && io.is_stopped() {
        state = StepState::Stopped;
    }

    io.set_output_done();
    if state == StepState::Done {
        io.close_inputs();
    } else {
        io.abort_inputs();
    }
    step.dispose();

    let metrics = io.metrics().clone();
    info!(
        "{name}: {state} (read={}, written={}, rejected={}, errors={})",
        metrics.lines_read, metrics.lines_written, metrics.lines_rejected, metrics.errors
    );
    StepStatus {
        name,
        kind,
        state,
        metrics,
        error: failure,
    }
}
