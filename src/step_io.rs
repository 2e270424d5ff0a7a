//! Runtime handle a step uses to read and write rows.
//!
//! [`StepIo`] owns the step's view of its hops: the input row sets it reads
//! round-robin, the output row sets it distributes or copies to, the
//! optional error hop, the stop flag and the row counters. Every wait on a
//! row set is sliced by the poll interval so a stop request is noticed.

use std::time::Duration;

use log::{debug, error, trace};

use crate::cancel::CancellationToken;
use crate::error::{PipelineError, Result};
use crate::error_rows::{ErrorRowSink, RowError};
use crate::messages::{self, SharedCatalog};
use crate::row::Row;
use crate::row_set::{PutOutcome, RowPoll, RowSet};

/// Row counters of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepMetrics {
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_rejected: u64,
    pub errors: u64,
}

pub struct StepIo {
    name: String,
    inputs: Vec<RowSet>,
    /// Inputs not yet at end of stream, indexes into `inputs`.
    active: Vec<usize>,
    current: usize,
    outputs: Vec<RowSet>,
    next_output: usize,
    copy_rows: bool,
    error_sink: Option<ErrorRowSink>,
    cancel: CancellationToken,
    poll_interval: Duration,
    catalog: SharedCatalog,
    metrics: StepMetrics,
}

impl StepIo {
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<RowSet>,
        outputs: Vec<RowSet>,
        cancel: CancellationToken,
        catalog: SharedCatalog,
    ) -> Self {
        let active = (0..inputs.len()).collect();
        Self {
            name: name.into(),
            inputs,
            active,
            current: 0,
            outputs,
            next_output: 0,
            copy_rows: false,
            error_sink: None,
            cancel,
            poll_interval: crate::config::DEFAULT_POLL_INTERVAL,
            catalog,
            metrics: StepMetrics::default(),
        }
    }

    pub fn with_error_sink(mut self, sink: ErrorRowSink) -> Self {
        self.error_sink = Some(sink);
        self
    }

    /// Copy every row to all outputs instead of distributing round-robin.
    pub fn with_copy_rows(mut self, copy: bool) -> Self {
        self.copy_rows = copy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    pub fn metrics(&self) -> &StepMetrics {
        &self.metrics
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut StepMetrics {
        &mut self.metrics
    }

    pub fn input_steps(&self) -> Vec<&str> {
        self.inputs.iter().map(RowSet::origin).collect()
    }

    pub fn output_steps(&self) -> Vec<&str> {
        self.outputs.iter().map(RowSet::destination).collect()
    }

    pub fn has_error_output(&self) -> bool {
        self.error_sink.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_stopped()
    }

    /// Ask the whole pipeline to stop.
    pub fn stop_all(&self) {
        self.cancel.stop_all();
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Next row from any input, switching inputs when the current one has
    /// nothing buffered. `None` once every input is drained or the pipeline
    /// is stopping.
    pub fn get_row(&mut self) -> Option<Row> {
        self.get_row_with_input().map(|(_, row)| row)
    }

    /// Like [`get_row`](Self::get_row), also telling which input (hop
    /// order) the row came from.
    pub fn get_row_with_input(&mut self) -> Option<(usize, Row)> {
        loop {
            if self.cancel.is_stopped() || self.active.is_empty() {
                return None;
            }
            if self.current >= self.active.len() {
                self.current = 0;
            }
            let index = self.active[self.current];
            let rs = &self.inputs[index];
            match rs.get_timeout(self.poll_interval) {
                RowPoll::Row(row) => {
                    self.metrics.lines_read += 1;
                    trace!("{}: read {} from {}", self.name, row, rs.origin());
                    return Some((index, row));
                }
                RowPoll::Empty => self.current += 1,
                RowPoll::EndOfStream => {
                    debug!("{}: input from {} finished", self.name, rs.origin());
                    self.active.remove(self.current);
                }
            }
        }
    }

    /// Next row from the input fed by `origin`. `None` at its end of stream
    /// or when the pipeline is stopping.
    pub fn get_row_from(&mut self, origin: &str) -> Result<Option<Row>> {
        let index = self
            .inputs
            .iter()
            .position(|rs| rs.origin() == origin)
            .ok_or_else(|| {
                PipelineError::Topology(format!("{}: no input from step '{origin}'", self.name))
            })?;
        Ok(self.get_row_from_index(index))
    }

    /// Next row from input number `index` (hop order).
    pub fn get_row_from_index(&mut self, index: usize) -> Option<Row> {
        let rs = self.inputs.get(index)?;
        loop {
            if self.cancel.is_stopped() {
                return None;
            }
            match rs.get_timeout(self.poll_interval) {
                RowPoll::Row(row) => {
                    self.metrics.lines_read += 1;
                    return Some(row);
                }
                RowPoll::Empty => continue,
                RowPoll::EndOfStream => {
                    self.active.retain(|&i| i != index);
                    return None;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Send a row downstream: round-robin over the outputs, or to every
    /// output when copying.
    pub fn put_row(&mut self, row: Row) {
        if self.outputs.is_empty() {
            self.metrics.lines_written += 1;
            return;
        }
        let delivered = if self.copy_rows {
            let last = self.outputs.len() - 1;
            let mut any = false;
            for i in 0..last {
                any |= self.put_to(i, row.clone());
            }
            self.put_to(last, row) || any
        } else {
            let i = self.next_output % self.outputs.len();
            self.next_output = (i + 1) % self.outputs.len();
            self.put_to(i, row)
        };
        if delivered {
            self.metrics.lines_written += 1;
        }
    }

    /// Send a row to the output feeding `target` only.
    pub fn put_row_to(&mut self, target: &str, row: Row) -> Result<()> {
        let index = self
            .outputs
            .iter()
            .position(|rs| rs.destination() == target)
            .ok_or_else(|| {
                PipelineError::Topology(format!("{}: no output to step '{target}'", self.name))
            })?;
        if self.put_to(index, row) {
            self.metrics.lines_written += 1;
        }
        Ok(())
    }

    /// True when the row set accepted the row.
    fn put_to(&self, index: usize, row: Row) -> bool {
        put_waiting(&self.outputs[index], row, &self.cancel, self.poll_interval, &self.name)
    }

    /// Route a row that failed this step's business rules.
    ///
    /// With an error hop the row goes there, decorated with `error`, and
    /// processing continues unless a rejection limit is exceeded. Without one
    /// the failure is returned as a fatal row error.
    pub fn handle_row_error(&mut self, row: &Row, error: RowError) -> Result<()> {
        let Some(sink) = self.error_sink.as_mut() else {
            return Err(PipelineError::row(
                &self.name,
                self.catalog.message(messages::ROW_REJECTED, &[&error.descriptions]),
            ));
        };
        let error_row = sink.error_row(row, &error)?;
        trace!("{}: rejected {} ({})", self.name, row, error.descriptions);
        put_waiting(
            sink.row_set(),
            error_row,
            &self.cancel,
            self.poll_interval,
            &self.name,
        );
        self.metrics.lines_rejected += 1;
        self.verify_rejection_rates()
    }

    fn verify_rejection_rates(&self) -> Result<()> {
        let Some(sink) = &self.error_sink else {
            return Ok(());
        };
        let handling = sink.handling();
        let rejected = self.metrics.lines_rejected;
        if let Some(max) = handling.max_errors
            && max > 0
            && rejected > max
        {
            let message = self.catalog.message(
                messages::TOO_MANY_REJECTED,
                &[&max.to_string(), &rejected.to_string()],
            );
            error!("{}: {message}", self.name);
            return Err(PipelineError::row(&self.name, message));
        }
        let read = self.metrics.lines_read;
        if let Some(max_pct) = handling.max_percent_errors
            && max_pct > 0
            && read > 0
            && read >= handling.min_rows_for_percent
        {
            let pct = (100.0 * rejected as f64 / read as f64).ceil() as u64;
            if pct > u64::from(max_pct) {
                let message = self.catalog.message(
                    messages::MAX_PERCENT_REJECTED,
                    &[&pct.to_string(), &rejected.to_string(), &read.to_string()],
                );
                error!("{}: {message}", self.name);
                return Err(PipelineError::row(&self.name, message));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Signal end of stream on every output, the error hop included.
    /// Idempotent.
    pub fn set_output_done(&self) {
        debug!("{}: output done ({} hops)", self.name, self.outputs.len());
        for rs in &self.outputs {
            rs.set_done();
        }
        if let Some(sink) = &self.error_sink {
            sink.row_set().set_done();
        }
    }

    /// Stop reading: producers still writing to this step are released.
    pub(crate) fn close_inputs(&self) {
        for rs in &self.inputs {
            rs.close();
        }
    }

    pub(crate) fn abort_inputs(&self) {
        for rs in &self.inputs {
            rs.abort();
        }
    }
}

/// Blocking put that gives up when the pipeline stops or the consumer has
/// gone away.
fn put_waiting(
    rs: &RowSet,
    mut row: Row,
    cancel: &CancellationToken,
    poll_interval: Duration,
    step: &str,
) -> bool {
    loop {
        if cancel.is_stopped() {
            return false;
        }
        match rs.put_timeout(row, poll_interval) {
            PutOutcome::Accepted => return true,
            PutOutcome::Full(back) => row = back,
            PutOutcome::Closed => {
                debug!("{step}: {} no longer reads, row not delivered", rs.destination());
                return false;
            }
        }
    }
}
