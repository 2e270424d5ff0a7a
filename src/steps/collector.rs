//! Sink step that keeps every row it reads.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;
use crate::row::Row;
use crate::step::Step;
use crate::step_io::StepIo;

/// Handle on the rows a [`Collector`] gathered. Clone it before the
/// collector is moved into a pipeline and read it after the run.
#[derive(Debug, Clone, Default)]
pub struct CollectedRows {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl CollectedRows {
    fn lock(&self) -> MutexGuard<'_, Vec<Row>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn rows(&self) -> Vec<Row> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Stores rows in arrival order and passes them on unchanged.
#[derive(Debug, Default)]
pub struct Collector {
    rows: CollectedRows,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> CollectedRows {
        self.rows.clone()
    }
}

impl Step for Collector {
    fn kind(&self) -> &'static str {
        "Collector"
    }

    fn process(&mut self, io: &mut StepIo) -> Result<bool> {
        let Some(row) = io.get_row() else {
            return Ok(false);
        };
        self.rows.lock().push(row.clone());
        io.put_row(row);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{Harness, rows, schema};
    use crate::value::{DataType, Value};

    #[test]
    fn test_collects_and_passes_through() {
        let s = schema(&[("k", DataType::Integer)]);
        let input = rows(&s, vec![vec![Value::Integer(1)], vec![Value::Integer(2)]]);
        let mut collector = Collector::new();
        let handle = collector.handle();
        let out = Harness::new()
            .input("src", input.clone())
            .run(&mut collector)
            .unwrap();
        assert_eq!(handle.rows(), input);
        assert_eq!(out.outputs[0], input);
        assert_eq!(out.io.metrics().lines_read, 2);
    }
}
