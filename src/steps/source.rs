//! Steps that produce rows: an in-memory source and a delimited text file
//! reader.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::error::{PipelineError, Result};
use crate::error_rows::RowError;
use crate::messages;
use crate::row::{FieldMeta, Row, RowSchema};
use crate::step::{InitContext, InputLayout, Step};
use crate::step_io::StepIo;
use crate::value::{DataType, Value};

// ---------------------------------------------------------------------------
// RowsSource
// ---------------------------------------------------------------------------

/// Emits a fixed list of rows, one per `process` call.
#[derive(Debug)]
pub struct RowsSource {
    schema: Arc<RowSchema>,
    rows: VecDeque<Row>,
}

impl RowsSource {
    /// Every row must be laid out as `schema`.
    pub fn new(schema: Arc<RowSchema>, rows: Vec<Row>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|r| !r.schema().is_compatible_with(&schema)) {
            return Err(PipelineError::InvalidRow(format!(
                "row {bad} does not fit source layout {schema}"
            )));
        }
        Ok(Self {
            schema,
            rows: rows.into(),
        })
    }

    /// Build the rows from raw values.
    pub fn from_values(schema: Arc<RowSchema>, values: Vec<Vec<Value>>) -> Result<Self> {
        let rows = values
            .into_iter()
            .map(|v| Row::new(Arc::clone(&schema), v))
            .collect::<Result<Vec<_>>>()?;
        Self::new(schema, rows)
    }
}

impl Step for RowsSource {
    fn kind(&self) -> &'static str {
        "RowsSource"
    }

    fn fields(&self, _inputs: &[InputLayout]) -> Result<Option<Arc<RowSchema>>> {
        Ok(Some(Arc::clone(&self.schema)))
    }

    fn process(&mut self, io: &mut StepIo) -> Result<bool> {
        match self.rows.pop_front() {
            Some(row) => {
                io.put_row(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// DelimitedTextInput
// ---------------------------------------------------------------------------

/// Reads a delimited text file.
///
/// The first line names the fields, optionally typed as `name:type`
/// (`id:Integer;name;born:Date`). Untyped fields are strings. An empty cell
/// is `Null`. A cell that does not convert to its field type rejects the
/// line: the row goes to the error hop with that cell set to `Null`, or the
/// step fails when no error hop is wired.
#[derive(Debug)]
pub struct DelimitedTextInput {
    path: PathBuf,
    delimiter: char,
    schema: Option<Arc<RowSchema>>,
    reader: Option<BufReader<File>>,
    line: String,
    line_number: u64,
}

impl DelimitedTextInput {
    pub fn new(path: impl Into<PathBuf>, delimiter: char) -> Self {
        Self {
            path: path.into(),
            delimiter,
            schema: None,
            reader: None,
            line: String::new(),
            line_number: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<(BufReader<File>, RowSchema)> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut header = String::new();
        reader.read_line(&mut header)?;
        let header = header.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            return Err(PipelineError::Schema(format!(
                "{}: missing header line",
                self.path.display()
            )));
        }
        Ok((reader, parse_header(header, self.delimiter)?))
    }

    fn convert(&self, schema: &Arc<RowSchema>, text: &str) -> Result<(Row, Vec<RowError>)> {
        let mut cells = text.split(self.delimiter);
        let mut values = Vec::with_capacity(schema.len());
        let mut problems = Vec::new();
        for field in schema.fields() {
            let cell = cells.next().unwrap_or("");
            match Value::parse(cell, field.data_type) {
                Ok(value) => values.push(value),
                Err(problem) => {
                    values.push(Value::Null);
                    problems.push(RowError::new(problem).on_field(field.name.clone()));
                }
            }
        }
        let extra = cells.count();
        if extra > 0 {
            problems.push(RowError::new(format!(
                "{extra} cell(s) beyond the {} declared fields",
                schema.len()
            )));
        }
        Ok((Row::new(Arc::clone(schema), values)?, problems))
    }
}

/// Parse a header line into a schema.
pub fn parse_header(header: &str, delimiter: char) -> Result<RowSchema> {
    let fields = header
        .split(delimiter)
        .map(|entry| {
            let entry = entry.trim();
            match entry.rsplit_once(':') {
                Some((name, type_name)) => match DataType::from_name(type_name) {
                    Some(data_type) => FieldMeta::new(name.trim(), data_type),
                    None => FieldMeta::new(entry, DataType::String),
                },
                None => FieldMeta::new(entry, DataType::String),
            }
        })
        .collect();
    RowSchema::new(fields)
}

impl Step for DelimitedTextInput {
    fn kind(&self) -> &'static str {
        "DelimitedTextInput"
    }

    fn fields(&self, _inputs: &[InputLayout]) -> Result<Option<Arc<RowSchema>>> {
        let (_, schema) = self.open()?;
        Ok(Some(Arc::new(schema)))
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        let (reader, schema) = self
            .open()
            .map_err(|e| ctx.config_error(format!("{}: {e}", self.path.display())))?;
        debug!(
            "{}: reading {} as {schema}",
            ctx.step_name,
            self.path.display()
        );
        self.schema = Some(Arc::new(schema));
        self.reader = Some(reader);
        self.line_number = 1;
        Ok(())
    }

    fn process(&mut self, io: &mut StepIo) -> Result<bool> {
        let (Some(reader), Some(schema)) = (self.reader.as_mut(), self.schema.clone()) else {
            return Err(PipelineError::row(io.name(), "input file is not open"));
        };
        loop {
            self.line.clear();
            if reader.read_line(&mut self.line)? == 0 {
                self.reader = None;
                return Ok(false);
            }
            self.line_number += 1;
            if !self.line.trim().is_empty() {
                break;
            }
        }
        let text = self.line.trim_end_matches(['\r', '\n']).to_string();
        let (row, problems) = self.convert(&schema, &text)?;
        match RowError::combine(problems) {
            None => io.put_row(row),
            Some(mut error) => {
                error.descriptions = io.catalog().message(
                    messages::CONVERSION_FAILED,
                    &[&self.line_number.to_string(), &error.descriptions],
                );
                io.handle_row_error(&row, error)?;
            }
        }
        Ok(true)
    }

    fn dispose(&mut self) {
        self.reader = None;
    }
}
