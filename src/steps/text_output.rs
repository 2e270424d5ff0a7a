//! Sink step that writes rows as delimited text while they arrive.
//!
//! The output starts with a `name:Type` header line, the same format
//! [`DelimitedTextInput`](super::DelimitedTextInput) reads.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::warn;

use crate::error::Result;
use crate::row::{Row, RowSchema};
use crate::step::{InitContext, Step};
use crate::step_io::StepIo;

pub struct DelimitedTextOutput {
    writer: Box<dyn Write + Send>,
    delimiter: String,
    header_written: bool,
}

impl DelimitedTextOutput {
    pub fn new(writer: impl Write + Send + 'static, delimiter: char) -> Self {
        Self {
            writer: Box::new(writer),
            delimiter: delimiter.to_string(),
            header_written: false,
        }
    }

    /// Write to a new file at `path`, creating missing parent directories.
    pub fn create(path: &Path, delimiter: char) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), delimiter))
    }

    fn write_header(&mut self, schema: &RowSchema) -> Result<()> {
        let header: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| format!("{}:{}", f.name, f.data_type))
            .collect();
        writeln!(self.writer, "{}", header.join(&self.delimiter))?;
        self.header_written = true;
        Ok(())
    }

    fn write_row(&mut self, row: &Row) -> Result<()> {
        if !self.header_written {
            self.write_header(row.schema())?;
        }
        let cells: Vec<String> = row
            .values()
            .iter()
            .map(|v| v.as_text().unwrap_or_default())
            .collect();
        writeln!(self.writer, "{}", cells.join(&self.delimiter))?;
        Ok(())
    }
}

impl Step for DelimitedTextOutput {
    fn kind(&self) -> &'static str {
        "DelimitedTextOutput"
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        if let Some(schema) = ctx.input_schema() {
            self.write_header(schema)?;
        }
        Ok(())
    }

    fn process(&mut self, io: &mut StepIo) -> Result<bool> {
        let Some(row) = io.get_row() else {
            self.writer.flush()?;
            return Ok(false);
        };
        self.write_row(&row)?;
        io.put_row(row);
        Ok(true)
    }

    fn dispose(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("flushing delimited output failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{Harness, rows, schema};
    use crate::value::{DataType, Value};

    #[test]
    fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.txt");
        let s = schema(&[("id", DataType::Integer), ("name", DataType::String)]);
        let input = rows(
            &s,
            vec![
                vec![Value::Integer(1), Value::from("ann")],
                vec![Value::Integer(2), Value::Null],
            ],
        );
        let mut output = DelimitedTextOutput::create(&path, ';').unwrap();
        let out = Harness::new().input("src", input).run(&mut output).unwrap();
        assert_eq!(out.outputs[0].len(), 2);
        drop(output);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "id:Integer;name:String\n1;ann\n2;\n"
        );
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let s = schema(&[("k", DataType::Integer)]);
        let mut output = DelimitedTextOutput::create(&path, ',').unwrap();
        output.write_header(&s).unwrap();
        for row in rows(&s, vec![vec![Value::Integer(7)], vec![Value::Integer(8)]]) {
            output.write_row(&row).unwrap();
        }
        drop(output);
        assert_eq!(fs::read_to_string(&path).unwrap(), "k:Integer\n7\n8\n");
    }
}
