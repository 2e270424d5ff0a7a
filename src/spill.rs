//! Private temp-file storage of rows.
//!
//! A [`SpillFile`] is written once, sequentially, then replayed from the
//! start as many times as needed. Each pass opens a fresh read handle and
//! [`SpillFile::rewind`] closes it, so no descriptor stays open between
//! passes. The file is removed when the spill file is dropped.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};
use crate::row::{Row, RowSchema};
use crate::value::Value;

pub struct SpillFile {
    file: NamedTempFile,
    schema: Arc<RowSchema>,
    writer: Option<BufWriter<File>>,
    reader: Option<BufReader<File>>,
    line: String,
    rows: u64,
}

impl SpillFile {
    /// Create an empty spill file in `dir` for rows laid out as `schema`.
    pub fn create(dir: &Path, prefix: &str, schema: Arc<RowSchema>) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(".spill")
            .tempfile_in(dir)
            .map_err(|source| PipelineError::Spill {
                path: dir.to_path_buf(),
                source,
            })?;
        debug!("created spill file {}", file.path().display());
        Ok(Self {
            file,
            schema,
            writer: None,
            reader: None,
            line: String::new(),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    /// Rows written so far.
    pub fn len(&self) -> u64 {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    fn spill_error(&self, source: io::Error) -> PipelineError {
        PipelineError::Spill {
            path: self.path().to_path_buf(),
            source,
        }
    }

    fn encode_error(&self, e: serde_json::Error) -> PipelineError {
        if e.is_io() {
            self.spill_error(e.into())
        } else {
            e.into()
        }
    }

    /// Append one row.
    pub fn write(&mut self, row: &Row) -> Result<()> {
        if row.len() != self.schema.len() {
            return Err(PipelineError::InvalidRow(format!(
                "row {row} does not fit spill layout {}",
                self.schema
            )));
        }
        if self.writer.is_none() {
            let handle = self.file.reopen().map_err(|e| self.spill_error(e))?;
            self.writer = Some(BufWriter::new(handle));
        }
        let Some(writer) = self.writer.as_mut() else {
            unreachable!("writer opened above");
        };
        if let Err(e) = serde_json::to_writer(&mut *writer, row.values()) {
            return Err(self.encode_error(e));
        }
        if let Err(e) = writer.write_all(b"\n") {
            return Err(self.spill_error(e));
        }
        self.rows += 1;
        Ok(())
    }

    /// Flush and close the write handle. Further writes reopen it and
    /// append from the start of the file, so call this once.
    pub fn finish_writing(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| self.spill_error(e))?;
        }
        Ok(())
    }

    /// Next row of the current pass, `None` at the end of the file.
    pub fn read_next(&mut self) -> Result<Option<Row>> {
        if self.reader.is_none() {
            let handle = self.file.reopen().map_err(|e| self.spill_error(e))?;
            self.reader = Some(BufReader::new(handle));
        }
        self.line.clear();
        let read = match self.reader.as_mut() {
            Some(reader) => reader.read_line(&mut self.line),
            None => unreachable!("reader opened above"),
        };
        match read {
            Ok(0) => Ok(None),
            Ok(_) => {
                let values: Vec<Value> = serde_json::from_str(self.line.trim_end())?;
                Row::new(Arc::clone(&self.schema), values).map(Some)
            }
            Err(e) => Err(self.spill_error(e)),
        }
    }

    /// Close the read handle; the next read starts a new pass.
    pub fn rewind(&mut self) {
        self.reader = None;
    }

    /// Remove the file now, reporting failures instead of ignoring them.
    pub fn delete(self) -> Result<PathBuf> {
        let path = self.path().to_path_buf();
        drop(self.reader);
        drop(self.writer);
        self.file
            .close()
            .map_err(|source| PipelineError::Spill {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

impl std::fmt::Debug for SpillFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillFile")
            .field("path", &self.path())
            .field("rows", &self.rows)
            .field("reading", &self.reader.is_some())
            .finish()
    }
}
