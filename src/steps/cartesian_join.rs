//! N-way cross product with a bounded memory cache and disk spill.
//!
//! The join runs in two phases. While caching, every input except the main
//! one is read to its end; each row goes to that stream's spill file and,
//! until the stream grows past `cache_size` rows, to an in-memory cache as
//! well. Once a stream outgrows the limit its cache is dropped and it is
//! replayed from disk only.
//!
//! While replaying, the main stream is read live and drives the outer
//! loop. The other streams turn like the wheels of an odometer: the last
//! one advances on every output row, and when it wraps back to its first
//! row the stream before it advances by one, and so on. When the carry
//! reaches the main stream the next main row is read; the join ends with
//! the main stream.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::condition::{BoundCondition, Condition};
use crate::error::{PipelineError, Result};
use crate::row::{Row, RowSchema};
use crate::schema_merge::{MergedSchema, SchemaMerger};
use crate::spill::SpillFile;
use crate::step::{Binding, InitContext, InputLayout, Step, check_layout};
use crate::step_io::StepIo;

/// Rows per stream kept in memory when nothing else is configured.
pub const DEFAULT_CACHE_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct CartesianJoinConfig {
    /// Step feeding the driving stream.
    pub main_step: String,
    /// Rows per stream kept in memory before replay switches to disk.
    pub cache_size: usize,
    /// Directory for spill files; the engine's spill directory when unset.
    pub spill_dir: Option<PathBuf>,
    pub spill_prefix: String,
    /// Only combinations satisfying this condition are emitted.
    pub condition: Option<Condition>,
}

impl CartesianJoinConfig {
    pub fn new(main_step: impl Into<String>) -> Self {
        Self {
            main_step: main_step.into(),
            cache_size: DEFAULT_CACHE_SIZE,
            spill_dir: None,
            spill_prefix: "join".to_string(),
            condition: None,
        }
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    pub fn with_spill_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.spill_prefix = prefix.into();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// One non-main stream: its rows in memory, on disk, or both, and the
/// replay cursor.
#[derive(Debug)]
struct CachedStream {
    /// Input index (hop order).
    input: usize,
    origin: String,
    /// `None` once the stream outgrew the cache.
    cache: Option<Vec<Row>>,
    spill: Option<SpillFile>,
    len: usize,
    /// Next position to replay.
    position: usize,
}

impl CachedStream {
    fn schema(&self) -> Option<&Arc<RowSchema>> {
        self.spill.as_ref().map(SpillFile::schema)
    }

    /// Next row of the replay, wrapping to the first row after the last.
    /// The flag is true when this call wrapped.
    fn next(&mut self) -> Result<(Row, bool)> {
        let mut wrapped = false;
        if self.position >= self.len {
            self.position = 0;
            wrapped = true;
            if let Some(spill) = self.spill.as_mut() {
                spill.rewind();
            }
        }
        let row = match (&self.cache, self.spill.as_mut()) {
            (Some(cache), _) => cache.get(self.position).cloned(),
            (None, Some(spill)) => spill.read_next()?,
            (None, None) => None,
        };
        let row = row.ok_or_else(|| {
            PipelineError::InvalidRow(format!(
                "stream from '{}' ended at row {} of {}",
                self.origin, self.position, self.len
            ))
        })?;
        self.position += 1;
        Ok((row, wrapped))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Caching,
    Replaying,
    Done,
}

#[derive(Debug)]
struct JoinLayout {
    merged: MergedSchema,
    condition: Option<BoundCondition>,
}

#[derive(Debug)]
pub struct CartesianJoin {
    config: CartesianJoinConfig,
    phase: Phase,
    spill_dir: PathBuf,
    main_input: usize,
    /// Resolved layouts, main stream first.
    resolved: Vec<Option<Arc<RowSchema>>>,
    streams: Vec<CachedStream>,
    main_row: Option<Row>,
    current: Vec<Row>,
    layout: Binding<JoinLayout>,
    combinations: u64,
}

impl CartesianJoin {
    pub fn new(config: CartesianJoinConfig) -> Self {
        Self {
            config,
            phase: Phase::Caching,
            spill_dir: std::env::temp_dir(),
            main_input: 0,
            resolved: Vec::new(),
            streams: Vec::new(),
            main_row: None,
            current: Vec::new(),
            layout: Binding::Unbound,
            combinations: 0,
        }
    }

    /// Inputs ordered main stream first, then the others in hop order.
    fn ordered<'a>(&self, inputs: &'a [InputLayout]) -> Option<Vec<&'a InputLayout>> {
        let main = inputs.iter().position(|i| i.step == self.config.main_step)?;
        let mut ordered = vec![&inputs[main]];
        ordered.extend(
            inputs
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != main)
                .map(|(_, input)| input),
        );
        Some(ordered)
    }

    fn merge(layouts: &[Option<&RowSchema>]) -> Result<MergedSchema> {
        SchemaMerger::concat().merge(layouts)
    }

    /// Read every non-main stream to its end. Returns false when one of
    /// them is empty.
    fn cache_streams(&mut self, io: &mut StepIo) -> Result<bool> {
        let mut all_rows = true;
        for stream in &mut self.streams {
            while let Some(row) = io.get_row_from_index(stream.input) {
                if stream.spill.is_none() {
                    stream.spill = Some(SpillFile::create(
                        &self.spill_dir,
                        &self.config.spill_prefix,
                        Arc::clone(row.schema()),
                    )?);
                }
                if let Some(spill) = stream.spill.as_mut() {
                    spill.write(&row)?;
                }
                stream.len += 1;
                if let Some(cache) = stream.cache.as_mut() {
                    if stream.len <= self.config.cache_size {
                        cache.push(row);
                    } else {
                        debug!(
                            "{}: stream from '{}' passed {} rows, replaying from disk",
                            io.name(),
                            stream.origin,
                            self.config.cache_size
                        );
                        stream.cache = None;
                    }
                }
            }
            if io.is_stopped() {
                return Ok(false);
            }
            if let Some(spill) = stream.spill.as_mut() {
                spill.finish_writing()?;
            }
            debug!(
                "{}: cached {} rows from '{}' ({})",
                io.name(),
                stream.len,
                stream.origin,
                if stream.cache.is_some() { "memory" } else { "disk" }
            );
            if stream.len == 0 {
                all_rows = false;
            }
        }
        Ok(all_rows)
    }

    fn bind(&self, main: &Row, io: &StepIo) -> Result<JoinLayout> {
        let mut actual: Vec<&RowSchema> = vec![main.schema()];
        for stream in &self.streams {
            let schema = stream.schema().ok_or_else(|| {
                PipelineError::InvalidRow(format!("stream from '{}' has no rows", stream.origin))
            })?;
            actual.push(schema);
        }
        for (resolved, schema) in self.resolved.iter().zip(&actual) {
            check_layout(io.name(), io.catalog().as_ref(), resolved.as_deref(), schema)?;
        }
        let layouts: Vec<Option<&RowSchema>> = actual.into_iter().map(Some).collect();
        let merged = Self::merge(&layouts)?;
        let condition = match &self.config.condition {
            Some(condition) => Some(condition.bind(merged.schema())?),
            None => None,
        };
        debug!("{}: output layout {}", io.name(), merged.schema());
        Ok(JoinLayout { merged, condition })
    }

    /// Move to the next combination. False when the main stream ended.
    fn advance(&mut self, io: &mut StepIo) -> Result<bool> {
        if self.main_row.is_some() {
            // Innermost stream first; a wrap carries outwards.
            let mut carry = true;
            for i in (0..self.streams.len()).rev() {
                let (row, wrapped) = self.streams[i].next()?;
                self.current[i] = row;
                if !wrapped {
                    carry = false;
                    break;
                }
            }
            if !carry {
                return Ok(true);
            }
        }
        match io.get_row_from_index(self.main_input) {
            Some(row) => {
                self.main_row = Some(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn emit(&mut self, io: &mut StepIo) -> Result<()> {
        let Some(main) = self.main_row.as_ref() else {
            return Ok(());
        };
        if !self.layout.is_bound() {
            let layout = self.bind(main, io)?;
            self.layout = Binding::Bound(layout);
        }
        let Some(layout) = self.layout.get() else {
            return Ok(());
        };
        let mut parts: Vec<&Row> = Vec::with_capacity(self.current.len() + 1);
        parts.push(main);
        parts.extend(self.current.iter());
        let row = layout.merged.combine(&parts)?;
        if layout.condition.as_ref().is_none_or(|c| c.evaluate(&row)) {
            io.put_row(row);
            self.combinations += 1;
        }
        Ok(())
    }

    fn delete_spill_files(&mut self) {
        for stream in &mut self.streams {
            stream.cache = None;
            if let Some(spill) = stream.spill.take() {
                match spill.delete() {
                    Ok(path) => debug!("removed spill file {}", path.display()),
                    Err(e) => warn!("could not remove spill file: {e}"),
                }
            }
        }
    }
}

impl Step for CartesianJoin {
    fn kind(&self) -> &'static str {
        "CartesianJoin"
    }

    fn fields(&self, inputs: &[InputLayout]) -> Result<Option<Arc<RowSchema>>> {
        let Some(ordered) = self.ordered(inputs) else {
            return Ok(None);
        };
        let layouts: Vec<Option<&RowSchema>> =
            ordered.iter().map(|input| input.schema.as_deref()).collect();
        if layouts.iter().any(Option::is_none) {
            return Ok(None);
        }
        Ok(Some(Arc::clone(Self::merge(&layouts)?.schema())))
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_name("main step", &self.config.main_step)?;
        let main_input = ctx.input_index(&self.config.main_step).ok_or_else(|| {
            ctx.config_error(format!(
                "main step '{}' is not an input of this step",
                self.config.main_step
            ))
        })?;
        let ordered = self
            .ordered(ctx.inputs)
            .ok_or_else(|| ctx.config_error("main step is not an input"))?;

        if let Some(condition) = &self.config.condition {
            let layouts: Vec<Option<&RowSchema>> =
                ordered.iter().map(|input| input.schema.as_deref()).collect();
            if layouts.iter().all(Option::is_some) {
                let merged = Self::merge(&layouts).map_err(|e| ctx.config_error(e.to_string()))?;
                condition
                    .bind(merged.schema())
                    .map_err(|e| ctx.config_error(e.to_string()))?;
            }
        }

        self.spill_dir = self
            .config
            .spill_dir
            .clone()
            .unwrap_or_else(|| ctx.config.spill_dir.clone());
        self.main_input = main_input;
        self.resolved = ordered.iter().map(|input| input.schema.clone()).collect();
        self.streams = ctx
            .inputs
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != main_input)
            .map(|(input, layout)| CachedStream {
                input,
                origin: layout.step.clone(),
                cache: Some(Vec::new()),
                spill: None,
                len: 0,
                position: 0,
            })
            .collect();
        self.phase = Phase::Caching;
        debug!(
            "{}: joining '{}' with {} other stream(s), cache size {}, spill dir {}",
            ctx.step_name,
            self.config.main_step,
            self.streams.len(),
            self.config.cache_size,
            self.spill_dir.display()
        );
        Ok(())
    }

    fn process(&mut self, io: &mut StepIo) -> Result<bool> {
        if self.phase == Phase::Caching {
            if !self.cache_streams(io)? {
                if !io.is_stopped() {
                    info!("{}: an input stream is empty, nothing to join", io.name());
                }
                self.phase = Phase::Done;
                return Ok(false);
            }
            self.current = Vec::with_capacity(self.streams.len());
            for stream in &mut self.streams {
                let (row, _) = stream.next()?;
                self.current.push(row);
            }
            self.phase = Phase::Replaying;
        }
        if self.phase == Phase::Done || !self.advance(io)? {
            if self.phase != Phase::Done {
                debug!("{}: {} combinations emitted", io.name(), self.combinations);
            }
            self.phase = Phase::Done;
            return Ok(false);
        }
        self.emit(io)?;
        Ok(true)
    }

    fn dispose(&mut self) {
        self.delete_spill_files();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Comparison;
    use crate::steps::testing::{Harness, rows, schema};
    use crate::value::{DataType, Value};

    fn stream_a() -> Vec<Row> {
        let s = schema(&[("k", DataType::Integer)]);
        rows(&s, vec![vec![Value::Integer(1)], vec![Value::Integer(2)]])
    }

    fn stream_b() -> Vec<Row> {
        let s = schema(&[("x", DataType::String)]);
        rows(
            &s,
            vec![vec![Value::from("a")], vec![Value::from("b")], vec![Value::from("c")]],
        )
    }

    fn stream_c() -> Vec<Row> {
        let s = schema(&[("flag", DataType::Boolean)]);
        rows(&s, vec![vec![Value::Boolean(true)], vec![Value::Boolean(false)]])
    }

    fn stream_d() -> Vec<Row> {
        let s = schema(&[("n", DataType::Number)]);
        rows(
            &s,
            vec![
                vec![Value::Number(1.0715660391465826e-75)],
                vec![Value::Number(0.1 + 0.2)],
            ],
        )
    }

    fn texts(rows: &[Row]) -> Vec<String> {
        rows.iter().map(Row::to_string).collect()
    }

    fn join(harness: Harness, config: CartesianJoinConfig) -> Vec<Row> {
        harness
            .run(&mut CartesianJoin::new(config))
            .unwrap()
            .outputs
            .remove(0)
    }

    #[test]
    fn test_two_way_order() {
        let harness = Harness::new().input("a", stream_a()).input("b", stream_b());
        let out = join(harness, CartesianJoinConfig::new("a"));
        assert_eq!(
            texts(&out),
            vec!["(1, a)", "(1, b)", "(1, c)", "(2, a)", "(2, b)", "(2, c)"]
        );
        assert_eq!(out[0].schema().names(), vec!["k", "x"]);
    }

    #[test]
    fn test_main_stream_bound_by_name() {
        let harness = Harness::new().input("b", stream_b()).input("a", stream_a());
        let out = join(harness, CartesianJoinConfig::new("a"));
        assert_eq!(texts(&out)[..3], ["(1, a)", "(1, b)", "(1, c)"]);
    }

    #[test]
    fn test_three_way_count_and_odometer_order() {
        let harness = Harness::new()
            .input("a", stream_a())
            .input("b", stream_b())
            .input("c", stream_c());
        let out = join(harness, CartesianJoinConfig::new("a"));
        assert_eq!(out.len(), 2 * 3 * 2);
        assert_eq!(
            texts(&out)[..4],
            ["(1, a, Y)", "(1, a, N)", "(1, b, Y)", "(1, b, N)"]
        );
    }

    #[test]
    fn test_spill_matches_memory() {
        let dir = tempfile::tempdir().unwrap();
        let build = || {
            Harness::new()
                .input("a", stream_a())
                .input("b", stream_b())
                .input("c", stream_c())
                .input("d", stream_d())
        };
        let memory = join(build(), CartesianJoinConfig::new("a"));
        assert_eq!(memory.len(), 24);
        assert_eq!(memory[0].get_by_name("n"), Some(&Value::Number(1.0715660391465826e-75)));
        for cache_size in [0, 1, 2] {
            let config = CartesianJoinConfig::new("a")
                .with_cache_size(cache_size)
                .with_spill_dir(dir.path());
            assert_eq!(join(build(), config), memory, "cache size {cache_size}");
        }
        // Spill files are gone after dispose.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_stream_yields_nothing() {
        let harness = Harness::new().input("a", stream_a()).input("b", vec![]);
        assert!(join(harness, CartesianJoinConfig::new("a")).is_empty());

        let harness = Harness::new().input("a", vec![]).input("b", stream_b());
        assert!(join(harness, CartesianJoinConfig::new("a")).is_empty());
    }

    #[test]
    fn test_duplicate_names_renamed() {
        let harness = Harness::new().input("a", stream_a()).input("a2", stream_a());
        let out = join(harness, CartesianJoinConfig::new("a"));
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].schema().names(), vec!["k", "k_1"]);
    }

    #[test]
    fn test_condition_filters_combinations() {
        let harness = Harness::new().input("a", stream_a()).input("b", stream_b());
        let config = CartesianJoinConfig::new("a")
            .with_condition(Condition::constant("x", Comparison::NotEqual, "b"));
        let out = join(harness, config);
        assert_eq!(texts(&out), vec!["(1, a)", "(1, c)", "(2, a)", "(2, c)"]);
    }

    #[test]
    fn test_unknown_main_step_is_config_error() {
        let harness = Harness::new().input("a", stream_a()).input("b", stream_b());
        let err = harness
            .init(&mut CartesianJoin::new(CartesianJoinConfig::new("zzz")))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_condition_on_unknown_field_is_config_error() {
        let harness = Harness::new().input("a", stream_a()).input("b", stream_b());
        let config = CartesianJoinConfig::new("a").with_condition(Condition::is_null("nope"));
        assert!(harness.init(&mut CartesianJoin::new(config)).unwrap_err().is_config());
    }
}
