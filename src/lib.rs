//! # rowpipes-rs
//!
//! A streaming row-pipeline engine in the style of classic ETL tools.
//!
//! Steps run concurrently, one thread each, and exchange typed rows through
//! bounded [`RowSet`]s. A full row set blocks its producer, so memory stays
//! bounded however fast a source is. Rows that break a step's business
//! rules can be routed to an error hop instead of failing the run, and one
//! failing step stops every other step cooperatively.
//!
//! ## Overview
//!
//! - **Rows**: ordered, named, typed values ([`Row`], [`RowSchema`], [`Value`])
//! - **Row sets**: bounded single-producer/single-consumer channels
//! - **Steps**: `init` / `process` / `dispose` units of work ([`Step`])
//! - **Schema merging**: union or concatenation of input layouts ([`SchemaMerger`])
//! - **Cartesian join**: N-way cross product that spills to disk
//!   ([`steps::CartesianJoin`])
//! - **Error hops**: per-row failure isolation ([`ErrorRowSink`])
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use rowpipes_rs::condition::{Comparison, Condition};
//! use rowpipes_rs::steps::{Collector, FilterRows, FilterRowsConfig, RowsSource};
//! use rowpipes_rs::{DataType, Pipeline, RowSchema, Value};
//!
//! let schema = Arc::new(RowSchema::of(&[("salary", DataType::Integer)]).unwrap());
//! let source = RowsSource::from_values(
//!     schema,
//!     vec![vec![Value::Integer(50_000)], vec![Value::Integer(75_000)]],
//! )
//! .unwrap();
//! let filter = FilterRows::new(FilterRowsConfig::new(Condition::constant(
//!     "salary",
//!     Comparison::Greater,
//!     60_000i64,
//! )));
//! let collector = Collector::new();
//! let rows = collector.handle();
//!
//! let mut pipeline = Pipeline::new();
//! pipeline
//!     .add_step("employees", source)
//!     .add_step("well_paid", filter)
//!     .add_step("out", collector)
//!     .add_hop("employees", "well_paid")
//!     .add_hop("well_paid", "out");
//!
//! assert!(pipeline.run().unwrap().is_success());
//! assert_eq!(rows.len(), 1);
//! ```

pub mod cancel;
pub mod condition;
pub mod config;
pub mod error;
pub mod error_rows;
pub mod messages;
pub mod pipeline;
pub mod row;
pub mod row_set;
pub mod schema_merge;
pub mod spill;
pub mod step;
pub mod step_io;
pub mod steps;
pub mod value;

pub use cancel::CancellationToken;
pub use condition::{BoundCondition, Comparison, Condition, Operand};
pub use config::EngineConfig;
pub use error::{PipelineError, Result};
pub use error_rows::{ErrorHandling, ErrorRowSink, RowError};
pub use messages::{DefaultCatalog, MessageCatalog, SharedCatalog, default_catalog};
pub use pipeline::{Pipeline, PipelineResult, StepStatus};
pub use row::{FieldMeta, Row, RowSchema};
pub use row_set::{PutOutcome, RowPoll, RowSet};
pub use schema_merge::{MergeMode, MergedSchema, SchemaMerger};
pub use spill::SpillFile;
pub use step::{Binding, InitContext, InputLayout, Step, StepState, check_layout};
pub use step_io::{StepIo, StepMetrics};
pub use value::{DataType, Value};
