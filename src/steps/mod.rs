//! Built-in step implementations.
//!
//! Each step keeps its declared configuration in public-facing config
//! structs and its runtime state (first-row bindings, caches, cursors) in
//! private fields.

pub mod cartesian_join;
pub mod collector;
pub mod filter_rows;
pub mod merge_streams;
pub mod normaliser;
pub mod source;
pub mod text_output;
pub mod validator;

pub use cartesian_join::{CartesianJoin, CartesianJoinConfig, DEFAULT_CACHE_SIZE};
pub use collector::{CollectedRows, Collector};
pub use filter_rows::{FilterRows, FilterRowsConfig};
pub use merge_streams::MergeStreams;
pub use normaliser::{Normaliser, NormaliserConfig, NormaliserField};
pub use source::{DelimitedTextInput, RowsSource};
pub use text_output::DelimitedTextOutput;
pub use validator::{FieldValidation, Rule, Validator, ValidatorConfig};
