//! Message lookup for user-facing texts.
//!
//! Components receive a catalog through their context instead of reading
//! a global table, so tests can swap in their own texts.

use std::collections::HashMap;
use std::sync::Arc;

pub const ROW_REJECTED: &str = "Step.RowRejected";
pub const TOO_MANY_REJECTED: &str = "Step.TooManyRejectedRows";
pub const MAX_PERCENT_REJECTED: &str = "Step.MaxPercentageRejectedReached";
pub const FIELD_NOT_FOUND: &str = "Step.FieldNotFound";
pub const TARGET_NOT_WIRED: &str = "Step.TargetNotWired";
pub const SCHEMA_MISMATCH: &str = "Step.SchemaMismatch";
pub const VALIDATION_NULL: &str = "Validator.NullNotAllowed";
pub const VALIDATION_MAX_LENGTH: &str = "Validator.MaxLengthExceeded";
pub const VALIDATION_MIN_VALUE: &str = "Validator.BelowMinimum";
pub const VALIDATION_MAX_VALUE: &str = "Validator.AboveMaximum";
pub const VALIDATION_NOT_ALLOWED: &str = "Validator.ValueNotAllowed";
pub const VALIDATION_PATTERN: &str = "Validator.PatternMismatch";
pub const CONVERSION_FAILED: &str = "Input.ConversionFailed";

/// Read-only source of message texts. `{0}`, `{1}`, ... in a text are
/// replaced by the matching argument.
pub trait MessageCatalog: Send + Sync {
    fn text(&self, key: &str) -> Option<&str>;

    fn message(&self, key: &str, args: &[&str]) -> String {
        match self.text(key) {
            Some(text) => substitute(text, args),
            None if args.is_empty() => key.to_string(),
            None => format!("{key}: {}", args.join(", ")),
        }
    }
}

fn substitute(text: &str, args: &[&str]) -> String {
    let mut out = text.to_string();
    for (i, arg) in args.iter().enumerate() {
        out = out.replace(&format!("{{{i}}}"), arg);
    }
    out
}

/// Built-in English texts.
#[derive(Debug, Clone)]
pub struct DefaultCatalog {
    texts: HashMap<&'static str, &'static str>,
}

impl Default for DefaultCatalog {
    fn default() -> Self {
        let texts = HashMap::from([
            (ROW_REJECTED, "row rejected: {0}"),
            (
                TOO_MANY_REJECTED,
                "too many rejected rows: maximum is {0}, rejected {1}",
            ),
            (
                MAX_PERCENT_REJECTED,
                "rejected rows reached {0}% ({1} of {2} rows read)",
            ),
            (FIELD_NOT_FOUND, "field '{0}' not found in input"),
            (TARGET_NOT_WIRED, "target step '{0}' is not connected"),
            (SCHEMA_MISMATCH, "row layout {0} does not match resolved layout {1}"),
            (VALIDATION_NULL, "field '{0}' may not be null"),
            (VALIDATION_MAX_LENGTH, "field '{0}' is longer than {1}"),
            (VALIDATION_MIN_VALUE, "field '{0}' is below minimum {1}"),
            (VALIDATION_MAX_VALUE, "field '{0}' is above maximum {1}"),
            (VALIDATION_NOT_ALLOWED, "field '{0}' has a value outside the allowed list"),
            (VALIDATION_PATTERN, "field '{0}' does not match pattern {1}"),
            (CONVERSION_FAILED, "line {0}: {1}"),
        ]);
        Self { texts }
    }
}

impl MessageCatalog for DefaultCatalog {
    fn text(&self, key: &str) -> Option<&str> {
        self.texts.get(key).copied()
    }
}

/// Catalog handle passed around the engine.
pub type SharedCatalog = Arc<dyn MessageCatalog>;

pub fn default_catalog() -> SharedCatalog {
    Arc::new(DefaultCatalog::default())
}
