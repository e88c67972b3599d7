//! Sort engine error types.

use miette::Diagnostic;
use thiserror::Error;

/// Errors returned by the sort engine.
///
/// Variants fall into five classes: configuration (rejected before any
/// I/O), input, output, predicate, and internal invariant violations.
#[derive(Debug, Error, Diagnostic)]
pub enum SortError {
    /// Two options that cannot be combined were both supplied.
    #[error("conflicting options: {detail}")]
    #[diagnostic(code(tagsort::config::conflicting_options))]
    ConflictingOptions { detail: String },

    /// A sort key or aggregate referenced a column that was never declared.
    #[error("unknown column '{name}'")]
    #[diagnostic(code(tagsort::config::unknown_column))]
    UnknownColumn { name: String },

    /// Binary integer keys accept lengths 1, 2, 4, and 8 only; floats are
    /// fixed at 4 and doubles at 8.
    #[error("unsupported length {length} for {kind} key")]
    #[diagnostic(code(tagsort::config::unsupported_key_length))]
    UnsupportedKeyLength { kind: &'static str, length: usize },

    /// A key or column declaration is malformed.
    #[error("invalid key specification: {detail}")]
    #[diagnostic(code(tagsort::config::invalid_key_spec))]
    InvalidKeySpec { detail: String },

    /// An option value is out of range or malformed.
    #[error("invalid option: {detail}")]
    #[diagnostic(code(tagsort::config::invalid_option))]
    InvalidOption { detail: String },

    /// The declared tree depth cannot guarantee the declared row maximum.
    #[error(
        "power {power} sorts at most {capacity} rows in two passes \
         but rowMax is {row_max}"
    )]
    #[diagnostic(
        code(tagsort::config::power_too_small),
        help("raise --power or lower --rowMax")
    )]
    PowerTooSmall { power: u32, capacity: u64, row_max: u64 },

    /// A record is too short for a declared key or column offset.
    #[error("record {record_number} in {source_file} is {actual} bytes, key needs {needed}")]
    #[diagnostic(code(tagsort::input::short_record))]
    ShortRecord {
        record_number: i64,
        source_file: String,
        needed: usize,
        actual: usize,
    },

    /// A date key failed to parse with the configured format.
    #[error("record {record_number}: cannot parse '{text}' with format '{format}'")]
    #[diagnostic(code(tagsort::input::invalid_date))]
    InvalidDateFormat {
        record_number: i64,
        text: String,
        format: String,
    },

    /// I/O failure with source context.
    #[error("{context}: {source}")]
    #[diagnostic(code(tagsort::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Renaming the sorted temp file over its destination failed.
    /// The temp file is retained for inspection.
    #[error("failed to rename {from} to {to}")]
    #[diagnostic(code(tagsort::output::rename_failed))]
    RenameFailed { from: String, to: String },

    /// The final output stream went backwards — the self-check on the last
    /// pass observed a key below its predecessor.
    #[error(
        "sort failure at output record {record_number}: \
         check --rowMax ({row_max}) and --power ({power})"
    )]
    #[diagnostic(code(tagsort::output::out_of_order))]
    OutOfOrder {
        record_number: u64,
        row_max: u64,
        power: u32,
    },

    /// A WHERE or STOP expression could not be parsed.
    #[error("cannot parse predicate '{expression}': {detail}")]
    #[diagnostic(code(tagsort::predicate::parse))]
    PredicateParse { expression: String, detail: String },

    /// A WHERE or STOP expression evaluated to a non-boolean value.
    #[error("predicate '{expression}' did not return a boolean")]
    #[diagnostic(code(tagsort::predicate::not_boolean))]
    PredicateNotBoolean { expression: String },

    /// The run was cancelled cooperatively.
    #[error("sort cancelled")]
    #[diagnostic(code(tagsort::cancelled))]
    Cancelled,

    /// A tournament or segment invariant was violated.
    #[error("internal error: {detail}")]
    #[diagnostic(code(tagsort::internal))]
    Internal { detail: String },
}

impl SortError {
    /// Wraps an I/O error with a human-readable context string.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SortError::Io { context: context.into(), source }
    }
}

impl From<std::io::Error> for SortError {
    fn from(source: std::io::Error) -> Self {
        SortError::Io { context: "I/O error".to_string(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = SortError::ShortRecord {
            record_number: 12,
            source_file: "input.dat".to_string(),
            needed: 8,
            actual: 5,
        };
        let text = err.to_string();
        assert!(text.contains("record 12"));
        assert!(text.contains("input.dat"));
    }

    #[test]
    fn test_io_wrapping() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = SortError::io("opening work file", inner);
        assert!(err.to_string().contains("opening work file"));
    }
}
