//! Tournament-tree external sort engine.
//!
//! tagsort orders large record-oriented files by typed keys declared over
//! byte ranges or CSV fields. It is a tag sort: each record is reduced to
//! a fixed-shape proxy carrying a byte-comparable encoded key and a
//! locator back to the raw bytes, so the sort itself never copies record
//! data and the hot comparison is a plain byte compare.
//!
//! Data flows input → tournament → runs → tournament → … → output:
//! pass 1 drains the input through a loser tree one phase at a time,
//! producing sorted runs bounded by the leaf row; merge passes stream
//! run groups back through the same tree until one pass can feed the
//! output stage, which applies the duplicate disposition and re-checks
//! ordering while it writes.
//!
//! # Example
//!
//! ```no_run
//! use tagsort_core::{parse_column_spec, parse_order_spec, SortConfig, SortEngine};
//!
//! let mut config = SortConfig::new();
//! config.input_files.push("input.txt".into());
//! config.output_file = Some("sorted.txt".into());
//! let (column, offset_given) = parse_column_spec("name type String offset 0 length 6")?;
//! config.columns.push(column, offset_given)?;
//! config.order_by.push(parse_order_spec("name ASC")?);
//!
//! let stats = SortEngine::new(&config)?.run()?;
//! assert_eq!(stats.output_records, stats.input_records - stats.filtered_records);
//! # Ok::<(), tagsort_core::SortError>(())
//! ```

mod aggregate;
mod columns;
mod config;
mod csv;
mod dedup;
mod error;
mod key;
mod orchestrator;
mod predicate;
mod provider;
mod proxy;
mod publisher;
mod reader;
mod segment;
mod tournament;

pub use aggregate::{AggregateOp, AggregateSpec, Aggregator};
pub use columns::{ColumnLayout, ColumnValue};
pub use config::{
    parse_aggregate_spec, parse_column_spec, parse_delimiter, parse_order_spec, SortConfig,
    SortPlan, DEFAULT_MAX_RECORD, DEFAULT_POWER,
};
pub use csv::{CsvFormat, CsvPreset};
pub use dedup::{DuplicateDisposition, DuplicateFilter};
pub use error::SortError;
pub use key::{CopyOrder, KeyCodec, KeyDirection, KeyPart, KeyType, MAX_KEY_BYTES};
pub use orchestrator::{CancelToken, SortEngine, SortStats};
pub use predicate::{ComparePredicate, RowContext, RowPredicate};
pub use provider::{InputCounters, InputSource, ProviderSpec, RecordProvider, RowProvider};
pub use proxy::{comparison_count, ProxyPool, RecordProxy};
pub use publisher::{OutputTarget, RecordPublisher, StreamPublisher};
pub use reader::{Framing, SourceReader, SourceStore};
pub use segment::{SegmentReader, SegmentStore};
pub use tournament::{LeafSource, Tournament, MAX_DEPTH, MIN_DEPTH};
