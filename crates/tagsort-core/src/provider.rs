//! The input stage: raw records in, keyed proxies out.
//!
//! `RowProvider::next` walks each record through the same gauntlet every
//! time: advance across input files, withhold headers, count, guard the
//! length, apply WHERE, apply STOP, extract columns and the key, then
//! populate a pooled proxy with the key and the record's locator.

use std::ops::Range;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::debug;

use crate::columns::ColumnLayout;
use crate::csv::CsvFormat;
use crate::error::SortError;
use crate::key::KeyCodec;
use crate::predicate::{ComparePredicate, RowContext, RowPredicate};
use crate::proxy::{ProxyPool, RecordProxy};
use crate::reader::{Framing, SourceReader, SourceStore};

/// Anything that can feed proxies to the tournament.
pub trait RecordProvider {
    /// The next proxy, or `None` at end of input.
    fn next(&mut self, pool: &mut ProxyPool) -> Result<Option<RecordProxy>, SortError>;

    /// Rewinds to the first record.
    fn reset(&mut self) -> Result<(), SortError>;

    /// Releases any open handles.
    fn close(&mut self) -> Result<(), SortError>;

    /// Upper bound on rows still to come; drives the pass plan.
    fn max_rows_estimate(&self) -> u64;
}

/// One input, either pre-loaded into memory or a file to stream.
#[derive(Clone)]
pub enum InputSource {
    /// Bytes already in memory (cached files, stdin).
    Cached { name: String, data: Rc<Vec<u8>> },
    /// A file read incrementally.
    File { path: PathBuf },
}

impl InputSource {
    /// Loads the configured inputs. No paths means stdin, which must be
    /// cached because it cannot be re-read for output.
    pub fn load(paths: &[PathBuf], cache: bool) -> Result<Vec<InputSource>, SortError> {
        if paths.is_empty() {
            let mut data = Vec::new();
            std::io::Read::read_to_end(&mut std::io::stdin().lock(), &mut data)
                .map_err(|e| SortError::io("reading stdin", e))?;
            return Ok(vec![InputSource::Cached { name: "stdin".to_string(), data: Rc::new(data) }]);
        }
        paths
            .iter()
            .map(|path| {
                if cache {
                    let data = std::fs::read(path)
                        .map_err(|e| SortError::io(format!("reading {}", path.display()), e))?;
                    Ok(InputSource::Cached {
                        name: path.display().to_string(),
                        data: Rc::new(data),
                    })
                } else {
                    Ok(InputSource::File { path: path.clone() })
                }
            })
            .collect()
    }

    fn name(&self) -> String {
        match self {
            InputSource::Cached { name, .. } => name.clone(),
            InputSource::File { path } => path.display().to_string(),
        }
    }

    fn open(&self, framing: &Framing) -> Result<SourceReader, SortError> {
        match self {
            InputSource::Cached { name, data } => {
                Ok(SourceReader::cached(name.clone(), framing.clone(), Rc::clone(data)))
            }
            InputSource::File { path } => SourceReader::streamed(path, framing.clone()),
        }
    }

    fn register(&self, store: &mut SourceStore) -> u32 {
        match self {
            InputSource::Cached { name, data } => store.add_cached(name.clone(), Rc::clone(data)),
            InputSource::File { path } => store.add_file(path.clone()),
        }
    }
}

/// Everything the row provider needs besides the inputs themselves.
pub struct ProviderSpec {
    pub framing: Framing,
    pub csv: Option<CsvFormat>,
    pub layout: ColumnLayout,
    pub codec: KeyCodec,
    pub where_predicates: Vec<ComparePredicate>,
    pub stop_predicates: Vec<ComparePredicate>,
    /// Negate ordinals so later records win key ties (LastOnly, Reverse).
    pub negate_ordinals: bool,
    /// Withhold the first record of each input as a header.
    pub capture_header: bool,
    /// Records longer than this are rejected by the length guard.
    pub max_record_len: usize,
    /// Planning hint when the input size is unknown.
    pub row_max: u64,
}

/// Counters the provider maintains across the whole input.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputCounters {
    /// Records read and counted (headers and comment lines excluded).
    pub input_records: u64,
    /// Records dropped by WHERE.
    pub filtered_records: u64,
    /// Records rejected by the length guard.
    pub length_rejects: u64,
}

/// The first-pass provider over the original inputs.
pub struct RowProvider {
    spec: ProviderSpec,
    inputs: Vec<InputSource>,
    reader: Option<SourceReader>,
    file_index: usize,
    /// 1-relative within the current file.
    file_record_number: i64,
    /// 1-relative across all files; proxies carry this as the ordinal.
    continuous_record_number: i64,
    file_filtered: u64,
    counters: InputCounters,
    header: Option<Vec<u8>>,
    header_pending: bool,
    stopped: bool,
    row: Vec<u8>,
    key: Vec<u8>,
    exact_rows: Option<u64>,
}

impl RowProvider {
    /// Builds the provider and the re-read store over the same inputs.
    pub fn new(inputs: Vec<InputSource>, spec: ProviderSpec) -> (Self, SourceStore) {
        let mut store = SourceStore::new();
        for input in &inputs {
            input.register(&mut store);
        }
        let exact_rows = inputs
            .iter()
            .map(|input| match input {
                InputSource::Cached { data, .. } => {
                    let reader =
                        SourceReader::cached("", spec.framing.clone(), Rc::clone(data));
                    reader.exact_rows()
                }
                InputSource::File { .. } => None,
            })
            .try_fold(0u64, |acc, rows| rows.map(|r| acc + r));

        let header_pending = spec.capture_header;
        let key_capacity = KeyCodec::key_capacity();
        let provider = Self {
            spec,
            inputs,
            reader: None,
            file_index: 0,
            file_record_number: 0,
            continuous_record_number: 0,
            file_filtered: 0,
            counters: InputCounters::default(),
            header: None,
            header_pending,
            stopped: false,
            row: Vec::with_capacity(4096),
            key: Vec::with_capacity(key_capacity),
            exact_rows,
        };
        (provider, store)
    }

    /// The captured header record, if any.
    pub fn take_header(&mut self) -> Option<Vec<u8>> {
        self.header.take()
    }

    /// Reads ahead for the header record so the output stage can write it
    /// before the first phase pulls any rows.
    pub fn prefetch_header(&mut self) -> Result<Option<Vec<u8>>, SortError> {
        if !self.spec.capture_header || !self.header_pending {
            return Ok(self.header.clone());
        }
        if self.reader.is_none() {
            match self.inputs.first() {
                Some(input) => self.reader = Some(input.open(&self.spec.framing)?),
                None => return Ok(None),
            }
        }
        loop {
            let got = self.reader.as_mut().expect("reader is open").next(&mut self.row)?;
            match got {
                None => {
                    self.header_pending = false;
                    return Ok(None);
                }
                Some(_) => {
                    if let Some(csv) = &self.spec.csv {
                        if csv.is_comment(&self.row) || csv.is_ignored_empty(&self.row) {
                            continue;
                        }
                    }
                    self.header_pending = false;
                    self.header = Some(self.row.clone());
                    return Ok(self.header.clone());
                }
            }
        }
    }

    /// Input-side counters.
    pub fn counters(&self) -> InputCounters {
        self.counters
    }

    fn record_length_ok(&self, len: usize) -> bool {
        match self.spec.framing {
            Framing::Fixed(expected) => len == expected,
            Framing::Delimited(_) => len <= self.spec.max_record_len,
        }
    }

    fn log_file_statistics(&mut self) {
        if let Some(reader) = &self.reader {
            debug!(
                source = reader.name(),
                rows = self.file_record_number,
                filtered = self.file_filtered,
                "input drained"
            );
        }
        self.counters.input_records += self.file_record_number as u64;
        self.counters.filtered_records += self.file_filtered;
    }

    fn evaluate_all(
        predicates: &[ComparePredicate],
        row: &RowContext<'_>,
        null_means: bool,
    ) -> Result<bool, SortError> {
        for predicate in predicates {
            let verdict = predicate.evaluate(row)?.unwrap_or(null_means);
            if !verdict {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl RecordProvider for RowProvider {
    fn next(&mut self, pool: &mut ProxyPool) -> Result<Option<RecordProxy>, SortError> {
        if self.stopped {
            return Ok(None);
        }
        if self.reader.is_none() {
            match self.inputs.first() {
                Some(input) => self.reader = Some(input.open(&self.spec.framing)?),
                None => return Ok(None),
            }
        }

        loop {
            let position = {
                let reader = self.reader.as_mut().expect("reader is open");
                reader.next(&mut self.row)?
            };

            let position = match position {
                Some(position) => position,
                None => {
                    // This file is drained; move on if more are listed.
                    self.log_file_statistics();
                    self.file_index += 1;
                    if self.file_index < self.inputs.len() {
                        self.reader = Some(self.inputs[self.file_index].open(&self.spec.framing)?);
                        self.file_record_number = 0;
                        self.file_filtered = 0;
                        self.header_pending = self.spec.capture_header;
                        continue;
                    }
                    self.stopped = true;
                    self.close()?;
                    return Ok(None);
                }
            };

            if let Some(csv) = &self.spec.csv {
                if csv.is_comment(&self.row) || csv.is_ignored_empty(&self.row) {
                    continue;
                }
            }

            if self.header_pending {
                // Each input's leading record is withheld from the sort;
                // the first one is replayed by the output stage.
                self.header_pending = false;
                if self.header.is_none() {
                    self.header = Some(self.row.clone());
                }
                continue;
            }

            self.file_record_number += 1;
            self.continuous_record_number += 1;

            let len = self.row.len();
            if !self.record_length_ok(len) {
                debug!(
                    record = self.continuous_record_number,
                    length = len,
                    "record rejected by length guard"
                );
                self.counters.length_rejects += 1;
                continue;
            }

            let fields: Option<Vec<Range<usize>>> =
                self.spec.csv.as_ref().map(|csv| csv.split_fields(&self.row));
            let row_context = RowContext {
                record: &self.row,
                fields: fields.as_deref(),
                record_number: self.continuous_record_number,
                record_size: len,
                layout: &self.spec.layout,
            };

            // WHERE: null means not selected.
            if !(self.spec.where_predicates.is_empty()
                || Self::evaluate_all(&self.spec.where_predicates, &row_context, false)?)
            {
                self.file_filtered += 1;
                continue;
            }

            // STOP: null means keep going. The terminating record is
            // uncounted and never emitted.
            if !self.spec.stop_predicates.is_empty()
                && Self::evaluate_all(&self.spec.stop_predicates, &row_context, false)?
            {
                self.file_record_number -= 1;
                self.continuous_record_number -= 1;
                debug!(record = self.continuous_record_number + 1, "stopWhen triggered");
                self.stopped = true;
                self.log_file_statistics();
                self.close()?;
                return Ok(None);
            }

            self.spec.codec.extract(
                &self.row,
                fields.as_deref(),
                self.continuous_record_number,
                self.reader.as_ref().map(|r| r.name()).unwrap_or("?"),
                &mut self.key,
            )?;

            let ordinal = if self.spec.negate_ordinals {
                -self.continuous_record_number
            } else {
                self.continuous_record_number
            };

            let mut proxy = pool.acquire();
            proxy.set(&self.key, len as u32, position, self.file_index as u32, ordinal);
            return Ok(Some(proxy));
        }
    }

    fn reset(&mut self) -> Result<(), SortError> {
        self.reader = None;
        self.file_index = 0;
        self.file_record_number = 0;
        self.continuous_record_number = 0;
        self.file_filtered = 0;
        self.counters = InputCounters::default();
        self.header = None;
        self.header_pending = self.spec.capture_header;
        self.stopped = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SortError> {
        self.reader = None;
        Ok(())
    }

    fn max_rows_estimate(&self) -> u64 {
        self.exact_rows.unwrap_or(self.spec.row_max)
    }
}
