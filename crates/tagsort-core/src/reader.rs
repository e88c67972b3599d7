//! Raw record readers and the positioned re-read store.
//!
//! A `SourceReader` frames one input into records — fixed-length slabs or
//! delimiter-terminated lines — and reports each record's absolute byte
//! position. The sort itself only moves proxies; when the output stage
//! needs the winning records back it asks the `SourceStore` to re-read
//! them by `(source index, position, size)`.
//!
//! Inputs are cached in memory by default, which makes re-reads free and
//! row estimates exact. `--noCacheInput` streams instead, and the store
//! then re-reads through a second seekable handle on the same file.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::SortError;

/// How a source is framed into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Every record is exactly this many bytes.
    Fixed(usize),
    /// Records end with this byte sequence (not included in the record).
    Delimited(Vec<u8>),
}

impl Framing {
    /// The host line separator as a delimiter.
    pub fn host_lines() -> Self {
        Framing::Delimited(b"\n".to_vec())
    }
}

/// The bytes behind one source.
enum ByteSource {
    Cached { data: Rc<Vec<u8>>, pos: usize },
    Streamed { reader: BufReader<File>, pos: u64 },
}

/// Reads one input source as a sequence of (position, record) pairs.
pub struct SourceReader {
    name: String,
    framing: Framing,
    source: ByteSource,
}

impl SourceReader {
    /// Opens a cached source over bytes already in memory.
    pub fn cached(name: impl Into<String>, framing: Framing, data: Rc<Vec<u8>>) -> Self {
        Self { name: name.into(), framing, source: ByteSource::Cached { data, pos: 0 } }
    }

    /// Opens a streaming reader on a file.
    pub fn streamed(path: &Path, framing: Framing) -> Result<Self, SortError> {
        let file = File::open(path)
            .map_err(|e| SortError::io(format!("opening {}", path.display()), e))?;
        Ok(Self {
            name: path.display().to_string(),
            framing,
            source: ByteSource::Streamed { reader: BufReader::new(file), pos: 0 },
        })
    }

    /// The source name for logging and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exact record count, known only for cached sources.
    pub fn exact_rows(&self) -> Option<u64> {
        match &self.source {
            ByteSource::Cached { data, .. } => Some(count_records(&self.framing, data)),
            ByteSource::Streamed { .. } => None,
        }
    }

    /// Reads the next record into `buf`, returning its absolute position.
    /// A final partial fixed record is returned short; the caller's length
    /// guard rejects it.
    pub fn next(&mut self, buf: &mut Vec<u8>) -> Result<Option<u64>, SortError> {
        buf.clear();
        match (&mut self.source, &self.framing) {
            (ByteSource::Cached { data, pos }, Framing::Fixed(len)) => {
                if *pos >= data.len() {
                    return Ok(None);
                }
                let start = *pos;
                let end = (start + len).min(data.len());
                buf.extend_from_slice(&data[start..end]);
                *pos = end;
                Ok(Some(start as u64))
            }
            (ByteSource::Cached { data, pos }, Framing::Delimited(delim)) => {
                if *pos >= data.len() {
                    return Ok(None);
                }
                let start = *pos;
                match find_delimiter(&data[start..], delim) {
                    Some(at) => {
                        buf.extend_from_slice(&data[start..start + at]);
                        *pos = start + at + delim.len();
                    }
                    None => {
                        buf.extend_from_slice(&data[start..]);
                        *pos = data.len();
                    }
                }
                Ok(Some(start as u64))
            }
            (ByteSource::Streamed { reader, pos }, Framing::Fixed(len)) => {
                let start = *pos;
                let mut remaining = *len;
                while remaining > 0 {
                    let mut chunk = vec![0u8; remaining];
                    let n = reader
                        .read(&mut chunk)
                        .map_err(|e| SortError::io(format!("reading {}", self.name), e))?;
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    remaining -= n;
                }
                if buf.is_empty() {
                    return Ok(None);
                }
                *pos = start + buf.len() as u64;
                Ok(Some(start))
            }
            (ByteSource::Streamed { reader, pos }, Framing::Delimited(delim)) => {
                let start = *pos;
                let last = *delim.last().expect("delimiter is never empty");
                loop {
                    let n = reader
                        .read_until(last, buf)
                        .map_err(|e| SortError::io(format!("reading {}", self.name), e))?;
                    if n == 0 {
                        // EOF: a final unterminated record, or nothing.
                        if buf.is_empty() {
                            return Ok(None);
                        }
                        *pos = start + buf.len() as u64;
                        return Ok(Some(start));
                    }
                    if buf.ends_with(delim) {
                        let full = buf.len();
                        buf.truncate(full - delim.len());
                        *pos = start + full as u64;
                        return Ok(Some(start));
                    }
                }
            }
        }
    }

    /// Rewinds to the first record.
    pub fn rewind(&mut self) -> Result<(), SortError> {
        match &mut self.source {
            ByteSource::Cached { pos, .. } => *pos = 0,
            ByteSource::Streamed { reader, pos } => {
                reader
                    .seek(SeekFrom::Start(0))
                    .map_err(|e| SortError::io(format!("rewinding {}", self.name), e))?;
                *pos = 0;
            }
        }
        Ok(())
    }
}

fn find_delimiter(haystack: &[u8], delim: &[u8]) -> Option<usize> {
    if delim.len() == 1 {
        return haystack.iter().position(|&b| b == delim[0]);
    }
    haystack.windows(delim.len()).position(|w| w == delim)
}

fn count_records(framing: &Framing, data: &[u8]) -> u64 {
    if data.is_empty() {
        return 0;
    }
    match framing {
        Framing::Fixed(len) => data.len().div_ceil(*len) as u64,
        Framing::Delimited(delim) => {
            let mut count = 0u64;
            let mut pos = 0usize;
            while pos < data.len() {
                count += 1;
                match find_delimiter(&data[pos..], delim) {
                    Some(at) => pos += at + delim.len(),
                    None => break,
                }
            }
            count
        }
    }
}

/// One source as the output stage sees it.
enum StoredSource {
    Cached(Rc<Vec<u8>>),
    OnDisk { path: PathBuf, handle: Option<File> },
}

/// Re-reads raw record bytes by source index and absolute position.
pub struct SourceStore {
    sources: Vec<StoredSource>,
    names: Vec<String>,
}

impl SourceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self { sources: Vec::new(), names: Vec::new() }
    }

    /// Registers a cached source; returns its index.
    pub fn add_cached(&mut self, name: impl Into<String>, data: Rc<Vec<u8>>) -> u32 {
        self.sources.push(StoredSource::Cached(data));
        self.names.push(name.into());
        (self.sources.len() - 1) as u32
    }

    /// Registers an uncached file re-read through its own handle.
    pub fn add_file(&mut self, path: PathBuf) -> u32 {
        self.names.push(path.display().to_string());
        self.sources.push(StoredSource::OnDisk { path, handle: None });
        (self.sources.len() - 1) as u32
    }

    /// The registered name of a source.
    pub fn name(&self, source_index: u32) -> &str {
        self.names.get(source_index as usize).map(String::as_str).unwrap_or("?")
    }

    /// Reads `size` bytes at `position` of the indexed source into `buf`.
    pub fn read_at(
        &mut self,
        source_index: u32,
        position: u64,
        size: usize,
        buf: &mut Vec<u8>,
    ) -> Result<(), SortError> {
        buf.clear();
        let source = self.sources.get_mut(source_index as usize).ok_or_else(|| {
            SortError::Internal { detail: format!("unknown source index {source_index}") }
        })?;
        match source {
            StoredSource::Cached(data) => {
                let start = position as usize;
                let end = start + size;
                if end > data.len() {
                    return Err(SortError::Internal {
                        detail: format!("record at {position}+{size} is outside its source"),
                    });
                }
                buf.extend_from_slice(&data[start..end]);
                Ok(())
            }
            StoredSource::OnDisk { path, handle } => {
                if handle.is_none() {
                    let file = File::open(&*path)
                        .map_err(|e| SortError::io(format!("reopening {}", path.display()), e))?;
                    *handle = Some(file);
                }
                let file = handle.as_mut().unwrap();
                file.seek(SeekFrom::Start(position))
                    .map_err(|e| SortError::io(format!("seeking {}", path.display()), e))?;
                buf.resize(size, 0);
                file.read_exact(buf)
                    .map_err(|e| SortError::io(format!("re-reading {}", path.display()), e))?;
                Ok(())
            }
        }
    }

    /// Drops any open re-read handles.
    pub fn close(&mut self) {
        for source in &mut self.sources {
            if let StoredSource::OnDisk { handle, .. } = source {
                *handle = None;
            }
        }
    }
}

impl Default for SourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TEST_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn test_path(name: &str) -> PathBuf {
        let count = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("tagsort_reader_{name}_{count}"))
    }

    fn collect(reader: &mut SourceReader) -> Vec<(u64, Vec<u8>)> {
        let mut out = Vec::new();
        let mut buf = Vec::new();
        while let Some(pos) = reader.next(&mut buf).unwrap() {
            out.push((pos, buf.clone()));
        }
        out
    }

    #[test]
    fn test_cached_delimited_records_and_positions() {
        let data = Rc::new(b"one\ntwo\nthree\n".to_vec());
        let mut reader = SourceReader::cached("t", Framing::host_lines(), data);
        let records = collect(&mut reader);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], (0, b"one".to_vec()));
        assert_eq!(records[1], (4, b"two".to_vec()));
        assert_eq!(records[2], (8, b"three".to_vec()));
    }

    #[test]
    fn test_cached_final_record_without_delimiter() {
        let data = Rc::new(b"a\nb".to_vec());
        let mut reader = SourceReader::cached("t", Framing::host_lines(), data);
        let records = collect(&mut reader);
        assert_eq!(records[1], (2, b"b".to_vec()));
    }

    #[test]
    fn test_cached_fixed_records() {
        let data = Rc::new(b"AAAABBBBCC".to_vec());
        let mut reader = SourceReader::cached("t", Framing::Fixed(4), data);
        let records = collect(&mut reader);
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], (4, b"BBBB".to_vec()));
        // Partial tail comes back short for the length guard to reject.
        assert_eq!(records[2], (8, b"CC".to_vec()));
    }

    #[test]
    fn test_multibyte_delimiter() {
        let data = Rc::new(b"a\r\nbb\r\n".to_vec());
        let mut reader =
            SourceReader::cached("t", Framing::Delimited(b"\r\n".to_vec()), data);
        let records = collect(&mut reader);
        assert_eq!(records[0].1, b"a");
        assert_eq!(records[1], (3, b"bb".to_vec()));
    }

    #[test]
    fn test_exact_rows() {
        let lines = SourceReader::cached(
            "t",
            Framing::host_lines(),
            Rc::new(b"x\ny\nz".to_vec()),
        );
        assert_eq!(lines.exact_rows(), Some(3));

        let fixed =
            SourceReader::cached("t", Framing::Fixed(4), Rc::new(b"AAAABBBB".to_vec()));
        assert_eq!(fixed.exact_rows(), Some(2));

        let empty = SourceReader::cached("t", Framing::host_lines(), Rc::new(Vec::new()));
        assert_eq!(empty.exact_rows(), Some(0));
    }

    #[test]
    fn test_streamed_matches_cached() {
        let path = test_path("stream.txt");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"cc\na\nbbbb\n").unwrap();
        drop(f);

        let mut reader = SourceReader::streamed(&path, Framing::host_lines()).unwrap();
        let records = collect(&mut reader);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], (5, b"bbbb".to_vec()));
        assert_eq!(reader.exact_rows(), None);

        reader.rewind().unwrap();
        let again = collect(&mut reader);
        assert_eq!(again.len(), 3);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_store_read_back_cached_and_disk() {
        let data = Rc::new(b"alpha\nbeta\n".to_vec());
        let mut store = SourceStore::new();
        let cached_idx = store.add_cached("mem", data);

        let path = test_path("store.dat");
        std::fs::write(&path, b"0123456789").unwrap();
        let disk_idx = store.add_file(path.clone());

        let mut buf = Vec::new();
        store.read_at(cached_idx, 6, 4, &mut buf).unwrap();
        assert_eq!(buf, b"beta");

        store.read_at(disk_idx, 3, 4, &mut buf).unwrap();
        assert_eq!(buf, b"3456");

        assert!(store.read_at(cached_idx, 8, 100, &mut buf).is_err());

        store.close();
        std::fs::remove_file(&path).unwrap();
    }
}
