//! Run storage between passes.
//!
//! A run is a sorted sequence of proxies produced by one phase. Runs live
//! either in memory (the default) or in a single on-disk work file
//! (`--diskWork`): length-prefixed entries appended run after run, with an
//! in-memory index of each run's start offset and count. Every run is
//! written once and consumed exactly once by a `SegmentReader` on the
//! following pass.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SortError;
use crate::provider::RecordProvider;
use crate::proxy::{ProxyPool, RecordProxy};

/// Largest key an on-disk entry may carry; a corrupt work file fails fast.
const MAX_ENTRY_KEY: u32 = 4096;

#[derive(Debug, Clone, Copy)]
struct RunInfo {
    offset: u64,
    count: u64,
}

/// Where runs are kept between passes.
pub enum SegmentStore {
    Memory(MemoryStore),
    Disk(DiskStore),
}

impl SegmentStore {
    /// Runs held in memory.
    pub fn in_memory() -> Self {
        SegmentStore::Memory(MemoryStore { runs: Vec::new(), open: false })
    }

    /// Runs appended to one work file under `work_dir`. The file is
    /// created on first use and removed on close (or drop).
    pub fn on_disk(work_dir: &Path) -> Self {
        let name = format!("Sorted.{}.{:x}.tmp", std::process::id(), next_work_file_seq());
        SegmentStore::Disk(DiskStore {
            path: work_dir.join(name),
            writer: None,
            runs: Vec::new(),
            pending: 0,
            run_start: 0,
        })
    }

    /// Opens a new run; every `append` until `finish_run` belongs to it.
    pub fn start_run(&mut self) -> Result<(), SortError> {
        match self {
            SegmentStore::Memory(store) => {
                store.runs.push(Vec::new());
                store.open = true;
                Ok(())
            }
            SegmentStore::Disk(store) => store.start_run(),
        }
    }

    /// Adds one proxy to the open run. The disk store serializes and
    /// recycles the proxy immediately; the memory store keeps it live.
    pub fn append(&mut self, proxy: RecordProxy, pool: &mut ProxyPool) -> Result<(), SortError> {
        match self {
            SegmentStore::Memory(store) => {
                store.runs.last_mut().expect("run is open").push(proxy);
                Ok(())
            }
            SegmentStore::Disk(store) => {
                store.write_entry(&proxy)?;
                pool.release(proxy);
                Ok(())
            }
        }
    }

    /// Seals the open run.
    pub fn finish_run(&mut self) -> Result<(), SortError> {
        match self {
            SegmentStore::Memory(store) => {
                store.open = false;
                Ok(())
            }
            SegmentStore::Disk(store) => store.finish_run(),
        }
    }

    /// Runs written so far (consumed ones included).
    pub fn run_count(&self) -> usize {
        match self {
            SegmentStore::Memory(store) => store.runs.len(),
            SegmentStore::Disk(store) => store.runs.len(),
        }
    }

    /// Records in a run.
    pub fn run_len(&self, run: usize) -> u64 {
        match self {
            SegmentStore::Memory(store) => {
                store.runs.get(run).map(|r| r.len() as u64).unwrap_or(0)
            }
            SegmentStore::Disk(store) => store.runs.get(run).map(|r| r.count).unwrap_or(0),
        }
    }

    /// Opens a reader over one run. A memory run is handed over whole and
    /// cannot be opened twice.
    pub fn open_run(&mut self, run: usize) -> Result<SegmentReader, SortError> {
        match self {
            SegmentStore::Memory(store) => {
                let proxies = store
                    .runs
                    .get_mut(run)
                    .map(std::mem::take)
                    .ok_or_else(|| SortError::Internal { detail: format!("no run {run}") })?;
                Ok(SegmentReader::Memory { proxies, next: 0 })
            }
            SegmentStore::Disk(store) => store.open_run(run),
        }
    }

    /// Deletes the work file, if any. Also happens on drop.
    pub fn close(&mut self) -> Result<(), SortError> {
        if let SegmentStore::Disk(store) = self {
            store.writer = None;
            if store.path.exists() {
                std::fs::remove_file(&store.path)
                    .map_err(|e| SortError::io(format!("removing {}", store.path.display()), e))?;
                debug!(path = %store.path.display(), "work file removed");
            }
        }
        Ok(())
    }
}

pub struct MemoryStore {
    runs: Vec<Vec<RecordProxy>>,
    open: bool,
}

pub struct DiskStore {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    runs: Vec<RunInfo>,
    pending: u64,
    run_start: u64,
}

impl DiskStore {
    fn start_run(&mut self) -> Result<(), SortError> {
        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| SortError::io(format!("creating {}", self.path.display()), e))?;
            debug!(path = %self.path.display(), "work file opened");
            self.writer = Some(BufWriter::new(file));
        }
        self.pending = 0;
        Ok(())
    }

    fn write_entry(&mut self, proxy: &RecordProxy) -> Result<(), SortError> {
        let writer = self.writer.as_mut().expect("run is open");
        let key = proxy.key();
        let io = |e| SortError::io("writing work file", e);
        writer.write_all(&(key.len() as u32).to_le_bytes()).map_err(io)?;
        writer.write_all(key).map_err(io)?;
        writer.write_all(&proxy.original_size.to_le_bytes()).map_err(io)?;
        writer.write_all(&proxy.position.to_le_bytes()).map_err(io)?;
        writer.write_all(&proxy.source_index.to_le_bytes()).map_err(io)?;
        writer.write_all(&proxy.ordinal.to_le_bytes()).map_err(io)?;
        self.pending += 1;
        Ok(())
    }

    fn finish_run(&mut self) -> Result<(), SortError> {
        let writer = self.writer.as_mut().expect("run is open");
        writer.flush().map_err(|e| SortError::io("flushing work file", e))?;
        let end = writer
            .get_mut()
            .stream_position()
            .map_err(|e| SortError::io("positioning work file", e))?;
        self.runs.push(RunInfo { offset: self.run_start, count: self.pending });
        self.run_start = end;
        self.pending = 0;
        Ok(())
    }

    fn open_run(&mut self, run: usize) -> Result<SegmentReader, SortError> {
        let info = *self
            .runs
            .get(run)
            .ok_or_else(|| SortError::Internal { detail: format!("no run {run}") })?;
        let mut file = File::open(&self.path)
            .map_err(|e| SortError::io(format!("opening {}", self.path.display()), e))?;
        file.seek(SeekFrom::Start(info.offset))
            .map_err(|e| SortError::io("seeking work file", e))?;
        Ok(SegmentReader::Disk {
            reader: BufReader::new(file),
            offset: info.offset,
            remaining: info.count,
            total: info.count,
        })
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        self.writer = None;
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Replays one stored run in order; presents the same provider contract
/// the tournament leaves expect.
pub enum SegmentReader {
    Memory { proxies: Vec<RecordProxy>, next: usize },
    Disk { reader: BufReader<File>, offset: u64, remaining: u64, total: u64 },
}

impl SegmentReader {
    fn read_entry(
        reader: &mut BufReader<File>,
        pool: &mut ProxyPool,
    ) -> Result<RecordProxy, SortError> {
        let io = |e| SortError::io("reading work file", e);
        let mut word = [0u8; 4];
        reader.read_exact(&mut word).map_err(io)?;
        let key_len = u32::from_le_bytes(word);
        if key_len > MAX_ENTRY_KEY {
            return Err(SortError::Internal {
                detail: format!("work file entry claims a {key_len}-byte key"),
            });
        }

        let mut key = [0u8; MAX_ENTRY_KEY as usize];
        let key = &mut key[..key_len as usize];
        reader.read_exact(key).map_err(io)?;

        let mut size = [0u8; 4];
        reader.read_exact(&mut size).map_err(io)?;
        let mut position = [0u8; 8];
        reader.read_exact(&mut position).map_err(io)?;
        let mut source = [0u8; 4];
        reader.read_exact(&mut source).map_err(io)?;
        let mut ordinal = [0u8; 8];
        reader.read_exact(&mut ordinal).map_err(io)?;

        let mut proxy = pool.acquire();
        proxy.set(
            key,
            u32::from_le_bytes(size),
            u64::from_le_bytes(position),
            u32::from_le_bytes(source),
            i64::from_le_bytes(ordinal),
        );
        Ok(proxy)
    }
}

impl RecordProvider for SegmentReader {
    fn next(&mut self, pool: &mut ProxyPool) -> Result<Option<RecordProxy>, SortError> {
        match self {
            SegmentReader::Memory { proxies, next } => {
                if *next >= proxies.len() {
                    return Ok(None);
                }
                let proxy = std::mem::take(&mut proxies[*next]);
                *next += 1;
                Ok(Some(proxy))
            }
            SegmentReader::Disk { reader, remaining, .. } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let proxy = Self::read_entry(reader, pool)?;
                *remaining -= 1;
                Ok(Some(proxy))
            }
        }
    }

    fn reset(&mut self) -> Result<(), SortError> {
        match self {
            // Memory runs are moved out as they are read; they cannot be
            // replayed.
            SegmentReader::Memory { next, .. } => {
                if *next == 0 {
                    Ok(())
                } else {
                    Err(SortError::Internal {
                        detail: "a memory run can only be read once".to_string(),
                    })
                }
            }
            SegmentReader::Disk { reader, offset, remaining, total } => {
                reader
                    .seek(SeekFrom::Start(*offset))
                    .map_err(|e| SortError::io("rewinding work file", e))?;
                *remaining = *total;
                Ok(())
            }
        }
    }

    fn close(&mut self) -> Result<(), SortError> {
        Ok(())
    }

    fn max_rows_estimate(&self) -> u64 {
        match self {
            SegmentReader::Memory { proxies, next } => (proxies.len() - next) as u64,
            SegmentReader::Disk { remaining, .. } => *remaining,
        }
    }
}

fn next_work_file_seq() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);
    SEQ.fetch_add(1, Ordering::Relaxed)
}
