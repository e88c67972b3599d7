//! The output stage.
//!
//! Publishers re-frame the winning records for their destination. File
//! destinations always write through a sibling temp file that is renamed
//! into place on close, so a failed sort never leaves a half-written
//! output; `--replace` is the same mechanism pointed back at the input.
//! Every publish re-checks that keys are non-decreasing — on the final
//! pass a violation means the pass plan was wrong and must be fatal.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SortError;
use crate::proxy::RecordProxy;
use crate::reader::Framing;

/// Where the sorted stream goes.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    /// Standard output.
    Stdout,
    /// A named file, written via temp-then-rename.
    File(PathBuf),
    /// The input file itself, renamed over after the input is closed.
    InPlace(PathBuf),
}

/// The output-stage capability.
pub trait RecordPublisher {
    /// Opens the destination and writes the header, if one was captured.
    fn open(&mut self) -> Result<(), SortError>;

    /// Writes one record. Returns false when the record's key is below
    /// its predecessor — the caller treats that as fatal on the final
    /// pass.
    fn publish(&mut self, proxy: &RecordProxy, record: &[u8]) -> Result<bool, SortError>;

    /// Flushes, and for file targets renames the temp file into place.
    fn close(&mut self) -> Result<(), SortError>;

    /// Records written so far.
    fn written(&self) -> u64;
}

/// Publisher over stdout or a file, with fixed or delimited framing.
pub struct StreamPublisher {
    target: OutputTarget,
    framing: Framing,
    header: Option<Vec<u8>>,
    writer: Option<BufWriter<Box<dyn Write>>>,
    temp_path: Option<PathBuf>,
    last_key: Vec<u8>,
    seen_any: bool,
    written: u64,
}

impl StreamPublisher {
    /// Creates a publisher; `header` is replayed before the first record.
    pub fn new(target: OutputTarget, framing: Framing, header: Option<Vec<u8>>) -> Self {
        Self {
            target,
            framing,
            header,
            writer: None,
            temp_path: None,
            last_key: Vec::new(),
            seen_any: false,
            written: 0,
        }
    }

    fn destination(&self) -> Option<&Path> {
        match &self.target {
            OutputTarget::Stdout => None,
            OutputTarget::File(path) | OutputTarget::InPlace(path) => Some(path),
        }
    }

    fn frame(&mut self, record: &[u8]) -> Result<(), SortError> {
        let writer = self.writer.as_mut().expect("publisher is open");
        let io = |e| SortError::io("writing output", e);
        match &self.framing {
            Framing::Fixed(len) => {
                if record.len() >= *len {
                    writer.write_all(&record[..*len]).map_err(io)?;
                } else {
                    writer.write_all(record).map_err(io)?;
                    let pad = vec![b' '; len - record.len()];
                    writer.write_all(&pad).map_err(io)?;
                }
            }
            Framing::Delimited(delim) => {
                writer.write_all(record).map_err(io)?;
                writer.write_all(delim).map_err(io)?;
            }
        }
        Ok(())
    }
}

impl RecordPublisher for StreamPublisher {
    fn open(&mut self) -> Result<(), SortError> {
        let sink: Box<dyn Write> = match self.destination() {
            None => Box::new(std::io::stdout()),
            Some(path) => {
                let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
                let name =
                    format!("Sorted.{}.{:x}.tmp", std::process::id(), next_output_seq());
                let temp = dir.map(|d| d.join(&name)).unwrap_or_else(|| PathBuf::from(&name));
                let file = File::create(&temp)
                    .map_err(|e| SortError::io(format!("creating {}", temp.display()), e))?;
                debug!(path = %temp.display(), "writing sorted output");
                self.temp_path = Some(temp);
                Box::new(file)
            }
        };
        self.writer = Some(BufWriter::new(sink));
        if let Some(header) = self.header.take() {
            self.frame(&header)?;
        }
        Ok(())
    }

    fn publish(&mut self, proxy: &RecordProxy, record: &[u8]) -> Result<bool, SortError> {
        if self.seen_any && proxy.key() < self.last_key.as_slice() {
            return Ok(false);
        }
        self.seen_any = true;
        self.last_key.clear();
        self.last_key.extend_from_slice(proxy.key());

        self.frame(record)?;
        self.written += 1;
        Ok(true)
    }

    fn close(&mut self) -> Result<(), SortError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.flush().map_err(|e| SortError::io("flushing output", e))?;
        drop(writer);

        if let (Some(temp), Some(dest)) = (self.temp_path.take(), self.destination()) {
            if std::fs::rename(&temp, dest).is_err() {
                // The temp file is deliberately retained.
                return Err(SortError::RenameFailed {
                    from: temp.display().to_string(),
                    to: dest.display().to_string(),
                });
            }
            debug!(path = %dest.display(), "output renamed into place");
        }
        Ok(())
    }

    fn written(&self) -> u64 {
        self.written
    }
}

impl Drop for StreamPublisher {
    fn drop(&mut self) {
        // A temp file still present here belongs to an abandoned run.
        self.writer = None;
        if let Some(temp) = self.temp_path.take() {
            let _ = std::fs::remove_file(temp);
        }
    }
}

fn next_output_seq() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);
    SEQ.fetch_add(1, Ordering::Relaxed)
}
