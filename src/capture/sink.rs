use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use tracing::debug;

use crate::Result;

/// Destination for the raw bytes of every completed transfer.
pub trait Sink: Send {
    /// # Errors
    /// If the chunk cannot be written.
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()>;

    /// # Errors
    /// If buffered data cannot be written.
    fn flush(&mut self) -> Result<()>;
}

impl Sink for Vec<u8> {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends chunks to a file, flushing once at least `flush_threshold` bytes are
/// pending.
#[derive(Debug)]
pub struct FileSink {
    writer: BufWriter<File>,
    pending: usize,
    flush_threshold: usize,
    written: u64,
}

impl FileSink {
    pub const DEFAULT_FLUSH_THRESHOLD: usize = 1024 * 1024;

    /// Create, or truncate, the file at `path`.
    ///
    /// # Errors
    /// [crate::Error::Io] if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_file(File::create(path)?))
    }

    /// Open the file at `path` for appending, creating it if necessary.
    ///
    /// # Errors
    /// [crate::Error::Io] if the file cannot be opened.
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: File) -> Self {
        FileSink {
            writer: BufWriter::with_capacity(Self::DEFAULT_FLUSH_THRESHOLD, file),
            pending: 0,
            flush_threshold: Self::DEFAULT_FLUSH_THRESHOLD,
            written: 0,
        }
    }

    #[must_use]
    pub fn with_flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes;
        self
    }

    /// Total bytes accepted.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Sink for FileSink {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.writer.write_all(chunk)?;
        self.pending += chunk.len();
        self.written += chunk.len() as u64;
        if self.pending >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        debug!(bytes = self.pending, total = self.written, "flushed sink");
        self.pending = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn flushes_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.bin");
        let mut sink = FileSink::create(&path).unwrap().with_flush_threshold(8);

        sink.write_chunk(&[1; 4]).unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), 0);
        sink.write_chunk(&[2; 4]).unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), 8);
        assert_eq!(sink.written(), 8);
    }

    #[test]
    fn append_keeps_existing_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.bin");
        fs::write(&path, [7u8; 3]).unwrap();

        let mut sink = FileSink::append(&path).unwrap();
        sink.write_chunk(&[8; 2]).unwrap();
        sink.flush().unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![7, 7, 7, 8, 8]);
    }
}
