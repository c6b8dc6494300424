use tracing::{debug, info};

use crate::{Error, Result};

/// Outcome of offering a buffer to the [Accumulator].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Discarded as part of the startup flush window.
    Flushing,
    Appended,
    /// The target has been reached; nothing more will be appended.
    Complete,
}

/// Appends completed transfers to one contiguous analysis buffer, capped at a
/// target size.
///
/// The first `flush_cycles` buffers are discarded while the transport settles. Only
/// whole 4-byte words are appended, so the buffer length is always a multiple of 4.
#[derive(Debug)]
pub struct Accumulator {
    data: Vec<u8>,
    target: usize,
    flush_cycles: usize,
    flushed: usize,
    appended: usize,
}

impl Accumulator {
    /// # Errors
    /// [Error::ResourceExhausted] if space for `target_bytes` cannot be reserved.
    pub fn new(target_bytes: usize, flush_cycles: usize) -> Result<Self> {
        let target = target_bytes & !0x3;
        let mut data = Vec::new();
        data.try_reserve_exact(target).map_err(|err| {
            Error::ResourceExhausted(format!("reserving {target} byte analysis buffer: {err}"))
        })?;
        Ok(Accumulator {
            data,
            target,
            flush_cycles,
            flushed: 0,
            appended: 0,
        })
    }

    pub fn push(&mut self, chunk: &[u8]) -> Progress {
        if self.is_complete() {
            return Progress::Complete;
        }
        if self.flushed < self.flush_cycles {
            self.flushed += 1;
            debug!(cycle = self.flushed, bytes = chunk.len(), "discarding flush buffer");
            if self.flushed == self.flush_cycles {
                info!(cycles = self.flushed, "flush complete; accumulating");
            }
            return Progress::Flushing;
        }

        let aligned = chunk.len() & !0x3;
        let take = aligned.min(self.target - self.data.len());
        self.data.extend_from_slice(&chunk[..take]);
        self.appended += 1;

        if self.is_complete() {
            info!(bytes = self.data.len(), buffers = self.appended, "analysis buffer complete");
            Progress::Complete
        } else {
            Progress::Appended
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.target
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn target(&self) -> usize {
        self.target
    }

    /// Buffers discarded so far by the flush window.
    #[must_use]
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Buffers that contributed data.
    #[must_use]
    pub fn appended(&self) -> usize {
        self.appended
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}
