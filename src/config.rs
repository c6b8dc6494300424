//! Capture and decode configuration.
//!
//! All values have defaults suitable for the reference capture hardware, so a config
//! file need only contain the values that differ.
//!
//! ```
//! use vidcap::config::Config;
//!
//! let config = Config::from_reader(r#"{"capture": {"in_flight": 4}}"#.as_bytes()).unwrap();
//! assert_eq!(config.capture.in_flight, 4);
//! assert_eq!(config.capture.transfer_size, 65280);
//! ```
use std::{fs::File, io::Read, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::decode::{BitWidth, BytePacking, Endianness, LineWindow, SyncCodes, Validation};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub decode: DecodeConfig,
}

impl Config {
    /// Load from a JSON file.
    ///
    /// # Errors
    /// [Error::Io] if the file cannot be read, [Error::Json] if it is not valid, or
    /// [Error::Config] if any value is out of range.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    /// Load from JSON provided by `reader`.
    ///
    /// # Errors
    /// See [Config::from_path].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let config: Config = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// [Error::Config] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.capture.validate()?;
        self.decode.validate()
    }
}

/// Adaptive timeout and reset policy for the transfer engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct TimeoutPolicy {
    #[builder(default = 1000)]
    pub initial_ms: u64,
    #[builder(default = 100)]
    pub floor_ms: u64,
    #[builder(default = 10_000)]
    pub ceiling_ms: u64,
    /// Consecutive successes before the timeout is halved.
    #[builder(default = 16)]
    pub shrink_after: u32,
    /// Consecutive failures before the timeout is doubled.
    #[builder(default = 1)]
    pub grow_after: u32,
    /// Consecutive failures before the transport is reset.
    #[builder(default = 3)]
    pub reset_after: u32,
    /// Delay after a reset before transfers are requeued.
    #[builder(default = 100)]
    pub settle_ms: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TimeoutPolicy {
    #[must_use]
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// # Errors
    /// [Error::Config] if the bounds are inconsistent or a threshold is 0.
    pub fn validate(&self) -> Result<()> {
        if self.floor_ms == 0 {
            return Err(Error::Config("timeout floor_ms must be > 0".into()));
        }
        if !(self.floor_ms <= self.initial_ms && self.initial_ms <= self.ceiling_ms) {
            return Err(Error::Config(format!(
                "timeout must satisfy floor_ms <= initial_ms <= ceiling_ms; got {} <= {} <= {}",
                self.floor_ms, self.initial_ms, self.ceiling_ms
            )));
        }
        if self.shrink_after == 0 || self.grow_after == 0 || self.reset_after == 0 {
            return Err(Error::Config(
                "timeout shrink_after, grow_after and reset_after must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bytes requested by each read.
    #[builder(default = 65280)]
    pub transfer_size: usize,
    /// Reads kept in flight against the device.
    #[builder(default = 3)]
    pub in_flight: usize,
    /// Total number of transfer buffers.
    #[builder(default = 6)]
    pub pool_size: usize,
    /// Capture stops once this many bytes have been accumulated.
    #[builder(default = 2 * 1024 * 1024)]
    pub target_bytes: usize,
    /// Buffers discarded at startup while the transport settles.
    #[builder(default = 10)]
    pub flush_cycles: usize,
    /// Back-off used by the consumer when no full buffer is ready.
    #[builder(default = 1)]
    pub poll_interval_ms: u64,
    #[builder(default)]
    pub timeout: TimeoutPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CaptureConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Target rounded down to a whole number of 4-byte words.
    #[must_use]
    pub fn aligned_target(&self) -> usize {
        self.target_bytes & !0x3
    }

    /// # Errors
    /// [Error::Config] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.transfer_size == 0 || self.transfer_size % 4 != 0 {
            return Err(Error::Config(format!(
                "transfer_size must be a non-zero multiple of 4; got {}",
                self.transfer_size
            )));
        }
        if self.in_flight == 0 {
            return Err(Error::Config("in_flight must be >= 1".into()));
        }
        if self.pool_size < self.in_flight {
            return Err(Error::Config(format!(
                "pool_size ({}) must be >= in_flight ({})",
                self.pool_size, self.in_flight
            )));
        }
        if self.aligned_target() == 0 {
            return Err(Error::Config(format!(
                "target_bytes must be at least 4; got {}",
                self.target_bytes
            )));
        }
        self.timeout.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct DecodeConfig {
    #[builder(default)]
    pub bit_width: BitWidth,
    #[builder(default)]
    pub endianness: Endianness,
    #[builder(default)]
    pub packing: BytePacking,
    #[builder(default)]
    pub codes: SyncCodes,
    #[builder(default)]
    pub window: LineWindow,
    #[builder(default)]
    pub validation: Validation,
    /// Upper bound on lines reconstructed per decode pass; unlimited if not set.
    #[builder(default, setter(strip_option))]
    pub max_lines: Option<usize>,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DecodeConfig {
    /// # Errors
    /// [Error::Config] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if let Some((a, b)) = self.codes.duplicate() {
            return Err(Error::Config(format!(
                "sync codes for {a:?} and {b:?} must differ"
            )));
        }
        let w = &self.window;
        if w.lower > w.upper {
            return Err(Error::Config(format!(
                "line window lower ({}) must not exceed upper ({})",
                w.lower, w.upper
            )));
        }
        if w.lower <= crate::decode::MARKER_BITS {
            return Err(Error::Config(format!(
                "line window lower must exceed the marker length; got {}",
                w.lower
            )));
        }
        if w.default_offset <= crate::decode::MARKER_BITS {
            return Err(Error::Config(format!(
                "line window default_offset must exceed the marker length; got {}",
                w.default_offset
            )));
        }
        if self.max_lines == Some(0) {
            return Err(Error::Config("max_lines must be > 0 when set".into()));
        }
        Ok(())
    }
}
