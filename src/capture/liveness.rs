use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::Serialize;
use tracing::info;

/// Capture stage reported to a liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Stage {
    Init = 0,
    Setup = 1,
    Transferring = 2,
}

impl Stage {
    fn from_u8(v: u8) -> Stage {
        match v {
            1 => Stage::Setup,
            2 => Stage::Transferring,
            _ => Stage::Init,
        }
    }
}

/// Counters an external watchdog can poll to detect a stalled capture.
///
/// They are informational only; nothing in the pipeline reads them to make
/// decisions.
#[derive(Debug)]
pub struct Liveness {
    bytes_transferred: AtomicU64,
    stage: AtomicU8,
    heartbeat: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LivenessSnapshot {
    pub bytes_transferred: u64,
    pub stage: Stage,
    pub heartbeat: u64,
}

impl Default for Liveness {
    fn default() -> Self {
        Liveness {
            bytes_transferred: AtomicU64::new(0),
            stage: AtomicU8::new(Stage::Init as u8),
            heartbeat: AtomicU64::new(0),
        }
    }
}

impl Liveness {
    /// Record a completed transfer of `n` bytes.
    pub fn add_bytes(&self, n: usize) {
        self.bytes_transferred.fetch_add(n as u64, Ordering::Relaxed);
        self.beat();
    }

    pub fn set_stage(&self, stage: Stage) {
        let prev = self.stage.swap(stage as u8, Ordering::Relaxed);
        if prev != stage as u8 {
            info!(?stage, "capture stage");
        }
        self.beat();
    }

    pub fn beat(&self) {
        self.heartbeat.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn heartbeat(&self) -> u64 {
        self.heartbeat.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> LivenessSnapshot {
        LivenessSnapshot {
            bytes_transferred: self.bytes_transferred(),
            stage: self.stage(),
            heartbeat: self.heartbeat(),
        }
    }
}
