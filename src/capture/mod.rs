//! Bounded, stall-free capture from a bulk-in [Transport].
//!
//! A [CaptureSession] runs two threads that share nothing but a [BufferManager] and
//! a [SessionContext]: a reader keeping reads in flight with a [TransferEngine], and a
//! writer moving completed buffers into an [Accumulator] and an optional [Sink].
mod accumulator;
mod buffer;
mod engine;
mod liveness;
mod session;
mod sink;
mod transport;

pub use accumulator::{Accumulator, Progress};
pub use buffer::{BufferManager, TransferBuffer};
pub use engine::{AdaptiveTimeout, EngineReport, EngineStats, TransferEngine};
pub use liveness::{Liveness, LivenessSnapshot, Stage};
pub use session::{Capture, CaptureReport, CaptureSession, SessionContext};
pub use sink::{FileSink, Sink};
pub use transport::{ReaderTransport, Ticket, Transport};
