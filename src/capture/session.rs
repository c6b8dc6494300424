use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::accumulator::{Accumulator, Progress};
use super::buffer::BufferManager;
use super::engine::{EngineReport, TransferEngine};
use super::liveness::Liveness;
use super::sink::Sink;
use super::transport::Transport;
use crate::config::CaptureConfig;
use crate::{Error, Result};

/// Longest uninterrupted sleep; shutdown is noticed at least this often.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// State shared by the reader and writer threads of a capture.
#[derive(Debug, Default)]
pub struct SessionContext {
    shutdown: AtomicBool,
    complete: AtomicBool,
    reader_finished: AtomicBool,
    liveness: Liveness,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask both capture threads to stop at their next check.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Signal that the analysis buffer reached its target.
    pub fn mark_complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    /// Signal that the reader has queued its last buffer, and stop the session.
    pub fn finish_reader(&self) {
        self.reader_finished.store(true, Ordering::SeqCst);
        self.request_shutdown();
    }

    /// True once no more full buffers will be queued.
    #[must_use]
    pub fn is_reader_finished(&self) -> bool {
        self.reader_finished.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.is_shutdown_requested() || self.is_complete()
    }

    #[must_use]
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Sleep for `dur` in short slices, returning early if the session stops.
    ///
    /// Returns `false` if the sleep was cut short, or the session had already
    /// stopped.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        loop {
            if self.should_stop() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Summary of a capture session.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub started: DateTime<Utc>,
    pub elapsed_secs: f64,
    /// Bytes delivered by the transport, including flushed buffers.
    pub bytes_transferred: u64,
    /// Bytes in the analysis buffer.
    pub bytes_accumulated: usize,
    pub flushed_buffers: usize,
    pub appended_buffers: usize,
    pub successes: u64,
    pub failures: u64,
    pub zero_length: u64,
    /// Completions shorter than requested.
    pub partial_transfers: u64,
    pub resets: u64,
    pub final_timeout_ms: u64,
    pub target_reached: bool,
    /// Average transport rate in megabits per second.
    pub rate_mbps: f64,
}

/// Everything a capture produced. A fatal error after startup ends the capture early
/// but whatever was accumulated up to that point is kept.
#[derive(Debug)]
pub struct Capture {
    /// The analysis buffer.
    pub data: Vec<u8>,
    pub report: CaptureReport,
    pub failure: Option<Error>,
}

impl Capture {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.report.target_reached
    }
}

/// A single capture: a reader thread running a [TransferEngine] and a writer thread
/// feeding an [Accumulator] and, optionally, a [Sink], connected by a
/// [BufferManager].
///
/// # Examples
/// ```
/// use vidcap::capture::{CaptureSession, ReaderTransport};
/// use vidcap::config::CaptureConfig;
///
/// let raw = std::io::Cursor::new(vec![0u8; 64 * 1024]);
/// let config = CaptureConfig::builder()
///     .transfer_size(4096)
///     .target_bytes(16 * 1024)
///     .flush_cycles(0)
///     .build();
/// let capture = CaptureSession::new(config, ReaderTransport::new(raw))
///     .run()
///     .unwrap();
/// assert_eq!(capture.data.len(), 16 * 1024);
/// ```
pub struct CaptureSession<T: Transport> {
    config: CaptureConfig,
    transport: T,
    sink: Option<Box<dyn Sink>>,
    ctx: Arc<SessionContext>,
}

impl<T: Transport> CaptureSession<T> {
    pub fn new(config: CaptureConfig, transport: T) -> Self {
        CaptureSession {
            config,
            transport,
            sink: None,
            ctx: Arc::new(SessionContext::new()),
        }
    }

    /// Also write the raw bytes of every completed transfer to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Handle for stopping the session or watching its liveness counters from
    /// another thread.
    #[must_use]
    pub fn context(&self) -> Arc<SessionContext> {
        self.ctx.clone()
    }

    /// Run the capture to completion on two threads, blocking until both finish.
    ///
    /// The capture ends when the target is reached, the transport is exhausted,
    /// shutdown is requested, or a fatal error occurs.
    ///
    /// # Errors
    /// Startup failures only: invalid config, buffer allocation, opening or priming
    /// the transport, or spawning threads. Failures after startup are reported in
    /// [Capture::failure].
    pub fn run(self) -> Result<Capture>
    where
        T: 'static,
    {
        let CaptureSession {
            config,
            transport,
            sink,
            ctx,
        } = self;
        config.validate()?;

        let started = Utc::now();
        let clock = Instant::now();

        let buffers = Arc::new(BufferManager::new(config.pool_size, config.transfer_size)?);
        let accumulator = Accumulator::new(config.target_bytes, config.flush_cycles)?;
        let engine = TransferEngine::start(transport, buffers.clone(), ctx.clone(), &config)?;

        let reader = {
            let ctx = ctx.clone();
            thread::Builder::new()
                .name("capture::reader".into())
                .spawn(move || {
                    let _finished = ReaderFinished(ctx);
                    engine.run()
                })?
        };

        let writer = {
            let ctx = ctx.clone();
            let buffers = buffers.clone();
            let poll = config.poll_interval();
            thread::Builder::new()
                .name("capture::writer".into())
                .spawn(move || {
                    let mut accumulator = accumulator;
                    let mut sink = sink;
                    let zult = write_loop(&buffers, &ctx, &mut accumulator, sink.as_deref_mut(), poll);
                    if zult.is_err() {
                        ctx.request_shutdown();
                    }
                    (accumulator, zult)
                })
        };
        let writer = match writer {
            Ok(writer) => writer,
            Err(err) => {
                ctx.request_shutdown();
                if reader.join().is_err() {
                    warn!("reader thread panicked while stopping");
                }
                return Err(err.into());
            }
        };

        let (engine_report, mut failure) = match reader.join() {
            Ok(mut report) => {
                let failure = report.failure.take();
                (Some(report), failure)
            }
            Err(_) => (None, Some(Error::WorkerPanicked("capture::reader"))),
        };
        let accumulator = match writer.join() {
            Ok((accumulator, zult)) => {
                if let Err(err) = zult {
                    failure.get_or_insert(err);
                }
                Some(accumulator)
            }
            Err(_) => {
                failure.get_or_insert(Error::WorkerPanicked("capture::writer"));
                None
            }
        };
        let elapsed = clock.elapsed();
        let report = build_report(
            started,
            elapsed,
            ctx.liveness().bytes_transferred(),
            engine_report.as_ref(),
            accumulator.as_ref(),
            ctx.is_complete(),
        );
        info!(
            bytes = report.bytes_accumulated,
            elapsed_secs = report.elapsed_secs,
            rate_mbps = report.rate_mbps,
            target_reached = report.target_reached,
            "capture finished"
        );

        Ok(Capture {
            data: accumulator.map(Accumulator::into_inner).unwrap_or_default(),
            report,
            failure,
        })
    }
}

/// Marks the reader finished when dropped, so the writer is released even if the
/// reader panics.
struct ReaderFinished(Arc<SessionContext>);

impl Drop for ReaderFinished {
    fn drop(&mut self) {
        self.0.finish_reader();
    }
}

fn build_report(
    started: DateTime<Utc>,
    elapsed: Duration,
    bytes_transferred: u64,
    engine: Option<&EngineReport>,
    accumulator: Option<&Accumulator>,
    target_reached: bool,
) -> CaptureReport {
    let elapsed_secs = elapsed.as_secs_f64();
    let rate_mbps = if elapsed_secs > 0.0 {
        bytes_transferred as f64 * 8.0 / elapsed_secs / 1_000_000.0
    } else {
        0.0
    };
    let stats = engine.map(|e| e.stats).unwrap_or_default();

    CaptureReport {
        started,
        elapsed_secs,
        bytes_transferred,
        bytes_accumulated: accumulator.map_or(0, Accumulator::len),
        flushed_buffers: accumulator.map_or(0, Accumulator::flushed),
        appended_buffers: accumulator.map_or(0, Accumulator::appended),
        successes: stats.successes,
        failures: stats.failures,
        zero_length: stats.zero_length,
        partial_transfers: stats.partial,
        resets: stats.resets,
        final_timeout_ms: engine.map_or(0, |e| e.final_timeout.as_millis() as u64),
        target_reached,
        rate_mbps,
    }
}

/// Move full buffers into the accumulator (and sink) until the target is reached or
/// the reader has finished. Every buffer the reader queued before finishing is
/// drained.
fn write_loop(
    buffers: &BufferManager,
    ctx: &SessionContext,
    accumulator: &mut Accumulator,
    mut sink: Option<&mut (dyn Sink + 'static)>,
    poll: Duration,
) -> Result<()> {
    loop {
        // Loaded before polling: once the reader is finished an empty queue stays empty.
        let reader_finished = ctx.is_reader_finished();
        let Some(buf) = buffers.acquire_full() else {
            if reader_finished {
                break;
            }
            thread::sleep(poll.min(SLEEP_SLICE));
            continue;
        };

        let written = match sink.as_deref_mut() {
            Some(sink) => sink.write_chunk(buf.filled()),
            None => Ok(()),
        };
        let progress = accumulator.push(buf.filled());
        buffers.release_empty(buf);
        written?;

        if progress == Progress::Complete {
            ctx.mark_complete();
            break;
        }
    }

    if let Some(sink) = sink {
        sink.flush()?;
    }
    debug!(bytes = accumulator.len(), "writer finished");
    Ok(())
}
