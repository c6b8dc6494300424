use std::{collections::VecDeque, sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::buffer::{BufferManager, TransferBuffer};
use super::liveness::Stage;
use super::session::SessionContext;
use super::transport::{Ticket, Transport};
use crate::config::{CaptureConfig, TimeoutPolicy};
use crate::{Error, Result};

/// Per-transfer timeout that shrinks while transfers succeed and grows while they
/// fail.
#[derive(Debug, Clone)]
pub struct AdaptiveTimeout {
    current: Duration,
    floor: Duration,
    ceiling: Duration,
    shrink_after: u32,
    grow_after: u32,
    reset_after: u32,
    successes: u32,
    failures: u32,
}

impl AdaptiveTimeout {
    #[must_use]
    pub fn new(policy: &TimeoutPolicy) -> Self {
        AdaptiveTimeout {
            current: policy.initial(),
            floor: Duration::from_millis(policy.floor_ms),
            ceiling: Duration::from_millis(policy.ceiling_ms),
            shrink_after: policy.shrink_after.max(1),
            grow_after: policy.grow_after.max(1),
            reset_after: policy.reset_after.max(1),
            successes: 0,
            failures: 0,
        }
    }

    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// Halve the timeout, down to the floor, after every `shrink_after` consecutive
    /// successes.
    pub fn on_success(&mut self) {
        self.failures = 0;
        self.successes += 1;
        if self.successes >= self.shrink_after {
            self.successes = 0;
            self.current = (self.current / 2).max(self.floor);
        }
    }

    /// Double the timeout, up to the ceiling, after every `grow_after` consecutive
    /// failures.
    pub fn on_failure(&mut self) {
        self.successes = 0;
        self.failures += 1;
        if self.failures % self.grow_after == 0 {
            self.current = (self.current * 2).min(self.ceiling);
        }
    }

    /// True once enough consecutive failures have occurred to warrant a reset.
    #[must_use]
    pub fn should_reset(&self) -> bool {
        self.failures >= self.reset_after
    }

    /// Clear the failure count after a reset. The timeout itself is kept.
    pub fn clear_failures(&mut self) {
        self.failures = 0;
    }
}

/// Transfer counters for one engine run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub successes: u64,
    /// Failed or timed out waits.
    pub failures: u64,
    pub zero_length: u64,
    /// Completions shorter than requested. The data is kept.
    pub partial: u64,
    pub resets: u64,
    pub bytes: u64,
}

/// Result of [TransferEngine::run].
#[derive(Debug)]
pub struct EngineReport {
    pub stats: EngineStats,
    pub final_timeout: Duration,
    /// The fatal error that ended the run, if any.
    pub failure: Option<Error>,
}

/// Keeps a fixed number of reads in flight against a [Transport], handing every
/// completed buffer to the [BufferManager]'s full queue.
///
/// Transfers are waited on oldest first. A failed or empty completion is resubmitted
/// on the same buffer, and enough consecutive failures trigger a hard reset of the
/// transport. The engine is fatal only when a resubmission fails after a reset.
///
/// The transport is aborted and closed, and all held buffers are returned to the
/// pool, when the engine finishes or is dropped.
pub struct TransferEngine<T: Transport> {
    transport: T,
    buffers: Arc<BufferManager>,
    ctx: Arc<SessionContext>,
    transfer_size: usize,
    in_flight_target: usize,
    poll_interval: Duration,
    settle: Duration,
    timeout: AdaptiveTimeout,
    in_flight: VecDeque<(Ticket, TransferBuffer)>,
    stats: EngineStats,
    torn_down: bool,
}

impl<T: Transport> TransferEngine<T> {
    /// Open and configure `transport` and submit the initial reads.
    ///
    /// # Errors
    /// [Error::Transport] if the transport cannot be opened, configured or primed, or
    /// [Error::ResourceExhausted] if the pool has fewer empty buffers than reads to
    /// keep in flight. The transport is torn down before returning an error.
    pub fn start(
        transport: T,
        buffers: Arc<BufferManager>,
        ctx: Arc<SessionContext>,
        config: &CaptureConfig,
    ) -> Result<Self> {
        let mut engine = TransferEngine {
            transport,
            buffers,
            ctx,
            transfer_size: config.transfer_size,
            in_flight_target: config.in_flight,
            poll_interval: config.poll_interval(),
            settle: config.timeout.settle(),
            timeout: AdaptiveTimeout::new(&config.timeout),
            in_flight: VecDeque::with_capacity(config.in_flight),
            stats: EngineStats::default(),
            torn_down: false,
        };

        if let Err(err) = engine.setup() {
            engine.teardown();
            return Err(err);
        }
        Ok(engine)
    }

    fn setup(&mut self) -> Result<()> {
        self.ctx.liveness().set_stage(Stage::Setup);
        self.transport.open()?;
        self.transport
            .configure(self.transfer_size, self.timeout.current())?;

        for _ in 0..self.in_flight_target {
            let Some(buf) = self.buffers.acquire_empty() else {
                return Err(Error::ResourceExhausted(format!(
                    "pool cannot supply {} buffers for in-flight reads",
                    self.in_flight_target
                )));
            };
            let slot = buf.slot();
            match self.transport.submit_read(slot, self.transfer_size) {
                Ok(ticket) => self.in_flight.push_back((ticket, buf)),
                Err(err) => {
                    self.buffers.release_empty(buf);
                    return Err(err.into());
                }
            }
        }
        info!(
            in_flight = self.in_flight.len(),
            transfer_size = self.transfer_size,
            timeout_ms = self.timeout.current().as_millis() as u64,
            "transfers primed"
        );
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Run until the session stops, the transport is exhausted, or a fatal error
    /// occurs, then tear down.
    pub fn run(mut self) -> EngineReport {
        self.ctx.liveness().set_stage(Stage::Transferring);
        let failure = self.transfer_loop().err();
        if let Some(ref err) = failure {
            warn!("transfer engine failed: {err}");
        }
        self.teardown();

        EngineReport {
            stats: self.stats,
            final_timeout: self.timeout.current(),
            failure,
        }
    }

    fn transfer_loop(&mut self) -> Result<()> {
        while !self.ctx.should_stop() {
            let Some((ticket, mut buf)) = self.in_flight.pop_front() else {
                return Err(Error::ResourceExhausted("no transfers in flight".into()));
            };

            let timeout = self.timeout.current();
            // Blocks for at most `timeout`; no lock is held here.
            let zult = self
                .transport
                .wait_completion(&ticket, buf.as_mut_slice(), timeout);

            match zult {
                Ok(n) if n > 0 => {
                    buf.set_bytes_used(n);
                    self.stats.successes += 1;
                    self.stats.bytes += n as u64;
                    self.ctx.liveness().add_bytes(n);
                    self.timeout.on_success();
                    if n < ticket.len {
                        self.stats.partial += 1;
                        warn!(slot = ticket.slot, bytes = n, expected = ticket.len, "partial transfer");
                    } else {
                        debug!(slot = ticket.slot, bytes = n, "transfer complete");
                    }
                    self.buffers.submit_full(buf);

                    match self.next_empty() {
                        Some(next) => self.resubmit(next)?,
                        None => break,
                    }
                }
                Ok(_) => {
                    self.stats.zero_length += 1;
                    if self.transport.is_exhausted() {
                        info!("transport exhausted; stopping transfers");
                        self.in_flight.push_front((ticket, buf));
                        break;
                    }
                    warn!(slot = ticket.slot, "zero-byte completion; resubmitting");
                    self.on_failure(buf)?;
                }
                Err(err) if err.is_transient() => {
                    warn!(slot = ticket.slot, timeout_ms = timeout.as_millis() as u64, "transfer failed: {err}");
                    self.on_failure(buf)?;
                }
                Err(err) => {
                    warn!(slot = ticket.slot, "transport error: {err}; resetting");
                    self.stats.failures += 1;
                    self.timeout.on_failure();
                    self.hard_reset(Some(buf))?;
                }
            }
        }
        Ok(())
    }

    fn on_failure(&mut self, buf: TransferBuffer) -> Result<()> {
        self.stats.failures += 1;
        self.timeout.on_failure();
        if self.timeout.should_reset() {
            self.hard_reset(Some(buf))
        } else {
            self.resubmit(buf)
        }
    }

    /// Poll for an empty buffer, backing off between attempts. `None` if the session
    /// stops first.
    fn next_empty(&self) -> Option<TransferBuffer> {
        loop {
            if let Some(buf) = self.buffers.acquire_empty() {
                return Some(buf);
            }
            if !self.ctx.sleep(self.poll_interval) {
                return None;
            }
        }
    }

    fn resubmit(&mut self, buf: TransferBuffer) -> Result<()> {
        match self.transport.submit_read(buf.slot(), self.transfer_size) {
            Ok(ticket) => {
                self.in_flight.push_back((ticket, buf));
                Ok(())
            }
            Err(err) => {
                warn!(slot = buf.slot(), "submit failed: {err}; resetting");
                self.stats.failures += 1;
                self.timeout.on_failure();
                self.hard_reset(Some(buf))
            }
        }
    }

    /// Abort everything in flight, reset and reconfigure the transport, wait for it
    /// to settle and requeue every buffer.
    fn hard_reset(&mut self, extra: Option<TransferBuffer>) -> Result<()> {
        self.stats.resets += 1;
        info!(
            failures = self.timeout.consecutive_failures(),
            timeout_ms = self.timeout.current().as_millis() as u64,
            "resetting transport"
        );

        let mut pending: Vec<TransferBuffer> =
            self.in_flight.drain(..).map(|(_, buf)| buf).collect();
        pending.extend(extra);

        let reset = self
            .transport
            .abort()
            .and_then(|()| self.transport.reset())
            .and_then(|()| {
                self.transport
                    .configure(self.transfer_size, self.timeout.current())
            });
        if let Err(err) = reset {
            for buf in pending {
                self.buffers.release_empty(buf);
            }
            return Err(Error::ResetFailed(err));
        }

        if !self.ctx.sleep(self.settle) {
            debug!("stopped while settling after reset");
            for buf in pending {
                self.buffers.release_empty(buf);
            }
            return Ok(());
        }

        let mut pending = pending.into_iter();
        while let Some(buf) = pending.next() {
            let slot = buf.slot();
            match self.transport.submit_read(slot, self.transfer_size) {
                Ok(ticket) => self.in_flight.push_back((ticket, buf)),
                Err(source) => {
                    self.buffers.release_empty(buf);
                    for buf in pending {
                        self.buffers.release_empty(buf);
                    }
                    return Err(Error::ResubmitFailed { slot, source });
                }
            }
        }
        self.timeout.clear_failures();
        Ok(())
    }

    /// Abort the transport, return all held buffers and close the transport. Each step
    /// runs even if an earlier one fails.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Err(err) = self.transport.abort() {
            warn!("abort during teardown failed: {err}");
        }
        let released = self.in_flight.len();
        for (_, buf) in self.in_flight.drain(..) {
            self.buffers.release_empty(buf);
        }
        if let Err(err) = self.transport.close() {
            warn!("close during teardown failed: {err}");
        }
        debug!(released, "transfer engine torn down");
    }
}

impl<T: Transport> Drop for TransferEngine<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Test doubles for [Transport].
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::TransportError;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum Outcome {
        Bytes(usize),
        Fail(TransportError),
    }

    /// Scripted transport: each wait consumes the next outcome, and once the
    /// script runs out every wait completes with 0 bytes and the transport reports
    /// itself exhausted.
    #[derive(Debug, Default)]
    pub struct Scripted {
        pub script: VecDeque<Outcome>,
        pub calls: Arc<Mutex<Vec<String>>>,
        pub fail_reset: Option<TransportError>,
        pub fail_submit_after_reset: Option<TransportError>,
        pub fail_abort: bool,
        /// Pool whose empty count is recorded when the transport is closed.
        pub pool: Option<Arc<BufferManager>>,
        pub empty_at_close: Arc<Mutex<Option<usize>>>,
        resets: usize,
    }

    impl Scripted {
        pub fn new(script: Vec<Outcome>) -> Self {
            Scripted {
                script: script.into(),
                ..Default::default()
            }
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
    }

    impl Transport for Scripted {
        fn open(&mut self) -> std::result::Result<(), TransportError> {
            self.record("open");
            Ok(())
        }

        fn configure(
            &mut self,
            _transfer_size: usize,
            _timeout: Duration,
        ) -> std::result::Result<(), TransportError> {
            self.record("configure");
            Ok(())
        }

        fn submit_read(
            &mut self,
            slot: usize,
            len: usize,
        ) -> std::result::Result<Ticket, TransportError> {
            if self.resets > 0 {
                if let Some(err) = self.fail_submit_after_reset.clone() {
                    return Err(err);
                }
            }
            Ok(Ticket::new(slot, len))
        }

        fn wait_completion(
            &mut self,
            ticket: &Ticket,
            buf: &mut [u8],
            _timeout: Duration,
        ) -> std::result::Result<usize, TransportError> {
            match self.script.pop_front() {
                Some(Outcome::Bytes(n)) => {
                    let n = n.min(ticket.len).min(buf.len());
                    buf[..n].fill(ticket.slot as u8);
                    Ok(n)
                }
                Some(Outcome::Fail(err)) => Err(err),
                None => Ok(0),
            }
        }

        fn abort(&mut self) -> std::result::Result<(), TransportError> {
            self.record("abort");
            if self.fail_abort {
                return Err(TransportError::Device("abort refused".into()));
            }
            Ok(())
        }

        fn reset(&mut self) -> std::result::Result<(), TransportError> {
            self.record("reset");
            self.resets += 1;
            match self.fail_reset.clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn close(&mut self) -> std::result::Result<(), TransportError> {
            self.record("close");
            if let Some(pool) = &self.pool {
                *self.empty_at_close.lock().unwrap() = Some(pool.empty_count());
            }
            Ok(())
        }

        fn is_exhausted(&self) -> bool {
            self.script.is_empty()
        }
    }
}
