use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::bits::{bitify, split_channels, CHANNELS};
use super::frame::VideoFrame;
use super::reconstruct::{LineSpan, LineStats, Reconstructor};
use super::synchronizer::{find_initial_sync, marker_pattern, MarkerIndex, Synchronizer};
use crate::config::DecodeConfig;
use crate::{Error, Result};

/// Counts describing a single decode pass. Anomalies are reported here rather than
/// failing the decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub bits_per_channel: usize,
    pub sav: usize,
    pub eav: usize,
    pub savi: usize,
    pub eavi: usize,
    pub lines: usize,
    /// Lines whose stop was synthesized because no stop was found in the window.
    pub synthesized_stops: usize,
    /// Lines with no payload in any channel.
    pub empty_lines: usize,
    /// Lines with payload in only some channels; not renderable.
    pub partial_lines: usize,
    pub blanking_lines: usize,
    pub frames: usize,
    pub dominant_gap: Option<usize>,
}

/// Result of decoding an analysis buffer.
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    /// Frames in frame-number order.
    pub frames: Vec<VideoFrame>,
    /// Paired SAVI/EAVI spans. These are not rendered.
    pub blanking: Vec<LineSpan>,
    pub line_stats: Option<LineStats>,
    pub stats: DecodeStats,
}

/// Consumer of decoded frames. Frames are delivered in frame-number order.
pub trait Renderer {
    /// # Errors
    /// Any error stops delivery and is returned by [Decoder::render].
    fn render(&mut self, frame: VideoFrame) -> Result<()>;
}

/// Recovers lines and frames from a raw 4-channel capture.
///
/// # Examples
/// ```
/// use vidcap::config::DecodeConfig;
/// use vidcap::decode::Decoder;
///
/// let decoded = Decoder::new(DecodeConfig::default()).decode(&[0u8; 1024]);
/// assert!(decoded.frames.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct Decoder {
    config: DecodeConfig,
    synchronizer: Synchronizer,
    reconstructor: Reconstructor,
}

impl Decoder {
    /// Bound on frames waiting to be consumed from [Decoder::spawn].
    pub const DEFAULT_BUFFER_SIZE: usize = 16;

    /// Search limit, in bits, for [Decoder::initial_sync].
    pub const INITIAL_SYNC_LIMIT: usize = 1_000_000;

    #[must_use]
    pub fn new(config: DecodeConfig) -> Self {
        let synchronizer = Synchronizer::new(config.codes, config.validation);
        let reconstructor =
            Reconstructor::new(config.window, config.packing).with_max_lines(config.max_lines);
        Decoder {
            config,
            synchronizer,
            reconstructor,
        }
    }

    #[must_use]
    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// Expand `dat` into bits and de-interleave them into channels.
    #[must_use]
    pub fn channels(&self, dat: &[u8]) -> Vec<Vec<bool>> {
        let bits = bitify(dat, self.config.bit_width, self.config.endianness);
        split_channels(&bits, CHANNELS)
    }

    /// Validated marker offsets for all marker types.
    #[must_use]
    pub fn index(&self, channels: &[Vec<bool>]) -> MarkerIndex {
        self.synchronizer.index(channels)
    }

    /// First bit offset at which a start marker is present in every channel.
    #[must_use]
    pub fn initial_sync(&self, dat: &[u8]) -> Option<usize> {
        let pattern = marker_pattern(self.config.codes.sav);
        find_initial_sync(&self.channels(dat), &pattern, Self::INITIAL_SYNC_LIMIT)
    }

    /// Decode all frames in `dat`.
    ///
    /// Missing stops, short channels and an empty buffer are absorbed and reported in
    /// [Decoded::stats].
    #[must_use]
    pub fn decode(&self, dat: &[u8]) -> Decoded {
        if dat.is_empty() {
            warn!("empty analysis buffer; nothing to decode");
            return Decoded::default();
        }

        let channels = self.channels(dat);
        let index = self.index(&channels);
        let mut stats = DecodeStats {
            bits_per_channel: channels.iter().map(Vec::len).min().unwrap_or(0),
            sav: index.sav.len(),
            eav: index.eav.len(),
            savi: index.savi.len(),
            eavi: index.eavi.len(),
            ..Default::default()
        };
        debug!(?stats, "located sync markers");

        let frames = self
            .reconstructor
            .frames(&channels, &index.sav, &index.eav, &mut stats);
        let blanking = self.reconstructor.blanking(&index.savi, &index.eavi);
        stats.blanking_lines = blanking.len();
        let line_stats = LineStats::measure(&index.sav, &index.eav, LineStats::SAMPLE_LIMIT);

        if stats.synthesized_stops > 0 || stats.partial_lines > 0 || stats.empty_lines > 0 {
            debug!(
                synthesized = stats.synthesized_stops,
                partial = stats.partial_lines,
                empty = stats.empty_lines,
                "decode anomalies"
            );
        }
        info!(
            bytes = dat.len(),
            frames = stats.frames,
            lines = stats.lines,
            blanking = stats.blanking_lines,
            "decoded"
        );

        Decoded {
            frames,
            blanking,
            line_stats,
            stats,
        }
    }

    /// Decode `dat` and hand each frame to `renderer` in frame-number order.
    ///
    /// # Errors
    /// The first error returned by `renderer`; remaining frames are not delivered.
    pub fn render<R: Renderer + ?Sized>(&self, dat: &[u8], renderer: &mut R) -> Result<DecodeStats> {
        let decoded = self.decode(dat);
        for frame in decoded.frames {
            renderer.render(frame)?;
        }
        Ok(decoded.stats)
    }

    /// Decode in a background thread, making frames available through the returned
    /// iterator as they are reconstructed.
    ///
    /// # Errors
    /// [Error::Io] if the decode thread cannot be started.
    pub fn spawn(self, dat: Vec<u8>) -> Result<FrameIter> {
        let (frames_tx, frames_rx) = bounded(Self::DEFAULT_BUFFER_SIZE);

        let handle = thread::Builder::new()
            .name("decode".into())
            .spawn(move || {
                let decoded = self.decode(&dat);
                for frame in decoded.frames {
                    let number = frame.number;
                    if frames_tx.send(frame).is_err() {
                        debug!(number, "frame receiver dropped; stopping");
                        break;
                    }
                }
                decoded.stats
            })?;

        Ok(FrameIter {
            frames: frames_rx,
            handle: Some(handle),
            outcome: None,
        })
    }
}

/// Frames produced by [Decoder::spawn], in frame-number order.
pub struct FrameIter {
    frames: Receiver<VideoFrame>,
    handle: Option<JoinHandle<DecodeStats>>,
    outcome: Option<Result<DecodeStats>>,
}

impl FrameIter {
    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.outcome = Some(handle.join().map_err(|_| Error::WorkerPanicked("decode")));
        }
    }

    /// Stop consuming frames and wait for the decode thread.
    ///
    /// # Errors
    /// [Error::WorkerPanicked] if the decode thread panicked.
    pub fn finish(self) -> Result<DecodeStats> {
        let FrameIter {
            frames,
            mut handle,
            outcome,
        } = self;
        drop(frames);
        match handle.take() {
            Some(handle) => handle.join().map_err(|_| Error::WorkerPanicked("decode")),
            None => outcome.unwrap_or(Err(Error::WorkerPanicked("decode"))),
        }
    }
}

impl Iterator for FrameIter {
    type Item = VideoFrame;

    fn next(&mut self) -> Option<Self::Item> {
        // recv blocks until a frame is ready or the decode thread is done
        match self.frames.recv() {
            Ok(frame) => Some(frame),
            Err(_) => {
                self.join();
                None
            }
        }
    }
}
