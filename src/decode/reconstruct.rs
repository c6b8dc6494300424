use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, span, Level};

use super::bits::{interleave, BytePacking, CHANNELS};
use super::decoder::DecodeStats;
use super::frame::{VideoFrame, VideoLine};
use super::synchronizer::MARKER_BITS;

/// Expected distance, in bits, between a line's start marker and its stop marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineWindow {
    pub lower: usize,
    pub upper: usize,
    /// Stop offset used, relative to the start, when no stop falls in the window.
    pub default_offset: usize,
}

impl Default for LineWindow {
    fn default() -> Self {
        LineWindow {
            lower: 1250,
            upper: 1750,
            default_offset: 1488,
        }
    }
}

/// A start marker paired with its stop marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineSpan {
    pub start: usize,
    pub stop: usize,
    pub synthesized: bool,
}

/// Pair every start with the first stop whose distance from it falls within
/// `[window.lower, window.upper]`. Starts without such a stop get a synthesized stop
/// at `start + window.default_offset`, so every start yields exactly one span.
///
/// `stops` must be sorted ascending.
///
/// # Example
/// ```
/// use vidcap::decode::{match_indices, LineWindow};
///
/// let spans = match_indices(&[100], &[2700], &LineWindow::default());
/// assert_eq!(spans[0].stop, 1588);
/// assert!(spans[0].synthesized);
/// ```
#[must_use]
pub fn match_indices(starts: &[usize], stops: &[usize], window: &LineWindow) -> Vec<LineSpan> {
    starts
        .iter()
        .map(|&start| {
            let lower = start + window.lower;
            let first = stops.partition_point(|&s| s < lower);
            match stops.get(first) {
                Some(&stop) if stop <= start + window.upper => LineSpan {
                    start,
                    stop,
                    synthesized: false,
                },
                _ => LineSpan {
                    start,
                    stop: start + window.default_offset,
                    synthesized: true,
                },
            }
        })
        .collect()
}

/// Distance between each pair of consecutive starts.
#[must_use]
pub fn start_gaps(starts: &[usize]) -> Vec<usize> {
    starts.windows(2).map(|w| w[1].saturating_sub(w[0])).collect()
}

/// Most frequent value in `gaps`. Ties go to the smaller value.
#[must_use]
pub fn dominant_gap(gaps: &[usize]) -> Option<usize> {
    let mut sorted = gaps.to_vec();
    sorted.sort_unstable();

    let first = *sorted.first()?;
    let (mut best, mut best_count) = (first, 0);
    let (mut current, mut count) = (first, 0);
    for gap in sorted {
        if gap == current {
            count += 1;
        } else {
            current = gap;
            count = 1;
        }
        if count > best_count {
            best = current;
            best_count = count;
        }
    }
    Some(best)
}

/// Indices into `starts` at which a new frame begins. The first frame always
/// begins at 0; each further frame begins after a gap greater than twice the
/// dominant gap.
#[must_use]
pub fn frame_boundaries(starts: &[usize]) -> Vec<usize> {
    if starts.is_empty() {
        return Vec::new();
    }
    let gaps = start_gaps(starts);
    let mut boundaries = vec![0];
    if let Some(dominant) = dominant_gap(&gaps) {
        let threshold = dominant * 2;
        boundaries.extend(
            gaps.iter()
                .enumerate()
                .filter(|(_, gap)| **gap > threshold)
                .map(|(idx, _)| idx + 1),
        );
    }
    boundaries
}

/// Payload bits of a line in one channel, strictly between the end of the start
/// marker and `stop`. `None` if the span is empty or runs past the channel.
#[must_use]
pub fn payload_bits(bits: &[bool], start: usize, stop: usize) -> Option<&[bool]> {
    let begin = start + MARKER_BITS;
    if begin >= stop || stop > bits.len() {
        return None;
    }
    Some(&bits[begin..stop])
}

/// Summary of line lengths measured from observed start/stop pairs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineStats {
    pub samples: usize,
    /// Average start-to-stop distance in bits.
    pub avg_bits: f64,
    /// Payload bytes per channel, excluding both markers.
    pub bytes_per_channel: f64,
    pub pixels_per_row: f64,
}

impl LineStats {
    pub const SAMPLE_LIMIT: usize = 50;

    /// Pair each of the first `sample_limit` starts with the first stop after it and
    /// average the distances lying strictly between 100 and 5000 bits.
    ///
    /// Returns `None` if no pair qualifies.
    #[must_use]
    pub fn measure(starts: &[usize], stops: &[usize], sample_limit: usize) -> Option<LineStats> {
        let mut total = 0usize;
        let mut samples = 0usize;
        for &start in starts.iter().take(sample_limit) {
            let idx = stops.partition_point(|&s| s <= start);
            if let Some(&stop) = stops.get(idx) {
                let dist = stop - start;
                if dist > 100 && dist < 5000 {
                    total += dist;
                    samples += 1;
                }
            }
        }
        if samples == 0 {
            return None;
        }

        let avg_bits = total as f64 / samples as f64;
        let bytes_per_channel = (avg_bits - (2 * MARKER_BITS) as f64) / 8.0;
        Some(LineStats {
            samples,
            avg_bits,
            bytes_per_channel,
            pixels_per_row: bytes_per_channel * CHANNELS as f64,
        })
    }
}

/// Turns marker offsets into lines and frames.
#[derive(Debug, Clone)]
pub struct Reconstructor {
    window: LineWindow,
    packing: BytePacking,
    max_lines: Option<usize>,
}

impl Reconstructor {
    #[must_use]
    pub fn new(window: LineWindow, packing: BytePacking) -> Self {
        Reconstructor {
            window,
            packing,
            max_lines: None,
        }
    }

    /// Limit the number of lines reconstructed per call to [Self::frames].
    #[must_use]
    pub fn with_max_lines(mut self, max_lines: Option<usize>) -> Self {
        self.max_lines = max_lines;
        self
    }

    /// Extract, pack and interleave a single line from all channels.
    #[must_use]
    pub fn line(&self, channels: &[Vec<bool>], span: &LineSpan) -> VideoLine {
        let packed: Vec<Vec<u8>> = channels
            .iter()
            .map(|bits| {
                payload_bits(bits, span.start, span.stop)
                    .map(|payload| self.packing.pack(payload))
                    .unwrap_or_default()
            })
            .collect();

        // Interleaving requires every channel; a partial line is not zero-filled.
        let interleaved = if packed.len() == CHANNELS && packed.iter().all(|c| !c.is_empty()) {
            interleave(&packed)
        } else {
            Vec::new()
        };

        VideoLine {
            start: span.start,
            stop: span.stop,
            synthesized: span.synthesized,
            channels: packed,
            interleaved,
        }
    }

    /// Pair `starts` with `stops`, segment them into frames and build every line.
    ///
    /// Anomalies (synthesized stops, empty or partial lines) are counted in `stats`
    /// and never abort reconstruction.
    pub fn frames(
        &self,
        channels: &[Vec<bool>],
        starts: &[usize],
        stops: &[usize],
        stats: &mut DecodeStats,
    ) -> Vec<VideoFrame> {
        let starts = match self.max_lines {
            Some(max) if starts.len() > max => {
                debug!(max, available = starts.len(), "limiting reconstructed lines");
                &starts[..max]
            }
            _ => starts,
        };

        let spans = match_indices(starts, stops, &self.window);
        let boundaries = frame_boundaries(starts);
        stats.dominant_gap = dominant_gap(&start_gaps(starts));
        stats.synthesized_stops += spans.iter().filter(|s| s.synthesized).count();

        let mut frames = Vec::with_capacity(boundaries.len());
        for (idx, first) in boundaries.iter().enumerate() {
            let last = boundaries.get(idx + 1).copied().unwrap_or(spans.len());
            let number = idx + 1;
            let span = span!(Level::TRACE, "frame", number);
            let _guard = span.enter();

            let lines: Vec<VideoLine> = spans[*first..last]
                .par_iter()
                .map(|s| self.line(channels, s))
                .collect();

            for line in &lines {
                match line.empty_channels() {
                    0 if line.is_renderable() => {}
                    n if n == line.channels.len() => stats.empty_lines += 1,
                    _ => stats.partial_lines += 1,
                }
            }
            debug!(number, lines = lines.len(), "reconstructed frame");
            stats.lines += lines.len();
            frames.push(VideoFrame { number, lines });
        }
        stats.frames = frames.len();

        frames
    }

    /// Pair blanking-line markers using the same window as active lines.
    #[must_use]
    pub fn blanking(&self, starts: &[usize], stops: &[usize]) -> Vec<LineSpan> {
        match_indices(starts, stops, &self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::synchronizer::marker_pattern;

    #[test]
    fn match_without_stops_synthesizes() {
        let zult = match_indices(&[100], &[], &LineWindow::default());
        assert_eq!(
            zult,
            vec![LineSpan {
                start: 100,
                stop: 1588,
                synthesized: true
            }]
        );
    }

    #[test]
    fn match_out_of_window_stop_is_ignored() {
        let zult = match_indices(&[100], &[2700], &LineWindow::default());
        assert_eq!(zult[0].stop, 1588);
        assert!(zult[0].synthesized);
    }

    #[test]
    fn match_takes_first_stop_in_window() {
        let window = LineWindow::default();
        // 1200 is too close, 1400 and 1600 are both in window
        let zult = match_indices(&[0, 5000], &[1200, 1400, 1600, 6500], &window);
        assert_eq!(zult[0].stop, 1400);
        assert!(!zult[0].synthesized);
        assert_eq!(zult[1].stop, 6500);
    }

    #[test]
    fn dominant_gap_prefers_smaller_on_tie() {
        assert_eq!(dominant_gap(&[10, 20, 20, 10]), Some(10));
        assert_eq!(dominant_gap(&[30, 20, 20, 10]), Some(20));
        assert_eq!(dominant_gap(&[]), None);
    }

    #[test]
    fn frame_boundary_after_outlier_gap() {
        let gaps = [1776, 1776, 1776, 5000, 1776];
        let mut starts = vec![0];
        for gap in gaps {
            starts.push(starts.last().unwrap() + gap);
        }
        assert_eq!(dominant_gap(&start_gaps(&starts)), Some(1776));
        assert_eq!(frame_boundaries(&starts), vec![0, 4]);
    }

    #[test]
    fn single_start_is_one_frame() {
        assert_eq!(frame_boundaries(&[42]), vec![0]);
        assert!(frame_boundaries(&[]).is_empty());
    }

    #[test]
    fn payload_bounds() {
        let bits = vec![true; 100];
        assert_eq!(payload_bits(&bits, 0, 40).map(<[bool]>::len), Some(8));
        assert!(payload_bits(&bits, 0, 32).is_none());
        assert!(payload_bits(&bits, 0, 101).is_none());
    }

    #[test]
    fn line_stats_ignore_unreasonable_distances() {
        let stats = LineStats::measure(&[0, 2000, 10_000], &[50, 1064, 3064, 20_000], 50)
            .expect("expected stats");
        // 0 -> 50 is too short, 10_000 -> 20_000 too long
        assert_eq!(stats.samples, 1);
        assert!((stats.avg_bits - 1064.0).abs() < f64::EPSILON);
        assert!((stats.bytes_per_channel - 125.0).abs() < f64::EPSILON);
        assert!((stats.pixels_per_row - 500.0).abs() < f64::EPSILON);

        assert!(LineStats::measure(&[0], &[], 50).is_none());
    }

    fn channel_with_line(start: usize, payload: u8, len: usize) -> Vec<bool> {
        let mut bits = vec![false; len];
        bits[start..start + MARKER_BITS].copy_from_slice(&marker_pattern(0x80));
        for (i, b) in (0..8).rev().map(|i| (payload >> i) & 1 == 1).enumerate() {
            bits[start + MARKER_BITS + i] = b;
        }
        bits
    }

    #[test]
    fn line_interleaves_all_channels() {
        let channels: Vec<Vec<bool>> = (0..4u8)
            .map(|i| channel_with_line(0, 0x10 + i, 64))
            .collect();
        let span = LineSpan {
            start: 0,
            stop: 40,
            synthesized: false,
        };
        let line = Reconstructor::new(LineWindow::default(), BytePacking::MsbFirst)
            .line(&channels, &span);
        assert_eq!(line.interleaved, vec![0x10, 0x11, 0x12, 0x13]);
        assert!(line.is_renderable());
    }

    #[test]
    fn line_with_short_channel_is_not_interleaved() {
        let mut channels: Vec<Vec<bool>> = (0..4u8)
            .map(|i| channel_with_line(0, 0x10 + i, 64))
            .collect();
        channels[2].truncate(36);
        let span = LineSpan {
            start: 0,
            stop: 40,
            synthesized: false,
        };
        let line = Reconstructor::new(LineWindow::default(), BytePacking::MsbFirst)
            .line(&channels, &span);
        assert!(!line.is_renderable());
        assert_eq!(line.empty_channels(), 1);
        assert_eq!(line.channels[0], vec![0x10]);
    }

    #[test]
    fn frames_count_anomalies() {
        let len = 8000;
        let channels: Vec<Vec<bool>> = (0..4).map(|_| vec![false; len]).collect();
        let starts = [0, 1776, 3552, 7200];
        let mut stats = DecodeStats::default();

        let frames = Reconstructor::new(LineWindow::default(), BytePacking::MsbFirst)
            .frames(&channels, &starts, &[1488], &mut stats);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].number, 1);
        assert_eq!(frames[0].lines.len(), 3);
        assert_eq!(frames[1].number, 2);
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.synthesized_stops, 3);
        // the last line runs past the channels
        assert_eq!(stats.empty_lines, 1);
        assert_eq!(stats.frames, 2);
    }

    #[test]
    fn frames_respects_max_lines() {
        let channels: Vec<Vec<bool>> = (0..4).map(|_| vec![false; 8000]).collect();
        let mut stats = DecodeStats::default();
        let frames = Reconstructor::new(LineWindow::default(), BytePacking::MsbFirst)
            .with_max_lines(Some(2))
            .frames(&channels, &[0, 1776, 3552], &[], &mut stats);
        assert_eq!(frames.iter().map(|f| f.lines.len()).sum::<usize>(), 2);
    }
}
