use ndarray::Array2;

/// One reconstructed video line.
///
/// `start` and `stop` are bit offsets into the channel bitstreams. `channels` holds
/// the packed payload of each channel and `interleaved` the display-ready line. A
/// line with any empty channel has an empty `interleaved` and is not renderable,
/// though it is still part of its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoLine {
    pub start: usize,
    pub stop: usize,
    /// The stop offset was not observed but derived from the default line length.
    pub synthesized: bool,
    pub channels: Vec<Vec<u8>>,
    pub interleaved: Vec<u8>,
}

impl VideoLine {
    #[must_use]
    pub fn is_renderable(&self) -> bool {
        !self.interleaved.is_empty()
    }

    /// Number of channels that produced no payload.
    #[must_use]
    pub fn empty_channels(&self) -> usize {
        self.channels.iter().filter(|c| c.is_empty()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// 1-based frame number within a decode pass.
    pub number: usize,
    pub lines: Vec<VideoLine>,
}

impl VideoFrame {
    pub fn renderable_lines(&self) -> impl Iterator<Item = &VideoLine> {
        self.lines.iter().filter(|l| l.is_renderable())
    }

    /// Build a 2D raster of the renderable lines.
    ///
    /// Rows are renderable lines in order, columns span the widest line and shorter
    /// lines are right-padded with 0. Unrenderable lines are skipped rather than
    /// zero-filled.
    #[must_use]
    pub fn raster(&self) -> Array2<u8> {
        let width = self
            .renderable_lines()
            .map(|l| l.interleaved.len())
            .max()
            .unwrap_or(0);
        let height = self.renderable_lines().count();

        let mut raster = Array2::zeros((height, width));
        for (row, line) in self.renderable_lines().enumerate() {
            for (col, value) in line.interleaved.iter().enumerate() {
                raster[[row, col]] = *value;
            }
        }
        raster
    }
}
