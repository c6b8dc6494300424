//! Recovery of video lines and frames from a raw 4-channel capture.
//!
//! The raw bytes are expanded into bits, de-interleaved into [CHANNELS] bit channels,
//! searched for `FF 00 00 <code>` sync markers, and the marker offsets paired into
//! lines which are in turn grouped into frames.
mod bits;
mod decoder;
mod frame;
mod reconstruct;
mod synchronizer;

pub use bits::{
    bitify, interleave, pack_lsb_first, pack_msb_first, split_channels, unbitify, BitWidth,
    BytePacking, Endianness, CHANNELS,
};
pub use decoder::{DecodeStats, Decoded, Decoder, FrameIter, Renderer};
pub use frame::{VideoFrame, VideoLine};
pub use reconstruct::{
    dominant_gap, frame_boundaries, match_indices, payload_bits, start_gaps, LineSpan,
    LineStats, LineWindow, Reconstructor,
};
pub use synchronizer::{
    find_initial_sync, find_pattern, find_pattern_kmp, find_pattern_naive, intersect,
    marker_pattern, Marker, MarkerIndex, SyncCodes, Synchronizer, Validation, MARKER_BITS,
    PREFIX,
};
