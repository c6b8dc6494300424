#![allow(dead_code)]

use vidcap::decode::{
    interleave, marker_pattern, unbitify, BitWidth, Endianness, SyncCodes, CHANNELS,
};

/// SAV to EAV distance used for every synthetic line.
pub const LINE_BITS: usize = 1488;
/// SAV to SAV distance within a frame.
pub const LINE_PITCH: usize = 1776;
/// SAV to SAV distance between the last line of a frame and the next frame.
pub const FRAME_PITCH: usize = 5000;
/// Payload bytes per channel per line.
pub const PAYLOAD_BYTES: usize = (LINE_BITS - 32) / 8;
/// Bits of idle signal before the first line.
pub const LEAD_IN: usize = 64;

/// Per-channel bitstreams that can be merged into the bytes a device would deliver
/// as 32-bit little-endian words.
#[derive(Debug, Clone)]
pub struct Signal {
    pub channels: Vec<Vec<bool>>,
}

impl Signal {
    pub fn new(bits_per_channel: usize) -> Self {
        // keep 4 * bits a multiple of the 32-bit word
        let len = bits_per_channel.div_ceil(8) * 8;
        Signal {
            channels: vec![vec![false; len]; CHANNELS],
        }
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn put(&mut self, channel: usize, offset: usize, bits: &[bool]) {
        self.channels[channel][offset..offset + bits.len()].copy_from_slice(bits);
    }

    pub fn marker_on(&mut self, channel: usize, offset: usize, code: u8) {
        self.put(channel, offset, &marker_pattern(code));
    }

    pub fn marker(&mut self, offset: usize, code: u8) {
        for channel in 0..CHANNELS {
            self.marker_on(channel, offset, code);
        }
    }

    /// Write `bytes` MSB-first.
    pub fn payload(&mut self, channel: usize, offset: usize, bytes: &[u8]) {
        let bits: Vec<bool> = bytes
            .iter()
            .flat_map(|b| (0..8).rev().map(move |i| b >> i & 1 == 1))
            .collect();
        self.put(channel, offset, &bits);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        unbitify(
            &interleave(&self.channels),
            BitWidth::W32,
            Endianness::Little,
        )
    }
}

/// A line written into a [Signal].
#[derive(Debug, Clone)]
pub struct Line {
    pub start: usize,
    pub payload: Vec<Vec<u8>>,
}

impl Line {
    pub fn interleaved(&self) -> Vec<u8> {
        interleave(&self.payload)
    }
}

/// Payload values stay in 1..=126 so no run of 8 ones, and therefore no false
/// marker, can appear inside a line.
fn payload_byte(frame: usize, line: usize, channel: usize, idx: usize) -> u8 {
    1 + ((frame * 31 + line * 7 + channel * 3 + idx) % 126) as u8
}

/// Layout of a synthetic capture.
#[derive(Debug, Clone)]
pub struct Video {
    pub frame_sizes: Vec<usize>,
    pub codes: SyncCodes,
    /// Lines, by global index, whose EAV is left out.
    pub drop_eav: Vec<usize>,
    /// Add one SAVI/EAVI blanking line after each frame.
    pub blanking: bool,
}

impl Video {
    pub fn new(frame_sizes: &[usize]) -> Self {
        Video {
            frame_sizes: frame_sizes.to_vec(),
            codes: SyncCodes::DEFAULT,
            drop_eav: Vec::new(),
            blanking: false,
        }
    }

    /// Build the signal, returning it along with the lines of each frame.
    pub fn build(&self) -> (Signal, Vec<Vec<Line>>) {
        let mut starts = Vec::new();
        let mut offset = LEAD_IN;
        for (f, &size) in self.frame_sizes.iter().enumerate() {
            for l in 0..size {
                starts.push((f, l, offset));
                offset += if l + 1 == size { FRAME_PITCH } else { LINE_PITCH };
            }
        }

        let mut signal = Signal::new(offset + LEAD_IN);
        let mut frames: Vec<Vec<Line>> = vec![Vec::new(); self.frame_sizes.len()];
        for (global, &(f, l, start)) in starts.iter().enumerate() {
            signal.marker(start, self.codes.sav);
            let payload: Vec<Vec<u8>> = (0..CHANNELS)
                .map(|c| {
                    (0..PAYLOAD_BYTES)
                        .map(|i| payload_byte(f, l, c, i))
                        .collect()
                })
                .collect();
            for (c, bytes) in payload.iter().enumerate() {
                signal.payload(c, start + 32, bytes);
            }
            if !self.drop_eav.contains(&global) {
                signal.marker(start + LINE_BITS, self.codes.eav);
            }
            if self.blanking && l + 1 == self.frame_sizes[f] {
                let savi = start + LINE_BITS + 512;
                signal.marker(savi, self.codes.savi);
                signal.marker(savi + LINE_BITS, self.codes.eavi);
            }
            frames[f].push(Line { start, payload });
        }

        (signal, frames)
    }
}
