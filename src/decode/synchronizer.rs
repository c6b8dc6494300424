use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fixed prefix shared by every sync marker. The marker code follows it.
pub const PREFIX: [u8; 3] = [0xff, 0x00, 0x00];

/// Length of a complete marker (prefix + code) in bits.
pub const MARKER_BITS: usize = 32;

/// Patterns no longer than this are searched naively rather than with KMP.
const NAIVE_MAX_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Marker {
    /// Start of active video
    Sav,
    /// End of active video
    Eav,
    /// Start of a blanking (invalid) line
    Savi,
    /// End of a blanking (invalid) line
    Eavi,
}

impl Marker {
    pub const ALL: [Marker; 4] = [Marker::Sav, Marker::Eav, Marker::Savi, Marker::Eavi];
}

/// The code byte following [PREFIX] for each marker type.
///
/// SAV and EAV are fixed across deployments but the invalid-line codes are not, so
/// both known encodings are provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncCodes {
    pub sav: u8,
    pub eav: u8,
    pub savi: u8,
    pub eavi: u8,
}

impl SyncCodes {
    pub const DEFAULT: SyncCodes = SyncCodes {
        sav: 0x80,
        eav: 0x9d,
        savi: 0xab,
        eavi: 0xb6,
    };

    pub const ALTERNATE: SyncCodes = SyncCodes {
        sav: 0x80,
        eav: 0x9d,
        savi: 0xc0,
        eavi: 0xdd,
    };

    #[must_use]
    pub fn code(&self, marker: Marker) -> u8 {
        match marker {
            Marker::Sav => self.sav,
            Marker::Eav => self.eav,
            Marker::Savi => self.savi,
            Marker::Eavi => self.eavi,
        }
    }

    /// Returns the first pair of marker types sharing a code, if any.
    #[must_use]
    pub fn duplicate(&self) -> Option<(Marker, Marker)> {
        for (i, a) in Marker::ALL.iter().enumerate() {
            for b in &Marker::ALL[i + 1..] {
                if self.code(*a) == self.code(*b) {
                    return Some((*a, *b));
                }
            }
        }
        None
    }
}

impl Default for SyncCodes {
    fn default() -> Self {
        SyncCodes::DEFAULT
    }
}

/// The full marker `FF 00 00 <code>` as bits, most significant bit of each byte
/// first.
#[must_use]
pub fn marker_pattern(code: u8) -> Vec<bool> {
    PREFIX
        .iter()
        .chain(std::iter::once(&code))
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1 == 1))
        .collect()
}

/// Find every offset in `bits` where `pattern` begins, including overlapping
/// occurrences, in ascending order.
///
/// Short patterns use a naive scan, longer ones KMP. An empty pattern matches
/// nothing.
#[must_use]
pub fn find_pattern(bits: &[bool], pattern: &[bool]) -> Vec<usize> {
    if pattern.len() <= NAIVE_MAX_LEN {
        find_pattern_naive(bits, pattern)
    } else {
        find_pattern_kmp(bits, pattern)
    }
}

#[must_use]
pub fn find_pattern_naive(bits: &[bool], pattern: &[bool]) -> Vec<usize> {
    if pattern.is_empty() || pattern.len() > bits.len() {
        return Vec::new();
    }
    bits.windows(pattern.len())
        .enumerate()
        .filter_map(|(idx, window)| (window == pattern).then_some(idx))
        .collect()
}

/// Longest proper prefix of `pattern[..=i]` that is also a suffix, for each `i`.
fn failure_table(pattern: &[bool]) -> Vec<usize> {
    let mut table = vec![0usize; pattern.len()];
    let mut len = 0;
    for i in 1..pattern.len() {
        while len > 0 && pattern[i] != pattern[len] {
            len = table[len - 1];
        }
        if pattern[i] == pattern[len] {
            len += 1;
        }
        table[i] = len;
    }
    table
}

#[must_use]
pub fn find_pattern_kmp(bits: &[bool], pattern: &[bool]) -> Vec<usize> {
    let mut hits = Vec::new();
    if pattern.is_empty() || pattern.len() > bits.len() {
        return hits;
    }

    let table = failure_table(pattern);
    let mut matched = 0;
    for (idx, bit) in bits.iter().enumerate() {
        while matched > 0 && *bit != pattern[matched] {
            matched = table[matched - 1];
        }
        if *bit == pattern[matched] {
            matched += 1;
        }
        if matched == pattern.len() {
            hits.push(idx + 1 - pattern.len());
            // continue from the longest border so overlapping hits are reported
            matched = table[matched - 1];
        }
    }
    hits
}

/// Offsets present in both `a` and `b`, ascending and without duplicates.
#[must_use]
pub fn intersect(a: &[usize], b: &[usize]) -> Vec<usize> {
    let a: BTreeSet<usize> = a.iter().copied().collect();
    let b: BTreeSet<usize> = b.iter().copied().collect();
    a.intersection(&b).copied().collect()
}

/// How marker hits in individual channels are confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Validation {
    /// A marker must be present at the same offset in every channel.
    #[default]
    AllChannels,
    /// Only the first channel is searched.
    ReferenceChannel,
}

/// Validated marker offsets, in bits, for each marker type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerIndex {
    pub sav: Vec<usize>,
    pub eav: Vec<usize>,
    pub savi: Vec<usize>,
    pub eavi: Vec<usize>,
}

impl MarkerIndex {
    #[must_use]
    pub fn get(&self, marker: Marker) -> &[usize] {
        match marker {
            Marker::Sav => &self.sav,
            Marker::Eav => &self.eav,
            Marker::Savi => &self.savi,
            Marker::Eavi => &self.eavi,
        }
    }

    fn set(&mut self, marker: Marker, offsets: Vec<usize>) {
        match marker {
            Marker::Sav => self.sav = offsets,
            Marker::Eav => self.eav = offsets,
            Marker::Savi => self.savi = offsets,
            Marker::Eavi => self.eavi = offsets,
        }
    }
}

/// Locates sync markers across a set of de-interleaved bit channels.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    codes: SyncCodes,
    validation: Validation,
}

impl Synchronizer {
    #[must_use]
    pub fn new(codes: SyncCodes, validation: Validation) -> Self {
        Synchronizer { codes, validation }
    }

    #[must_use]
    pub fn codes(&self) -> &SyncCodes {
        &self.codes
    }

    /// Offsets where `marker` is found, validated according to the configured
    /// [Validation]. Channels are searched in parallel.
    #[must_use]
    pub fn locate(&self, channels: &[Vec<bool>], marker: Marker) -> Vec<usize> {
        let pattern = marker_pattern(self.codes.code(marker));
        let searched = match self.validation {
            Validation::AllChannels => channels,
            Validation::ReferenceChannel => &channels[..channels.len().min(1)],
        };

        let hits: Vec<Vec<usize>> = searched
            .par_iter()
            .map(|bits| find_pattern(bits, &pattern))
            .collect();

        let mut iter = hits.into_iter();
        let Some(first) = iter.next() else {
            return Vec::new();
        };
        let found = first.len();
        let zult = iter.fold(first, |acc, other| intersect(&acc, &other));
        debug!(
            ?marker,
            reference_hits = found,
            validated = zult.len(),
            "located markers"
        );
        zult
    }

    /// Locate all marker types.
    #[must_use]
    pub fn index(&self, channels: &[Vec<bool>]) -> MarkerIndex {
        let mut index = MarkerIndex::default();
        for marker in Marker::ALL {
            index.set(marker, self.locate(channels, marker));
        }
        index
    }
}

/// First bit offset, below `limit`, at which `pattern` begins in every channel.
#[must_use]
pub fn find_initial_sync(channels: &[Vec<bool>], pattern: &[bool], limit: usize) -> Option<usize> {
    if channels.is_empty() || pattern.is_empty() {
        return None;
    }
    let shortest = channels.iter().map(Vec::len).min().unwrap_or(0);
    if shortest < pattern.len() {
        return None;
    }
    let end = (shortest - pattern.len() + 1).min(limit);
    (0..end).find(|&offset| {
        channels
            .iter()
            .all(|ch| &ch[offset..offset + pattern.len()] == pattern)
    })
}
