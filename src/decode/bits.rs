use serde::{Deserialize, Serialize};

/// Number of logical channels multiplexed into a capture.
pub const CHANNELS: usize = 4;

/// Word size used when expanding raw bytes into bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BitWidth {
    W8,
    W16,
    W32,
}

impl BitWidth {
    #[must_use]
    pub fn bits(self) -> usize {
        match self {
            BitWidth::W8 => 8,
            BitWidth::W16 => 16,
            BitWidth::W32 => 32,
        }
    }

    #[must_use]
    pub fn bytes(self) -> usize {
        self.bits() / 8
    }
}

impl Default for BitWidth {
    fn default() -> Self {
        BitWidth::W32
    }
}

impl TryFrom<u32> for BitWidth {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            8 => Ok(BitWidth::W8),
            16 => Ok(BitWidth::W16),
            32 => Ok(BitWidth::W32),
            _ => Err(format!("unsupported bit width {value}; expected 8, 16 or 32")),
        }
    }
}

impl From<BitWidth> for u32 {
    fn from(width: BitWidth) -> Self {
        width.bits() as u32
    }
}

/// Byte order used to read words, and the matching bit emission order: big emits
/// the most significant bit first, little the least significant bit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Big,
    #[default]
    Little,
}

/// How 8 consecutive payload bits are assembled into a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BytePacking {
    /// First bit is the most significant ("shift accumulate").
    #[default]
    MsbFirst,
    /// First bit is the least significant ("OR accumulate").
    LsbFirst,
}

impl BytePacking {
    #[must_use]
    pub fn pack(self, bits: &[bool]) -> Vec<u8> {
        match self {
            BytePacking::MsbFirst => pack_msb_first(bits),
            BytePacking::LsbFirst => pack_lsb_first(bits),
        }
    }
}

fn read_word(chunk: &[u8], endianness: Endianness) -> u32 {
    match endianness {
        Endianness::Big => chunk.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)),
        Endianness::Little => chunk
            .iter()
            .rev()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)),
    }
}

/// Expand `dat` into one `bool` per bit.
///
/// `dat` is consumed one `width`-sized word at a time, each word read using
/// `endianness`. Bits of each word are emitted MSB first for [Endianness::Big] and
/// LSB first for [Endianness::Little]. Trailing bytes that do not make up a whole word
/// are ignored.
///
/// # Example
/// ```
/// use vidcap::decode::{bitify, BitWidth, Endianness};
///
/// let bits = bitify(&[0x80], BitWidth::W8, Endianness::Big);
/// assert_eq!(bits, vec![true, false, false, false, false, false, false, false]);
/// ```
#[must_use]
pub fn bitify(dat: &[u8], width: BitWidth, endianness: Endianness) -> Vec<bool> {
    let nbits = width.bits();
    let mut bits = Vec::with_capacity(dat.len() / width.bytes() * nbits);

    for chunk in dat.chunks_exact(width.bytes()) {
        let word = read_word(chunk, endianness);
        match endianness {
            Endianness::Big => bits.extend((0..nbits).rev().map(|i| (word >> i) & 1 == 1)),
            Endianness::Little => bits.extend((0..nbits).map(|i| (word >> i) & 1 == 1)),
        }
    }

    bits
}

/// Inverse of [bitify]. Bits that do not make up a whole word are ignored.
#[must_use]
pub fn unbitify(bits: &[bool], width: BitWidth, endianness: Endianness) -> Vec<u8> {
    let nbits = width.bits();
    let nbytes = width.bytes();
    let mut dat = Vec::with_capacity(bits.len() / 8);

    for chunk in bits.chunks_exact(nbits) {
        let word = match endianness {
            Endianness::Big => chunk
                .iter()
                .fold(0u32, |acc, b| (acc << 1) | u32::from(*b)),
            Endianness::Little => chunk
                .iter()
                .enumerate()
                .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << i)),
        };
        match endianness {
            Endianness::Big => {
                dat.extend((0..nbytes).rev().map(|i| (word >> (8 * i)) as u8));
            }
            Endianness::Little => dat.extend((0..nbytes).map(|i| (word >> (8 * i)) as u8)),
        }
    }

    dat
}

/// Round-robin de-interleave: channel `i` receives `items[i]`, `items[i + count]`, ...
///
/// # Panics
/// If `count` is 0.
#[must_use]
pub fn split_channels<T: Copy>(items: &[T], count: usize) -> Vec<Vec<T>> {
    assert!(count > 0, "channel count must be non-zero");
    let mut channels: Vec<Vec<T>> = (0..count)
        .map(|_| Vec::with_capacity(items.len() / count + 1))
        .collect();
    for (idx, item) in items.iter().enumerate() {
        channels[idx % count].push(*item);
    }
    channels
}

/// Inverse of [split_channels]: position `k * channels.len() + i` comes from
/// `channels[i][k]`. Only as many rounds as the shortest channel are produced.
#[must_use]
pub fn interleave<T: Copy, C: AsRef<[T]>>(channels: &[C]) -> Vec<T> {
    let rounds = channels
        .iter()
        .map(|ch| ch.as_ref().len())
        .min()
        .unwrap_or(0);
    let mut out = Vec::with_capacity(rounds * channels.len());
    for k in 0..rounds {
        for ch in channels {
            out.push(ch.as_ref()[k]);
        }
    }
    out
}

/// Pack bits into bytes, first bit of each group of 8 being the MSB. A trailing
/// partial byte is dropped.
#[must_use]
pub fn pack_msb_first(bits: &[bool]) -> Vec<u8> {
    bits.chunks_exact(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, b| (acc << 1) | u8::from(*b)))
        .collect()
}

/// Pack bits into bytes, first bit of each group of 8 being the LSB. A trailing
/// partial byte is dropped.
#[must_use]
pub fn pack_lsb_first(bits: &[bool]) -> Vec<u8> {
    bits.chunks_exact(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, b)| acc | (u8::from(*b) << i))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn bits_of(s: &str) -> Vec<bool> {
        s.chars().filter(|c| *c != ' ').map(|c| c == '1').collect()
    }

    #[test]
    fn bitify_8bit_orders() {
        assert_eq!(
            bitify(&[0x80], BitWidth::W8, Endianness::Big),
            bits_of("1000 0000")
        );
        assert_eq!(
            bitify(&[0x80], BitWidth::W8, Endianness::Little),
            bits_of("0000 0001")
        );
    }

    #[test]
    fn bitify_reads_words_with_endianness() {
        // Both produce word 0x1234
        let big = bitify(&[0x12, 0x34], BitWidth::W16, Endianness::Big);
        assert_eq!(big, bits_of("0001 0010 0011 0100"));

        let little = bitify(&[0x34, 0x12], BitWidth::W16, Endianness::Little);
        assert_eq!(little, bits_of("0010 1100 0100 1000"));
    }

    #[test]
    fn bitify_drops_partial_word() {
        let bits = bitify(&[0xff; 7], BitWidth::W32, Endianness::Little);
        assert_eq!(bits.len(), 32);
    }

    #[test_case(BitWidth::W8, Endianness::Big)]
    #[test_case(BitWidth::W8, Endianness::Little)]
    #[test_case(BitWidth::W16, Endianness::Big)]
    #[test_case(BitWidth::W16, Endianness::Little)]
    #[test_case(BitWidth::W32, Endianness::Big)]
    #[test_case(BitWidth::W32, Endianness::Little)]
    fn bitify_unbitify_round_trip(width: BitWidth, endianness: Endianness) {
        let dat = hex::decode("ff000080deadbeef0102030405060708").unwrap();
        let bits = bitify(&dat, width, endianness);
        assert_eq!(bits.len(), dat.len() * 8);
        assert_eq!(unbitify(&bits, width, endianness), dat);
    }

    #[test]
    fn split_then_interleave_round_trip() {
        let dat: Vec<u8> = (0..64).collect();
        let channels = split_channels(&dat, CHANNELS);
        assert_eq!(channels[0], vec![0, 4, 8, 12, 16, 20, 24, 28, 32, 36, 40, 44, 48, 52, 56, 60]);
        assert_eq!(channels[3][0], 3);
        assert_eq!(interleave(&channels), dat);
    }

    #[test]
    fn interleave_uses_shortest_channel() {
        let channels = vec![vec![1u8, 5, 9], vec![2, 6], vec![3, 7, 11], vec![4, 8, 12]];
        assert_eq!(interleave(&channels), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn packing_orders() {
        let bits = bits_of("1000 0001 0110 0000 111");
        assert_eq!(pack_msb_first(&bits), vec![0x81, 0x60]);
        assert_eq!(pack_lsb_first(&bits), vec![0x81, 0x06]);
        assert_eq!(BytePacking::MsbFirst.pack(&bits), pack_msb_first(&bits));
    }

    #[test]
    fn bit_width_from_config_value() {
        assert_eq!(BitWidth::try_from(16), Ok(BitWidth::W16));
        assert!(BitWidth::try_from(12).is_err());
        let width: BitWidth = serde_json::from_str("8").unwrap();
        assert_eq!(width, BitWidth::W8);
    }
}
