//! # G.711 µ-law Codec
//!
//! Converts between the telephony leg's companded 8-bit samples and signed
//! 16-bit linear PCM. The tables and bit layout follow ITU-T G.711 exactly, so
//! every one of the 256 byte values decodes to the same linear value as the
//! reference implementation.
//!
//! ## Byte Layout (after inverting all bits):
//! ```text
//!   bit 7    bits 6-4   bits 3-0
//!   sign     segment    mantissa
//! ```
//!
//! ## Why no errors:
//! Both directions are total functions. Magnitudes the law cannot represent
//! are clipped, never rejected.

/// Bias added to the magnitude before segment search (0x84 = 132).
const BIAS: i32 = 0x84;

/// Largest magnitude the 16-bit µ-law encoder can represent before clipping.
const CLIP: i32 = 32635;

/// Upper bound (inclusive) of the biased magnitude for each of the 8 segments.
const SEGMENT_END: [i32; 8] = [0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF, 0x3FFF, 0x7FFF];

/// µ-law code for linear zero. Also used as the silence fill byte.
pub const SILENCE: u8 = 0xFF;

/// Decode one µ-law byte into a linear sample.
///
/// ## Returns:
/// A sample in the range -32124..=32124.
pub fn decode(byte: u8) -> i16 {
    let inverted = !byte;
    let sign = inverted & 0x80;
    let segment = (inverted >> 4) & 0x07;
    let mantissa = (inverted & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << segment) - BIAS;

    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode one linear sample into a µ-law byte.
///
/// ## Steps:
/// 1. Split off the sign and take the magnitude as `i32` (so -32768 is safe)
/// 2. Clip the magnitude to [`CLIP`] and add [`BIAS`]
/// 3. Find the smallest segment whose range holds the biased magnitude
/// 4. Keep the 4 bits below the segment's leading one as the mantissa
/// 5. Assemble sign/segment/mantissa and invert every bit
pub fn encode(sample: i16) -> u8 {
    let value = sample as i32;
    let (sign, magnitude) = if value < 0 { (0x80u8, -value) } else { (0x00u8, value) };

    let biased = magnitude.min(CLIP) + BIAS;

    // The biased magnitude is at most 32767, so a segment always matches.
    let segment = SEGMENT_END
        .iter()
        .position(|&end| biased <= end)
        .unwrap_or(7) as u8;

    let mantissa = ((biased >> (segment + 3)) & 0x0F) as u8;

    !(sign | (segment << 4) | mantissa)
}

/// Decode a block of µ-law bytes.
pub fn decode_block(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decode(b)).collect()
}

/// Encode a block of linear samples.
pub fn encode_block(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode(s)).collect()
}
