//! # Sample Rate Conversion
//!
//! Fixed 2x conversion between the telephony rate (8 kHz) and the wideband
//! rate of the speech service (16 kHz).
//!
//! ## Methods:
//! - **Upsampling**: linear interpolation, each input sample followed by the
//!   midpoint to its successor
//! - **Downsampling**: average of each consecutive pair
//!
//! This is intentionally a simple converter; no anti-aliasing filter is
//! applied. All arithmetic is done in `i32` and floors, so results always fit
//! back into `i16`.

/// Floor average of two samples. Cannot overflow and always fits in `i16`.
#[inline]
fn average(a: i16, b: i16) -> i16 {
    ((a as i32 + b as i32) >> 1) as i16
}

/// Double the sample rate of a block.
///
/// ## Output:
/// `2 * samples.len()` samples. For each input sample `s[i]` the output holds
/// `s[i]` followed by `floor((s[i] + s[i + 1]) / 2)`. The last sample has no
/// successor and is treated as repeating, so its midpoint equals itself.
pub fn upsample_2x(samples: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * 2);

    for (i, &current) in samples.iter().enumerate() {
        let next = samples.get(i + 1).copied().unwrap_or(current);
        out.push(current);
        out.push(average(current, next));
    }

    out
}

/// Halve the sample rate of a block.
///
/// Returns `samples.len() / 2` samples. An odd trailing sample is dropped; use
/// [`Downsampler`] for streams where blocks may have odd lengths.
pub fn downsample_2x(samples: &[i16]) -> Vec<i16> {
    samples
        .chunks_exact(2)
        .map(|pair| average(pair[0], pair[1]))
        .collect()
}

/// Streaming 2x downsampler that never loses a sample between calls.
///
/// Response audio arrives in chunks of arbitrary length. When a chunk has an
/// odd number of samples the last one is held back and paired with the first
/// sample of the next chunk.
#[derive(Debug, Default)]
pub struct Downsampler {
    carry: Option<i16>,
}

impl Downsampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Downsample the next chunk of the stream.
    pub fn process(&mut self, samples: &[i16]) -> Vec<i16> {
        let mut out = Vec::with_capacity((samples.len() + 1) / 2);
        let mut rest = samples;

        if let Some(held) = self.carry.take() {
            match rest.split_first() {
                Some((&first, tail)) => {
                    out.push(average(held, first));
                    rest = tail;
                }
                None => {
                    self.carry = Some(held);
                    return out;
                }
            }
        }

        let pairs = rest.chunks_exact(2);
        self.carry = pairs.remainder().first().copied();
        out.extend(pairs.map(|pair| average(pair[0], pair[1])));

        out
    }

    /// Whether a sample is currently held over for the next call.
    pub fn has_carry(&self) -> bool {
        self.carry.is_some()
    }

    /// Drop any held sample, e.g. when the current response is abandoned.
    pub fn reset(&mut self) {
        self.carry = None;
    }
}
