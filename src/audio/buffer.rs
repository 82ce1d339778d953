//! # Inbound Audio Accumulator
//!
//! Collects caller audio (already decoded and resampled to the speech
//! service's rate) until there is enough for one submission, then hands off a
//! block of exactly `threshold` samples and keeps the remainder.
//!
//! ## Key Features:
//! - **FIFO draining**: Drained blocks are contiguous, non-overlapping and in
//!   arrival order
//! - **Hard cap**: While a response is in flight nothing is drained, so the
//!   buffer is capped and the oldest samples are dropped on overflow
//! - **Single owner**: The buffer belongs to one session and is only touched
//!   from that session's event loop, so it needs no locking

use std::collections::VecDeque;

/// Configuration for accumulator behavior.
///
/// ## Rust Concepts:
/// - **Option<u32>**: `None` disables the cap entirely
#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Sample rate of the buffered audio (16000 for wideband submission)
    pub sample_rate: u32,

    /// Maximum audio kept while waiting, in milliseconds (None = unbounded)
    pub max_buffered_ms: Option<u32>,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            max_buffered_ms: Some(5000),
        }
    }
}

/// Ordered buffer of linear samples, drained in fixed-size blocks.
pub struct InboundAccumulator {
    /// Buffered samples, oldest first
    buffer: VecDeque<i16>,

    /// Configuration settings for this buffer
    config: AccumulatorConfig,

    /// Cap in samples derived from `max_buffered_ms`
    max_samples: Option<usize>,

    /// Samples discarded by the overflow policy since creation
    dropped_samples: u64,
}

impl InboundAccumulator {
    /// Create a new accumulator with the given configuration.
    ///
    /// ## Example:
    /// A 5 second cap at 16kHz: 5000ms * 16000Hz / 1000 = 80,000 samples
    pub fn new(config: AccumulatorConfig) -> Self {
        let max_samples = config
            .max_buffered_ms
            .map(|ms| (ms as usize * config.sample_rate as usize) / 1000);

        Self {
            buffer: VecDeque::with_capacity(max_samples.unwrap_or(0).min(1 << 16)),
            config,
            max_samples,
            dropped_samples: 0,
        }
    }

    /// Append samples to the tail of the buffer.
    ///
    /// ## Overflow:
    /// If the cap is exceeded the oldest samples are dropped. Returns the
    /// number of samples dropped by this call (0 in the normal case).
    pub fn append(&mut self, samples: &[i16]) -> usize {
        self.buffer.extend(samples.iter().copied());

        let overflow = match self.max_samples {
            Some(max) if self.buffer.len() > max => self.buffer.len() - max,
            _ => 0,
        };

        if overflow > 0 {
            self.buffer.drain(..overflow);
            self.dropped_samples += overflow as u64;
        }

        overflow
    }

    /// Take the first `threshold` samples if that many are buffered.
    ///
    /// ## Returns:
    /// - **Some(block)**: exactly `threshold` samples, remainder kept in order
    /// - **None**: not enough audio yet (or `threshold` is 0)
    pub fn try_drain(&mut self, threshold: usize) -> Option<Vec<i16>> {
        if threshold == 0 || self.buffer.len() < threshold {
            return None;
        }

        Some(self.buffer.drain(..threshold).collect())
    }

    /// Get the current buffer length in samples.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Duration of buffered audio in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.buffer.len() as u64 * 1000) / self.config.sample_rate as u64
    }

    /// Total samples dropped by the overflow policy.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    /// Clear all audio data from the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
