//! Test signal for checking the outbound path before any remote audio exists.

use std::f32::consts::PI;

/// Peak amplitude of the generated tone (about -10 dBFS).
const TONE_AMPLITUDE: f32 = 0.3 * i16::MAX as f32;

/// Generate a sine tone as linear samples.
pub fn sine_tone(frequency_hz: f32, duration_ms: u32, sample_rate: u32) -> Vec<i16> {
    let count = (sample_rate as usize * duration_ms as usize) / 1000;
    let step = 2.0 * PI * frequency_hz / sample_rate as f32;

    (0..count)
        .map(|n| ((n as f32 * step).sin() * TONE_AMPLITUDE).round() as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_length_and_level() {
        let tone = sine_tone(440.0, 2000, 8000);
        assert_eq!(tone.len(), 16000);
        assert_eq!(tone[0], 0);

        let peak = tone.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 9000 && peak <= TONE_AMPLITUDE as u16 + 1);
    }
}
