//! Inbound audio level metering.
//!
//! Decoded PCM from the remote track is reduced to one energy value per
//! frame and kept in a short sliding window. The silence detector reads the
//! windowed average on its own cadence. Energy is mean absolute amplitude
//! normalized to a 0–255 scale; anything under ~10 is near-silence.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Number of per-frame energy values in the sliding window.
/// At one 20 ms Opus frame per value this spans roughly a third of a second.
const WINDOW_FRAMES: usize = 16;

/// Anything that can report a current average audio energy level.
pub trait EnergySource: Send + Sync {
    /// Windowed average energy on the 0–255 scale. 0.0 when no audio yet.
    fn average_energy(&self) -> f32;
}

/// Sliding-window energy meter over decoded inbound PCM.
#[derive(Debug, Default)]
pub struct LevelMeter {
    window: Mutex<VecDeque<f32>>,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one decoded PCM frame into the window.
    pub fn push_frame(&self, pcm: &[i16]) {
        if pcm.is_empty() {
            return;
        }
        let sum: f64 = pcm.iter().map(|s| (s.unsigned_abs() as f64)).sum();
        let energy = (sum / pcm.len() as f64 / i16::MAX as f64 * 255.0) as f32;

        let mut window = self.window.lock().expect("level window poisoned");
        if window.len() == WINDOW_FRAMES {
            window.pop_front();
        }
        window.push_back(energy);
    }

    /// Forget all buffered energy values.
    pub fn clear(&self) {
        self.window.lock().expect("level window poisoned").clear();
    }
}

impl EnergySource for LevelMeter {
    fn average_energy(&self) -> f32 {
        let window = self.window.lock().expect("level window poisoned");
        if window.is_empty() {
            return 0.0;
        }
        window.iter().sum::<f32>() / window.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_meter_reads_zero() {
        let meter = LevelMeter::new();
        assert_eq!(meter.average_energy(), 0.0);
    }

    #[test]
    fn test_silence_frame_is_near_zero() {
        let meter = LevelMeter::new();
        meter.push_frame(&[0i16; 960]);
        assert!(meter.average_energy() < 1.0);
    }

    #[test]
    fn test_loud_frame_is_loud() {
        let meter = LevelMeter::new();
        meter.push_frame(&vec![i16::MAX / 2; 960]);
        let avg = meter.average_energy();
        assert!(avg > 100.0, "avg was {}", avg);
    }

    #[test]
    fn test_window_slides() {
        let meter = LevelMeter::new();
        for _ in 0..WINDOW_FRAMES {
            meter.push_frame(&vec![i16::MAX / 2; 960]);
        }
        // Enough quiet frames push the loud ones out entirely.
        for _ in 0..WINDOW_FRAMES {
            meter.push_frame(&[0i16; 960]);
        }
        assert!(meter.average_energy() < 1.0);
    }

    #[test]
    fn test_clear_resets() {
        let meter = LevelMeter::new();
        meter.push_frame(&vec![i16::MAX / 2; 960]);
        meter.clear();
        assert_eq!(meter.average_energy(), 0.0);
    }
}
