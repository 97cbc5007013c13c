//! Sample-rate conversion and channel downmix shared by capture and playback.

/// Average interleaved channels down to mono.
pub(crate) fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming linear-interpolation resampler.
///
/// Keeps the last input sample across calls so chunk boundaries interpolate
/// the same as one contiguous buffer.
pub(crate) struct LinearResampler {
    /// Input samples consumed per output sample.
    step: f64,
    /// Fractional read position into `buf`.
    pos: f64,
    buf: Vec<f32>,
}

impl LinearResampler {
    pub(crate) fn new(in_rate: u32, out_rate: u32) -> Self {
        Self { step: in_rate as f64 / out_rate as f64, pos: 0.0, buf: Vec::new() }
    }

    pub(crate) fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if (self.step - 1.0).abs() < f64::EPSILON && self.buf.is_empty() {
            return input.to_vec();
        }

        self.buf.extend_from_slice(input);
        let mut out = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);

        while (self.pos as usize) + 1 < self.buf.len() {
            let i = self.pos as usize;
            let frac = (self.pos - i as f64) as f32;
            out.push(self.buf[i] * (1.0 - frac) + self.buf[i + 1] * frac);
            self.pos += self.step;
        }

        // Drop fully consumed samples, keeping one for interpolation.
        let consumed = (self.pos as usize).min(self.buf.len().saturating_sub(1));
        self.buf.drain(..consumed);
        self.pos -= consumed as f64;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_mono_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(downmix(&samples, 1), samples);
    }

    #[test]
    fn test_downmix_stereo_averages() {
        let samples = vec![0.2, 0.4, -0.2, -0.4];
        let mono = downmix(&samples, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_resampler_unity_rate() {
        let mut r = LinearResampler::new(48_000, 48_000);
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = r.process(&input);
        assert_eq!(out, input);
    }

    #[test]
    fn test_resampler_upsamples_count() {
        let mut r = LinearResampler::new(16_000, 48_000);
        let input = vec![0.5f32; 1600];
        let out = r.process(&input);
        // 16k -> 48k triples the sample count (minus edge samples held back).
        assert!(out.len() > 4700 && out.len() <= 4800, "got {}", out.len());
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_resampler_downsamples_count() {
        let mut r = LinearResampler::new(48_000, 16_000);
        let out = r.process(&vec![0.0f32; 4800]);
        assert!(out.len() >= 1599 && out.len() <= 1600, "got {}", out.len());
    }

    #[test]
    fn test_resampler_streams_across_buffers() {
        let mut chunked = LinearResampler::new(44_100, 48_000);
        let mut whole = LinearResampler::new(44_100, 48_000);
        let input: Vec<f32> = (0..882).map(|i| (i as f32 * 0.01).sin()).collect();

        let mut out_chunked = Vec::new();
        for chunk in input.chunks(100) {
            out_chunked.extend(chunked.process(chunk));
        }
        let out_whole = whole.process(&input);

        assert_eq!(out_chunked.len(), out_whole.len());
        for (a, b) in out_chunked.iter().zip(out_whole.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
