//! Spectral front end: overlapping frame assembly, Hann windowing, and the
//! FFT magnitude spectrum.
//!
//! Strictly causal: a frame is emitted only once all of its samples have
//! arrived, so the first frame appears after `frame_size` samples and one
//! frame per hop thereafter.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Assembles fixed-size overlapping frames from a stream of hops.
pub struct FrameCutter {
    frame_size: usize,
    hop_size: usize,
    buffer: Vec<f32>,
}

impl FrameCutter {
    pub fn new(frame_size: usize, hop_size: usize) -> Self {
        assert!(frame_size >= hop_size, "frame_size must be >= hop_size");
        assert!(hop_size > 0, "hop_size must be > 0");
        Self {
            frame_size,
            hop_size,
            buffer: Vec::with_capacity(frame_size + hop_size),
        }
    }

    /// Feed one hop of samples; returns a full frame once enough samples
    /// have accumulated (at most one frame per hop-sized input).
    pub fn push_hop(&mut self, hop: &[f32]) -> Option<Vec<f32>> {
        self.buffer.extend_from_slice(hop);
        if self.buffer.len() < self.frame_size {
            return None;
        }
        let frame = self.buffer[..self.frame_size].to_vec();
        self.buffer.drain(..self.hop_size);
        Some(frame)
    }
}

/// Hann-windowed FFT magnitude spectrum of a frame.
pub struct SpectrumAnalyzer {
    frame_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(frame_size: usize) -> Self {
        // Precompute the Hann window to reduce spectral leakage.
        let window = (0..frame_size)
            .map(|i| {
                0.5 * (1.0
                    - ((2.0 * std::f32::consts::PI * i as f32) / (frame_size as f32 - 1.0)).cos())
            })
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(frame_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            frame_size,
            window,
            fft,
            scratch,
        }
    }

    /// Number of spectrum bins produced per frame.
    pub fn num_bins(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Compute the magnitude spectrum (positive frequencies only).
    pub fn process(&mut self, frame: &[f32]) -> Vec<f32> {
        debug_assert_eq!(frame.len(), self.frame_size);

        let mut buffer: Vec<Complex<f32>> = frame
            .iter()
            .zip(self.window.iter())
            .map(|(sample, w)| Complex::new(sample * w, 0.0))
            .collect();

        self.fft.process_with_scratch(&mut buffer, &mut self.scratch);

        buffer[..self.num_bins()].iter().map(|c| c.norm()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutter_waits_for_a_full_frame() {
        let mut cutter = FrameCutter::new(1024, 256);
        for _ in 0..3 {
            assert!(cutter.push_hop(&[0.1; 256]).is_none());
        }
        // The fourth hop completes the first frame.
        let frame = cutter.push_hop(&[0.1; 256]).unwrap();
        assert_eq!(frame.len(), 1024);
        // Afterwards, every hop yields exactly one frame.
        for _ in 0..5 {
            assert!(cutter.push_hop(&[0.2; 256]).is_some());
        }
    }

    #[test]
    fn frames_overlap_by_frame_minus_hop() {
        let mut cutter = FrameCutter::new(8, 2);
        let samples: Vec<f32> = (0..12).map(|i| i as f32).collect();

        let mut frames = Vec::new();
        for hop in samples.chunks(2) {
            if let Some(frame) = cutter.push_hop(hop) {
                frames.push(frame);
            }
        }
        assert_eq!(frames[0], (0..8).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(frames[1], (2..10).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(frames[2], (4..12).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn sine_peaks_in_the_right_bin() {
        let frame_size = 1024;
        let sample_rate = 44100.0;
        let freq = 440.0;
        let mut analyzer = SpectrumAnalyzer::new(frame_size);

        let frame: Vec<f32> = (0..frame_size)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect();
        let spectrum = analyzer.process(&frame);
        assert_eq!(spectrum.len(), frame_size / 2 + 1);

        let peak_bin = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        let expected_bin = (freq / sample_rate * frame_size as f32).round() as usize;
        assert!(
            (peak_bin as i64 - expected_bin as i64).abs() <= 1,
            "peak at bin {}, expected ~{}",
            peak_bin,
            expected_bin
        );
    }

    #[test]
    fn silence_yields_zero_spectrum() {
        let mut analyzer = SpectrumAnalyzer::new(256);
        let spectrum = analyzer.process(&vec![0.0; 256]);
        assert!(spectrum.iter().all(|&m| m == 0.0));
    }
}
