//! Synthetic PCM generators used by unit and integration tests.
//!
//! All generators are deterministic so assertions on hit timing stay
//! reproducible across runs.

use std::f32::consts::PI;

/// Silence of the given length.
pub fn silence(num_samples: usize) -> Vec<f32> {
    vec![0.0; num_samples]
}

/// A pure sine tone.
pub fn sine(frequency_hz: f32, sample_rate: f32, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| (2.0 * PI * frequency_hz * i as f32 / sample_rate).sin())
        .collect()
}

/// Short full-scale bursts at the given sample positions (10 samples each).
pub fn impulse_train(num_samples: usize, positions: &[usize]) -> Vec<f32> {
    let mut signal = vec![0.0; num_samples];
    for &pos in positions {
        for offset in 0..10 {
            if pos + offset < num_samples {
                signal[pos + offset] = 1.0;
            }
        }
    }
    signal
}

/// A 4-on-floor kick pattern: a decaying low-frequency burst on every beat.
pub fn kick_pattern(duration_sec: f32, bpm: f32, sample_rate: f32) -> Vec<f32> {
    let num_samples = (duration_sec * sample_rate) as usize;
    let mut samples = vec![0.0f32; num_samples];

    let beat_interval = (60.0 / bpm * sample_rate) as usize;
    let kick_len = (0.05 * sample_rate) as usize;

    let mut pos = 0;
    while pos < num_samples {
        for i in 0..kick_len.min(num_samples - pos) {
            let t = i as f32 / sample_rate;
            // 60 Hz body with an exponential decay envelope.
            let envelope = (-t * 60.0).exp();
            samples[pos + i] += 0.8 * envelope * (2.0 * PI * 60.0 * t).sin();
        }
        pos += beat_interval;
    }
    samples
}
