//! Instrument aggregator: projects B mel-band energies onto the five
//! instrument channels through fixed frequency-lobe masks.
//!
//! Each instrument's row of the weight matrix is a sum of Hann-flattened
//! lobes over the band center frequencies, normalized to sum to one, so
//! each output is a convex combination of band energies.

use crate::analysis::melbands::{hz_to_mel, mel_to_hz};
use crate::instrument::NUM_INSTRUMENTS;

/// A frequency lobe: flat core between `f1 + edge` and `f2 - edge`, Hann
/// rolloff over the edges, scaled by `weight`.
type Lobe = (f32, f32, f32);

const KICK_LOBES: &[Lobe] = &[(40.0, 75.0, 0.75)];
const SNARE_LOBES: &[Lobe] = &[
    (180.0, 280.0, 0.35),
    (350.0, 600.0, 0.10),
    (2000.0, 5000.0, 0.35),
    (6000.0, 10000.0, 0.20),
];
const CLAP_LOBES: &[Lobe] = &[
    (800.0, 1600.0, 0.30),
    (2000.0, 6000.0, 0.50),
    (6000.0, 10000.0, 0.20),
];
const CHAT_LOBES: &[Lobe] = &[
    (3000.0, 6000.0, 0.25),
    (7000.0, 12000.0, 0.55),
    (12000.0, 16000.0, 0.20),
];
const OHC_LOBES: &[Lobe] = &[
    (3000.0, 6000.0, 0.25),
    (6000.0, 12000.0, 0.50),
    (12000.0, 16000.0, 0.25),
];

pub struct InstrumentAggregator {
    nyquist: f32,
    lobe_rolloff: f32,
    num_bands: usize,
    weights: Vec<Vec<f32>>,
}

impl InstrumentAggregator {
    pub fn new(sample_rate: f32, lobe_rolloff: f32) -> Self {
        Self {
            nyquist: sample_rate * 0.5,
            lobe_rolloff,
            num_bands: 0,
            weights: Vec::new(),
        }
    }

    /// Project one frame of band energies to the five instrument energies.
    /// The weight matrix is rebuilt on the first frame and whenever the
    /// band count changes.
    pub fn step(&mut self, bands: &[f32]) -> [f32; NUM_INSTRUMENTS] {
        let mut out = [0.0f32; NUM_INSTRUMENTS];
        if bands.is_empty() {
            return out;
        }
        if self.num_bands != bands.len() || self.weights.is_empty() {
            self.rebuild_weights(bands.len());
        }

        for (k, row) in self.weights.iter().enumerate() {
            out[k] = row.iter().zip(bands.iter()).map(|(w, b)| w * b).sum();
        }
        out
    }

    /// Row `k` of the weight matrix (for tests and diagnostics).
    pub fn weights_row(&self, k: usize) -> Option<&[f32]> {
        self.weights.get(k).map(|row| row.as_slice())
    }

    fn rebuild_weights(&mut self, num_bands: usize) {
        self.num_bands = num_bands;

        // Band centers under equal mel spacing between 0 and nyquist.
        let mel0 = hz_to_mel(0.0);
        let mel_n = hz_to_mel(self.nyquist);
        let centers_hz: Vec<f32> = (0..num_bands)
            .map(|i| mel_to_hz(mel0 + (mel_n - mel0) * (i as f32 + 0.5) / num_bands as f32))
            .collect();

        let tables: [&[Lobe]; NUM_INSTRUMENTS] =
            [KICK_LOBES, SNARE_LOBES, CLAP_LOBES, CHAT_LOBES, OHC_LOBES];

        self.weights = tables
            .iter()
            .map(|lobes| {
                let mut row = vec![0.0f32; num_bands];
                for &(f1, f2, weight) in lobes.iter() {
                    add_hann_lobe(&mut row, &centers_hz, f1, f2, weight, self.lobe_rolloff);
                }
                normalize(&mut row);
                row
            })
            .collect();
    }
}

fn add_hann_lobe(
    dest: &mut [f32],
    band_centers_hz: &[f32],
    f1: f32,
    f2: f32,
    weight: f32,
    rolloff_frac: f32,
) {
    if f2 <= f1 {
        return;
    }
    let span = f2 - f1;
    let edge = (span * rolloff_frac).min(span * 0.49).max(0.0);
    let core1 = f1 + edge;
    let core2 = f2 - edge;

    for (i, &f) in band_centers_hz.iter().enumerate() {
        let w = if f >= core1 && f <= core2 {
            1.0
        } else if f >= f1 && f < core1 {
            let x = (f - f1) / edge.max(1e-9);
            0.5 * (1.0 - (std::f32::consts::PI * x).cos())
        } else if f > core2 && f <= f2 {
            let x = (f2 - f) / edge.max(1e-9);
            0.5 * (1.0 - (std::f32::consts::PI * x).cos())
        } else {
            0.0
        };
        dest[i] += weight * w;
    }
}

fn normalize(row: &mut [f32]) {
    let sum: f32 = row.iter().sum();
    if sum <= 0.0 {
        return;
    }
    let inv = 1.0 / sum;
    for w in row.iter_mut() {
        *w *= inv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_sum_to_one() {
        let mut agg = InstrumentAggregator::new(44100.0, 0.15);
        let bands = vec![1.0f32; 64];
        agg.step(&bands);

        for k in 0..NUM_INSTRUMENTS {
            let sum: f32 = agg.weights_row(k).unwrap().iter().sum();
            assert!(
                (sum - 1.0).abs() < 1e-4,
                "row {} sums to {}, expected 1",
                k,
                sum
            );
        }
    }

    #[test]
    fn output_bounded_by_band_sum() {
        let mut agg = InstrumentAggregator::new(44100.0, 0.15);
        let bands: Vec<f32> = (0..64).map(|i| (i % 7) as f32 * 0.3).collect();
        let total: f32 = bands.iter().sum();
        let out = agg.step(&bands);
        for (k, &e) in out.iter().enumerate() {
            assert!(e >= 0.0, "channel {} energy negative", k);
            assert!(e <= total + 1e-3, "channel {} exceeds band sum", k);
        }
    }

    #[test]
    fn step_is_idempotent_for_identical_input() {
        let mut agg = InstrumentAggregator::new(44100.0, 0.15);
        let bands: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin().abs()).collect();
        let a = agg.step(&bands);
        let b = agg.step(&bands);
        assert_eq!(a, b);
    }

    #[test]
    fn kick_favors_low_bands() {
        let mut agg = InstrumentAggregator::new(44100.0, 0.15);
        let mut low = vec![0.0f32; 64];
        low[0] = 1.0;
        low[1] = 1.0;
        let out_low = agg.step(&low);

        let mut high = vec![0.0f32; 64];
        high[60] = 1.0;
        high[61] = 1.0;
        let out_high = agg.step(&high);

        assert!(
            out_low[0] > out_high[0],
            "kick should respond to low bands more than high bands"
        );
        assert!(
            out_high[3] > out_low[3],
            "closed hat should respond to high bands more than low bands"
        );
    }

    #[test]
    fn rebuilds_on_band_count_change() {
        let mut agg = InstrumentAggregator::new(44100.0, 0.15);
        agg.step(&vec![1.0f32; 64]);
        assert_eq!(agg.weights_row(0).unwrap().len(), 64);
        agg.step(&vec![1.0f32; 32]);
        assert_eq!(agg.weights_row(0).unwrap().len(), 32);
    }

    #[test]
    fn empty_bands_yield_zero_output() {
        let mut agg = InstrumentAggregator::new(44100.0, 0.15);
        assert_eq!(agg.step(&[]), [0.0; NUM_INSTRUMENTS]);
    }
}
