//! Adaptive onset gate: per-channel scalar novelty to {0, 1}.
//!
//! Novelty is the positive energy delta (or raw energy for the rms
//! method), smoothed by a short moving average. The decision threshold is
//! median + k * MAD over a rolling window, so it adapts to the channel's
//! loudness floor. Detection is rising-edge triggered and refractory
//! protected, and fully causal.

use std::collections::VecDeque;

use crate::analysis::NoveltyGate;
use crate::config::{GateConfig, GateMethod};

/// Threshold history entries required before the adaptive threshold is
/// trusted over the configured fallback.
const MIN_THRESH_HISTORY: usize = 8;

pub struct OnsetGate {
    method: GateMethod,
    threshold: f32,
    refractory: u32,
    warmup: u64,
    smooth_window: usize,
    odf_window: usize,

    odf_history: VecDeque<f32>,
    thresh_history: VecDeque<f32>,
    ref_count: u32,
    frames_seen: u64,
    prev_smoothed: f32,
    was_above: bool,
    detection_enabled: bool,
}

impl OnsetGate {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            method: config.method,
            threshold: config.threshold,
            refractory: config.refractory,
            warmup: config.warmup as u64,
            smooth_window: config.smooth_window.max(1),
            odf_window: config.odf_window.max(1),
            odf_history: VecDeque::with_capacity(config.smooth_window.max(1) + 1),
            thresh_history: VecDeque::with_capacity(config.odf_window.max(1) + 1),
            ref_count: 0,
            frames_seen: 0,
            prev_smoothed: 0.0,
            was_above: false,
            detection_enabled: false,
        }
    }

    /// Moving-average smoothed novelty, after appending the new value.
    fn smooth(&mut self, novelty: f32) -> f32 {
        self.odf_history.push_back(novelty);
        if self.odf_history.len() > self.smooth_window {
            self.odf_history.pop_front();
        }
        self.odf_history.iter().sum::<f32>() / self.odf_history.len() as f32
    }

    fn dynamic_threshold(&self) -> f32 {
        if self.thresh_history.len() < MIN_THRESH_HISTORY {
            return self.threshold;
        }
        let values: Vec<f32> = self.thresh_history.iter().copied().collect();
        let (median, mad) = median_and_mad(&values);
        let k = if self.threshold > 0.0 { self.threshold } else { 1.0 };
        median + k * mad.max(1e-6)
    }
}

impl NoveltyGate for OnsetGate {
    fn step(&mut self, energy: f32) -> f32 {
        self.frames_seen += 1;

        // Novelty: positive delta against the last value retained in the
        // history; rms uses the raw energy.
        let novelty = match self.method {
            GateMethod::Rms => energy,
            _ => match self.odf_history.back() {
                Some(&prev) => (energy - prev).max(0.0),
                None => 0.0,
            },
        };

        let smoothed = self.smooth(novelty);

        self.thresh_history.push_back(smoothed);
        if self.thresh_history.len() > self.odf_window {
            self.thresh_history.pop_front();
        }

        if self.frames_seen >= self.warmup {
            self.detection_enabled = true;
        }

        if self.ref_count > 0 {
            self.ref_count -= 1;
        }

        let mut hit = 0.0f32;
        if self.detection_enabled {
            let threshold = self.dynamic_threshold();
            let above = smoothed > threshold;
            let rising = smoothed >= self.prev_smoothed;
            if self.ref_count == 0 && above && !self.was_above && rising {
                hit = 1.0;
            }
            self.was_above = above;
        } else {
            self.was_above = false;
        }
        self.prev_smoothed = smoothed;

        if hit >= 0.5 {
            self.ref_count = self.refractory;
        }
        hit
    }
}

/// Median and (unscaled) MAD of a slice.
fn median_and_mad(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let median = median_of(values);
    let deviations: Vec<f32> = values.iter().map(|v| (v - median).abs()).collect();
    (median, median_of(&deviations))
}

fn median_of(values: &[f32]) -> f32 {
    let mut sorted: Vec<f32> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}
