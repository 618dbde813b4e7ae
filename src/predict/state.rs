//! Per-channel tracker state: recent hit times, robust IOI statistics, and
//! the 2x2 Kalman covariance over [period, phase].

use std::collections::VecDeque;

/// Hit timestamps retained per channel.
pub const MAX_HITS: usize = 20;

/// Diagonal covariance floor.
pub const COV_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone)]
pub struct InstrumentState {
    pub warmup_complete: bool,
    /// Recent hit audio-time stamps, oldest first.
    pub hit_times: VecDeque<f32>,
    /// Inter-onset intervals derived from hit_times, filtered to the
    /// plausible range.
    pub ioi_buffer: Vec<f32>,
    pub period_median: f32,
    pub period_mad: f32,

    // Kalman state: [period, phase]
    pub period: f32,
    /// Beat phase in [0, 1); a hit "should" land at 0.
    pub phase: f32,

    // Covariance P (2x2, symmetric)
    pub p00: f32,
    pub p01: f32,
    pub p11: f32,

    pub last_hit_time: f32,
    pub hits_seen: u64,
    pub confidence_global: f32,
}

impl Default for InstrumentState {
    fn default() -> Self {
        Self {
            warmup_complete: false,
            hit_times: VecDeque::with_capacity(MAX_HITS + 1),
            ioi_buffer: Vec::with_capacity(MAX_HITS),
            period_median: 0.0,
            period_mad: 0.0,
            period: 0.5,
            phase: 0.0,
            p00: 0.01,
            p01: 0.0,
            p11: 0.01,
            last_hit_time: -1.0,
            hits_seen: 0,
            confidence_global: 0.0,
        }
    }
}

impl InstrumentState {
    /// Record a hit time, keeping the sliding window bounded.
    pub fn push_hit(&mut self, time: f32) {
        self.hit_times.push_back(time);
        self.last_hit_time = time;
        self.hits_seen += 1;
        if self.hit_times.len() > MAX_HITS {
            self.hit_times.pop_front();
        }
    }

    /// Recompute the IOI buffer and its median/MAD from the current hit
    /// window. IOIs outside [min_period, 4 * max_period] are outliers
    /// (double hits or long gaps) and are dropped.
    pub fn update_ioi_statistics(&mut self, min_period: f32, max_period: f32) {
        if self.hit_times.len() < 2 {
            return;
        }
        self.ioi_buffer.clear();
        let times: Vec<f32> = self.hit_times.iter().copied().collect();
        for pair in times.windows(2) {
            let ioi = pair[1] - pair[0];
            if ioi >= min_period && ioi <= max_period * 4.0 {
                self.ioi_buffer.push(ioi);
            }
        }

        if self.ioi_buffer.len() >= 2 {
            self.period_median = median(&self.ioi_buffer);
            self.period_mad = mad(&self.ioi_buffer, self.period_median);
        }
    }

    /// Seed the Kalman state from the IOI statistics at warmup completion.
    pub fn seed_from_ioi(&mut self) {
        self.warmup_complete = true;
        self.period = self.period_median;
        self.phase = 0.0;
        self.p00 = (self.period_mad * self.period_mad).max(COV_EPSILON);
        self.p01 = 0.0;
        self.p11 = 0.01;
    }
}

/// Wrap a phase into [0, 1).
pub fn wrap_phase(mut phase: f32) -> f32 {
    while phase >= 1.0 {
        phase -= 1.0;
    }
    while phase < 0.0 {
        phase += 1.0;
    }
    phase
}

/// Wrap a phase residual into [-0.5, 0.5).
pub fn wrap_residual(mut residual: f32) -> f32 {
    while residual >= 0.5 {
        residual -= 1.0;
    }
    while residual < -0.5 {
        residual += 1.0;
    }
    residual
}

pub fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    if values.len() == 1 {
        return values[0];
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

/// MAD scaled by 1.4826 to estimate sigma under a normal distribution.
pub fn mad(values: &[f32], median_value: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let deviations: Vec<f32> = values.iter().map(|v| (v - median_value).abs()).collect();
    1.4826 * median(&deviations)
}
