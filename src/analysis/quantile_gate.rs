//! Quantile gate variant: arms when the novelty crosses a high online
//! quantile and fires on the next drop below a low quantile.
//!
//! Quantiles are tracked with the 5-marker P² estimator, so the gate runs
//! in constant memory with no history buffer.

use crate::analysis::NoveltyGate;
use crate::config::GateConfig;

/// 5-marker P² online quantile estimator.
#[derive(Debug, Clone)]
struct P2 {
    q: f64,
    m: [f64; 5],
    n: [f64; 5],
    np: [f64; 5],
    dn: [f64; 5],
    init: bool,
}

impl P2 {
    fn new(q: f64) -> Self {
        Self {
            q,
            m: [0.0; 5],
            n: [0.0; 5],
            np: [0.0; 5],
            dn: [0.0; 5],
            init: false,
        }
    }

    fn init_from_five(&mut self, seed: &[f64]) {
        let mut sorted = seed.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        for i in 0..5 {
            self.m[i] = sorted[i];
            self.n[i] = (i + 1) as f64;
        }
        let q = self.q;
        self.np = [1.0, 1.0 + 2.0 * q, 1.0 + 4.0 * q, 1.0 + 6.0 * q, 5.0];
        self.dn = [0.0, q / 2.0, q, (1.0 + q) / 2.0, 1.0];
        self.init = true;
    }

    fn parabolic(&self, i: usize) -> f64 {
        let (m, n) = (&self.m, &self.n);
        let a = (n[i] - n[i - 1] + (n[i + 1] - n[i]))
            * ((m[i + 1] - m[i]) / (n[i + 1] - n[i]) - (m[i] - m[i - 1]) / (n[i] - n[i - 1]));
        m[i] + a / (n[i + 1] - n[i - 1])
    }

    fn linear(&self, i: usize, di: i32) -> f64 {
        let j = (i as i32 + di) as usize;
        self.m[i] + di as f64 * (self.m[j] - self.m[i]) / (self.n[j] - self.n[i])
    }

    fn update(&mut self, x: f64) {
        debug_assert!(self.init);
        let k = if x < self.m[0] {
            self.m[0] = x;
            0
        } else if x >= self.m[4] {
            self.m[4] = x;
            3
        } else {
            let mut k = 0;
            while k < 4 && x >= self.m[k + 1] {
                k += 1;
            }
            k
        };

        for i in 0..5 {
            if i <= k {
                self.n[i] += 1.0;
            }
            self.np[i] += self.dn[i];
        }

        for i in 1..=3 {
            let d = self.np[i] - self.n[i];
            if (d >= 1.0 && self.n[i + 1] - self.n[i] > 1.0)
                || (d <= -1.0 && self.n[i] - self.n[i - 1] > 1.0)
            {
                let di: i32 = if d >= 1.0 { 1 } else { -1 };
                let candidate = self.parabolic(i);
                let bounded = if candidate > self.m[i - 1] && candidate < self.m[i + 1] {
                    candidate
                } else {
                    self.linear(i, di)
                };
                self.m[i] = bounded;
                self.n[i] += di as f64;
            }
        }
    }

    /// Current quantile estimate (the center marker).
    fn value(&self) -> f64 {
        self.m[2]
    }
}

pub struct QuantileGate {
    refractory: u32,
    warmup: u64,

    hi: P2,
    lo: P2,
    seed: Vec<f64>,
    armed: bool,
    ref_count: u32,
    frames_seen: u64,
}

impl QuantileGate {
    pub fn new(config: &GateConfig) -> Self {
        Self {
            refractory: config.refractory,
            warmup: config.warmup as u64,
            hi: P2::new(config.q_hi),
            lo: P2::new(config.q_lo),
            seed: Vec::with_capacity(5),
            armed: false,
            ref_count: 0,
            frames_seen: 0,
        }
    }

    fn feed_estimators(&mut self, x: f64) {
        if !self.hi.init {
            self.seed.push(x);
            if self.seed.len() == 5 {
                let seed = std::mem::take(&mut self.seed);
                self.hi.init_from_five(&seed);
                self.lo.init_from_five(&seed);
            }
            return;
        }
        self.hi.update(x);
        self.lo.update(x);
    }
}

impl NoveltyGate for QuantileGate {
    fn step(&mut self, energy: f32) -> f32 {
        let x = energy as f64;
        self.frames_seen += 1;
        self.feed_estimators(x);

        if self.ref_count > 0 {
            self.ref_count -= 1;
        }

        let mut hit = 0.0f32;
        if self.frames_seen > self.warmup && self.hi.init {
            let t_hi = self.hi.value();
            let t_lo = self.lo.value();

            if !self.armed && self.ref_count == 0 && x > t_hi {
                self.armed = true;
            }
            if self.armed && x < t_lo {
                hit = 1.0;
                self.armed = false;
                self.ref_count = self.refractory;
            }
        }
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateMethod;

    fn quantile_config() -> GateConfig {
        GateConfig {
            method: GateMethod::Quantile,
            refractory: 4,
            warmup: 8,
            q_hi: 0.9,
            q_lo: 0.5,
            ..GateConfig::default()
        }
    }

    #[test]
    fn p2_tracks_median_of_uniform_ramp() {
        let mut p2 = P2::new(0.5);
        let values: Vec<f64> = (0..5).map(|i| i as f64).collect();
        p2.init_from_five(&values);
        for i in 5..1000 {
            p2.update((i % 100) as f64);
        }
        // Median of 0..100 is ~50; P² is approximate.
        let est = p2.value();
        assert!((est - 50.0).abs() < 10.0, "median estimate {} off", est);
    }

    #[test]
    fn fires_on_spike_then_drop() {
        let mut gate = QuantileGate::new(&quantile_config());
        // Baseline noise establishes the quantiles.
        for i in 0..100 {
            let x = 0.1 + 0.01 * ((i % 5) as f32);
            assert_eq!(gate.step(x), 0.0);
        }
        // Spike arms the gate; the fall back below the low quantile fires.
        assert_eq!(gate.step(5.0), 0.0, "arming must not fire by itself");
        let fired = gate.step(0.05);
        assert_eq!(fired, 1.0, "drop below low quantile should fire");
    }

    #[test]
    fn refractory_applies() {
        let mut gate = QuantileGate::new(&quantile_config());
        for i in 0..100 {
            gate.step(0.1 + 0.01 * ((i % 5) as f32));
        }
        gate.step(5.0);
        assert_eq!(gate.step(0.05), 1.0);
        // Immediate re-spike and drop inside refractory cannot fire.
        gate.step(5.0);
        assert_eq!(gate.step(0.05), 0.0);
    }

    #[test]
    fn silent_stream_never_fires() {
        let mut gate = QuantileGate::new(&quantile_config());
        for _ in 0..500 {
            assert_eq!(gate.step(0.0), 0.0);
        }
    }
}
