//! Per-instrument Kalman/PLL tempo and phase tracker.
//!
//! Each channel runs an independent 2-state filter over [period, phase].
//! Phase advances deterministically between hits (the PLL half); each
//! detected hit is treated as an observation of phase 0 and drives a
//! Kalman update (the filter half). Warmup is seeded from robust IOI
//! statistics so a bad first guess cannot poison the filter.
//!
//! The tracker is strictly causal: projections extend forward from the
//! current frame only.

use crate::config::PredictorConfig;
use crate::instrument::{Instrument, NUM_INSTRUMENTS};
use crate::predict::state::{wrap_phase, wrap_residual, InstrumentState, COV_EPSILON};
use crate::predict::types::{InstrumentPrediction, PredictionHit, PredictionOutput};

pub struct InstrumentPredictor {
    config: PredictorConfig,
    /// Seconds per frame (hop / sample rate).
    dt: f32,
    states: [InstrumentState; NUM_INSTRUMENTS],
    last_emission_time: f32,
}

impl InstrumentPredictor {
    pub fn new(config: PredictorConfig, sample_rate: f32, hop_size: usize) -> Self {
        Self {
            config,
            dt: hop_size as f32 / sample_rate,
            states: Default::default(),
            last_emission_time: 0.0,
        }
    }

    fn min_period(&self) -> f32 {
        60.0 / self.config.max_bpm
    }

    fn max_period(&self) -> f32 {
        60.0 / self.config.min_bpm
    }

    /// Channel state (read-only, for tests and diagnostics).
    pub fn state(&self, instrument: Instrument) -> &InstrumentState {
        &self.states[instrument.index()]
    }

    /// Consume one frame's gate vector. The scheduler tick is the frame
    /// index; currentTime = frame_idx * hop / sample_rate. Returns a full
    /// snapshot when a hit occurred or the periodic heartbeat elapsed.
    pub fn step(&mut self, gates: &[f32; NUM_INSTRUMENTS], frame_idx: u64) -> Option<PredictionOutput> {
        let current_time = frame_idx as f32 * self.dt;
        let mut any_hit = false;

        for idx in 0..NUM_INSTRUMENTS {
            let hit = gates[idx] >= 0.5;
            if hit {
                any_hit = true;
            }

            self.kalman_predict(idx);
            if hit {
                self.on_hit(idx, current_time);
            }
        }

        let elapsed = current_time - self.last_emission_time;
        if any_hit || elapsed >= self.config.periodic_interval_sec {
            self.last_emission_time = current_time;
            Some(self.build_snapshot(current_time, frame_idx))
        } else {
            None
        }
    }

    /// Covariance advance and deterministic phase advance for one frame.
    fn kalman_predict(&mut self, idx: usize) {
        let state = &mut self.states[idx];
        if !state.warmup_complete {
            return;
        }
        let dt = self.dt;

        state.p00 += self.config.q_period * dt;

        if state.period > 1e-6 {
            state.phase = wrap_phase(state.phase + dt / state.period);
        }

        // Period uncertainty leaks into phase through dphase/dperiod.
        let dphase_dperiod = -dt / (state.period * state.period);
        state.p11 += self.config.q_phase * dt + dphase_dperiod * dphase_dperiod * state.p00;
        state.p01 += dphase_dperiod * state.p00;
    }

    fn on_hit(&mut self, idx: usize, current_time: f32) {
        let min_period = self.min_period();
        let max_period = self.max_period();
        let min_hits = self.config.min_hits_for_seed;

        let state = &mut self.states[idx];
        state.push_hit(current_time);

        if state.hit_times.len() >= 2 {
            state.update_ioi_statistics(min_period, max_period);

            if !state.warmup_complete
                && state.hits_seen >= min_hits as u64
                && state.ioi_buffer.len() >= min_hits.saturating_sub(1)
            {
                state.seed_from_ioi();
            }
        }

        if state.warmup_complete {
            // A hit observes the preferred impact phase, 0.
            let residual = wrap_residual(state.phase);
            self.kalman_update(idx, residual);

            let state = &mut self.states[idx];
            state.period = state.period.clamp(min_period, max_period);
        }
    }

    /// Kalman measurement update for a phase residual. H = [0, 1]: only
    /// phase is observed directly.
    fn kalman_update(&mut self, idx: usize, residual: f32) {
        let state = &mut self.states[idx];

        // Measurement noise scales with observed IOI jitter.
        let r = self.config.r_base * (1.0 + state.period_mad / state.period);

        let s = state.p11 + r;
        if s < 1e-9 {
            return;
        }

        let k0 = state.p01 / s;
        let k1 = state.p11 / s;

        state.period -= k0 * residual;
        state.phase = wrap_phase(state.phase - k1 * residual);

        let p00_new = state.p00 - k0 * s * k0;
        let p01_new = state.p01 - k0 * s * k1;
        let p11_new = state.p11 - k1 * s * k1;
        state.p00 = p00_new.max(COV_EPSILON);
        state.p01 = p01_new;
        state.p11 = p11_new.max(COV_EPSILON);

        // Damped period correction when the phase is persistently off.
        if residual.abs() > 0.1 {
            state.period -= 0.1 * residual * state.period;
        }
    }

    fn build_snapshot(&mut self, current_time: f32, frame_idx: u64) -> PredictionOutput {
        let predictions = (0..NUM_INSTRUMENTS)
            .map(|idx| {
                let hits = self.project_channel(idx, current_time);
                let state = &self.states[idx];
                InstrumentPrediction {
                    instrument: Instrument::from_index(idx),
                    tempo_bpm: if state.period > 1e-6 {
                        60.0 / state.period
                    } else {
                        0.0
                    },
                    period_sec: state.period,
                    phase: state.phase,
                    confidence_global: state.confidence_global,
                    warmup_complete: state.warmup_complete,
                    hits,
                }
            })
            .collect();

        PredictionOutput {
            timestamp_sec: current_time,
            frame_idx,
            predictions,
        }
    }

    /// Project the next hits for one channel over the horizon.
    fn project_channel(&mut self, idx: usize, current_time: f32) -> Vec<PredictionHit> {
        if !self.states[idx].warmup_complete || self.states[idx].period < 1e-6 {
            return Vec::new();
        }

        let confidence = self.compute_confidence(idx, current_time);
        let sigma_t = self.time_uncertainty(idx);
        let state = &self.states[idx];

        let mut hits = Vec::new();
        let mut t_next = current_time + (1.0 - state.phase) * state.period;
        let mut hit_index: u32 = 1;

        while hit_index <= self.config.max_predictions_per_instrument as u32
            && t_next <= current_time + self.config.horizon_seconds
        {
            if confidence >= self.config.confidence_threshold_min {
                hits.push(PredictionHit {
                    t_pred_sec: t_next,
                    ci_low_sec: t_next - 1.96 * sigma_t,
                    ci_high_sec: t_next + 1.96 * sigma_t,
                    confidence,
                    hit_index,
                });
            }
            t_next += state.period;
            hit_index += 1;
        }
        hits
    }

    /// Weighted blend of IOI stability, phase variance, and recency.
    fn compute_confidence(&mut self, idx: usize, current_time: f32) -> f32 {
        let state = &mut self.states[idx];

        let mut c_ioi = 0.0;
        if state.period > 1e-6 && state.period_mad > 0.0 {
            c_ioi = (1.0 - state.period_mad / state.period).clamp(0.0, 1.0);
        }

        let mut c_phase = 0.0;
        if state.p11 > 0.0 {
            c_phase = (1.0 - 10.0 * state.p11.sqrt()).clamp(0.0, 1.0);
        }

        let mut c_recency = 1.0;
        if state.last_hit_time > 0.0 && state.period > 1e-6 {
            let elapsed = current_time - state.last_hit_time;
            c_recency = (-elapsed / (self.config.confidence_decay_rate * state.period)).exp();
        }

        let confidence = 0.4 * c_phase + 0.3 * c_ioi + 0.3 * c_recency;
        state.confidence_global = confidence;
        confidence
    }

    /// Propagated time uncertainty of a projected hit, floored at 1 ms.
    fn time_uncertainty(&self, idx: usize) -> f32 {
        let state = &self.states[idx];
        let period_std = state.p00.sqrt();
        let phase_std = state.p11.sqrt();

        let mut variance = (state.phase * period_std).powi(2) + (state.period * phase_std).powi(2);
        if state.period_mad > 0.0 {
            variance += 0.25 * state.period_mad * state.period_mad;
        }
        variance.sqrt().max(0.001)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::NUM_INSTRUMENTS;

    const SAMPLE_RATE: f32 = 44100.0;
    const HOP: usize = 256;

    fn predictor() -> InstrumentPredictor {
        InstrumentPredictor::new(PredictorConfig::default(), SAMPLE_RATE, HOP)
    }

    fn dt() -> f32 {
        HOP as f32 / SAMPLE_RATE
    }

    /// Drive the kick channel with hits at the given period for `count`
    /// hits; returns the last emitted snapshot and the final frame index.
    fn drive_kick(
        predictor: &mut InstrumentPredictor,
        period_sec: f32,
        count: usize,
    ) -> (Option<PredictionOutput>, u64) {
        let frames_per_hit = (period_sec / dt()).round() as u64;
        let mut last = None;
        let mut frame = 0u64;
        for k in 0..count {
            let target = (k as u64) * frames_per_hit;
            while frame < target {
                let out = predictor.step(&[0.0; NUM_INSTRUMENTS], frame);
                if out.is_some() {
                    last = out;
                }
                frame += 1;
            }
            let mut gates = [0.0f32; NUM_INSTRUMENTS];
            gates[0] = 1.0;
            let out = predictor.step(&gates, frame);
            if out.is_some() {
                last = out;
            }
            frame += 1;
        }
        (last, frame)
    }

    #[test]
    fn no_predictions_before_warmup() {
        let mut p = predictor();
        // 5 hits < min_hits_for_seed (8): channel must stay silent.
        let (last, _) = drive_kick(&mut p, 0.5, 5);
        let snapshot = last.expect("hits force emission");
        let kick = &snapshot.predictions[0];
        assert!(!kick.warmup_complete);
        assert!(kick.hits.is_empty());
    }

    #[test]
    fn warms_up_and_projects_forward() {
        let mut p = predictor();
        let (last, frame) = drive_kick(&mut p, 0.5, 12);
        let snapshot = last.expect("hits force emission");
        let kick = &snapshot.predictions[0];

        assert!(kick.warmup_complete);
        assert!(
            (p.state(Instrument::Kick).period_median - 0.5).abs() < 0.01,
            "median {} should be near 0.5",
            p.state(Instrument::Kick).period_median
        );

        let current_time = (frame - 1) as f32 * dt();
        assert!(!kick.hits.is_empty(), "warmed channel should project hits");
        for hit in &kick.hits {
            assert!(hit.t_pred_sec > current_time, "projection must be in the future");
            assert!(hit.ci_low_sec <= hit.t_pred_sec);
            assert!(hit.t_pred_sec <= hit.ci_high_sec);
            assert!((0.0..=1.0).contains(&hit.confidence));
        }
    }

    #[test]
    fn projection_tracks_the_beat() {
        let mut p = predictor();
        let frames_per_hit = (0.5 / dt()).round() as u64;
        let (last, frame) = drive_kick(&mut p, 0.5, 16);
        let snapshot = last.unwrap();
        let kick = &snapshot.predictions[0];
        assert!(kick.warmup_complete);

        // The next actual impulse lands on the quantized frame grid. Phase
        // sits at the wrap boundary right after a hit, so the beat one
        // period out may appear as hit_index 1 or 2; the projection train
        // must place a hit within 5 ms of it either way.
        let last_hit_frame = frame - 1;
        let next_hit_time = (last_hit_frame + frames_per_hit) as f32 * dt();
        let best = kick
            .hits
            .iter()
            .map(|h| (h.t_pred_sec - next_hit_time).abs())
            .fold(f32::INFINITY, f32::min);
        assert!(
            best < 0.005,
            "no projected hit within 5 ms of {} (hits: {:?})",
            next_hit_time,
            kick.hits
        );
    }

    #[test]
    fn period_stays_clamped() {
        let mut p = predictor();
        // Absurdly fast train: IOIs below 60/max_bpm are filtered, so the
        // channel never accumulates enough plausible IOIs to seed.
        let (_, _) = drive_kick(&mut p, 0.05, 30);
        let state = p.state(Instrument::Kick);
        assert!(!state.warmup_complete);

        // A plausible train seeds and stays inside the BPM bounds.
        let mut p = predictor();
        let (_, _) = drive_kick(&mut p, 0.5, 20);
        let state = p.state(Instrument::Kick);
        assert!(state.warmup_complete);
        let min_period = 60.0 / PredictorConfig::default().max_bpm;
        let max_period = 60.0 / PredictorConfig::default().min_bpm;
        assert!(state.period >= min_period && state.period <= max_period);
    }

    #[test]
    fn covariance_diagonal_stays_floored() {
        let mut p = predictor();
        let (_, _) = drive_kick(&mut p, 0.5, 20);
        let state = p.state(Instrument::Kick);
        assert!(state.p00 >= COV_EPSILON);
        assert!(state.p11 >= COV_EPSILON);
    }

    #[test]
    fn silent_channels_never_emit_hits() {
        let mut p = predictor();
        let mut emitted = 0;
        for frame in 0..2000u64 {
            if let Some(snapshot) = p.step(&[0.0; NUM_INSTRUMENTS], frame) {
                emitted += 1;
                for pred in &snapshot.predictions {
                    assert!(!pred.warmup_complete);
                    assert!(pred.hits.is_empty());
                }
            }
        }
        // Periodic heartbeat still emits snapshots.
        assert!(emitted > 0);
    }

    #[test]
    fn heartbeat_cadence_matches_interval() {
        let mut p = predictor();
        let mut emission_frames = Vec::new();
        for frame in 0..1000u64 {
            if p.step(&[0.0; NUM_INSTRUMENTS], frame).is_some() {
                emission_frames.push(frame);
            }
        }
        let interval_frames =
            (PredictorConfig::default().periodic_interval_sec / dt()).ceil() as u64;
        for pair in emission_frames.windows(2) {
            assert!(
                pair[1] - pair[0] >= interval_frames - 1,
                "heartbeats at {} and {} closer than the periodic interval",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn tempo_ramp_is_tracked() {
        let mut p = predictor();

        // Steady 120 BPM to warm up.
        let (_, mut frame) = drive_kick(&mut p, 0.5, 10);

        // Ramp smoothly to 140 BPM over 10 hits, then hold.
        let target_period = 60.0 / 140.0;
        let mut period = 0.5f32;
        let ramp_step = (0.5 - target_period) / 10.0;
        let mut drive_hit = |p: &mut InstrumentPredictor, frame: &mut u64, period: f32| {
            let frames = (period / dt()).round() as u64;
            for _ in 0..frames.saturating_sub(1) {
                p.step(&[0.0; NUM_INSTRUMENTS], *frame);
                *frame += 1;
            }
            let mut gates = [0.0f32; NUM_INSTRUMENTS];
            gates[0] = 1.0;
            p.step(&gates, *frame);
            *frame += 1;
        };

        for _ in 0..10 {
            period -= ramp_step;
            drive_hit(&mut p, &mut frame, period);
        }

        // The filter rings around the new tempo during the hold; track the
        // closest approach across the settling window.
        let mut best_error = f32::INFINITY;
        for _ in 0..10 {
            drive_hit(&mut p, &mut frame, target_period);
            let err = (p.state(Instrument::Kick).period - target_period).abs() / target_period;
            best_error = best_error.min(err);
        }

        let state = p.state(Instrument::Kick);
        assert!(state.warmup_complete);
        assert!(
            best_error < 0.03,
            "period never came within 3% of {} (best {:.4})",
            target_period,
            best_error
        );
        // Period must remain inside the clamp throughout.
        let min_period = 60.0 / PredictorConfig::default().max_bpm;
        let max_period = 60.0 / PredictorConfig::default().min_bpm;
        assert!(state.period >= min_period && state.period <= max_period);
        assert!(
            state.confidence_global > 0.5,
            "confidence {} should recover above 0.5",
            state.confidence_global
        );
    }
}
