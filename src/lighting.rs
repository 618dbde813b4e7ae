//! Lighting engine: converts prediction snapshots into timed lighting
//! commands.
//!
//! Three filters apply in order: confidence threshold, latency window
//! (the dispatcher needs enough lead time but not stale predictions), and
//! duplicate suppression over a rolling window keyed by event id. Only the
//! configured channels enter the outgoing stream; every channel still
//! participates in dedup bookkeeping so enabling one later does not change
//! the suppression behavior of the others.

use std::collections::HashMap;

use crate::config::LightingConfig;
use crate::instrument::Instrument;
use crate::predict::PredictionOutput;

/// Sent-record sweep cadence in frames.
const CLEANUP_INTERVAL: u32 = 50;

/// One outgoing command for the external dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct LightingCommand {
    pub instrument: Instrument,
    /// Predicted hit time on the audio clock, seconds.
    pub t_pred_sec: f32,
    pub confidence: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub event_id: String,
}

/// Dedup table entry: the prediction time a command was sent for.
#[derive(Debug, Clone, Copy)]
struct SentEvent {
    t_pred_sec: f32,
}

pub struct LightingEngine {
    config: LightingConfig,
    sent_events: HashMap<String, SentEvent>,
    current_time_sec: f32,
    cleanup_counter: u32,
}

impl LightingEngine {
    pub fn new(config: LightingConfig) -> Self {
        Self {
            config,
            sent_events: HashMap::new(),
            current_time_sec: 0.0,
            cleanup_counter: 0,
        }
    }

    /// Process one prediction snapshot into zero or more commands.
    pub fn step(&mut self, output: &PredictionOutput) -> Vec<LightingCommand> {
        self.current_time_sec = output.timestamp_sec;

        // Batched cleanup keeps the sweep off the per-frame path.
        self.cleanup_counter += 1;
        if self.cleanup_counter >= CLEANUP_INTERVAL {
            self.cleanup_old_events();
            self.cleanup_counter = 0;
        }

        let mut commands = Vec::new();
        for prediction in &output.predictions {
            for hit in &prediction.hits {
                let (r, g, b) = instrument_color(prediction.instrument);
                let command = LightingCommand {
                    instrument: prediction.instrument,
                    t_pred_sec: hit.t_pred_sec,
                    confidence: hit.confidence,
                    r,
                    g,
                    b,
                    event_id: event_id(prediction.instrument, hit.t_pred_sec),
                };

                if !self.should_send(&command) {
                    continue;
                }

                // Track by prediction time, not send time, so duplicates
                // arriving late are still caught.
                self.sent_events.insert(
                    command.event_id.clone(),
                    SentEvent {
                        t_pred_sec: command.t_pred_sec,
                    },
                );

                if self
                    .config
                    .enabled_instruments
                    .contains(&command.instrument)
                {
                    commands.push(command);
                }
            }
        }
        commands
    }

    /// Live dedup records (for tests and diagnostics).
    pub fn tracked_events(&self) -> usize {
        self.sent_events.len()
    }

    fn should_send(&self, command: &LightingCommand) -> bool {
        if command.confidence < self.config.confidence_threshold {
            return false;
        }

        let latency = command.t_pred_sec - self.current_time_sec;
        if latency < self.config.min_latency_sec || latency > self.config.max_latency_sec {
            return false;
        }

        if let Some(sent) = self.sent_events.get(&command.event_id) {
            if command.t_pred_sec - sent.t_pred_sec < self.config.duplicate_window_sec {
                return false;
            }
        }
        true
    }

    fn cleanup_old_events(&mut self) {
        let now = self.current_time_sec;
        let window = self.config.duplicate_window_sec;
        self.sent_events
            .retain(|_, sent| now - sent.t_pred_sec <= window);
    }
}

/// Event id: instrument name plus prediction time rounded to 10 ms, so
/// near-identical re-projections collapse to the same id.
fn event_id(instrument: Instrument, t_pred_sec: f32) -> String {
    let rounded = (t_pred_sec * 100.0).round() / 100.0;
    format!("{}_{:.2}", instrument.name(), rounded)
}

/// Fixed color mapping: kick red, snare green, everything else blue.
fn instrument_color(instrument: Instrument) -> (u8, u8, u8) {
    match instrument {
        Instrument::Kick => (1, 0, 0),
        Instrument::Snare => (0, 1, 0),
        _ => (0, 0, 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::{InstrumentPrediction, PredictionHit};

    fn snapshot(
        now: f32,
        instrument: Instrument,
        t_pred: f32,
        confidence: f32,
    ) -> PredictionOutput {
        PredictionOutput {
            timestamp_sec: now,
            frame_idx: 0,
            predictions: vec![InstrumentPrediction {
                instrument,
                tempo_bpm: 120.0,
                period_sec: 0.5,
                phase: 0.0,
                confidence_global: confidence,
                warmup_complete: true,
                hits: vec![PredictionHit {
                    t_pred_sec: t_pred,
                    ci_low_sec: t_pred - 0.01,
                    ci_high_sec: t_pred + 0.01,
                    confidence,
                    hit_index: 1,
                }],
            }],
        }
    }

    fn engine() -> LightingEngine {
        LightingEngine::new(LightingConfig::default())
    }

    #[test]
    fn emits_kick_command_with_red() {
        let mut engine = engine();
        let commands = engine.step(&snapshot(1.0, Instrument::Kick, 1.5, 0.9));
        assert_eq!(commands.len(), 1);
        let cmd = &commands[0];
        assert_eq!((cmd.r, cmd.g, cmd.b), (1, 0, 0));
        assert_eq!(cmd.event_id, "kick_1.50");
    }

    #[test]
    fn low_confidence_is_dropped() {
        let mut engine = engine();
        let commands = engine.step(&snapshot(1.0, Instrument::Kick, 1.5, 0.1));
        assert!(commands.is_empty());
    }

    #[test]
    fn latency_window_applies() {
        let mut engine = engine();
        // Too soon: below min latency.
        assert!(engine
            .step(&snapshot(1.0, Instrument::Kick, 1.01, 0.9))
            .is_empty());
        // Too far: beyond max latency.
        assert!(engine
            .step(&snapshot(1.0, Instrument::Kick, 4.0, 0.9))
            .is_empty());
        // In the window.
        assert_eq!(
            engine.step(&snapshot(1.0, Instrument::Kick, 1.5, 0.9)).len(),
            1
        );
    }

    #[test]
    fn duplicate_within_window_is_suppressed() {
        let mut engine = engine();
        // The predictor re-emits the same projected hit three ticks in a
        // row; the dedup window collapses them to one command.
        let first = engine.step(&snapshot(1.000, Instrument::Kick, 1.500, 0.9));
        let second = engine.step(&snapshot(1.006, Instrument::Kick, 1.501, 0.9));
        let third = engine.step(&snapshot(1.012, Instrument::Kick, 1.499, 0.9));
        assert_eq!(first.len() + second.len() + third.len(), 1);
    }

    #[test]
    fn distinct_beats_both_emit() {
        let mut engine = engine();
        let a = engine.step(&snapshot(1.0, Instrument::Kick, 1.5, 0.9));
        let b = engine.step(&snapshot(1.5, Instrument::Kick, 2.0, 0.9));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_ne!(a[0].event_id, b[0].event_id);
    }

    #[test]
    fn non_kick_channels_are_gated_but_tracked() {
        let mut engine = engine();
        let commands = engine.step(&snapshot(1.0, Instrument::Snare, 1.5, 0.9));
        assert!(commands.is_empty(), "snare is not in the default stream");
        assert_eq!(
            engine.tracked_events(),
            1,
            "suppressed channels still do dedup bookkeeping"
        );
    }

    #[test]
    fn enabling_snare_emits_green() {
        let config = LightingConfig {
            enabled_instruments: vec![Instrument::Kick, Instrument::Snare],
            ..LightingConfig::default()
        };
        let mut engine = LightingEngine::new(config);
        let commands = engine.step(&snapshot(1.0, Instrument::Snare, 1.5, 0.9));
        assert_eq!(commands.len(), 1);
        assert_eq!((commands[0].r, commands[0].g, commands[0].b), (0, 1, 0));
    }

    #[test]
    fn cleanup_expires_old_records() {
        let mut engine = engine();
        engine.step(&snapshot(1.0, Instrument::Kick, 1.5, 0.9));
        assert_eq!(engine.tracked_events(), 1);

        // Advance far past the prediction time; the sweep runs every
        // CLEANUP_INTERVAL frames.
        for i in 0..(CLEANUP_INTERVAL + 1) {
            let now = 10.0 + i as f32 * 0.01;
            engine.step(&snapshot(now, Instrument::Kick, now + 0.001, 0.0));
        }
        assert_eq!(engine.tracked_events(), 0);
    }

    #[test]
    fn same_id_outside_window_emits_again() {
        // With the default 0.1 s window two prediction times can never
        // share a 10 ms-rounded id while sitting a full window apart, so
        // shrink the window to expose the re-emit path.
        let config = LightingConfig {
            duplicate_window_sec: 0.004,
            ..LightingConfig::default()
        };
        let mut engine = LightingEngine::new(config);
        let first = engine.step(&snapshot(1.0, Instrument::Kick, 1.5001, 0.9));
        let second = engine.step(&snapshot(1.01, Instrument::Kick, 1.5049, 0.9));
        assert_eq!(first.len(), 1);
        assert_eq!(
            second.len(),
            1,
            "same id with t_pred a full window later must emit"
        );
        assert_eq!(first[0].event_id, second[0].event_id);
    }
}
