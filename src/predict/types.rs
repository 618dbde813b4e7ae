//! Prediction payload types shared between the predictor, the lighting
//! engine, the telemetry publisher, and the hit logger.

use serde::{Deserialize, Serialize};

use crate::instrument::Instrument;

/// One projected hit on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionHit {
    /// Predicted hit time on the audio clock, seconds.
    pub t_pred_sec: f32,
    /// 95% confidence interval bounds.
    pub ci_low_sec: f32,
    pub ci_high_sec: f32,
    pub confidence: f32,
    /// 1-based index within the projection horizon.
    pub hit_index: u32,
}

/// Per-channel tracker summary plus its projected hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentPrediction {
    pub instrument: Instrument,
    pub tempo_bpm: f32,
    pub period_sec: f32,
    pub phase: f32,
    pub confidence_global: f32,
    pub warmup_complete: bool,
    pub hits: Vec<PredictionHit>,
}

/// Full snapshot emitted by the predictor: always five entries, one per
/// channel, whether or not a channel has warmed up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub timestamp_sec: f32,
    pub frame_idx: u64,
    pub predictions: Vec<InstrumentPrediction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_with_wire_names() {
        let output = PredictionOutput {
            timestamp_sec: 1.5,
            frame_idx: 258,
            predictions: vec![InstrumentPrediction {
                instrument: Instrument::Kick,
                tempo_bpm: 120.0,
                period_sec: 0.5,
                phase: 0.25,
                confidence_global: 0.9,
                warmup_complete: true,
                hits: vec![PredictionHit {
                    t_pred_sec: 1.875,
                    ci_low_sec: 1.86,
                    ci_high_sec: 1.89,
                    confidence: 0.92,
                    hit_index: 1,
                }],
            }],
        };

        let json = serde_json::to_string(&output).unwrap();
        assert!(json.contains("\"timestamp_sec\""));
        assert!(json.contains("\"instrument\":\"kick\""));
        assert!(json.contains("\"warmup_complete\":true"));
        assert!(json.contains("\"t_pred_sec\""));
        assert!(json.contains("\"hit_index\":1"));
    }
}
