//! Runtime configuration loaded from a JSON file.
//!
//! Every section falls back to tuned defaults when the file is missing or
//! invalid, so the pipeline always starts. The defaults match the values
//! the live rig was tuned with.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::instrument::NUM_INSTRUMENTS;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub aggregator: AggregatorConfig,
    pub gates: GateBankConfig,
    pub predictor: PredictorConfig,
    pub lighting: LightingConfig,
    pub publisher: PublisherConfig,
    pub logging: LoggingConfig,
}

/// Audio front-end parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// FFT frame size in samples.
    pub frame_size: usize,
    /// Hop size between frames in samples.
    pub hop_size: usize,
    /// Capture ring capacity in seconds of audio (sample-count sized).
    pub ring_seconds: u32,
    /// Input device is selected by name substring match.
    pub device_substring: String,
    /// Hops with RMS below this are skipped by the feeder.
    pub silence_rms_threshold: f32,
    /// Number of mel bands produced by the filterbank.
    pub mel_bands: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_size: 1024,
            hop_size: 256,
            ring_seconds: 5,
            device_substring: "BlackHole".to_string(),
            silence_rms_threshold: 1e-3,
            mel_bands: 64,
        }
    }
}

/// Instrument aggregator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Fraction of each lobe's span used for the Hann rolloff edge.
    pub lobe_rolloff: f32,
    /// Expected mel band count; the weight matrix rebuilds if the actual
    /// count differs.
    pub expected_bands: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            lobe_rolloff: 0.15,
            expected_bands: 64,
        }
    }
}

/// Onset detection method for a gate channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMethod {
    /// Positive energy delta (high frequency content style).
    Hfc,
    /// Positive energy delta (spectral flux style).
    Flux,
    /// Raw energy as novelty.
    Rms,
    /// Positive energy delta.
    Default,
    /// P² online-quantile arm/fire gate.
    Quantile,
}

/// Per-channel adaptive onset gate parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub method: GateMethod,
    /// MAD multiplier for the dynamic threshold; also the fallback
    /// threshold before enough history has accumulated.
    pub threshold: f32,
    /// Minimum frame gap enforced after a detection.
    pub refractory: u32,
    /// Frames before detection is enabled.
    pub warmup: u32,
    /// Accepted for compatibility; reserved, not consumed by detection.
    pub sensitivity: f32,
    /// Moving-average window over the novelty signal.
    pub smooth_window: usize,
    /// History window for the median/MAD threshold.
    pub odf_window: usize,
    /// Arm quantile for the quantile gate variant.
    pub q_hi: f64,
    /// Fire quantile for the quantile gate variant.
    pub q_lo: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            method: GateMethod::Hfc,
            threshold: 1.5,
            refractory: 4,
            warmup: 8,
            sensitivity: 1.6,
            smooth_window: 2,
            odf_window: 64,
            q_hi: 0.98,
            q_lo: 0.80,
        }
    }
}

/// The five per-instrument gate configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateBankConfig {
    pub kick: GateConfig,
    pub snare: GateConfig,
    pub clap: GateConfig,
    pub chat: GateConfig,
    pub ohc: GateConfig,
}

impl GateBankConfig {
    /// Gate configs in channel order.
    pub fn per_channel(&self) -> [&GateConfig; NUM_INSTRUMENTS] {
        [&self.kick, &self.snare, &self.clap, &self.chat, &self.ohc]
    }
}

impl Default for GateBankConfig {
    fn default() -> Self {
        Self {
            kick: GateConfig {
                method: GateMethod::Hfc,
                threshold: 1.6,
                refractory: 30,
                odf_window: 64,
                sensitivity: 2.0,
                ..GateConfig::default()
            },
            snare: GateConfig {
                method: GateMethod::Flux,
                threshold: 1.4,
                refractory: 4,
                odf_window: 64,
                sensitivity: 1.8,
                ..GateConfig::default()
            },
            clap: GateConfig {
                method: GateMethod::Flux,
                threshold: 1.4,
                refractory: 3,
                odf_window: 48,
                sensitivity: 1.8,
                ..GateConfig::default()
            },
            chat: GateConfig {
                method: GateMethod::Hfc,
                threshold: 1.6,
                refractory: 3,
                odf_window: 48,
                sensitivity: 1.6,
                ..GateConfig::default()
            },
            ohc: GateConfig {
                method: GateMethod::Hfc,
                threshold: 1.5,
                refractory: 4,
                odf_window: 64,
                sensitivity: 1.6,
                ..GateConfig::default()
            },
        }
    }
}

/// Kalman/PLL tempo tracker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Hits required before a channel seeds its Kalman state.
    pub min_hits_for_seed: usize,
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// How far ahead of current time a hit may be projected, in seconds.
    pub horizon_seconds: f32,
    /// Maximum projected hits per channel per snapshot.
    pub max_predictions_per_instrument: usize,
    /// Projected hits below this confidence are dropped.
    pub confidence_threshold_min: f32,
    /// Heartbeat interval for snapshot emission when no hits occur.
    pub periodic_interval_sec: f32,
    /// Process noise on period per second.
    pub q_period: f32,
    /// Process noise on phase per second.
    pub q_phase: f32,
    /// Measurement noise base; scaled up by IOI jitter.
    pub r_base: f32,
    /// Recency confidence decay rate in periods.
    pub confidence_decay_rate: f32,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            min_hits_for_seed: 8,
            min_bpm: 60.0,
            max_bpm: 200.0,
            horizon_seconds: 2.0,
            max_predictions_per_instrument: 2,
            confidence_threshold_min: 0.3,
            periodic_interval_sec: 0.15,
            q_period: 1e-6,
            q_phase: 1e-8,
            r_base: 1e-4,
            confidence_decay_rate: 0.1,
        }
    }
}

/// Lighting command filter parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// Minimum prediction confidence to emit a command.
    pub confidence_threshold: f32,
    /// Commands closer than this to current time are dropped.
    pub min_latency_sec: f32,
    /// Commands further ahead than this are dropped.
    pub max_latency_sec: f32,
    /// Time radius within which a repeated event id is collapsed.
    pub duplicate_window_sec: f32,
    /// Channels allowed into the outgoing command stream. All channels
    /// always participate in dedup bookkeeping.
    pub enabled_instruments: Vec<crate::instrument::Instrument>,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            min_latency_sec: 0.05,
            max_latency_sec: 2.0,
            duplicate_window_sec: 0.1,
            enabled_instruments: vec![crate::instrument::Instrument::Kick],
        }
    }
}

/// Outbound event transport parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// host:port for the line-delimited TCP transport.
    pub endpoint: String,
    /// Optional endpoint for full prediction telemetry snapshots.
    pub telemetry_endpoint: String,
    pub enabled: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:5556".to_string(),
            telemetry_endpoint: String::new(),
            enabled: true,
        }
    }
}

/// Hit/prediction log sink parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    pub enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            enabled: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file is missing or malformed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_pipeline() {
        let config = AppConfig::default();
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.audio.frame_size, 1024);
        assert_eq!(config.audio.hop_size, 256);
        assert_eq!(config.audio.mel_bands, 64);
        assert_eq!(config.gates.kick.refractory, 30);
        assert_eq!(config.gates.clap.odf_window, 48);
        assert_eq!(config.predictor.min_hits_for_seed, 8);
        assert_eq!(config.predictor.max_predictions_per_instrument, 2);
        assert!((config.lighting.duplicate_window_sec - 0.1).abs() < 1e-6);
        assert!((config.lighting.confidence_threshold - 0.3).abs() < 1e-6);
    }

    #[test]
    fn json_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.audio.sample_rate, config.audio.sample_rate);
        assert_eq!(parsed.gates.snare.method, GateMethod::Flux);
        assert_eq!(
            parsed.predictor.min_hits_for_seed,
            config.predictor.min_hits_for_seed
        );
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"audio": {"sample_rate": 48000}}"#).unwrap();
        assert_eq!(parsed.audio.sample_rate, 48000);
        // Untouched sections keep their defaults.
        assert_eq!(parsed.audio.frame_size, 1024);
        assert_eq!(parsed.predictor.min_hits_for_seed, 8);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/hitlight.json");
        assert_eq!(config.audio.sample_rate, 44100);
    }
}
