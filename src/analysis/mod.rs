//! Streaming DSP: spectral front end, mel bands, instrument aggregation,
//! and the per-channel onset gates.

pub mod aggregator;
pub mod melbands;
pub mod onset_gate;
pub mod quantile_gate;
pub mod spectrum;

pub use aggregator::InstrumentAggregator;
pub use melbands::MelFilterBank;
pub use onset_gate::OnsetGate;
pub use quantile_gate::QuantileGate;
pub use spectrum::{FrameCutter, SpectrumAnalyzer};

/// Per-frame binary hit decision on a scalar novelty stream.
///
/// Implemented by the adaptive onset gate and the P² quantile gate; the
/// gate bank picks the variant per channel from configuration.
pub trait NoveltyGate: Send {
    /// Consume one frame's channel energy, return 1.0 on a detected hit.
    fn step(&mut self, energy: f32) -> f32;
}
