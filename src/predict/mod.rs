//! Per-instrument tempo/phase tracking and hit projection.

pub mod predictor;
pub mod state;
pub mod types;

pub use predictor::InstrumentPredictor;
pub use state::InstrumentState;
pub use types::{InstrumentPrediction, PredictionHit, PredictionOutput};
