// hitlight - real-time percussive event detection and predictive lighting
//
// Audio comes in through a lock-free ring, flows through a streaming DSP
// graph (frames -> spectrum -> mel bands -> instrument energies -> onset
// gates), feeds per-instrument Kalman/PLL tempo trackers, and leaves as
// lighting commands scheduled at absolute wall-clock times.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod instrument;
pub mod lighting;
pub mod logger;
pub mod pipeline;
pub mod predict;
pub mod publish;
pub mod snapshot;
pub mod testing;

pub use config::AppConfig;
pub use engine::Engine;
pub use error::AudioError;
pub use instrument::{Instrument, NUM_INSTRUMENTS};
