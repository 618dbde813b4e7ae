//! Instrument channel identity shared across the pipeline.
//!
//! The five channels are fixed: kick, snare, clap, closed hat, open
//! hat/crash. Everything downstream of the aggregator is indexed in this
//! order.

use serde::{Deserialize, Serialize};

/// Number of instrument channels in the pipeline.
pub const NUM_INSTRUMENTS: usize = 5;

/// Drum instrument channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Kick,
    Snare,
    Clap,
    /// Closed hi-hat.
    Chat,
    /// Open hat / crash.
    Ohc,
}

impl Instrument {
    /// All channels in pipeline order.
    pub const ALL: [Instrument; NUM_INSTRUMENTS] = [
        Instrument::Kick,
        Instrument::Snare,
        Instrument::Clap,
        Instrument::Chat,
        Instrument::Ohc,
    ];

    /// Channel index in the gate/energy vectors.
    pub fn index(self) -> usize {
        match self {
            Instrument::Kick => 0,
            Instrument::Snare => 1,
            Instrument::Clap => 2,
            Instrument::Chat => 3,
            Instrument::Ohc => 4,
        }
    }

    /// Resolve an index to a channel. Out-of-range indices fall back to
    /// kick rather than failing (configuration errors are never fatal).
    pub fn from_index(idx: usize) -> Instrument {
        *Instrument::ALL.get(idx).unwrap_or(&Instrument::Kick)
    }

    /// Wire name used in JSON payloads and log records.
    pub fn name(self) -> &'static str {
        match self {
            Instrument::Kick => "kick",
            Instrument::Snare => "snare",
            Instrument::Clap => "clap",
            Instrument::Chat => "chat",
            Instrument::Ohc => "ohc",
        }
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
