// Error types for the hitlight pipeline
//
// Only startup-time collaborator unavailability is fatal; everything
// downstream of the capture boundary logs and continues.

use std::fmt;

/// Audio capture and engine lifecycle errors.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// No input device matching the configured name substring was found.
    DeviceNotFound { substring: String },

    /// Failed to open the capture stream.
    StreamOpenFailed { reason: String },

    /// Hardware-level failure while starting or running the stream.
    HardwareError { details: String },

    /// The device reports a sample format the pipeline cannot consume.
    UnsupportedFormat { format: String },
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::DeviceNotFound { substring } => {
                write!(f, "no input device matching '{}' found", substring)
            }
            AudioError::StreamOpenFailed { reason } => {
                write!(f, "failed to open audio stream: {}", reason)
            }
            AudioError::HardwareError { details } => {
                write!(f, "audio hardware error: {}", details)
            }
            AudioError::UnsupportedFormat { format } => {
                write!(f, "unsupported sample format: {}", format)
            }
        }
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::HardwareError {
            details: err.to_string(),
        }
    }
}
