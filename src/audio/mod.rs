//! Audio ingress: capture callback, lock-free sample ring, hop feeder.

pub mod buffer_pool;
pub mod capture;
pub mod feeder;
pub mod ring;

pub use buffer_pool::{BufferPool, BufferPoolChannels};
pub use capture::CaptureHandle;
pub use ring::{ring, RingConsumer, RingProducer};
