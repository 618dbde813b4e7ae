//! Event publisher: converts audio-relative prediction times to absolute
//! wall-clock times and pushes JSON events through a pluggable transport.
//!
//! The transport contract is a single fire-and-forget `publish` call;
//! failures are swallowed with a log note and never stall the pipeline.

use std::io::Write;
use std::net::TcpStream;
use std::sync::mpsc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::lighting::LightingCommand;

/// Outbound transport strategy. Implementations must not block the DSP
/// thread beyond a bounded, short write.
pub trait Transport: Send {
    fn publish(&mut self, payload: &[u8]);
}

/// Line-delimited JSON over TCP. Connects lazily, reconnects on the next
/// publish after a failure, and never blocks longer than the write timeout.
pub struct TcpLineTransport {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpLineTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
        }
    }

    fn ensure_connected(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        match TcpStream::connect(&self.addr) {
            Ok(stream) => {
                let _ = stream.set_write_timeout(Some(Duration::from_millis(5)));
                let _ = stream.set_nodelay(true);
                log::info!("[Publish] connected to {}", self.addr);
                self.stream = Some(stream);
                true
            }
            Err(err) => {
                log::warn!("[Publish] connect to {} failed: {}", self.addr, err);
                false
            }
        }
    }
}

impl Transport for TcpLineTransport {
    fn publish(&mut self, payload: &[u8]) {
        if !self.ensure_connected() {
            return;
        }
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let failed = stream.write_all(payload).is_err() || stream.write_all(b"\n").is_err();
        if failed {
            log::warn!("[Publish] write to {} failed, dropping connection", self.addr);
            self.stream = None;
        }
    }
}

/// Discards every payload; stands in when publishing is disabled so the
/// graph's sink still drains.
pub struct NullTransport;

impl Transport for NullTransport {
    fn publish(&mut self, _payload: &[u8]) {}
}

/// In-process transport over a std channel; used by tests and embedders.
pub struct ChannelTransport {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn publish(&mut self, payload: &[u8]) {
        let _ = self.tx.send(payload.to_vec());
    }
}

/// Wire format of one scheduled lighting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub unix_time: i64,
    /// Always in [0, 1_000_000).
    pub microseconds: i64,
    pub confidence: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub event_id: String,
}

/// Wall-clock origin captured at startup; audio time 0 maps onto it.
#[derive(Debug, Clone, Copy)]
pub struct StartClock {
    start_unix_sec: i64,
    start_micros: i64,
}

impl StartClock {
    /// Capture the current wall clock as the audio-time origin.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self {
            start_unix_sec: since_epoch.as_secs() as i64,
            start_micros: since_epoch.subsec_micros() as i64,
        }
    }

    /// Explicit origin, for tests and replay.
    pub fn with_origin(start_unix_sec: i64, start_micros: i64) -> Self {
        Self {
            start_unix_sec,
            start_micros,
        }
    }

    /// Convert an audio-relative time to absolute (seconds, microseconds).
    ///
    /// Seconds and microseconds are carried separately so large Unix
    /// timestamps never meet f32 precision. Microseconds are normalized
    /// into [0, 1_000_000).
    pub fn to_absolute(&self, t_pred_sec: f32) -> (i64, i64) {
        let t = t_pred_sec as f64;
        let pred_seconds = t.floor() as i64;
        let pred_micros = ((t - t.floor()) * 1_000_000.0).round() as i64;

        let mut unix_time = self.start_unix_sec + pred_seconds;
        let mut micros = self.start_micros + pred_micros;

        if micros >= 1_000_000 {
            unix_time += micros / 1_000_000;
            micros %= 1_000_000;
        }
        if micros < 0 {
            let borrow = (-micros + 999_999) / 1_000_000;
            unix_time -= borrow;
            micros += borrow * 1_000_000;
        }
        (unix_time, micros)
    }
}

/// Converts accepted lighting commands into wire events and publishes them.
pub struct EventPublisher {
    clock: StartClock,
    transport: Box<dyn Transport>,
}

impl EventPublisher {
    pub fn new(clock: StartClock, transport: Box<dyn Transport>) -> Self {
        Self { clock, transport }
    }

    pub fn publish_command(&mut self, command: &LightingCommand) {
        let (unix_time, microseconds) = self.clock.to_absolute(command.t_pred_sec);
        let message = EventMessage {
            unix_time,
            microseconds,
            confidence: command.confidence,
            r: command.r,
            g: command.g,
            b: command.b,
            event_id: command.event_id.clone(),
        };
        match serde_json::to_vec(&message) {
            Ok(payload) => self.transport.publish(&payload),
            Err(err) => log::error!("[Publish] failed to serialize event: {}", err),
        }
    }
}
