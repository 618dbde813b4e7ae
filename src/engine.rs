//! Composition root: owns the capture, feeder, and DSP threads and the
//! shutdown sequence.
//!
//! Thread layout:
//! - capture thread (cpal callback) pushes samples into the lock-free ring
//! - feeder thread pops exact hops, skips silence, hands hop buffers to
//!   the DSP thread through the buffer pool
//! - DSP thread runs the streaming graph to completion
//!
//! Shutdown flips one atomic flag, joins the feeder, tears down capture,
//! then waits a bounded two seconds for the DSP thread before detaching.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer_pool::{BufferPool, DEFAULT_BUFFER_COUNT};
use crate::audio::capture::{start_capture, CaptureHandle};
use crate::audio::feeder::spawn_feeder;
use crate::audio::ring;
use crate::config::AppConfig;
use crate::error::AudioError;
use crate::logger::HitLogger;
use crate::pipeline::build_graph;
use crate::publish::{StartClock, TcpLineTransport, Transport};
use crate::snapshot::FramePool;

/// Bounded wait for the DSP thread at shutdown.
const DSP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Engine {
    shutdown: Arc<AtomicBool>,
    capture: Option<CaptureHandle>,
    feeder: Option<JoinHandle<()>>,
    dsp: Option<JoinHandle<()>>,
    pool_rx: mpsc::Receiver<FramePool>,
}

impl Engine {
    /// Start the full pipeline. Fails only on capture startup problems;
    /// everything downstream degrades gracefully instead.
    pub fn start(config: AppConfig) -> Result<Engine, AudioError> {
        let shutdown = Arc::new(AtomicBool::new(false));

        let ring_capacity = (config.audio.sample_rate * config.audio.ring_seconds) as usize;
        let (ring_producer, ring_consumer) = ring::ring(ring_capacity);

        // Capture first: a missing device is fatal before any thread spins.
        let capture = start_capture(&config.audio, ring_producer, Arc::clone(&shutdown))?;
        let sample_rate = capture.sample_rate as f32;
        let clock = StartClock::now();

        let (feeder_channels, dsp_channels) =
            BufferPool::new(DEFAULT_BUFFER_COUNT, config.audio.hop_size).split_for_threads();

        let feeder = spawn_feeder(
            ring_consumer,
            feeder_channels,
            config.audio.hop_size,
            config.audio.silence_rms_threshold,
            Arc::clone(&shutdown),
        );

        let logger = if config.logging.enabled {
            Arc::new(HitLogger::new(
                sample_rate,
                config.audio.hop_size,
                &config.logging.dir,
            ))
        } else {
            Arc::new(HitLogger::disabled())
        };

        let event_transport: Option<Box<dyn Transport>> = if config.publisher.enabled {
            Some(Box::new(TcpLineTransport::new(
                config.publisher.endpoint.clone(),
            )))
        } else {
            None
        };
        let telemetry_transport: Option<Box<dyn Transport>> =
            if config.publisher.enabled && !config.publisher.telemetry_endpoint.is_empty() {
                Some(Box::new(TcpLineTransport::new(
                    config.publisher.telemetry_endpoint.clone(),
                )))
            } else {
                None
            };

        let (pool_tx, pool_rx) = mpsc::channel();
        let dsp_shutdown = Arc::clone(&shutdown);
        let dsp_config = config.clone();

        let dsp = thread::Builder::new()
            .name("hitlight-dsp".to_string())
            .spawn(move || {
                let mut built = build_graph(
                    &dsp_config,
                    sample_rate,
                    dsp_channels,
                    dsp_shutdown,
                    logger,
                    clock,
                    event_transport,
                    telemetry_transport,
                );

                loop {
                    let outcome = built.graph.run_cycle();
                    if outcome.finished {
                        break;
                    }
                    if !outcome.progressed {
                        // Source starved; wait for the feeder.
                        thread::sleep(Duration::from_millis(1));
                    }
                }

                log::info!(
                    "[Engine] DSP drained after {} frames",
                    built.graph.frame_idx()
                );
                let pool = std::mem::take(&mut *built.pool.borrow_mut());
                let _ = pool_tx.send(pool);
            })
            .map_err(|e| AudioError::HardwareError {
                details: format!("failed to spawn DSP thread: {}", e),
            })?;

        Ok(Engine {
            shutdown,
            capture: Some(capture),
            feeder: Some(feeder),
            dsp: Some(dsp),
            pool_rx,
        })
    }

    /// Stop all threads and return the pooled frame series for the
    /// snapshot. The DSP thread gets a bounded join; on timeout it is
    /// detached and an empty pool returned.
    pub fn stop(mut self) -> FramePool {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
            log::info!("[Engine] feeder stopped");
        }

        if let Some(capture) = self.capture.take() {
            capture.stop();
        }

        match self.pool_rx.recv_timeout(DSP_JOIN_TIMEOUT) {
            Ok(pool) => {
                if let Some(dsp) = self.dsp.take() {
                    let _ = dsp.join();
                }
                log::info!("[Engine] DSP stopped");
                pool
            }
            Err(_) => {
                log::warn!("[Engine] DSP did not stop within timeout, detaching");
                // The detached thread exits once it observes the flag.
                self.dsp.take();
                FramePool::new()
            }
        }
    }
}
