//! cpal capture backend.
//!
//! The input device is selected by name substring (a loopback device like
//! "BlackHole" on a typical rig). Since cpal's `Stream` is not Send+Sync,
//! a dedicated thread owns the stream and parks until shutdown; the stream
//! callback does nothing but downmix to mono and push into the sample ring.
//!
//! A missing device is the one fatal startup error in the pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

use crate::audio::ring::RingProducer;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Handle to the running capture thread.
pub struct CaptureHandle {
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    /// Sample rate the device actually opened with.
    pub sample_rate: u32,
}

impl CaptureHandle {
    /// Signal the capture thread and wait for the stream to tear down.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            log::info!("[Capture] Stream thread stopped");
        }
    }
}

/// Locate the first input device whose name contains `substring`. An empty
/// substring selects the default input device.
fn find_input_device(host: &cpal::Host, substring: &str) -> Result<cpal::Device, AudioError> {
    if substring.is_empty() {
        return host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound {
                substring: "<default>".to_string(),
            });
    }

    let devices = host.input_devices().map_err(|e| AudioError::HardwareError {
        details: format!("failed to enumerate input devices: {}", e),
    })?;

    for device in devices {
        if let Ok(name) = device.name() {
            if name.contains(substring) {
                log::info!("[Capture] Using input device: {}", name);
                return Ok(device);
            }
        }
    }

    Err(AudioError::DeviceNotFound {
        substring: substring.to_string(),
    })
}

/// Downmix an interleaved block to mono and push it into the ring.
/// Overruns drop silently inside the ring (counted there).
fn push_block(producer: &RingProducer, scratch: &mut Vec<f32>, data: &[f32], channels: usize) {
    if channels <= 1 {
        producer.push(data);
        return;
    }
    scratch.clear();
    scratch.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
    producer.push(scratch);
}

/// Start the capture thread. Returns once the stream is running (or failed
/// to open), with the device's actual sample rate in the handle.
pub fn start_capture(
    config: &AudioConfig,
    producer: RingProducer,
    shutdown: Arc<AtomicBool>,
) -> Result<CaptureHandle, AudioError> {
    let substring = config.device_substring.clone();
    let requested_rate = config.sample_rate;
    let shutdown_thread = Arc::clone(&shutdown);

    // The stream thread reports startup success/failure back over a channel.
    let (startup_tx, startup_rx) = mpsc::channel::<Result<u32, AudioError>>();

    let handle = thread::spawn(move || {
        let host = cpal::default_host();
        let device = match find_input_device(&host, &substring) {
            Ok(d) => d,
            Err(e) => {
                let _ = startup_tx.send(Err(e));
                return;
            }
        };

        let supported = match device.default_input_config() {
            Ok(c) => c,
            Err(e) => {
                let _ = startup_tx.send(Err(AudioError::StreamOpenFailed {
                    reason: format!("failed to query input config: {}", e),
                }));
                return;
            }
        };

        let channels = supported.channels() as usize;
        let sample_rate = supported.sample_rate().0;
        if sample_rate != requested_rate {
            log::warn!(
                "[Capture] Device runs at {} Hz (configured {} Hz); using device rate",
                sample_rate,
                requested_rate
            );
        }

        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = |err| log::error!("[Capture] Stream error: {}", err);
        let mut scratch: Vec<f32> = Vec::with_capacity(4096);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    push_block(&producer, &mut scratch, data, channels);
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    if channels <= 1 {
                        scratch.extend(data.iter().map(|&s| s as f32 / 32768.0));
                    } else {
                        scratch.extend(data.chunks(channels).map(|frame| {
                            frame.iter().map(|&s| s as f32 / 32768.0).sum::<f32>()
                                / channels as f32
                        }));
                    }
                    producer.push(&scratch);
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &stream_config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    if channels <= 1 {
                        scratch.extend(data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0));
                    } else {
                        scratch.extend(data.chunks(channels).map(|frame| {
                            frame
                                .iter()
                                .map(|&s| (s as f32 - 32768.0) / 32768.0)
                                .sum::<f32>()
                                / channels as f32
                        }));
                    }
                    producer.push(&scratch);
                },
                err_fn,
                None,
            ),
            other => {
                let _ = startup_tx.send(Err(AudioError::UnsupportedFormat {
                    format: format!("{:?}", other),
                }));
                return;
            }
        };

        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                let _ = startup_tx.send(Err(AudioError::StreamOpenFailed {
                    reason: format!("failed to build input stream: {}", e),
                }));
                return;
            }
        };

        if let Err(e) = stream.play() {
            let _ = startup_tx.send(Err(AudioError::HardwareError {
                details: format!("failed to start stream: {}", e),
            }));
            return;
        }

        log::info!("[Capture] Audio stream started at {} Hz", sample_rate);
        let _ = startup_tx.send(Ok(sample_rate));

        // The stream lives in this thread's scope until shutdown.
        while !shutdown_thread.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(50));
        }
        log::info!("[Capture] Stream thread exiting");
    });

    match startup_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(Ok(sample_rate)) => Ok(CaptureHandle {
            thread: Some(handle),
            shutdown,
            sample_rate,
        }),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => Err(AudioError::HardwareError {
            details: "timeout waiting for audio stream to start".to_string(),
        }),
    }
}
