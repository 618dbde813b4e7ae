// Feeder thread: pops exact-size hops from the sample ring, skips silent
// hops by a cheap RMS check, and hands hop buffers to the DSP thread
// through the lock-free pool.
//
// The first few hops are always forwarded so the spectral front end primes
// even on a quiet input.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer_pool::FeederChannels;
use crate::audio::ring::RingConsumer;

/// Hops always forwarded at startup regardless of level.
const PRIME_HOPS: u64 = 10;

pub fn spawn_feeder(
    ring: RingConsumer,
    mut channels: FeederChannels,
    hop_size: usize,
    silence_rms_threshold: f32,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("hitlight-feeder".to_string())
        .spawn(move || {
            let mut chunk = vec![0.0f32; hop_size];
            let mut hops_forwarded: u64 = 0;
            let mut no_data_count: u64 = 0;

            while !shutdown.load(Ordering::Relaxed) {
                if !ring.pop(&mut chunk) {
                    // Underrun: wait for the capture side.
                    no_data_count += 1;
                    if no_data_count % 1000 == 0 {
                        log::debug!("[Feeder] no data for {} iterations", no_data_count);
                    }
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                no_data_count = 0;

                let rms =
                    (chunk.iter().map(|x| x * x).sum::<f32>() / hop_size as f32).sqrt();
                if rms <= silence_rms_threshold && hops_forwarded >= PRIME_HOPS {
                    continue;
                }

                match channels.pool_consumer.pop() {
                    Ok(mut buffer) => {
                        buffer.copy_from_slice(&chunk);
                        if channels.data_producer.push(buffer).is_err() {
                            // Data queue full: DSP is behind, drop the hop.
                            log::debug!("[Feeder] data queue full, dropping hop");
                        }
                        hops_forwarded += 1;
                    }
                    Err(_) => {
                        // Pool exhausted: DSP is behind, drop the hop.
                        log::debug!("[Feeder] buffer pool exhausted, dropping hop");
                    }
                }
            }
            log::info!(
                "[Feeder] stopping after forwarding {} hops ({} samples dropped on overrun)",
                hops_forwarded,
                ring.overrun_count()
            );
        })
        .expect("failed to spawn feeder thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer_pool::BufferPool;
    use crate::audio::ring;

    #[test]
    fn forwards_hops_and_stops_on_shutdown() {
        let (producer, consumer) = ring::ring(4096);
        let (feeder_channels, mut dsp) = BufferPool::new(8, 256).split_for_threads();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = spawn_feeder(
            consumer,
            feeder_channels,
            256,
            1e-3,
            Arc::clone(&shutdown),
        );

        // Loud hops must come through.
        producer.push(&vec![0.5f32; 1024]);

        let mut got = 0;
        for _ in 0..200 {
            while let Ok(buffer) = dsp.data_consumer.pop() {
                assert_eq!(buffer.len(), 256);
                got += 1;
                let _ = dsp.pool_producer.push(buffer);
            }
            if got >= 4 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(got, 4, "1024 pushed samples should yield 4 hops");

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
