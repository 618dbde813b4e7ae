// Lock-free hop-buffer pool with dual SPSC queues.
//
// The feeder thread and the DSP thread exchange fixed-size hop buffers
// through two rtrb ring buffers, so no allocation happens after startup:
//
// - DATA queue: feeder pushes filled hop buffers, DSP consumes
// - POOL queue: DSP returns drained buffers, feeder recycles
//
// If the pool is empty (DSP falling behind) the feeder drops the hop.

use rtrb::{Consumer, Producer, RingBuffer};

pub const DEFAULT_BUFFER_COUNT: usize = 16;

/// A hop's worth of samples.
pub type HopBuffer = Vec<f32>;

/// Split channels for the feeder/DSP buffer exchange.
pub struct BufferPoolChannels {
    /// Feeder side: push filled hops to the DSP thread.
    pub data_producer: Producer<HopBuffer>,
    /// DSP side: receive filled hops.
    pub data_consumer: Consumer<HopBuffer>,
    /// DSP side: return drained buffers.
    pub pool_producer: Producer<HopBuffer>,
    /// Feeder side: fetch empty buffers to fill.
    pub pool_consumer: Consumer<HopBuffer>,
}

/// Feeder-owned halves.
pub struct FeederChannels {
    pub data_producer: Producer<HopBuffer>,
    pub pool_consumer: Consumer<HopBuffer>,
}

/// DSP-owned halves.
pub struct DspChannels {
    pub data_consumer: Consumer<HopBuffer>,
    pub pool_producer: Producer<HopBuffer>,
}

pub struct BufferPool;

impl BufferPool {
    /// Pre-allocate `buffer_count` buffers of `hop_size` samples each and
    /// seed the pool queue with all of them.
    ///
    /// # Panics
    /// Panics if either argument is zero.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(buffer_count: usize, hop_size: usize) -> BufferPoolChannels {
        assert!(buffer_count > 0, "buffer_count must be greater than 0");
        assert!(hop_size > 0, "hop_size must be greater than 0");

        let (mut pool_producer, pool_consumer) = RingBuffer::new(buffer_count);
        let (data_producer, data_consumer) = RingBuffer::new(buffer_count);

        for _ in 0..buffer_count {
            pool_producer
                .push(vec![0.0f32; hop_size])
                .expect("pool queue sized for all buffers");
        }

        BufferPoolChannels {
            data_producer,
            data_consumer,
            pool_producer,
            pool_consumer,
        }
    }
}

impl BufferPoolChannels {
    /// Split into the halves each thread owns.
    pub fn split_for_threads(self) -> (FeederChannels, DspChannels) {
        (
            FeederChannels {
                data_producer: self.data_producer,
                pool_consumer: self.pool_consumer,
            },
            DspChannels {
                data_consumer: self.data_consumer,
                pool_producer: self.pool_producer,
            },
        )
    }
}
