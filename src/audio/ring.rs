// Lock-free SPSC sample ring between the capture callback and the feeder.
//
// One slot stays permanently reserved to distinguish full from empty, so
// usable capacity is `capacity - 1`. The producer release-stores `head`
// only after copying samples in; the consumer release-stores `tail` only
// after copying samples out; each side acquire-loads the opposing index.
// No other synchronization.
//
// Overrun (producer finds the ring full) is silent data loss: the samples
// that do not fit are dropped and counted. Underrun (consumer finds too
// little data) returns false without mutating; the caller sleeps briefly
// and retries.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

struct RingInner {
    // Cells rather than one big buffer so neither side ever forms a
    // reference covering slots the other side owns.
    buf: Box<[UnsafeCell<f32>]>,
    cap: usize,
    /// Write index, owned by the producer.
    head: AtomicUsize,
    /// Read index, owned by the consumer.
    tail: AtomicUsize,
    overruns: AtomicU64,
}

// The producer only writes slots in [head, tail-1) and the consumer only
// reads slots in [tail, head); the acquire/release pairing on the indices
// orders the sample copies.
unsafe impl Sync for RingInner {}
unsafe impl Send for RingInner {}

/// Producer half of the sample ring. Held by the capture callback.
pub struct RingProducer {
    inner: Arc<RingInner>,
}

/// Consumer half of the sample ring. Held by the feeder thread.
pub struct RingConsumer {
    inner: Arc<RingInner>,
}

/// Create a sample ring with the given capacity in samples.
///
/// Usable capacity is `capacity - 1`.
pub fn ring(capacity: usize) -> (RingProducer, RingConsumer) {
    assert!(capacity >= 2, "ring capacity must be at least 2 samples");
    let inner = Arc::new(RingInner {
        buf: (0..capacity).map(|_| UnsafeCell::new(0.0f32)).collect(),
        cap: capacity,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        overruns: AtomicU64::new(0),
    });
    (
        RingProducer {
            inner: Arc::clone(&inner),
        },
        RingConsumer { inner },
    )
}

impl RingProducer {
    /// Write up to `free - 1` samples; returns the number written. Never
    /// blocks. Samples that do not fit are dropped and counted as overrun.
    pub fn push(&self, samples: &[f32]) -> usize {
        let inner = &*self.inner;
        let cap = inner.cap;
        let mut written = 0;

        while written < samples.len() {
            let h = inner.head.load(Ordering::Relaxed);
            let t = inner.tail.load(Ordering::Acquire);
            let free = (t + cap - h - 1) % cap;
            if free == 0 {
                break;
            }
            let to_write = free.min(samples.len() - written);
            let idx = h % cap;
            let chunk = to_write.min(cap - idx);

            // Safety: only this producer writes, and the slots [idx, idx+chunk)
            // are free per the index arithmetic above. UnsafeCell is
            // repr(transparent) over f32.
            unsafe {
                let base = inner.buf.as_ptr() as *mut f32;
                std::ptr::copy_nonoverlapping(samples.as_ptr().add(written), base.add(idx), chunk);
            }
            inner.head.store((h + chunk) % cap, Ordering::Release);
            written += chunk;
        }

        let dropped = samples.len() - written;
        if dropped > 0 {
            inner.overruns.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        written
    }

    /// Total samples dropped on overrun since creation.
    pub fn overrun_count(&self) -> u64 {
        self.inner.overruns.load(Ordering::Relaxed)
    }
}

impl RingConsumer {
    /// Pop exactly `out.len()` samples if available. Returns false without
    /// mutating when fewer samples are buffered.
    pub fn pop(&self, out: &mut [f32]) -> bool {
        let inner = &*self.inner;
        let cap = inner.cap;
        let n = out.len();

        let t = inner.tail.load(Ordering::Relaxed);
        let h = inner.head.load(Ordering::Acquire);
        let available = (h + cap - t) % cap;
        if available < n {
            return false;
        }

        let idx = t % cap;
        let chunk = n.min(cap - idx);
        // Safety: only this consumer reads, and [t, t+n) holds published
        // samples per the acquire load of head above.
        unsafe {
            let base = inner.buf.as_ptr() as *const f32;
            std::ptr::copy_nonoverlapping(base.add(idx), out.as_mut_ptr(), chunk);
            if n > chunk {
                std::ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(chunk), n - chunk);
            }
        }
        inner.tail.store((t + n) % cap, Ordering::Release);
        true
    }

    /// Samples currently buffered.
    pub fn available(&self) -> usize {
        let inner = &*self.inner;
        let t = inner.tail.load(Ordering::Relaxed);
        let h = inner.head.load(Ordering::Acquire);
        (h + inner.cap - t) % inner.cap
    }

    /// Total samples dropped on overrun since creation.
    pub fn overrun_count(&self) -> u64 {
        self.inner.overruns.load(Ordering::Relaxed)
    }
}
