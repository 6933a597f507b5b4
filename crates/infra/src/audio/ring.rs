//! Lock-free SPSC ring buffer for real-time audio transport
//!
//! One ring connects exactly one producer thread (a device callback or the
//! engine) to exactly one consumer thread, forever. The two halves are
//! created as a pair and moved to their owning threads; neither half locks,
//! allocates or calls into the other side.
//!
//! Indices are monotonic and cache-padded to keep the producer's and
//! consumer's cache lines apart. Capacity is a power of two so the wrap is
//! a mask, and occupancy is simply `write - read` (wrapping).

use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct RingShared {
    buffer: Box<[UnsafeCell<f32>]>,
    mask: usize,
    /// Total samples ever written; owned by the producer, read by the consumer
    write_pos: CachePadded<AtomicUsize>,
    /// Total samples ever read; owned by the consumer, read by the producer
    read_pos: CachePadded<AtomicUsize>,
}

// The buffer cells are only ever written by the producer in the region it
// owns (between the consumer's read index and its own write index) and only
// read by the consumer in the region the producer has published with a
// release store. That protocol is what makes the UnsafeCell access sound.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

impl RingShared {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

/// Create a ring with at least `capacity` samples (rounded up to a power of
/// two), returning the producer and consumer halves.
pub fn spsc_ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let capacity = capacity.max(2).next_power_of_two();
    let buffer = (0..capacity)
        .map(|_| UnsafeCell::new(0.0f32))
        .collect::<Vec<_>>()
        .into_boxed_slice();

    let shared = Arc::new(RingShared {
        buffer,
        mask: capacity - 1,
        write_pos: CachePadded::new(AtomicUsize::new(0)),
        read_pos: CachePadded::new(AtomicUsize::new(0)),
    });

    (
        RingProducer {
            shared: Arc::clone(&shared),
        },
        RingConsumer { shared },
    )
}

/// Writing half of the ring
pub struct RingProducer {
    shared: Arc<RingShared>,
}

impl RingProducer {
    /// Copy up to `min(samples.len(), free space)` samples in and return the
    /// count. A short write is an overrun: the caller counts it and drops
    /// the rest rather than ever blocking.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let write_pos = self.shared.write_pos.load(Ordering::Relaxed);
        let read_pos = self.shared.read_pos.load(Ordering::Acquire);

        let free = self.shared.capacity() - write_pos.wrapping_sub(read_pos);
        let to_write = samples.len().min(free);

        for (i, &sample) in samples[..to_write].iter().enumerate() {
            let pos = write_pos.wrapping_add(i) & self.shared.mask;
            // SAFETY: slots in [write, read + capacity) belong to the producer
            unsafe {
                *self.shared.buffer[pos].get() = sample;
            }
        }

        // Publish: samples must be visible before the index moves
        self.shared
            .write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);

        to_write
    }

    /// Samples that could be written right now
    pub fn free(&self) -> usize {
        let write_pos = self.shared.write_pos.load(Ordering::Relaxed);
        let read_pos = self.shared.read_pos.load(Ordering::Acquire);
        self.shared.capacity() - write_pos.wrapping_sub(read_pos)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

/// Reading half of the ring
pub struct RingConsumer {
    shared: Arc<RingShared>,
}

impl RingConsumer {
    /// Drain up to `min(out.len(), occupancy)` samples and return the count.
    /// A short read is an underrun: the caller zero-fills the remainder.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let read_pos = self.shared.read_pos.load(Ordering::Relaxed);
        let write_pos = self.shared.write_pos.load(Ordering::Acquire);

        let occupancy = write_pos.wrapping_sub(read_pos);
        let to_read = out.len().min(occupancy);

        for (i, slot) in out[..to_read].iter_mut().enumerate() {
            let pos = read_pos.wrapping_add(i) & self.shared.mask;
            // SAFETY: slots in [read, write) were published with release
            unsafe {
                *slot = *self.shared.buffer[pos].get();
            }
        }

        self.shared
            .read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);

        to_read
    }

    /// Samples available to read right now
    pub fn occupancy(&self) -> usize {
        let read_pos = self.shared.read_pos.load(Ordering::Relaxed);
        let write_pos = self.shared.write_pos.load(Ordering::Acquire);
        write_pos.wrapping_sub(read_pos)
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Discard everything currently buffered
    pub fn skip_all(&mut self) -> usize {
        let read_pos = self.shared.read_pos.load(Ordering::Relaxed);
        let write_pos = self.shared.write_pos.load(Ordering::Acquire);
        let occupancy = write_pos.wrapping_sub(read_pos);
        self.shared.read_pos.store(write_pos, Ordering::Release);
        occupancy
    }
}
