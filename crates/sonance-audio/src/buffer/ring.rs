//! Lock-free ring buffer between a blocking writer and a device callback.
//!
//! Single producer (the thread writing to an output line), single consumer
//! (the cpal callback). Positions grow monotonically and wrap through a mask.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Single-producer, single-consumer ring of `Copy` samples.
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    mask: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a ring holding at least `capacity` samples (rounded up to a power of 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            mask: capacity - 1,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Samples waiting to be consumed.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free slots for the producer.
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Append as many samples as fit. Producer side only.
    pub fn push_slice(&self, samples: &[T]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let room = self.capacity() - tail.wrapping_sub(head);
        let count = samples.len().min(room);

        for (i, sample) in samples[..count].iter().enumerate() {
            let slot = &self.slots[tail.wrapping_add(i) & self.mask];
            // SAFETY: slots between tail and head + capacity are owned by the producer
            // until the tail store below publishes them.
            #[allow(unsafe_code)]
            unsafe {
                *slot.get() = *sample;
            }
        }

        self.tail.store(tail.wrapping_add(count), Ordering::Release);
        count
    }

    /// Move up to `out.len()` samples into `out`. Consumer side only.
    pub fn pop_slice(&self, out: &mut [T]) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let count = out.len().min(tail.wrapping_sub(head));

        for (i, dst) in out[..count].iter_mut().enumerate() {
            let slot = &self.slots[head.wrapping_add(i) & self.mask];
            // SAFETY: slots between head and tail were published by the producer and
            // are not touched again until the head store below releases them.
            #[allow(unsafe_code)]
            unsafe {
                *dst = *slot.get();
            }
        }

        self.head.store(head.wrapping_add(count), Ordering::Release);
        count
    }

    /// Drop everything currently queued. Consumer side only.
    pub fn clear(&self) {
        let tail = self.tail.load(Ordering::Acquire);
        self.head.store(tail, Ordering::Release);
    }
}

// SAFETY: producer and consumer touch disjoint slot ranges, coordinated through the
// acquire/release pairs on `head` and `tail`.
#[allow(unsafe_code)]
unsafe impl<T: Send> Send for RingBuffer<T> {}
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for RingBuffer<T> {}

/// Sample ring shared between a line and its device callback.
pub type SharedRing = Arc<RingBuffer<f32>>;

/// Create a shared sample ring.
pub fn shared_ring(capacity: usize) -> SharedRing {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let ring = RingBuffer::<f32>::new(16);
        assert_eq!(ring.push_slice(&[0.1, 0.2, 0.3]), 3);
        assert_eq!(ring.len(), 3);

        let mut out = [0.0f32; 8];
        assert_eq!(ring.pop_slice(&mut out), 3);
        assert!((out[2] - 0.3).abs() < f32::EPSILON);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_capacity_rounds_up() {
        let ring = RingBuffer::<i16>::new(1000);
        assert_eq!(ring.capacity(), 1024);
        assert_eq!(ring.free(), 1024);
    }

    #[test]
    fn test_push_stops_when_full() {
        let ring = RingBuffer::<i16>::new(4);
        assert_eq!(ring.push_slice(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(ring.push_slice(&[7]), 0);

        let mut out = [0i16; 2];
        ring.pop_slice(&mut out);
        assert_eq!(out, [1, 2]);
        assert_eq!(ring.push_slice(&[7, 8, 9]), 2);

        let mut rest = [0i16; 4];
        assert_eq!(ring.pop_slice(&mut rest), 4);
        assert_eq!(rest, [3, 4, 7, 8]);
    }

    #[test]
    fn test_clear() {
        let ring = RingBuffer::<f32>::new(8);
        ring.push_slice(&[1.0; 5]);
        ring.clear();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_threaded_transfer_preserves_order() {
        use std::thread;

        let ring = Arc::new(RingBuffer::<i16>::new(64));
        let producer = ring.clone();

        let writer = thread::spawn(move || {
            let data: Vec<i16> = (0..5000).map(|i| (i % 1000) as i16).collect();
            let mut sent = 0;
            while sent < data.len() {
                let n = producer.push_slice(&data[sent..(sent + 37).min(data.len())]);
                sent += n;
                if n == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut received = Vec::with_capacity(5000);
        let mut scratch = [0i16; 50];
        while received.len() < 5000 {
            let n = ring.pop_slice(&mut scratch);
            received.extend_from_slice(&scratch[..n]);
            if n == 0 {
                thread::yield_now();
            }
        }
        writer.join().unwrap();

        assert!(received
            .iter()
            .enumerate()
            .all(|(i, &v)| v == (i % 1000) as i16));
    }
}
