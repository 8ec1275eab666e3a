//! Bounded blocking FIFO between the data socket and the consumer loop.
//!
//! The data thread pushes decoded sample blocks in, the consumer pops them
//! out, and `release()` is how a stop gets a consumer out of a blocked
//! `pop()` without killing the thread.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner<T> {
    queue: VecDeque<T>,
    released: bool,
}

/// Fixed-capacity FIFO with blocking push/pop and a one-way cancel switch.
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "ring buffer needs at least one slot");
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                released: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Insert at the tail, blocking while the buffer is full. Once the
    /// buffer is released the item is silently dropped instead.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        while inner.queue.len() == self.capacity && !inner.released {
            inner = self.not_full.wait(inner).unwrap();
        }
        if inner.released {
            return;
        }
        inner.queue.push_back(item);
        self.not_empty.notify_one();
    }

    /// Remove the oldest item, blocking while the buffer is empty.
    /// Returns `None` without blocking once the buffer is released.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.released {
                return None;
            }
            if let Some(item) = inner.queue.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Cancel the buffer, waking every blocked producer and consumer.
    /// Idempotent; there is no way back, stopped sessions get a fresh ring.
    pub fn release(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.released = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Drop everything queued without touching the released flag.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let ring = RingBuffer::new(8);
        for i in 0..8 {
            ring.push(i);
        }
        for i in 0..8 {
            assert_eq!(ring.pop(), Some(i));
        }
    }

    #[test]
    fn never_over_capacity() {
        let ring = Arc::new(RingBuffer::new(3));
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..6 {
                    ring.push(i);
                }
            })
        };
        // Give the producer time to hit the full buffer
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ring.len(), 3);
        // Draining frees slots and the producer finishes in push order
        for i in 0..6 {
            assert_eq!(ring.pop(), Some(i));
        }
        producer.join().unwrap();
    }

    #[test]
    fn release_unblocks_pop() {
        let ring = Arc::new(RingBuffer::<u32>::new(4));
        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.pop())
        };
        thread::sleep(Duration::from_millis(50));
        ring.release();
        assert_eq!(consumer.join().unwrap(), None);
        // Idempotent, and future pops return straight away
        ring.release();
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn release_unblocks_push() {
        let ring = Arc::new(RingBuffer::new(1));
        ring.push(1);
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.push(2))
        };
        thread::sleep(Duration::from_millis(50));
        ring.release();
        producer.join().unwrap();
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn push_after_release_is_dropped() {
        let ring = RingBuffer::new(4);
        ring.release();
        ring.push(1);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn clear_discards_queued() {
        let ring = RingBuffer::new(4);
        ring.push(1);
        ring.push(2);
        ring.clear();
        assert!(ring.is_empty());
        ring.push(3);
        assert_eq!(ring.pop(), Some(3));
    }
}
