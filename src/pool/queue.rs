//! Fixed-capacity blocking FIFO.
//!
//! # Design Decisions
//! - One lock guards the buffer; two condition variables (`not_full`,
//!   `not_empty`) carry the wakeups. No polling.
//! - `None` timeout waits forever; `Some(d)` fails with `QueueFull`/`QueueEmpty`.
//!   A timeout too large to represent as an `Instant` also waits forever.
//! - `close()` wakes every waiter. Producers fail with `QueueClosed`,
//!   consumers drain what is left and then fail with `QueueClosed`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::observability::metrics;

#[derive(Debug)]
struct Buffer<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Thread-safe queue that blocks producers when full and consumers when empty.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    name: Option<String>,
    capacity: usize,
    buffer: Mutex<Buffer<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: None,
            capacity,
            buffer: Mutex::new(Buffer {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Create a queue that reports its depth under `name`.
    pub fn named(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(capacity)
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `item`, blocking while the queue is full.
    pub fn put(&self, item: T, timeout: Option<Duration>) -> Result<()> {
        let deadline = wait_deadline(timeout);
        let mut buffer = self.buffer.lock();

        loop {
            if buffer.closed {
                return Err(Error::QueueClosed);
            }
            if buffer.items.len() < self.capacity {
                break;
            }
            match deadline {
                Some((limit, deadline)) => {
                    if self.not_full.wait_until(&mut buffer, deadline).timed_out()
                        && !buffer.closed
                        && buffer.items.len() >= self.capacity
                    {
                        return Err(Error::QueueFull(limit));
                    }
                }
                None => self.not_full.wait(&mut buffer),
            }
        }

        buffer.items.push_back(item);
        self.record_depth(buffer.items.len());
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the head item, blocking while the queue is empty.
    pub fn get(&self, timeout: Option<Duration>) -> Result<T> {
        let deadline = wait_deadline(timeout);
        let mut buffer = self.buffer.lock();

        loop {
            if let Some(item) = buffer.items.pop_front() {
                self.record_depth(buffer.items.len());
                self.not_full.notify_one();
                return Ok(item);
            }
            if buffer.closed {
                return Err(Error::QueueClosed);
            }
            match deadline {
                Some((limit, deadline)) => {
                    if self.not_empty.wait_until(&mut buffer, deadline).timed_out()
                        && !buffer.closed
                        && buffer.items.is_empty()
                    {
                        return Err(Error::QueueEmpty(limit));
                    }
                }
                None => self.not_empty.wait(&mut buffer),
            }
        }
    }

    /// Non-blocking put. Fails with `QueueFull` immediately when at capacity.
    pub fn try_put(&self, item: T) -> Result<()> {
        self.put(item, Some(Duration::ZERO))
    }

    /// Non-blocking get. Fails with `QueueEmpty` immediately when empty.
    pub fn try_get(&self) -> Result<T> {
        self.get(Some(Duration::ZERO))
    }

    /// Remove and return every buffered item.
    pub fn drain(&self) -> Vec<T> {
        let mut buffer = self.buffer.lock();
        let items: Vec<T> = buffer.items.drain(..).collect();
        self.record_depth(0);
        self.not_full.notify_all();
        items
    }

    /// Stop accepting items and wake all waiters.
    pub fn close(&self) {
        let mut buffer = self.buffer.lock();
        if !buffer.closed {
            buffer.closed = true;
            self.not_full.notify_all();
            self.not_empty.notify_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.lock().closed
    }

    pub fn size(&self) -> usize {
        self.buffer.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.lock().items.len() >= self.capacity
    }

    fn record_depth(&self, depth: usize) {
        if let Some(name) = &self.name {
            metrics::record_queue_depth(name, depth);
        }
    }
}

/// Pair a timeout with its deadline. `None` when there is no deadline to wait for.
fn wait_deadline(timeout: Option<Duration>) -> Option<(Duration, Instant)> {
    timeout.and_then(|limit| Some((limit, Instant::now().checked_add(limit)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(3);
        for i in 1..=3 {
            queue.put(i, None).unwrap();
        }
        assert!(queue.is_full());
        assert_eq!(queue.get(None).unwrap(), 1);
        assert_eq!(queue.get(None).unwrap(), 2);
        assert_eq!(queue.get(None).unwrap(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_put_times_out_when_full() {
        let queue = BoundedQueue::new(1);
        queue.put("a", None).unwrap();

        let start = Instant::now();
        let result = queue.put("b", Some(Duration::from_millis(50)));
        assert_eq!(result, Err(Error::QueueFull(Duration::from_millis(50))));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_get_times_out_when_empty() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(2);
        let start = Instant::now();
        assert_eq!(
            queue.get(Some(Duration::from_millis(30))),
            Err(Error::QueueEmpty(Duration::from_millis(30)))
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_put_unblocks_after_get() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.put(1, None).unwrap();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.get(None).unwrap()
            })
        };

        let start = Instant::now();
        queue.put(2, Some(Duration::from_secs(2))).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(consumer.join().unwrap(), 1);
        assert_eq!(queue.get(None).unwrap(), 2);
    }

    #[test]
    fn test_unbounded_timeout_blocks_until_space() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.put(1, None).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.put(2, Some(Duration::MAX)))
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!producer.is_finished());
        assert_eq!(queue.get(Some(Duration::MAX)).unwrap(), 1);
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(queue.get(Some(Duration::MAX)).unwrap(), 2);
    }

    #[test]
    fn test_try_variants() {
        let queue = BoundedQueue::new(1);
        assert_eq!(queue.try_get(), Err(Error::QueueEmpty(Duration::ZERO)));
        queue.try_put('x').unwrap();
        assert_eq!(queue.try_put('y'), Err(Error::QueueFull(Duration::ZERO)));
        assert_eq!(queue.try_get().unwrap(), 'x');
    }

    #[test]
    fn test_close_wakes_consumers_after_drain() {
        let queue = Arc::new(BoundedQueue::new(4));
        queue.put(1, None).unwrap();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Ok(item) = queue.get(None) {
                    seen.push(item);
                }
                seen
            })
        };

        thread::sleep(Duration::from_millis(30));
        queue.close();
        assert_eq!(consumer.join().unwrap(), vec![1]);
        assert_eq!(queue.put(2, None), Err(Error::QueueClosed));
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.put(0, None).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.put(1, None))
        };

        thread::sleep(Duration::from_millis(30));
        queue.close();
        assert_eq!(producer.join().unwrap(), Err(Error::QueueClosed));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let queue = Arc::new(BoundedQueue::new(3));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        queue.put(p * 100 + i, None).unwrap();
                        assert!(queue.size() <= 3);
                    }
                })
            })
            .collect();

        let mut received = 0;
        while received < 200 {
            queue.get(Some(Duration::from_secs(5))).unwrap();
            assert!(queue.size() <= queue.capacity());
            received += 1;
        }
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity_from_config() {
        let queue: BoundedQueue<()> = BoundedQueue::from_config(&QueueConfig::default());
        assert_eq!(queue.capacity(), 100);
        assert_eq!(BoundedQueue::<()>::new(0).capacity(), 1);
    }

    #[test]
    fn test_drain_releases_capacity() {
        let queue = BoundedQueue::named("test", 2);
        queue.put(1, None).unwrap();
        queue.put(2, None).unwrap();
        assert_eq!(queue.drain(), vec![1, 2]);
        assert!(queue.try_put(3).is_ok());
    }
}
