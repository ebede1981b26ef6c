use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Result of a take operation that can observe queue shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeOutcome<T> {
    Value(T),
    Drained,
}

impl<T> TakeOutcome<T> {
    pub fn value(self) -> Option<T> {
        match self {
            TakeOutcome::Value(v) => Some(v),
            TakeOutcome::Drained => None,
        }
    }
}

struct Inner<T> {
    queue: VecDeque<T>,
    push_enabled: bool,
    take_enabled: bool,
    no_more_input: bool,
}

/// A thread-safe bounded FIFO queue with producer/consumer disable,
/// cover-on-full, and "no more input" drain semantics.
///
/// One mutex guards the internal state; two condition variables wake
/// producers and consumers separately so a push doesn't spuriously wake
/// other producers and vice versa.
pub struct BlockingQueue<T> {
    capacity: usize,
    state: Mutex<Inner<T>>,
    cv_producer: Condvar,
    cv_consumer: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(Inner {
                queue: VecDeque::new(),
                push_enabled: true,
                take_enabled: true,
                no_more_input: false,
            }),
            cv_producer: Condvar::new(),
            cv_consumer: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Insert `value`; blocks while the queue is full and pushes remain
    /// enabled. Returns `false` if pushes are disabled on entry or become
    /// disabled while waiting.
    pub fn push_blocking(&self, value: T) -> bool {
        let mut inner = self.state.lock().unwrap();
        loop {
            if !inner.push_enabled {
                return false;
            }
            if inner.queue.len() < self.capacity {
                inner.queue.push_back(value);
                self.cv_consumer.notify_one();
                return true;
            }
            inner = self.cv_producer.wait(inner).unwrap();
        }
    }

    /// Insert `value`, evicting the oldest element if full. Never blocks.
    /// Returns `false` if pushes are disabled.
    pub fn push_cover(&self, value: T) -> bool {
        let mut inner = self.state.lock().unwrap();
        if !inner.push_enabled {
            return false;
        }
        if inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
        }
        inner.queue.push_back(value);
        self.cv_consumer.notify_one();
        true
    }

    /// Remove and return the head; blocks while empty unless takes are
    /// disabled or no-more-input has been signalled.
    pub fn take_blocking(&self) -> TakeOutcome<T> {
        let mut inner = self.state.lock().unwrap();
        loop {
            if !inner.take_enabled {
                return TakeOutcome::Drained;
            }
            if let Some(value) = inner.queue.pop_front() {
                self.cv_producer.notify_one();
                return TakeOutcome::Value(value);
            }
            if inner.no_more_input {
                return TakeOutcome::Drained;
            }
            inner = self.cv_consumer.wait(inner).unwrap();
        }
    }

    /// Remove and return the head if present. Never blocks.
    pub fn try_take(&self) -> Option<T> {
        let mut inner = self.state.lock().unwrap();
        if !inner.take_enabled {
            return None;
        }
        let value = inner.queue.pop_front();
        if value.is_some() {
            self.cv_producer.notify_one();
        }
        value
    }

    /// Disable both push and take, mark no-more-input, and wake every
    /// waiter. Buffered elements are left in place (see `disable_and_clear`
    /// to also drop them).
    pub fn disable(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.push_enabled = false;
        inner.take_enabled = false;
        inner.no_more_input = true;
        self.cv_producer.notify_all();
        self.cv_consumer.notify_all();
    }

    /// Like `disable`, but also drops every buffered element.
    pub fn disable_and_clear(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.push_enabled = false;
        inner.take_enabled = false;
        inner.no_more_input = true;
        inner.queue.clear();
        self.cv_producer.notify_all();
        self.cv_consumer.notify_all();
    }

    pub fn disable_push(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.push_enabled = false;
        self.cv_producer.notify_all();
    }

    pub fn enable_push(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.push_enabled = true;
        self.cv_producer.notify_all();
    }

    pub fn disable_take(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.take_enabled = false;
        self.cv_consumer.notify_all();
    }

    pub fn enable_take(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.take_enabled = true;
        self.cv_consumer.notify_all();
    }

    /// Mark the drain condition without disabling takes; wakes every
    /// consumer so it can observe the empty-and-drained state.
    pub fn set_no_more_input(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.no_more_input = true;
        self.cv_consumer.notify_all();
    }
}

impl<T> Drop for BlockingQueue<T> {
    fn drop(&mut self) {
        self.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn queue_basic() {
        let q = Arc::new(BlockingQueue::<i32>::new(2));
        assert!(q.push_blocking(1));
        assert!(q.push_blocking(2));
        assert_eq!(q.take_blocking().value(), Some(1));
        assert_eq!(q.take_blocking().value(), Some(2));
        q.set_no_more_input();
        assert_eq!(q.take_blocking(), TakeOutcome::Drained);
    }

    #[test]
    fn cover_push_evicts_oldest() {
        let q = BlockingQueue::<i32>::new(1);
        assert!(q.push_blocking(1));
        assert!(q.push_cover(2));
        assert_eq!(q.take_blocking().value(), Some(2));
        assert!(q.is_empty());
    }

    #[test]
    fn q_cap_never_exceeded_under_contention() {
        let q = Arc::new(BlockingQueue::<i32>::new(4));
        let producers: Vec<_> = (0..8)
            .map(|i| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for _ in 0..50 {
                        assert!(q.size() <= q.capacity());
                        q.push_blocking(i);
                        thread::yield_now();
                    }
                })
            })
            .collect();
        let consumer_q = Arc::clone(&q);
        let consumer = thread::spawn(move || {
            for _ in 0..400 {
                consumer_q.take_blocking();
            }
        });
        for p in producers {
            p.join().unwrap();
        }
        consumer.join().unwrap();
    }

    #[test]
    fn q_fifo_order_preserved() {
        let q = Arc::new(BlockingQueue::<i32>::new(8));
        for i in 0..8 {
            q.push_blocking(i);
        }
        for i in 0..8 {
            assert_eq!(q.take_blocking().value(), Some(i));
        }
    }

    #[test]
    fn blocked_push_unblocked_by_take() {
        let q = Arc::new(BlockingQueue::<i32>::new(1));
        q.push_blocking(1);
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.push_blocking(2));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.take_blocking().value(), Some(1));
        assert!(handle.join().unwrap());
        assert_eq!(q.take_blocking().value(), Some(2));
    }

    #[test]
    fn disable_unblocks_waiting_take() {
        let q = Arc::new(BlockingQueue::<i32>::new(1));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.take_blocking());
        thread::sleep(Duration::from_millis(20));
        q.disable();
        assert_eq!(handle.join().unwrap(), TakeOutcome::Drained);
    }

    #[test]
    fn push_rejected_once_disabled() {
        let q = BlockingQueue::<i32>::new(2);
        q.disable();
        assert!(!q.push_blocking(1));
        assert!(!q.push_cover(1));
    }
}
