use std::sync::Arc;

use tracing::error;

use crate::queue::BlockingQueue;

/// Capability a pooled value must provide so the pool can recycle it
/// between checkouts.
pub trait Resettable {
    fn reset(&mut self);
}

/// Wraps a raw pointer to a pool-owned value so it can travel through a
/// `BlockingQueue`. Only one `PooledHandle` at a time ever dereferences a
/// given pointer, a discipline the queue itself enforces (a pointer is
/// only ever in exactly one of: the queue, or one live handle).
struct PoolPtr<T>(*mut T);

// SAFETY: pointers only move between threads while no handle holds them
// live; the pool/queue discipline guarantees a single owner at a time.
unsafe impl<T> Send for PoolPtr<T> {}

/// Recyclable pool of heavyweight backend-allocated buffers.
///
/// Constructed with exactly `K` pre-allocated values (1 ≤ K ≤ 100); their
/// raw pointers live in an internal bounded queue of the same capacity.
/// `acquire` takes one out and wraps it in a [`PooledHandle`] whose drop
/// hook resets the value and returns it to the queue.
pub struct BufferPool<T: Resettable> {
    dynamic_pool: BlockingQueue<PoolPtr<T>>,
    static_pool: Vec<Box<T>>,
    capacity: usize,
}

impl<T: Resettable> BufferPool<T> {
    /// `allocate` is called exactly `pool_size` times at construction.
    pub fn new<F>(pool_size: usize, mut allocate: F) -> Self
    where
        F: FnMut() -> T,
    {
        assert!((1..=100).contains(&pool_size), "pool size must be in 1..=100");
        let dynamic_pool = BlockingQueue::new(pool_size);
        let mut static_pool = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let mut boxed = Box::new(allocate());
            let ptr: *mut T = boxed.as_mut();
            static_pool.push(boxed);
            dynamic_pool.push_blocking(PoolPtr(ptr));
        }
        Self {
            dynamic_pool,
            static_pool,
            capacity: pool_size,
        }
    }

    /// Takes one value from the pool. Blocks if `blocking` and the pool is
    /// currently exhausted; otherwise returns `None` immediately.
    pub fn acquire(self: &Arc<Self>, blocking: bool) -> Option<PooledHandle<T>> {
        let ptr = if blocking {
            self.dynamic_pool.take_blocking().value()?
        } else {
            self.dynamic_pool.try_take()?
        };
        Some(PooledHandle {
            ptr: ptr.0,
            pool: Some(Arc::clone(self)),
        })
    }

    pub fn remaining(&self) -> usize {
        self.dynamic_pool.size()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn return_ptr(&self, ptr: *mut T) {
        self.dynamic_pool.push_blocking(PoolPtr(ptr));
    }
}

impl<T: Resettable> Drop for BufferPool<T> {
    fn drop(&mut self) {
        if self.dynamic_pool.size() != self.capacity {
            error!(
                expected = self.capacity,
                actual = self.dynamic_pool.size(),
                "buffer pool dropped with outstanding handles still checked out"
            );
        }
        self.static_pool.clear();
    }
}

/// A shared, move-only handle around a value borrowed from a
/// [`BufferPool`]. On last drop it resets the value and returns it to the
/// pool.
pub struct PooledHandle<T: Resettable> {
    ptr: *mut T,
    pool: Option<Arc<BufferPool<T>>>,
}

// SAFETY: the pool/queue discipline guarantees at most one `PooledHandle`
// dereferences a given pointer at a time, so moving the handle across
// threads is sound as long as `T` itself is safe to access from another
// thread once exclusive.
unsafe impl<T: Resettable + Send> Send for PooledHandle<T> {}

impl<T: Resettable> std::ops::Deref for PooledHandle<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.ptr }
    }
}

impl<T: Resettable> std::ops::DerefMut for PooledHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.ptr }
    }
}

impl<T: Resettable> Drop for PooledHandle<T> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            unsafe { (*self.ptr).reset() };
            pool.return_ptr(self.ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(u32);
    impl Resettable for Dummy {
        fn reset(&mut self) {
            self.0 = 0;
        }
    }

    #[test]
    fn pool_saturation_and_release() {
        let pool = Arc::new(BufferPool::new(2, || Dummy(1)));
        let a = pool.acquire(true).unwrap();
        let b = pool.acquire(true).unwrap();
        assert_eq!(pool.remaining(), 0);
        assert!(pool.acquire(false).is_none());
        drop(a);
        assert_eq!(pool.remaining(), 1);
        let c = pool.acquire(false).unwrap();
        assert_eq!(pool.remaining(), 0);
        drop(b);
        drop(c);
        assert_eq!(pool.remaining(), 2);
    }

    #[test]
    fn pool_conservation_invariant() {
        let pool = Arc::new(BufferPool::new(3, || Dummy(0)));
        let handles: Vec<_> = (0..3).map(|_| pool.acquire(true).unwrap()).collect();
        assert_eq!(pool.remaining() + handles.len(), 3);
        drop(handles);
        assert_eq!(pool.remaining(), 3);
    }

    #[test]
    fn handle_resets_value_on_return() {
        let pool = Arc::new(BufferPool::new(1, || Dummy(7)));
        {
            let mut h = pool.acquire(true).unwrap();
            assert_eq!(h.0, 7);
            h.0 = 99;
        }
        let h2 = pool.acquire(true).unwrap();
        assert_eq!(h2.0, 0);
    }
}
