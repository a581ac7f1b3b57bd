//! Bounded FIFO queue with blocking endpoints and ISR-safe non-blocking
//! variants (original spec §4.4).
//!
//! Grounded in the teacher's port-based IPC (`scheduler/ipc.rs`'s
//! `port_send`/`port_recv` retry-loop: lock, check, enqueue-and-block if not
//! ready, unlock, yield, loop), reshaped around a ring buffer of `T` rather
//! than the teacher's `VecDeque<QueuedMessage>` of boxed messages, to match
//! this spec's "contiguous byte buffer of `item_size * capacity` bytes" data
//! model (§3 "Queue"). The buffer is generic over `T: Copy` instead of a
//! runtime byte count: this crate never needs heterogeneous queues, and a
//! typed buffer lets every index/pointer arithmetic site be checked at
//! compile time instead of hand-verified against a byte stride (recorded in
//! DESIGN.md).

use core::ptr;

use crate::alloc_tlsf::kernel_alloc;
use crate::platform;
use crate::sched;
use crate::sched::wait_list::WaitList;
use crate::sync::SpinLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// `push`/`push_from_isr` found the queue full.
    Full,
    /// `pop`/`pop_from_isr`/`peek` found the queue empty.
    Empty,
    /// The queue was `delete`d out from under a blocked waiter.
    Deleted,
    OutOfMemory,
}

struct Inner<T: Copy> {
    buf: *mut T,
    capacity: usize,
    head: usize,
    count: usize,
    rx_waiters: WaitList,
    tx_waiters: WaitList,
    deleted: bool,
    /// Run after a successful `push`/`push_from_isr` (§4.4: "used by UART TX
    /// queues to kick the transmitter interrupt").
    push_callback: Option<fn()>,
}

// SAFETY: `buf` is a uniquely owned TLSF allocation; all access to it goes
// through `inner`'s `SpinLock`.
unsafe impl<T: Copy + Send> Send for Inner<T> {}

pub struct Queue<T: Copy> {
    inner: SpinLock<Inner<T>>,
}

impl<T: Copy> Queue<T> {
    /// Allocates a `capacity`-element ring buffer from the kernel heap.
    /// `capacity` must be nonzero.
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        assert!(capacity > 0, "Queue capacity must be nonzero");
        let bytes = capacity
            .checked_mul(core::mem::size_of::<T>())
            .expect("queue capacity * item size overflowed");
        let buf = kernel_alloc::malloc(bytes).ok_or(QueueError::OutOfMemory)? as *mut T;
        Ok(Self {
            inner: SpinLock::new(Inner {
                buf,
                capacity,
                head: 0,
                count: 0,
                rx_waiters: WaitList::new(),
                tx_waiters: WaitList::new(),
                deleted: false,
                push_callback: None,
            }),
        })
    }

    pub fn set_push_callback(&self, cb: fn()) {
        self.inner.lock().push_callback = Some(cb);
    }

    fn tail_index(inner: &Inner<T>) -> usize {
        (inner.head + inner.count) % inner.capacity
    }

    fn push_locked(inner: &mut Inner<T>, value: T) {
        let idx = Self::tail_index(inner);
        // SAFETY: `idx < capacity`, `buf` has room for `capacity` elements.
        unsafe { ptr::write(inner.buf.add(idx), value) };
        inner.count += 1;
    }

    fn pop_locked(inner: &mut Inner<T>) -> T {
        // SAFETY: caller already checked `count > 0`; `head` indexes a
        // previously written, not-yet-read element.
        let value = unsafe { ptr::read(inner.buf.add(inner.head)) };
        inner.head = (inner.head + 1) % inner.capacity;
        inner.count -= 1;
        value
    }

    /// Blocking push: retries until room is available or the queue is
    /// deleted (§4.4 "standard double-check loop").
    pub fn push(&self, value: T) -> Result<(), QueueError> {
        loop {
            let mut inner = self.inner.lock();
            if inner.deleted {
                return Err(QueueError::Deleted);
            }
            if inner.count < inner.capacity {
                Self::push_locked(&mut inner, value);
                let cb = inner.push_callback;
                sched::wait_pop_front(&mut inner.rx_waiters);
                drop(inner);
                if let Some(cb) = cb {
                    cb();
                }
                return Ok(());
            }
            sched::block_current_on(&mut inner.tx_waiters);
            drop(inner);
            platform::yield_now();
        }
    }

    /// Blocking pop: retries until an element is available or the queue is
    /// deleted.
    pub fn pop(&self) -> Result<T, QueueError> {
        loop {
            let mut inner = self.inner.lock();
            if inner.count > 0 {
                let value = Self::pop_locked(&mut inner);
                sched::wait_pop_front(&mut inner.tx_waiters);
                return Ok(value);
            }
            if inner.deleted {
                return Err(QueueError::Deleted);
            }
            sched::block_current_on(&mut inner.rx_waiters);
            drop(inner);
            platform::yield_now();
        }
    }

    /// Non-blocking push for ISR contexts: never yields. On success wakes
    /// one receiver and runs the push-callback.
    pub fn push_from_isr(&self, value: T) -> Result<(), QueueError> {
        let Some(mut inner) = self.inner.try_lock() else {
            return Err(QueueError::Full);
        };
        if inner.deleted {
            return Err(QueueError::Deleted);
        }
        if inner.count >= inner.capacity {
            return Err(QueueError::Full);
        }
        Self::push_locked(&mut inner, value);
        let cb = inner.push_callback;
        sched::wait_pop_front(&mut inner.rx_waiters);
        drop(inner);
        if let Some(cb) = cb {
            cb();
        }
        Ok(())
    }

    /// Non-blocking pop for ISR contexts.
    pub fn pop_from_isr(&self) -> Result<T, QueueError> {
        let Some(mut inner) = self.inner.try_lock() else {
            return Err(QueueError::Empty);
        };
        if inner.count == 0 {
            return Err(QueueError::Empty);
        }
        let value = Self::pop_locked(&mut inner);
        sched::wait_pop_front(&mut inner.tx_waiters);
        Ok(value)
    }

    /// Returns a copy of the head element without removing it.
    pub fn peek(&self) -> Result<T, QueueError> {
        let inner = self.inner.lock();
        if inner.count == 0 {
            return Err(QueueError::Empty);
        }
        // SAFETY: `count > 0`, so `head` indexes a live element.
        Ok(unsafe { ptr::read(inner.buf.add(inner.head)) })
    }

    /// Clears the queue and wakes every blocked sender (not receiver): the
    /// queue is now trivially "not full" (§4.4 "reset").
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.head = 0;
        inner.count = 0;
        while let Some(_id) = sched::wait_pop_front(&mut inner.tx_waiters) {}
    }

    /// Wakes every waiter (senders and receivers) so they observe
    /// `QueueError::Deleted`, then releases the backing buffer. The caller
    /// must not use this `Queue` again afterward.
    pub fn delete(&self) {
        let mut inner = self.inner.lock();
        inner.deleted = true;
        while let Some(_id) = sched::wait_pop_front(&mut inner.rx_waiters) {}
        while let Some(_id) = sched::wait_pop_front(&mut inner.tx_waiters) {}
        let buf = inner.buf;
        drop(inner);
        unsafe { kernel_alloc::free(buf as *mut u8) };
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock();
        inner.count >= inner.capacity
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}

impl<T: Copy> Drop for Queue<T> {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        if !inner.deleted {
            let buf = inner.buf;
            drop(inner);
            unsafe { kernel_alloc::free(buf as *mut u8) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::test_support::with_reset_scheduler;

    #[test]
    fn fifo_order() {
        with_reset_scheduler(|| {
            let q: Queue<u32> = Queue::new(4).unwrap();
            q.push(10).unwrap();
            q.push(20).unwrap();
            assert_eq!(q.pop().unwrap(), 10);
            assert_eq!(q.pop().unwrap(), 20);
        });
    }

    #[test]
    fn full_then_isr_reject() {
        with_reset_scheduler(|| {
            let q: Queue<u8> = Queue::new(2).unwrap();
            q.push(1).unwrap();
            q.push(2).unwrap();
            assert_eq!(q.push_from_isr(3), Err(QueueError::Full));
            assert_eq!(q.pop().unwrap(), 1);
            q.push_from_isr(3).unwrap();
            assert_eq!(q.pop().unwrap(), 2);
            assert_eq!(q.pop().unwrap(), 3);
        });
    }

    #[test]
    fn reset_clears_and_reports_empty() {
        with_reset_scheduler(|| {
            let q: Queue<u8> = Queue::new(2).unwrap();
            q.push(1).unwrap();
            q.reset();
            assert!(q.is_empty());
            assert_eq!(q.pop_from_isr(), Err(QueueError::Empty));
        });
    }

    #[test]
    fn delete_reports_to_blocked_pop() {
        with_reset_scheduler(|| {
            let q: Queue<u8> = Queue::new(1).unwrap();
            // Queue is empty; a real blocking `pop()` here would yield
            // forever under the hosted test harness (no real scheduler
            // switches the stub task away), so this test only exercises
            // the non-blocking surface of `delete`.
            q.delete();
        });
    }
}
