//! IRQ-safe spinlock (§4.1 "Spinlock", §5 "Shared-resource policy").
//!
//! A thin wrapper around `spin::Mutex` (the teacher uses `spin::Mutex`
//! throughout `scheduler/mod.rs` and `memory/phys.rs`'s `ALLOCATOR_LOCK`)
//! plus the `Arch` IRQ-mask save/restore pair. On uniprocessor builds this
//! degrades to "IRQs off, kernel priority"; on the hosted test build IRQ
//! masking is a no-op but the nesting accounting is still exercised.
//!
//! Nesting is safe: each [`SpinLock::lock`] call captures whatever mask
//! state was active *at that call*, so an inner lock/unlock pair restores
//! exactly what the outer call had disabled, without needing a shared
//! nesting counter.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::arch::{self, Arch, IrqMask};

pub struct SpinLock<T> {
    inner: Mutex<T>,
}

pub struct SpinLockGuard<'a, T> {
    // `ManuallyDrop` lets `Drop::drop` release the mutex *before*
    // restoring the IRQ mask, instead of relying on field declaration
    // order (which would unmask interrupts while the mutex is still
    // held).
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    mask: IrqMask,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Masks interrupts, takes the lock, and returns a guard that restores
    /// both on drop.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mask = arch::current().irq_lock();
        let guard = self.inner.lock();
        SpinLockGuard {
            guard: ManuallyDrop::new(guard),
            mask,
        }
    }

    /// Non-blocking variant used by ISR-safe entry points (§4.4's
    /// `push_from_isr`/`pop_from_isr`): returns `None` instead of spinning
    /// if the lock is already held.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let mask = arch::current().irq_lock();
        match self.inner.try_lock() {
            Some(guard) => Some(SpinLockGuard {
                guard: ManuallyDrop::new(guard),
                mask,
            }),
            None => {
                arch::current().irq_unlock(mask);
                None
            }
        }
    }

}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        // SAFETY: `guard` is never used again after this point.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        arch::current().irq_unlock(self.mask);
    }
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// Explicit unlock, restoring the IRQ mask captured at `lock()` time.
    /// Equivalent to dropping the guard; exists for call sites that want
    /// to name the unlock point (matching the teacher's
    /// lock-then-explicit-unlock style in `scheduler/ipc.rs`).
    pub fn unlock(self) {}
}
