//! One-shot and lazy global initialization for `no_std`.
//!
//! `static mut` has no place in this kernel; every cross-subsystem global
//! (the VFS root, the block device registry, the buffer cache, the task
//! table, ...) goes through one of the three types here instead.

#![allow(clippy::needless_lifetimes, mismatched_lifetime_syntaxes)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicPtr, Ordering};

use spin::Mutex;

/// A cell writable exactly once, `no_std`'s answer to `std::sync::OnceLock`.
///
/// Backed by a single `AtomicPtr` to a heap-boxed `T`: `set` wins a
/// compare-exchange against a null sentinel, `get` just loads and
/// dereferences. There is no locking on the read path.
pub struct OnceLock<T> {
    inner: AtomicPtr<T>,
}

impl<T> OnceLock<T> {
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Returns the value if `set`/`get_or_init` has already run.
    pub fn get(&self) -> Option<&'static T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        // SAFETY: non-null only after set() leaked a Box<T> here; Acquire
        // pairs with that Release so the pointee is fully written.
        Some(unsafe { &*ptr })
    }

    /// # Safety
    /// The caller must not hold any other reference (shared or exclusive)
    /// to the contained value while the returned one is alive.
    pub unsafe fn get_mut(&self) -> Option<&'static mut T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { &mut *ptr })
    }

    /// Stores `value` if the cell is empty. Returns the value back on
    /// failure rather than dropping it.
    pub fn set(&self, value: T) -> Result<(), T> {
        let ptr = alloc::boxed::Box::into_raw(alloc::boxed::Box::new(value));
        match self
            .inner
            .compare_exchange(core::ptr::null_mut(), ptr, Ordering::Release, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(_) => {
                // Lost the race; reclaim the box we just allocated.
                // SAFETY: ptr came from Box::into_raw above and nothing else
                // has seen it.
                let boxed = unsafe { alloc::boxed::Box::from_raw(ptr) };
                Err(*boxed)
            }
        }
    }

    pub fn get_or_init<F: FnOnce() -> T>(&self, f: F) -> &'static T {
        if let Some(val) = self.get() {
            return val;
        }
        let _ = self.set(f());
        self.get().expect("OnceLock uninitialized after set")
    }
}

impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the AtomicPtr is the only path to the boxed T; Send/Sync on T
// is sufficient for Send/Sync here, same as std's OnceLock.
unsafe impl<T: Send> Send for OnceLock<T> {}
unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}

impl<T> Drop for OnceLock<T> {
    fn drop(&mut self) {
        let ptr = self.inner.load(Ordering::Acquire);
        if !ptr.is_null() {
            // SAFETY: &mut self means no concurrent access; reclaim the box.
            unsafe {
                let _ = alloc::boxed::Box::from_raw(ptr);
            }
        }
    }
}

/// Deferred initialization: the closure runs on first access, not at
/// construction, so a `static LazyLock` can depend on runtime state.
pub struct LazyLock<T, F = fn() -> T> {
    cell: OnceLock<T>,
    init: UnsafeCell<Option<F>>,
}

impl<T: 'static, F: FnOnce() -> T> LazyLock<T, F> {
    pub const fn new(init: F) -> Self {
        Self {
            cell: OnceLock::new(),
            init: UnsafeCell::new(Some(init)),
        }
    }

    pub fn force(&self) -> &T {
        self.cell.get_or_init(|| {
            // SAFETY: OnceLock::get_or_init only calls this closure once,
            // so the UnsafeCell has no concurrent access.
            let init = unsafe { &mut *self.init.get() };
            init.take().expect("LazyLock init ran twice").call_once()
        })
    }
}

/// Dodges a borrow conflict between `FnOnce::call_once` and the implicit
/// `&mut` the `match`/`take` dance above would otherwise need twice.
trait CallOnce<T> {
    fn call_once(self) -> T;
}

impl<T, F: FnOnce() -> T> CallOnce<T> for F {
    fn call_once(self) -> T {
        self()
    }
}

impl<T: 'static, F: FnOnce() -> T> core::ops::Deref for LazyLock<T, F> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.force()
    }
}

// SAFETY: F is consumed exactly once via take(), so Send on F is enough
// even though F need not be Sync.
unsafe impl<T: Send, F: Send> Send for LazyLock<T, F> {}
unsafe impl<T: Sync, F: Send> Sync for LazyLock<T, F> {}

/// A lock-protected `Option<T>` for globals that need interior mutability
/// after init, not just one-shot write-then-read (`OnceLock`'s case).
/// The block device registry and buffer cache (`fs::blockdev`) are built
/// on this rather than `OnceLock` because both need `with_mut` after boot.
pub struct GlobalState<T> {
    inner: Mutex<Option<T>>,
}

impl<T> GlobalState<T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// First call wins; later calls return `value` back unused.
    pub fn init(&self, value: T) -> Result<(), T> {
        let mut lock = self.inner.lock();
        if lock.is_some() {
            return Err(value);
        }
        *lock = Some(value);
        Ok(())
    }

    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> Option<R> {
        self.inner.lock().as_ref().map(f)
    }

    pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> Option<R> {
        self.inner.lock().as_mut().map(f)
    }

    /// Hands back the guard itself rather than a closure result, for
    /// callers that need to hold the lock across several operations.
    pub fn try_get(&self) -> Option<spin::MutexGuard<Option<T>>> {
        let lock = self.inner.lock();
        lock.is_some().then_some(lock)
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: spin::Mutex serializes every access to the Option<T>; T need
// only be Send, not Sync, since callers never see concurrent references.
unsafe impl<T: Send> Send for GlobalState<T> {}
unsafe impl<T: Send> Sync for GlobalState<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn once_lock_rejects_second_set() {
        let lock = OnceLock::new();
        assert!(lock.get().is_none());
        assert!(lock.set(42).is_ok());
        assert_eq!(*lock.get().unwrap(), 42);
        assert!(lock.set(100).is_err());
    }

    #[test_case]
    fn lazy_lock_runs_init_once() {
        let lazy = LazyLock::new(|| 42);
        assert_eq!(*lazy, 42);
        assert_eq!(*lazy, 42);
    }

    #[test_case]
    fn global_state_with_mut_sees_prior_writes() {
        let state = GlobalState::new();
        assert!(state.init(String::from("hello")).is_ok());
        state.with_mut(|s| s.push_str(" world"));
        state.with(|s| assert_eq!(s, "hello world"));
        assert!(state.try_get().is_some());
    }
}
