//! RAII wrappers for kernel resources.
//!
//! Ensures resources are released on every exit path, including early
//! returns and panics unwinding through a scope, rather than relying on
//! callers to remember explicit cleanup calls.

use core::ops::{Deref, DerefMut};

use spin::MutexGuard;

use crate::mm::frame_allocator::{self, FrameNumber};
use crate::println;

/// Owns a physical frame and returns it to the frame allocator when dropped.
pub struct FrameGuard {
    frame: FrameNumber,
}

impl FrameGuard {
    /// Take ownership of a frame the caller already allocated.
    pub fn new(frame: FrameNumber) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    /// Release ownership of the frame without freeing it.
    pub fn leak(self) -> FrameNumber {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Err(e) = frame_allocator::free_frame(self.frame) {
            println!("[RAII] Warning: failed to free frame: {:?}", e);
        }
    }
}

/// Lock guard that logs acquisition and release, for tracking down
/// lock-ordering bugs during development.
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    name: &'static str,
}

impl<'a, T> TrackedMutexGuard<'a, T> {
    pub fn new(guard: MutexGuard<'a, T>, name: &'static str) -> Self {
        println!("[RAII] Acquired lock: {}", name);
        Self { guard, name }
    }
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        println!("[RAII] Released lock: {}", self.name);
    }
}

impl<T> Deref for TrackedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Run cleanup code when the current scope exits, via any path.
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Cancel the cleanup; used once the guarded operation has committed.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_guard() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| {
                cleaned = true;
            });
        }
        assert!(cleaned);
    }

    #[test]
    fn test_scope_guard_cancel() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| {
                cleaned = true;
            });
            guard.cancel();
        }
        assert!(!cleaned);
    }

    #[test]
    fn frame_guard_frees_on_drop() {
        use crate::boot::{ArchTag, BootInfo, MemoryMapEntry, MemoryRegionKind};

        let mut info = BootInfo::new(ArchTag(0));
        info.push_region(MemoryMapEntry {
            base: 0,
            length: 4096 * 4,
            kind: MemoryRegionKind::Usable,
        });
        // A second call to frame_allocator::init in the same process would
        // fail (GlobalState is init-once); this test only exercises the
        // guard's Drop wiring against whatever allocator state already
        // exists in this test binary.
        let _ = frame_allocator::init(&info, &[]);
        if let Ok(frame) = frame_allocator::alloc_frame() {
            let before = frame_allocator::free_frames_count();
            {
                let _guard = FrameGuard::new(frame);
            }
            assert_eq!(frame_allocator::free_frames_count(), before + 1);
        }
    }
}
