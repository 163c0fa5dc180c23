//! Synchronization primitives.
//!
//! Safe global state management plus the interrupt-disable critical section
//! used to protect data shared between task context and interrupt context.

pub mod once_lock;

pub use once_lock::{GlobalState, LazyLock, OnceLock};

/// An interrupt-disable critical section.
///
/// Wraps [`crate::arch::disable_interrupts`]: interrupts are disabled for as
/// long as the guard is alive and restored to whatever state they were in
/// beforehand when it is dropped. Combined with a `spin::Mutex`, this is
/// what realizes the "interrupts-off critical section" used to protect
/// kernel state that both task context and interrupt handlers touch (the
/// scheduler ready queue, the buffer cache, the VFS mount table).
///
/// ```ignore
/// let _guard = CriticalSection::enter();
/// // interrupts are off here
/// ```
pub struct CriticalSection {
    _inner: CriticalSectionInner,
}

#[cfg(target_arch = "x86_64")]
type CriticalSectionInner = crate::arch::x86_64::InterruptGuard;

#[cfg(target_arch = "aarch64")]
type CriticalSectionInner = crate::arch::aarch64::InterruptGuard;

impl CriticalSection {
    /// Enter a critical section, disabling interrupts until the returned
    /// guard is dropped.
    pub fn enter() -> Self {
        Self {
            _inner: crate::arch::disable_interrupts(),
        }
    }
}
