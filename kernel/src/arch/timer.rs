//! Architecture-independent timer interface (C5).
//!
//! Programs the per-architecture periodic timer and tracks monotonic boot
//! time in microseconds from the tick count, independent of the rate the
//! hardware was actually programmed at.

use core::sync::atomic::{AtomicU64, Ordering};

static BOOT_TIME_US: AtomicU64 = AtomicU64::new(0);
static TICK_INTERVAL_US: AtomicU64 = AtomicU64::new(10_000); // 100 Hz default

/// Get current timer tick count.
pub fn get_ticks() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        crate::arch::x86_64::timer::get_ticks()
    }

    #[cfg(target_arch = "aarch64")]
    {
        crate::arch::aarch64::timer::get_ticks()
    }
}

/// Program the periodic timer at `frequency_hz` and install its IRQ handler.
pub fn timer_init(frequency_hz: u32) {
    let interval_us = 1_000_000 / frequency_hz as u64;
    TICK_INTERVAL_US.store(interval_us, Ordering::Relaxed);
    let interval_ms = (interval_us / 1000).max(1) as u32;

    #[cfg(target_arch = "x86_64")]
    crate::arch::x86_64::timer::setup_timer(interval_ms);

    #[cfg(target_arch = "aarch64")]
    crate::arch::aarch64::timer::setup_timer(interval_ms);
}

/// Monotonic microseconds since boot, derived from the tick interval.
pub fn timer_now_us() -> u64 {
    BOOT_TIME_US.load(Ordering::Relaxed)
}

/// Called by the architecture's timer IRQ handler on every tick: advances
/// boot time and drives the scheduler's tick-based preemption.
pub fn on_tick() {
    BOOT_TIME_US.fetch_add(TICK_INTERVAL_US.load(Ordering::Relaxed), Ordering::Relaxed);
    crate::sched::on_tick();
}
