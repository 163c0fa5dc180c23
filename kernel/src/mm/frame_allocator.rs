//! Physical page allocator (C1).
//!
//! A one-bit-per-frame bitmap over the "usable" spans of the boot memory
//! map; reserved and kernel-image ranges are pre-marked used. Allocation
//! scans from a rotating hint index for the first run of `n` clear bits and
//! advances the hint past it; freeing clears the corresponding bits. Not
//! thread-safe by itself — callers take the allocator's lock, which in
//! practice means entering a [`crate::sync::CriticalSection`] first.

use spin::Mutex;

use crate::boot::{BootInfo, MemoryRegionKind};
use crate::error::{KernelError, KernelResult};
use crate::sync::once_lock::GlobalState;

pub const FRAME_SIZE: usize = 4096;

/// Physical frame number: a physical address divided by [`FRAME_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn from_address(addr: u64) -> Self {
        Self(addr / FRAME_SIZE as u64)
    }

    pub const fn as_address(self) -> u64 {
        self.0 * FRAME_SIZE as u64
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Construct from a raw frame index (not a byte address).
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw frame index (not a byte address); see [`Self::as_address`].
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

const MAX_FRAMES: usize = 1 << 20; // covers 4 GiB of physical address space
const BITMAP_WORDS: usize = MAX_FRAMES / 64;

pub struct BitmapFrameAllocator {
    bitmap: [u64; BITMAP_WORDS],
    total_frames: usize,
    free_frames: usize,
    hint: usize,
}

impl BitmapFrameAllocator {
    const fn new() -> Self {
        Self {
            bitmap: [u64::MAX; BITMAP_WORDS], // everything starts "used" until marked usable
            total_frames: 0,
            free_frames: 0,
            hint: 0,
        }
    }

    fn is_used(&self, frame: usize) -> bool {
        self.bitmap[frame / 64] & (1 << (frame % 64)) != 0
    }

    fn mark_used(&mut self, frame: usize) {
        self.bitmap[frame / 64] |= 1 << (frame % 64);
    }

    fn mark_free(&mut self, frame: usize) {
        self.bitmap[frame / 64] &= !(1 << (frame % 64));
    }

    /// Mark the usable spans of the boot memory map as free, everything else
    /// stays pre-marked used (including spans never reported at all).
    fn load_boot_map(&mut self, info: &BootInfo) {
        for region in info.memory_regions() {
            if region.kind != MemoryRegionKind::Usable {
                continue;
            }
            let start = FrameNumber::from_address(region.base).index();
            let end = FrameNumber::from_address(region.base + region.length).index();
            for frame in start..end.min(MAX_FRAMES) {
                if self.is_used(frame) {
                    self.free_frames += 1;
                }
                self.mark_free(frame);
                self.total_frames = self.total_frames.max(frame + 1);
            }
        }
    }

    /// Reserve a physical range (kernel image, boot stack, ...) so the
    /// allocator never hands it out even though the boot map calls it
    /// usable.
    pub fn reserve_range(&mut self, base: u64, length: u64) {
        let start = FrameNumber::from_address(base).index();
        let end = FrameNumber::from_address(base + length + FRAME_SIZE as u64 - 1).index();
        for frame in start..end.min(MAX_FRAMES) {
            if !self.is_used(frame) {
                self.free_frames = self.free_frames.saturating_sub(1);
            }
            self.mark_used(frame);
        }
    }

    fn find_run(&self, n: usize) -> Option<usize> {
        if n == 0 || self.total_frames == 0 {
            return None;
        }
        let mut start = self.hint % self.total_frames.max(1);
        let mut scanned = 0;
        while scanned < self.total_frames {
            if start + n > self.total_frames {
                start = 0;
            }
            let mut run = 0;
            while run < n && !self.is_used(start + run) {
                run += 1;
            }
            if run == n {
                return Some(start);
            }
            start += run + 1;
            scanned += run + 1;
        }
        None
    }

    pub fn alloc_frames(&mut self, n: usize) -> KernelResult<FrameNumber> {
        if n == 0 {
            return Err(KernelError::InvalidArgument {
                name: "n",
                value: "zero",
            });
        }
        if n > self.free_frames {
            return Err(KernelError::OutOfMemory {
                requested: n * FRAME_SIZE,
                available: self.free_frames * FRAME_SIZE,
            });
        }
        let start = self.find_run(n).ok_or(KernelError::OutOfMemory {
            requested: n * FRAME_SIZE,
            available: self.free_frames * FRAME_SIZE,
        })?;
        for frame in start..start + n {
            self.mark_used(frame);
        }
        self.free_frames -= n;
        self.hint = start + n;
        Ok(FrameNumber(start as u64))
    }

    pub fn alloc_frame(&mut self) -> KernelResult<FrameNumber> {
        self.alloc_frames(1)
    }

    /// Free one previously allocated frame. Freeing an address this
    /// allocator did not hand out, or double-freeing it, is a programmer
    /// error; we detect the double-free case and report it rather than
    /// corrupting the bitmap.
    pub fn free_frame(&mut self, frame: FrameNumber) -> KernelResult<()> {
        let idx = frame.index();
        if idx >= self.total_frames || !self.is_used(idx) {
            return Err(KernelError::InvalidArgument {
                name: "frame",
                value: "double_free_or_unowned",
            });
        }
        self.mark_free(idx);
        self.free_frames += 1;
        Ok(())
    }

    pub fn free_frames_count(&self) -> usize {
        self.free_frames
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }
}

static FRAME_ALLOCATOR: GlobalState<Mutex<BitmapFrameAllocator>> = GlobalState::new();

/// Initialize the frame allocator from the validated boot info. `reserved`
/// is a list of `(base, length)` ranges (kernel image, boot stacks, ...)
/// excluded from allocation even though the boot map reports them usable.
pub fn init(info: &BootInfo, reserved: &[(u64, u64)]) -> KernelResult<()> {
    let mut allocator = BitmapFrameAllocator::new();
    allocator.load_boot_map(info);
    for &(base, length) in reserved {
        allocator.reserve_range(base, length);
    }
    FRAME_ALLOCATOR
        .init(Mutex::new(allocator))
        .map_err(|_| KernelError::NotInitialized {
            subsystem: "frame_allocator",
        })
}

fn not_initialized() -> KernelError {
    KernelError::NotInitialized {
        subsystem: "frame_allocator",
    }
}

pub fn alloc_frame() -> KernelResult<FrameNumber> {
    let _guard = crate::sync::CriticalSection::enter();
    match FRAME_ALLOCATOR.with_mut(|mtx| mtx.lock().alloc_frame()) {
        Some(r) => r,
        None => Err(not_initialized()),
    }
}

pub fn alloc_frames(n: usize) -> KernelResult<FrameNumber> {
    let _guard = crate::sync::CriticalSection::enter();
    match FRAME_ALLOCATOR.with_mut(|mtx| mtx.lock().alloc_frames(n)) {
        Some(r) => r,
        None => Err(not_initialized()),
    }
}

pub fn free_frame(frame: FrameNumber) -> KernelResult<()> {
    let _guard = crate::sync::CriticalSection::enter();
    match FRAME_ALLOCATOR.with_mut(|mtx| mtx.lock().free_frame(frame)) {
        Some(r) => r,
        None => Err(not_initialized()),
    }
}

pub fn free_frames_count() -> usize {
    FRAME_ALLOCATOR
        .with(|mtx| mtx.lock().free_frames_count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::{ArchTag, MemoryMapEntry};

    fn single_region_allocator(frames: usize) -> BitmapFrameAllocator {
        let mut info = BootInfo::new(ArchTag(0));
        info.push_region(MemoryMapEntry {
            base: 0,
            length: (frames * FRAME_SIZE) as u64,
            kind: MemoryRegionKind::Usable,
        });
        let mut allocator = BitmapFrameAllocator::new();
        allocator.load_boot_map(&info);
        allocator
    }

    #[test_case]
    fn alloc_then_free_conserves_frame_count() {
        let mut allocator = single_region_allocator(16);
        let before = allocator.free_frames_count();
        let f = allocator.alloc_frame().unwrap();
        allocator.free_frame(f).unwrap();
        assert_eq!(allocator.free_frames_count(), before);
    }

    #[test_case]
    fn double_free_is_rejected() {
        let mut allocator = single_region_allocator(4);
        let f = allocator.alloc_frame().unwrap();
        allocator.free_frame(f).unwrap();
        assert!(allocator.free_frame(f).is_err());
    }

    #[test_case]
    fn zero_frame_request_is_invalid_argument() {
        let mut allocator = single_region_allocator(4);
        assert!(matches!(
            allocator.alloc_frames(0),
            Err(KernelError::InvalidArgument { .. })
        ));
    }

    #[test_case]
    fn exhausting_pool_fails_without_partial_effect() {
        let mut allocator = single_region_allocator(2);
        let _a = allocator.alloc_frame().unwrap();
        let _b = allocator.alloc_frame().unwrap();
        let before = allocator.free_frames_count();
        assert!(allocator.alloc_frame().is_err());
        assert_eq!(allocator.free_frames_count(), before);
    }
}
