//! x86_64 boot entry.
//!
//! `bootloader_api` hands control to [`start`] with its own native
//! `BootInfo`, already in long mode with paging and the kernel heap window
//! mapped. This just normalizes that into [`crate::boot::BootInfo`] before
//! handing off to [`crate::kernel_main`].

use bootloader_api::info::MemoryRegionKind as RawKind;
use bootloader_api::BootInfo as RawBootInfo;

use crate::boot::{BootInfo, MemoryMapEntry, MemoryRegionKind, ARCH_X86_64};

bootloader_api::entry_point!(start);

fn start(raw: &'static mut RawBootInfo) -> ! {
    let mut info = BootInfo::new(ARCH_X86_64);

    for region in raw.memory_regions.iter() {
        let kind = match region.kind {
            RawKind::Usable => MemoryRegionKind::Usable,
            _ => MemoryRegionKind::Reserved,
        };
        info.push_region(MemoryMapEntry {
            base: region.start,
            length: region.end.saturating_sub(region.start),
            kind,
        });
    }

    crate::kernel_main(info)
}
