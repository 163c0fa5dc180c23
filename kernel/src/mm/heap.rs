//! Kernel heap.
//!
//! Backs `#[global_allocator]` with a fixed static byte array handed to the
//! arch-appropriate allocator (`linked_list_allocator` on x86_64, the bump
//! allocator in [`crate::simple_alloc_unsafe`] on aarch64) exactly once
//! during boot.

pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

/// Initialize the kernel heap. Must run after [`super::vmm::vm_init`] (the
/// heap region needs to be mapped and writable) and before any `alloc`ing
/// subsystem starts up.
pub fn init() {
    // SAFETY: called exactly once, before any other code takes a reference
    // into HEAP_MEMORY; the pointer and length describe that same array.
    let (heap_start, heap_size) = unsafe {
        let start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
        (start, HEAP_SIZE)
    };

    #[cfg(target_os = "none")]
    unsafe {
        crate::get_allocator().lock().init(heap_start, heap_size);
    }

    crate::kprintln!(
        "[HEAP] initialized {} KiB at {:p}",
        heap_size / 1024,
        heap_start
    );
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::{boxed::Box, vec::Vec};

    #[test]
    fn heap_allocation_works() {
        let x = Box::new(42);
        assert_eq!(*x, 42);

        let mut v = Vec::new();
        for i in 0..100 {
            v.push(i);
        }
        assert_eq!(v.len(), 100);
    }
}
