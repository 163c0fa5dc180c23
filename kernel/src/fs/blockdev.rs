//! Block device registry and buffer cache (C8).
//!
//! Every filesystem that needs storage below the VFS line goes through
//! here rather than touching a device directly: [`block_register`] names a
//! device, [`block_read`]/[`block_write`] transfer whole blocks to/from it,
//! and a fixed 32-entry pinned buffer cache sits in front so repeatedly
//! touched blocks (a superblock, a bitmap, an inode-table block) don't
//! round-trip to the backing store on every access.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{FsError, KernelError, KernelResult};
use crate::sync::GlobalState;

/// Fixed block size every device and the buffer cache operate in.
pub const BLOCK_SIZE: usize = 4096;

/// Number of pinned buffers the cache holds at once.
pub const BUFFER_CACHE_SIZE: usize = 32;

/// A named block-addressable storage device.
pub trait BlockDevice: Send {
    fn name(&self) -> &str;
    fn block_count(&self) -> u64;
    /// Whether the device rejects writes outright.
    fn read_only(&self) -> bool {
        false
    }
    fn read_block(&self, block: u64, out: &mut [u8; BLOCK_SIZE]) -> KernelResult<()>;
    fn write_block(&mut self, block: u64, data: &[u8; BLOCK_SIZE]) -> KernelResult<()>;
}

/// RAM-backed block device. Stands in for persistent storage in a kernel
/// that only targets in-memory-backed filesystems.
pub struct RamBlockDevice {
    name: String,
    blocks: Vec<[u8; BLOCK_SIZE]>,
}

impl RamBlockDevice {
    pub fn new(name: &str, block_count: u64) -> Self {
        Self {
            name: name.to_string(),
            blocks: vec![[0u8; BLOCK_SIZE]; block_count as usize],
        }
    }
}

impl BlockDevice for RamBlockDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn read_block(&self, block: u64, out: &mut [u8; BLOCK_SIZE]) -> KernelResult<()> {
        let slot = self.blocks.get(block as usize).ok_or(KernelError::InvalidArgument {
            name: "block",
            value: "out of range",
        })?;
        out.copy_from_slice(slot);
        Ok(())
    }

    fn write_block(&mut self, block: u64, data: &[u8; BLOCK_SIZE]) -> KernelResult<()> {
        let slot = self.blocks.get_mut(block as usize).ok_or(KernelError::InvalidArgument {
            name: "block",
            value: "out of range",
        })?;
        slot.copy_from_slice(data);
        Ok(())
    }
}

static REGISTRY: GlobalState<Mutex<BTreeMap<String, Box<dyn BlockDevice>>>> = GlobalState::new();

struct CacheSlot {
    device: String,
    block: u64,
    data: [u8; BLOCK_SIZE],
    dirty: bool,
    refcount: usize,
}

struct BufferCache {
    slots: Vec<Option<CacheSlot>>,
}

impl BufferCache {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(BUFFER_CACHE_SIZE);
        slots.resize_with(BUFFER_CACHE_SIZE, || None);
        Self { slots }
    }

    fn find(&self, device: &str, block: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.device == device && s.block == block))
    }

    /// A free slot, or the first unpinned (refcount == 0) one to evict.
    fn victim(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_none())
            .or_else(|| self.slots.iter().position(|slot| slot.as_ref().is_some_and(|s| s.refcount == 0)))
    }
}

static CACHE: GlobalState<Mutex<BufferCache>> = GlobalState::new();

/// Bring up the registry and buffer cache. Called once from `fs::init()`.
pub fn init() {
    let _ = REGISTRY.init(Mutex::new(BTreeMap::new()));
    let _ = CACHE.init(Mutex::new(BufferCache::new()));
}

fn not_initialized() -> KernelError {
    KernelError::NotInitialized { subsystem: "block" }
}

/// Register a block device under its own name. Fails if the name is taken.
pub fn block_register(device: Box<dyn BlockDevice>) -> KernelResult<()> {
    REGISTRY
        .with(|registry| {
            let name = device.name().to_string();
            let mut map = registry.lock();
            if map.contains_key(&name) {
                return Err(KernelError::AlreadyExists { resource: "block device", id: 0 });
            }
            map.insert(name, device);
            Ok(())
        })
        .ok_or_else(not_initialized)?
}

fn check_range(count: u64, first_block: u64, blocks: u64) -> KernelResult<()> {
    if blocks == 0 || first_block.checked_add(blocks).is_none_or(|end| end > count) {
        return Err(KernelError::InvalidArgument {
            name: "first_block/count",
            value: "out of range",
        });
    }
    Ok(())
}

/// Read `count` consecutive blocks starting at `first_block` into `out`,
/// which must be exactly `count * BLOCK_SIZE` bytes. Fails `-EINVAL` if the
/// range or buffer size is wrong, `-EIO` if the backing store reports a
/// failure.
pub fn block_read(device: &str, first_block: u64, count: u64, out: &mut [u8]) -> KernelResult<()> {
    if out.len() != count as usize * BLOCK_SIZE {
        return Err(KernelError::InvalidArgument {
            name: "out",
            value: "buffer size does not match count * BLOCK_SIZE",
        });
    }
    REGISTRY
        .with(|registry| {
            let map = registry.lock();
            let dev = map.get(device).ok_or(KernelError::FsError(FsError::NotFound))?;
            check_range(dev.block_count(), first_block, count)?;
            for i in 0..count {
                let mut block = [0u8; BLOCK_SIZE];
                dev.read_block(first_block + i, &mut block).map_err(|_| KernelError::FsError(FsError::IoError))?;
                let start = i as usize * BLOCK_SIZE;
                out[start..start + BLOCK_SIZE].copy_from_slice(&block);
            }
            Ok(())
        })
        .ok_or_else(not_initialized)?
}

/// Write `count` consecutive blocks starting at `first_block` from `data`,
/// which must be exactly `count * BLOCK_SIZE` bytes. Fails `-EACCES` if the
/// device is read-only (the closest existing variant to a capability
/// mismatch), `-EINVAL` on a bad range, `-EIO` on a backing-store failure.
pub fn block_write(device: &str, first_block: u64, count: u64, data: &[u8]) -> KernelResult<()> {
    if data.len() != count as usize * BLOCK_SIZE {
        return Err(KernelError::InvalidArgument {
            name: "data",
            value: "buffer size does not match count * BLOCK_SIZE",
        });
    }
    REGISTRY
        .with(|registry| {
            let mut map = registry.lock();
            let dev = map.get_mut(device).ok_or(KernelError::FsError(FsError::NotFound))?;
            check_range(dev.block_count(), first_block, count)?;
            if dev.read_only() {
                return Err(KernelError::PermissionDenied {
                    operation: "write to read-only block device",
                });
            }
            for i in 0..count {
                let mut block = [0u8; BLOCK_SIZE];
                let start = i as usize * BLOCK_SIZE;
                block.copy_from_slice(&data[start..start + BLOCK_SIZE]);
                dev.write_block(first_block + i, &block).map_err(|_| KernelError::FsError(FsError::IoError))?;
            }
            Ok(())
        })
        .ok_or_else(not_initialized)?
}

fn writeback(slot: &mut CacheSlot) -> KernelResult<()> {
    if slot.dirty {
        block_write(&slot.device, slot.block, 1, &slot.data)?;
        slot.dirty = false;
    }
    Ok(())
}

/// Pin a block in the cache, loading it from the device if not already
/// resident. Must be matched with [`buffer_put`].
pub fn buffer_get(device: &str, block: u64) -> KernelResult<()> {
    let need_load = CACHE
        .with_mut(|cache| {
            let mut cache = cache.lock();
            if let Some(idx) = cache.find(device, block) {
                cache.slots[idx].as_mut().unwrap().refcount += 1;
                return Ok(false);
            }
            let idx = cache.victim().ok_or(KernelError::ResourceExhausted { resource: "buffer cache" })?;
            if let Some(evicted) = cache.slots[idx].as_mut() {
                writeback(evicted)?;
            }
            cache.slots[idx] = Some(CacheSlot {
                device: device.to_string(),
                block,
                data: [0u8; BLOCK_SIZE],
                dirty: false,
                refcount: 1,
            });
            Ok(true)
        })
        .ok_or_else(not_initialized)??;

    if need_load {
        let mut data = [0u8; BLOCK_SIZE];
        block_read(device, block, 1, &mut data)?;
        CACHE
            .with_mut(|cache| {
                let mut cache = cache.lock();
                let idx = cache.find(device, block).expect("buffer just inserted");
                cache.slots[idx].as_mut().unwrap().data = data;
            })
            .ok_or_else(not_initialized)?;
    }
    Ok(())
}

/// Copy a pinned buffer's contents out. The buffer must already be pinned
/// via [`buffer_get`].
pub fn buffer_read(device: &str, block: u64, out: &mut [u8; BLOCK_SIZE]) -> KernelResult<()> {
    CACHE
        .with(|cache| {
            let cache = cache.lock();
            let idx = cache.find(device, block).ok_or(KernelError::FsError(FsError::NotFound))?;
            out.copy_from_slice(&cache.slots[idx].as_ref().unwrap().data);
            Ok(())
        })
        .ok_or_else(not_initialized)?
}

/// Overwrite a pinned buffer's contents and mark it dirty. The buffer must
/// already be pinned via [`buffer_get`]; the write-back happens when the
/// refcount drops to zero in [`buffer_put`], or eagerly via
/// [`buffer_sync_all`].
pub fn buffer_write(device: &str, block: u64, data: &[u8; BLOCK_SIZE]) -> KernelResult<()> {
    CACHE
        .with_mut(|cache| {
            let mut cache = cache.lock();
            let idx = cache.find(device, block).ok_or(KernelError::FsError(FsError::NotFound))?;
            let slot = cache.slots[idx].as_mut().unwrap();
            slot.data.copy_from_slice(data);
            slot.dirty = true;
            Ok(())
        })
        .ok_or_else(not_initialized)?
}

/// Release a reference taken by [`buffer_get`]. Writes the buffer back to
/// its device once the refcount reaches zero and it's dirty.
pub fn buffer_put(device: &str, block: u64) -> KernelResult<()> {
    let mut pending_writeback = None;
    CACHE
        .with_mut(|cache| -> KernelResult<()> {
            let mut cache = cache.lock();
            let idx = cache.find(device, block).ok_or(KernelError::FsError(FsError::NotFound))?;
            let slot = cache.slots[idx].as_mut().unwrap();
            slot.refcount = slot.refcount.saturating_sub(1);
            if slot.refcount == 0 && slot.dirty {
                pending_writeback = Some((slot.device.clone(), slot.block, slot.data));
            }
            Ok(())
        })
        .ok_or_else(not_initialized)??;

    if let Some((dev, blk, data)) = pending_writeback {
        block_write(&dev, blk, 1, &data)?;
        CACHE.with_mut(|cache| {
            let mut cache = cache.lock();
            if let Some(idx) = cache.find(&dev, blk) {
                cache.slots[idx].as_mut().unwrap().dirty = false;
            }
        });
    }
    Ok(())
}

/// Flush every dirty buffer to its backing device, regardless of pin state.
pub fn buffer_sync_all() -> KernelResult<()> {
    let dirty: Vec<(String, u64, [u8; BLOCK_SIZE])> = CACHE
        .with(|cache| {
            let cache = cache.lock();
            cache
                .slots
                .iter()
                .flatten()
                .filter(|s| s.dirty)
                .map(|s| (s.device.clone(), s.block, s.data))
                .collect()
        })
        .ok_or_else(not_initialized)?;

    for (dev, blk, data) in &dirty {
        block_write(dev, *blk, 1, data)?;
    }

    CACHE.with_mut(|cache| {
        for slot in cache.slots.iter_mut().flatten() {
            if slot.dirty {
                slot.dirty = false;
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_register_read_write() {
        init();
        block_register(Box::new(RamBlockDevice::new("test0", 4))).unwrap();
        let data = [7u8; BLOCK_SIZE];
        block_write("test0", 1, 1, &data).unwrap();
        let mut out = [0u8; BLOCK_SIZE];
        block_read("test0", 1, 1, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test_case]
    fn test_out_of_range_is_einval() {
        init();
        block_register(Box::new(RamBlockDevice::new("test1", 2))).unwrap();
        let data = [0u8; BLOCK_SIZE];
        assert!(block_write("test1", 5, 1, &data).is_err());
    }

    #[test_case]
    fn test_buffer_cache_roundtrip() {
        init();
        block_register(Box::new(RamBlockDevice::new("test2", 4))).unwrap();
        buffer_get("test2", 0).unwrap();
        buffer_write("test2", 0, &[3u8; BLOCK_SIZE]).unwrap();
        buffer_put("test2", 0).unwrap();

        let mut out = [0u8; BLOCK_SIZE];
        block_read("test2", 0, 1, &mut out).unwrap();
        assert_eq!(out, [3u8; BLOCK_SIZE]);
    }
}
