//! SFS: a small on-disk filesystem built on top of the block device layer.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! block 0            superblock
//! block 1            block-usage bitmap (one block, so up to 32768 blocks)
//! block 2..N         inode table (INODES_PER_BLOCK inodes per block)
//! block N..total     data blocks
//! ```
//!
//! Inodes use 12 direct block pointers plus a single indirect block, giving
//! a maximum file size of `(12 + BLOCK_SIZE/4) * BLOCK_SIZE`. Directories
//! store their entries as the ordinary byte content of the directory's own
//! inode, read and written through the same path as file data.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::blockdev::{self, RamBlockDevice, BLOCK_SIZE};
use super::{DirEntry, Filesystem, Metadata, NodeType, Permissions, VfsNode};
use crate::error::{FsError, KernelError, KernelResult};

pub const SFS_MAGIC: u32 = 0x5346_5300; // "SFS\0"
pub const SFS_VERSION: u32 = 1;

const INODE_SIZE: usize = 128;
const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
const DIRECT_POINTERS: usize = 12;
const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / 4;
const BITMAP_BLOCKS: u64 = 1;
const SUPERBLOCK_BLOCK: u64 = 0;
const BITMAP_START: u64 = SUPERBLOCK_BLOCK + 1;
const ROOT_INODE: u32 = 1;

const MODE_FREE: u16 = 0;
const MODE_FILE: u16 = 1;
const MODE_DIR: u16 = 2;

/// Logical clock: no real wall clock exists this deep in the boot sequence,
/// so timestamps are a monotonically increasing tick rather than time of day.
static CLOCK: AtomicU64 = AtomicU64::new(1);

fn tick() -> u64 {
    CLOCK.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Copy)]
struct Superblock {
    magic: u32,
    version: u32,
    total_blocks: u64,
    inode_table_blocks: u32,
    data_start: u64,
    inode_count: u32,
    root_inode: u32,
}

impl Superblock {
    fn to_bytes(self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&(BLOCK_SIZE as u32).to_le_bytes());
        buf[12..20].copy_from_slice(&self.total_blocks.to_le_bytes());
        buf[20..24].copy_from_slice(&self.inode_table_blocks.to_le_bytes());
        buf[24..32].copy_from_slice(&self.data_start.to_le_bytes());
        buf[32..36].copy_from_slice(&self.inode_count.to_le_bytes());
        buf[36..40].copy_from_slice(&self.root_inode.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; BLOCK_SIZE]) -> KernelResult<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != SFS_MAGIC {
            return Err(KernelError::FsError(FsError::CorruptFilesystem));
        }
        Ok(Self {
            magic,
            version: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            total_blocks: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            inode_table_blocks: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            data_start: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            inode_count: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
            root_inode: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
        })
    }
}

#[derive(Clone, Copy)]
struct DiskInode {
    mode: u16,
    link_count: u16,
    size: u64,
    block_count: u32,
    direct: [u32; DIRECT_POINTERS],
    indirect: u32,
    ctime: u64,
    mtime: u64,
    atime: u64,
}

impl DiskInode {
    fn free() -> Self {
        Self {
            mode: MODE_FREE,
            link_count: 0,
            size: 0,
            block_count: 0,
            direct: [0; DIRECT_POINTERS],
            indirect: 0,
            ctime: 0,
            mtime: 0,
            atime: 0,
        }
    }

    fn node_type(&self) -> Option<NodeType> {
        match self.mode {
            MODE_FILE => Some(NodeType::File),
            MODE_DIR => Some(NodeType::Directory),
            _ => None,
        }
    }

    fn write_into(&self, block: &mut [u8; BLOCK_SIZE], offset: usize) {
        let b = &mut block[offset..offset + INODE_SIZE];
        b[0..2].copy_from_slice(&self.mode.to_le_bytes());
        b[2..4].copy_from_slice(&self.link_count.to_le_bytes());
        b[4..8].copy_from_slice(&0u32.to_le_bytes());
        b[8..16].copy_from_slice(&self.size.to_le_bytes());
        b[16..20].copy_from_slice(&self.block_count.to_le_bytes());
        for (i, ptr) in self.direct.iter().enumerate() {
            let start = 20 + i * 4;
            b[start..start + 4].copy_from_slice(&ptr.to_le_bytes());
        }
        b[68..72].copy_from_slice(&self.indirect.to_le_bytes());
        b[72..80].copy_from_slice(&self.ctime.to_le_bytes());
        b[80..88].copy_from_slice(&self.mtime.to_le_bytes());
        b[88..96].copy_from_slice(&self.atime.to_le_bytes());
        b[96..128].fill(0);
    }

    fn read_from(block: &[u8; BLOCK_SIZE], offset: usize) -> Self {
        let b = &block[offset..offset + INODE_SIZE];
        let mut direct = [0u32; DIRECT_POINTERS];
        for (i, slot) in direct.iter_mut().enumerate() {
            let start = 20 + i * 4;
            *slot = u32::from_le_bytes(b[start..start + 4].try_into().unwrap());
        }
        Self {
            mode: u16::from_le_bytes(b[0..2].try_into().unwrap()),
            link_count: u16::from_le_bytes(b[2..4].try_into().unwrap()),
            size: u64::from_le_bytes(b[8..16].try_into().unwrap()),
            block_count: u32::from_le_bytes(b[16..20].try_into().unwrap()),
            direct,
            indirect: u32::from_le_bytes(b[68..72].try_into().unwrap()),
            ctime: u64::from_le_bytes(b[72..80].try_into().unwrap()),
            mtime: u64::from_le_bytes(b[80..88].try_into().unwrap()),
            atime: u64::from_le_bytes(b[88..96].try_into().unwrap()),
        }
    }
}

fn inode_location(inode_no: u32) -> (u64, usize) {
    let index = (inode_no - 1) as usize;
    let block = (2 + index / INODES_PER_BLOCK) as u64;
    let offset = (index % INODES_PER_BLOCK) * INODE_SIZE;
    (block, offset)
}

fn to_str_err(e: KernelError) -> &'static str {
    match e {
        KernelError::FsError(FsError::NotFound) => "not found",
        KernelError::FsError(FsError::NotADirectory) => "not a directory",
        KernelError::FsError(FsError::FileTooLarge) => "file too large",
        KernelError::FsError(FsError::NoSpace) => "no space left on device",
        KernelError::FsError(FsError::AlreadyExists) => "already exists",
        KernelError::FsError(FsError::CorruptFilesystem) => "corrupt filesystem",
        KernelError::ResourceExhausted { .. } => "resource exhausted",
        KernelError::InvalidArgument { .. } => "invalid argument",
        _ => "io error",
    }
}

/// Shared mutable state behind every [`SfsNode`] of one mounted volume.
struct SfsInner {
    device: String,
    sb: Superblock,
}

impl SfsInner {
    fn read_inode(&self, inode_no: u32) -> KernelResult<DiskInode> {
        let (block, offset) = inode_location(inode_no);
        blockdev::buffer_get(&self.device, block)?;
        let mut buf = [0u8; BLOCK_SIZE];
        let result = blockdev::buffer_read(&self.device, block, &mut buf);
        blockdev::buffer_put(&self.device, block)?;
        result?;
        Ok(DiskInode::read_from(&buf, offset))
    }

    fn write_inode(&self, inode_no: u32, inode: &DiskInode) -> KernelResult<()> {
        let (block, offset) = inode_location(inode_no);
        blockdev::buffer_get(&self.device, block)?;
        let mut buf = [0u8; BLOCK_SIZE];
        let read_result = blockdev::buffer_read(&self.device, block, &mut buf);
        if let Err(e) = read_result {
            blockdev::buffer_put(&self.device, block)?;
            return Err(e);
        }
        inode.write_into(&mut buf, offset);
        let write_result = blockdev::buffer_write(&self.device, block, &buf);
        blockdev::buffer_put(&self.device, block)?;
        write_result
    }

    /// Find a free inode slot by scanning the inode table; returns its number.
    fn alloc_inode(&self) -> KernelResult<u32> {
        for inode_no in 1..=self.sb.inode_count {
            if self.read_inode(inode_no)?.mode == MODE_FREE {
                return Ok(inode_no);
            }
        }
        Err(KernelError::FsError(FsError::NoSpace))
    }

    fn bitmap_get(&self, bit: u64) -> KernelResult<bool> {
        let byte = (bit / 8) as usize;
        let mask = 1u8 << (bit % 8);
        blockdev::buffer_get(&self.device, BITMAP_START)?;
        let mut buf = [0u8; BLOCK_SIZE];
        let result = blockdev::buffer_read(&self.device, BITMAP_START, &mut buf);
        blockdev::buffer_put(&self.device, BITMAP_START)?;
        result?;
        Ok(buf[byte] & mask != 0)
    }

    fn bitmap_set(&self, bit: u64, used: bool) -> KernelResult<()> {
        let byte = (bit / 8) as usize;
        let mask = 1u8 << (bit % 8);
        blockdev::buffer_get(&self.device, BITMAP_START)?;
        let mut buf = [0u8; BLOCK_SIZE];
        let read_result = blockdev::buffer_read(&self.device, BITMAP_START, &mut buf);
        if let Err(e) = read_result {
            blockdev::buffer_put(&self.device, BITMAP_START)?;
            return Err(e);
        }
        if used {
            buf[byte] |= mask;
        } else {
            buf[byte] &= !mask;
        }
        let write_result = blockdev::buffer_write(&self.device, BITMAP_START, &buf);
        blockdev::buffer_put(&self.device, BITMAP_START)?;
        write_result
    }

    /// Allocate a free data block, returning its absolute block number.
    fn alloc_block(&self) -> KernelResult<u32> {
        let data_blocks = self.sb.total_blocks - self.sb.data_start;
        for i in 0..data_blocks {
            if !self.bitmap_get(i)? {
                self.bitmap_set(i, true)?;
                return Ok((self.sb.data_start + i) as u32);
            }
        }
        Err(KernelError::FsError(FsError::NoSpace))
    }

    fn free_block(&self, block: u32) -> KernelResult<()> {
        let bit = block as u64 - self.sb.data_start;
        self.bitmap_set(bit, false)
    }

    fn indirect_table(&self, indirect_block: u32) -> KernelResult<[u32; POINTERS_PER_BLOCK]> {
        blockdev::buffer_get(&self.device, indirect_block as u64)?;
        let mut buf = [0u8; BLOCK_SIZE];
        let result = blockdev::buffer_read(&self.device, indirect_block as u64, &mut buf);
        blockdev::buffer_put(&self.device, indirect_block as u64)?;
        result?;
        let mut table = [0u32; POINTERS_PER_BLOCK];
        for (i, slot) in table.iter_mut().enumerate() {
            let start = i * 4;
            *slot = u32::from_le_bytes(buf[start..start + 4].try_into().unwrap());
        }
        Ok(table)
    }

    fn write_indirect_table(&self, indirect_block: u32, table: &[u32; POINTERS_PER_BLOCK]) -> KernelResult<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        for (i, ptr) in table.iter().enumerate() {
            let start = i * 4;
            buf[start..start + 4].copy_from_slice(&ptr.to_le_bytes());
        }
        blockdev::buffer_get(&self.device, indirect_block as u64)?;
        let result = blockdev::buffer_write(&self.device, indirect_block as u64, &buf);
        blockdev::buffer_put(&self.device, indirect_block as u64)?;
        result
    }

    /// Map a file-relative block index to an absolute block number,
    /// allocating the pointer slot (and the indirect block itself, if
    /// needed) when `allocate` is set and the slot is currently empty.
    fn block_for(&self, inode: &mut DiskInode, index: usize, allocate: bool) -> KernelResult<Option<u32>> {
        if index < DIRECT_POINTERS {
            if inode.direct[index] == 0 && allocate {
                inode.direct[index] = self.alloc_block()?;
            }
            return Ok(if inode.direct[index] == 0 { None } else { Some(inode.direct[index]) });
        }

        let indirect_index = index - DIRECT_POINTERS;
        if indirect_index >= POINTERS_PER_BLOCK {
            return Err(KernelError::FsError(FsError::FileTooLarge));
        }

        if inode.indirect == 0 {
            if !allocate {
                return Ok(None);
            }
            inode.indirect = self.alloc_block()?;
            self.write_indirect_table(inode.indirect, &[0u32; POINTERS_PER_BLOCK])?;
        }

        let mut table = self.indirect_table(inode.indirect)?;
        if table[indirect_index] == 0 && allocate {
            table[indirect_index] = self.alloc_block()?;
            self.write_indirect_table(inode.indirect, &table)?;
        }
        Ok(if table[indirect_index] == 0 { None } else { Some(table[indirect_index]) })
    }

    fn read_at(&self, inode_no: u32, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        let mut inode = self.read_inode(inode_no)?;
        let size = inode.size as usize;
        if offset >= size {
            return Ok(0);
        }
        let to_read = buf.len().min(size - offset);
        let mut done = 0;
        while done < to_read {
            let file_offset = offset + done;
            let index = file_offset / BLOCK_SIZE;
            let within = file_offset % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(to_read - done);

            match self.block_for(&mut inode, index, false)? {
                Some(block) => {
                    blockdev::buffer_get(&self.device, block as u64)?;
                    let mut data = [0u8; BLOCK_SIZE];
                    let result = blockdev::buffer_read(&self.device, block as u64, &mut data);
                    blockdev::buffer_put(&self.device, block as u64)?;
                    result?;
                    buf[done..done + chunk].copy_from_slice(&data[within..within + chunk]);
                }
                None => buf[done..done + chunk].fill(0),
            }
            done += chunk;
        }
        inode.atime = tick();
        self.write_inode(inode_no, &inode)?;
        Ok(to_read)
    }

    fn write_at(&self, inode_no: u32, offset: usize, data: &[u8]) -> KernelResult<usize> {
        let mut inode = self.read_inode(inode_no)?;
        let max_size = (DIRECT_POINTERS + POINTERS_PER_BLOCK) * BLOCK_SIZE;
        if offset + data.len() > max_size {
            return Err(KernelError::FsError(FsError::FileTooLarge));
        }

        let mut done = 0;
        while done < data.len() {
            let file_offset = offset + done;
            let index = file_offset / BLOCK_SIZE;
            let within = file_offset % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(data.len() - done);

            let block = self.block_for(&mut inode, index, true)?.expect("allocate=true always yields a block");
            blockdev::buffer_get(&self.device, block as u64)?;
            let mut existing = [0u8; BLOCK_SIZE];
            let read_result = blockdev::buffer_read(&self.device, block as u64, &mut existing);
            if let Err(e) = read_result {
                blockdev::buffer_put(&self.device, block as u64)?;
                return Err(e);
            }
            existing[within..within + chunk].copy_from_slice(&data[done..done + chunk]);
            let write_result = blockdev::buffer_write(&self.device, block as u64, &existing);
            blockdev::buffer_put(&self.device, block as u64)?;
            write_result?;

            done += chunk;
        }

        let new_size = offset + data.len();
        if new_size > inode.size as usize {
            inode.size = new_size as u64;
        }
        inode.mtime = tick();
        self.write_inode(inode_no, &inode)?;
        Ok(done)
    }

    fn truncate(&self, inode_no: u32, new_size: usize) -> KernelResult<()> {
        let mut inode = self.read_inode(inode_no)?;
        let old_blocks = inode.size.div_ceil(BLOCK_SIZE as u64) as usize;
        let new_blocks = (new_size as u64).div_ceil(BLOCK_SIZE as u64) as usize;

        for index in new_blocks..old_blocks {
            if let Some(block) = self.block_for(&mut inode, index, false)? {
                self.free_block(block)?;
                if index < DIRECT_POINTERS {
                    inode.direct[index] = 0;
                } else {
                    let mut table = self.indirect_table(inode.indirect)?;
                    table[index - DIRECT_POINTERS] = 0;
                    self.write_indirect_table(inode.indirect, &table)?;
                }
            }
        }
        if new_blocks <= DIRECT_POINTERS && inode.indirect != 0 {
            self.free_block(inode.indirect)?;
            inode.indirect = 0;
        }

        inode.size = new_size as u64;
        inode.mtime = tick();
        self.write_inode(inode_no, &inode)
    }

    // --- Directory entries, stored as the directory inode's own content ---

    fn readdir_entries(&self, inode_no: u32) -> KernelResult<Vec<(u32, String)>> {
        let size = self.read_inode(inode_no)?.size as usize;
        let mut content = vec![0u8; size];
        self.read_at(inode_no, 0, &mut content)?;

        let mut entries = Vec::new();
        let mut pos = 0;
        while pos + 7 <= content.len() {
            let entry_inode = u32::from_le_bytes(content[pos..pos + 4].try_into().unwrap());
            let record_len = u16::from_le_bytes(content[pos + 4..pos + 6].try_into().unwrap()) as usize;
            let name_len = content[pos + 6] as usize;
            if record_len == 0 || pos + record_len > content.len() {
                break;
            }
            if entry_inode != 0 {
                let name_start = pos + 7;
                let name = String::from_utf8_lossy(&content[name_start..name_start + name_len]).to_string();
                entries.push((entry_inode, name));
            }
            pos += record_len;
        }
        Ok(entries)
    }

    fn lookup_in_dir(&self, dir_inode: u32, name: &str) -> KernelResult<u32> {
        self.readdir_entries(dir_inode)?
            .into_iter()
            .find(|(_, n)| n == name)
            .map(|(ino, _)| ino)
            .ok_or(KernelError::FsError(FsError::NotFound))
    }

    fn append_dirent(&self, dir_inode: u32, name: &str, entry_inode: u32) -> KernelResult<()> {
        let name_bytes = name.as_bytes();
        let record_len = (7 + name_bytes.len()).div_ceil(4) * 4;
        let mut record = vec![0u8; record_len];
        record[0..4].copy_from_slice(&entry_inode.to_le_bytes());
        record[4..6].copy_from_slice(&(record_len as u16).to_le_bytes());
        record[6] = name_bytes.len() as u8;
        record[7..7 + name_bytes.len()].copy_from_slice(name_bytes);

        let size = self.read_inode(dir_inode)?.size as usize;
        self.write_at(dir_inode, size, &record)?;
        Ok(())
    }

    fn remove_dirent(&self, dir_inode: u32, name: &str) -> KernelResult<()> {
        let size = self.read_inode(dir_inode)?.size as usize;
        let mut content = vec![0u8; size];
        self.read_at(dir_inode, 0, &mut content)?;

        let mut pos = 0;
        while pos + 7 <= content.len() {
            let record_len = u16::from_le_bytes(content[pos + 4..pos + 6].try_into().unwrap()) as usize;
            let name_len = content[pos + 6] as usize;
            if record_len == 0 || pos + record_len > content.len() {
                break;
            }
            let name_start = pos + 7;
            if &content[name_start..name_start + name_len] == name.as_bytes() {
                content[pos..pos + 4].copy_from_slice(&0u32.to_le_bytes());
                self.write_at(dir_inode, pos, &content[pos..pos + 4])?;
                return Ok(());
            }
            pos += record_len;
        }
        Err(KernelError::FsError(FsError::NotFound))
    }

    fn create_entry(&self, dir_inode: u32, name: &str, node_type: NodeType) -> KernelResult<u32> {
        if self.lookup_in_dir(dir_inode, name).is_ok() {
            return Err(KernelError::FsError(FsError::AlreadyExists));
        }
        let new_inode_no = self.alloc_inode()?;
        let now = tick();
        let inode = DiskInode {
            mode: if node_type == NodeType::Directory { MODE_DIR } else { MODE_FILE },
            link_count: 1,
            size: 0,
            block_count: 0,
            direct: [0; DIRECT_POINTERS],
            indirect: 0,
            ctime: now,
            mtime: now,
            atime: now,
        };
        self.write_inode(new_inode_no, &inode)?;
        self.append_dirent(dir_inode, name, new_inode_no)?;

        if node_type == NodeType::Directory {
            self.append_dirent(new_inode_no, ".", new_inode_no)?;
            self.append_dirent(new_inode_no, "..", dir_inode)?;
        }
        Ok(new_inode_no)
    }
}

/// A single open node (file or directory) in a mounted SFS volume.
pub struct SfsNode {
    inode_no: u32,
    inner: Arc<SfsInner>,
}

impl VfsNode for SfsNode {
    fn node_type(&self) -> NodeType {
        self.inner
            .read_inode(self.inode_no)
            .ok()
            .and_then(|i| i.node_type())
            .unwrap_or(NodeType::File)
    }

    fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<usize, &'static str> {
        self.inner.read_at(self.inode_no, offset, buffer).map_err(to_str_err)
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<usize, &'static str> {
        self.inner.write_at(self.inode_no, offset, data).map_err(to_str_err)
    }

    fn metadata(&self) -> Result<Metadata, &'static str> {
        let inode = self.inner.read_inode(self.inode_no).map_err(to_str_err)?;
        Ok(Metadata {
            node_type: inode.node_type().ok_or("inode is free")?,
            size: inode.size as usize,
            permissions: Permissions::default(),
            uid: 0,
            gid: 0,
            created: inode.ctime,
            modified: inode.mtime,
            accessed: inode.atime,
        })
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, &'static str> {
        let entries = self.inner.readdir_entries(self.inode_no).map_err(to_str_err)?;
        let mut out = Vec::with_capacity(entries.len());
        for (inode_no, name) in entries {
            let node_type = self
                .inner
                .read_inode(inode_no)
                .ok()
                .and_then(|i| i.node_type())
                .unwrap_or(NodeType::File);
            out.push(DirEntry { name, node_type, inode: inode_no as u64 });
        }
        Ok(out)
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn VfsNode>, &'static str> {
        let inode_no = self.inner.lookup_in_dir(self.inode_no, name).map_err(to_str_err)?;
        Ok(Arc::new(SfsNode { inode_no, inner: self.inner.clone() }))
    }

    fn create(&self, name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        let inode_no = self.inner.create_entry(self.inode_no, name, NodeType::File).map_err(to_str_err)?;
        Ok(Arc::new(SfsNode { inode_no, inner: self.inner.clone() }))
    }

    fn mkdir(&self, name: &str, _permissions: Permissions) -> Result<Arc<dyn VfsNode>, &'static str> {
        let inode_no = self.inner.create_entry(self.inode_no, name, NodeType::Directory).map_err(to_str_err)?;
        Ok(Arc::new(SfsNode { inode_no, inner: self.inner.clone() }))
    }

    fn unlink(&self, name: &str) -> Result<(), &'static str> {
        let inode_no = self.inner.lookup_in_dir(self.inode_no, name).map_err(to_str_err)?;
        let inode = self.inner.read_inode(inode_no).map_err(to_str_err)?;
        if inode.node_type() == Some(NodeType::Directory) {
            let entries = self.inner.readdir_entries(inode_no).map_err(to_str_err)?;
            if entries.iter().any(|(_, n)| n != "." && n != "..") {
                return Err("directory not empty");
            }
        }
        self.inner.remove_dirent(self.inode_no, name).map_err(to_str_err)?;
        self.inner.truncate(inode_no, 0).map_err(to_str_err)?;
        let mut freed = DiskInode::free();
        freed.mode = MODE_FREE;
        self.inner.write_inode(inode_no, &freed).map_err(to_str_err)
    }

    fn truncate(&self, size: usize) -> Result<(), &'static str> {
        self.inner.truncate(self.inode_no, size).map_err(to_str_err)
    }
}

/// An SFS volume mounted into the VFS.
pub struct Sfs {
    inner: Arc<SfsInner>,
}

impl Sfs {
    /// Format (or, if already formatted, attach to) a `total_blocks`-block
    /// volume on a fresh RAM-backed block device registered under `device`.
    pub fn new(device: &str, total_blocks: u64) -> KernelResult<Self> {
        blockdev::init();
        let _ = blockdev::block_register(alloc::boxed::Box::new(RamBlockDevice::new(device, total_blocks)));

        let inode_table_blocks = 16u32; // INODES_PER_BLOCK * 16 inodes, generous for an in-memory volume
        let inode_count = inode_table_blocks * INODES_PER_BLOCK as u32;
        let data_start = BITMAP_START + BITMAP_BLOCKS + inode_table_blocks as u64;

        let sb = Superblock {
            magic: SFS_MAGIC,
            version: SFS_VERSION,
            total_blocks,
            inode_table_blocks,
            data_start,
            inode_count,
            root_inode: ROOT_INODE,
        };

        blockdev::block_write(device, SUPERBLOCK_BLOCK, 1, &sb.to_bytes())?;
        blockdev::block_write(device, BITMAP_START, 1, &[0u8; BLOCK_SIZE])?;
        let zero_inode_block = [0u8; BLOCK_SIZE];
        for block in 0..inode_table_blocks as u64 {
            blockdev::block_write(device, BITMAP_START + BITMAP_BLOCKS + block, 1, &zero_inode_block)?;
        }

        let inner = Arc::new(SfsInner { device: device.to_string(), sb });

        let now = tick();
        let root = DiskInode {
            mode: MODE_DIR,
            link_count: 2,
            size: 0,
            block_count: 0,
            direct: [0; DIRECT_POINTERS],
            indirect: 0,
            ctime: now,
            mtime: now,
            atime: now,
        };
        inner.write_inode(ROOT_INODE, &root)?;
        inner.append_dirent(ROOT_INODE, ".", ROOT_INODE)?;
        inner.append_dirent(ROOT_INODE, "..", ROOT_INODE)?;

        Ok(Self { inner })
    }

    /// Attach to an already-formatted volume, reading its superblock back.
    pub fn open(device: &str) -> KernelResult<Self> {
        let mut buf = [0u8; BLOCK_SIZE];
        blockdev::block_read(device, SUPERBLOCK_BLOCK, 1, &mut buf)?;
        let sb = Superblock::from_bytes(&buf)?;
        Ok(Self { inner: Arc::new(SfsInner { device: device.to_string(), sb }) })
    }
}

impl Filesystem for Sfs {
    fn root(&self) -> Arc<dyn VfsNode> {
        Arc::new(SfsNode { inode_no: self.inner.sb.root_inode, inner: self.inner.clone() })
    }

    fn name(&self) -> &str {
        "sfs"
    }

    fn is_readonly(&self) -> bool {
        false
    }

    fn sync(&self) -> Result<(), &'static str> {
        blockdev::buffer_sync_all().map_err(to_str_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(device: &str) -> Sfs {
        Sfs::new(device, 256).unwrap()
    }

    #[test_case]
    fn test_format_has_root_dir() {
        let sfs = fresh("sfs_test_root");
        let root = sfs.root();
        assert_eq!(root.node_type(), NodeType::Directory);
        let entries = root.readdir().unwrap();
        assert!(entries.iter().any(|e| e.name == "."));
    }

    #[test_case]
    fn test_create_and_read_back_file() {
        let sfs = fresh("sfs_test_file");
        let root = sfs.root();
        let file = root.create("hello.txt", Permissions::default()).unwrap();
        file.write(0, b"hello sfs").unwrap();

        let looked_up = root.lookup("hello.txt").unwrap();
        let mut buf = [0u8; 16];
        let n = looked_up.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello sfs");
    }

    #[test_case]
    fn test_mkdir_and_nested_lookup() {
        let sfs = fresh("sfs_test_dir");
        let root = sfs.root();
        let dir = root.mkdir("sub", Permissions::default()).unwrap();
        dir.create("nested", Permissions::default()).unwrap();

        let sub = root.lookup("sub").unwrap();
        let nested = sub.lookup("nested").unwrap();
        assert_eq!(nested.node_type(), NodeType::File);
    }

    #[test_case]
    fn test_unlink_removes_entry() {
        let sfs = fresh("sfs_test_unlink");
        let root = sfs.root();
        root.create("doomed", Permissions::default()).unwrap();
        root.unlink("doomed").unwrap();
        assert!(root.lookup("doomed").is_err());
    }

    #[test_case]
    fn test_write_spanning_indirect_block() {
        let sfs = Sfs::new("sfs_test_big", 4096).unwrap();
        let root = sfs.root();
        let file = root.create("big", Permissions::default()).unwrap();
        // Past the 12 direct blocks, into the indirect range.
        let offset = 13 * BLOCK_SIZE;
        file.write(offset, b"far").unwrap();
        let mut buf = [0u8; 3];
        file.read(offset, &mut buf).unwrap();
        assert_eq!(&buf, b"far");
    }
}
