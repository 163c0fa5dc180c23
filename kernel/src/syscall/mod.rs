//! System call gateway (C7).
//!
//! One dispatch table, one calling convention: `dispatch(number, a0..a5)`
//! takes six register-sized arguments regardless of how many a given call
//! actually uses, and returns an `i64` that is either a non-negative result
//! or `-errno`. [`crate::trap::handle_trap`] is the only caller; it already
//! classifies the trap as a syscall and hands the six saved argument
//! registers straight through.
//!
//! This kernel runs everything in one address space (see the crate's
//! non-goals on user/kernel isolation), so pointer arguments are ordinary
//! kernel pointers, dereferenced directly rather than copied across a
//! privilege boundary.

pub mod errno;

use alloc::sync::Arc;

use spin::Mutex;

use crate::error::KernelError;
use crate::fs::{self, DirEntry as VfsDirEntry, File, OpenFlags, SeekFrom};
use crate::sched::{self, Priority, TaskId};
use crate::sync::once_lock::GlobalState;

/// Syscall numbers, in the order `SPEC_FULL.md` lists them.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNumber {
    Exit = 0,
    Yield = 1,
    Read = 2,
    Write = 3,
    Open = 4,
    Close = 5,
    Seek = 6,
    GetPid = 7,
    SleepUs = 8,
    Spawn = 9,
    Wait = 10,
    GetCwd = 11,
    Chdir = 12,
    Stat = 13,
    ReadDir = 14,
    Mkdir = 15,
    Unlink = 16,
    Rmdir = 17,
}

impl SyscallNumber {
    fn from_usize(n: usize) -> Option<Self> {
        use SyscallNumber::*;
        Some(match n {
            0 => Exit,
            1 => Yield,
            2 => Read,
            3 => Write,
            4 => Open,
            5 => Close,
            6 => Seek,
            7 => GetPid,
            8 => SleepUs,
            9 => Spawn,
            10 => Wait,
            11 => GetCwd,
            12 => Chdir,
            13 => Stat,
            14 => ReadDir,
            15 => Mkdir,
            16 => Unlink,
            17 => Rmdir,
            _ => return None,
        })
    }
}

/// Mirrors [`fs::Metadata`] in a fixed, C-layout shape a caller can write
/// straight into a buffer with no serialization step.
#[repr(C)]
pub struct Stat {
    pub node_type: u8,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub created: u64,
    pub modified: u64,
    pub accessed: u64,
}

/// Mirrors [`VfsDirEntry`] in a fixed, C-layout shape.
#[repr(C)]
pub struct RawDirEntry {
    pub name: [u8; 256],
    pub name_len: u8,
    pub node_type: u8,
    pub inode: u64,
}

enum OpenNode {
    File(Arc<File>),
    Dir { node: Arc<dyn fs::VfsNode>, cursor: usize },
}

const MAX_OPEN_FILES: usize = 128;

struct OpenFileTable {
    slots: [Option<OpenNode>; MAX_OPEN_FILES],
}

impl OpenFileTable {
    const fn new() -> Self {
        const NONE: Option<OpenNode> = None;
        Self { slots: [NONE; MAX_OPEN_FILES] }
    }

    fn insert(&mut self, node: OpenNode) -> Option<usize> {
        let fd = self.slots.iter().position(|s| s.is_none())?;
        self.slots[fd] = Some(node);
        Some(fd)
    }
}

static OPEN_FILES: GlobalState<Mutex<OpenFileTable>> = GlobalState::new();

pub fn init() {
    let _ = OPEN_FILES.init(Mutex::new(OpenFileTable::new()));
}

fn with_open_files<R>(f: impl FnOnce(&mut OpenFileTable) -> R) -> Result<R, i64> {
    OPEN_FILES.with_mut(f).ok_or(-errno::EIO)
}

/// Dispatch a single syscall. Unknown numbers return `-ENOSYS`, matching
/// every other unhandled-case convention in this kernel.
pub fn dispatch(number: usize, a0: usize, a1: usize, a2: usize, a3: usize, a4: usize, a5: usize) -> i64 {
    let Some(nr) = SyscallNumber::from_usize(number) else {
        return -errno::ENOSYS;
    };
    match nr {
        SyscallNumber::Exit => sys_exit(a0 as i32),
        SyscallNumber::Yield => sys_yield(),
        SyscallNumber::Read => sys_read(a0, a1, a2),
        SyscallNumber::Write => sys_write(a0, a1, a2),
        SyscallNumber::Open => sys_open(a0, a1 as u32, a2 as u32),
        SyscallNumber::Close => sys_close(a0),
        SyscallNumber::Seek => sys_seek(a0, a1 as isize, a2),
        SyscallNumber::GetPid => sys_getpid(),
        SyscallNumber::SleepUs => sys_sleep_us(a0 as u64),
        SyscallNumber::Spawn => sys_spawn(a0, a1),
        SyscallNumber::Wait => sys_wait(a0, a1),
        SyscallNumber::GetCwd => sys_getcwd(a0, a1),
        SyscallNumber::Chdir => sys_chdir(a0),
        SyscallNumber::Stat => sys_stat(a0, a1),
        SyscallNumber::ReadDir => sys_readdir(a0, a1, a2),
        SyscallNumber::Mkdir => sys_mkdir(a0, a1 as u32),
        SyscallNumber::Unlink => sys_unlink(a0),
        SyscallNumber::Rmdir => sys_rmdir(a0),
    }
}

// --- pointer helpers -------------------------------------------------------

/// # Safety
/// `ptr`/`len` must describe memory the caller is entitled to read; this
/// kernel runs every task in one address space, so there is no further
/// privilege check to perform here.
unsafe fn read_buf<'a>(ptr: usize, len: usize) -> &'a [u8] {
    unsafe { core::slice::from_raw_parts(ptr as *const u8, len) }
}

unsafe fn write_buf<'a>(ptr: usize, len: usize) -> &'a mut [u8] {
    unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) }
}

fn read_path(ptr: usize) -> Result<&'static str, i64> {
    if ptr == 0 {
        return Err(-errno::EFAULT);
    }
    let bytes = unsafe { read_buf(ptr, fs::PATH_MAX) };
    let nul = bytes.iter().position(|&b| b == 0).ok_or(-errno::EINVAL)?;
    core::str::from_utf8(&bytes[..nul]).map_err(|_| -errno::EINVAL)
}

fn kerr(e: KernelError) -> i64 {
    errno::from_kernel_error(e)
}

fn fserr(e: &'static str) -> i64 {
    errno::from_fs_str(e)
}

// --- task operations ---------------------------------------------------

fn sys_exit(code: i32) -> i64 {
    sched::exit(code)
}

fn sys_yield() -> i64 {
    sched::yield_now();
    0
}

fn sys_getpid() -> i64 {
    match sched::current() {
        Some(id) => id.0 as i64,
        None => -errno::ESRCH,
    }
}

fn sys_sleep_us(us: u64) -> i64 {
    let start = crate::arch::timer::timer_now_us();
    while crate::arch::timer::timer_now_us().saturating_sub(start) < us {
        sched::yield_now();
    }
    0
}

fn sys_spawn(entry: usize, arg: usize) -> i64 {
    if entry == 0 {
        return -errno::EFAULT;
    }
    let entry_fn: fn(usize) -> i32 = unsafe { core::mem::transmute(entry) };
    match sched::spawn(entry_fn, arg, "task", Priority::NORMAL) {
        Ok(id) => id.0 as i64,
        Err(e) => kerr(e),
    }
}

fn sys_wait(task_id: usize, out_code: usize) -> i64 {
    match sched::wait(TaskId(task_id as u32)) {
        Ok(code) => {
            if out_code != 0 {
                let out = unsafe { write_buf(out_code, 4) };
                out.copy_from_slice(&code.to_ne_bytes());
            }
            0
        }
        Err(e) => kerr(e),
    }
}

// --- file operations -----------------------------------------------------

fn sys_read(fd: usize, buf: usize, len: usize) -> i64 {
    if buf == 0 {
        return -errno::EFAULT;
    }
    let out = unsafe { write_buf(buf, len) };
    if fd == 0 {
        return 0; // stdin: no input source wired up yet, EOF.
    }
    let result = with_open_files(|t| match t.slots.get(fd).and_then(Option::as_ref) {
        Some(OpenNode::File(file)) => file.read(out).map_err(kerr),
        Some(OpenNode::Dir { .. }) => Err(-errno::EISDIR),
        None => Err(-errno::EBADF),
    });
    match result {
        Ok(Ok(n)) => n as i64,
        Ok(Err(e)) => e,
        Err(e) => e,
    }
}

fn sys_write(fd: usize, buf: usize, len: usize) -> i64 {
    if buf == 0 {
        return -errno::EFAULT;
    }
    let data = unsafe { read_buf(buf, len) };
    if fd == 1 || fd == 2 {
        if let Ok(s) = core::str::from_utf8(data) {
            crate::print!("{}", s);
        }
        return len as i64;
    }
    let result = with_open_files(|t| match t.slots.get(fd).and_then(Option::as_ref) {
        Some(OpenNode::File(file)) => file.write(data).map_err(kerr),
        Some(OpenNode::Dir { .. }) => Err(-errno::EISDIR),
        None => Err(-errno::EBADF),
    });
    match result {
        Ok(Ok(n)) => n as i64,
        Ok(Err(e)) => e,
        Err(e) => e,
    }
}

fn sys_open(path_ptr: usize, flags_bits: u32, _mode: u32) -> i64 {
    let path = match read_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let flags = match OpenFlags::from_bits(flags_bits) {
        Some(f) => f,
        None => return -errno::EINVAL,
    };

    let vfs = fs::get_vfs().read();
    let node = match (vfs.resolve_path(path), flags.create) {
        (Ok(node), _) => node,
        (Err(_), true) => match create_file(&vfs, path) {
            Ok(node) => node,
            Err(e) => return e,
        },
        (Err(e), false) => return fserr(e),
    };

    let open_node = match node.node_type() {
        fs::NodeType::Directory => OpenNode::Dir { node, cursor: 0 },
        _ => OpenNode::File(Arc::new(File::new_with_path(node, flags, alloc::string::String::from(path)))),
    };

    match with_open_files(|t| t.insert(open_node).ok_or(-errno::EMFILE)) {
        Ok(Ok(fd)) => fd as i64,
        Ok(Err(e)) | Err(e) => e,
    }
}

/// Resolve `path`'s parent directory and create `path`'s final component as
/// a regular file, mirroring [`fs::Vfs::mkdir`]'s parent/name split since
/// `Vfs::open` itself never creates anything.
fn create_file(vfs: &fs::Vfs, path: &str) -> Result<Arc<dyn fs::VfsNode>, i64> {
    let (parent_path, name) = match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => return Err(-errno::EINVAL),
    };
    if name.is_empty() {
        return Err(-errno::EISDIR);
    }
    let parent = vfs.resolve_path(parent_path).map_err(fserr)?;
    parent.create(name, fs::Permissions::default()).map_err(fserr)
}

fn sys_close(fd: usize) -> i64 {
    match with_open_files(|t| match t.slots.get_mut(fd) {
        Some(slot) if slot.is_some() => {
            *slot = None;
            Ok(())
        }
        _ => Err(-errno::EBADF),
    }) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) | Err(e) => e,
    }
}

fn sys_seek(fd: usize, offset: isize, whence: usize) -> i64 {
    let from = match whence {
        0 => SeekFrom::Start(offset as usize),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -errno::EINVAL,
    };
    match with_open_files(|t| match t.slots.get(fd).and_then(Option::as_ref) {
        Some(OpenNode::File(file)) => file.seek(from).map_err(kerr),
        Some(OpenNode::Dir { .. }) => Err(-errno::EISDIR),
        None => Err(-errno::EBADF),
    }) {
        Ok(Ok(pos)) => pos as i64,
        Ok(Err(e)) => e,
        Err(e) => e,
    }
}

// --- directory / path operations -----------------------------------------

fn sys_getcwd(buf: usize, len: usize) -> i64 {
    if buf == 0 {
        return -errno::EFAULT;
    }
    let vfs = fs::get_vfs().read();
    let cwd = vfs.get_cwd();
    if cwd.len() + 1 > len {
        return -errno::EINVAL;
    }
    let out = unsafe { write_buf(buf, len) };
    out[..cwd.len()].copy_from_slice(cwd.as_bytes());
    out[cwd.len()] = 0;
    cwd.len() as i64
}

fn sys_chdir(path_ptr: usize) -> i64 {
    let path = match read_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let mut vfs = fs::get_vfs().write();
    match vfs.resolve_path(path) {
        Ok(node) if node.node_type() != fs::NodeType::Directory => return -errno::ENOTDIR,
        Err(e) => return fserr(e),
        Ok(_) => {}
    }
    match vfs.set_cwd(alloc::string::String::from(path)) {
        Ok(()) => 0,
        Err(e) => fserr(e),
    }
}

fn sys_stat(path_ptr: usize, out_ptr: usize) -> i64 {
    let path = match read_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e,
    };
    if out_ptr == 0 {
        return -errno::EFAULT;
    }
    let vfs = fs::get_vfs().read();
    let node = match vfs.resolve_path(path) {
        Ok(n) => n,
        Err(e) => return fserr(e),
    };
    let meta = match node.metadata() {
        Ok(m) => m,
        Err(e) => return fserr(e),
    };
    let out = unsafe { write_buf(out_ptr, core::mem::size_of::<Stat>()) };
    let stat = Stat {
        node_type: meta.node_type as u8,
        size: meta.size as u64,
        uid: meta.uid,
        gid: meta.gid,
        created: meta.created,
        modified: meta.modified,
        accessed: meta.accessed,
    };
    out.copy_from_slice(unsafe {
        core::slice::from_raw_parts((&stat as *const Stat).cast::<u8>(), core::mem::size_of::<Stat>())
    });
    0
}

fn sys_readdir(fd: usize, out_ptr: usize, max_entries: usize) -> i64 {
    if out_ptr == 0 {
        return -errno::EFAULT;
    }
    let result = with_open_files(|t| match t.slots.get_mut(fd) {
        Some(Some(OpenNode::Dir { node, cursor })) => {
            let entries = node.readdir().map_err(fserr)?;
            let start = *cursor;
            let n = entries.len().saturating_sub(start).min(max_entries);
            *cursor += n;
            Ok((entries, start, n))
        }
        Some(Some(OpenNode::File(_))) => Err(-errno::ENOTDIR),
        _ => Err(-errno::EBADF),
    });
    let (entries, start, n) = match result {
        Ok(Ok(v)) => v,
        Ok(Err(e)) | Err(e) => return e,
    };
    let out = unsafe {
        core::slice::from_raw_parts_mut(out_ptr as *mut RawDirEntry, max_entries.min(n))
    };
    for i in 0..n {
        let entry: &VfsDirEntry = &entries[start + i];
        let mut raw = RawDirEntry {
            name: [0; 256],
            name_len: entry.name.len().min(255) as u8,
            node_type: entry.node_type as u8,
            inode: entry.inode,
        };
        let len = raw.name_len as usize;
        raw.name[..len].copy_from_slice(&entry.name.as_bytes()[..len]);
        out[i] = raw;
    }
    n as i64
}

fn sys_mkdir(path_ptr: usize, _mode: u32) -> i64 {
    let path = match read_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let vfs = fs::get_vfs().read();
    match vfs.mkdir(path, fs::Permissions::default()) {
        Ok(()) => 0,
        Err(e) => fserr(e),
    }
}

fn sys_unlink(path_ptr: usize) -> i64 {
    remove_path(path_ptr, false)
}

fn sys_rmdir(path_ptr: usize) -> i64 {
    remove_path(path_ptr, true)
}

fn remove_path(path_ptr: usize, want_dir: bool) -> i64 {
    let path = match read_path(path_ptr) {
        Ok(p) => p,
        Err(e) => return e,
    };
    let vfs = fs::get_vfs().read();
    let is_dir = match vfs.resolve_path(path) {
        Ok(node) => node.node_type() == fs::NodeType::Directory,
        Err(e) => return fserr(e),
    };
    if is_dir != want_dir {
        return if want_dir { -errno::ENOTDIR } else { -errno::EISDIR };
    }
    match vfs.unlink(path) {
        Ok(()) => 0,
        Err(e) => fserr(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_syscall_number_returns_enosys() {
        assert_eq!(dispatch(999, 0, 0, 0, 0, 0, 0), -errno::ENOSYS);
    }

    #[test]
    fn syscall_number_roundtrips() {
        assert_eq!(SyscallNumber::from_usize(0), Some(SyscallNumber::Exit));
        assert_eq!(SyscallNumber::from_usize(17), Some(SyscallNumber::Rmdir));
        assert_eq!(SyscallNumber::from_usize(18), None);
    }
}
