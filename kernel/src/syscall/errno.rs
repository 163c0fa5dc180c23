//! `KernelError` → negative-errno collapse.
//!
//! The single point where the kernel's rich internal error taxonomy gets
//! flattened into the one `i64` a syscall handler can return across the
//! gateway. Numeric values follow the usual POSIX assignment so a libc built
//! against this kernel doesn't need a private errno table.

use crate::error::{FsError, KernelError, SchedError, SyscallError};

pub const EPERM: i64 = 1;
pub const ENOENT: i64 = 2;
pub const ESRCH: i64 = 3;
pub const EIO: i64 = 5;
pub const EBADF: i64 = 9;
pub const EAGAIN: i64 = 11;
pub const ENOMEM: i64 = 12;
pub const EACCES: i64 = 13;
pub const EFAULT: i64 = 14;
pub const EEXIST: i64 = 17;
pub const ENOTDIR: i64 = 20;
pub const EISDIR: i64 = 21;
pub const EINVAL: i64 = 22;
pub const EMFILE: i64 = 24;
pub const EFBIG: i64 = 27;
pub const ENOSPC: i64 = 28;
pub const EPIPE: i64 = 32;
pub const ENOSYS: i64 = 38;
pub const ENOTEMPTY: i64 = 39;

/// Collapse a [`KernelError`] into a negative errno, suitable for returning
/// directly from [`super::dispatch`].
pub fn from_kernel_error(err: KernelError) -> i64 {
    -match err {
        KernelError::OutOfMemory { .. } => ENOMEM,
        KernelError::InvalidAddress { .. } | KernelError::UnmappedMemory { .. } => EFAULT,
        KernelError::TaskNotFound { .. } => ESRCH,
        KernelError::SchedulerError(e) => from_sched_error(e),
        KernelError::SyscallError(e) => from_syscall_error(e),
        KernelError::FsError(e) => from_fs_error(e),
        KernelError::HardwareError { .. } => EIO,
        KernelError::InvalidArgument { .. } => EINVAL,
        KernelError::OperationNotSupported { .. } | KernelError::NotImplemented { .. } => ENOSYS,
        KernelError::ResourceExhausted { .. } => EMFILE,
        KernelError::PermissionDenied { .. } => EACCES,
        KernelError::AlreadyExists { .. } => EEXIST,
        KernelError::NotFound { .. } => ENOENT,
        KernelError::WouldBlock => EAGAIN,
        KernelError::BrokenPipe => EPIPE,
        KernelError::NotInitialized { .. } => EIO,
        KernelError::LegacyError { .. } => EIO,
    }
}

fn from_sched_error(err: SchedError) -> i64 {
    match err {
        SchedError::InvalidPriority { .. } => EINVAL,
        SchedError::TaskNotFound { .. } => ESRCH,
        SchedError::TableFull => EMFILE,
        SchedError::QueueEmpty => EAGAIN,
    }
}

fn from_syscall_error(err: SyscallError) -> i64 {
    match err {
        SyscallError::InvalidSyscall { .. } => ENOSYS,
        SyscallError::InvalidArgument { .. } => EINVAL,
        SyscallError::InvalidPointer { .. } => EFAULT,
        SyscallError::BufferTooSmall { .. } => EINVAL,
        SyscallError::NotImplemented => ENOSYS,
    }
}

fn from_fs_error(err: FsError) -> i64 {
    match err {
        FsError::NotFound => ENOENT,
        FsError::AlreadyExists => EEXIST,
        FsError::PermissionDenied => EACCES,
        FsError::NotADirectory => ENOTDIR,
        FsError::NotAFile | FsError::IsADirectory => EISDIR,
        FsError::ReadOnly => EACCES,
        FsError::InvalidPath => EINVAL,
        FsError::NoRootFs | FsError::NotMounted => EIO,
        FsError::AlreadyMounted => EEXIST,
        FsError::UnknownFsType => EINVAL,
        FsError::IoError => EIO,
        FsError::DirectoryNotEmpty => ENOTEMPTY,
        FsError::TooManyOpenFiles => EMFILE,
        FsError::BadFileDescriptor => EBADF,
        FsError::NotSupported => ENOSYS,
        FsError::FileTooLarge => EFBIG,
        FsError::NoSpace => ENOSPC,
        FsError::CorruptFilesystem => EIO,
    }
}

/// Collapse a `&'static str` VFS error (the legacy string-error surface
/// `fs::Vfs` still returns on most paths) into a negative errno.
pub fn from_fs_str(err: &'static str) -> i64 {
    -match err {
        "path not found" | "no such file or directory" => ENOENT,
        "already exists" | "already mounted" => EEXIST,
        "not a directory" => ENOTDIR,
        "is a directory" => EISDIR,
        "not empty" | "directory not empty" => ENOTEMPTY,
        "read-only filesystem" | "permission denied" => EACCES,
        "no root filesystem mounted" => EIO,
        _ => EIO,
    }
}
