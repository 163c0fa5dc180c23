//! Kernel error taxonomy.
//!
//! [`KernelError`] replaces ad hoc `&'static str` errors across the kernel.
//! Subsystem-specific errors (scheduler, filesystem, memory) are nested
//! variants so a `?` chain can flow from a low-level allocator error all
//! the way up to a syscall return value without losing information along
//! the way; [`crate::syscall::errno`] is the single point where a
//! `KernelError` gets collapsed into the negative-errno convention
//! returned across the syscall gateway.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Memory-related errors.
    OutOfMemory { requested: usize, available: usize },
    InvalidAddress { addr: usize },
    UnmappedMemory { addr: usize },

    /// Task/scheduler-related errors.
    TaskNotFound { id: u64 },
    SchedulerError(SchedError),

    /// System call errors.
    SyscallError(SyscallError),

    /// Filesystem-related errors.
    FsError(FsError),

    /// Hardware errors.
    HardwareError { device: &'static str, code: u32 },

    /// Generic errors.
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    OperationNotSupported {
        operation: &'static str,
    },
    ResourceExhausted {
        resource: &'static str,
    },
    PermissionDenied {
        operation: &'static str,
    },
    AlreadyExists {
        resource: &'static str,
        id: u64,
    },
    NotFound {
        resource: &'static str,
        id: u64,
    },
    NotImplemented {
        feature: &'static str,
    },
    /// Operation would block.
    WouldBlock,
    /// Broken pipe: write end closed or read end closed.
    BrokenPipe,
    /// Subsystem not initialized (called before init()).
    NotInitialized { subsystem: &'static str },
    /// Legacy string error for gradual migration from &'static str patterns.
    LegacyError { message: &'static str },
}

/// Scheduler-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    InvalidPriority { priority: u8 },
    TaskNotFound { id: u64 },
    TableFull,
    QueueEmpty,
}

/// System call errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall { nr: usize },
    InvalidArgument { arg: usize },
    InvalidPointer { addr: usize },
    BufferTooSmall { required: usize, provided: usize },
    NotImplemented,
}

/// Filesystem-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    NotADirectory,
    NotAFile,
    IsADirectory,
    ReadOnly,
    InvalidPath,
    NoRootFs,
    AlreadyMounted,
    NotMounted,
    UnknownFsType,
    IoError,
    DirectoryNotEmpty,
    TooManyOpenFiles,
    BadFileDescriptor,
    NotSupported,
    FileTooLarge,
    NoSpace,
    CorruptFilesystem,
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::InvalidAddress { addr } => write!(f, "invalid address: 0x{:x}", addr),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at 0x{:x}", addr),
            Self::TaskNotFound { id } => write!(f, "task {} not found", id),
            Self::SchedulerError(e) => write!(f, "scheduler error: {:?}", e),
            Self::SyscallError(e) => write!(f, "syscall error: {:?}", e),
            Self::HardwareError { device, code } => {
                write!(f, "hardware error on {}: code 0x{:x}", device, code)
            }
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{}': {}", name, value)
            }
            Self::OperationNotSupported { operation } => {
                write!(f, "operation not supported: {}", operation)
            }
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {}", resource),
            Self::PermissionDenied { operation } => {
                write!(f, "permission denied for operation: {}", operation)
            }
            Self::AlreadyExists { resource, id } => {
                write!(f, "{} with id {} already exists", resource, id)
            }
            Self::NotFound { resource, id } => write!(f, "{} with id {} not found", resource, id),
            Self::NotImplemented { feature } => write!(f, "feature not implemented: {}", feature),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::FsError(e) => write!(f, "filesystem error: {:?}", e),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {}", subsystem)
            }
            Self::LegacyError { message } => write!(f, "{}", message),
        }
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::SchedulerError(err)
    }
}

impl From<SyscallError> for KernelError {
    fn from(err: SyscallError) -> Self {
        Self::SyscallError(err)
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::FsError(err)
    }
}

/// Conversion from legacy &'static str errors to KernelError.
///
/// Lets code written against `Result<T, &'static str>` (still present in a
/// few teacher-derived modules) compose with `?` into functions returning
/// `KernelResult<T>`.
impl From<&'static str> for KernelError {
    fn from(msg: &'static str) -> Self {
        Self::LegacyError { message: msg }
    }
}
