//! Kernel error taxonomy
//!
//! Every failure is detected as close to its source as possible and handed
//! back to the caller as a distinct condition; nothing here retries or
//! recovers silently. Store-level failures keep their specific
//! `io::ErrorKind` instead of being collapsed into one code.
//!
//! Invariant violations (double exit, releasing a dead file object, a lock
//! released by a non-owner) are not errors - they panic diagnostically.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Descriptor out of range, empty, or opened with the wrong access mode
    BadFd,
    /// Descriptor table is full
    TooManyFiles,
    /// User buffer is null or reaches into the kernel address range
    BadAddress,
    /// Invalid argument (bad whence result, negative offset, ...)
    InvalidArgument,
    /// Seek on an object that does not support seeking
    NotSeekable,
    /// Path does not name anything
    NotFound,
    /// Path names something that is not a directory
    NotADirectory,
    /// No process with that pid
    NoProcess,
    /// Target process is not a child of the caller
    NotChild,
    /// Argument vector exceeds ARG_MAX
    ArgListTooLong,
    /// Out of memory, threads, or pids
    OutOfResources,
    /// Store-level I/O failure, kind preserved
    Io(io::ErrorKind),
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::BadFd => write!(f, "bad file descriptor"),
            KernelError::TooManyFiles => write!(f, "too many open files"),
            KernelError::BadAddress => write!(f, "bad user address"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::NotSeekable => write!(f, "object is not seekable"),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::NotADirectory => write!(f, "not a directory"),
            KernelError::NoProcess => write!(f, "no such process"),
            KernelError::NotChild => write!(f, "not a child of the caller"),
            KernelError::ArgListTooLong => write!(f, "argument list too long"),
            KernelError::OutOfResources => write!(f, "out of resources"),
            KernelError::Io(kind) => write!(f, "I/O error: {}", kind),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<io::Error> for KernelError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => KernelError::NotFound,
            io::ErrorKind::InvalidInput => KernelError::InvalidArgument,
            io::ErrorKind::OutOfMemory => KernelError::OutOfResources,
            kind => KernelError::Io(kind),
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
