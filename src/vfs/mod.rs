//! Virtual file system seam
//!
//! The kernel core treats path resolution and byte-level I/O as an external
//! collaborator behind the `FileSystem` trait. I/O is positioned
//! (`read_at`/`write_at`): file offsets live in the kernel's open-file
//! objects, not in the store, so two descriptors sharing one object share
//! one offset and the store never has to care.
//!
//! Errors cross this boundary as `std::io::Error` and are propagated with
//! their specific kind - the store's reason for failing is part of the
//! syscall result, not collapsed into a single code.

pub mod memory;

pub use memory::{MemoryFs, SharedFs};

use std::io;

/// A store-level handle for one opened connection.
pub type StoreHandle = usize;

/// The console device path; the system file table opens it three times at
/// startup for the standard streams.
pub const CONSOLE: &str = "con:";

/// How a file should be opened.
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            create: false,
            truncate: false,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }
}

/// File metadata, as much of it as this core needs.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub size: u64,
    pub is_dir: bool,
    pub is_file: bool,
}

/// The external store interface.
///
/// Implementations are free to fail any operation; the kernel performs no
/// retries and surfaces the error to the caller unmodified.
pub trait FileSystem: Send {
    /// Resolve a path and open a store-level connection to it.
    fn open(&mut self, path: &str, options: OpenOptions) -> io::Result<StoreHandle>;

    /// Release a store-level connection. Called exactly once per handle.
    fn close(&mut self, handle: StoreHandle) -> io::Result<()>;

    /// Read up to `buf.len()` bytes at `offset`. Short reads are normal.
    fn read_at(&mut self, handle: StoreHandle, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes at `offset`. Short writes are normal.
    fn write_at(&mut self, handle: StoreHandle, offset: u64, buf: &[u8]) -> io::Result<usize>;

    /// Current size of the object behind `handle` (for SEEK_END).
    fn size(&self, handle: StoreHandle) -> io::Result<u64>;

    /// Whether the object behind `handle` supports seeking at all.
    fn is_seekable(&self, handle: StoreHandle) -> bool;

    /// Metadata for a path (for chdir and friends).
    fn metadata(&self, path: &str) -> io::Result<Metadata>;
}
