//! Per-process descriptor tables
//!
//! A descriptor is a small integer naming a slot in a fixed-size array of
//! open-file references. The table itself never owns anything: a non-empty
//! slot stands for one reference counted in the system file table, and the
//! syscall layer keeps the two in step (bump on dup/fork, drop on close).

use super::error::{KernelError, KernelResult};
use super::file::FileId;

/// Maximum open files per process.
pub const OPEN_MAX: usize = 128;

/// File descriptor - an index into a process's descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd(pub u32);

impl Fd {
    pub const STDIN: Fd = Fd(0);
    pub const STDOUT: Fd = Fd(1);
    pub const STDERR: Fd = Fd(2);

    fn index(self) -> KernelResult<usize> {
        let i = self.0 as usize;
        if i >= OPEN_MAX {
            return Err(KernelError::BadFd);
        }
        Ok(i)
    }
}

impl std::fmt::Display for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// A process's descriptor table. All slots start empty; 0/1/2 are bound to
/// the standard streams at process creation.
#[derive(Clone)]
pub struct FdTable {
    slots: [Option<FileId>; OPEN_MAX],
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: [None; OPEN_MAX],
        }
    }

    /// Place `id` in the first empty slot.
    pub fn alloc(&mut self, id: FileId) -> KernelResult<Fd> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(id);
                return Ok(Fd(i as u32));
            }
        }
        Err(KernelError::TooManyFiles)
    }

    /// Resolve a descriptor to its file object.
    pub fn get(&self, fd: Fd) -> KernelResult<FileId> {
        self.slots[fd.index()?].ok_or(KernelError::BadFd)
    }

    /// Point `fd` at `id`, returning whatever it pointed at before.
    pub fn set(&mut self, fd: Fd, id: FileId) -> KernelResult<Option<FileId>> {
        Ok(self.slots[fd.index()?].replace(id))
    }

    /// Empty a slot, returning what it held.
    pub fn clear(&mut self, fd: Fd) -> KernelResult<Option<FileId>> {
        Ok(self.slots[fd.index()?].take())
    }

    /// Range check without touching the slot (dup2 validates both ends).
    pub fn check_range(&self, fd: Fd) -> KernelResult<()> {
        fd.index().map(|_| ())
    }

    /// Iterate occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = (Fd, FileId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|id| (Fd(i as u32), id)))
    }

    /// Empty every slot, yielding the references the caller must drop.
    pub fn drain(&mut self) -> Vec<FileId> {
        self.slots.iter_mut().filter_map(|s| s.take()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
