//! Open file objects and the system file table
//!
//! An `OpenFile` is the shared, reference-counted representation of one
//! opened connection to the backing store: store handle, access mode, and
//! the current offset, guarded by a per-file blocking lock so that two
//! descriptors sharing one object can never interleave offset updates.
//!
//! The `SystemFileTable` is the kernel-wide registry of those objects. It
//! is an owned arena (`slab::Slab`), not an intrusive linked list: removal
//! from any position is O(1) and there are no head/tail pointers to get
//! wrong. Structural changes (add/remove/retain/release) go through one
//! table spinlock; content changes (offset, I/O) go through the per-file
//! lock only.
//!
//! The table owns the backing `FileSystem` and the three standard console
//! entries, which it pins with a reference of its own so ordinary close
//! traffic can never destroy them.

use super::error::KernelResult;
use super::sync::Lock;
use crate::vfs::{CONSOLE, FileSystem, OpenOptions, StoreHandle};
use slab::Slab;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable arena index of an open-file object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub usize);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// Access mode requested at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags {
        read: true,
        write: false,
        create: false,
        truncate: false,
        append: false,
    };

    pub const WRITE: OpenFlags = OpenFlags {
        read: false,
        write: true,
        create: true,
        truncate: true,
        append: false,
    };

    pub const RDWR: OpenFlags = OpenFlags {
        read: true,
        write: true,
        create: false,
        truncate: false,
        append: false,
    };

    pub const APPEND: OpenFlags = OpenFlags {
        read: false,
        write: true,
        create: true,
        truncate: false,
        append: true,
    };

    fn store_options(self) -> OpenOptions {
        OpenOptions::new()
            .read(self.read)
            .write(self.write)
            .create(self.create)
            .truncate(self.truncate)
    }
}

/// One opened connection to the store, shareable between descriptor slots.
pub struct OpenFile {
    handle: StoreHandle,
    flags: OpenFlags,
    /// Byte offset of the next transfer. Only read or written while
    /// holding `lock`; the atomic is for interior mutability, not for
    /// lock-free access.
    offset: AtomicU64,
    /// Serializes offset reads, the store transfer, and the offset
    /// advance into one critical section per I/O call.
    pub(crate) lock: Lock,
}

impl OpenFile {
    fn new(handle: StoreHandle, flags: OpenFlags, name: &str) -> Self {
        Self {
            handle,
            flags,
            offset: AtomicU64::new(0),
            lock: Lock::new(format!("file:{}", name)),
        }
    }

    pub fn store_handle(&self) -> StoreHandle {
        self.handle
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Current offset. Caller must hold the file lock.
    pub(crate) fn offset(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    /// Move the offset. Caller must hold the file lock.
    pub(crate) fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::Relaxed);
    }
}

struct Entry {
    file: Arc<OpenFile>,
    refs: usize,
}

/// The kernel-wide open file registry.
pub struct SystemFileTable {
    fs: spin::Mutex<Box<dyn FileSystem>>,
    entries: spin::Mutex<Slab<Entry>>,
    stdio: [FileId; 3],
}

impl SystemFileTable {
    /// Build the table over a backing store and open the three standard
    /// console entries (input, output, error). Each stdio entry carries a
    /// table-owned reference so it survives any amount of close traffic.
    pub fn new(fs: Box<dyn FileSystem>) -> KernelResult<Self> {
        let mut table = Self {
            fs: spin::Mutex::new(fs),
            entries: spin::Mutex::new(Slab::new()),
            stdio: [FileId(0); 3],
        };
        let stdin = table.open(CONSOLE, OpenFlags {
            read: true,
            write: false,
            create: false,
            truncate: false,
            append: false,
        })?;
        let stdout = table.open(CONSOLE, OpenFlags {
            read: false,
            write: true,
            create: false,
            truncate: false,
            append: false,
        })?;
        let stderr = table.open(CONSOLE, OpenFlags {
            read: false,
            write: true,
            create: false,
            truncate: false,
            append: false,
        })?;
        table.stdio = [stdin, stdout, stderr];
        Ok(table)
    }

    /// Open a path and register the new object with reference count 1.
    pub fn open(&self, path: &str, flags: OpenFlags) -> KernelResult<FileId> {
        let handle = self.fs.lock().open(path, flags.store_options())?;
        let file = Arc::new(OpenFile::new(handle, flags, path));
        let id = FileId(self.entries.lock().insert(Entry { file, refs: 1 }));
        log::debug!("file table: opened {} as {}", path, id);
        Ok(id)
    }

    /// Bump the reference count (dup2, fork, stdio binding). Referencing a
    /// dead id is a bookkeeping defect, not a runtime condition.
    pub fn retain(&self, id: FileId) {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(id.0)
            .unwrap_or_else(|| panic!("retain of dead open file {}", id));
        entry.refs += 1;
    }

    /// Look up a live object and pin it with a reference of the caller's
    /// own, in one step under the table lock. I/O paths use this so a
    /// concurrent close can never retire the object (and its store
    /// handle) mid-transfer; the caller drops the pin with `release` once
    /// the transfer is done.
    pub fn get_retained(&self, id: FileId) -> Option<Arc<OpenFile>> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id.0)?;
        entry.refs += 1;
        Some(Arc::clone(&entry.file))
    }

    /// Drop one reference. When the count reaches zero the entry is
    /// removed from the arena and the store handle is closed - exactly
    /// once over the object's lifetime.
    pub fn release(&self, id: FileId) {
        let removed = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(id.0)
                .unwrap_or_else(|| panic!("release of dead open file {}", id));
            entry.refs -= 1;
            if entry.refs == 0 {
                Some(entries.remove(id.0))
            } else {
                None
            }
        };
        if let Some(entry) = removed {
            log::debug!("file table: {} dropped to zero refs, closing store handle", id);
            // Close is a content operation like read/write/seek: it runs
            // under the object's own lock, after any straggling transfer.
            entry.file.lock.acquire();
            let closed = self.fs.lock().close(entry.file.handle);
            entry.file.lock.release();
            if let Err(e) = closed {
                log::warn!("file table: store close of {} failed: {}", id, e);
            }
        }
    }

    /// Look up a live object.
    pub fn get(&self, id: FileId) -> Option<Arc<OpenFile>> {
        self.entries.lock().get(id.0).map(|e| Arc::clone(&e.file))
    }

    /// Current reference count (0 for a dead id).
    pub fn refcount(&self, id: FileId) -> usize {
        self.entries.lock().get(id.0).map(|e| e.refs).unwrap_or(0)
    }

    /// Number of live open-file objects.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stdin(&self) -> FileId {
        self.stdio[0]
    }

    pub fn stdout(&self) -> FileId {
        self.stdio[1]
    }

    pub fn stderr(&self) -> FileId {
        self.stdio[2]
    }

    /// Access the backing store (held only across one synchronous call).
    pub(crate) fn fs(&self) -> spin::MutexGuard<'_, Box<dyn FileSystem>> {
        self.fs.lock()
    }

    /// Kernel-shutdown teardown: drop the stdio pins and close whatever is
    /// left. Entries still referenced by live processes are a shutdown
    /// ordering bug on the embedder's side; they are closed anyway and
    /// logged.
    pub fn shutdown(&self) {
        for id in self.stdio {
            self.release(id);
        }
        let leftovers: Vec<Entry> = {
            let mut entries = self.entries.lock();
            let ids: Vec<usize> = entries.iter().map(|(k, _)| k).collect();
            ids.into_iter().map(|k| entries.remove(k)).collect()
        };
        for entry in leftovers {
            log::warn!(
                "file table: entry with {} outstanding refs at shutdown",
                entry.refs
            );
            let _ = self.fs.lock().close(entry.file.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::error::KernelError;
    use crate::vfs::MemoryFs;

    fn table() -> SystemFileTable {
        SystemFileTable::new(Box::new(MemoryFs::new())).unwrap()
    }

    #[test]
    fn test_stdio_present_after_init() {
        let t = table();
        assert_eq!(t.len(), 3);
        assert_eq!(t.refcount(t.stdin()), 1);
        assert!(t.get(t.stdout()).is_some());
        assert!(t.get(t.stderr()).is_some());
        assert!(!t.get(t.stdin()).unwrap().flags().write);
        assert!(t.get(t.stdout()).unwrap().flags().write);
    }

    #[test]
    fn test_open_starts_at_refcount_one_offset_zero() {
        let t = table();
        let id = t.open("/a", OpenFlags::WRITE).unwrap();
        assert_eq!(t.refcount(id), 1);
        let file = t.get(id).unwrap();
        file.lock.acquire();
        assert_eq!(file.offset(), 0);
        file.lock.release();
        t.release(id);
        assert_eq!(t.refcount(id), 0);
        assert!(t.get(id).is_none());
    }

    #[test]
    fn test_retain_release_lifecycle() {
        let t = table();
        let id = t.open("/b", OpenFlags::WRITE).unwrap();
        t.retain(id);
        t.retain(id);
        assert_eq!(t.refcount(id), 3);

        t.release(id);
        assert!(t.get(id).is_some(), "object freed while still referenced");
        t.release(id);
        assert!(t.get(id).is_some());
        t.release(id);
        assert!(t.get(id).is_none(), "object must die at zero refs");
        assert_eq!(t.len(), 3); // stdio remains
    }

    #[test]
    fn test_io_pin_defers_destruction_past_last_close() {
        // An in-flight transfer pins the object; a close that drops the
        // last descriptor reference must leave it (and the store handle)
        // alive until the transfer unpins.
        let t = table();
        let id = t.open("/pinned", OpenFlags::WRITE).unwrap();
        let file = t.get_retained(id).unwrap();
        assert_eq!(t.refcount(id), 2);

        t.release(id); // the descriptor goes away mid-transfer
        assert!(t.get(id).is_some(), "object retired while a transfer held it");
        assert_eq!(file.store_handle(), t.get(id).unwrap().store_handle());

        t.release(id); // transfer done, pin dropped: now it dies
        assert!(t.get(id).is_none());
    }

    #[test]
    fn test_get_retained_on_dead_id_is_none() {
        let t = table();
        let id = t.open("/gone", OpenFlags::WRITE).unwrap();
        t.release(id);
        assert!(t.get_retained(id).is_none());
    }

    #[test]
    fn test_open_failure_propagates_store_error() {
        let t = table();
        let err = t.open("/missing", OpenFlags::READ).unwrap_err();
        assert_eq!(err, KernelError::NotFound);
        assert_eq!(t.len(), 3);
    }

    #[test]
    #[should_panic(expected = "release of dead open file")]
    fn test_release_of_dead_id_panics() {
        let t = table();
        t.release(FileId(999));
    }

    #[test]
    fn test_removal_at_any_position() {
        // Arena removal has no head/tail cases; interleave opens and
        // releases and check the survivors are intact.
        let t = table();
        let a = t.open("/ra", OpenFlags::WRITE).unwrap();
        let b = t.open("/rb", OpenFlags::WRITE).unwrap();
        let c = t.open("/rc", OpenFlags::WRITE).unwrap();
        t.release(b); // interior
        assert!(t.get(a).is_some());
        assert!(t.get(c).is_some());
        t.release(a); // oldest
        t.release(c); // newest
        assert_eq!(t.len(), 3);
    }
}
