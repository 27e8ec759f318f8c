//! Process control blocks and the process registry
//!
//! A `Process` is shared between the kernel and the thread running it, so
//! every mutable field sits behind its own small spinlock. Parent and child
//! refer to each other by `Pid` only; the registry is the single place a
//! pid resolves to an owning `Arc`, which is what keeps teardown from
//! chasing dangling pointers.
//!
//! Two blocking locks carry the lifecycle protocol. `running` is acquired
//! by the process's thread before it starts work and released only at
//! exit, so a parent blocking in waitpid simply queues on it. `wait_serial`
//! serializes the exit/wait handshake so two waiters cannot both reap the
//! same child.

use super::fd::FdTable;
use super::loader::AddressSpace;
use super::sync::Lock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process identifier. Never reused while any reference to the process is
/// live; the allocator is monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

pub struct Process {
    pid: Pid,
    name: String,
    parent: spin::Mutex<Option<Pid>>,
    children: spin::Mutex<Vec<Pid>>,
    pub(crate) fds: spin::Mutex<FdTable>,
    pub(crate) cwd: spin::Mutex<String>,
    pub(crate) space: spin::Mutex<AddressSpace>,
    exit_status: spin::Mutex<Option<i32>>,
    /// Held by the process's thread for its entire execution.
    pub(crate) running: Lock,
    /// Serializes the exit/wait handshake per child.
    pub(crate) wait_serial: Lock,
}

impl Process {
    pub fn new(pid: Pid, name: &str, parent: Option<Pid>) -> Self {
        Self {
            pid,
            name: name.to_string(),
            parent: spin::Mutex::new(parent),
            children: spin::Mutex::new(Vec::new()),
            fds: spin::Mutex::new(FdTable::new()),
            cwd: spin::Mutex::new("/".to_string()),
            space: spin::Mutex::new(AddressSpace::new()),
            exit_status: spin::Mutex::new(None),
            running: Lock::new(format!("running:{}", pid)),
            wait_serial: Lock::new(format!("wait:{}", pid)),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Pid> {
        *self.parent.lock()
    }

    pub(crate) fn set_parent(&self, parent: Option<Pid>) {
        *self.parent.lock() = parent;
    }

    pub fn children(&self) -> Vec<Pid> {
        self.children.lock().clone()
    }

    pub(crate) fn add_child(&self, pid: Pid) {
        self.children.lock().push(pid);
    }

    pub(crate) fn remove_child(&self, pid: Pid) {
        self.children.lock().retain(|&c| c != pid);
    }

    pub fn has_child(&self, pid: Pid) -> bool {
        self.children.lock().contains(&pid)
    }

    /// Exit status, if the process has exited.
    pub fn exit_status(&self) -> Option<i32> {
        *self.exit_status.lock()
    }

    /// Record the exit status. A process exits once; a second status is a
    /// lifecycle bug and panics.
    pub(crate) fn set_exit_status(&self, status: i32) {
        let mut slot = self.exit_status.lock();
        assert!(
            slot.is_none(),
            "{} exited twice (status {} then {})",
            self.pid,
            slot.unwrap(),
            status
        );
        *slot = Some(status);
    }
}

/// Pid-to-process registry. Built at kernel start, drained at shutdown;
/// nothing here is global or ambient.
pub struct ProcessTable {
    next_pid: AtomicU32,
    procs: spin::Mutex<HashMap<Pid, Arc<Process>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1),
            procs: spin::Mutex::new(HashMap::new()),
        }
    }

    pub fn alloc_pid(&self) -> Pid {
        Pid(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    pub fn insert(&self, proc: Arc<Process>) {
        let prev = self.procs.lock().insert(proc.pid(), proc);
        assert!(prev.is_none(), "pid registered twice");
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.procs.lock().get(&pid).cloned()
    }

    pub fn remove(&self, pid: Pid) -> Option<Arc<Process>> {
        self.procs.lock().remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.procs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.lock().is_empty()
    }

    pub fn drain(&self) -> Vec<Arc<Process>> {
        self.procs.lock().drain().map(|(_, p)| p).collect()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pids_are_unique_and_monotonic() {
        let table = ProcessTable::new();
        let a = table.alloc_pid();
        let b = table.alloc_pid();
        let c = table.alloc_pid();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_registry_insert_get_remove() {
        let table = ProcessTable::new();
        let pid = table.alloc_pid();
        table.insert(Arc::new(Process::new(pid, "init", None)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(pid).unwrap().name(), "init");

        let removed = table.remove(pid).unwrap();
        assert_eq!(removed.pid(), pid);
        assert!(table.get(pid).is_none());
    }

    #[test]
    fn test_child_bookkeeping() {
        let parent = Process::new(Pid(1), "parent", None);
        parent.add_child(Pid(2));
        parent.add_child(Pid(3));
        assert!(parent.has_child(Pid(2)));
        parent.remove_child(Pid(2));
        assert!(!parent.has_child(Pid(2)));
        assert_eq!(parent.children(), vec![Pid(3)]);
    }

    #[test]
    fn test_exit_status_set_once() {
        let proc = Process::new(Pid(7), "p", None);
        assert_eq!(proc.exit_status(), None);
        proc.set_exit_status(42);
        assert_eq!(proc.exit_status(), Some(42));
    }

    #[test]
    #[should_panic(expected = "exited twice")]
    fn test_double_exit_panics() {
        let proc = Process::new(Pid(7), "p", None);
        proc.set_exit_status(0);
        proc.set_exit_status(1);
    }
}
