//! The kernel core - blocking synchronization, open files, and processes
//!
//! Layered bottom-up:
//! - `sync`: wait channels, semaphores, owner-tracked locks, condition
//!   variables; the only suspension points in the system
//! - `file` / `fd`: refcounted open-file objects in a kernel-wide table,
//!   small-integer descriptors per process
//! - `loader` / `process`: address spaces, program images, and the
//!   process registry
//! - `syscall`: the `Kernel` entry points tying it all together
//!
//! Nothing here is global or ambient: the `Kernel` is an explicit value,
//! and every syscall names its calling process.

pub mod error;
pub mod fd;
pub mod file;
pub mod loader;
pub mod process;
pub mod sync;
pub mod syscall;

pub use error::{KernelError, KernelResult};
pub use fd::{Fd, FdTable, OPEN_MAX};
pub use file::{FileId, OpenFile, OpenFlags, SystemFileTable};
pub use loader::{
    ARG_MAX, AddressSpace, ExecImage, FlatLoader, LoadedImage, ProgramLoader, USER_BASE, USER_TOP,
};
pub use process::{Pid, Process, ProcessTable};
pub use sync::{CondVar, Lock, Semaphore, WaitChannel};
pub use syscall::{Kernel, WaitFlags};
