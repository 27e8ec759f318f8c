//! halvard - a hosted teaching kernel core in Rust
//!
//! The synchronization and resource-management heart of a small Unix-like
//! kernel, runnable as an ordinary library: kernel threads are host
//! threads, the "disk" is a pluggable store behind a trait, and every
//! syscall is a plain method call naming its process.
//!
//! Design principles:
//! - Explicit ownership: no ambient current-process, no global tables;
//!   the `Kernel` value owns everything it manages
//! - Block, don't spin: contended threads sleep on wait channels and are
//!   woken by the event they wait for, never by polling
//! - Fail loudly: invariant violations (double exit, non-owner unlock)
//!   panic with a diagnostic; expected failures return typed errors
//!
//! ```
//! use halvard::kernel::{Kernel, FlatLoader, OpenFlags};
//! use halvard::vfs::MemoryFs;
//!
//! let (kernel, init) =
//!     Kernel::bootstrap(Box::new(MemoryFs::new()), Box::new(FlatLoader)).unwrap();
//! let fd = kernel.sys_open(&init, "/greeting", OpenFlags::WRITE).unwrap();
//! kernel.sys_write(&init, fd, b"hello").unwrap();
//! kernel.sys_close(&init, fd).unwrap();
//! kernel.sys_exit(&init, 0);
//! kernel.shutdown();
//! ```

pub mod kernel;
pub mod vfs;
