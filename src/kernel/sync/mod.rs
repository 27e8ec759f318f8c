//! Blocking synchronization primitives
//!
//! Built bottom-up: a wait channel (queue of parked threads tied to a
//! protecting spinlock), then counting semaphores, owner-tracked mutual
//! exclusion locks, and condition variables on top of it. These are the
//! only suspension points in the kernel core; everything else is
//! synchronous.
//!
//! None of the primitives promise FIFO wake order, support cancellation,
//! or support timeouts. A blocked thread runs when the corresponding
//! release/signal/exit happens, and not before.

pub mod condvar;
pub mod lock;
pub mod semaphore;
pub mod wchan;

pub use condvar::CondVar;
pub use lock::Lock;
pub use semaphore::Semaphore;
pub use wchan::WaitChannel;
