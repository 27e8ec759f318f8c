//! Condition variables
//!
//! Usable only while holding an associated `Lock`, passed per call. The
//! correctness heart is in `wait`: the monitor lock is released only after
//! the internal spinlock is taken, and a signaler must take that same
//! spinlock to deliver a wakeup, so there is no window in which a signal
//! can slip between "release the lock" and "go to sleep" and be lost.

use super::lock::Lock;
use super::wchan::WaitChannel;

pub struct CondVar {
    name: String,
    inner: spin::Mutex<()>,
    wchan: WaitChannel,
}

impl CondVar {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let wchan = WaitChannel::new(name.clone());
        Self {
            name,
            inner: spin::Mutex::new(()),
            wchan,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Atomically release `lock` and block; re-acquires `lock` before
    /// returning. The caller must hold `lock`, and must re-test its
    /// condition in a loop (wakeups say "something changed", not "your
    /// predicate is true").
    pub fn wait(&self, lock: &Lock) {
        assert!(
            lock.held_by_current(),
            "cv '{}': wait without holding lock '{}'",
            self.name,
            lock.name()
        );
        let guard = self.inner.lock();
        lock.release();
        self.wchan.sleep(guard);
        lock.acquire();
    }

    /// Wake one waiter, if any. The caller must hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        assert!(
            lock.held_by_current(),
            "cv '{}': signal without holding lock '{}'",
            self.name,
            lock.name()
        );
        let guard = self.inner.lock();
        self.wchan.wake_one(&guard);
    }

    /// Wake every current waiter. The caller must hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        assert!(
            lock.held_by_current(),
            "cv '{}': broadcast without holding lock '{}'",
            self.name,
            lock.name()
        );
        let guard = self.inner.lock();
        self.wchan.wake_all(&guard);
    }
}
