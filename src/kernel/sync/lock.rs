//! Blocking mutual-exclusion locks
//!
//! A lock tracks its owner explicitly: `release` by anyone but the owner is
//! a programming defect and panics, and re-acquiring a lock the caller
//! already holds panics too (no recursion support). Built on a spinlock
//! plus a wait channel; contended acquirers sleep rather than spin.

use super::wchan::WaitChannel;
use std::thread::{self, ThreadId};

struct LockState {
    held: bool,
    owner: Option<ThreadId>,
}

pub struct Lock {
    name: String,
    state: spin::Mutex<LockState>,
    wchan: WaitChannel,
}

impl Lock {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let wchan = WaitChannel::new(name.clone());
        Self {
            name,
            state: spin::Mutex::new(LockState {
                held: false,
                owner: None,
            }),
            wchan,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the lock, sleeping while someone else holds it.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert!(
            state.owner != Some(me),
            "lock '{}': recursive acquire by owner",
            self.name
        );
        while state.held {
            self.wchan.sleep(state);
            state = self.state.lock();
        }
        state.held = true;
        state.owner = Some(me);
    }

    /// Take the lock if it is free; never sleeps. Returns whether the
    /// caller now owns the lock.
    pub fn try_acquire(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.held {
            return false;
        }
        state.held = true;
        state.owner = Some(me);
        true
    }

    /// Release the lock and wake one waiter. Panics if the caller is not
    /// the current owner.
    pub fn release(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert!(
            state.held && state.owner == Some(me),
            "lock '{}': released by non-owner",
            self.name
        );
        state.held = false;
        state.owner = None;
        self.wchan.wake_one(&state);
    }

    /// True iff the calling thread is the current owner.
    pub fn held_by_current(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_acquire_release() {
        let lock = Lock::new("basic");
        assert!(!lock.held_by_current());
        lock.acquire();
        assert!(lock.held_by_current());
        lock.release();
        assert!(!lock.held_by_current());
    }

    #[test]
    fn test_try_acquire() {
        let lock = Arc::new(Lock::new("try"));
        assert!(lock.try_acquire());
        assert!(lock.held_by_current());

        // Another thread cannot take it while we hold it.
        let l = lock.clone();
        let t = thread::spawn(move || {
            assert!(!l.try_acquire());
            assert!(!l.held_by_current());
        });
        t.join().unwrap();

        lock.release();
        assert!(lock.try_acquire());
        lock.release();
    }

    #[test]
    fn test_mutual_exclusion() {
        // At most one thread in the critical section at any instant.
        let lock = Arc::new(Lock::new("mutex"));
        let inside = Arc::new(AtomicBool::new(false));
        let entries = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let (l, i, e) = (lock.clone(), inside.clone(), entries.clone());
                thread::spawn(move || {
                    for _ in 0..200 {
                        l.acquire();
                        assert!(!i.swap(true, Ordering::SeqCst), "two threads inside");
                        assert!(l.held_by_current());
                        i.store(false, Ordering::SeqCst);
                        e.fetch_add(1, Ordering::SeqCst);
                        l.release();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(entries.load(Ordering::SeqCst), 8 * 200);
    }

    #[test]
    fn test_held_by_current_false_for_other_owner() {
        let lock = Arc::new(Lock::new("owner"));
        let l = lock.clone();
        lock.acquire();
        let t = thread::spawn(move || {
            assert!(!l.held_by_current());
        });
        t.join().unwrap();
        lock.release();
    }

    #[test]
    #[should_panic(expected = "released by non-owner")]
    fn test_release_by_non_owner_panics() {
        let lock = Lock::new("bad-release");
        lock.release();
    }

    #[test]
    #[should_panic(expected = "recursive acquire")]
    fn test_recursive_acquire_panics() {
        let lock = Lock::new("recursive");
        lock.acquire();
        lock.acquire();
    }

    #[test]
    fn test_contended_acquire_blocks() {
        let lock = Arc::new(Lock::new("contended"));
        let passed = Arc::new(AtomicBool::new(false));
        lock.acquire();

        let (l, p) = (lock.clone(), passed.clone());
        let t = thread::spawn(move || {
            l.acquire();
            p.store(true, Ordering::SeqCst);
            l.release();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!passed.load(Ordering::SeqCst), "acquire returned while lock was held");
        lock.release();
        t.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
    }
}
