//! Wait channels
//!
//! A wait channel is a named queue of blocked threads tied to one protecting
//! spinlock. The caller of every operation must hold that spinlock; `sleep`
//! consumes its guard so that enqueueing the current thread and releasing
//! the spinlock happen as one step. A wakeup arriving between the enqueue
//! and the park is never lost: the waker hands the thread an unpark token,
//! and the per-waiter flag absorbs spurious park returns.
//!
//! Wake order among multiple waiters is unspecified. Do not write code (or
//! tests) that assumes FIFO delivery.

use spin::MutexGuard;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

/// One blocked thread.
struct Waiter {
    thread: Thread,
    woken: AtomicBool,
}

/// A queue of blocked threads, protected by the caller's spinlock.
pub struct WaitChannel {
    name: String,
    waiters: spin::Mutex<VecDeque<Arc<Waiter>>>,
}

impl WaitChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            waiters: spin::Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block the current thread on this channel.
    ///
    /// The caller passes the guard of the protecting spinlock; the current
    /// thread is enqueued before the guard is dropped, so a waker holding
    /// that spinlock cannot miss it. On return the thread holds nothing -
    /// callers re-acquire the protecting spinlock themselves and re-test
    /// their condition.
    pub fn sleep<T>(&self, guard: MutexGuard<'_, T>) {
        let waiter = Arc::new(Waiter {
            thread: thread::current(),
            woken: AtomicBool::new(false),
        });
        self.waiters.lock().push_back(Arc::clone(&waiter));
        drop(guard);

        while !waiter.woken.load(Ordering::Acquire) {
            thread::park();
        }
    }

    /// Wake one sleeping thread, if any. The caller passes the guard of
    /// the protecting spinlock as evidence of holding it; waking without
    /// the spinlock would race the sleeper's enqueue.
    pub fn wake_one<T>(&self, _guard: &MutexGuard<'_, T>) {
        let waiter = self.waiters.lock().pop_front();
        if let Some(w) = waiter {
            w.woken.store(true, Ordering::Release);
            w.thread.unpark();
        }
    }

    /// Wake every sleeping thread. Same guard rule as `wake_one`.
    pub fn wake_all<T>(&self, _guard: &MutexGuard<'_, T>) {
        let drained: Vec<_> = self.waiters.lock().drain(..).collect();
        for w in drained {
            w.woken.store(true, Ordering::Release);
            w.thread.unpark();
        }
    }

    /// Number of threads currently queued.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Drop for WaitChannel {
    fn drop(&mut self) {
        let waiters = self.waiters.get_mut();
        assert!(
            waiters.is_empty(),
            "wait channel '{}' destroyed with {} thread(s) still sleeping",
            self.name,
            waiters.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_sleep_and_wake_one() {
        let chan = Arc::new(WaitChannel::new("test"));
        let state = Arc::new(spin::Mutex::new(false));
        let progressed = Arc::new(AtomicUsize::new(0));

        let (c, s, p) = (chan.clone(), state.clone(), progressed.clone());
        let t = thread::spawn(move || {
            let mut guard = s.lock();
            while !*guard {
                c.sleep(guard);
                guard = s.lock();
            }
            p.store(1, Ordering::SeqCst);
        });

        // Give the sleeper time to park, then flip the condition and wake.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(progressed.load(Ordering::SeqCst), 0);
        {
            let mut guard = state.lock();
            *guard = true;
            chan.wake_one(&guard);
        }
        t.join().unwrap();
        assert_eq!(progressed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wake_before_park_is_not_lost() {
        // The waker may run between the enqueue and the park; the unpark
        // token must carry the wakeup across that window.
        let chan = Arc::new(WaitChannel::new("race"));
        let state = Arc::new(spin::Mutex::new(false));

        for _ in 0..100 {
            let (c, s) = (chan.clone(), state.clone());
            let t = thread::spawn(move || {
                let mut guard = s.lock();
                while !*guard {
                    c.sleep(guard);
                    guard = s.lock();
                }
                *guard = false;
            });
            {
                let mut guard = state.lock();
                *guard = true;
                chan.wake_one(&guard);
            }
            t.join().unwrap();
        }
    }

    #[test]
    fn test_wake_all() {
        let chan = Arc::new(WaitChannel::new("all"));
        let state = Arc::new(spin::Mutex::new(false));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let (c, s) = (chan.clone(), state.clone());
                thread::spawn(move || {
                    let mut guard = s.lock();
                    while !*guard {
                        c.sleep(guard);
                        guard = s.lock();
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        {
            let mut guard = state.lock();
            *guard = true;
            chan.wake_all(&guard);
        }
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(chan.waiter_count(), 0);
    }

    #[test]
    fn test_wake_one_with_no_waiters_is_noop() {
        let chan = WaitChannel::new("empty");
        let state = spin::Mutex::new(());
        let guard = state.lock();
        chan.wake_one(&guard);
        chan.wake_all(&guard);
        assert_eq!(chan.waiter_count(), 0);
    }
}
