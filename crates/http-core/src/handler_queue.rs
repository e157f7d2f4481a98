//! A bounded, thread-safe producer/consumer deque that is also
//! `poll`/`epoll`-capable via a self-pipe, and that owns a thread-local pool
//! of reusable transfer handles so workers can amortize allocation cost.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("queue is at capacity")]
    Busy,
    #[error("queue has been shut down")]
    Shutdown,
    #[error("self-pipe setup failed: {0}")]
    Pipe(#[source] std::io::Error),
}

struct State<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Instrumentation counters satisfying `produced - consumed - rejected ==
/// queue size` at every observation point.
#[derive(Debug, Default)]
pub struct QueueStats {
    pub produced: AtomicU64,
    pub consumed: AtomicU64,
    pub rejected: AtomicU64,
}

pub struct HandlerQueue<T> {
    state: Mutex<State<T>>,
    consumer_wait: Condvar,
    producer_wait: Condvar,
    capacity: usize,
    stats: QueueStats,
    wake_read: RawFd,
    wake_write: RawFd,
}

// SAFETY: the raw fds are only ever read/written through libc calls guarded
// by the mutex-protected state transitions; no aliasing mutation occurs.
unsafe impl<T: Send> Send for HandlerQueue<T> {}
unsafe impl<T: Send> Sync for HandlerQueue<T> {}

impl<T> HandlerQueue<T> {
    /// Default capacity, matching the native `HandlerQueue`'s default.
    pub const DEFAULT_CAPACITY: usize = 50;
    /// Hard cap on configurable capacity.
    pub const MAX_CAPACITY: usize = 10_000_000;

    pub fn new(capacity: usize) -> Result<Self, Error> {
        let capacity = capacity.min(Self::MAX_CAPACITY).max(1);
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(Error::Pipe(std::io::Error::last_os_error()));
        }
        for fd in fds {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
            unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        }

        Ok(HandlerQueue {
            state: Mutex::new(State { items: VecDeque::new(), shutdown: false }),
            consumer_wait: Condvar::new(),
            producer_wait: Condvar::new(),
            capacity,
            stats: QueueStats::default(),
            wake_read: fds[0],
            wake_write: fds[1],
        })
    }

    /// The read end of the self-pipe: register this with `poll`/`epoll` to
    /// be notified of non-empty transitions without busy-waiting.
    pub fn poll_fd(&self) -> RawFd {
        self.wake_read
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    fn signal_readable(&self) {
        let byte = [0u8; 1];
        unsafe {
            libc::write(self.wake_write, byte.as_ptr() as *const libc::c_void, 1);
        }
    }

    /// Drains exactly one byte from the self-pipe's read end; a poll-driven
    /// consumer calls this once after waking to avoid a busy spin.
    pub fn drain_wake_byte(&self) {
        let mut byte = [0u8; 1];
        unsafe {
            libc::read(self.wake_read, byte.as_mut_ptr() as *mut libc::c_void, 1);
        }
    }

    /// Pushes `item`. Blocks while the queue is full, until `Shutdown`.
    pub fn produce(&self, item: T) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.shutdown {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(Error::Shutdown);
            }
            if state.items.len() < self.capacity {
                let was_empty = state.items.is_empty();
                state.items.push_back(item);
                self.stats.produced.fetch_add(1, Ordering::Relaxed);
                if was_empty {
                    self.signal_readable();
                }
                self.consumer_wait.notify_one();
                return Ok(());
            }
            state = self.producer_wait.wait(state).unwrap();
        }
    }

    /// Pushes `item` without blocking; fails with [`Error::Busy`] if full.
    pub fn try_produce(&self, item: T) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.shutdown {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Shutdown);
        }
        if state.items.len() >= self.capacity {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Busy);
        }
        let was_empty = state.items.is_empty();
        state.items.push_back(item);
        self.stats.produced.fetch_add(1, Ordering::Relaxed);
        if was_empty {
            self.signal_readable();
        }
        self.consumer_wait.notify_one();
        Ok(())
    }

    /// Pops an item, blocking up to `timeout` (or indefinitely if `None`).
    /// Returns `None` on timeout or shutdown-with-empty-queue.
    pub fn consume(&self, timeout: Option<Duration>) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(item) = state.items.pop_front() {
                self.stats.consumed.fetch_add(1, Ordering::Relaxed);
                self.producer_wait.notify_one();
                return Some(item);
            }
            if state.shutdown {
                return None;
            }
            match deadline {
                None => state = self.consumer_wait.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (next, result) =
                        self.consumer_wait.wait_timeout(state, deadline - now).unwrap();
                    state = next;
                    if result.timed_out() && state.items.is_empty() {
                        return None;
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().unwrap().shutdown
    }

    /// Wakes every blocked producer and consumer; subsequent `produce`
    /// calls fail with [`Error::Shutdown`], and `consume` drains whatever
    /// remains before returning `None`.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        self.signal_readable();
        self.consumer_wait.notify_all();
        self.producer_wait.notify_all();
    }
}

impl<T> Drop for HandlerQueue<T> {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_read);
            libc::close(self.wake_write);
        }
    }
}

/// A thread-local pool of reusable byte buffers, standing in for the
/// native pool of `CurlHandler` transfer handles: `get_handle` reuses a
/// retired buffer if one is available, avoiding a fresh allocation per
/// operation.
pub struct HandlePool;

thread_local! {
    static POOL: std::cell::RefCell<Vec<Vec<u8>>> = const { std::cell::RefCell::new(Vec::new()) };
}

impl HandlePool {
    pub fn get_handle(default_capacity: usize) -> Vec<u8> {
        POOL.with(|pool| {
            pool.borrow_mut()
                .pop()
                .unwrap_or_else(|| Vec::with_capacity(default_capacity))
        })
    }

    pub fn recycle_handle(mut handle: Vec<u8>) {
        handle.clear();
        POOL.with(|pool| pool.borrow_mut().push(handle));
    }

    /// Drops every pooled handle beyond `retain`, returning the count
    /// evicted. Called from `CurlWorker`'s maintenance cycle.
    pub fn expire(retain: usize) -> usize {
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            let evicted = pool.len().saturating_sub(retain);
            pool.truncate(retain);
            evicted
        })
    }
}
