//! Virtual-clock timer driver.
//!
//! The host environment owns time; this crate only needs a monotonic
//! schedule/cancel pair. [`Timer`] is that pair over a virtual clock:
//! entries are (deadline, thunk) pairs fired in deadline order as the clock
//! is advanced — by the lab runtime in tests, or by whatever host loop
//! embeds the library.
//!
//! [`Timer::sleep`] is the future view; `select`'s deadline arms and the
//! `timeout`/`partition_time` combinators build on `schedule`/`cancel`
//! directly.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// A scheduled callback.
type TimerThunk = Box<dyn FnOnce() + Send>;

/// Key identifying a scheduled entry for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerKey {
    at: Duration,
    seq: u64,
}

struct TimerInner {
    now: Duration,
    next_seq: u64,
    entries: BTreeMap<TimerKey, TimerThunk>,
}

fn lock(inner: &Mutex<TimerInner>) -> std::sync::MutexGuard<'_, TimerInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A shared virtual-clock timer driver. Cheap to clone.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<Mutex<TimerInner>>,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Timer")
            .field("now", &inner.now)
            .field("pending", &inner.entries.len())
            .finish()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Creates a driver with the clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimerInner {
                now: Duration::ZERO,
                next_seq: 0,
                entries: BTreeMap::new(),
            })),
        }
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        lock(&self.inner).now
    }

    /// Number of scheduled entries. Observability only.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Earliest scheduled deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        lock(&self.inner).entries.keys().next().map(|key| key.at)
    }

    /// Schedules a thunk to fire `delay` from now.
    pub fn schedule<F>(&self, delay: Duration, thunk: F) -> TimerKey
    where
        F: FnOnce() + Send + 'static,
    {
        let at = lock(&self.inner).now.saturating_add(delay);
        self.schedule_at(at, thunk)
    }

    /// Schedules a thunk at an absolute deadline. A deadline at or before
    /// the current time fires on the next `advance`, even a zero advance.
    pub fn schedule_at<F>(&self, at: Duration, thunk: F) -> TimerKey
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = lock(&self.inner);
        let key = TimerKey {
            at,
            seq: inner.next_seq,
        };
        inner.next_seq += 1;
        inner.entries.insert(key, Box::new(thunk));
        key
    }

    /// Cancels a scheduled entry. Idempotent; a no-op if already fired.
    pub fn cancel(&self, key: TimerKey) {
        lock(&self.inner).entries.remove(&key);
    }

    /// Advances the clock by `delta`, firing due entries in deadline order.
    ///
    /// The clock moves to each deadline as its entry fires, so a thunk that
    /// schedules further timers observes consistent time. Thunks run with
    /// the driver unlocked.
    pub fn advance(&self, delta: Duration) {
        let target = lock(&self.inner).now.saturating_add(delta);
        loop {
            let due = {
                let mut inner = lock(&self.inner);
                let next = inner.entries.keys().next().copied();
                match next {
                    Some(key) if key.at <= target => {
                        inner.now = inner.now.max(key.at);
                        inner.entries.remove(&key)
                    }
                    _ => break,
                }
            };
            if let Some(thunk) = due {
                thunk();
            }
        }
        let mut inner = lock(&self.inner);
        inner.now = inner.now.max(target);
    }

    /// A future that resolves once `delay` has elapsed on this driver.
    ///
    /// Dropping the future cancels the underlying entry.
    #[must_use]
    pub fn sleep(&self, delay: Duration) -> Sleep {
        let shared = Arc::new(Mutex::new(SleepShared {
            fired: false,
            waker: None,
        }));
        let thunk_shared = Arc::clone(&shared);
        let key = self.schedule(delay, move || {
            let waker = {
                let mut guard = match thunk_shared.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.fired = true;
                guard.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        });
        Sleep {
            timer: self.clone(),
            key: Some(key),
            shared,
        }
    }
}

struct SleepShared {
    fired: bool,
    waker: Option<Waker>,
}

/// Future returned by [`Timer::sleep`].
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    timer: Timer,
    key: Option<TimerKey>,
    shared: Arc<Mutex<SleepShared>>,
}

impl std::fmt::Debug for Sleep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sleep").field("key", &self.key).finish()
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut guard = match this.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.fired {
            this.key = None;
            Poll::Ready(())
        } else {
            guard.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.timer.cancel(key);
        }
    }
}
