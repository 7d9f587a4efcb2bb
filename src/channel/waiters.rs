//! Waiter primitives backing the channel's four waiter sets.
//!
//! Blocked sends and receives are settle-once slots ([`SendWaiter`],
//! [`RecvWaiter`]) queued FIFO; dropping the owning future tombstones the
//! slot in place (`cancelled`) so queue surgery never happens on the hot
//! path — pops simply skip tombstones, and a per-queue live counter keeps
//! emptiness checks O(1).
//!
//! Readiness subscribers (wait-until-readable/-writable) are resume thunks
//! in a [`WaitSet`]: a slot vector with stable keys, blanked on removal and
//! trimmed from the tail, so a cancelled wait disappears from the count
//! immediately.

use std::task::Waker;

use smallvec::SmallVec;

use crate::error::SendError;

/// A blocked send: the value travels with the waiter until a receiver takes
/// it, the buffer frees a slot, or close hands it back.
#[derive(Debug)]
pub(crate) struct SendWaiter<T> {
    pub(crate) value: Option<T>,
    pub(crate) outcome: Option<Result<(), SendError<T>>>,
    pub(crate) waker: Option<Waker>,
    pub(crate) cancelled: bool,
}

impl<T> SendWaiter<T> {
    pub(crate) fn new(value: T, waker: Waker) -> Self {
        Self {
            value: Some(value),
            outcome: None,
            waker: Some(waker),
            cancelled: false,
        }
    }
}

/// A blocked receive. `outcome` is `Some(None)` once the channel closed
/// with nothing left to deliver.
#[derive(Debug)]
pub(crate) struct RecvWaiter<T> {
    pub(crate) outcome: Option<Option<T>>,
    pub(crate) waker: Option<Waker>,
    pub(crate) cancelled: bool,
}

impl<T> RecvWaiter<T> {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            outcome: None,
            waker: Some(waker),
            cancelled: false,
        }
    }
}

/// A resume thunk: settles one readiness wait when invoked.
pub(crate) type Thunk = Box<dyn FnOnce() + Send>;

/// Set of readiness subscribers with stable removal keys.
#[derive(Default)]
pub(crate) struct WaitSet {
    slots: Vec<Option<Thunk>>,
}

impl std::fmt::Debug for WaitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitSet").field("count", &self.count()).finish()
    }
}

impl WaitSet {
    pub(crate) const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Registers a thunk; the returned key removes it.
    pub(crate) fn insert(&mut self, thunk: Thunk) -> usize {
        self.slots.push(Some(thunk));
        self.slots.len() - 1
    }

    /// Removes a registration. Idempotent for already-consumed slots.
    pub(crate) fn remove(&mut self, key: usize) {
        if let Some(slot) = self.slots.get_mut(key) {
            *slot = None;
        }
        self.trim();
    }

    /// Takes one registered thunk (arbitrary choice: lowest slot).
    pub(crate) fn take_one(&mut self) -> Option<Thunk> {
        let taken = self.slots.iter_mut().find_map(Option::take);
        self.trim();
        taken
    }

    /// Takes every registered thunk; used only by close().
    pub(crate) fn take_all(&mut self) -> SmallVec<[Thunk; 4]> {
        self.slots.drain(..).flatten().collect()
    }

    /// Number of live registrations.
    pub(crate) fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn trim(&mut self) {
        while self.slots.last().is_some_and(Option::is_none) {
            self.slots.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_thunk(counter: &Arc<AtomicUsize>) -> Thunk {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn insert_take_one_runs_thunk() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut set = WaitSet::new();
        set.insert(counting_thunk(&fired));
        assert_eq!(set.count(), 1);

        let thunk = set.take_one().expect("one registered");
        thunk();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(set.count(), 0);
    }

    #[test]
    fn remove_is_immediate_and_idempotent() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut set = WaitSet::new();
        let a = set.insert(counting_thunk(&fired));
        let b = set.insert(counting_thunk(&fired));
        assert_eq!(set.count(), 2);

        set.remove(a);
        assert_eq!(set.count(), 1);
        set.remove(a);
        assert_eq!(set.count(), 1);

        set.remove(b);
        assert_eq!(set.count(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn take_all_drains_everything() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut set = WaitSet::new();
        for _ in 0..3 {
            set.insert(counting_thunk(&fired));
        }
        let all = set.take_all();
        assert_eq!(all.len(), 3);
        for thunk in all {
            thunk();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert_eq!(set.count(), 0);
    }

    #[test]
    fn keys_stay_stable_across_removals() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut set = WaitSet::new();
        let a = set.insert(counting_thunk(&fired));
        let _b = set.insert(counting_thunk(&fired));
        let c = set.insert(counting_thunk(&fired));

        set.remove(a);
        set.remove(c);
        assert_eq!(set.count(), 1);

        // The middle registration is still the one that fires.
        let thunk = set.take_one().expect("middle still live");
        thunk();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
