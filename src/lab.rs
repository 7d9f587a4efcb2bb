//! Deterministic single-threaded lab runtime.
//!
//! The lab is the reference host for this crate: it polls spawned tasks to
//! quiescence and advances a virtual [`Timer`], firing due entries in
//! deadline order with task runs interleaved. No wall clock, no threads —
//! a test drives time explicitly and every run is reproducible.
//!
//! ```ignore
//! let mut lab = Lab::new();
//! let ch = Channel::new(0);
//!
//! let rx = ch.clone();
//! let got = lab.spawn(async move { rx.recv().await });
//! lab.spawn(async move { let _ = ch.send(42).await; });
//!
//! lab.run_until_stalled();
//! assert_eq!(got.try_join(), Some(Some(42)));
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use crate::time::Timer;

type TaskFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Queue of task ids woken and awaiting a poll.
type ReadyQueue = Arc<Mutex<VecDeque<u64>>>;

struct TaskWaker {
    id: u64,
    ready: ReadyQueue,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        match self.ready.lock() {
            Ok(mut queue) => queue.push_back(self.id),
            Err(poisoned) => poisoned.into_inner().push_back(self.id),
        }
    }
}

/// Handle to a spawned task's result.
pub struct JoinHandle<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<T> JoinHandle<T> {
    /// True once the task has run to completion.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Takes the task's result if it has completed.
    pub fn try_join(&self) -> Option<T> {
        match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// The deterministic lab runtime. See the module docs.
pub struct Lab {
    tasks: HashMap<u64, TaskFuture>,
    ready: ReadyQueue,
    next_id: u64,
    timer: Timer,
}

impl std::fmt::Debug for Lab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lab")
            .field("tasks", &self.tasks.len())
            .field("now", &self.timer.now())
            .finish_non_exhaustive()
    }
}

impl Default for Lab {
    fn default() -> Self {
        Self::new()
    }
}

impl Lab {
    /// Creates a lab with a fresh timer at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            ready: Arc::new(Mutex::new(VecDeque::new())),
            next_id: 0,
            timer: Timer::new(),
        }
    }

    /// The lab's timer; clones share the clock.
    #[must_use]
    pub fn timer(&self) -> Timer {
        self.timer.clone()
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.timer.now()
    }

    /// Number of live (not yet completed) tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Spawns a task; it is polled on the next run.
    pub fn spawn<F>(&mut self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let task_slot = Arc::clone(&slot);
        let wrapped = async move {
            let output = future.await;
            match task_slot.lock() {
                Ok(mut slot) => *slot = Some(output),
                Err(poisoned) => *poisoned.into_inner() = Some(output),
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        self.tasks.insert(id, Box::pin(wrapped));
        self.push_ready(id);
        JoinHandle { slot }
    }

    /// Polls woken tasks until none are runnable. Returns the number of
    /// polls performed.
    pub fn run_until_stalled(&mut self) -> usize {
        let mut polls = 0;
        while let Some(id) = self.pop_ready() {
            let Some(task) = self.tasks.get_mut(&id) else {
                // Stale wake for a completed task.
                continue;
            };
            polls += 1;
            let waker = Waker::from(Arc::new(TaskWaker {
                id,
                ready: Arc::clone(&self.ready),
            }));
            let mut cx = Context::from_waker(&waker);
            if task.as_mut().poll(&mut cx).is_ready() {
                self.tasks.remove(&id);
            }
        }
        polls
    }

    /// Advances virtual time by `delta`, firing due timer entries in
    /// deadline order and running tasks to quiescence between firings.
    pub fn advance(&mut self, delta: Duration) {
        self.run_until_stalled();
        let target = self.timer.now().saturating_add(delta);
        loop {
            match self.timer.next_deadline() {
                Some(at) if at <= target => {
                    self.timer.advance(at.saturating_sub(self.timer.now()));
                    self.run_until_stalled();
                }
                _ => break,
            }
        }
        let now = self.timer.now();
        if target > now {
            self.timer.advance(target - now);
        }
        self.run_until_stalled();
    }

    /// Drives `future` to completion, running spawned tasks as they wake.
    ///
    /// # Panics
    ///
    /// Panics if the future is still pending when no task is runnable —
    /// the lab never advances time implicitly; use [`advance`](Self::advance)
    /// for time-dependent scenarios.
    pub fn block_on<F: Future>(&mut self, future: F) -> F::Output {
        let woken = Arc::new(AtomicBool::new(true));
        let waker = Waker::from(Arc::new(MainWaker {
            woken: Arc::clone(&woken),
        }));
        let mut future = Box::pin(future);
        loop {
            if woken.swap(false, Ordering::SeqCst) {
                let mut cx = Context::from_waker(&waker);
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
            }
            let progressed = self.run_until_stalled() > 0;
            if !progressed && !woken.load(Ordering::SeqCst) {
                panic!(
                    "lab runtime stalled: the future is pending, no task is \
                     runnable, and time only moves via advance()"
                );
            }
        }
    }

    fn push_ready(&self, id: u64) {
        match self.ready.lock() {
            Ok(mut queue) => queue.push_back(id),
            Err(poisoned) => poisoned.into_inner().push_back(id),
        }
    }

    fn pop_ready(&self) -> Option<u64> {
        match self.ready.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }
}

struct MainWaker {
    woken: Arc<AtomicBool>,
}

impl Wake for MainWaker {
    fn wake(self: Arc<Self>) {
        self.woken.store(true, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn rendezvous_between_spawned_tasks() {
        init_test("rendezvous_between_spawned_tasks");
        let mut lab = Lab::new();
        let ch = Channel::new(0);

        let rx = ch.clone();
        let got = lab.spawn(async move { rx.recv().await });
        let sent = lab.spawn(async move { ch.send(42).await.is_ok() });

        lab.run_until_stalled();
        let got = got.try_join();
        crate::assert_with_log!(
            got == Some(Some(42)),
            "receiver observed the value",
            Some(Some(42)),
            got
        );
        let sent = sent.try_join();
        crate::assert_with_log!(sent == Some(true), "send completed", Some(true), sent);
        let live = lab.task_count();
        crate::assert_with_log!(live == 0, "all tasks done", 0usize, live);
        crate::test_complete!("rendezvous_between_spawned_tasks");
    }

    #[test]
    fn advance_fires_sleeps_in_order() {
        init_test("advance_fires_sleeps_in_order");
        let mut lab = Lab::new();
        let timer = lab.timer();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, ms) in [("late", 20u64), ("early", 10)] {
            let timer = timer.clone();
            let order = Arc::clone(&order);
            lab.spawn(async move {
                timer.sleep(Duration::from_millis(ms)).await;
                order.lock().expect("order lock").push(label);
            });
        }

        lab.advance(Duration::from_millis(15));
        assert_eq!(*order.lock().expect("order lock"), vec!["early"]);

        lab.advance(Duration::from_millis(5));
        assert_eq!(*order.lock().expect("order lock"), vec!["early", "late"]);
        crate::test_complete!("advance_fires_sleeps_in_order");
    }

    #[test]
    fn block_on_drives_spawned_tasks() {
        init_test("block_on_drives_spawned_tasks");
        let mut lab = Lab::new();
        let ch = Channel::new(0);

        let tx = ch.clone();
        lab.spawn(async move {
            let _ = tx.send(7).await;
        });

        let value = lab.block_on(async move { ch.recv().await });
        assert_eq!(value, Some(7));
        crate::test_complete!("block_on_drives_spawned_tasks");
    }

    #[test]
    #[should_panic(expected = "lab runtime stalled")]
    fn block_on_panics_on_deadlock() {
        let mut lab = Lab::new();
        let ch = Channel::<u32>::new(0);
        let _ = lab.block_on(async move { ch.recv().await });
    }
}
