//! The channel: a typed rendezvous point with an optional FIFO buffer.
//!
//! A [`Channel`] is a cheap cloneable handle; every clone talks to the same
//! state. Capacity 0 makes it a pure rendezvous (a send completes only when
//! a receiver takes the value); capacity N buffers up to N values and
//! applies backpressure beyond that.
//!
//! ```text
//!   send(v) ──► blocked receiver? ──► hand v over directly
//!                  │ no
//!                  ▼
//!               buffer room? ──► append v
//!                  │ no
//!                  ▼
//!               park as a blocked send (backpressure)
//! ```
//!
//! Four waiter sets hang off the state: blocked sends, blocked receives,
//! and the readable/writable readiness subscribers used by `select`. The
//! invariants connecting them:
//!
//! - a blocked receive never coexists with an available value (buffered or
//!   in a blocked send);
//! - for capacity > 0, sends block only while the buffer is full;
//! - readiness subscribers exist only while the channel is NOT in the
//!   corresponding ready state — a successful send wakes at most one
//!   readable subscriber (the one that can actually proceed), and only
//!   `close` wakes them all;
//! - once closed: no live blocked sends remain, new sends fail, receives
//!   drain the buffer FIFO and then yield `None` forever.
//!
//! Dropping a suspended `send`/`recv` future cancels exactly that
//! operation: the waiter is tombstoned in place and the public counters
//! update immediately, with no other effect on channel state.

mod waiters;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use smallvec::SmallVec;

use crate::cancel::CancelToken;
use crate::completion::{Cleanup, Completion};
use crate::error::{SendError, TryRecvError, TrySendError};
use crate::ring::RingBuffer;
use crate::select::{RecvSelect, SendSelect};
use crate::stream::RecvStream;

use waiters::{RecvWaiter, SendWaiter, Thunk, WaitSet};

struct State<T> {
    buffer: RingBuffer<T>,
    blocked_sends: VecDeque<Arc<Mutex<SendWaiter<T>>>>,
    live_sends: usize,
    blocked_recvs: VecDeque<Arc<Mutex<RecvWaiter<T>>>>,
    live_recvs: usize,
    readable_waits: WaitSet,
    writable_waits: WaitSet,
    closed: bool,
}

impl<T> State<T> {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: RingBuffer::new(capacity),
            blocked_sends: VecDeque::new(),
            live_sends: 0,
            blocked_recvs: VecDeque::new(),
            live_recvs: 0,
            readable_waits: WaitSet::new(),
            writable_waits: WaitSet::new(),
            closed: false,
        }
    }

    /// The next `recv` would not suspend.
    fn is_readable(&self) -> bool {
        self.closed || !self.buffer.is_empty() || self.live_sends > 0
    }

    /// The next `send` would not suspend (a closed channel fails without
    /// suspending, so it counts as writable). The zero-capacity buffer is
    /// permanently full, which leaves only a blocked receiver to write to.
    fn is_writable(&self) -> bool {
        self.closed || !self.buffer.is_full() || self.live_recvs > 0
    }

    /// Pops the oldest live blocked send, skipping tombstones.
    fn pop_live_send(&mut self) -> Option<Arc<Mutex<SendWaiter<T>>>> {
        while let Some(waiter) = self.blocked_sends.pop_front() {
            if !lock_waiter(&waiter).cancelled {
                self.live_sends -= 1;
                return Some(waiter);
            }
        }
        None
    }

    /// Pops the oldest live blocked receive, skipping tombstones.
    fn pop_live_recv(&mut self) -> Option<Arc<Mutex<RecvWaiter<T>>>> {
        while let Some(waiter) = self.blocked_recvs.pop_front() {
            if !lock_waiter(&waiter).cancelled {
                self.live_recvs -= 1;
                return Some(waiter);
            }
        }
        None
    }
}

fn lock<T>(state: &Mutex<State<T>>) -> std::sync::MutexGuard<'_, State<T>> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock_waiter<W>(waiter: &Mutex<W>) -> std::sync::MutexGuard<'_, W> {
    match waiter.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Wakeups accumulated under the state lock, fired after it is released.
#[derive(Default)]
struct WakeBatch {
    thunks: SmallVec<[Thunk; 4]>,
    wakers: SmallVec<[Waker; 4]>,
}

impl WakeBatch {
    fn fire(self) {
        for waker in self.wakers {
            waker.wake();
        }
        for thunk in self.thunks {
            thunk();
        }
    }
}

/// Outcome of the non-blocking receive step.
enum RecvStep<T> {
    Value(T),
    Closed,
    Empty,
}

enum SendStarted<T> {
    Done(Result<(), SendError<T>>),
    Waiting(Arc<Mutex<SendWaiter<T>>>),
}

enum RecvStarted<T> {
    Done(Option<T>),
    Waiting(Arc<Mutex<RecvWaiter<T>>>),
}

/// A typed rendezvous channel handle. Clones share the same channel.
pub struct Channel<T> {
    shared: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared);
        f.debug_struct("Channel")
            .field("capacity", &state.buffer.capacity())
            .field("len", &state.buffer.len())
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Creates a channel. Capacity 0 is a pure rendezvous; capacity N
    /// buffers up to N values.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Mutex::new(State::new(capacity))),
        }
    }

    /// Delivers a value, suspending while the channel is full (or, when
    /// unbuffered, until a receiver takes it).
    ///
    /// Fails with [`SendError`] — returning the value — if the channel is
    /// closed, whether it was closed before the call or while suspended.
    /// Dropping the returned future cancels just this send.
    pub fn send(&self, value: T) -> SendFuture<T> {
        SendFuture {
            channel: self.clone(),
            value: Some(value),
            waiter: None,
            done: false,
        }
    }

    /// Delivers a value only if that cannot suspend.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut batch = WakeBatch::default();
        let result = {
            let mut state = lock(&self.shared);
            if state.closed {
                Err(TrySendError::Closed(value))
            } else if let Some(receiver) = state.pop_live_recv() {
                settle_recv(&receiver, Some(value), &mut batch);
                Ok(())
            } else {
                match state.buffer.write(value) {
                    Ok(()) => {
                        if let Some(thunk) = state.readable_waits.take_one() {
                            batch.thunks.push(thunk);
                        }
                        Ok(())
                    }
                    Err(value) => Err(TrySendError::Full(value)),
                }
            }
        };
        batch.fire();
        result
    }

    /// Takes the next value, suspending while none is available.
    ///
    /// Resolves to `None` once the channel is closed and drained. Dropping
    /// the returned future cancels just this receive.
    pub fn recv(&self) -> RecvFuture<T> {
        RecvFuture {
            channel: self.clone(),
            waiter: None,
            done: false,
        }
    }

    /// Takes a value only if one is immediately available.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut batch = WakeBatch::default();
        let result = {
            let mut state = lock(&self.shared);
            match recv_step(&mut state, &mut batch) {
                RecvStep::Value(v) => Ok(v),
                RecvStep::Closed => Err(TryRecvError::Closed),
                RecvStep::Empty => Err(TryRecvError::Empty),
            }
        };
        batch.fire();
        result
    }

    /// Resolves with `tag` once the next `recv` would not suspend (a value
    /// is available or the channel is closed).
    ///
    /// Aborting `token` fails the wait with
    /// [`Aborted`](crate::error::Aborted) and removes the subscription
    /// immediately (observable via [`readable_waits_count`]).
    ///
    /// [`readable_waits_count`]: Self::readable_waits_count
    pub fn wait_readable<K: Send + 'static>(
        &self,
        tag: K,
        token: Option<&CancelToken>,
    ) -> Completion<K> {
        let shared = Arc::clone(&self.shared);
        Completion::new(token, move |settler| {
            let mut state = lock(&shared);
            if state.is_readable() {
                drop(state);
                settler.settle(tag);
                return None;
            }
            let key = state.readable_waits.insert(Box::new(move || {
                let _ = settler.settle(tag);
            }));
            drop(state);
            let weak = Arc::downgrade(&shared);
            Some(Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    lock(&shared).readable_waits.remove(key);
                }
            }) as Cleanup)
        })
    }

    /// Resolves with `tag` once the next `send` would not suspend: buffer
    /// room, a blocked receiver to rendezvous with, or the channel closed
    /// (the send then fails without suspending).
    pub fn wait_writable<K: Send + 'static>(
        &self,
        tag: K,
        token: Option<&CancelToken>,
    ) -> Completion<K> {
        let shared = Arc::clone(&self.shared);
        Completion::new(token, move |settler| {
            let mut state = lock(&shared);
            if state.is_writable() {
                drop(state);
                settler.settle(tag);
                return None;
            }
            let key = state.writable_waits.insert(Box::new(move || {
                let _ = settler.settle(tag);
            }));
            drop(state);
            let weak = Arc::downgrade(&shared);
            Some(Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    lock(&shared).writable_waits.remove(key);
                }
            }) as Cleanup)
        })
    }

    /// A [`Selectable`](crate::select::Selectable) receive for `select`.
    #[must_use]
    pub fn race_recv(&self) -> RecvSelect<T> {
        RecvSelect::new(self.clone())
    }

    /// A [`Selectable`](crate::select::Selectable) send for `select`. The
    /// value is committed only if this arm wins.
    #[must_use]
    pub fn race_send(&self, value: T) -> SendSelect<T> {
        SendSelect::new(self.clone(), value)
    }

    /// Closes the channel. Idempotent.
    ///
    /// Every blocked receive resolves `None`; every blocked send fails with
    /// its value handed back; every readiness subscriber fires (a closed
    /// channel is both readable and writable by the "next op won't
    /// suspend" definition). Buffered values survive and are drained by
    /// later `recv`s before `None`.
    pub fn close(&self) {
        let mut batch = WakeBatch::default();
        {
            let mut state = lock(&self.shared);
            if state.closed {
                return;
            }
            state.closed = true;

            while let Some(receiver) = state.blocked_recvs.pop_front() {
                let mut waiter = lock_waiter(&receiver);
                if waiter.cancelled {
                    continue;
                }
                waiter.outcome = Some(None);
                if let Some(waker) = waiter.waker.take() {
                    batch.wakers.push(waker);
                }
            }
            state.live_recvs = 0;

            while let Some(sender) = state.blocked_sends.pop_front() {
                let mut waiter = lock_waiter(&sender);
                if waiter.cancelled {
                    continue;
                }
                let value = waiter.value.take().expect("live send waiter holds a value");
                waiter.outcome = Some(Err(SendError(value)));
                if let Some(waker) = waiter.waker.take() {
                    batch.wakers.push(waker);
                }
            }
            state.live_sends = 0;

            batch.thunks.extend(state.readable_waits.take_all());
            batch.thunks.extend(state.writable_waits.take_all());
        }
        tracing::trace!("channel closed");
        batch.fire();
    }

    /// Async-stream view: yields values until the channel is drained and
    /// closed.
    #[must_use]
    pub fn stream(&self) -> RecvStream<T> {
        RecvStream::new(self.clone())
    }

    fn start_send(&self, value: T, waker: &Waker) -> SendStarted<T> {
        let mut batch = WakeBatch::default();
        let started = {
            let mut state = lock(&self.shared);
            if state.closed {
                SendStarted::Done(Err(SendError(value)))
            } else if let Some(receiver) = state.pop_live_recv() {
                settle_recv(&receiver, Some(value), &mut batch);
                SendStarted::Done(Ok(()))
            } else {
                // The value is about to become observable, either buffered
                // or as a blocked send; one readable subscriber can proceed.
                if let Some(thunk) = state.readable_waits.take_one() {
                    batch.thunks.push(thunk);
                }
                match state.buffer.write(value) {
                    Ok(()) => SendStarted::Done(Ok(())),
                    Err(value) => {
                        let waiter = Arc::new(Mutex::new(SendWaiter::new(value, waker.clone())));
                        state.blocked_sends.push_back(Arc::clone(&waiter));
                        state.live_sends += 1;
                        SendStarted::Waiting(waiter)
                    }
                }
            }
        };
        batch.fire();
        started
    }

    fn start_recv(&self, waker: &Waker) -> RecvStarted<T> {
        let mut batch = WakeBatch::default();
        let started = {
            let mut state = lock(&self.shared);
            match recv_step(&mut state, &mut batch) {
                RecvStep::Value(v) => RecvStarted::Done(Some(v)),
                RecvStep::Closed => RecvStarted::Done(None),
                RecvStep::Empty => {
                    // A parked receiver is something a writable subscriber
                    // can rendezvous with.
                    if let Some(thunk) = state.writable_waits.take_one() {
                        batch.thunks.push(thunk);
                    }
                    let waiter = Arc::new(Mutex::new(RecvWaiter::new(waker.clone())));
                    state.blocked_recvs.push_back(Arc::clone(&waiter));
                    state.live_recvs += 1;
                    RecvStarted::Waiting(waiter)
                }
            }
        };
        batch.fire();
        started
    }
}

impl<T> Channel<T> {
    /// The fixed buffer capacity (0 for unbuffered).
    #[must_use]
    pub fn capacity(&self) -> usize {
        lock(&self.shared).buffer.capacity()
    }

    /// Number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.shared).buffer.len()
    }

    /// True if no values are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.shared).buffer.is_empty()
    }

    /// True once [`close`](Channel::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.shared).closed
    }

    /// Number of live readable-readiness subscribers. Observability only.
    #[must_use]
    pub fn readable_waits_count(&self) -> usize {
        lock(&self.shared).readable_waits.count()
    }

    /// Number of live writable-readiness subscribers. Observability only.
    #[must_use]
    pub fn writable_waits_count(&self) -> usize {
        lock(&self.shared).writable_waits.count()
    }

    /// Number of live blocked sends. Observability only.
    #[must_use]
    pub fn blocked_sends_count(&self) -> usize {
        lock(&self.shared).live_sends
    }

    /// Number of live blocked receives. Observability only.
    #[must_use]
    pub fn blocked_recvs_count(&self) -> usize {
        lock(&self.shared).live_recvs
    }
}

/// The shared non-blocking receive step.
///
/// Buffered: pop the head; if a blocked send is parked, shift its value
/// into the freed slot and settle it, otherwise one writable subscriber can
/// proceed. Unbuffered: rendezvous directly with the oldest blocked send.
fn recv_step<T>(state: &mut State<T>, batch: &mut WakeBatch) -> RecvStep<T> {
    if state.buffer.capacity() == 0 {
        if let Some(sender) = state.pop_live_send() {
            let mut waiter = lock_waiter(&sender);
            let value = waiter.value.take().expect("live send waiter holds a value");
            waiter.outcome = Some(Ok(()));
            if let Some(waker) = waiter.waker.take() {
                batch.wakers.push(waker);
            }
            return RecvStep::Value(value);
        }
        return if state.closed {
            RecvStep::Closed
        } else {
            RecvStep::Empty
        };
    }

    match state.buffer.read() {
        Some(value) => {
            if let Some(sender) = state.pop_live_send() {
                let mut waiter = lock_waiter(&sender);
                let shifted = waiter.value.take().expect("live send waiter holds a value");
                match state.buffer.write(shifted) {
                    Ok(()) => {}
                    Err(_) => unreachable!("buffer slot was freed by the read above"),
                }
                waiter.outcome = Some(Ok(()));
                if let Some(waker) = waiter.waker.take() {
                    batch.wakers.push(waker);
                }
            } else if let Some(thunk) = state.writable_waits.take_one() {
                batch.thunks.push(thunk);
            }
            RecvStep::Value(value)
        }
        None => {
            if state.closed {
                RecvStep::Closed
            } else {
                RecvStep::Empty
            }
        }
    }
}

fn settle_recv<T>(waiter: &Arc<Mutex<RecvWaiter<T>>>, outcome: Option<T>, batch: &mut WakeBatch) {
    let mut guard = lock_waiter(waiter);
    guard.outcome = Some(outcome);
    if let Some(waker) = guard.waker.take() {
        batch.wakers.push(waker);
    }
}

/// Future returned by [`Channel::send`].
#[must_use = "futures do nothing unless polled"]
pub struct SendFuture<T> {
    channel: Channel<T>,
    value: Option<T>,
    waiter: Option<Arc<Mutex<SendWaiter<T>>>>,
    done: bool,
}

impl<T> Unpin for SendFuture<T> {}

impl<T: Send + 'static> Future for SendFuture<T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        assert!(!this.done, "SendFuture polled after it resolved");

        if let Some(waiter) = &this.waiter {
            let mut guard = lock_waiter(waiter);
            if let Some(outcome) = guard.outcome.take() {
                drop(guard);
                this.waiter = None;
                this.done = true;
                return Poll::Ready(outcome);
            }
            guard.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let value = this.value.take().expect("send value present before start");
        match this.channel.start_send(value, cx.waker()) {
            SendStarted::Done(result) => {
                this.done = true;
                Poll::Ready(result)
            }
            SendStarted::Waiting(waiter) => {
                this.waiter = Some(waiter);
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for SendFuture<T> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            // Same tombstoning as cancel_send, without the T bounds that
            // the inherent impl carries.
            let mut state = lock(&self.channel.shared);
            let mut guard = lock_waiter(&waiter);
            if guard.outcome.is_none() && !guard.cancelled {
                guard.cancelled = true;
                state.live_sends -= 1;
            }
        }
    }
}

/// Future returned by [`Channel::recv`].
#[must_use = "futures do nothing unless polled"]
pub struct RecvFuture<T> {
    channel: Channel<T>,
    waiter: Option<Arc<Mutex<RecvWaiter<T>>>>,
    done: bool,
}

impl<T: Send + 'static> Future for RecvFuture<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        assert!(!this.done, "RecvFuture polled after it resolved");

        if let Some(waiter) = &this.waiter {
            let mut guard = lock_waiter(waiter);
            if let Some(outcome) = guard.outcome.take() {
                drop(guard);
                this.waiter = None;
                this.done = true;
                return Poll::Ready(outcome);
            }
            guard.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        match this.channel.start_recv(cx.waker()) {
            RecvStarted::Done(result) => {
                this.done = true;
                Poll::Ready(result)
            }
            RecvStarted::Waiting(waiter) => {
                this.waiter = Some(waiter);
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for RecvFuture<T> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            let mut state = lock(&self.channel.shared);
            let mut guard = lock_waiter(&waiter);
            if guard.outcome.is_none() && !guard.cancelled {
                guard.cancelled = true;
                state.live_recvs -= 1;
            }
        }
    }
}
