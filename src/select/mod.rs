//! Fair multi-way race over channel operations, completions, and timers.
//!
//! [`Select`] races a set of named arms and commits exactly one:
//!
//! ```text
//! let winner = Select::new()
//!     .recv("upstream", &input, Event::Value)
//!     .deadline("idle", &timer, Duration::from_millis(100), || Event::Idle)
//!     .on_cancel("stop", &stop_token, Event::Stopped)
//!     .run()
//!     .await?;
//! ```
//!
//! Fairness comes from two properties:
//!
//! - arms are shuffled once (Fisher-Yates over a deterministic RNG) before
//!   the race starts, so ties break uniformly and every arm keeps its
//!   randomized position across re-arms;
//! - every arm — channel op, plain future, factory — is polled inside the
//!   same poll of the select future, so no arm kind gains a dispatch-depth
//!   advantage over another.
//!
//! **Steal races.** On a cooperative scheduler another task can consume a
//! value between the moment an arm's wait resolves and the moment select
//! runs. `attempt` reports that as `Blocked` and the arm is re-armed with a
//! fresh wait in the same poll; select never assumes a woken arm is
//! committable.
//!
//! **Teardown.** Whether select commits, fails, or is dropped, its internal
//! cancel source fires with `race lost`: all pending arm waits abort and
//! release their listeners, timer entries, and waiter-set entries. Losing
//! arms mutate no channel state.

mod selectable;

pub use selectable::{Attempt, CancelSelect, DeadlineSelect, NeverSelect, RecvSelect, Selectable, SendSelect};

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::cancel::{CancelReason, CancelSource, CancelToken};
use crate::channel::Channel;
use crate::completion::Completion;
use crate::error::SelectError;
use crate::time::Timer;
use crate::util::{entropy, DetRng};

trait ArmDriver<T> {
    fn poll_arm(
        &mut self,
        cx: &mut Context<'_>,
        token: &CancelToken,
        name: &'static str,
    ) -> Poll<Result<T, SelectError>>;
}

struct Arm<T> {
    name: &'static str,
    driver: Box<dyn ArmDriver<T>>,
}

/// Selectable arm: wait, attempt, re-arm on steal.
struct SelectableArm<S, F> {
    sel: S,
    map: Option<F>,
    wait: Option<Completion<()>>,
}

impl<T, S, F> ArmDriver<T> for SelectableArm<S, F>
where
    S: Selectable,
    F: FnOnce(S::Output) -> T,
{
    fn poll_arm(
        &mut self,
        cx: &mut Context<'_>,
        token: &CancelToken,
        name: &'static str,
    ) -> Poll<Result<T, SelectError>> {
        loop {
            if self.wait.is_none() {
                self.wait = Some(self.sel.wait(token));
            }
            let wait = self.wait.as_mut().expect("arm was just armed");
            match Pin::new(wait).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(aborted)) => {
                    return Poll::Ready(Err(SelectError::Aborted(aborted)))
                }
                Poll::Ready(Ok(())) => {
                    self.wait = None;
                    match self.sel.attempt() {
                        Ok(Attempt::Ready(output)) => {
                            let map = self.map.take().expect("arm commits at most once");
                            return Poll::Ready(Ok(map(output)));
                        }
                        Ok(Attempt::Blocked) => {
                            tracing::trace!(arm = name, "select arm stolen; re-arming");
                        }
                        Err(source) => {
                            return Poll::Ready(Err(SelectError::Arm { arm: name, source }))
                        }
                    }
                }
            }
        }
    }
}

/// Plain completion arm: any future, polled in place.
struct FutureArm<T> {
    future: Pin<Box<dyn Future<Output = T>>>,
}

impl<T> ArmDriver<T> for FutureArm<T> {
    fn poll_arm(
        &mut self,
        cx: &mut Context<'_>,
        _token: &CancelToken,
        _name: &'static str,
    ) -> Poll<Result<T, SelectError>> {
        self.future.as_mut().poll(cx).map(Ok)
    }
}

/// Factory arm: instantiated with the per-select token on first poll.
enum FactoryArm<T> {
    Init(Box<dyn FnOnce(CancelToken) -> Pin<Box<dyn Future<Output = T>>>>),
    Running(Pin<Box<dyn Future<Output = T>>>),
    Spent,
}

impl<T> ArmDriver<T> for FactoryArm<T> {
    fn poll_arm(
        &mut self,
        cx: &mut Context<'_>,
        token: &CancelToken,
        _name: &'static str,
    ) -> Poll<Result<T, SelectError>> {
        if let Self::Init(_) = self {
            let Self::Init(factory) = std::mem::replace(self, Self::Spent) else {
                unreachable!("variant checked above");
            };
            *self = Self::Running(factory(token.clone()));
        }
        match self {
            Self::Running(future) => future.as_mut().poll(cx).map(Ok),
            Self::Init(_) | Self::Spent => unreachable!("factory arm left unarmed"),
        }
    }
}

/// Builder for a fair multi-way race. See the module docs.
///
/// A select with no arms (or only `never` arms) pends until the caller's
/// token cancels it.
#[must_use = "a Select does nothing until run() is awaited"]
pub struct Select<T> {
    arms: Vec<Arm<T>>,
    caller: Option<CancelToken>,
    seed: Option<u64>,
}

impl<T: 'static> Default for Select<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Select<T> {
    /// Creates an empty select.
    pub fn new() -> Self {
        Self {
            arms: Vec::new(),
            caller: None,
            seed: None,
        }
    }

    /// Binds the select to a caller token: cancelling it aborts the whole
    /// select with [`SelectError::Aborted`].
    pub fn with_token(mut self, token: &CancelToken) -> Self {
        self.caller = Some(token.clone());
        self
    }

    /// Pins the shuffle seed; fresh process-local entropy is used
    /// otherwise.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Adds a custom selectable arm.
    pub fn selectable<S, F>(mut self, name: &'static str, sel: S, map: F) -> Self
    where
        S: Selectable + 'static,
        F: FnOnce(S::Output) -> T + 'static,
    {
        self.arms.push(Arm {
            name,
            driver: Box::new(SelectableArm {
                sel,
                map: Some(map),
                wait: None,
            }),
        });
        self
    }

    /// Adds a receive arm; the mapper sees `None` when the channel is
    /// drained and closed.
    pub fn recv<U, F>(self, name: &'static str, channel: &Channel<U>, map: F) -> Self
    where
        U: Send + 'static,
        F: FnOnce(Option<U>) -> T + 'static,
    {
        self.selectable(name, channel.race_recv(), map)
    }

    /// Adds a send arm; the value is committed only if this arm wins. A
    /// send racing a close fails the arm with [`SelectError::Arm`].
    pub fn send<U, F>(self, name: &'static str, channel: &Channel<U>, value: U, map: F) -> Self
    where
        U: Send + 'static,
        F: FnOnce() -> T + 'static,
    {
        self.selectable(name, channel.race_send(value), move |()| map())
    }

    /// Adds a deadline arm firing `delay` after the select starts.
    pub fn deadline<F>(self, name: &'static str, timer: &Timer, delay: Duration, map: F) -> Self
    where
        F: FnOnce() -> T + 'static,
    {
        self.selectable(name, DeadlineSelect::new(timer.clone(), delay), move |()| {
            map()
        })
    }

    /// Adds an arm that commits when `watched` cancels, yielding the
    /// reason.
    pub fn on_cancel<F>(self, name: &'static str, watched: &CancelToken, map: F) -> Self
    where
        F: FnOnce(CancelReason) -> T + 'static,
    {
        self.selectable(name, CancelSelect::new(watched.clone()), map)
    }

    /// Adds an arm that never fires; for keeping a branch shape with a
    /// condition turned off.
    pub fn never(self, name: &'static str) -> Self {
        self.selectable(name, NeverSelect, |never| match never {})
    }

    /// Adds a plain completion arm.
    pub fn complete<Fut>(mut self, name: &'static str, future: Fut) -> Self
    where
        Fut: Future<Output = T> + 'static,
    {
        self.arms.push(Arm {
            name,
            driver: Box::new(FutureArm {
                future: Box::pin(future),
            }),
        });
        self
    }

    /// Adds a factory arm: the closure receives the per-select token and
    /// returns the future to race.
    pub fn factory<Fac, Fut>(mut self, name: &'static str, factory: Fac) -> Self
    where
        Fac: FnOnce(CancelToken) -> Fut + 'static,
        Fut: Future<Output = T> + 'static,
    {
        self.arms.push(Arm {
            name,
            driver: Box::new(FactoryArm::Init(Box::new(move |token| {
                Box::pin(factory(token))
            }))),
        });
        self
    }

    /// Shuffles the arms and starts the race.
    pub fn run(self) -> SelectFuture<T> {
        let mut arms = self.arms;
        let seed = self.seed.unwrap_or_else(entropy::next_seed);
        DetRng::new(seed).shuffle(&mut arms);

        let source = CancelSource::linked(self.caller.as_ref());
        let token = source.token();
        let abort_watch = Completion::never(Some(&token));
        SelectFuture {
            arms,
            source,
            token,
            abort_watch,
            done: false,
        }
    }
}

/// Future returned by [`Select::run`].
#[must_use = "futures do nothing unless polled"]
pub struct SelectFuture<T> {
    arms: Vec<Arm<T>>,
    source: CancelSource,
    token: CancelToken,
    abort_watch: Completion<()>,
    done: bool,
}

impl<T> SelectFuture<T> {
    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.source.cancel(CancelReason::race_lost());
        }
    }
}

impl<T> Future for SelectFuture<T> {
    type Output = Result<T, SelectError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        assert!(!this.done, "SelectFuture polled after it resolved");

        match Pin::new(&mut this.abort_watch).poll(cx) {
            Poll::Ready(Err(aborted)) => {
                this.finish();
                return Poll::Ready(Err(SelectError::Aborted(aborted)));
            }
            Poll::Ready(Ok(())) => unreachable!("abort watch never resolves with a value"),
            Poll::Pending => {}
        }

        for arm in &mut this.arms {
            match arm.driver.poll_arm(cx, &this.token, arm.name) {
                Poll::Ready(Ok(value)) => {
                    tracing::trace!(arm = arm.name, "select committed");
                    this.finish();
                    return Poll::Ready(Ok(value));
                }
                Poll::Ready(Err(error)) => {
                    this.finish();
                    return Poll::Ready(Err(error));
                }
                Poll::Pending => {}
            }
        }
        Poll::Pending
    }
}

impl<T> Drop for SelectFuture<T> {
    fn drop(&mut self) {
        // Dropping mid-race still tears every arm down.
        if !self.done {
            self.done = true;
            self.source.cancel(CancelReason::race_lost());
        }
    }
}
