//! One-shot completion bound to an optional cancellation token.
//!
//! [`Completion`] is the scoped acquire/release primitive everything else
//! builds on: channel readiness waits, select arm waits, and timer waits
//! all construct one. The constructor runs an *executor* closure that may
//! settle the completion synchronously or register asynchronous work and
//! hand back a cleanup; the completion then guarantees:
//!
//! - the abort listener (if a token was given) is removed on settle, on
//!   abort, and on drop — never leaked;
//! - the cleanup runs exactly once, and only when the completion did NOT
//!   settle normally (abort before settle, or drop while pending);
//! - a settle that lands in the same cooperative step as an abort wins —
//!   the cleanup is then not invoked.
//!
//! Dropping a pending completion is cancellation (the usual Rust idiom):
//! listener removed, cleanup run, no trace left behind.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Waker};

use crate::cancel::{CancelToken, ListenerKey};
use crate::error::Aborted;

/// Cleanup handed back by a completion executor; runs on abort-before-settle
/// or on drop-while-pending. Must not panic.
pub type Cleanup = Box<dyn FnOnce() + Send>;

struct Shared<T> {
    outcome: Option<Result<T, Aborted>>,
    taken: bool,
    waker: Option<Waker>,
    cleanup: Option<Cleanup>,
    detach: Option<(CancelToken, ListenerKey)>,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            outcome: None,
            taken: false,
            waker: None,
            cleanup: None,
            detach: None,
        }
    }
}

fn lock<T>(shared: &Mutex<Shared<T>>) -> std::sync::MutexGuard<'_, Shared<T>> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Settles a completion once. Returns false if it was already settled.
///
/// `run_cleanup` is true only on the abort path: the cleanup fires AFTER
/// the failure outcome is recorded and the waker notified. On a normal
/// settle the cleanup is dropped unrun.
fn settle<T>(shared: &Arc<Mutex<Shared<T>>>, result: Result<T, Aborted>, run_cleanup: bool) -> bool {
    let (waker, detach, cleanup) = {
        let mut guard = lock(shared);
        if guard.outcome.is_some() || guard.taken {
            return false;
        }
        guard.outcome = Some(result);
        (guard.waker.take(), guard.detach.take(), guard.cleanup.take())
    };
    if let Some(waker) = waker {
        waker.wake();
    }
    if let Some((token, key)) = detach {
        token.remove_listener(key);
    }
    if run_cleanup {
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
    true
}

/// Handle for settling a [`Completion`]. Cloneable; holds only a weak
/// reference, so a settler outliving its completion settles nothing.
pub struct Settler<T> {
    shared: Weak<Mutex<Shared<T>>>,
}

impl<T> Clone for Settler<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Settler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settler").finish_non_exhaustive()
    }
}

impl<T> Settler<T> {
    /// Settles the completion with a value. Returns true if this call won
    /// the settle (false if already settled or the completion is gone).
    pub fn settle(&self, value: T) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| settle(&shared, Ok(value), false))
    }
}

/// A one-shot completion future: `Output = Result<T, Aborted>`.
///
/// See the module docs for the lifecycle contract.
pub struct Completion<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("settled", &self.is_settled())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Completion<T> {
    /// Builds a completion from an executor, optionally bound to a token.
    ///
    /// If the token is already cancelled, the executor is NOT invoked and
    /// the completion is immediately failed with [`Aborted`]. Otherwise the
    /// executor receives a [`Settler`] and may settle synchronously or
    /// return a cleanup to run on abort.
    pub fn new<E>(token: Option<&CancelToken>, executor: E) -> Self
    where
        E: FnOnce(Settler<T>) -> Option<Cleanup>,
    {
        let shared = Arc::new(Mutex::new(Shared::new()));

        if let Some(reason) = token.and_then(CancelToken::reason) {
            lock(&shared).outcome = Some(Err(Aborted::new(reason)));
            return Self { shared };
        }

        let settler = Settler {
            shared: Arc::downgrade(&shared),
        };
        let cleanup = executor(settler);

        {
            let mut guard = lock(&shared);
            if guard.outcome.is_some() {
                // Settled synchronously; the cleanup must never run.
                drop(guard);
                drop(cleanup);
                return Self { shared };
            }
            guard.cleanup = cleanup;
        }

        if let Some(token) = token {
            let weak = Arc::downgrade(&shared);
            let registered = token.on_cancel(move |reason| {
                if let Some(shared) = weak.upgrade() {
                    settle(&shared, Err(Aborted::new(reason.clone())), true);
                }
            });
            match registered {
                Some(key) => {
                    let mut guard = lock(&shared);
                    if guard.outcome.is_none() {
                        guard.detach = Some((token.clone(), key));
                    } else {
                        drop(guard);
                        token.remove_listener(key);
                    }
                }
                // Token cancelled between the entry check and registration:
                // the listener fired synchronously and settled us.
                None => {}
            }
        }

        Self { shared }
    }

    /// A completion that is already settled with a value.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let shared = Arc::new(Mutex::new(Shared::new()));
        lock(&shared).outcome = Some(Ok(value));
        Self { shared }
    }

    /// A completion that never settles on its own; it fails only if the
    /// given token cancels. Used for conditional select arms.
    #[must_use]
    pub fn never(token: Option<&CancelToken>) -> Self {
        Self::new(token, |_settler| None)
    }
}

impl<T> Completion<T> {
    /// Returns true once the completion has settled (value or abort).
    #[must_use]
    pub fn is_settled(&self) -> bool {
        let guard = lock(&self.shared);
        guard.outcome.is_some() || guard.taken
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, Aborted>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = lock(&self.shared);
        assert!(!guard.taken, "Completion polled after it resolved");
        if let Some(outcome) = guard.outcome.take() {
            guard.taken = true;
            Poll::Ready(outcome)
        } else {
            guard.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        let (detach, cleanup) = {
            let mut guard = lock(&self.shared);
            if guard.outcome.is_some() || guard.taken {
                (guard.detach.take(), None)
            } else {
                (guard.detach.take(), guard.cleanup.take())
            }
        };
        if let Some((token, key)) = detach {
            token.remove_listener(key);
        }
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancelKind, CancelReason, CancelSource};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::task::Wake;

    struct NoopWaker;
    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);
        Pin::new(fut).poll(&mut cx)
    }

    #[test]
    fn synchronous_settle_resolves() {
        let mut completion = Completion::new(None, |settler: Settler<u32>| {
            assert!(settler.settle(7));
            None
        });
        assert!(matches!(poll_once(&mut completion), Poll::Ready(Ok(7))));
    }

    #[test]
    fn asynchronous_settle_wakes_and_resolves() {
        let mut kept: Option<Settler<u32>> = None;
        let mut completion = Completion::new(None, |settler| {
            kept = Some(settler);
            None
        });
        assert!(poll_once(&mut completion).is_pending());

        let settler = kept.expect("executor ran");
        assert!(settler.settle(9));
        assert!(matches!(poll_once(&mut completion), Poll::Ready(Ok(9))));
    }

    #[test]
    fn settle_is_first_wins() {
        let mut kept: Option<Settler<u32>> = None;
        let completion = Completion::new(None, |settler| {
            kept = Some(settler);
            None
        });
        let settler = kept.expect("executor ran");
        assert!(settler.settle(1));
        assert!(!settler.settle(2));
        drop(completion);
    }

    #[test]
    fn pre_cancelled_token_skips_executor() {
        let mut source = CancelSource::new();
        source.cancel(CancelReason::user("stop"));
        let token = source.token();

        let ran = AtomicBool::new(false);
        let mut completion = Completion::new(Some(&token), |_settler: Settler<u32>| {
            ran.store(true, Ordering::SeqCst);
            None
        });

        assert!(!ran.load(Ordering::SeqCst), "executor must not run");
        match poll_once(&mut completion) {
            Poll::Ready(Err(aborted)) => {
                assert_eq!(aborted.reason.kind(), CancelKind::User);
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[test]
    fn abort_before_settle_runs_cleanup_once() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let mut source = CancelSource::new();
        let token = source.token();

        let c = Arc::clone(&cleaned);
        let mut completion = Completion::new(Some(&token), |_settler: Settler<u32>| {
            Some(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }) as Cleanup)
        });
        assert!(poll_once(&mut completion).is_pending());
        assert_eq!(token.listener_count(), 1);

        source.cancel(CancelReason::timeout());
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(token.listener_count(), 0);

        match poll_once(&mut completion) {
            Poll::Ready(Err(aborted)) => {
                assert_eq!(aborted.reason.kind(), CancelKind::Timeout);
            }
            other => panic!("expected abort, got {other:?}"),
        }

        // Dropping after the abort must not re-run the cleanup.
        drop(completion);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn settle_beats_abort_in_same_step() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let mut source = CancelSource::new();
        let token = source.token();

        let mut kept: Option<Settler<u32>> = None;
        let c = Arc::clone(&cleaned);
        let mut completion = Completion::new(Some(&token), |settler| {
            kept = Some(settler);
            Some(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }) as Cleanup)
        });

        // Resolve first, then the abort arrives: resolve wins, no cleanup.
        assert!(kept.expect("executor ran").settle(3));
        source.cancel(CancelReason::user("late"));

        assert!(matches!(poll_once(&mut completion), Poll::Ready(Ok(3))));
        assert_eq!(cleaned.load(Ordering::SeqCst), 0);
        assert_eq!(token.listener_count(), 0);
    }

    #[test]
    fn settle_removes_abort_listener() {
        let source = CancelSource::new();
        let token = source.token();

        let mut kept: Option<Settler<u32>> = None;
        let completion = Completion::new(Some(&token), |settler| {
            kept = Some(settler);
            None
        });
        assert_eq!(token.listener_count(), 1);

        assert!(kept.expect("executor ran").settle(1));
        assert_eq!(token.listener_count(), 0);
        drop(completion);
        assert_eq!(token.listener_count(), 0);
    }

    #[test]
    fn drop_while_pending_releases_everything() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let source = CancelSource::new();
        let token = source.token();

        let c = Arc::clone(&cleaned);
        let completion = Completion::new(Some(&token), |_settler: Settler<u32>| {
            Some(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }) as Cleanup)
        });
        assert_eq!(token.listener_count(), 1);

        drop(completion);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(token.listener_count(), 0);
    }

    #[test]
    fn no_token_means_no_abort_and_no_cleanup_on_settle() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let mut kept: Option<Settler<u32>> = None;
        let c = Arc::clone(&cleaned);
        let mut completion = Completion::new(None, |settler| {
            kept = Some(settler);
            Some(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }) as Cleanup)
        });

        assert!(kept.expect("executor ran").settle(5));
        assert!(matches!(poll_once(&mut completion), Poll::Ready(Ok(5))));
        drop(completion);
        assert_eq!(cleaned.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ready_and_never_constructors() {
        let mut ready = Completion::ready(11);
        assert!(matches!(poll_once(&mut ready), Poll::Ready(Ok(11))));

        let source = CancelSource::new();
        let token = source.token();
        let mut never = Completion::<u32>::never(Some(&token));
        assert!(poll_once(&mut never).is_pending());
        assert!(poll_once(&mut never).is_pending());
    }
}
