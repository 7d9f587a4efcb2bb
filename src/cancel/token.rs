//! One-shot cancellation broadcast: [`CancelSource`] / [`CancelToken`].
//!
//! A source owns the right to cancel; tokens observe it. Cancellation is a
//! one-shot broadcast: the first `cancel` wins, fires every registered
//! listener exactly once, and later calls are no-ops. Listener registration
//! and removal are the only bookkeeping: [`Completion`](crate::Completion)
//! builds its abort linkage out of `on_cancel`/`remove_listener`, and the
//! listener count is observable so tests can prove nothing leaks.
//!
//! [`CancelSource::linked`] chains a source under an upstream token:
//! cancelling the upstream propagates down (with its reason), cancelling or
//! dropping the linked source detaches the single upstream listener.

use std::sync::{Arc, Mutex, Weak};

use crate::cancel::CancelReason;

/// A once-listener invoked with the cancellation reason.
type Listener = Box<dyn FnOnce(&CancelReason) + Send>;

/// Key identifying a registered listener for removal.
///
/// Keys are single-use: remove a listener at most once per registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerKey(usize);

#[derive(Default)]
struct TokenState {
    cancelled: Option<CancelReason>,
    /// Listener slots. Stable indices; removal blanks the slot and trailing
    /// blanks are trimmed, so the vector stays small between bursts.
    listeners: Vec<Option<Listener>>,
}

impl TokenState {
    fn trim(&mut self) {
        while self.listeners.last().is_some_and(Option::is_none) {
            self.listeners.pop();
        }
    }
}

fn lock(state: &Mutex<TokenState>) -> std::sync::MutexGuard<'_, TokenState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fires cancellation on a token state: records the reason, drains and
/// invokes every listener. No-op if already cancelled.
fn fire(state: &Mutex<TokenState>, reason: CancelReason) {
    let listeners: Vec<Listener> = {
        let mut guard = lock(state);
        if guard.cancelled.is_some() {
            return;
        }
        guard.cancelled = Some(reason.clone());
        guard.listeners.drain(..).flatten().collect()
    };
    tracing::trace!(%reason, listeners = listeners.len(), "cancellation fired");
    for listener in listeners {
        listener(&reason);
    }
}

/// The observing side of a cancellation broadcast. Cheap to clone.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<Mutex<TokenState>>,
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl CancelToken {
    /// Returns true if the source has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        lock(&self.state).cancelled.is_some()
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        lock(&self.state).cancelled.clone()
    }

    /// Registers a once-listener.
    ///
    /// If the token is already cancelled the listener fires synchronously
    /// and `None` is returned (there is nothing to remove). Otherwise the
    /// returned key removes the listener via [`remove_listener`].
    ///
    /// [`remove_listener`]: Self::remove_listener
    pub fn on_cancel<F>(&self, listener: F) -> Option<ListenerKey>
    where
        F: FnOnce(&CancelReason) + Send + 'static,
    {
        let already = {
            let mut guard = lock(&self.state);
            if let Some(reason) = guard.cancelled.clone() {
                Some(reason)
            } else {
                guard.listeners.push(Some(Box::new(listener)));
                return Some(ListenerKey(guard.listeners.len() - 1));
            }
        };
        // Fire outside the lock.
        if let Some(reason) = already {
            listener(&reason);
        }
        None
    }

    /// Removes a previously registered listener. Idempotent for a key that
    /// already fired or was removed.
    pub fn remove_listener(&self, key: ListenerKey) {
        let mut guard = lock(&self.state);
        if let Some(slot) = guard.listeners.get_mut(key.0) {
            *slot = None;
        }
        guard.trim();
    }

    /// Number of currently registered listeners. Observability only.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.state)
            .listeners
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

/// The cancelling side of the broadcast.
///
/// Dropping a source detaches it from any upstream link but does NOT cancel
/// its token; cancellation is always an explicit [`cancel`](Self::cancel).
pub struct CancelSource {
    state: Arc<Mutex<TokenState>>,
    upstream: Option<(CancelToken, ListenerKey)>,
}

impl std::fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSource")
            .field("linked", &self.upstream.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    /// Creates a standalone source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TokenState::default())),
            upstream: None,
        }
    }

    /// Creates a source chained under an optional upstream token.
    ///
    /// Cancelling the upstream cancels this source's token with the
    /// upstream reason; cancelling (or dropping) this source detaches the
    /// single listener it holds on the upstream. If the upstream is already
    /// cancelled, the new source's token starts out cancelled.
    #[must_use]
    pub fn linked(upstream: Option<&CancelToken>) -> Self {
        let mut source = Self::new();
        if let Some(up) = upstream {
            let weak: Weak<Mutex<TokenState>> = Arc::downgrade(&source.state);
            let key = up.on_cancel(move |reason| {
                if let Some(state) = weak.upgrade() {
                    fire(&state, reason.clone());
                }
            });
            source.upstream = key.map(|k| (up.clone(), k));
        }
        source
    }

    /// Returns an observing token.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            state: Arc::clone(&self.state),
        }
    }

    /// Cancels with the given reason. First call wins; listeners fire
    /// exactly once; any upstream link is detached.
    pub fn cancel(&mut self, reason: CancelReason) {
        fire(&self.state, reason);
        self.detach();
    }

    fn detach(&mut self) {
        if let Some((upstream, key)) = self.upstream.take() {
            upstream.remove_listener(key);
        }
    }
}

impl Drop for CancelSource {
    fn drop(&mut self) {
        self.detach();
    }
}
