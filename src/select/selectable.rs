//! The [`Selectable`] contract and the built-in selectables.
//!
//! A selectable is an operation `select` can race without committing it:
//! `wait` resolves when the operation *probably* can commit, `attempt`
//! actually commits — or reports that another task stole the resource
//! between the wake and the attempt, in which case select re-arms.
//!
//! Channel receive/send selectables are built by
//! [`Channel::race_recv`](crate::channel::Channel::race_recv) /
//! [`Channel::race_send`](crate::channel::Channel::race_send). This module
//! adds the timer deadline, cancellation-watch, and never selectables.

use std::convert::Infallible;
use std::time::Duration;

use crate::cancel::{CancelReason, CancelToken};
use crate::channel::Channel;
use crate::completion::{Cleanup, Completion};
use crate::error::{ArmError, SendError, TryRecvError, TrySendError};
use crate::time::Timer;

/// Result of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The operation committed with this output.
    Ready(T),
    /// The resource was stolen (or never there); re-arm and wait again.
    Blocked,
}

/// An operation that can be raced by `select`.
pub trait Selectable {
    /// What a committed attempt produces.
    type Output;

    /// Arms a wait that resolves when the next [`attempt`](Self::attempt)
    /// is likely to commit. The wait must release every resource it
    /// acquired when it is aborted or dropped.
    fn wait(&mut self, token: &CancelToken) -> Completion<()>;

    /// Tries to commit. `Blocked` means a steal happened; an error is
    /// surfaced as [`SelectError::Arm`](crate::error::SelectError::Arm).
    fn attempt(&mut self) -> Result<Attempt<Self::Output>, ArmError>;
}

/// Selectable receive; see [`Channel::race_recv`].
#[derive(Debug)]
pub struct RecvSelect<T> {
    channel: Channel<T>,
}

impl<T: Send + 'static> RecvSelect<T> {
    pub(crate) fn new(channel: Channel<T>) -> Self {
        Self { channel }
    }
}

impl<T: Send + 'static> Selectable for RecvSelect<T> {
    type Output = Option<T>;

    fn wait(&mut self, token: &CancelToken) -> Completion<()> {
        self.channel.wait_readable((), Some(token))
    }

    fn attempt(&mut self) -> Result<Attempt<Self::Output>, ArmError> {
        match self.channel.try_recv() {
            Ok(value) => Ok(Attempt::Ready(Some(value))),
            Err(TryRecvError::Closed) => Ok(Attempt::Ready(None)),
            Err(TryRecvError::Empty) => Ok(Attempt::Blocked),
        }
    }
}

/// Selectable send; see [`Channel::race_send`]. The value is committed only
/// when this arm wins; attempting against a closed channel fails the arm.
#[derive(Debug)]
pub struct SendSelect<T> {
    channel: Channel<T>,
    value: Option<T>,
}

impl<T: Send + 'static> SendSelect<T> {
    pub(crate) fn new(channel: Channel<T>, value: T) -> Self {
        Self {
            channel,
            value: Some(value),
        }
    }
}

impl<T: Send + 'static> Selectable for SendSelect<T> {
    type Output = ();

    fn wait(&mut self, token: &CancelToken) -> Completion<()> {
        self.channel.wait_writable((), Some(token))
    }

    fn attempt(&mut self) -> Result<Attempt<Self::Output>, ArmError> {
        let Some(value) = self.value.take() else {
            return Ok(Attempt::Blocked);
        };
        match self.channel.try_send(value) {
            Ok(()) => Ok(Attempt::Ready(())),
            Err(TrySendError::Full(value)) => {
                self.value = Some(value);
                Ok(Attempt::Blocked)
            }
            Err(TrySendError::Closed(_)) => Err(Box::new(SendError(()))),
        }
    }
}

/// Selectable deadline backed by a [`Timer`]. The deadline is fixed the
/// first time the arm is waited on.
#[derive(Debug)]
pub struct DeadlineSelect {
    timer: Timer,
    delay: Duration,
    deadline: Option<Duration>,
}

impl DeadlineSelect {
    /// Creates a deadline selectable firing `delay` after it is first
    /// armed.
    #[must_use]
    pub fn new(timer: Timer, delay: Duration) -> Self {
        Self {
            timer,
            delay,
            deadline: None,
        }
    }
}

impl Selectable for DeadlineSelect {
    type Output = ();

    fn wait(&mut self, token: &CancelToken) -> Completion<()> {
        let timer = self.timer.clone();
        let deadline = *self
            .deadline
            .get_or_insert_with(|| timer.now().saturating_add(self.delay));
        Completion::new(Some(token), move |settler| {
            if timer.now() >= deadline {
                settler.settle(());
                return None;
            }
            let key = timer.schedule_at(deadline, move || {
                let _ = settler.settle(());
            });
            Some(Box::new(move || timer.cancel(key)) as Cleanup)
        })
    }

    fn attempt(&mut self) -> Result<Attempt<Self::Output>, ArmError> {
        let fired = self
            .deadline
            .is_some_and(|deadline| self.timer.now() >= deadline);
        Ok(if fired {
            Attempt::Ready(())
        } else {
            Attempt::Blocked
        })
    }
}

/// Selectable that commits once a watched token cancels, yielding the
/// cancellation reason.
#[derive(Debug)]
pub struct CancelSelect {
    watched: CancelToken,
}

impl CancelSelect {
    /// Creates a selectable watching the given token.
    #[must_use]
    pub fn new(watched: CancelToken) -> Self {
        Self { watched }
    }
}

impl Selectable for CancelSelect {
    type Output = CancelReason;

    fn wait(&mut self, token: &CancelToken) -> Completion<()> {
        let watched = self.watched.clone();
        Completion::new(Some(token), move |settler| {
            match watched.on_cancel(move |_reason| {
                let _ = settler.settle(());
            }) {
                Some(key) => {
                    let watched = watched.clone();
                    Some(Box::new(move || watched.remove_listener(key)) as Cleanup)
                }
                // Already cancelled: the listener fired synchronously.
                None => None,
            }
        })
    }

    fn attempt(&mut self) -> Result<Attempt<Self::Output>, ArmError> {
        Ok(self.watched.reason().map_or(Attempt::Blocked, Attempt::Ready))
    }
}

/// Selectable that never fires and never commits; for conditional arms.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSelect;

impl Selectable for NeverSelect {
    type Output = Infallible;

    fn wait(&mut self, token: &CancelToken) -> Completion<()> {
        Completion::never(Some(token))
    }

    fn attempt(&mut self) -> Result<Attempt<Self::Output>, ArmError> {
        Ok(Attempt::Blocked)
    }
}
