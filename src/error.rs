//! Error types for channel, wait, and select operations.
//!
//! Errors are explicit and typed, one shape per operation:
//!
//! - [`SendError`] / [`TrySendError`]: the channel was closed (the value is
//!   handed back), or a non-blocking send found the buffer full.
//! - [`TryRecvError`]: a non-blocking receive found the channel empty, or
//!   drained and closed.
//! - [`Aborted`]: an abortable wait whose [`CancelToken`] tripped.
//! - [`SelectError`]: a `select` either aborted as a whole or had an arm
//!   whose commit attempt failed; the arm name is preserved for
//!   diagnostics.
//!
//! Argument errors (zero group sizes and the like) are panics at the call
//! site, not `Result`s.
//!
//! [`CancelToken`]: crate::cancel::CancelToken

use core::fmt;

use crate::cancel::CancelReason;

/// Error returned by [`Channel::send`](crate::channel::Channel::send) when
/// the channel is closed, carrying the undelivered value back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Consumes the error, returning the undelivered value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sending on a closed channel")
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// Error returned by [`Channel::try_send`](crate::channel::Channel::try_send).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The channel is closed; the value is handed back.
    Closed(T),
    /// The send would block (buffer full, no blocked receiver).
    Full(T),
}

impl<T> TrySendError<T> {
    /// Consumes the error, returning the undelivered value.
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(v) | Self::Full(v) => v,
        }
    }

    /// Returns true if the channel was closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    /// Returns true if the send would block.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(_) => write!(f, "sending on a closed channel"),
            Self::Full(_) => write!(f, "channel is full"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}

/// Error returned by [`Channel::try_recv`](crate::channel::Channel::try_recv).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// The receive would block (no value available, channel still open).
    #[error("channel is empty")]
    Empty,
    /// The channel is drained and closed.
    #[error("channel is closed")]
    Closed,
}

/// Failure of an abortable wait: its [`CancelToken`] tripped before the
/// wait completed.
///
/// [`CancelToken`]: crate::cancel::CancelToken
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operation aborted: {reason}")]
pub struct Aborted {
    /// Why the wait was aborted.
    pub reason: CancelReason,
}

impl Aborted {
    /// Creates an abort failure from a reason.
    #[must_use]
    pub const fn new(reason: CancelReason) -> Self {
        Self { reason }
    }
}

/// Error type carried by failing select arms.
pub type ArmError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by [`Select::run`](crate::select::Select::run).
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// The caller's token tripped before any arm committed. All pending
    /// arms were cancelled; no channel state was mutated.
    #[error("select aborted: {0}")]
    Aborted(#[from] Aborted),
    /// An arm's commit attempt failed (for example, a send arm raced a
    /// channel close). The arm name identifies the culprit.
    #[error("select arm '{arm}' failed: {source}")]
    Arm {
        /// Name of the failing arm.
        arm: &'static str,
        /// The underlying failure.
        #[source]
        source: ArmError,
    },
}

impl SelectError {
    /// Returns true if the select as a whole was aborted.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    /// Returns the failing arm name, if an arm failed.
    #[must_use]
    pub const fn arm(&self) -> Option<&'static str> {
        match self {
            Self::Aborted(_) => None,
            Self::Arm { arm, .. } => Some(arm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelReason;

    #[test]
    fn send_error_returns_value() {
        let err = SendError(41);
        assert_eq!(err.to_string(), "sending on a closed channel");
        assert_eq!(err.into_inner(), 41);
    }

    #[test]
    fn try_send_error_predicates() {
        let full = TrySendError::Full("v");
        assert!(full.is_full());
        assert!(!full.is_closed());
        assert_eq!(full.into_inner(), "v");

        let closed = TrySendError::Closed("w");
        assert!(closed.is_closed());
        assert_eq!(closed.to_string(), "sending on a closed channel");
    }

    #[test]
    fn aborted_display_carries_reason() {
        let err = Aborted::new(CancelReason::race_lost());
        assert_eq!(err.to_string(), "operation aborted: race lost");
    }

    #[test]
    fn select_error_preserves_arm_name() {
        let err = SelectError::Arm {
            arm: "upstream",
            source: Box::new(SendError(())),
        };
        assert_eq!(err.arm(), Some("upstream"));
        assert!(err.to_string().contains("upstream"));

        let aborted = SelectError::Aborted(Aborted::new(CancelReason::user("bye")));
        assert!(aborted.is_aborted());
        assert_eq!(aborted.arm(), None);
    }
}
