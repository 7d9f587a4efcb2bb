//! Cancellation reason types.
//!
//! Cancellation is a first-class signal, not a silent drop. A
//! [`CancelReason`] travels with every abort so that the party observing an
//! [`Aborted`](crate::error::Aborted) failure can tell why it happened:
//! explicit user request, an elapsed deadline, losing a `select` race, or
//! shutdown of the surrounding system.

use core::fmt;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// Cancellation due to an elapsed timeout or deadline.
    Timeout,
    /// Cancellation because another branch of a race committed first.
    RaceLost,
    /// Cancellation due to shutdown of the surrounding system.
    Shutdown,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Timeout => write!(f, "timeout"),
            Self::RaceLost => write!(f, "race lost"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The reason for a cancellation: a kind plus optional context.
///
/// The message is `&'static str` so that reasons stay cheap to clone and
/// deterministic to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    kind: CancelKind,
    message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a reason with the given kind and no message.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// A user cancellation with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// A timeout cancellation.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// A race-loser cancellation (another branch committed first).
    #[must_use]
    pub const fn race_lost() -> Self {
        Self::new(CancelKind::RaceLost)
    }

    /// A shutdown cancellation.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(CancelKind::Shutdown)
    }

    /// Returns the kind of this reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// Returns the optional message.
    #[must_use]
    pub const fn message(&self) -> Option<&'static str> {
        self.message
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let reason = CancelReason::user("stop requested");
        assert_eq!(reason.to_string(), "user: stop requested");
    }

    #[test]
    fn display_without_message() {
        assert_eq!(CancelReason::race_lost().to_string(), "race lost");
        assert_eq!(CancelReason::timeout().to_string(), "timeout");
        assert_eq!(CancelReason::shutdown().to_string(), "shutdown");
    }

    #[test]
    fn kinds_are_distinguishable() {
        assert_ne!(CancelReason::timeout(), CancelReason::shutdown());
        assert_eq!(CancelReason::timeout(), CancelReason::timeout());
    }
}
