//! Cancellation plumbing: reasons, tokens, and linked sources.
//!
//! Cancellation here is cooperative and structured. A [`CancelSource`]
//! cancels; [`CancelToken`]s observe; a [`CancelReason`] travels with the
//! broadcast so downstream waiters can report why they were torn down.
//!
//! Every abortable wait in this crate routes its cleanup through
//! [`Completion`](crate::Completion), which uses the listener bookkeeping
//! defined in this module — so removing a waiter on abort is O(1) and
//! observable through [`CancelToken::listener_count`].

mod reason;
mod token;

pub use reason::{CancelKind, CancelReason};
pub use token::{CancelSource, CancelToken, ListenerKey};
