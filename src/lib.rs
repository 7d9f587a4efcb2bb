//! Cochan: CSP-style channels, fair select, and cancellation for
//! cooperatively scheduled tasks.
//!
//! # Overview
//!
//! The central object is the [`Channel`]: a typed rendezvous point with an
//! optional FIFO buffer, shared freely through cheap handle clones. Around
//! it sit three pieces that do the real work:
//!
//! - the channel state machine itself — blocking `send`/`recv`,
//!   non-blocking `try_` variants, readiness waits, and a close transition
//!   that settles every parked operation;
//! - [`select`], a fair multi-way race that commits exactly one of a set
//!   of named arms, shuffles for uniform tie-break, and survives "steal"
//!   races by re-arming;
//! - the cancellation primitive they share: [`Completion`], a one-shot
//!   bound to a [`CancelToken`](cancel::CancelToken) with guaranteed
//!   listener and waiter cleanup on every exit path.
//!
//! # Core Guarantees
//!
//! - **Exactly-one commit**: a `select` commits one arm; losers mutate no
//!   channel state and leave no listeners, timers, or waiter entries.
//! - **Steal safety**: a woken arm re-checks before committing; another
//!   task consuming the value in between never produces a false win.
//! - **Cancellation is cleanup**: aborting (or dropping) any suspended
//!   operation removes its waiter immediately — observable through the
//!   waiter counts.
//! - **Deterministic testing**: the [`lab`] runtime drives everything on
//!   virtual time with reproducible scheduling.
//!
//! # Module Structure
//!
//! - [`channel`]: the channel state machine and its futures
//! - [`select`]: the fair race, [`Selectable`](select::Selectable), and
//!   helper arms (deadline, cancellation watch, never)
//! - [`cancel`]: cancel sources, tokens, reasons
//! - [`completion`]: the one-shot completion primitive
//! - [`combinator`]: merge, time-partitioned batching, timeout channels,
//!   map adapters
//! - [`stream`]: async-stream view of a channel
//! - [`time`]: virtual-clock timer driver
//! - [`lab`]: deterministic single-threaded runtime for tests
//! - [`ring`]: the FIFO ring buffer collaborator
//! - [`error`]: error types
//! - [`util`]: deterministic RNG and seed derivation
//! - [`test_utils`]: logging and assertion helpers for tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod channel;
pub mod combinator;
pub mod completion;
pub mod error;
pub mod lab;
pub mod ring;
pub mod select;
pub mod stream;
pub mod test_utils;
pub mod time;
pub mod util;

pub use cancel::{CancelKind, CancelReason, CancelSource, CancelToken};
pub use channel::Channel;
pub use completion::{Cleanup, Completion, Settler};
pub use error::{Aborted, SelectError, SendError, TryRecvError, TrySendError};
pub use select::{Select, Selectable};
pub use time::Timer;
