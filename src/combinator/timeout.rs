//! Timeout channels.

use std::time::Duration;

use crate::channel::Channel;
use crate::time::Timer;

/// A channel that closes once `duration` elapses on `timer`.
///
/// Receiving from it (directly or as a `select` arm) yields `None` from
/// that point on, which makes it a drop-in "give up after N ms" source.
#[must_use]
pub fn timeout(timer: &Timer, duration: Duration) -> Channel<()> {
    let ch = Channel::new(0);
    let fire = ch.clone();
    timer.schedule(duration, move || fire.close());
    ch
}
