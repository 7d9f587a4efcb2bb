//! Composition operators built on the channel/select core.
//!
//! Everything here is mechanical composition: fan-in [`merge`],
//! time-partitioned batching [`partition_time`], the [`timeout`] channel,
//! and the [`MapRecv`]/[`MapSend`] adapters. The interesting machinery
//! (waiter management, fairness, cancellation) lives in the core these are
//! written against.
//!
//! `merge` and `partition_time` return a driver future alongside their
//! output channel; spawn it on whatever executor runs your tasks (the
//! [`lab`](crate::lab) runtime in tests).

mod map;
mod merge;
mod partition;
mod timeout;

pub use map::{map_recv, map_send, MapRecv, MapSend};
pub use merge::merge;
pub use partition::partition_time;
pub use timeout::timeout;
