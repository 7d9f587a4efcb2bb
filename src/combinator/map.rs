//! Map adapters over the read and write side of a channel.

use crate::channel::Channel;
use crate::error::{SendError, TryRecvError, TrySendError};

/// Read side of a channel with a mapping applied to every received value.
/// Created by [`map_recv`].
pub struct MapRecv<T, F> {
    channel: Channel<T>,
    map: F,
}

impl<T, F> std::fmt::Debug for MapRecv<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapRecv").finish_non_exhaustive()
    }
}

impl<T, U, F> MapRecv<T, F>
where
    T: Send + 'static,
    F: Fn(T) -> U,
{
    /// Receives the next value through the mapping; `None` once the
    /// underlying channel is drained and closed.
    pub async fn recv(&self) -> Option<U> {
        self.channel.recv().await.map(&self.map)
    }

    /// Non-blocking receive through the mapping.
    pub fn try_recv(&self) -> Result<U, TryRecvError> {
        self.channel.try_recv().map(&self.map)
    }

    /// The underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }
}

/// Wraps the read side of `channel`, applying `map` to every value.
pub fn map_recv<T, U, F>(channel: Channel<T>, map: F) -> MapRecv<T, F>
where
    T: Send + 'static,
    F: Fn(T) -> U,
{
    MapRecv { channel, map }
}

/// Write side of a channel with a mapping applied to every sent value.
/// Created by [`map_send`].
pub struct MapSend<T, F> {
    channel: Channel<T>,
    map: F,
}

impl<T, F> std::fmt::Debug for MapSend<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapSend").finish_non_exhaustive()
    }
}

impl<T, F> MapSend<T, F>
where
    T: Send + 'static,
{
    /// Sends a value through the mapping. A closed-channel failure hands
    /// back the already-mapped value.
    pub async fn send<U>(&self, value: U) -> Result<(), SendError<T>>
    where
        F: Fn(U) -> T,
    {
        self.channel.send((self.map)(value)).await
    }

    /// Non-blocking send through the mapping.
    pub fn try_send<U>(&self, value: U) -> Result<(), TrySendError<T>>
    where
        F: Fn(U) -> T,
    {
        self.channel.try_send((self.map)(value))
    }

    /// The underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }
}

/// Wraps the write side of `channel`, applying `map` to every value.
pub fn map_send<T, U, F>(channel: Channel<T>, map: F) -> MapSend<T, F>
where
    T: Send + 'static,
    F: Fn(U) -> T,
{
    MapSend { channel, map }
}
