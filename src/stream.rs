//! Async stream view of a channel.
//!
//! [`Stream`] is the crate-local async iterator contract (the shape of
//! `Iterator`, producing values over time); [`RecvStream`] adapts repeated
//! [`Channel::recv`](crate::channel::Channel::recv) calls into one,
//! terminating when the channel is drained and closed.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::channel::{Channel, RecvFuture};

/// An asynchronous sequence of values.
pub trait Stream {
    /// The type of item this stream yields.
    type Item;

    /// Attempts to pull the next value. `Ready(None)` means the stream is
    /// finished.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>>;

    /// Bounds on the number of remaining items: `(lower, upper)`.
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

impl<S: Stream + Unpin + ?Sized> Stream for &mut S {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut **self).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (**self).size_hint()
    }
}

/// Extension methods for [`Stream`].
pub trait StreamExt: Stream {
    /// Resolves with the next item, or `None` at the end of the stream.
    fn next(&mut self) -> Next<'_, Self>
    where
        Self: Unpin,
    {
        Next { stream: self }
    }
}

impl<S: Stream + ?Sized> StreamExt for S {}

/// Future returned by [`StreamExt::next`].
#[must_use = "futures do nothing unless polled"]
pub struct Next<'a, S: ?Sized> {
    stream: &'a mut S,
}

impl<S: Stream + Unpin + ?Sized> Future for Next<'_, S> {
    type Output = Option<S::Item>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut *self.stream).poll_next(cx)
    }
}

/// Stream of values received from a [`Channel`]; ends once the channel is
/// drained and closed. Created by
/// [`Channel::stream`](crate::channel::Channel::stream).
#[must_use = "streams do nothing unless polled"]
pub struct RecvStream<T> {
    channel: Channel<T>,
    pending: Option<RecvFuture<T>>,
    finished: bool,
}

impl<T> std::fmt::Debug for RecvStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> RecvStream<T> {
    pub(crate) fn new(channel: Channel<T>) -> Self {
        Self {
            channel,
            pending: None,
            finished: false,
        }
    }
}

impl<T: Send + 'static> Stream for RecvStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let recv = this.pending.get_or_insert_with(|| this.channel.recv());
        match Pin::new(recv).poll(cx) {
            Poll::Ready(item) => {
                this.pending = None;
                if item.is_none() {
                    this.finished = true;
                }
                Poll::Ready(item)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            (self.channel.len(), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::task::{Wake, Waker};

    struct NoopWaker;
    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    fn poll_next_once<S: Stream + Unpin>(stream: &mut S) -> Poll<Option<S::Item>> {
        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);
        Pin::new(stream).poll_next(&mut cx)
    }

    #[test]
    fn yields_buffered_values_then_ends_on_close() {
        let ch = Channel::new(4);
        for i in 1..=3 {
            ch.try_send(i).expect("room");
        }
        ch.close();

        let mut stream = ch.stream();
        assert!(matches!(poll_next_once(&mut stream), Poll::Ready(Some(1))));
        assert!(matches!(poll_next_once(&mut stream), Poll::Ready(Some(2))));
        assert!(matches!(poll_next_once(&mut stream), Poll::Ready(Some(3))));
        assert!(matches!(poll_next_once(&mut stream), Poll::Ready(None)));
        // Fused after the end.
        assert!(matches!(poll_next_once(&mut stream), Poll::Ready(None)));
    }

    #[test]
    fn pends_while_channel_open_and_empty() {
        let ch = Channel::<u32>::new(1);
        let mut stream = ch.stream();
        assert!(poll_next_once(&mut stream).is_pending());

        ch.try_send(9).expect("room");
        assert!(matches!(poll_next_once(&mut stream), Poll::Ready(Some(9))));
    }

    #[test]
    fn size_hint_tracks_buffer() {
        let ch = Channel::new(4);
        ch.try_send(1).expect("room");
        ch.try_send(2).expect("room");
        let stream = ch.stream();
        assert_eq!(stream.size_hint(), (2, None));
    }
}
