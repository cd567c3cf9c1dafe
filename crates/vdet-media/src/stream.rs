//! Cancellable, back-pressured result streams.
//!
//! A producer task writes `Result<T, E>` items into a bounded channel; the
//! consumer reads them through [`CancellableStream`], which implements
//! [`futures::Stream`]. An `Err` item is terminal. Cancelling (or dropping) the
//! stream signals the producer, and the consumer side then yields exactly one
//! cancellation error before ending, so items already received are never
//! followed by a silent truncation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::cancel::{cancel_pair, CancelHandle, CancelSignal};
use crate::error::Cancellation;

/// Consumer side of a producer task.
pub struct CancellableStream<T, E> {
    rx: mpsc::Receiver<Result<T, E>>,
    handle: CancelHandle,
    signal: CancelSignal,
    finished: bool,
}

/// Producer side handed to the spawned task.
pub struct StreamSender<T, E> {
    tx: mpsc::Sender<Result<T, E>>,
    signal: CancelSignal,
}

impl<T, E> CancellableStream<T, E>
where
    T: Send + 'static,
    E: Cancellation + Send + 'static,
{
    /// Spawn `producer` on the runtime, connected through a channel holding at
    /// most `buffer` unread items.
    pub fn spawn<F, Fut>(buffer: usize, producer: F) -> Self
    where
        F: FnOnce(StreamSender<T, E>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (handle, signal) = cancel_pair();
        let sender = StreamSender {
            tx,
            signal: signal.clone(),
        };
        tokio::spawn(producer(sender));

        Self {
            rx,
            handle,
            signal,
            finished: false,
        }
    }
}

impl<T, E> CancellableStream<T, E> {
    /// Stop the producer. The next item yielded is a cancellation error.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Handle that cancels this stream from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}

impl<T, E> Unpin for CancellableStream<T, E> {}

impl<T, E: Cancellation> Stream for CancellableStream<T, E> {
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.signal.is_cancelled() {
            this.finished = true;
            this.rx.close();
            return Poll::Ready(Some(Err(E::cancelled())));
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Err(err))) => {
                this.finished = true;
                this.rx.close();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> Drop for CancellableStream<T, E> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

impl<T, E: Cancellation> StreamSender<T, E> {
    /// Cancellation signal of the consuming stream.
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    /// True once the consumer cancelled or went away.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled() || self.tx.is_closed()
    }

    /// Deliver an item, waiting for buffer space.
    ///
    /// Returns `false` when the consumer cancelled or dropped the stream; the
    /// producer should stop.
    pub async fn send(&self, item: T) -> bool {
        tokio::select! {
            biased;
            _ = self.signal.cancelled() => false,
            sent = self.tx.send(Ok(item)) => sent.is_ok(),
        }
    }

    /// Deliver the terminal error.
    pub async fn fail(&self, err: E) {
        tokio::select! {
            biased;
            _ = self.signal.cancelled() => {}
            _ = self.tx.send(Err(err)) => {}
        }
    }

    /// Report cancellation without waiting for buffer space.
    pub fn finish_cancelled(&self) {
        let _ = self.tx.try_send(Err(E::cancelled()));
    }
}
