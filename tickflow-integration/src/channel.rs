use futures::Stream;
use std::{
    fmt::Debug,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;

pub use tokio::sync::mpsc::error::{SendError, TrySendError};

/// Convenience type that holds the [`BoundedTx`] and [`BoundedRx`].
#[derive(Debug)]
pub struct Channel<T> {
    pub tx: BoundedTx<T>,
    pub rx: BoundedRx<T>,
}

impl<T> Channel<T> {
    /// Construct a new bounded [`Channel`] with the provided capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }
}

/// Construct a new bounded channel pair with the provided capacity.
///
/// Every queue in the pipeline is bounded, so this is the only constructor offered.
pub fn bounded<T>(capacity: usize) -> (BoundedTx<T>, BoundedRx<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (BoundedTx::new(tx), BoundedRx::new(rx))
}

#[derive(Debug)]
pub struct BoundedTx<T> {
    pub tx: mpsc::Sender<T>,
}

impl<T> BoundedTx<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }

    /// Send an item, waiting for queue capacity (backpressure).
    pub async fn send(&self, item: T) -> Result<(), SendError<T>> {
        self.tx.send(item).await
    }

    /// Send an item only if queue capacity is available right now.
    ///
    /// Used where the drop policy allows a sample to be superseded by the next one.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        self.tx.try_send(item)
    }

    /// `true` once every [`BoundedRx`] has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Clone for BoundedTx<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Debug)]
pub struct BoundedRx<T> {
    pub rx: mpsc::Receiver<T>,
}

impl<T> BoundedRx<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Receive the next item, or `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> tokio_stream::wrappers::ReceiverStream<T> {
        tokio_stream::wrappers::ReceiverStream::new(self.rx)
    }
}

impl<T> Stream for BoundedRx<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_send_drops_when_full() {
        let (tx, mut rx) = bounded::<u8>(1);
        tx.try_send(1).unwrap();

        assert!(matches!(tx.try_send(2), Err(TrySendError::Full(2))));
        assert_eq!(rx.recv().await, Some(1));

        tx.try_send(3).unwrap();
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn test_recv_none_after_all_senders_dropped() {
        let (tx, mut rx) = bounded::<u8>(4);
        tx.send(1).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }
}
