//! A fixed-capacity FIFO decoupling the drain task from whatever consumes
//! the puller's output, backed directly by a bounded `tokio::sync::mpsc`
//! channel rather than a hand-rolled ring buffer: the channel already gives
//! us blocking backpressure and cancellation composes for free via
//! `tokio::select!`.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::PullerError;

pub struct ChanBuffer<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
}

impl<T: Send + 'static> ChanBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Blocks until there's room, or `cancel` fires.
    pub async fn add_entry(&self, item: T, cancel: &CancellationToken) -> Result<(), PullerError> {
        tokio::select! {
            res = self.tx.send(item) => res.map_err(|_| PullerError::BufferClosed),
            _ = cancel.cancelled() => Err(PullerError::Cancelled),
        }
    }

    /// Blocks until an item is available, or `cancel` fires.
    ///
    /// Intended for a single consumer at a time; concurrent callers would
    /// race over the same underlying receiver.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<T, PullerError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            item = rx.recv() => item.ok_or(PullerError::BufferClosed),
            _ = cancel.cancelled() => Err(PullerError::Cancelled),
        }
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_get_round_trips_in_order() {
        let buf: ChanBuffer<u32> = ChanBuffer::new(4);
        let cancel = CancellationToken::new();
        buf.add_entry(1, &cancel).await.unwrap();
        buf.add_entry(2, &cancel).await.unwrap();
        assert_eq!(buf.get(&cancel).await.unwrap(), 1);
        assert_eq!(buf.get(&cancel).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn len_reflects_queued_items() {
        let buf: ChanBuffer<u32> = ChanBuffer::new(4);
        let cancel = CancellationToken::new();
        assert_eq!(buf.len(), 0);
        buf.add_entry(1, &cancel).await.unwrap();
        assert_eq!(buf.len(), 1);
        buf.get(&cancel).await.unwrap();
        assert_eq!(buf.len(), 0);
    }

    #[tokio::test]
    async fn add_blocks_at_capacity_until_drained() {
        let buf: ChanBuffer<u32> = ChanBuffer::new(1);
        let cancel = CancellationToken::new();
        buf.add_entry(1, &cancel).await.unwrap();

        let cancel2 = cancel.clone();
        let mut blocked = Box::pin(buf.add_entry(2, &cancel2));
        tokio::select! {
            _ = &mut blocked => panic!("add_entry should have blocked at capacity"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }

        buf.get(&cancel).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_millis(200), blocked)
            .await
            .expect("add should resume once space frees up")
            .unwrap();
    }

    #[tokio::test]
    async fn get_errors_on_cancellation() {
        let buf: ChanBuffer<u32> = ChanBuffer::new(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            buf.get(&cancel).await.unwrap_err(),
            PullerError::Cancelled
        ));
    }
}
