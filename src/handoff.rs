//! A single-slot rendezvous channel.
//!
//! A value handed to [`HandoffSender::send`] is not considered sent until
//! the receiving side has actually taken it, so the sender can never get
//! more than one value ahead of the receiver. Neither end can be cloned:
//! each channel has exactly one producer and one consumer.

use tokio::sync::{mpsc, oneshot};

use crate::error::PipelineError;

type Envelope<T> = (T, oneshot::Sender<()>);

pub struct HandoffSender<T> {
    slot: mpsc::Sender<Envelope<T>>,
}

pub struct HandoffReceiver<T> {
    slot: mpsc::Receiver<Envelope<T>>,
}

pub fn handoff<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { slot: tx }, HandoffReceiver { slot: rx })
}

impl<T> HandoffSender<T> {
    /// Waits until the receiver has taken `value`.
    ///
    /// Dropping the returned future before it completes withdraws the value:
    /// the receiver will skip it. Fails with [`PipelineError::Closed`] once
    /// the receiver is gone.
    pub async fn send(&mut self, value: T) -> Result<(), PipelineError> {
        let (taken_tx, taken_rx) = oneshot::channel();
        self.slot
            .send((value, taken_tx))
            .await
            .map_err(|_| PipelineError::Closed)?;
        taken_rx.await.map_err(|_| PipelineError::Closed)
    }
}

impl<T> HandoffReceiver<T> {
    /// Takes the next value, or `None` once the sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let (value, taken) = self.slot.recv().await?;
            // a failed ack means the sender gave up on this value
            if taken.send(()).is_ok() {
                return Some(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn send_completes_once_value_is_taken() {
        let (mut tx, mut rx) = handoff();
        let sender = tokio::spawn(async move { tx.send(5).await });
        assert_eq!(rx.recv().await, Some(5));
        assert!(sender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn send_blocks_until_receiver_takes() {
        let (mut tx, mut rx) = handoff::<u32>();
        let pending = timeout(Duration::from_millis(50), tx.send(1)).await;
        assert!(pending.is_err(), "send returned without a receiver taking the value");

        // the withdrawn value is skipped, the next one gets through
        let sender = tokio::spawn(async move { tx.send(2).await });
        assert_eq!(rx.recv().await, Some(2));
        assert!(sender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (mut tx, rx) = handoff::<u32>();
        drop(rx);
        assert!(matches!(tx.send(1).await, Err(PipelineError::Closed)));
    }

    #[tokio::test]
    async fn recv_ends_when_sender_dropped() {
        let (tx, mut rx) = handoff::<u32>();
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }
}
