//! Zero-capacity handoff between a run's producer and its workers.
//!
//! Nothing is ever buffered. An idle worker announces itself by queueing a
//! one-shot slot on the ready channel, and the producer only materializes a
//! unit once it holds such a slot. While every worker is busy the ready
//! channel is empty and the producer waits.
use async_channel::{Receiver, Sender};
use tokio::sync::oneshot;

/// Producer side of the handoff. Dropping it closes the queue.
#[derive(Debug)]
pub(crate) struct Handoff<T> {
    ready: Receiver<oneshot::Sender<T>>,
}

/// Worker side of the handoff
#[derive(Debug)]
pub(crate) struct Taker<T> {
    ready: Sender<oneshot::Sender<T>>,
}

// derive would require `T: Clone`
impl<T> Clone for Taker<T> {
    fn clone(&self) -> Self {
        Self {
            ready: self.ready.clone(),
        }
    }
}

/// A worker that is waiting for exactly one unit
#[derive(Debug)]
pub(crate) struct Slot<T> {
    tx: oneshot::Sender<T>,
}

/// Create the two ends of a handoff
pub(crate) fn handoff<T>() -> (Handoff<T>, Taker<T>) {
    // holds at most one slot per worker, never a unit
    let (tx, rx) = async_channel::unbounded();
    (Handoff { ready: rx }, Taker { ready: tx })
}

impl<T> Handoff<T> {
    /// Wait until some worker is idle. `None` once every taker is gone.
    pub(crate) async fn idle(&self) -> Option<Slot<T>> {
        self.ready.recv().await.ok().map(|tx| Slot { tx })
    }

    /// Stop handing out units. Workers parked on a slot, and any that ask
    /// later, see the queue as closed.
    pub(crate) fn close(self) {
        drop(self);
    }
}

impl<T> Drop for Handoff<T> {
    fn drop(&mut self) {
        self.ready.close();
        // takers keep the channel alive, so parked slots must be released here
        while let Ok(slot) = self.ready.try_recv() {
            drop(slot);
        }
    }
}

impl<T> Slot<T> {
    /// Give `item` to the waiting worker. Hands it back if that worker went
    /// away while it was waiting.
    pub(crate) fn fill(self, item: T) -> Result<(), T> {
        self.tx.send(item)
    }
}

impl<T> Taker<T> {
    /// Park until the producer hands over a unit. `None` once the handoff is
    /// closed.
    pub(crate) async fn take(&self) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.ready.send(tx).await.ok()?;
        rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn producer_waits_for_an_idle_taker() {
        let (handoff, taker) = handoff::<u32>();
        assert!(
            timeout(Duration::from_millis(50), handoff.idle())
                .await
                .is_err(),
            "no taker has asked yet"
        );

        let worker = tokio::spawn(async move { taker.take().await });
        let slot = handoff.idle().await.expect("taker is parked");
        slot.fill(7).expect("taker still waiting");
        assert_eq!(worker.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn close_releases_parked_and_late_takers() {
        let (handoff, taker) = handoff::<u32>();
        let late = taker.clone();
        let parked = tokio::spawn(async move { taker.take().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        handoff.close();
        assert_eq!(parked.await.unwrap(), None);
        assert_eq!(late.take().await, None);
    }

    #[tokio::test]
    async fn idle_ends_when_every_taker_is_gone() {
        let (handoff, taker) = handoff::<u32>();
        drop(taker);
        assert!(handoff.idle().await.is_none());
    }

    #[tokio::test]
    async fn fill_hands_the_item_back_if_the_taker_left() {
        let (handoff, taker) = handoff::<u32>();
        let worker = tokio::spawn(async move { taker.take().await });
        let slot = handoff.idle().await.expect("taker is parked");
        worker.abort();
        let _ = worker.await;
        assert_eq!(slot.fill(3), Err(3));
    }
}
