//! Depth-1 channel where a new value replaces an unread one.

use crossbeam_channel::{Receiver, TrySendError};

pub struct LatestSender<T> {
    tx: crossbeam_channel::Sender<T>,
    // Lets the sender evict the stale value itself.
    drain: Receiver<T>,
}

impl<T> LatestSender<T> {
    /// Publish `value`, discarding any value the receiver has not taken yet.
    /// Returns true when a stale value was discarded.
    pub fn publish(&self, mut value: T) -> bool {
        let mut replaced = false;
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return replaced,
                Err(TrySendError::Full(back)) => {
                    replaced |= self.drain.try_recv().is_ok();
                    value = back;
                }
                // Unreachable while `drain` is alive.
                Err(TrySendError::Disconnected(_)) => return replaced,
            }
        }
    }
}

pub fn latest_channel<T>() -> (LatestSender<T>, Receiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        LatestSender {
            tx,
            drain: rx.clone(),
        },
        rx,
    )
}
