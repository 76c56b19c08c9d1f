//! Single-slot rendezvous between a waiting task and whoever resolves it.

use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::util::sync::lock;

/// Write side of a one-shot rendezvous. Filling it more than once is a
/// no-op that reports `false`.
#[derive(Debug)]
pub struct ResponseSlot<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> ResponseSlot<T> {
    /// Create a slot and the receiver the waiting task awaits.
    pub fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Deliver `value` without blocking. Returns `true` only if this call
    /// resolved the slot and the receiver was still listening.
    pub fn fill(&self, value: T) -> bool {
        let Some(tx) = lock(&self.tx).take() else {
            return false;
        };
        tx.send(value).is_ok()
    }

    pub fn is_resolved(&self) -> bool {
        lock(&self.tx).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_fill_is_rejected() {
        let (slot, rx) = ResponseSlot::channel();

        assert!(slot.fill(1));
        assert!(!slot.fill(2));
        assert!(slot.is_resolved());
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[test]
    fn fill_after_receiver_dropped_reports_false() {
        let (slot, rx) = ResponseSlot::channel();
        drop(rx);

        assert!(!slot.fill("late"));
        assert!(slot.is_resolved());
    }
}
