//! Single-slot notification mailboxes.

use parking_lot::Mutex;
use std::pin::pin;
use tokio::sync::Notify;

/// A one-value mailbox that never blocks the sender.
///
/// While a value sits unconsumed, further sends are dropped: receivers see
/// the *first* undelivered value, never a backlog. [`version`](Self::version)
/// counts accepted values so observers can tell whether anything was
/// delivered since they last looked.
///
/// After [`close`](Self::close) sends are dropped, a value already in the
/// slot can still be received, and [`recv`](Self::recv) then returns `None`.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    notify: Notify,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    version: u64,
    closed: bool,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot { value: None, version: 0, closed: false }),
            notify: Notify::new(),
        }
    }

    /// Place `value` in the slot. Returns `false` (dropping `value`) if the
    /// slot is occupied or the mailbox is closed.
    pub(crate) fn try_send(&self, value: T) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.closed || slot.value.is_some() {
                return false;
            }
            slot.value = Some(value);
            slot.version += 1;
        }
        self.notify.notify_waiters();
        true
    }

    /// Close the mailbox. Returns `false` if it was already closed.
    pub(crate) fn close(&self) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.closed {
                return false;
            }
            slot.closed = true;
        }
        self.notify.notify_waiters();
        true
    }

    /// Take the pending value, if any.
    pub fn try_recv(&self) -> Option<T> {
        self.slot.lock().value.take()
    }

    /// Wait for a value. Returns `None` once the mailbox is closed and empty.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let mut notified = pin!(self.notify.notified());
            // Register before checking so a send between check and await
            // still wakes us.
            notified.as_mut().enable();
            {
                let mut slot = self.slot.lock();
                if let Some(value) = slot.value.take() {
                    return Some(value);
                }
                if slot.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    /// Number of values accepted so far.
    pub fn version(&self) -> u64 {
        self.slot.lock().version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_value_wins() {
        let mailbox = Mailbox::new();
        assert!(mailbox.try_send("first"));
        assert!(!mailbox.try_send("second"));
        assert_eq!(mailbox.version(), 1);
        assert_eq!(mailbox.try_recv(), Some("first"));
        assert_eq!(mailbox.try_recv(), None);

        assert!(mailbox.try_send("third"));
        assert_eq!(mailbox.try_recv(), Some("third"));
        assert_eq!(mailbox.version(), 2);
    }

    #[test]
    fn test_close_is_idempotent_and_drops_sends() {
        let mailbox = Mailbox::new();
        assert!(mailbox.try_send(1));
        assert!(mailbox.close());
        assert!(!mailbox.close());
        assert!(mailbox.is_closed());
        assert!(!mailbox.try_send(2));
        // Undelivered values survive closing.
        assert_eq!(mailbox.try_recv(), Some(1));
    }

    #[tokio::test]
    async fn test_recv_waits_for_send() {
        let mailbox = Arc::new(Mailbox::new());
        let receiver = tokio::spawn({
            let mailbox = Arc::clone(&mailbox);
            async move { mailbox.recv().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(mailbox.try_send("hello".to_string()));
        assert_eq!(receiver.await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_close() {
        let mailbox: Arc<Mailbox<u8>> = Arc::new(Mailbox::new());
        let receiver = tokio::spawn({
            let mailbox = Arc::clone(&mailbox);
            async move { mailbox.recv().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        mailbox.close();
        assert_eq!(receiver.await.unwrap(), None);
    }
}
