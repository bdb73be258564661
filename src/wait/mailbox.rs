//! Single-slot handoff between an adapter's I/O task and the test task
//!
//! The I/O task is the only writer and calls [`Mailbox::deliver`] from inside its
//! event loop; the test task is the only reader and blocks in
//! [`Mailbox::wait`] for at most the given timeout.
//!
//! The slot keeps only the most recent value. A delivery that lands while the
//! previous value is still unread replaces it; scenarios expect at most one
//! pending event per wait, and every replacement is counted and logged so a
//! burst that breaks that assumption is visible in the logs.

use super::deadline::Deadline;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{trace, warn};

/// Most-recent-wins slot guarded by a mutex and a notification
#[derive(Debug)]
pub struct Mailbox<T> {
    name: String,
    slot: Mutex<Option<T>>,
    arrived: Notify,
    overwritten: AtomicU64,
}

impl<T> Mailbox<T> {
    /// Create an empty mailbox; `name` appears in log lines
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            slot: Mutex::new(None),
            arrived: Notify::new(),
            overwritten: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // The slot holds plain data, so a panic elsewhere cannot leave it inconsistent
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `value` and wake the waiter. Returns true if an unread value was replaced.
    pub fn deliver(&self, value: T) -> bool {
        let replaced = self.lock().replace(value).is_some();
        if replaced {
            let total = self.overwritten.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                mailbox = %self.name,
                overwritten = total,
                "Unread value replaced by newer delivery"
            );
        } else {
            trace!(mailbox = %self.name, "Value delivered");
        }
        self.arrived.notify_one();
        replaced
    }

    /// Take the pending value without waiting
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// How many unread values have been replaced so far
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Wait up to `timeout` for a value, then take it and leave the slot empty.
    ///
    /// Returns `None` if nothing arrived in time.
    pub async fn wait(&self, timeout: Duration) -> Option<T> {
        let deadline = Deadline::after(timeout);
        loop {
            if let Some(value) = self.take() {
                return Some(value);
            }
            // `notify_one` leaves a permit when nobody is waiting, so a delivery
            // between `take` and `notified` is not lost
            if deadline.run(self.arrived.notified()).await.is_err() {
                return self.take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn test_wait_returns_delivered_value() {
        let mailbox = Mailbox::new("test");
        mailbox.deliver(7u32);
        assert_eq!(mailbox.wait(Duration::from_millis(10)).await, Some(7));
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn test_wait_times_out_with_none() {
        let mailbox: Mailbox<u32> = Mailbox::new("test");
        let start = Instant::now();
        assert_eq!(mailbox.wait(Duration::from_millis(50)).await, None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_value_from_background_task_wakes_waiter() {
        let mailbox = Arc::new(Mailbox::new("test"));
        let producer = mailbox.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.deliver("hello".to_string());
        });

        let start = Instant::now();
        let value = mailbox.wait(Duration::from_secs(2)).await;
        assert_eq!(value.as_deref(), Some("hello"));
        assert!(
            start.elapsed() < Duration::from_secs(1),
            "Waiter should wake on delivery, not on timeout"
        );
    }

    #[tokio::test]
    async fn test_most_recent_value_wins() {
        let mailbox = Mailbox::new("test");
        assert!(!mailbox.deliver(1));
        assert!(mailbox.deliver(2));
        assert!(mailbox.deliver(3));

        assert_eq!(mailbox.overwritten(), 2);
        assert_eq!(mailbox.wait(Duration::from_millis(10)).await, Some(3));
        assert_eq!(mailbox.wait(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn test_stale_permit_does_not_fabricate_a_value() {
        let mailbox = Mailbox::new("test");
        mailbox.deliver(1);
        // Drained without waiting, so the wake-up permit is still stored
        assert_eq!(mailbox.take(), Some(1));
        assert_eq!(mailbox.wait(Duration::from_millis(30)).await, None);
    }

    #[tokio::test]
    async fn test_wait_clears_slot_for_next_wait() {
        let mailbox = Arc::new(Mailbox::new("test"));
        mailbox.deliver(1);
        assert_eq!(mailbox.wait(Duration::from_millis(10)).await, Some(1));

        let producer = mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.deliver(2);
        });
        assert_eq!(mailbox.wait(Duration::from_secs(1)).await, Some(2));
    }

    #[test]
    fn test_name() {
        let mailbox: Mailbox<()> = Mailbox::new("sub-1/messages");
        assert_eq!(mailbox.name(), "sub-1/messages");
    }
}
