use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Single-slot mailbox: a post overwrites any unconsumed value and every
/// value is handed out at most once.
#[derive(Debug)]
pub struct OneShotEvent<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Default for OneShotEvent<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }
}

impl<T> OneShotEvent<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the pending value it replaced.
    pub fn post(&self, value: T) -> Option<T> {
        let replaced = self.lock().replace(value);
        self.notify.notify_waiters();
        replaced
    }

    pub fn consume(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Waits until a value is pending and consumes it.
    pub async fn next(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(value) = self.consume() {
                return value;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::OneShotEvent;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn value_is_consumed_once() {
        let event = OneShotEvent::new();
        event.post(7);
        assert_eq!(event.consume(), Some(7));
        assert_eq!(event.consume(), None);
    }

    #[test]
    fn latest_post_wins() {
        let event = OneShotEvent::new();
        assert_eq!(event.post("first"), None);
        assert_eq!(event.post("second"), Some("first"));
        assert!(event.has_pending());
        assert_eq!(event.consume(), Some("second"));
        assert!(!event.has_pending());
    }

    #[tokio::test]
    async fn next_waits_for_a_post_from_another_task() {
        let event = Arc::new(OneShotEvent::new());
        let poster = {
            let event = event.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                event.post(42u32);
            })
        };

        let value = tokio::time::timeout(Duration::from_secs(2), event.next())
            .await
            .expect("value before timeout");
        assert_eq!(value, 42);
        poster.await.expect("poster task");
        assert_eq!(event.consume(), None);
    }

    #[tokio::test]
    async fn next_returns_already_pending_value() {
        let event = OneShotEvent::new();
        event.post(1u8);
        assert_eq!(event.next().await, 1);
    }
}
