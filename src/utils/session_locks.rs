use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

struct LockSlot {
    mutex: Arc<Mutex<()>>,
    last_taken: DateTime<Utc>,
}

/// Serializes mutations of a single upload session's record.
///
/// Every session gets its own slot, so chunk receipts for different
/// sessions never contend. Each slot remembers when it was last taken;
/// the sweeper retires slots that have sat untouched for a full session
/// idle window, keeping the table bounded by the number of live sessions.
pub struct SessionLocks {
    slots: DashMap<String, LockSlot>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Acquire the lock for `upload_id`; released when the guard drops.
    pub async fn lock(&self, upload_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut slot = self
                .slots
                .entry(upload_id.to_string())
                .or_insert_with(|| LockSlot {
                    mutex: Arc::new(Mutex::new(())),
                    last_taken: Utc::now(),
                });
            slot.last_taken = Utc::now();
            slot.mutex.clone()
        };

        mutex.lock_owned().await
    }

    /// Drop slots whose session has gone quiet: last taken before the idle
    /// window and not currently held (a free mutex accepts `try_lock`).
    /// Returns how many slots were retired.
    pub fn retire_idle(&self, idle_window: Duration) -> usize {
        let cutoff = Utc::now() - idle_window;
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| slot.last_taken >= cutoff || slot.mutex.try_lock().is_err());
        before - self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_distinct_sessions_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.lock("session-a").await;
        // A different session must not deadlock while "session-a" is held.
        let _b = locks.lock("session-b").await;
    }

    #[tokio::test]
    async fn test_retire_spares_held_and_recent_slots() {
        let locks = SessionLocks::new();

        let guard = locks.lock("held").await;
        {
            let _released = locks.lock("released").await;
        }

        // A zero-width idle window makes every released slot eligible, but
        // the held slot must survive.
        let retired = locks.retire_idle(Duration::zero());
        assert_eq!(retired, 1);
        assert!(locks.slots.contains_key("held"));
        assert!(!locks.slots.contains_key("released"));
        drop(guard);

        // With a generous window nothing else is retired.
        locks.lock("fresh").await;
        assert_eq!(locks.retire_idle(Duration::hours(1)), 0);
        assert!(locks.slots.contains_key("fresh"));
    }
}
