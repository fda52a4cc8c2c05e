//! In-memory idempotency store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::ports::{Clock, IdempotencyState, IdempotencyStore, SystemClock};

#[derive(Debug, Clone)]
struct Entry {
    state: IdempotencyState,
    /// Set for locks taken through `acquire`.
    owner: Option<String>,
    expires_at: DateTime<Utc>,
}

/// `IdempotencyStore` over a map with TTL expiry.
///
/// Expiry is measured against the injected clock, so tests drive it with
/// `FixedClock`. `set_unavailable(true)` makes every call fail, which is how
/// fail-open / fail-closed behavior gets exercised.
#[derive(Clone)]
pub struct InMemoryIdempotencyStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining TTL of a live key.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .and_then(|e| (e.expires_at - now).to_std().ok())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(())
    }

    /// Live keys, expired ones excluded.
    pub async fn live_keys(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    /// Entries still held in memory, expired or not.
    pub async fn stored(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        let now = self.clock.now();
        now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn set_if_absent(
        &self,
        key: &str,
        state: IdempotencyState,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.insert_if_absent(key, state, None, ttl).await
    }

    async fn set(
        &self,
        key: &str,
        state: IdempotencyState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, self.clock.now());
        entries.insert(
            key.to_string(),
            Entry {
                state,
                owner: None,
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyState>, StoreError> {
        self.check_available()?;
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.state))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.insert_if_absent(key, IdempotencyState::InProgress, Some(owner), ttl)
            .await
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let held = entries.get(key).is_some_and(|e| {
            e.expires_at > now
                && e.state == IdempotencyState::InProgress
                && e.owner.as_deref() == Some(owner)
        });
        if held {
            entries.remove(key);
        }
        Ok(held)
    }
}

impl InMemoryIdempotencyStore {
    async fn insert_if_absent(
        &self,
        key: &str,
        state: IdempotencyState,
        owner: Option<&str>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                state,
                owner: owner.map(str::to_string),
                expires_at: self.expiry(ttl),
            },
        );
        Ok(true)
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) {
    entries.retain(|_, e| e.expires_at > now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn store_at_noon() -> (InMemoryIdempotencyStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        (InMemoryIdempotencyStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn set_if_absent_only_once() {
        let (store, _) = store_at_noon();
        let ttl = Duration::from_secs(60);

        assert!(store.set_if_absent("order:42", IdempotencyState::InProgress, ttl).await.unwrap());
        assert!(!store.set_if_absent("order:42", IdempotencyState::InProgress, ttl).await.unwrap());
        assert_eq!(
            store.get("order:42").await.unwrap(),
            Some(IdempotencyState::InProgress)
        );
    }

    #[tokio::test]
    async fn expired_key_can_be_taken_again() {
        let (store, clock) = store_at_noon();
        let ttl = Duration::from_secs(60);
        store.set_if_absent("k", IdempotencyState::InProgress, ttl).await.unwrap();

        clock.advance(Duration::from_secs(61));

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.set_if_absent("k", IdempotencyState::InProgress, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn set_overwrites_and_refreshes_ttl() {
        let (store, clock) = store_at_noon();
        store.set_if_absent("k", IdempotencyState::InProgress, Duration::from_secs(10)).await.unwrap();
        store.set("k", IdempotencyState::Completed, Duration::from_secs(3600)).await.unwrap();

        clock.advance(Duration::from_secs(60));

        assert_eq!(store.get("k").await.unwrap(), Some(IdempotencyState::Completed));
        assert_eq!(store.ttl("k").await, Some(Duration::from_secs(3540)));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let (store, _) = store_at_noon();
        store.set("k", IdempotencyState::InProgress, Duration::from_secs(10)).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn release_only_frees_own_lock() {
        let (store, clock) = store_at_noon();
        let ttl = Duration::from_secs(60);
        assert!(store.acquire("order:42", "first", ttl).await.unwrap());

        assert!(!store.release("order:42", "second").await.unwrap());
        assert_eq!(store.get("order:42").await.unwrap(), Some(IdempotencyState::InProgress));

        // first's lock lapses and second takes the key
        clock.advance(Duration::from_secs(61));
        assert!(store.acquire("order:42", "second", ttl).await.unwrap());
        assert!(!store.release("order:42", "first").await.unwrap());
        assert_eq!(store.get("order:42").await.unwrap(), Some(IdempotencyState::InProgress));

        assert!(store.release("order:42", "second").await.unwrap());
        assert_eq!(store.get("order:42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn completed_key_is_not_released() {
        let (store, _) = store_at_noon();
        store.acquire("k", "me", Duration::from_secs(60)).await.unwrap();
        store.set("k", IdempotencyState::Completed, Duration::from_secs(60)).await.unwrap();

        assert!(!store.release("k", "me").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(IdempotencyState::Completed));
    }

    #[tokio::test]
    async fn expired_entries_are_purged_on_write() {
        let (store, clock) = store_at_noon();
        for i in 0..10 {
            store.set(&format!("k{i}"), IdempotencyState::Completed, Duration::from_secs(10)).await.unwrap();
        }
        assert_eq!(store.stored().await, 10);

        clock.advance(Duration::from_secs(11));
        assert_eq!(store.live_keys().await, 0);
        store.acquire("fresh", "me", Duration::from_secs(10)).await.unwrap();

        assert_eq!(store.stored().await, 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let (store, _) = store_at_noon();
        store.set_unavailable(true);

        let err = store
            .set_if_absent("k", IdempotencyState::InProgress, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.get("k").await.is_err());
        assert!(store.delete("k").await.is_err());
    }
}
