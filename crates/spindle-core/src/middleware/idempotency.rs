//! Idempotency middleware.
//!
//! Per key: `absent -> in_progress -> completed` on success, back to
//! `absent` on failure. The lock is a single `acquire` in the shared store,
//! so it holds across worker processes. Each invocation holds it under its
//! own owner token and only releases it while the token still matches.
//! Deliveries without an idempotency key pass straight through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::app::{Middleware, TaskContext, TaskHandler};
use crate::domain::{Delivery, HandlerError};
use crate::error::StoreError;
use crate::ports::{IdempotencyState, IdempotencyStore};

/// What to do when the key is held by another execution or the store is
/// unreachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Run anyway. Duplicates are possible.
    #[default]
    FailOpen,
    /// Refuse: conflict when held, infrastructure error when the store is down.
    FailClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    pub fail_mode: FailMode,
    /// Must outlive the longest handler run plus retry backoff.
    pub lock_ttl: Duration,
    pub completed_ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            fail_mode: FailMode::FailOpen,
            lock_ttl: Duration::from_secs(600),
            completed_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Clone)]
pub struct IdempotencyMiddleware {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl IdempotencyMiddleware {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }
}

impl Middleware for IdempotencyMiddleware {
    fn wrap(&self, next: Arc<dyn TaskHandler>) -> Arc<dyn TaskHandler> {
        Arc::new(Idempotent {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            next,
        })
    }
}

struct Idempotent {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
    next: Arc<dyn TaskHandler>,
}

enum Acquire {
    /// This call owns the key.
    Acquired,
    /// Work for this key already finished.
    Done,
    /// Another execution holds the key.
    Held,
}

impl Idempotent {
    async fn try_acquire(&self, key: &str, owner: &str) -> Result<Acquire, StoreError> {
        // The second round covers a key that expired between SET NX and GET.
        for _ in 0..2 {
            if self
                .store
                .acquire(key, owner, self.config.lock_ttl)
                .await?
            {
                return Ok(Acquire::Acquired);
            }
            match self.store.get(key).await? {
                Some(IdempotencyState::Completed) => return Ok(Acquire::Done),
                Some(IdempotencyState::InProgress) => return Ok(Acquire::Held),
                None => continue,
            }
        }
        Ok(Acquire::Held)
    }

    async fn release_or_complete(&self, key: &str, owner: &str, result: &Result<(), HandlerError>) {
        match result {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .set(key, IdempotencyState::Completed, self.config.completed_ttl)
                    .await
                {
                    error!(key, error = %e, "failed to mark idempotency key completed");
                }
            }
            Err(_) => match self.store.release(key, owner).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(key, "idempotency lock expired before release, left to its current holder");
                }
                Err(e) => error!(key, error = %e, "failed to release idempotency key"),
            },
        }
    }
}

#[async_trait]
impl TaskHandler for Idempotent {
    async fn handle(&self, ctx: &TaskContext, delivery: &Delivery) -> Result<(), HandlerError> {
        let Some(key) = delivery.envelope.key() else {
            return self.next.handle(ctx, delivery).await;
        };
        let fail_mode = self.config.fail_mode;
        // Unique per invocation: a redelivery after lease expiry keeps the
        // same delivery id and attempt.
        let owner = Ulid::new().to_string();

        match self.try_acquire(key, &owner).await {
            Ok(Acquire::Acquired) => {
                let result = self.next.handle(ctx, delivery).await;
                self.release_or_complete(key, &owner, &result).await;
                result
            }
            Ok(Acquire::Done) => {
                debug!(key, delivery_id = %delivery.id, "already completed, skipping handler");
                Ok(())
            }
            Ok(Acquire::Held) if fail_mode == FailMode::FailClosed => Err(HandlerError::conflict(
                format!("idempotency key '{key}' is held by another execution"),
            )),
            Ok(Acquire::Held) => {
                warn!(key, delivery_id = %delivery.id, "idempotency key held elsewhere, running anyway");
                self.next.handle(ctx, delivery).await
            }
            Err(e) if fail_mode == FailMode::FailClosed => {
                Err(HandlerError::infrastructure("idempotency store unavailable").with_source(e))
            }
            Err(e) => {
                warn!(key, error = %e, "idempotency store unavailable, running unprotected");
                self.next.handle(ctx, delivery).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handler_fn;
    use crate::domain::{DeliveryId, ErrorKind, TaskEnvelope, TaskType};
    use crate::impls::InMemoryIdempotencyStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ulid::Ulid;

    fn keyed(key: &str) -> Delivery {
        Delivery::new(
            DeliveryId::from(Ulid::new()),
            TaskEnvelope::new(TaskType::new("order:charge").unwrap(), b"{}".to_vec())
                .idempotency_key(key),
            0,
        )
    }

    fn counting(calls: Arc<AtomicUsize>, fail: bool) -> Arc<dyn TaskHandler> {
        handler_fn(move |_ctx, _d| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(HandlerError::transient("downstream timeout"))
                } else {
                    Ok(())
                }
            }
        })
    }

    fn middleware(store: &InMemoryIdempotencyStore, fail_mode: FailMode) -> IdempotencyMiddleware {
        IdempotencyMiddleware::new(
            Arc::new(store.clone()),
            IdempotencyConfig {
                fail_mode,
                ..IdempotencyConfig::default()
            },
        )
    }

    async fn run(handler: &Arc<dyn TaskHandler>, d: &Delivery) -> Result<(), HandlerError> {
        handler.handle(&TaskContext::detached(d), d).await
    }

    #[tokio::test]
    async fn success_marks_completed_and_skips_duplicates() {
        let store = InMemoryIdempotencyStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = middleware(&store, FailMode::FailClosed).wrap(counting(calls.clone(), false));

        run(&handler, &keyed("order:42")).await.unwrap();
        run(&handler, &keyed("order:42")).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get("order:42").await.unwrap(),
            Some(IdempotencyState::Completed)
        );
    }

    #[tokio::test]
    async fn failure_releases_the_key() {
        let store = InMemoryIdempotencyStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = middleware(&store, FailMode::FailClosed).wrap(counting(calls.clone(), true));

        let err = run(&handler, &keyed("order:42")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(store.get("order:42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fail_closed_rejects_held_key_with_conflict() {
        let store = InMemoryIdempotencyStore::new();
        store
            .set_if_absent("order:42", IdempotencyState::InProgress, Duration::from_secs(60))
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = middleware(&store, FailMode::FailClosed).wrap(counting(calls.clone(), false));

        let err = run(&handler, &keyed("order:42")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // the other execution's lock is untouched
        assert_eq!(
            store.get("order:42").await.unwrap(),
            Some(IdempotencyState::InProgress)
        );
    }

    #[tokio::test]
    async fn fail_open_runs_despite_held_key_and_keeps_foreign_lock() {
        let store = InMemoryIdempotencyStore::new();
        store
            .set_if_absent("order:42", IdempotencyState::InProgress, Duration::from_secs(60))
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = middleware(&store, FailMode::FailOpen).wrap(counting(calls.clone(), true));

        assert!(run(&handler, &keyed("order:42")).await.is_err());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get("order:42").await.unwrap(),
            Some(IdempotencyState::InProgress)
        );
    }

    /// Handler that outlives the lock; another execution takes the key meanwhile.
    #[tokio::test]
    async fn failure_after_lock_expiry_keeps_the_new_holders_lock() {
        let clock = Arc::new(crate::ports::FixedClock::new(chrono::Utc::now()));
        let store = InMemoryIdempotencyStore::with_clock(clock.clone());
        let thief = store.clone();
        let handler = middleware(&store, FailMode::FailClosed).wrap(handler_fn(move |_ctx, _d| {
            let clock = clock.clone();
            let thief = thief.clone();
            async move {
                clock.advance(Duration::from_secs(601));
                assert!(thief.acquire("order:42", "other", Duration::from_secs(600)).await.unwrap());
                Err(HandlerError::transient("gave up"))
            }
        }));

        assert!(run(&handler, &keyed("order:42")).await.is_err());

        assert_eq!(
            store.get("order:42").await.unwrap(),
            Some(IdempotencyState::InProgress)
        );
        assert!(store.release("order:42", "other").await.unwrap());
    }

    #[tokio::test]
    async fn store_outage_fail_open_proceeds() {
        let store = InMemoryIdempotencyStore::new();
        store.set_unavailable(true);
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = middleware(&store, FailMode::FailOpen).wrap(counting(calls.clone(), false));

        run(&handler, &keyed("order:42")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_outage_fail_closed_is_retryable_infrastructure_error() {
        let store = InMemoryIdempotencyStore::new();
        store.set_unavailable(true);
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = middleware(&store, FailMode::FailClosed).wrap(counting(calls.clone(), false));

        let err = run(&handler, &keyed("order:42")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(err.retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unkeyed_delivery_passes_through() {
        let store = InMemoryIdempotencyStore::new();
        store.set_unavailable(true);
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = middleware(&store, FailMode::FailClosed).wrap(counting(calls.clone(), false));
        let d = Delivery::new(
            DeliveryId::from(Ulid::new()),
            TaskEnvelope::new(TaskType::new("order:charge").unwrap(), Vec::new()),
            0,
        );

        run(&handler, &d).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
