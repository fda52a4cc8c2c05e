//! Worker server - lease, run, settle.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::{HandlerRegistry, TaskContext};
use crate::config::ServerConfig;
use crate::domain::{DeliveryId, ErrorKind, Failure};
use crate::error::BrokerError;
use crate::ports::{Broker, DeliveryLease};

/// A built server. `start()` spawns the worker loops.
pub struct WorkerServer {
    broker: Arc<dyn Broker>,
    handlers: Arc<HandlerRegistry>,
    config: ServerConfig,
}

impl WorkerServer {
    pub(crate) fn new(
        broker: Arc<dyn Broker>,
        handlers: Arc<HandlerRegistry>,
        config: ServerConfig,
    ) -> Self {
        Self {
            broker,
            handlers,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Spawn `concurrency` worker loops.
    pub fn start(self) -> ServerHandle {
        let shutdown = CancellationToken::new();
        let config = Arc::new(self.config);

        let joins = (0..config.concurrency)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    broker: Arc::clone(&self.broker),
                    handlers: Arc::clone(&self.handlers),
                    config: Arc::clone(&config),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            concurrency = config.concurrency,
            queues = ?config.queues,
            handlers = self.handlers.len(),
            "worker server started"
        );

        ServerHandle {
            shutdown,
            joins,
            config,
        }
    }

    /// Start, run until `signal` resolves, then shut down gracefully.
    pub async fn run_until<F: Future<Output = ()>>(self, signal: F) {
        let handle = self.start();
        signal.await;
        handle.shutdown().await;
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    shutdown: CancellationToken,
    joins: Vec<JoinHandle<()>>,
    config: Arc<ServerConfig>,
}

impl ServerHandle {
    /// Cancelling this token is equivalent to calling `shutdown()` without
    /// waiting.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop leasing, cancel in-flight contexts, wait up to `shutdown_grace`,
    /// then abort whatever is still running.
    ///
    /// Tasks that fail after cancellation are released back to the broker;
    /// aborted ones come back through lease expiry.
    pub async fn shutdown(self) {
        info!("worker server shutting down");
        self.shutdown.cancel();

        let mut joins = self.joins;
        let grace = self.config.shutdown_grace();
        let drained =
            tokio::time::timeout(grace, futures::future::join_all(joins.iter_mut())).await;

        if drained.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "grace period elapsed, aborting workers");
            for join in &joins {
                join.abort();
            }
            for join in joins {
                let _ = join.await;
            }
        }
        info!("worker server stopped");
    }

    /// Wait for all workers to exit. They only exit after shutdown.
    pub async fn wait(self) {
        for join in self.joins {
            if let Err(e) = join.await
                && e.is_panic()
            {
                error!(error = %e, "worker panicked");
            }
        }
    }
}

struct Worker {
    id: usize,
    broker: Arc<dyn Broker>,
    handlers: Arc<HandlerRegistry>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = self.id, "worker started");
        let poll_interval = self.config.poll_interval();

        loop {
            let leased = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                leased = self.broker.lease(&self.config.queues, poll_interval) => leased,
            };

            match leased {
                Ok(Some(lease)) => self.process(lease).await,
                Ok(None) => continue,
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "lease failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(poll_interval) => {},
                    }
                }
            }
        }
        debug!(worker_id = self.id, "worker stopped");
    }

    async fn process(&self, lease: Box<dyn DeliveryLease>) {
        let delivery = lease.delivery().clone();

        let Some(handler) = self.handlers.get(delivery.task_type()) else {
            error!(
                worker_id = self.id,
                task_type = %delivery.task_type(),
                delivery_id = %delivery.id,
                "no handler registered for task type"
            );
            let failure = Failure {
                kind: ErrorKind::Validation,
                message: format!("no handler registered for task type '{}'", delivery.task_type()),
            };
            self.settle(delivery.id, lease.fail(failure).await);
            return;
        };

        let timeout = delivery
            .envelope
            .task_timeout()
            .unwrap_or_else(|| self.config.task_timeout());
        let deadline = Instant::now() + timeout;
        let ctx = TaskContext::new(&delivery, Some(deadline), self.shutdown.child_token());

        // Enforced by `DeadlineMiddleware`, the innermost layer.
        let result = handler.handle(&ctx, &delivery).await;

        let settled = match result {
            Ok(()) => lease.ack().await,
            Err(e) if self.shutdown.is_cancelled() => {
                info!(
                    delivery_id = %delivery.id,
                    error = %e,
                    "task interrupted by shutdown, releasing"
                );
                lease.release().await
            }
            Err(e) => lease.fail(Failure::from(&e)).await,
        };
        self.settle(delivery.id, settled);
    }

    fn settle(&self, delivery_id: DeliveryId, result: Result<(), BrokerError>) {
        if let Err(e) = result {
            warn!(worker_id = self.id, delivery_id = %delivery_id, error = %e, "failed to settle delivery");
        }
    }
}
