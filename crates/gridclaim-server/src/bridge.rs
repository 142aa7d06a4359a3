//! Write-through persistence bridge.
//!
//! Mutations enqueue an operation and return immediately; a single
//! background worker applies operations to the `DurableStore` in FIFO order
//! with bounded retry. Memory stays the source of truth: an operation that
//! exhausts its retries is logged, counted and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gridclaim_core::{Cell, DurableStore, OwnerFields, StorageError, UserRecord};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One durable write, applied as a unit by the worker.
#[derive(Debug, Clone)]
pub enum PersistOp {
    Claim { cell: Cell, owner: UserRecord },
    OwnerUpdate {
        owner_id: String,
        fields: OwnerFields,
        owner: UserRecord,
    },
    SessionUpsert(UserRecord),
    Release { owner_id: String },
}

impl PersistOp {
    fn kind(&self) -> &'static str {
        match self {
            PersistOp::Claim { .. } => "claim",
            PersistOp::OwnerUpdate { .. } => "owner_update",
            PersistOp::SessionUpsert(_) => "session_upsert",
            PersistOp::Release { .. } => "release",
        }
    }

    async fn apply(&self, store: &dyn DurableStore) -> Result<(), StorageError> {
        match self {
            PersistOp::Claim { cell, owner } => {
                store.put_cell(cell).await?;
                store.put_user(owner).await
            }
            PersistOp::OwnerUpdate {
                owner_id,
                fields,
                owner,
            } => {
                store.put_user(owner).await?;
                store.update_owner_cells(owner_id, fields).await
            }
            PersistOp::SessionUpsert(user) => store.put_user(user).await,
            PersistOp::Release { owner_id } => store.delete_owner(owner_id).await,
        }
    }
}

/// Retry policy for a single operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Default)]
struct BridgeCounters {
    queued: AtomicU64,
    written: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    /// Woken each time the worker finishes an operation.
    settled: Notify,
}

/// Point-in-time view of the bridge counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BridgeMetrics {
    pub queued: u64,
    pub written: u64,
    pub retried: u64,
    pub failed: u64,
    /// Operations accepted but not yet written or given up on.
    pub pending: u64,
}

/// Enqueue side of the bridge. Every method is non-blocking.
pub struct PersistenceBridge {
    tx: mpsc::UnboundedSender<PersistOp>,
    counters: Arc<BridgeCounters>,
    backend: &'static str,
}

/// Owns the background worker; `drain` flushes the queue and stops it.
pub struct BridgeWorker {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PersistenceBridge {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(store: Arc<dyn DurableStore>, policy: RetryPolicy) -> (Self, BridgeWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(BridgeCounters::default());
        let backend = store.backend_name();

        let task = tokio::spawn(run_worker(
            store,
            policy,
            rx,
            shutdown_rx,
            Arc::clone(&counters),
        ));

        (
            Self {
                tx,
                counters,
                backend,
            },
            BridgeWorker {
                shutdown: shutdown_tx,
                task,
            },
        )
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn persist_claim(&self, cell: Cell, owner: UserRecord) {
        self.enqueue(PersistOp::Claim { cell, owner });
    }

    pub fn persist_owner_update(&self, owner_id: &str, fields: OwnerFields, owner: UserRecord) {
        self.enqueue(PersistOp::OwnerUpdate {
            owner_id: owner_id.to_string(),
            fields,
            owner,
        });
    }

    pub fn persist_session_upsert(&self, user: UserRecord) {
        self.enqueue(PersistOp::SessionUpsert(user));
    }

    pub fn persist_release(&self, owner_id: &str) {
        self.enqueue(PersistOp::Release {
            owner_id: owner_id.to_string(),
        });
    }

    fn enqueue(&self, op: PersistOp) {
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        if let Err(rejected) = self.tx.send(op) {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                op = rejected.0.kind(),
                "Persistence worker stopped, dropping write"
            );
        }
    }

    pub fn metrics(&self) -> BridgeMetrics {
        let queued = self.counters.queued.load(Ordering::Relaxed);
        let written = self.counters.written.load(Ordering::Relaxed);
        let failed = self.counters.failed.load(Ordering::Relaxed);
        BridgeMetrics {
            queued,
            written,
            retried: self.counters.retried.load(Ordering::Relaxed),
            failed,
            pending: queued.saturating_sub(written + failed),
        }
    }

    /// Resolve once every operation enqueued so far has been written or
    /// given up on.
    pub async fn wait_idle(&self) {
        loop {
            // Registered before the check so a wakeup in between is not lost
            let settled = self.counters.settled.notified();
            if self.metrics().pending == 0 {
                return;
            }
            settled.await;
        }
    }
}

impl BridgeWorker {
    /// Stop accepting new operations, apply everything already queued, and
    /// wait for the worker to exit.
    pub async fn drain(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Persistence worker ended abnormally: {}", e);
        }
    }
}

async fn run_worker(
    store: Arc<dyn DurableStore>,
    policy: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<BridgeCounters>,
) {
    loop {
        tokio::select! {
            op = rx.recv() => match op {
                Some(op) => apply_with_retry(store.as_ref(), &policy, &counters, op).await,
                None => break,
            },
            true = async { shutdown.wait_for(|&stop| stop).await.is_ok() } => {
                rx.close();
                let mut drained = 0;
                while let Some(op) = rx.recv().await {
                    apply_with_retry(store.as_ref(), &policy, &counters, op).await;
                    drained += 1;
                }
                info!(drained, "Persistence queue drained");
                break;
            }
        }
    }
}

async fn apply_with_retry(
    store: &dyn DurableStore,
    policy: &RetryPolicy,
    counters: &BridgeCounters,
    op: PersistOp,
) {
    let mut delay = policy.base_delay;
    let mut attempt = 0;

    loop {
        match op.apply(store).await {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                counters.settled.notify_waiters();
                debug!(op = op.kind(), "Persisted");
                return;
            }
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                counters.retried.fetch_add(1, Ordering::Relaxed);
                warn!(
                    op = op.kind(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Persistence failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                counters.settled.notify_waiters();
                warn!(
                    op = op.kind(),
                    attempts = attempt + 1,
                    "Persistence failed, giving up: {}",
                    e
                );
                return;
            }
        }
    }
}
