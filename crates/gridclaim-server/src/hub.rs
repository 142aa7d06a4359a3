//! Fan-out of server events to every live session.
//!
//! Each session owns a bounded outbound queue. Sends never wait: a full or
//! closed queue drops the event for that recipient only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gridclaim_core::ServerMessage;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};

/// A serialized event, shared between all recipients of one broadcast.
pub type Outbound = Arc<str>;

#[derive(Debug, Default)]
pub struct BroadcastHub {
    recipients: DashMap<String, mpsc::Sender<Outbound>>,
    dropped: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recipient and return the receiving end of its queue.
    pub fn register(&self, session_id: &str, capacity: usize) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.recipients.insert(session_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, session_id: &str) -> bool {
        self.recipients.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Events dropped because a recipient's queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver `msg` to one session. Returns whether it was queued.
    pub fn send_to(&self, session_id: &str, msg: &ServerMessage) -> bool {
        let Some(payload) = encode(msg) else {
            return false;
        };
        match self.recipients.get(session_id) {
            Some(tx) => self.offer(session_id, &tx, payload),
            None => {
                debug!(session_id, "Send to unregistered session skipped");
                false
            }
        }
    }

    /// Deliver `msg` to every registered session. Returns the number of
    /// recipients it was queued for.
    pub fn broadcast(&self, msg: &ServerMessage) -> usize {
        let Some(payload) = encode(msg) else {
            return 0;
        };
        self.recipients
            .iter()
            .filter(|entry| self.offer(entry.key(), entry.value(), Arc::clone(&payload)))
            .count()
    }

    fn offer(&self, session_id: &str, tx: &mpsc::Sender<Outbound>, payload: Outbound) -> bool {
        match tx.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(session_id, "Outbound queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id, "Outbound queue closed");
                false
            }
        }
    }
}

fn encode(msg: &ServerMessage) -> Option<Outbound> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            None
        }
    }
}
