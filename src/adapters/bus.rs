//! In-process event bus for stage-transition notifications.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::{EventPublisher, StoreError};
use crate::domain::StageNotification;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 256;

/// Default number of notifications kept for late readers
const DEFAULT_HISTORY: usize = 1000;

/// Tokio broadcast channel plus a bounded history buffer.
///
/// Publishing with no live subscribers is not an error; the notification
/// still lands in the history.
#[derive(Debug)]
pub struct BroadcastBus {
    tx: broadcast::Sender<StageNotification>,
    history: RwLock<Vec<StageNotification>>,
    history_size: usize,
    unavailable: AtomicBool,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, DEFAULT_HISTORY)
    }

    pub fn with_capacity(capacity: usize, history_size: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            history: RwLock::new(Vec::new()),
            history_size,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageNotification> {
        self.tx.subscribe()
    }

    /// Recent notifications, oldest first
    pub async fn history(&self) -> Vec<StageNotification> {
        self.history.read().await.clone()
    }

    /// Make publishing fail, for exercising the non-fatal publish path
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for BroadcastBus {
    async fn publish(&self, notification: &StageNotification) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("event bus offline".to_string()));
        }

        {
            let mut history = self.history.write().await;
            history.push(notification.clone());
            if history.len() > self.history_size {
                let excess = history.len() - self.history_size;
                history.drain(..excess);
            }
        }

        // Err only means nobody is listening right now
        let receivers = self.tx.send(notification.clone()).unwrap_or(0);
        debug!(
            stage = %notification.stage,
            agent = %notification.agent,
            receivers,
            "Published stage notification"
        );
        Ok(())
    }
}
