use super::step::AttemptResult;
use crate::core::{CommitAction, EntityId};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Final notification emitted once per chain run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainNotification {
    Succeeded {
        id: EntityId,
    },
    Failed {
        id: Option<EntityId>,
        step: CommitAction,
        reason: String,
    },
}

/// Sink for attempt and completion events.
pub trait CommitObserver: Send + Sync {
    fn on_attempt(&self, _step: CommitAction, _attempt: u32, _result: &AttemptResult) {}

    fn on_chain_finished(&self, _notification: &ChainNotification) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CommitObserver for NoopObserver {}

/// Emits every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl CommitObserver for TracingObserver {
    fn on_attempt(&self, step: CommitAction, attempt: u32, result: &AttemptResult) {
        match result {
            AttemptResult::Success(receipt) => info!(
                %step,
                attempt,
                entity = %receipt.entity,
                message_id = %receipt.message_id,
                replayed = receipt.replayed,
                "commit step succeeded"
            ),
            AttemptResult::RetryableFailure(reason) => {
                warn!(%step, attempt, %reason, "commit step attempt failed")
            }
            AttemptResult::FatalFailure(reason) => {
                error!(%step, attempt, %reason, "commit step failed")
            }
        }
    }

    fn on_chain_finished(&self, notification: &ChainNotification) {
        match notification {
            ChainNotification::Succeeded { id } => info!(%id, "commit chain completed"),
            ChainNotification::Failed { id, step, reason } => error!(
                id = id.as_ref().map(EntityId::as_str).unwrap_or("-"),
                %step,
                %reason,
                "commit chain failed"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Attempt {
        step: CommitAction,
        attempt: u32,
        result: AttemptResult,
    },
    Finished(ChainNotification),
}

/// Records every event in memory.
#[derive(Debug, Default)]
pub struct AttemptJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl AttemptJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Number of attempts recorded for `step`, across every run.
    pub fn attempts(&self, step: CommitAction) -> usize {
        self.entries()
            .iter()
            .filter(|entry| matches!(entry, JournalEntry::Attempt { step: s, .. } if *s == step))
            .count()
    }

    pub fn notifications(&self) -> Vec<ChainNotification> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                JournalEntry::Finished(notification) => Some(notification),
                JournalEntry::Attempt { .. } => None,
            })
            .collect()
    }

    fn push(&self, entry: JournalEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

impl CommitObserver for AttemptJournal {
    fn on_attempt(&self, step: CommitAction, attempt: u32, result: &AttemptResult) {
        self.push(JournalEntry::Attempt {
            step,
            attempt,
            result: result.clone(),
        });
    }

    fn on_chain_finished(&self, notification: &ChainNotification) {
        self.push(JournalEntry::Finished(notification.clone()));
    }
}

/// Forwards events to several observers in order.
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<std::sync::Arc<dyn CommitObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: std::sync::Arc<dyn CommitObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl CommitObserver for ObserverSet {
    fn on_attempt(&self, step: CommitAction, attempt: u32, result: &AttemptResult) {
        for observer in &self.observers {
            observer.on_attempt(step, attempt, result);
        }
    }

    fn on_chain_finished(&self, notification: &ChainNotification) {
        for observer in &self.observers {
            observer.on_chain_finished(notification);
        }
    }
}
