//! Saga event journal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::TransactionId;

use crate::attempt::SagaAttempt;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::state::SagaState;

/// Finished attempts kept by [`InMemorySagaJournal::new`].
pub const DEFAULT_RETAINED_ATTEMPTS: usize = 10_000;

/// Append-only log of saga events keyed by transaction.
///
/// Implementations must refuse to start a new saga for a transaction whose
/// latest attempt completed, returning [`SagaError::AlreadyCompleted`].
#[async_trait]
pub trait SagaJournal: Send + Sync {
    /// Appends events to a transaction's stream.
    async fn append(&self, transaction_id: &TransactionId, events: Vec<SagaEvent>) -> Result<()>;

    /// Folds the latest attempt for a transaction, `None` if it was never seen.
    async fn load(&self, transaction_id: &TransactionId) -> Result<Option<SagaAttempt>>;

    /// Attempts that started but never reached a terminal state.
    async fn incomplete(&self) -> Result<Vec<SagaAttempt>>;
}

#[derive(Debug)]
struct InMemoryJournalState {
    /// Events of the current attempt, for attempts still in flight.
    active: HashMap<TransactionId, Vec<SagaEvent>>,
    /// Folded terminal attempts, oldest first in `finished_order`.
    finished: HashMap<TransactionId, SagaAttempt>,
    finished_order: VecDeque<TransactionId>,
    capacity: usize,
    fail_on_append: bool,
}

impl InMemoryJournalState {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            active: HashMap::new(),
            finished: HashMap::new(),
            finished_order: VecDeque::new(),
            capacity,
            fail_on_append: false,
        }
    }

    fn latest(&self, transaction_id: &TransactionId) -> Option<SagaAttempt> {
        match self.active.get(transaction_id) {
            Some(events) if !events.is_empty() => Some(SagaAttempt::from_events(events)),
            _ => self.finished.get(transaction_id).cloned(),
        }
    }

    /// Moves a terminal attempt out of `active`, evicting the oldest
    /// finished attempts beyond `capacity`.
    fn finish(&mut self, transaction_id: &TransactionId, attempt: SagaAttempt) {
        self.active.remove(transaction_id);
        if self
            .finished
            .insert(transaction_id.clone(), attempt)
            .is_none()
        {
            self.finished_order.push_back(transaction_id.clone());
        }
        while self.finished.len() > self.capacity {
            let Some(oldest) = self.finished_order.pop_front() else {
                break;
            };
            self.finished.remove(&oldest);
        }
    }
}

/// Process-local journal. Its contents die with the process.
///
/// Only attempts still in flight keep their raw events. A terminal attempt
/// is folded into a [`SagaAttempt`] and kept for deduplication until
/// `capacity` newer attempts have finished.
#[derive(Debug, Clone)]
pub struct InMemorySagaJournal {
    state: Arc<RwLock<InMemoryJournalState>>,
}

impl Default for InMemorySagaJournal {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RETAINED_ATTEMPTS)
    }
}

impl InMemorySagaJournal {
    /// Creates a new, empty journal keeping [`DEFAULT_RETAINED_ATTEMPTS`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal that keeps at most `capacity` finished attempts.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryJournalState::with_capacity(capacity))),
        }
    }

    /// Raw events of a transaction's in-flight attempt, in append order.
    ///
    /// Empty once the attempt has finished.
    pub fn events(&self, transaction_id: &TransactionId) -> Vec<SagaEvent> {
        self.state
            .read()
            .unwrap()
            .active
            .get(transaction_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of transactions the journal currently remembers.
    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap();
        let in_flight = state
            .active
            .keys()
            .filter(|id| !state.finished.contains_key(*id))
            .count();
        in_flight + state.finished.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total raw events held for in-flight attempts.
    pub fn retained_events(&self) -> usize {
        self.state.read().unwrap().active.values().map(Vec::len).sum()
    }

    /// Configures the journal to fail every append.
    pub fn set_fail_on_append(&self, fail: bool) {
        self.state.write().unwrap().fail_on_append = fail;
    }
}

#[async_trait]
impl SagaJournal for InMemorySagaJournal {
    async fn append(&self, transaction_id: &TransactionId, events: Vec<SagaEvent>) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| SagaError::Journal("journal lock poisoned".to_string()))?;

        if state.fail_on_append {
            return Err(SagaError::Journal(format!(
                "append rejected for transaction {transaction_id}"
            )));
        }

        let starts_new = events
            .iter()
            .any(|event| matches!(event, SagaEvent::SagaStarted(_)));
        if starts_new
            && state
                .latest(transaction_id)
                .is_some_and(|attempt| attempt.state() == SagaState::Completed)
        {
            return Err(SagaError::AlreadyCompleted(transaction_id.clone()));
        }

        let stream = state.active.entry(transaction_id.clone()).or_default();
        stream.extend(events);
        // Earlier attempts no longer affect the fold.
        if let Some(last_start) = stream
            .iter()
            .rposition(|event| matches!(event, SagaEvent::SagaStarted(_)))
        {
            stream.drain(..last_start);
        }

        let attempt = SagaAttempt::from_events(stream.iter());
        if attempt.state().is_terminal() {
            state.finish(transaction_id, attempt);
        }
        Ok(())
    }

    async fn load(&self, transaction_id: &TransactionId) -> Result<Option<SagaAttempt>> {
        let state = self
            .state
            .read()
            .map_err(|_| SagaError::Journal("journal lock poisoned".to_string()))?;

        Ok(state.latest(transaction_id))
    }

    async fn incomplete(&self) -> Result<Vec<SagaAttempt>> {
        let state = self
            .state
            .read()
            .map_err(|_| SagaError::Journal("journal lock poisoned".to_string()))?;

        Ok(state
            .active
            .values()
            .map(|events| SagaAttempt::from_events(events))
            .filter(|attempt| attempt.state() != SagaState::NotStarted)
            .filter(|attempt| !attempt.state().is_terminal())
            .collect())
    }
}
