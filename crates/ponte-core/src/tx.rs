use std::future::Future;

use parking_lot::Mutex;
use tracing::debug;

/// Compensating action enrolled by an operation so a scheduled rollback can
/// undo its side effect.
type Compensation = Box<dyn FnOnce() + Send>;

/// Scheduled completion of a transaction scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Commit,
    Rollback,
}

struct TxState {
    outcome: Option<TxOutcome>,
    rollback_detail: Option<String>,
    compensations: Vec<Compensation>,
    completed: bool,
}

/// Per-operation-scope coordinator for commit/rollback of side effects.
///
/// Operations mutate immediately and enroll a compensation; `complete` runs
/// the compensations in reverse enrollment order iff a rollback was
/// scheduled. A scheduled rollback is sticky — a later commit does not
/// override it.
pub struct TransactionController {
    state: Mutex<TxState>,
}

impl TransactionController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TxState {
                outcome: None,
                rollback_detail: None,
                compensations: Vec::new(),
                completed: false,
            }),
        }
    }

    pub fn schedule_commit(&self) {
        let mut state = self.state.lock();
        if state.outcome != Some(TxOutcome::Rollback) {
            state.outcome = Some(TxOutcome::Commit);
        }
    }

    pub fn schedule_rollback(&self, detail: Option<String>) {
        let mut state = self.state.lock();
        state.outcome = Some(TxOutcome::Rollback);
        if state.rollback_detail.is_none() {
            state.rollback_detail = detail;
        }
    }

    pub fn enroll_rollback(&self, compensation: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        // Enrolling after completion would leak the compensation; drop it.
        if !state.completed {
            state.compensations.push(Box::new(compensation));
        }
    }

    pub fn has_rollback(&self) -> bool {
        self.state.lock().outcome == Some(TxOutcome::Rollback)
    }

    pub fn rollback_detail(&self) -> Option<String> {
        self.state.lock().rollback_detail.clone()
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    /// Execute the scheduled outcome exactly once. No outcome scheduled
    /// counts as a rollback — an operation scope that never reached its
    /// commit point must not keep its side effects.
    pub fn complete(&self) {
        let (outcome, compensations, detail) = {
            let mut state = self.state.lock();
            if state.completed {
                return;
            }
            state.completed = true;
            (
                state.outcome.take().unwrap_or(TxOutcome::Rollback),
                std::mem::take(&mut state.compensations),
                state.rollback_detail.clone(),
            )
        };

        match outcome {
            TxOutcome::Commit => {}
            TxOutcome::Rollback => {
                debug!(
                    compensations = compensations.len(),
                    detail = detail.as_deref().unwrap_or(""),
                    "rolling back transaction scope"
                );
                for compensation in compensations.into_iter().rev() {
                    compensation();
                }
            }
        }
    }
}

impl Default for TransactionController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransactionController {
    fn drop(&mut self) {
        // A scope dropped without completion rolls back, same as complete().
        let (outcome, compensations) = {
            let state = self.state.get_mut();
            if state.completed {
                return;
            }
            state.completed = true;
            (
                state.outcome.take().unwrap_or(TxOutcome::Rollback),
                std::mem::take(&mut state.compensations),
            )
        };
        if outcome == TxOutcome::Rollback {
            for compensation in compensations.into_iter().rev() {
                compensation();
            }
        }
    }
}

/// Wrap a unit of work with commit/rollback scheduling: commit on `Ok`,
/// rollback on `Err`, always complete the scope.
pub async fn with_transaction<T, E, F, Fut>(
    tx: &TransactionController,
    work: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match work().await {
        Ok(value) => {
            tx.schedule_commit();
            tx.complete();
            Ok(value)
        }
        Err(err) => {
            tx.schedule_rollback(Some(err.to_string()));
            tx.complete();
            Err(err)
        }
    }
}
