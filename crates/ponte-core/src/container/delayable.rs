use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::container::traits::QueueContainer;
use crate::error::{ContainerError, ContainerResult};
use crate::message::{now_ms, MessageMetadataUpdate, QueuedMessage};
use crate::queue::QueueType;
use crate::trace::TraceInfo;
use crate::tx::TransactionController;

/// In-memory container delivering in enqueue order among eligible messages.
/// Entries with a future `delayed_to` are skipped until their deadline
/// passes; they keep their original position relative to later arrivals.
pub struct DelayableContainer {
    items: Arc<Mutex<VecDeque<QueuedMessage>>>,
}

impl DelayableContainer {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl Default for DelayableContainer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueContainer for DelayableContainer {
    fn queue_type(&self) -> QueueType {
        QueueType::SequentialDelayable
    }

    async fn enqueue(
        &self,
        items: Vec<QueuedMessage>,
        _trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<()> {
        let ids: Vec<Uuid> = items.iter().map(|m| m.id).collect();
        self.items.lock().extend(items);

        let store = Arc::clone(&self.items);
        tx.enroll_rollback(move || {
            store.lock().retain(|m| !ids.contains(&m.id));
        });
        Ok(())
    }

    async fn try_peek(
        &self,
        _trace: &TraceInfo,
        _tx: &TransactionController,
    ) -> ContainerResult<Option<QueuedMessage>> {
        let now = now_ms();
        let items = self.items.lock();
        Ok(items.iter().find(|m| m.is_eligible(now)).cloned())
    }

    async fn try_remove(
        &self,
        id: Uuid,
        _trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<QueuedMessage> {
        let mut items = self.items.lock();
        let Some(pos) = items.iter().position(|m| m.id == id) else {
            return Err(ContainerError::MessageNotFound(id));
        };
        let removed = items.remove(pos).expect("position just found");
        drop(items);

        let store = Arc::clone(&self.items);
        let restored = removed.clone();
        tx.enroll_rollback(move || {
            let mut items = store.lock();
            let at = pos.min(items.len());
            items.insert(at, restored);
        });
        Ok(removed)
    }

    async fn update(
        &self,
        id: Uuid,
        update: &MessageMetadataUpdate,
        _trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<()> {
        let mut items = self.items.lock();
        let Some(msg) = items.iter_mut().find(|m| m.id == id) else {
            return Err(ContainerError::MessageNotFound(id));
        };
        let prior = MessageMetadataUpdate::unchanged(msg);
        msg.apply(update);
        drop(items);

        let store = Arc::clone(&self.items);
        tx.enroll_rollback(move || {
            if let Some(msg) = store.lock().iter_mut().find(|m| m.id == id) {
                msg.apply(&prior);
            }
        });
        Ok(())
    }

    async fn count(&self) -> usize {
        self.items.lock().len()
    }

    async fn next_eligible_at(&self, now: u64) -> Option<u64> {
        self.items
            .lock()
            .iter()
            .filter_map(|m| m.delayed_to)
            .filter(|at| *at > now)
            .min()
    }
}
