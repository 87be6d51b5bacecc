use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{ContainerError, ContainerResult};
use crate::message::QueuedMessage;
use crate::trace::TraceInfo;
use crate::tx::TransactionController;

/// Optional persistence of message payloads, keyed by message id.
///
/// Saves enroll in the caller's transaction: a scheduled rollback removes
/// what the operation stored. Whether persistence is attempted at all is
/// the provider's call via `allow_message_persistence`.
#[async_trait]
pub trait MessageBodyProvider: Send + Sync {
    /// Whether this message's body should be persisted. `disabled` is the
    /// per-message opt-out flag.
    fn allow_message_persistence(&self, disabled: bool, msg: &QueuedMessage) -> bool;

    /// Persist one body shared by every routed copy of the message.
    async fn save_to_storage(
        &self,
        messages: &[QueuedMessage],
        body: &[u8],
        trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<()>;

    /// Load a previously persisted body.
    async fn load_from_storage(
        &self,
        msg: &QueuedMessage,
        trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<Option<Vec<u8>>>;

    /// Persist the reply produced for a request message.
    async fn save_reply_to_storage(
        &self,
        id: Uuid,
        reply: &[u8],
        trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<()>;
}

/// HashMap-backed body provider used by tests and as the default wiring.
pub struct InMemoryBodyStore {
    bodies: Arc<Mutex<HashMap<Uuid, Vec<u8>>>>,
    replies: Arc<Mutex<HashMap<Uuid, Vec<u8>>>>,
}

impl InMemoryBodyStore {
    pub fn new() -> Self {
        Self {
            bodies: Arc::new(Mutex::new(HashMap::new())),
            replies: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Stored reply for a request message, if any.
    pub fn reply_for(&self, id: Uuid) -> Option<Vec<u8>> {
        self.replies.lock().get(&id).cloned()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.lock().len()
    }
}

impl Default for InMemoryBodyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBodyProvider for InMemoryBodyStore {
    fn allow_message_persistence(&self, disabled: bool, msg: &QueuedMessage) -> bool {
        !disabled && msg.contains_content
    }

    async fn save_to_storage(
        &self,
        messages: &[QueuedMessage],
        body: &[u8],
        _trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<()> {
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        {
            let mut bodies = self.bodies.lock();
            for id in &ids {
                bodies.insert(*id, body.to_vec());
            }
        }

        let store = Arc::clone(&self.bodies);
        tx.enroll_rollback(move || {
            let mut bodies = store.lock();
            for id in &ids {
                bodies.remove(id);
            }
        });
        Ok(())
    }

    async fn load_from_storage(
        &self,
        msg: &QueuedMessage,
        _trace: &TraceInfo,
        _tx: &TransactionController,
    ) -> ContainerResult<Option<Vec<u8>>> {
        Ok(self.bodies.lock().get(&msg.id).cloned())
    }

    async fn save_reply_to_storage(
        &self,
        id: Uuid,
        reply: &[u8],
        _trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<()> {
        {
            let mut replies = self.replies.lock();
            // A rejected duplicate must leave the stored reply untouched.
            if replies.contains_key(&id) {
                return Err(ContainerError::BodyStore(format!(
                    "reply already stored for message {id}"
                )));
            }
            replies.insert(id, reply.to_vec());
        }

        let store = Arc::clone(&self.replies);
        tx.enroll_rollback(move || {
            store.lock().remove(&id);
        });
        Ok(())
    }
}
