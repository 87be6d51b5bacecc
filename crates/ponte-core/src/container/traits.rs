use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ContainerResult;
use crate::message::{MessageMetadataUpdate, QueuedMessage};
use crate::queue::QueueType;
use crate::trace::TraceInfo;
use crate::tx::TransactionController;

/// Ordered buffer of queued-message metadata, owned exclusively by its
/// `MessageQueue`. Implementations must be thread-safe.
///
/// Every mutating operation applies immediately and enrolls a compensating
/// action with the transaction controller, so a scheduled rollback restores
/// the prior state when the scope completes. All methods return
/// `ContainerResult` — only infrastructure errors are possible here; domain
/// outcomes (disposed, terminated) are decided at the queue-runtime layer.
#[async_trait]
pub trait QueueContainer: Send + Sync {
    fn queue_type(&self) -> QueueType;

    /// Append messages in order. Atomic per transaction: a rollback removes
    /// every appended message.
    async fn enqueue(
        &self,
        items: Vec<QueuedMessage>,
        trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<()>;

    /// Return the next eligible message without removing it, or `None`.
    ///
    /// FIFO: strictly the head; a head with a future `delayed_to` yields
    /// `None` (no skip). Delayable: the first entry whose deadline has
    /// passed, skipping delayed ones.
    async fn try_peek(
        &self,
        trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<Option<QueuedMessage>>;

    /// Remove a message by id. `MessageNotFound` if absent.
    async fn try_remove(
        &self,
        id: Uuid,
        trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<QueuedMessage>;

    /// Apply a metadata diff to a stored message in place.
    async fn update(
        &self,
        id: Uuid,
        update: &MessageMetadataUpdate,
        trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<()>;

    /// Total number of enqueued messages.
    async fn count(&self) -> usize;

    /// Earliest future `delayed_to` deadline currently blocking delivery,
    /// epoch ms. Used by the dispatch task to re-arm after a backoff.
    /// FIFO reports the head's deadline only; delayable the minimum over
    /// all delayed entries. `None` when nothing is waiting on the clock.
    async fn next_eligible_at(&self, now: u64) -> Option<u64>;
}
