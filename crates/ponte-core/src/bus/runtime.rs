use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::events::{EventPublisher, QueueErrorEvent, QueueEvent, QueueEventKind};
use super::handler::{HandlerContext, MessageHandlerResult};
use super::metrics::BusMetrics;
use super::pipeline;
use super::registry::HandlerRegistry;
use crate::body::MessageBodyProvider;
use crate::container::{container_for, QueueContainer};
use crate::error::{ContainerError, EnqueueError, PeekError, RemoveError, UpdateError};
use crate::message::{now_ms, MessageMetadataUpdate, MessageStatus, QueuedMessage};
use crate::queue::{queue_id, ErrorHandling, QueueConfig, QueueStatus, QueueType};
use crate::trace::TraceInfo;
use crate::tx::TransactionController;

/// Shared services handed to every queue instead of a runtime service
/// locator: body provider, event stream, metrics, and the defaults the
/// dispatch path needs.
#[derive(Clone)]
pub struct QueueRuntimeContext {
    pub registry: Arc<HandlerRegistry>,
    pub body: Option<Arc<dyn MessageBodyProvider>>,
    pub events: EventPublisher,
    pub metrics: Arc<BusMetrics>,
    pub default_client_error_message: String,
    pub default_error_handling: Option<ErrorHandling>,
    pub cancel: tokio_util::sync::CancellationToken,
}

/// Result of one handler attempt as seen by the queue: the handler's result
/// plus the metadata update derived from it.
#[derive(Debug)]
pub struct HandlerOutcome {
    pub result: MessageHandlerResult,
    pub update: MessageMetadataUpdate,
}

/// Per-logical-queue state machine: buffers queued messages, drives the
/// push/pull dispatch loop, applies retry and fault policy, and coordinates
/// with the transaction controller.
///
/// Within one queue the dispatch loop is single-threaded cooperative —
/// `on_message_lock` guarantees at most one active drain pass; concurrent
/// triggers coalesce. Queues run independently of each other.
pub struct MessageQueue {
    config: QueueConfig,
    id: Uuid,
    status: Mutex<QueueStatus>,
    container: Box<dyn QueueContainer>,
    runtime: QueueRuntimeContext,
    fault: Option<Arc<MessageQueue>>,
    on_message_lock: tokio::sync::Mutex<()>,
    notify: Notify,
    disposed: AtomicBool,
}

impl MessageQueue {
    pub fn new(
        config: QueueConfig,
        runtime: QueueRuntimeContext,
        fault: Option<Arc<MessageQueue>>,
    ) -> Arc<Self> {
        let container = container_for(config.queue_type);
        let id = queue_id(&config.name);
        Arc::new(Self {
            config,
            id,
            status: Mutex::new(QueueStatus::Running),
            container,
            runtime,
            fault,
            on_message_lock: tokio::sync::Mutex::new(()),
            notify: Notify::new(),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn status(&self) -> QueueStatus {
        *self.status.lock()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Monotone status assignment: `Terminated` sticks.
    fn transition(&self, to: QueueStatus) {
        let mut status = self.status.lock();
        if *status != QueueStatus::Terminated {
            *status = to;
        }
    }

    /// External resumption of a suspended queue.
    pub fn resume(&self) {
        {
            let mut status = self.status.lock();
            if *status == QueueStatus::Suspended {
                *status = QueueStatus::Running;
            }
        }
        self.notify.notify_one();
    }

    /// Stop accepting messages permanently.
    pub fn terminate(&self) {
        self.transition(QueueStatus::Terminated);
        self.notify.notify_one();
    }

    /// Mark the queue disposed; every subsequent operation fails with a
    /// disposed-queue error and the dispatch task exits.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Wake the dispatch loop.
    pub fn signal(&self) {
        self.notify.notify_one();
    }

    /// Store a message. Push-synchronous queues invoke the handler inside
    /// the caller's transaction and return its outcome; push-asynchronous
    /// queues signal the dispatch loop. `force_async` suppresses the
    /// synchronous invocation for this call.
    pub async fn enqueue(
        &self,
        msg: QueuedMessage,
        trace: &TraceInfo,
        tx: &Arc<TransactionController>,
        force_async: bool,
    ) -> Result<Option<HandlerOutcome>, EnqueueError> {
        if self.is_disposed() {
            return Err(EnqueueError::QueueDisposed(self.config.name.clone()));
        }
        if self.status() == QueueStatus::Terminated {
            return Err(EnqueueError::QueueTerminated(self.config.name.clone()));
        }
        if let Some(max) = self.config.max_size {
            if self.container.count().await >= max {
                return Err(EnqueueError::QueueFull {
                    queue: self.config.name.clone(),
                    max,
                });
            }
        }

        if let Err(e) = self.container.enqueue(vec![msg.clone()], trace, tx).await {
            self.emit_error(QueueEventKind::Enqueue, Some(msg.id), &e);
            return Err(e.into());
        }

        self.emit(QueueEventKind::Enqueue, Some(&msg), "ok");
        self.runtime.metrics.record_enqueue(&self.config.name);
        self.runtime
            .metrics
            .set_queue_depth(&self.config.name, self.container.count().await as u64);

        if self.config.is_pull {
            return Ok(None);
        }
        if self.config.is_synchronous && !force_async {
            let outcome = self.handle_and_settle(msg, trace, tx).await?;
            return Ok(Some(outcome));
        }
        self.notify.notify_one();
        Ok(None)
    }

    /// Next eligible message without removing it, or `None`.
    pub async fn try_peek(
        &self,
        trace: &TraceInfo,
        tx: &Arc<TransactionController>,
    ) -> Result<Option<QueuedMessage>, PeekError> {
        if self.is_disposed() {
            return Err(PeekError::QueueDisposed(self.config.name.clone()));
        }
        let head = self.container.try_peek(trace, tx).await?;
        if let Some(head) = &head {
            self.emit(QueueEventKind::Peek, Some(head), "ok");
        }
        Ok(head)
    }

    /// Remove a message by id.
    pub async fn try_remove(
        &self,
        id: Uuid,
        trace: &TraceInfo,
        tx: &Arc<TransactionController>,
    ) -> Result<QueuedMessage, RemoveError> {
        if self.is_disposed() {
            return Err(RemoveError::QueueDisposed(self.config.name.clone()));
        }
        let removed = match self.container.try_remove(id, trace, tx).await {
            Ok(removed) => removed,
            Err(ContainerError::MessageNotFound(id)) => {
                return Err(RemoveError::MessageNotFound(id))
            }
            Err(e) => {
                self.emit_error(QueueEventKind::Remove, Some(id), &e);
                return Err(e.into());
            }
        };
        self.emit(QueueEventKind::Remove, Some(&removed), "ok");
        self.runtime
            .metrics
            .set_queue_depth(&self.config.name, self.container.count().await as u64);
        Ok(removed)
    }

    /// Apply a metadata diff to a stored message (pull consumers settling
    /// or deferring a message they drained).
    pub async fn update(
        &self,
        id: Uuid,
        update: &MessageMetadataUpdate,
        trace: &TraceInfo,
        tx: &Arc<TransactionController>,
    ) -> Result<(), UpdateError> {
        if self.is_disposed() {
            return Err(UpdateError::QueueDisposed(self.config.name.clone()));
        }
        match self.container.update(id, update, trace, tx).await {
            Ok(()) => Ok(()),
            Err(ContainerError::MessageNotFound(id)) => Err(UpdateError::MessageNotFound(id)),
            Err(e) => {
                self.emit_error(QueueEventKind::OnMessage, Some(id), &e);
                Err(e.into())
            }
        }
    }

    pub async fn count(&self) -> Result<usize, PeekError> {
        if self.is_disposed() {
            return Err(PeekError::QueueDisposed(self.config.name.clone()));
        }
        Ok(self.container.count().await)
    }

    /// One dispatch drain pass. At most one pass runs at a time; a trigger
    /// arriving while a pass is active coalesces into it (the enqueue
    /// signal re-arms the loop).
    pub async fn on_message(&self) {
        let Ok(_guard) = self.on_message_lock.try_lock() else {
            return;
        };

        loop {
            if self.runtime.cancel.is_cancelled()
                || self.is_disposed()
                || self.status() != QueueStatus::Running
            {
                return;
            }

            let trace = TraceInfo::root("queue.on_message");
            let tx = Arc::new(TransactionController::new());

            let head = match self.container.try_peek(&trace, &tx).await {
                Err(e) => {
                    error!(queue = %self.config.name, error = %e, "peek failed");
                    self.emit_error(QueueEventKind::Peek, None, &e);
                    tx.schedule_rollback(Some(e.to_string()));
                    tx.complete();
                    return;
                }
                Ok(None) => {
                    tx.schedule_commit();
                    tx.complete();
                    return;
                }
                Ok(Some(head)) => head,
            };
            self.emit(QueueEventKind::Peek, Some(&head), "ok");

            // A message already processed in an earlier pass only needs
            // removing.
            if head.processed {
                match self.container.try_remove(head.id, &trace, &tx).await {
                    Ok(removed) => {
                        self.emit(QueueEventKind::Remove, Some(&removed), "ok");
                        tx.schedule_commit();
                    }
                    Err(e) => {
                        self.emit_error(QueueEventKind::Remove, Some(head.id), &e);
                        tx.schedule_rollback(Some(e.to_string()));
                    }
                }
                tx.complete();
                continue;
            }

            // Expired messages never reach a handler; they go to the fault
            // queue unless the message opted out.
            if head.is_expired(now_ms()) {
                if self.route_expired(&head, &trace, &tx).await {
                    tx.complete();
                    continue;
                }
                tx.complete();
                return;
            }

            let outcome = self.handle_message(head.clone(), &trace, &tx).await;
            self.emit(QueueEventKind::OnMessage, Some(&head), outcome.result.label());

            if outcome.update.processed {
                match self.container.try_remove(head.id, &trace, &tx).await {
                    Ok(removed) => {
                        self.emit(QueueEventKind::Remove, Some(&removed), "ok");
                        self.runtime.metrics.record_completion(&self.config.name);
                        tx.schedule_commit();
                    }
                    Err(e) => {
                        self.emit_error(QueueEventKind::Remove, Some(head.id), &e);
                        tx.schedule_rollback(Some(e.to_string()));
                    }
                }
                tx.complete();
                self.runtime
                    .metrics
                    .set_queue_depth(&self.config.name, self.container.count().await as u64);
                continue;
            }

            // Deferred, suspended, errored: the head stays put (already
            // updated in its own scope); stop draining until the clock or an
            // external signal makes progress possible.
            tx.schedule_commit();
            tx.complete();
            return;
        }
    }

    /// Move an expired head to the fault queue and drop it from this queue,
    /// all within the tick transaction. Returns false when the tick must be
    /// rolled back and retried.
    async fn route_expired(
        &self,
        head: &QueuedMessage,
        trace: &TraceInfo,
        tx: &Arc<TransactionController>,
    ) -> bool {
        if !head.disable_fault_queue {
            if let Some(fault) = &self.fault {
                let mut copy = head.clone();
                copy.queue_name = fault.name().to_string();
                copy.status = MessageStatus::Created;
                copy.processed = false;
                if let Err(e) = fault.enqueue(copy, trace, tx, true).await {
                    warn!(
                        queue = %self.config.name,
                        fault_queue = %fault.name(),
                        message_id = %head.id,
                        error = %e,
                        "fault queue enqueue failed, rolling back"
                    );
                    self.emit_error(QueueEventKind::OnMessage, Some(head.id), &e);
                    tx.schedule_rollback(Some(e.to_string()));
                    return false;
                }
            }
        }

        match self.container.try_remove(head.id, trace, tx).await {
            Ok(removed) => {
                debug!(
                    queue = %self.config.name,
                    message_id = %head.id,
                    "expired message terminated"
                );
                self.emit(QueueEventKind::Remove, Some(&removed), "expired");
                self.runtime.metrics.record_expiry(&self.config.name);
                tx.schedule_commit();
                true
            }
            Err(e) => {
                self.emit_error(QueueEventKind::Remove, Some(head.id), &e);
                tx.schedule_rollback(Some(e.to_string()));
                false
            }
        }
    }

    /// Invoke the handler for one message and persist the resulting
    /// metadata update in a fresh transaction that commits unless the
    /// handler result demands a rollback.
    async fn handle_message(
        &self,
        msg: QueuedMessage,
        trace: &TraceInfo,
        tx: &Arc<TransactionController>,
    ) -> HandlerOutcome {
        let prior = MessageMetadataUpdate::unchanged(&msg);
        let mut msg = msg;

        // Reconstitute the body when it lives in the provider.
        if msg.contains_content && !msg.has_self_content {
            if let Some(provider) = &self.runtime.body {
                match provider.load_from_storage(&msg, trace, tx).await {
                    Ok(Some(body)) => msg.payload = body,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            queue = %self.config.name,
                            message_id = %msg.id,
                            error = %e,
                            "body load failed"
                        );
                        self.emit_error(QueueEventKind::OnMessage, Some(msg.id), &e);
                        tx.schedule_rollback(Some(e.to_string()));
                        return HandlerOutcome {
                            result: MessageHandlerResult::Error(
                                super::handler::ErrorDetail::new(e.to_string())
                                    .with_client_message(
                                        self.runtime.default_client_error_message.clone(),
                                    )
                                    .with_rollback(),
                            ),
                            update: prior,
                        };
                    }
                }
            }
        }

        msg.status = MessageStatus::Delivered;
        self.runtime.metrics.record_delivery(&self.config.name);

        let ctx = HandlerContext::for_message(
            &msg,
            trace.child("queue.handle_message"),
            Arc::clone(tx),
        );
        let handler = self.runtime.registry.resolve(&msg.message_type);
        let timeout_ms = msg
            .timeout_ms
            .or(self.config.default_processing_timeout_ms);

        let result = pipeline::invoke_handler(
            handler,
            &msg,
            &ctx,
            timeout_ms,
            &self.runtime.default_client_error_message,
        )
        .await;

        let update = self.interpret(&msg, &prior, &result);

        if self.config.queue_type == QueueType::SequentialFifo
            && matches!(
                update.status,
                MessageStatus::Suspended | MessageStatus::Aborted
            )
        {
            self.transition(QueueStatus::Suspended);
            self.runtime.metrics.record_suspension(&self.config.name);
        }
        if update.retry_count > prior.retry_count {
            self.runtime.metrics.record_retry(&self.config.name);
        }

        let update_tx = TransactionController::new();
        match self
            .container
            .update(msg.id, &update, trace, &update_tx)
            .await
        {
            Ok(()) => {
                if result.has_rollback_error() {
                    update_tx.schedule_rollback(None);
                } else {
                    update_tx.schedule_commit();
                }
            }
            Err(e) => {
                warn!(
                    queue = %self.config.name,
                    message_id = %msg.id,
                    error = %e,
                    "metadata update failed"
                );
                self.emit_error(QueueEventKind::OnMessage, Some(msg.id), &e);
                update_tx.schedule_rollback(Some(e.to_string()));
            }
        }
        update_tx.complete();

        HandlerOutcome { result, update }
    }

    /// Map a handler result onto the metadata diff per the delivery policy.
    fn interpret(
        &self,
        msg: &QueuedMessage,
        prior: &MessageMetadataUpdate,
        result: &MessageHandlerResult,
    ) -> MessageMetadataUpdate {
        match result {
            MessageHandlerResult::Completed { .. } => MessageMetadataUpdate::completed(msg),
            MessageHandlerResult::Deferred { retry_interval_ms } => MessageMetadataUpdate {
                status: MessageStatus::Deferred,
                retry_count: msg.retry_count,
                delayed_to: Some(now_ms() + *retry_interval_ms),
                processed: false,
            },
            MessageHandlerResult::Retry {
                interval_override_ms,
            } => {
                let policy = msg
                    .error_handling
                    .or(self.config.error_handling)
                    .or(self.runtime.default_error_handling);
                let interval =
                    (*interval_override_ms).or(policy.and_then(|p| p.retry_interval_ms));
                let can_retry = policy.is_some_and(|p| p.can_retry(msg.retry_count));
                match interval {
                    Some(interval) if can_retry => MessageMetadataUpdate {
                        status: MessageStatus::Deferred,
                        retry_count: msg.retry_count + 1,
                        delayed_to: Some(now_ms() + interval),
                        processed: false,
                    },
                    _ => MessageMetadataUpdate {
                        status: MessageStatus::Suspended,
                        retry_count: msg.retry_count,
                        delayed_to: None,
                        processed: false,
                    },
                }
            }
            MessageHandlerResult::Suspended => MessageMetadataUpdate {
                status: MessageStatus::Suspended,
                retry_count: msg.retry_count,
                delayed_to: None,
                processed: false,
            },
            MessageHandlerResult::Aborted => MessageMetadataUpdate {
                status: MessageStatus::Aborted,
                retry_count: msg.retry_count,
                delayed_to: None,
                processed: false,
            },
            // The message keeps its pre-delivery metadata; the rollback (if
            // demanded) already undid the side effects.
            MessageHandlerResult::Error(_) => prior.clone(),
        }
    }

    /// Synchronous push settlement: invoke the handler inside the caller's
    /// transaction and remove the message on completion.
    async fn handle_and_settle(
        &self,
        msg: QueuedMessage,
        trace: &TraceInfo,
        tx: &Arc<TransactionController>,
    ) -> Result<HandlerOutcome, EnqueueError> {
        let outcome = self.handle_message(msg.clone(), trace, tx).await;
        self.emit(QueueEventKind::OnMessage, Some(&msg), outcome.result.label());

        if outcome.update.processed {
            let removed = self.container.try_remove(msg.id, trace, tx).await?;
            self.emit(QueueEventKind::Remove, Some(&removed), "ok");
            self.runtime.metrics.record_completion(&self.config.name);
        }
        Ok(outcome)
    }

    /// Background dispatch task for push-asynchronous queues. Drains on
    /// every signal and re-arms itself on the earliest delayed-message
    /// deadline.
    pub(crate) async fn run_dispatch_loop(self: Arc<Self>) {
        let cancel = self.runtime.cancel.clone();
        loop {
            self.on_message().await;

            if cancel.is_cancelled() || self.is_disposed() {
                return;
            }

            match self.container.next_eligible_at(now_ms()).await {
                Some(at) => {
                    let delay = Duration::from_millis(at.saturating_sub(now_ms()).max(1));
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }

    fn emit(&self, kind: QueueEventKind, msg: Option<&QueuedMessage>, result: &str) {
        self.runtime.events.emit(QueueEvent {
            queue: self.config.name.clone(),
            kind,
            message_id: msg.map(|m| m.id),
            message_type: msg.map(|m| m.message_type.clone()),
            result: result.to_string(),
        });
    }

    fn emit_error(
        &self,
        kind: QueueEventKind,
        message_id: Option<Uuid>,
        error: &dyn std::fmt::Display,
    ) {
        self.runtime.events.emit_error(QueueErrorEvent {
            queue: self.config.name.clone(),
            kind,
            message_id,
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests;
