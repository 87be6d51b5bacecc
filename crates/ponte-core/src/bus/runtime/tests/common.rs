use super::*;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;

pub(super) const MSG_TYPE: &str = "test.request";

pub(super) fn test_runtime(registry: Arc<HandlerRegistry>) -> QueueRuntimeContext {
    QueueRuntimeContext {
        registry,
        body: None,
        events: EventPublisher::new(64),
        metrics: Arc::new(BusMetrics::new()),
        default_client_error_message: "request failed".to_string(),
        default_error_handling: None,
        cancel: tokio_util::sync::CancellationToken::new(),
    }
}

pub(super) fn test_message(queue: &str) -> QueuedMessage {
    QueuedMessage {
        id: QueuedMessage::new_id(),
        parent_id: None,
        session_id: None,
        publisher_id: "test-host".to_string(),
        published_at: now_ms(),
        time_to_live: None,
        delayed_to: None,
        content_type: "application/json".to_string(),
        content_encoding: None,
        is_compressed: false,
        is_encrypted: false,
        contains_content: true,
        has_self_content: true,
        disable_persistence: false,
        priority: 0,
        headers: HashMap::new(),
        routing_key: None,
        timeout_ms: None,
        retry_count: 0,
        error_handling: None,
        status: MessageStatus::Created,
        processed: false,
        source_exchange: "commands".to_string(),
        queue_name: queue.to_string(),
        disable_fault_queue: false,
        message_type: MSG_TYPE.to_string(),
        payload: b"{}".to_vec(),
    }
}

/// Handler replaying a scripted sequence of results; falls back to
/// `Completed` when the script runs out. Counts invocations.
pub(super) struct ScriptedHandler {
    script: Mutex<VecDeque<MessageHandlerResult>>,
    pub invocations: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(script: Vec<MessageHandlerResult>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn completed() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(
        &self,
        _msg: &QueuedMessage,
        _ctx: &HandlerContext,
    ) -> Result<MessageHandlerResult, HandlerFailure> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .lock()
            .pop_front()
            .unwrap_or(MessageHandlerResult::Completed { reply: None }))
    }
}

/// Registry with a scripted handler installed under `MSG_TYPE`.
pub(super) fn scripted_registry(
    script: Vec<MessageHandlerResult>,
) -> (Arc<HandlerRegistry>, Arc<ScriptedHandler>) {
    let registry = Arc::new(HandlerRegistry::new());
    let handler = ScriptedHandler::new(script);
    registry.register_dyn(MSG_TYPE, Arc::clone(&handler) as Arc<dyn MessageHandler>);
    (registry, handler)
}

/// Enqueue a message in its own committed transaction scope (push-async
/// queues only buffer it; the test drives `on_message` explicitly).
pub(super) async fn enqueue_committed(queue: &MessageQueue, msg: QueuedMessage) {
    let trace = TraceInfo::root("test.enqueue");
    let tx = Arc::new(TransactionController::new());
    queue
        .enqueue(msg, &trace, &tx, false)
        .await
        .expect("enqueue should succeed");
    tx.schedule_commit();
    tx.complete();
}

/// Collect every buffered bus event without blocking.
pub(super) fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<BusEvent>,
) -> Vec<BusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Project successful queue events to (kind, result) pairs.
pub(super) fn event_kinds(events: &[BusEvent]) -> Vec<(QueueEventKind, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            BusEvent::Queue(event) => Some((event.kind, event.result.clone())),
            BusEvent::QueueError(_) => None,
        })
        .collect()
}
