use tokio::sync::broadcast;
use uuid::Uuid;

/// Queue operation that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEventKind {
    Enqueue,
    Peek,
    Remove,
    OnMessage,
}

/// Diagnostic event emitted by every queue operation. Best-effort and
/// ordered per queue; never influences the message outcome.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    pub queue: String,
    pub kind: QueueEventKind,
    pub message_id: Option<Uuid>,
    pub message_type: Option<String>,
    pub result: String,
}

/// Diagnostic event for a failed queue operation.
#[derive(Debug, Clone)]
pub struct QueueErrorEvent {
    pub queue: String,
    pub kind: QueueEventKind,
    pub message_id: Option<Uuid>,
    pub error: String,
}

#[derive(Debug, Clone)]
pub enum BusEvent {
    Queue(QueueEvent),
    QueueError(QueueErrorEvent),
}

/// Fan-out publisher for the bus lifecycle event stream. Subscribers that
/// lag or disconnect are ignored.
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<BusEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: QueueEvent) {
        let _ = self.tx.send(BusEvent::Queue(event));
    }

    pub fn emit_error(&self, event: QueueErrorEvent) {
        let _ = self.tx.send(BusEvent::QueueError(event));
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
