use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

/// Core OTel metrics for the bus. Created once at bus construction and
/// recorded on each queue operation. Instruments are no-op when no global
/// meter provider is configured.
pub struct BusMetrics {
    pub messages_enqueued: Counter<u64>,
    pub messages_delivered: Counter<u64>,
    pub messages_completed: Counter<u64>,
    pub messages_retried: Counter<u64>,
    pub messages_suspended: Counter<u64>,
    pub messages_expired: Counter<u64>,
    pub queue_depth: Gauge<u64>,
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BusMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("ponte");
        Self::from_meter(&meter)
    }

    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            messages_enqueued: meter
                .u64_counter("ponte.messages.enqueued")
                .with_description("Total messages enqueued")
                .build(),
            messages_delivered: meter
                .u64_counter("ponte.messages.delivered")
                .with_description("Total messages handed to a handler")
                .build(),
            messages_completed: meter
                .u64_counter("ponte.messages.completed")
                .with_description("Total messages completed and removed")
                .build(),
            messages_retried: meter
                .u64_counter("ponte.messages.retried")
                .with_description("Total retry attempts scheduled")
                .build(),
            messages_suspended: meter
                .u64_counter("ponte.messages.suspended")
                .with_description("Total messages suspended")
                .build(),
            messages_expired: meter
                .u64_counter("ponte.messages.expired")
                .with_description("Total messages expired to the fault queue")
                .build(),
            queue_depth: meter
                .u64_gauge("ponte.queue.depth")
                .with_description("Current queue depth")
                .build(),
        }
    }

    pub fn record_enqueue(&self, queue: &str) {
        self.messages_enqueued
            .add(1, &[KeyValue::new("queue", queue.to_string())]);
    }

    pub fn record_delivery(&self, queue: &str) {
        self.messages_delivered
            .add(1, &[KeyValue::new("queue", queue.to_string())]);
    }

    pub fn record_completion(&self, queue: &str) {
        self.messages_completed
            .add(1, &[KeyValue::new("queue", queue.to_string())]);
    }

    pub fn record_retry(&self, queue: &str) {
        self.messages_retried
            .add(1, &[KeyValue::new("queue", queue.to_string())]);
    }

    pub fn record_suspension(&self, queue: &str) {
        self.messages_suspended
            .add(1, &[KeyValue::new("queue", queue.to_string())]);
    }

    pub fn record_expiry(&self, queue: &str) {
        self.messages_expired
            .add(1, &[KeyValue::new("queue", queue.to_string())]);
    }

    pub fn set_queue_depth(&self, queue: &str, depth: u64) {
        self.queue_depth
            .record(depth, &[KeyValue::new("queue", queue.to_string())]);
    }
}
