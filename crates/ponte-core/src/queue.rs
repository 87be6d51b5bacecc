use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordering policy of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum QueueType {
    /// Strict enqueue order; a blocked head blocks the whole queue.
    #[default]
    SequentialFifo,
    /// Enqueue order among eligible messages; delayed entries are skipped
    /// until their deadline passes.
    SequentialDelayable,
}

/// Runtime state of a queue. Assignment is monotone: `Terminated` sticks,
/// `Suspended` is cleared only by an explicit resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum QueueStatus {
    #[default]
    Running,
    Suspended,
    Terminated,
}

/// Retry policy applied when a handler reports a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandling {
    pub max_retries: u32,
    /// Backoff between attempts, milliseconds. A retryable failure with no
    /// interval configured suspends the message instead.
    pub retry_interval_ms: Option<u64>,
}

impl ErrorHandling {
    pub fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// Queue configuration, deserializable from the bus TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    pub queue_type: QueueType,
    /// Pull queues are drained by external consumers; push queues dispatch
    /// to registered handlers.
    pub is_pull: bool,
    /// Push-synchronous queues invoke the handler inside the producer's
    /// enqueue call and transaction; otherwise a background loop dispatches.
    pub is_synchronous: bool,
    pub max_size: Option<usize>,
    /// Default processing timeout for handler invocations, milliseconds.
    pub default_processing_timeout_ms: Option<u64>,
    /// Settable but consumed by no code path; the dispatch loop re-arms from
    /// the earliest message deadline instead of polling.
    pub fetch_interval_ms: u64,
    /// Hard-wired to false by the in-memory containers.
    pub is_persistent: bool,
    pub is_fault_queue: bool,
    /// Queue-level retry policy; a message-level policy overrides it.
    pub error_handling: Option<ErrorHandling>,
}

impl QueueConfig {
    pub const DEFAULT_FETCH_INTERVAL_MS: u64 = 1_000;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            queue_type: QueueType::SequentialFifo,
            is_pull: false,
            is_synchronous: false,
            max_size: None,
            default_processing_timeout_ms: None,
            fetch_interval_ms: Self::DEFAULT_FETCH_INTERVAL_MS,
            is_persistent: false,
            is_fault_queue: false,
            error_handling: None,
        }
    }
}

/// Namespace for name-derived queue ids (UUIDv5).
const QUEUE_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8f, 0x2a, 0x51, 0x6e, 0x9c, 0x04, 0x4b, 0x1d, 0xb0, 0x3e, 0x75, 0xd1, 0x2a, 0x6f, 0x40,
    0x9b,
]);

/// Deterministic queue id: equal names always yield equal ids.
pub fn queue_id(name: &str) -> Uuid {
    Uuid::new_v5(&QUEUE_ID_NAMESPACE, name.as_bytes())
}
