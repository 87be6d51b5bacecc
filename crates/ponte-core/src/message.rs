use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::queue::ErrorHandling;

/// Delivery lifecycle of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Created,
    Delivered,
    Completed,
    Suspended,
    Deferred,
    Aborted,
}

/// Core message domain type: the user payload plus the metadata the queue
/// runtime operates on. This is the internal representation used by the
/// containers and the dispatch loop — handlers see the decoded payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedMessage {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Correlation across a conversation of messages.
    pub session_id: Option<Uuid>,
    pub publisher_id: String,
    /// Epoch milliseconds at publish time.
    pub published_at: u64,
    /// Epoch milliseconds after which the message must not reach a handler.
    pub time_to_live: Option<u64>,
    /// Epoch milliseconds before which the message is not eligible for delivery.
    pub delayed_to: Option<u64>,

    pub content_type: String,
    pub content_encoding: Option<String>,
    pub is_compressed: bool,
    pub is_encrypted: bool,

    /// The message carries a payload at all (some control messages do not).
    pub contains_content: bool,
    /// The payload travels inline in `payload` rather than via the body provider.
    pub has_self_content: bool,
    pub disable_persistence: bool,

    pub priority: i32,
    pub headers: HashMap<String, String>,
    pub routing_key: Option<String>,

    /// Per-message processing timeout override, milliseconds.
    pub timeout_ms: Option<u64>,
    pub retry_count: u32,
    /// Per-message override of the queue's retry policy.
    pub error_handling: Option<ErrorHandling>,

    pub status: MessageStatus,
    pub processed: bool,

    pub source_exchange: String,
    pub queue_name: String,
    pub disable_fault_queue: bool,

    /// Handler dispatch key — the registered request-message type name.
    pub message_type: String,
    /// Inline payload bytes (empty when the body lives in the provider).
    pub payload: Vec<u8>,
}

impl QueuedMessage {
    /// Generate a new UUIDv7 message ID.
    pub fn new_id() -> Uuid {
        Uuid::now_v7()
    }

    /// Whether the message's time-to-live has passed at `now` (epoch ms).
    pub fn is_expired(&self, now: u64) -> bool {
        self.time_to_live.is_some_and(|ttl| ttl < now)
    }

    /// Whether the message may be handed to a handler at `now` (epoch ms).
    pub fn is_eligible(&self, now: u64) -> bool {
        self.delayed_to.is_none_or(|at| at <= now)
    }

    /// Apply a metadata diff in place.
    pub fn apply(&mut self, update: &MessageMetadataUpdate) {
        self.status = update.status;
        self.retry_count = update.retry_count;
        self.delayed_to = update.delayed_to;
        self.processed = update.processed;
    }
}

/// Metadata diff produced after each handler attempt and applied to the
/// stored message. `processed` is true iff `status` is `Completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadataUpdate {
    pub status: MessageStatus,
    pub retry_count: u32,
    pub delayed_to: Option<u64>,
    pub processed: bool,
}

impl MessageMetadataUpdate {
    /// Build an update that keeps the message exactly as it was.
    pub fn unchanged(msg: &QueuedMessage) -> Self {
        Self {
            status: msg.status,
            retry_count: msg.retry_count,
            delayed_to: msg.delayed_to,
            processed: msg.processed,
        }
    }

    pub fn completed(msg: &QueuedMessage) -> Self {
        Self {
            status: MessageStatus::Completed,
            retry_count: msg.retry_count,
            delayed_to: None,
            processed: true,
        }
    }
}

/// Current wall clock as epoch milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
