use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::HandlerFailure;
use crate::message::QueuedMessage;
use crate::trace::TraceInfo;
use crate::tx::TransactionController;

/// Error carried inside a handler result. `client_message` is the public
/// text; `detail` is diagnostic. The interceptor fills the blanks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub client_message: Option<String>,
    pub detail: String,
    pub id_command_query: Option<Uuid>,
    /// The enclosing transaction must be rolled back.
    pub rollback: bool,
}

impl ErrorDetail {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            client_message: None,
            detail: detail.into(),
            id_command_query: None,
            rollback: false,
        }
    }

    pub fn with_rollback(mut self) -> Self {
        self.rollback = true;
        self
    }

    pub fn with_client_message(mut self, message: impl Into<String>) -> Self {
        self.client_message = Some(message.into());
        self
    }
}

/// Outcome of one handler attempt. The variants are mutually exclusive by
/// construction; the queue runtime maps them onto a metadata update.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageHandlerResult {
    /// Done; the message is removed on commit. `reply` carries the encoded
    /// response for request/response sends.
    Completed { reply: Option<Vec<u8>> },
    /// Put the message back for a later attempt at `now + retry_interval_ms`
    /// without counting a retry.
    Deferred { retry_interval_ms: u64 },
    /// Retryable failure; the queue consults the message's (or queue's)
    /// retry policy. The optional interval overrides the policy's backoff.
    Retry { interval_override_ms: Option<u64> },
    Suspended,
    Aborted,
    /// Non-retryable failure captured by the interceptor; the message keeps
    /// its prior status.
    Error(ErrorDetail),
}

impl MessageHandlerResult {
    pub fn completed() -> Self {
        Self::Completed { reply: None }
    }

    pub fn completed_with_reply(reply: impl Serialize) -> Result<Self, HandlerFailure> {
        let bytes =
            serde_json::to_vec(&reply).map_err(|e| HandlerFailure::Failed(e.to_string()))?;
        Ok(Self::Completed { reply: Some(bytes) })
    }

    pub fn retry() -> Self {
        Self::Retry {
            interval_override_ms: None,
        }
    }

    pub fn error(detail: ErrorDetail) -> Self {
        Self::Error(detail)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Whether this result demands a transaction rollback.
    pub fn has_rollback_error(&self) -> bool {
        matches!(self, Self::Error(detail) if detail.rollback)
    }

    /// Short label for events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Deferred { .. } => "deferred",
            Self::Retry { .. } => "retry",
            Self::Suspended => "suspended",
            Self::Aborted => "aborted",
            Self::Error(_) => "error",
        }
    }
}

/// Per-invocation handler context. A fresh value per delivery, never pooled.
#[derive(Clone)]
pub struct HandlerContext {
    pub message_id: Uuid,
    pub parent_message_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub queue_name: String,
    pub headers: HashMap<String, String>,
    pub retry_count: u32,
    pub trace: TraceInfo,
    pub tx: Arc<TransactionController>,
}

impl HandlerContext {
    pub fn for_message(
        msg: &QueuedMessage,
        trace: TraceInfo,
        tx: Arc<TransactionController>,
    ) -> Self {
        Self {
            message_id: msg.id,
            parent_message_id: msg.parent_id,
            session_id: msg.session_id,
            queue_name: msg.queue_name.clone(),
            headers: msg.headers.clone(),
            retry_count: msg.retry_count,
            trace,
            tx,
        }
    }
}

/// Type-erased handler invoked by the queue runtime.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        msg: &QueuedMessage,
        ctx: &HandlerContext,
    ) -> Result<MessageHandlerResult, HandlerFailure>;
}

/// A request message with a stable dispatch key.
pub trait RequestMessage: Serialize + DeserializeOwned + Send + 'static {
    const MESSAGE_TYPE: &'static str;
}

/// Typed handler for one request-message type.
#[async_trait]
pub trait TypedMessageHandler<M: RequestMessage>: Send + Sync + 'static {
    async fn handle(
        &self,
        message: M,
        ctx: &HandlerContext,
    ) -> Result<MessageHandlerResult, HandlerFailure>;
}

/// Adapter erasing a typed handler: decodes the payload, then delegates.
pub(crate) struct TypedHandler<M, H> {
    handler: H,
    _marker: PhantomData<fn(M)>,
}

impl<M, H> TypedHandler<M, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> MessageHandler for TypedHandler<M, H>
where
    M: RequestMessage,
    H: TypedMessageHandler<M>,
{
    async fn handle(
        &self,
        msg: &QueuedMessage,
        ctx: &HandlerContext,
    ) -> Result<MessageHandlerResult, HandlerFailure> {
        let message: M = serde_json::from_slice(&msg.payload)
            .map_err(|e| HandlerFailure::Decode(e.to_string()))?;
        self.handler.handle(message, ctx).await
    }
}

/// Typed response returned by `MessageBus::send_for_reply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResponse<T> {
    pub message_id: Uuid,
    pub response: T,
}
