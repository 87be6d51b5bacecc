use uuid::Uuid;

/// Low-level container and provider errors (body store, serialization).
/// This is the error type shared by the `QueueContainer` and
/// `MessageBodyProvider` traits — infrastructure failures only, never
/// domain outcomes.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("message not found: {0}")]
    MessageNotFound(Uuid),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("body store error: {0}")]
    BodyStore(String),
}

impl From<serde_json::Error> for ContainerError {
    fn from(err: serde_json::Error) -> Self {
        ContainerError::Serialization(err.to_string())
    }
}

// --- Per-operation error types ---

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("queue disposed: {0}")]
    QueueDisposed(String),

    #[error("queue terminated: {0}")]
    QueueTerminated(String),

    #[error("queue full: {queue} (max {max})")]
    QueueFull { queue: String, max: usize },

    #[error(transparent)]
    Container(#[from] ContainerError),
}

#[derive(Debug, thiserror::Error)]
pub enum PeekError {
    #[error("queue disposed: {0}")]
    QueueDisposed(String),

    #[error("queue invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Container(#[from] ContainerError),
}

#[derive(Debug, thiserror::Error)]
pub enum RemoveError {
    #[error("queue disposed: {0}")]
    QueueDisposed(String),

    #[error("message not found: {0}")]
    MessageNotFound(Uuid),

    #[error(transparent)]
    Container(#[from] ContainerError),
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("queue disposed: {0}")]
    QueueDisposed(String),

    #[error("message not found: {0}")]
    MessageNotFound(Uuid),

    #[error(transparent)]
    Container(#[from] ContainerError),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("bus disposed")]
    BusDisposed,

    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    #[error("no route from exchange {exchange} for routing key {routing_key:?}")]
    NoRoute {
        exchange: String,
        routing_key: Option<String>,
    },

    #[error("no handler registered for message type: {0}")]
    NoHandler(String),

    #[error("payload encode error: {0}")]
    PayloadEncode(String),

    #[error("reply decode error: {0}")]
    ReplyDecode(String),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

/// Construction-time validation failures — the only fatal error path.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("bus name must not be empty")]
    EmptyBusName,

    #[error("default client error message must not be empty")]
    EmptyClientErrorMessage,

    #[error("no message handlers registered")]
    EmptyHandlerSet,

    #[error("exchange {exchange} bound to unknown queue {queue}")]
    UnknownBindingTarget { exchange: String, queue: String },

    #[error("duplicate queue name: {0}")]
    DuplicateQueue(String),

    #[error("duplicate exchange name: {0}")]
    DuplicateExchange(String),
}

/// Failure raised by a handler invocation before a result could be produced.
/// The interceptor converts these into error results; they never cross the
/// handler boundary as errors.
#[derive(Debug, thiserror::Error)]
pub enum HandlerFailure {
    #[error("payload decode error: {0}")]
    Decode(String),

    #[error("handler error: {0}")]
    Failed(String),

    #[error("no handler registered for message type: {0}")]
    NoHandler(String),
}

pub type ContainerResult<T> = std::result::Result<T, ContainerError>;
