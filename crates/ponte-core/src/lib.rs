pub mod body;
pub mod bus;
pub mod container;
pub mod error;
pub mod exchange;
pub mod message;
pub mod orchestration;
pub mod queue;
pub mod telemetry;
pub mod trace;
pub mod tx;

pub use body::{InMemoryBodyStore, MessageBodyProvider};
pub use bus::{
    BusConfig, BusEvent, ErrorDetail, HandlerContext, HandlerRegistry, MessageBus,
    MessageHandler, MessageHandlerResult, MessageQueue, PublishOptions, QueueEvent,
    QueueEventKind, RequestMessage, SendResponse, TypedMessageHandler,
};
pub use error::{
    ConfigError, ContainerError, ContainerResult, EnqueueError, HandlerFailure, PeekError,
    PublishError, RemoveError, UpdateError,
};
pub use exchange::{Binding, Exchange, ExchangeType, HeadersMatch};
pub use message::{MessageMetadataUpdate, MessageStatus, QueuedMessage};
pub use orchestration::{
    InMemoryOrchestrationStore, OrchestrationDefinition, OrchestrationEngine,
    OrchestrationEvent, OrchestrationEventSink, OrchestrationEventStore, OrchestrationInstance,
    OrchestrationStatus,
};
pub use queue::{ErrorHandling, QueueConfig, QueueStatus, QueueType};
pub use trace::TraceInfo;
pub use tx::TransactionController;
