pub mod config;
pub mod events;
pub mod handler;
pub mod metrics;
mod pipeline;
pub mod registry;
mod runtime;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::body::MessageBodyProvider;
use crate::error::{ConfigError, PublishError};
use crate::exchange::Exchange;
use crate::message::{now_ms, MessageStatus, QueuedMessage};
use crate::queue::{ErrorHandling, QueueStatus};
use crate::trace::TraceInfo;
use crate::tx::TransactionController;

pub use config::BusConfig;
pub use events::{BusEvent, QueueErrorEvent, QueueEvent, QueueEventKind};
pub use handler::{
    ErrorDetail, HandlerContext, MessageHandler, MessageHandlerResult, RequestMessage,
    SendResponse, TypedMessageHandler,
};
pub use metrics::BusMetrics;
pub use registry::HandlerRegistry;
pub use runtime::{HandlerOutcome, MessageQueue, QueueRuntimeContext};

/// Per-call publication options. Everything not set falls back to the bus
/// or queue defaults.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub exchange_name: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub disable_persistence: bool,
    pub session_id: Option<Uuid>,
    pub routing_key: Option<String>,
    /// Force background dispatch even on a push-synchronous queue.
    pub is_asynchronous_invocation: bool,
    pub error_handling: Option<ErrorHandling>,
    pub headers: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub time_to_live_ms: Option<u64>,
    pub is_compress_content: bool,
    pub is_encrypt_content: bool,
    pub priority: i32,
    pub disable_fault_queue: bool,
    /// Fail the send when no handler is registered for the message type.
    pub throw_no_handler_exception: bool,
}

impl PublishOptions {
    pub fn to_exchange(exchange_name: impl Into<String>) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            content_type: "application/json".to_string(),
            content_encoding: None,
            disable_persistence: false,
            session_id: None,
            routing_key: None,
            is_asynchronous_invocation: false,
            error_handling: None,
            headers: HashMap::new(),
            timeout_ms: None,
            time_to_live_ms: None,
            is_compress_content: false,
            is_encrypt_content: false,
            priority: 0,
            disable_fault_queue: false,
            throw_no_handler_exception: false,
        }
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// The in-process service bus: owns the exchanges and queues, routes
/// publications, and drives push dispatch.
pub struct MessageBus {
    config: BusConfig,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Arc<MessageQueue>>,
    registry: Arc<HandlerRegistry>,
    runtime: QueueRuntimeContext,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus").finish_non_exhaustive()
    }
}

impl MessageBus {
    /// Build and start the bus. Fails only on configuration validation.
    /// Must be called within a Tokio runtime: the per-queue dispatch loops
    /// are spawned here.
    pub fn new(
        config: BusConfig,
        registry: HandlerRegistry,
        body: Option<Arc<dyn MessageBodyProvider>>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        if registry.is_empty() {
            return Err(ConfigError::EmptyHandlerSet);
        }

        let registry = Arc::new(registry);
        let runtime = QueueRuntimeContext {
            registry: Arc::clone(&registry),
            body,
            events: events::EventPublisher::new(config.event_channel_capacity),
            metrics: Arc::new(BusMetrics::new()),
            default_client_error_message: config.default_client_error_message.clone(),
            default_error_handling: config.error_handling,
            cancel: tokio_util::sync::CancellationToken::new(),
        };

        // Fault queues first so every other queue can route expiries to the
        // designated one.
        let mut queues: HashMap<String, Arc<MessageQueue>> = HashMap::new();
        for queue_config in config.queues.iter().filter(|q| q.is_fault_queue) {
            let queue = MessageQueue::new(queue_config.clone(), runtime.clone(), None);
            queues.insert(queue_config.name.clone(), queue);
        }
        let fault = config
            .fault_queue_name()
            .and_then(|name| queues.get(name).cloned());
        for queue_config in config.queues.iter().filter(|q| !q.is_fault_queue) {
            let queue =
                MessageQueue::new(queue_config.clone(), runtime.clone(), fault.clone());
            queues.insert(queue_config.name.clone(), queue);
        }

        let exchanges = config
            .exchanges
            .iter()
            .map(|e| (e.name.clone(), e.clone()))
            .collect();

        let bus = Arc::new(Self {
            exchanges,
            queues,
            registry,
            runtime,
            tasks: parking_lot::Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            config,
        });

        // One background dispatch task per push-asynchronous queue.
        let mut tasks = bus.tasks.lock();
        for queue in bus.queues.values() {
            let config = queue.config();
            if !config.is_pull && !config.is_synchronous {
                tasks.push(tokio::spawn(Arc::clone(queue).run_dispatch_loop()));
            }
        }
        drop(tasks);

        info!(bus = %bus.config.bus_name, queues = bus.queues.len(), "bus started");
        Ok(bus)
    }

    pub fn queue(&self, name: &str) -> Option<Arc<MessageQueue>> {
        self.queues.get(name).cloned()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<BusEvent> {
        self.runtime.events.subscribe()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Send a request message. Returns the message id.
    #[tracing::instrument(skip_all, fields(message_type = M::MESSAGE_TYPE))]
    pub async fn send<M: RequestMessage>(
        &self,
        message: &M,
        options: PublishOptions,
        trace: &TraceInfo,
    ) -> Result<Uuid, PublishError> {
        let (id, _reply) = self
            .dispatch(M::MESSAGE_TYPE, message, options, trace, true)
            .await?;
        Ok(id)
    }

    /// Send a request message and decode the typed response produced by a
    /// push-synchronous handler.
    #[tracing::instrument(skip_all, fields(message_type = M::MESSAGE_TYPE))]
    pub async fn send_for_reply<M, R>(
        &self,
        message: &M,
        options: PublishOptions,
        trace: &TraceInfo,
    ) -> Result<SendResponse<R>, PublishError>
    where
        M: RequestMessage,
        R: DeserializeOwned,
    {
        let (id, reply) = self
            .dispatch(M::MESSAGE_TYPE, message, options, trace, true)
            .await?;
        let bytes = reply.ok_or_else(|| {
            PublishError::ReplyDecode("handler produced no reply".to_string())
        })?;
        let response = serde_json::from_slice(&bytes)
            .map_err(|e| PublishError::ReplyDecode(e.to_string()))?;
        Ok(SendResponse {
            message_id: id,
            response,
        })
    }

    /// Publish an event: fan-out to every bound queue, zero targets is fine.
    #[tracing::instrument(skip_all, fields(message_type = M::MESSAGE_TYPE))]
    pub async fn publish<M: RequestMessage>(
        &self,
        message: &M,
        options: PublishOptions,
        trace: &TraceInfo,
    ) -> Result<Uuid, PublishError> {
        let (id, _reply) = self
            .dispatch(M::MESSAGE_TYPE, message, options, trace, false)
            .await?;
        Ok(id)
    }

    async fn dispatch<M: Serialize>(
        &self,
        message_type: &str,
        message: &M,
        options: PublishOptions,
        trace: &TraceInfo,
        require_route: bool,
    ) -> Result<(Uuid, Option<Vec<u8>>), PublishError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PublishError::BusDisposed);
        }
        if options.throw_no_handler_exception && !self.registry.contains(message_type) {
            return Err(PublishError::NoHandler(message_type.to_string()));
        }

        let exchange = self
            .exchanges
            .get(&options.exchange_name)
            .ok_or_else(|| PublishError::ExchangeNotFound(options.exchange_name.clone()))?;

        // Visit targets once per distinct queue id, in binding order.
        let mut seen = HashSet::new();
        let targets: Vec<Arc<MessageQueue>> = exchange
            .resolve(options.routing_key.as_deref(), &options.headers)
            .into_iter()
            .filter_map(|name| self.queues.get(name))
            .filter(|queue| seen.insert(queue.id()))
            .cloned()
            .collect();

        if targets.is_empty() {
            if require_route {
                return Err(PublishError::NoRoute {
                    exchange: exchange.name.clone(),
                    routing_key: options.routing_key.clone(),
                });
            }
            debug!(exchange = %exchange.name, "publication matched no bindings");
            return Ok((QueuedMessage::new_id(), None));
        }

        let payload = serde_json::to_vec(message)
            .map_err(|e| PublishError::PayloadEncode(e.to_string()))?;
        let base = self.build_message(message_type, payload, &options, trace);

        let tx = Arc::new(TransactionController::new());
        let mut reply = None;

        let persist = self.runtime.body.as_ref().is_some_and(|provider| {
            provider.allow_message_persistence(options.disable_persistence, &base)
        });

        let outcome: Result<(), PublishError> = async {
            let copies: Vec<QueuedMessage> = targets
                .iter()
                .map(|queue| {
                    let mut copy = base.clone();
                    copy.queue_name = queue.name().to_string();
                    copy.has_self_content = !persist;
                    copy
                })
                .collect();

            if persist {
                let provider = self.runtime.body.as_ref().expect("checked above");
                provider
                    .save_to_storage(&copies, &base.payload, trace, &tx)
                    .await
                    .map_err(crate::error::EnqueueError::from)?;
            }

            for (queue, mut copy) in targets.iter().zip(copies) {
                if !persist {
                    copy.payload = base.payload.clone();
                } else {
                    copy.payload = Vec::new();
                }
                let outcome = queue
                    .enqueue(copy, trace, &tx, options.is_asynchronous_invocation)
                    .await?;
                if let Some(outcome) = outcome {
                    match &outcome.result {
                        MessageHandlerResult::Completed { reply: r } => {
                            if reply.is_none() {
                                reply = r.clone();
                            }
                        }
                        MessageHandlerResult::Error(detail) => {
                            return Err(PublishError::Handler(
                                detail
                                    .client_message
                                    .clone()
                                    .unwrap_or_else(|| detail.detail.clone()),
                            ));
                        }
                        _ => {}
                    }
                }
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => {
                if let (Some(provider), Some(bytes)) = (&self.runtime.body, &reply) {
                    provider
                        .save_reply_to_storage(base.id, bytes, trace, &tx)
                        .await
                        .map_err(crate::error::EnqueueError::from)?;
                }
                tx.schedule_commit();
                tx.complete();
                Ok((base.id, reply))
            }
            Err(err) => {
                tx.schedule_rollback(Some(err.to_string()));
                tx.complete();
                Err(err)
            }
        }
    }

    fn build_message(
        &self,
        message_type: &str,
        payload: Vec<u8>,
        options: &PublishOptions,
        trace: &TraceInfo,
    ) -> QueuedMessage {
        let now = now_ms();
        QueuedMessage {
            id: QueuedMessage::new_id(),
            parent_id: trace.parent_frame_id,
            session_id: options.session_id,
            publisher_id: self.config.host_info.clone(),
            published_at: now,
            time_to_live: options.time_to_live_ms.map(|ttl| now + ttl),
            delayed_to: None,
            content_type: options.content_type.clone(),
            content_encoding: options.content_encoding.clone(),
            is_compressed: options.is_compress_content,
            is_encrypted: options.is_encrypt_content,
            contains_content: !payload.is_empty(),
            has_self_content: true,
            disable_persistence: options.disable_persistence,
            priority: options.priority,
            headers: options.headers.clone(),
            routing_key: options.routing_key.clone(),
            timeout_ms: options.timeout_ms,
            retry_count: 0,
            error_handling: options.error_handling,
            status: MessageStatus::Created,
            processed: false,
            source_exchange: options.exchange_name.clone(),
            queue_name: String::new(),
            disable_fault_queue: options.disable_fault_queue,
            message_type: message_type.to_string(),
            payload,
        }
    }

    /// Tear down every queue and stop the dispatch tasks.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(bus = %self.config.bus_name, "disposing bus");
        self.runtime.cancel.cancel();
        for queue in self.queues.values() {
            queue.dispose();
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Resume a suspended queue by name. Returns whether the queue exists.
    pub fn resume_queue(&self, name: &str) -> bool {
        match self.queues.get(name) {
            Some(queue) => {
                queue.resume();
                queue.signal();
                true
            }
            None => false,
        }
    }

    /// Current status of a queue by name.
    pub fn queue_status(&self, name: &str) -> Option<QueueStatus> {
        self.queues.get(name).map(|q| q.status())
    }
}
