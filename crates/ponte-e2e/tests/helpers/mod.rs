#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ponte_core::bus::{
    HandlerContext, MessageHandler, MessageHandlerResult, RequestMessage, TypedMessageHandler,
};
use ponte_core::error::HandlerFailure;
use ponte_core::message::{now_ms, MessageStatus, QueuedMessage};
use ponte_core::{BusConfig, HandlerRegistry, MessageBus, QueueConfig};

/// Standard request message used across the scenarios.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaceOrder {
    pub sku: String,
    pub quantity: u32,
}

impl RequestMessage for PlaceOrder {
    const MESSAGE_TYPE: &'static str = "e2e.orders.place";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderAccepted {
    pub sku: String,
    pub order_id: Uuid,
}

/// Handler that acknowledges every order with a typed reply.
pub struct AcceptingHandler;

#[async_trait]
impl TypedMessageHandler<PlaceOrder> for AcceptingHandler {
    async fn handle(
        &self,
        message: PlaceOrder,
        ctx: &HandlerContext,
    ) -> Result<MessageHandlerResult, HandlerFailure> {
        MessageHandlerResult::completed_with_reply(OrderAccepted {
            sku: message.sku,
            order_id: ctx.message_id,
        })
    }
}

/// One recorded delivery attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub message_id: Uuid,
    pub retry_count: u32,
    pub at_ms: u64,
}

/// Handler replaying a scripted result sequence and recording each attempt.
/// Falls back to `Completed` when the script runs out.
pub struct ScriptedHandler {
    script: Mutex<Vec<MessageHandlerResult>>,
    pub attempts: Mutex<Vec<Attempt>>,
    pub invocations: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(script: Vec<MessageHandlerResult>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            attempts: Mutex::new(Vec::new()),
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn completed() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(
        &self,
        msg: &QueuedMessage,
        _ctx: &HandlerContext,
    ) -> Result<MessageHandlerResult, HandlerFailure> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().unwrap().push(Attempt {
            message_id: msg.id,
            retry_count: msg.retry_count,
            at_ms: now_ms(),
        });
        let mut script = self.script.lock().unwrap();
        Ok(if script.is_empty() {
            MessageHandlerResult::completed()
        } else {
            script.remove(0)
        })
    }
}

/// A registry with a scripted handler installed for `PlaceOrder`.
pub fn scripted_registry(
    script: Vec<MessageHandlerResult>,
) -> (HandlerRegistry, Arc<ScriptedHandler>) {
    let registry = HandlerRegistry::new();
    let handler = ScriptedHandler::new(script);
    registry.register_dyn(
        PlaceOrder::MESSAGE_TYPE,
        Arc::clone(&handler) as Arc<dyn MessageHandler>,
    );
    (registry, handler)
}

/// Bus config with one direct exchange `commands` routing `place` to the
/// given queue, plus a pull fault queue `faults`.
pub fn commands_bus_config(queue: QueueConfig) -> BusConfig {
    let mut faults = QueueConfig::new("faults");
    faults.is_pull = true;
    faults.is_fault_queue = true;

    let queue_name = queue.name.clone();
    BusConfig::new("e2e-bus")
        .add_queue(queue)
        .add_queue(faults)
        .add_exchange(
            ponte_core::Exchange::new("commands", ponte_core::ExchangeType::Direct)
                .bind(queue_name, "place"),
        )
}

/// Hand-built queued message for tests that need full metadata control.
pub fn raw_message(queue: &str, payload: &impl Serialize) -> QueuedMessage {
    QueuedMessage {
        id: QueuedMessage::new_id(),
        parent_id: None,
        session_id: None,
        publisher_id: "e2e".to_string(),
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
        message_type: PlaceOrder::MESSAGE_TYPE.to_string(),
        payload: serde_json::to_vec(payload).unwrap(),
    }
}

const WAIT_DEADLINE: Duration = Duration::from_secs(5);
const WAIT_TICK: Duration = Duration::from_millis(10);

/// Poll until the handler has seen at least `at_least` invocations.
pub async fn wait_for_invocations(handler: &ScriptedHandler, at_least: usize) {
    tokio::time::timeout(WAIT_DEADLINE, async {
        while handler.invocation_count() < at_least {
            tokio::time::sleep(WAIT_TICK).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for {at_least} invocations (saw {})",
            handler.invocation_count()
        )
    });
}

/// Poll until the queue holds exactly `expected` messages.
pub async fn wait_for_count(queue: &ponte_core::bus::MessageQueue, expected: usize) {
    tokio::time::timeout(WAIT_DEADLINE, async {
        while queue.count().await.unwrap() != expected {
            tokio::time::sleep(WAIT_TICK).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for queue depth {expected}"));
}

/// Poll until the queue is empty.
pub async fn wait_for_drained(queue: &ponte_core::bus::MessageQueue) {
    wait_for_count(queue, 0).await;
}

/// Poll until a queue reports the given status.
pub async fn wait_for_status(
    bus: &MessageBus,
    queue: &str,
    status: ponte_core::QueueStatus,
) {
    tokio::time::timeout(WAIT_DEADLINE, async {
        while bus.queue_status(queue) != Some(status) {
            tokio::time::sleep(WAIT_TICK).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {queue} to become {status:?}"));
}

/// Enqueue a raw message onto a named queue in its own committed scope.
pub async fn enqueue_raw(bus: &MessageBus, queue: &str, msg: QueuedMessage) {
    let queue = bus.queue(queue).expect("queue exists");
    let trace = ponte_core::TraceInfo::root("e2e.enqueue");
    let tx = Arc::new(ponte_core::TransactionController::new());
    queue
        .enqueue(msg, &trace, &tx, true)
        .await
        .expect("enqueue succeeds");
    tx.schedule_commit();
    tx.complete();
    queue.signal();
}
