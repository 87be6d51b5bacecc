use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::bus::{HandlerContext, MessageHandler, MessageHandlerResult};
use crate::error::{ContainerResult, HandlerFailure};
use crate::message::QueuedMessage;
use crate::trace::TraceInfo;
use crate::tx::TransactionController;

/// Index of a step within its definition's arena.
pub type StepId = usize;

/// One step of a workflow. Successors are arena indices, so a definition
/// never owns cyclic references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestrationStep {
    pub id: StepId,
    pub name: String,
    pub next: Vec<StepId>,
}

/// A workflow shape: named steps addressed by index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OrchestrationDefinition {
    pub name: String,
    pub steps: Vec<OrchestrationStep>,
}

impl OrchestrationDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step and return its id.
    pub fn add_step(&mut self, name: impl Into<String>) -> StepId {
        let id = self.steps.len();
        self.steps.push(OrchestrationStep {
            id,
            name: name.into(),
            next: Vec::new(),
        });
        id
    }

    pub fn link(&mut self, from: StepId, to: StepId) {
        if let Some(step) = self.steps.get_mut(from) {
            step.next.push(to);
        }
    }

    pub fn step(&self, id: StepId) -> Option<&OrchestrationStep> {
        self.steps.get(id)
    }
}

/// Event driving a long-running workflow forward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationEvent {
    pub event_id: Uuid,
    /// Groups every event of one workflow instance family.
    pub orchestration_key: String,
    /// Stamped by the sink with the id of the queued message that carried
    /// the event.
    pub message_id: Option<Uuid>,
    pub step_id: Option<StepId>,
    pub payload: serde_json::Value,
}

impl OrchestrationEvent {
    pub const MESSAGE_TYPE: &'static str = "ponte.orchestration.event";

    pub fn new(orchestration_key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            orchestration_key: orchestration_key.into(),
            message_id: None,
            step_id: None,
            payload,
        }
    }
}

impl crate::bus::RequestMessage for OrchestrationEvent {
    const MESSAGE_TYPE: &'static str = OrchestrationEvent::MESSAGE_TYPE;
}

/// Lifecycle of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestrationStatus {
    Running,
    Executing,
    Completed,
    Failed,
}

/// Persistence contract for orchestration events, scoped to what the queue
/// consumes. `save_new_event` must be idempotent per event id.
#[async_trait]
pub trait OrchestrationEventStore: Send + Sync {
    /// Persist a new event within the current transaction. Returns `false`
    /// when the event id was already stored (duplicate delivery).
    async fn save_new_event(
        &self,
        event: &OrchestrationEvent,
        trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<bool>;

    /// All stored events for an orchestration key, in arrival order.
    async fn events_for_key(&self, key: &str) -> ContainerResult<Vec<OrchestrationEvent>>;
}

/// HashMap-backed event store used by tests and as the default wiring.
pub struct InMemoryOrchestrationStore {
    events: Arc<Mutex<Vec<OrchestrationEvent>>>,
    by_id: Arc<Mutex<HashMap<Uuid, usize>>>,
}

impl InMemoryOrchestrationStore {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            by_id: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for InMemoryOrchestrationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrchestrationEventStore for InMemoryOrchestrationStore {
    async fn save_new_event(
        &self,
        event: &OrchestrationEvent,
        _trace: &TraceInfo,
        tx: &TransactionController,
    ) -> ContainerResult<bool> {
        {
            let mut by_id = self.by_id.lock();
            if by_id.contains_key(&event.event_id) {
                return Ok(false);
            }
            let mut events = self.events.lock();
            by_id.insert(event.event_id, events.len());
            events.push(event.clone());
        }

        let events = Arc::clone(&self.events);
        let by_id = Arc::clone(&self.by_id);
        let event_id = event.event_id;
        tx.enroll_rollback(move || {
            let mut by_id = by_id.lock();
            if let Some(index) = by_id.remove(&event_id) {
                let mut events = events.lock();
                if index < events.len() {
                    events.remove(index);
                    // Re-index everything behind the removed slot.
                    for value in by_id.values_mut() {
                        if *value > index {
                            *value -= 1;
                        }
                    }
                }
            }
        });
        Ok(true)
    }

    async fn events_for_key(&self, key: &str) -> ContainerResult<Vec<OrchestrationEvent>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.orchestration_key == key)
            .cloned()
            .collect())
    }
}

/// A live workflow instance: resumable by signal.
pub struct OrchestrationInstance {
    pub instance_id: Uuid,
    pub orchestration_key: String,
    pub definition: OrchestrationDefinition,
    status: Mutex<OrchestrationStatus>,
    wake: Notify,
}

impl OrchestrationInstance {
    pub fn new(
        orchestration_key: impl Into<String>,
        definition: OrchestrationDefinition,
    ) -> Arc<Self> {
        Arc::new(Self {
            instance_id: Uuid::now_v7(),
            orchestration_key: orchestration_key.into(),
            definition,
            status: Mutex::new(OrchestrationStatus::Running),
            wake: Notify::new(),
        })
    }

    pub fn status(&self) -> OrchestrationStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: OrchestrationStatus) {
        *self.status.lock() = status;
    }

    /// Signal the instance's worker to resume.
    pub fn start_worker(&self) {
        self.wake.notify_one();
    }

    /// Await the next resume signal (used by workflow workers).
    pub async fn resumed(&self) {
        self.wake.notified().await;
    }
}

/// Registry of live instances plus the push-sync handler the queue invokes
/// for orchestration events.
pub struct OrchestrationEngine {
    store: Arc<dyn OrchestrationEventStore>,
    instances: DashMap<String, Vec<Arc<OrchestrationInstance>>>,
}

impl OrchestrationEngine {
    pub fn new(store: Arc<dyn OrchestrationEventStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            instances: DashMap::new(),
        })
    }

    pub fn register_instance(&self, instance: Arc<OrchestrationInstance>) {
        self.instances
            .entry(instance.orchestration_key.clone())
            .or_default()
            .push(instance);
    }

    pub fn instances_for_key(&self, key: &str) -> Vec<Arc<OrchestrationInstance>> {
        self.instances
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn store(&self) -> &dyn OrchestrationEventStore {
        self.store.as_ref()
    }
}

/// The queue-facing sink: stamps, persists, and wakes. Registered as the
/// handler for `OrchestrationEvent` on a push-synchronous queue.
pub struct OrchestrationEventSink {
    engine: Arc<OrchestrationEngine>,
}

impl OrchestrationEventSink {
    pub fn new(engine: Arc<OrchestrationEngine>) -> Arc<Self> {
        Arc::new(Self { engine })
    }
}

#[async_trait]
impl MessageHandler for OrchestrationEventSink {
    async fn handle(
        &self,
        msg: &QueuedMessage,
        ctx: &HandlerContext,
    ) -> Result<MessageHandlerResult, HandlerFailure> {
        let mut event: OrchestrationEvent = serde_json::from_slice(&msg.payload)
            .map_err(|e| HandlerFailure::Decode(e.to_string()))?;
        event.message_id = Some(msg.id);

        let saved = self
            .engine
            .store
            .save_new_event(&event, &ctx.trace, &ctx.tx)
            .await
            .map_err(|e| HandlerFailure::Failed(e.to_string()))?;
        if !saved {
            debug!(
                event_id = %event.event_id,
                orchestration_key = %event.orchestration_key,
                "duplicate orchestration event ignored"
            );
            return Ok(MessageHandlerResult::completed());
        }

        for instance in self.engine.instances_for_key(&event.orchestration_key) {
            if matches!(
                instance.status(),
                OrchestrationStatus::Running | OrchestrationStatus::Executing
            ) {
                instance.start_worker();
            }
        }
        Ok(MessageHandlerResult::completed())
    }
}
