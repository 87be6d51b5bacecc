mod helpers;

use helpers::*;
use std::sync::Arc;

use ponte_core::{
    HandlerRegistry, InMemoryBodyStore, PublishOptions, QueueConfig, TraceInfo,
};

fn sync_bus() -> (Arc<ponte_core::MessageBus>, Arc<InMemoryBodyStore>) {
    let registry = HandlerRegistry::new();
    registry.register::<PlaceOrder, _>(AcceptingHandler);

    let mut queue = QueueConfig::new("orders");
    queue.is_synchronous = true;

    let body = Arc::new(InMemoryBodyStore::new());
    let bus = ponte_core::MessageBus::new(
        commands_bus_config(queue),
        registry,
        Some(Arc::clone(&body) as Arc<dyn ponte_core::MessageBodyProvider>),
    )
    .unwrap();
    (bus, body)
}

/// Push-synchronous request/response: the caller gets the typed reply and
/// the reply is persisted through the body provider.
#[tokio::test]
async fn synchronous_send_returns_the_typed_reply() {
    let (bus, body) = sync_bus();

    let trace = TraceInfo::root("e2e");
    let response: ponte_core::SendResponse<OrderAccepted> = bus
        .send_for_reply(
            &PlaceOrder {
                sku: "sku-9".to_string(),
                quantity: 3,
            },
            PublishOptions::to_exchange("commands").with_routing_key("place"),
            &trace,
        )
        .await
        .unwrap();

    assert_eq!(response.response.sku, "sku-9");
    assert_eq!(
        bus.queue("orders").unwrap().count().await.unwrap(),
        0,
        "completed synchronously"
    );
    assert!(
        body.reply_for(response.message_id).is_some(),
        "reply persisted via the body provider"
    );

    bus.dispose().await;
}

/// The body provider persists payloads and the runtime reconstitutes them
/// before the handler runs.
#[tokio::test]
async fn persisted_bodies_are_reconstituted_for_the_handler() {
    let (bus, body) = sync_bus();

    let trace = TraceInfo::root("e2e");
    let response: ponte_core::SendResponse<OrderAccepted> = bus
        .send_for_reply(
            &PlaceOrder {
                sku: "persisted".to_string(),
                quantity: 1,
            },
            PublishOptions::to_exchange("commands").with_routing_key("place"),
            &trace,
        )
        .await
        .unwrap();

    // The handler decoded the payload (it echoed the sku), which proves the
    // body came back from the provider.
    assert_eq!(response.response.sku, "persisted");
    assert_eq!(body.body_count(), 1);

    bus.dispose().await;
}

/// `disable_persistence` keeps the payload inline and out of the provider.
#[tokio::test]
async fn disabled_persistence_skips_the_provider() {
    let (bus, body) = sync_bus();

    let trace = TraceInfo::root("e2e");
    let mut options = PublishOptions::to_exchange("commands").with_routing_key("place");
    options.disable_persistence = true;
    let response: ponte_core::SendResponse<OrderAccepted> = bus
        .send_for_reply(
            &PlaceOrder {
                sku: "inline".to_string(),
                quantity: 1,
            },
            options,
            &trace,
        )
        .await
        .unwrap();

    assert_eq!(response.response.sku, "inline");
    assert_eq!(body.body_count(), 0, "provider bypassed");

    bus.dispose().await;
}

/// A failing synchronous handler surfaces its client message to the caller
/// and rolls the enqueue back.
#[tokio::test]
async fn synchronous_handler_error_surfaces_the_client_message() {
    let (registry, _handler) = scripted_registry(vec![
        ponte_core::MessageHandlerResult::Error(
            ponte_core::ErrorDetail::new("inventory offline")
                .with_client_message("Order service unavailable")
                .with_rollback(),
        ),
    ]);
    let mut queue = QueueConfig::new("orders");
    queue.is_synchronous = true;
    let bus = ponte_core::MessageBus::new(commands_bus_config(queue), registry, None).unwrap();

    let err = bus
        .send(
            &PlaceOrder {
                sku: "a".to_string(),
                quantity: 1,
            },
            PublishOptions::to_exchange("commands").with_routing_key("place"),
            &TraceInfo::root("e2e"),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(&err, ponte_core::PublishError::Handler(msg) if msg == "Order service unavailable")
    );
    assert_eq!(
        bus.queue("orders").unwrap().count().await.unwrap(),
        0,
        "rolled back"
    );

    bus.dispose().await;
}
