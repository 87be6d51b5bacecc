mod helpers;

use helpers::*;
use ponte_core::bus::QueueEventKind;
use ponte_core::{BusEvent, PublishOptions, QueueConfig, TraceInfo};

/// FIFO happy path: two messages pushed asynchronously, both completed and
/// removed, with the full event sequence per message.
#[tokio::test]
async fn fifo_happy_path_completes_both_messages() {
    let (registry, handler) = scripted_registry(Vec::new());
    let bus = ponte_core::MessageBus::new(
        commands_bus_config(QueueConfig::new("orders")),
        registry,
        None,
    )
    .unwrap();
    let mut events = bus.subscribe_events();

    let trace = TraceInfo::root("e2e");
    let options = || PublishOptions::to_exchange("commands").with_routing_key("place");
    let id1 = bus
        .send(
            &PlaceOrder {
                sku: "a".to_string(),
                quantity: 1,
            },
            options(),
            &trace,
        )
        .await
        .unwrap();
    let id2 = bus
        .send(
            &PlaceOrder {
                sku: "b".to_string(),
                quantity: 2,
            },
            options(),
            &trace,
        )
        .await
        .unwrap();
    assert_ne!(id1, id2);

    let queue = bus.queue("orders").unwrap();
    wait_for_invocations(&handler, 2).await;
    wait_for_drained(&queue).await;

    // Delivery order matches enqueue order.
    let attempts = handler.recorded();
    assert_eq!(attempts[0].message_id, id1);
    assert_eq!(attempts[1].message_id, id2);

    // Per-message event shape: Enqueue -> Peek -> OnMessage(completed) ->
    // Remove, and m1 handled before m2. The dispatch loop runs concurrently
    // with the second send, so only per-message order is deterministic.
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BusEvent::Queue(event) = event {
            if event.queue == "orders" {
                seen.push((event.kind, event.message_id, event.result));
            }
        }
    }
    for id in [id1, id2] {
        let sequence: Vec<_> = seen
            .iter()
            .filter(|(_, message_id, _)| *message_id == Some(id))
            .map(|(kind, _, result)| (*kind, result.as_str()))
            .collect();
        assert_eq!(
            sequence,
            vec![
                (QueueEventKind::Enqueue, "ok"),
                (QueueEventKind::Peek, "ok"),
                (QueueEventKind::OnMessage, "completed"),
                (QueueEventKind::Remove, "ok"),
            ],
            "event sequence for {id}"
        );
    }
    let handled_at = |id| {
        seen.iter()
            .position(|(kind, message_id, _)| {
                *kind == QueueEventKind::OnMessage && *message_id == Some(id)
            })
            .unwrap()
    };
    assert!(handled_at(id1) < handled_at(id2));

    bus.dispose().await;
}

/// FIFO ordering invariant: n messages delivered exactly in enqueue order.
#[tokio::test]
async fn fifo_preserves_enqueue_order_across_many_messages() {
    let (registry, handler) = scripted_registry(Vec::new());
    let bus = ponte_core::MessageBus::new(
        commands_bus_config(QueueConfig::new("orders")),
        registry,
        None,
    )
    .unwrap();

    let trace = TraceInfo::root("e2e");
    let mut expected = Vec::new();
    for i in 0..20u32 {
        let id = bus
            .send(
                &PlaceOrder {
                    sku: format!("sku-{i}"),
                    quantity: i,
                },
                PublishOptions::to_exchange("commands").with_routing_key("place"),
                &trace,
            )
            .await
            .unwrap();
        expected.push(id);
    }

    wait_for_invocations(&handler, 20).await;

    let delivered: Vec<_> = handler.recorded().iter().map(|a| a.message_id).collect();
    assert_eq!(delivered, expected);

    bus.dispose().await;
}

/// A send with no matching binding is an error; a publish is not.
#[tokio::test]
async fn unrouted_send_fails_while_unrouted_publish_is_accepted() {
    let (registry, _handler) = scripted_registry(Vec::new());
    let bus = ponte_core::MessageBus::new(
        commands_bus_config(QueueConfig::new("orders")),
        registry,
        None,
    )
    .unwrap();

    let trace = TraceInfo::root("e2e");
    let message = PlaceOrder {
        sku: "a".to_string(),
        quantity: 1,
    };

    let err = bus
        .send(
            &message,
            PublishOptions::to_exchange("commands").with_routing_key("no-such-route"),
            &trace,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ponte_core::PublishError::NoRoute { .. }));

    bus.publish(
        &message,
        PublishOptions::to_exchange("commands").with_routing_key("no-such-route"),
        &trace,
    )
    .await
    .expect("event fan-out to zero queues is fine");

    bus.dispose().await;
}
