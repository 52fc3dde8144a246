use crate::bring_up::{bring_online, provider};
use crate::support::MockController;
use machlink_communication::rpc::{Area, CachedAccess, RpcAddress};
use machlink_core::{BulkBuffer, MemoryAccess, Value, ValueKind};
use serde_json::json;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn blocks_cover_exactly_the_registered_range() {
    let controller = MockController::new();
    let provider = provider(&controller);
    let blocks = provider.backend().blocks();
    assert_eq!(blocks.len(), 2);

    let words = blocks.iter().find(|b| b.area() == Area::Word).unwrap();
    assert_eq!((words.start(), words.count()), (10, 14));
    let doubles = blocks.iter().find(|b| b.area() == Area::Double).unwrap();
    assert_eq!((doubles.start(), doubles.count()), (0, 14));

    bring_online(&provider).await;
    assert!(controller
        .calls("memory.read_words")
        .contains(&json!({ "start": 10, "count": 14 })));
    assert!(controller
        .calls("memory.read_doubles")
        .contains(&json!({ "start": 0, "count": 14 })));
    assert_eq!(provider.buffer().is_bulk_complete(words.name()), Some(true));
}

#[tokio::test(start_paused = true)]
async fn cached_access_serves_fresh_blocks_and_falls_back_when_stale() {
    let controller = MockController::new();
    let provider = provider(&controller);
    bring_online(&provider).await;
    provider.stop().await;

    let backend = provider.backend();
    backend.connection().connect().await.unwrap();
    let words = backend
        .blocks()
        .iter()
        .find(|b| b.area() == Area::Word)
        .unwrap()
        .clone();
    let access = CachedAccess::new(
        backend.connection().clone(),
        backend.blocks().to_vec(),
        Duration::from_millis(200),
    );

    controller.set_word(21, 77);
    controller.set_word(22, 0b10);
    assert!(words.refresh().await);
    controller.clear_calls();

    let address = RpcAddress::word(21);
    assert_eq!(access.read(&address, ValueKind::UInt16).await, Some(Value::Int(77)));
    let chamber = RpcAddress::bit(22, 1).unwrap();
    assert_eq!(access.read(&chamber, ValueKind::Bool).await, Some(Value::Bool(true)));
    assert_eq!(controller.call_count(), 0, "fresh block must not touch the transport");

    tokio::time::advance(Duration::from_millis(250)).await;
    controller.set_word(21, 78);
    assert_eq!(access.read(&address, ValueKind::UInt16).await, Some(Value::Int(78)));
    assert_eq!(
        controller.calls("memory.read_words"),
        vec![json!({ "start": 21, "count": 1 })]
    );
}

#[tokio::test(start_paused = true)]
async fn failing_bulk_read_reports_and_keeps_polling_live() {
    let controller = MockController::new();
    let provider = provider(&controller);
    bring_online(&provider).await;

    controller.fail_method("memory.read_doubles");
    let doubles = provider
        .backend()
        .blocks()
        .iter()
        .find(|b| b.area() == Area::Double)
        .unwrap()
        .clone();
    assert!(!doubles.refresh().await);

    controller.heal_method("memory.read_doubles");
    controller.set_double(10, 3.0);
    assert_eq!(
        provider.read_variable(|s| &s.queue_position).await,
        Some(3)
    );
}
