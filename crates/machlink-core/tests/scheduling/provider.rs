use crate::support::{seeded_memory, ToyBackend, ToyPhase};
use machlink_core::{
    AppEvent, ConnectionEvent, ConnectionPhase, ConnectionProvider, EventBus, Priority, Transition,
    Value,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn provider() -> ConnectionProvider<ToyBackend> {
    ConnectionProvider::new(ToyBackend::new(seeded_memory()), Arc::new(EventBus::new()))
}

/// Roll through the connecting phases so live access is allowed
async fn bring_online(provider: &ConnectionProvider<ToyBackend>) {
    while provider.is_connecting() {
        provider.roll().await;
    }
}

#[tokio::test(start_paused = true)]
async fn all_success_reaches_terminal_in_phase_count_minus_one_steps() {
    let provider = provider();
    assert_eq!(provider.phase(), ToyPhase::initial());
    assert_eq!(provider.connection_progress(), 0.0);

    let mut steps = 0;
    let mut last_progress = 0.0;
    while !provider.is_ready() {
        if provider.phase() == ToyPhase::Sync {
            assert!(provider.buffer().wait_full_read(Duration::from_secs(1)).await);
        }
        let transition = provider.roll().await;
        assert!(matches!(transition, Transition::Advanced { .. }));
        assert!(provider.connection_progress() > last_progress);
        last_progress = provider.connection_progress();
        steps += 1;
    }

    assert_eq!(steps, ToyPhase::ALL.len() - 1);
    assert_eq!(provider.connection_progress(), 1.0);
    assert!(!provider.is_connecting());
    assert!(!provider.is_initializing());
    assert_eq!(provider.roll().await, Transition::Idle);
}

#[tokio::test(start_paused = true)]
async fn injected_failure_returns_to_initial_phase() {
    for failing in [ToyPhase::Open, ToyPhase::Login, ToyPhase::Configure] {
        let provider = provider();
        *provider.backend().fail_at.lock() = Some(failing);

        while provider.phase() != failing {
            provider.roll().await;
        }
        let transition = provider.roll().await;
        assert!(
            matches!(transition, Transition::Restarted { from, .. } if from == failing),
            "{:?}",
            transition
        );
        assert_eq!(provider.phase(), ToyPhase::Open);
        assert_eq!(provider.backend().resets.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_step_is_isolated() {
    let provider = provider();
    *provider.backend().panic_at.lock() = Some(ToyPhase::Login);
    let mut events = provider.events().receiver();

    provider.roll().await;
    let transition = provider.roll().await;
    assert!(matches!(transition, Transition::Restarted { .. }));
    assert_eq!(provider.phase(), ToyPhase::Open);

    let mut restarted = false;
    while let Ok(event) = events.try_recv() {
        if let AppEvent::Connection(ConnectionEvent::Restarted { from_phase, .. }) = event {
            assert_eq!(from_phase, "Login");
            restarted = true;
        }
    }
    assert!(restarted);

    // The machine keeps working after the panic
    provider.roll().await;
    assert_eq!(provider.phase(), ToyPhase::Login);
}

#[tokio::test(start_paused = true)]
async fn disconnected_provider_fails_soft() {
    let provider = provider();
    assert!(provider.is_connecting());
    assert_eq!(provider.read_variable(|s| &s.tool).await, None);
    assert!(!provider.write_variable(|s| &s.queue, 5).await);
    assert!(!provider.toggle_variable(|s| &s.light).await);
    assert_eq!(*provider.observe_variable(|s| &s.tool).borrow(), None);
    assert_eq!(provider.backend().memory.get(2), Some(Value::Int(0)));
}

#[tokio::test(start_paused = true)]
async fn write_is_observed_only_after_next_poll() {
    let provider = provider();
    bring_online(&provider).await;
    assert!(provider.buffer().wait_full_read(Duration::from_secs(1)).await);

    let mut queue = provider.observe_variable(|s| &s.queue);
    assert_eq!(*queue.borrow_and_update(), Some(0));

    assert!(provider.write_variable(|s| &s.queue, 42).await);
    assert_eq!(provider.backend().memory.get(2), Some(Value::Int(42)));
    assert!(!queue.has_changed().unwrap());
    assert_eq!(*queue.borrow(), Some(0));

    provider.buffer().poll_group_once(Priority::Low).await;
    assert!(queue.has_changed().unwrap());
    assert_eq!(*queue.borrow_and_update(), Some(42));
}

#[tokio::test(start_paused = true)]
async fn computed_variable_rejects_writes_but_tracks_inputs() {
    let provider = provider();
    bring_online(&provider).await;
    assert!(provider.buffer().wait_full_read(Duration::from_secs(1)).await);

    let mut idle = provider.observe_variable(|s| &s.idle);
    assert_eq!(*idle.borrow_and_update(), Some(false));
    assert!(!provider.write_variable(|s| &s.idle, true).await);

    provider.backend().memory.set(4, Value::Bool(false));
    provider.buffer().poll_group_once(Priority::High).await;
    assert_eq!(*idle.borrow_and_update(), Some(true));
}

#[tokio::test(start_paused = true)]
async fn toggle_and_live_read() {
    let provider = provider();
    bring_online(&provider).await;

    assert!(provider.toggle_variable(|s| &s.light).await);
    assert_eq!(provider.backend().memory.get(3), Some(Value::Bool(true)));
    assert_eq!(provider.read_variable(|s| &s.light).await, Some(true));

    provider.backend().memory.fail(1);
    assert_eq!(provider.read_variable(|s| &s.tool).await, None);
}

#[tokio::test(start_paused = true)]
async fn named_access_matches_typed_access() {
    let provider = provider();
    bring_online(&provider).await;

    assert_eq!(provider.read_named("tool", None).await, Some(Value::Int(2)));
    assert!(provider.write_named("queue", None, Value::Int(9)).await);
    assert_eq!(provider.backend().memory.get(2), Some(Value::Int(9)));
    assert!(!provider.write_named("queue", None, Value::Text("nine".into())).await);
    assert!(!provider.write_named("missing", None, Value::Int(1)).await);
    assert!(provider.toggle_named("light", None).await);
    assert!(provider.observe_named("idle", None).is_some());
    assert!(provider.observe_named("missing", None).is_none());
}

#[tokio::test(start_paused = true)]
async fn background_loop_reaches_ready_and_announces_it() {
    let provider = provider();
    let mut events = provider.events().receiver();

    provider.start_connection();
    assert!(provider.wait_ready(Duration::from_secs(5)).await);
    tokio::task::yield_now().await;

    let mut seen_full_read = false;
    let mut seen_ready = false;
    while let Ok(event) = events.try_recv() {
        match event {
            AppEvent::Connection(ConnectionEvent::FullMemoryRead { .. }) => seen_full_read = true,
            AppEvent::Connection(ConnectionEvent::Ready { .. }) => seen_ready = true,
            _ => {}
        }
    }
    assert!(seen_full_read);
    assert!(seen_ready);

    provider.initialize();
    assert_eq!(provider.phase(), ToyPhase::Configure);
    assert!(provider.is_initializing());
    assert!(provider.wait_ready(Duration::from_secs(5)).await);

    provider.stop().await;
    assert_eq!(provider.phase(), ToyPhase::Open);
    assert!(!provider.buffer().is_running());
    assert_eq!(provider.backend().resets.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn lost_liveness_in_terminal_phase_restarts() {
    let provider = provider();
    while !provider.is_ready() {
        if provider.phase() == ToyPhase::Sync {
            assert!(provider.buffer().wait_full_read(Duration::from_secs(1)).await);
        }
        provider.roll().await;
    }
    assert_eq!(provider.roll().await, Transition::Idle);

    provider.backend().alive.store(false, Ordering::SeqCst);
    let transition = provider.roll().await;
    assert!(
        matches!(&transition, Transition::Restarted { from: ToyPhase::Done, reason } if reason.contains("toy link dropped")),
        "{:?}",
        transition
    );
    assert_eq!(provider.phase(), ToyPhase::Open);
    assert!(!provider.buffer().is_running());
    assert_eq!(provider.backend().resets.load(Ordering::SeqCst), 1);

    provider.backend().alive.store(true, Ordering::SeqCst);
    assert!(matches!(
        provider.roll().await,
        Transition::Advanced {
            to: ToyPhase::Login,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn stop_aborts_the_step_in_flight() {
    let provider = provider();
    *provider.backend().stall_at.lock() = Some(ToyPhase::Open);
    provider.start_connection();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(provider.backend().steps.load(Ordering::SeqCst), 1);

    provider.stop().await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(provider.backend().stalls_completed.load(Ordering::SeqCst), 0);
    assert_eq!(provider.phase(), ToyPhase::Open);
}

#[tokio::test(start_paused = true)]
async fn restart_aborts_the_step_in_flight() {
    let provider = provider();
    *provider.backend().stall_at.lock() = Some(ToyPhase::Login);
    provider.start_connection();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(provider.phase(), ToyPhase::Login);

    *provider.backend().stall_at.lock() = None;
    provider.start_connection();
    assert!(provider.wait_ready(Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(provider.backend().stalls_completed.load(Ordering::SeqCst), 0);
    assert!(provider.is_ready());
    provider.stop().await;
}
